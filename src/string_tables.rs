use std::collections::HashMap;

use crate::grammar::GrammarId;
use crate::options::Options;
use crate::QNameId;

pub const URI_EMPTY_ID: u16 = 0;
pub const URI_XML_ID: u16 = 1;
pub const URI_XSI_ID: u16 = 2;
pub const URI_XSD_ID: u16 = 3;
pub const URI_EXI_ID: u16 = 4;

pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
pub const XSI_NAMESPACE: &str =
    "http://www.w3.org/2001/XMLSchema-instance";
pub const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";
pub const EXI_NAMESPACE: &str = "http://www.w3.org/2009/exi";

/// Local-name ids within the xsi partition.
pub const XSI_NIL_LN: usize = 0;
pub const XSI_TYPE_LN: usize = 1;

/// Initial local names of the xml namespace.
const XML_LOCAL_NAMES: [&str; 4] = ["base", "id", "lang", "space"];

/// Initial local names of the XMLSchema namespace.
const XSD_LOCAL_NAMES: [&str; 46] = [
    "ENTITIES",
    "ENTITY",
    "ID",
    "IDREF",
    "IDREFS",
    "NCName",
    "NMTOKEN",
    "NMTOKENS",
    "NOTATION",
    "Name",
    "QName",
    "anySimpleType",
    "anyType",
    "anyURI",
    "base64Binary",
    "boolean",
    "byte",
    "date",
    "dateTime",
    "decimal",
    "double",
    "duration",
    "float",
    "gDay",
    "gMonth",
    "gMonthDay",
    "gYear",
    "gYearMonth",
    "hexBinary",
    "int",
    "integer",
    "language",
    "long",
    "negativeInteger",
    "nonNegativeInteger",
    "nonPositiveInteger",
    "normalizedString",
    "positiveInteger",
    "short",
    "string",
    "time",
    "token",
    "unsignedByte",
    "unsignedInt",
    "unsignedLong",
    "unsignedShort",
];

/// The EXI options vocabulary, ids 0..=38 of the exi namespace.
pub const EXI_OPTIONS_LOCAL_NAMES: [&str; 39] = [
    "alignment",
    "base64Binary",
    "blockSize",
    "boolean",
    "byte",
    "comments",
    "common",
    "compression",
    "datatypeRepresentationMap",
    "dateTime",
    "date",
    "decimal",
    "double",
    "dtd",
    "fragment",
    "gDay",
    "gMonthDay",
    "gMonth",
    "gYearMonth",
    "gYear",
    "header",
    "hexBinary",
    "ieeeBinary32",
    "ieeeBinary64",
    "integer",
    "lesscommon",
    "lexicalValues",
    "pis",
    "pre-compress",
    "prefixes",
    "preserve",
    "schemaId",
    "selfContained",
    "strict",
    "string",
    "time",
    "uncommon",
    "valueMaxLength",
    "valuePartitionCapacity",
];

/// One local-name row: the name itself, the ids of this qname's values in
/// the global value partition, and the grammars bound to the qname.
#[derive(Debug, Clone, Default)]
pub struct LocalNamesRow {
    name: String,
    /// Local value partition: positions index into the global value table.
    pub value_cross: Vec<usize>,
    pub type_grammar: Option<GrammarId>,
    pub type_empty_grammar: Option<GrammarId>,
}

impl LocalNamesRow {
    fn new(name: impl Into<String>) -> Self {
        LocalNamesRow {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocalNamesTable {
    rows: Vec<LocalNamesRow>,
}

impl LocalNamesTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, ln: usize) -> Option<&LocalNamesRow> {
        self.rows.get(ln)
    }

    pub fn row_mut(&mut self, ln: usize) -> Option<&mut LocalNamesRow> {
        self.rows.get_mut(ln)
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.rows.iter().position(|row| row.name == name)
    }

    /// Append a row, returning its permanent id.
    pub fn add(&mut self, name: impl Into<String>) -> usize {
        self.rows.push(LocalNamesRow::new(name));
        self.rows.len() - 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocalNamesRow> {
        self.rows.iter()
    }
}

/// Prefix partition of one URI row. Rows grow on demand; ids are
/// append-only like every other partition.
#[derive(Debug, Clone, Default)]
pub struct PrefixTable {
    rows: Vec<String>,
}

impl PrefixTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, id: usize) -> Option<&str> {
        self.rows.get(id).map(String::as_str)
    }

    pub fn find(&self, prefix: &str) -> Option<usize> {
        self.rows.iter().position(|row| row == prefix)
    }

    pub fn add(&mut self, prefix: impl Into<String>) -> usize {
        self.rows.push(prefix.into());
        self.rows.len() - 1
    }
}

#[derive(Debug, Clone)]
pub struct UriRow {
    uri: String,
    pub locals: LocalNamesTable,
    pub prefixes: Option<PrefixTable>,
}

impl UriRow {
    fn new(uri: impl Into<String>) -> Self {
        UriRow {
            uri: uri.into(),
            locals: LocalNamesTable::default(),
            prefixes: None,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The prefix table, created empty on first touch. Decoders hit this
    /// lazily for URI rows that were appended mid-stream.
    pub fn prefixes_mut(&mut self) -> &mut PrefixTable {
        self.prefixes.get_or_insert_with(PrefixTable::default)
    }
}

/// The URI partition with its nested local-name and prefix partitions.
#[derive(Debug, Clone)]
pub struct UriTable {
    rows: Vec<UriRow>,
}

impl UriTable {
    /// The EXI-prescribed initial table: five URI rows with their standard
    /// local-name and prefix seeds.
    pub fn initial() -> Self {
        let mut empty = UriRow::new("");
        empty.prefixes_mut().add("");

        let mut xml = UriRow::new(XML_NAMESPACE);
        xml.prefixes_mut().add("xml");
        for name in XML_LOCAL_NAMES {
            xml.locals.add(name);
        }

        let mut xsi = UriRow::new(XSI_NAMESPACE);
        xsi.prefixes_mut().add("xsi");
        for name in XSI_LOCAL_NAMES {
            xsi.locals.add(name);
        }

        let mut xsd = UriRow::new(XSD_NAMESPACE);
        for name in XSD_LOCAL_NAMES {
            xsd.locals.add(name);
        }

        let mut exi = UriRow::new(EXI_NAMESPACE);
        for name in EXI_OPTIONS_LOCAL_NAMES {
            exi.locals.add(name);
        }

        UriTable {
            rows: vec![empty, xml, xsi, xsd, exi],
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, uri: u16) -> Option<&UriRow> {
        self.rows.get(usize::from(uri))
    }

    pub fn row_mut(&mut self, uri: u16) -> Option<&mut UriRow> {
        self.rows.get_mut(usize::from(uri))
    }

    pub fn find(&self, uri: &str) -> Option<u16> {
        self.rows.iter().position(|row| row.uri == uri).map(|i| i as u16)
    }

    /// Append a URI row, returning its permanent id. The local-name table
    /// starts empty and no prefix table is attached yet.
    pub fn add(&mut self, uri: impl Into<String>) -> u16 {
        self.rows.push(UriRow::new(uri));
        (self.rows.len() - 1) as u16
    }

    pub fn name_of(&self, qname: QNameId) -> Option<(&str, &str)> {
        let row = self.row(qname.uri)?;
        Some((row.uri(), row.locals.row(qname.ln)?.name()))
    }
}

const XSI_LOCAL_NAMES: [&str; 2] = ["nil", "type"];

/// The global value partition. Insertion order is normative; the optional
/// hash index only accelerates encoder lookups.
#[derive(Debug, Clone, Default)]
pub struct ValueTable {
    rows: Vec<String>,
    hash: Option<HashMap<String, usize>>,
}

impl ValueTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&str> {
        self.rows.get(id).map(String::as_str)
    }

    pub fn find(&self, value: &str) -> Option<usize> {
        match &self.hash {
            Some(index) => index.get(value).copied(),
            None => self.rows.iter().position(|row| row == value),
        }
    }

    fn add(&mut self, value: String) -> usize {
        let id = self.rows.len();
        if let Some(index) = &mut self.hash {
            index.insert(value.clone(), id);
        }
        self.rows.push(value);
        id
    }

    pub fn enable_hash(&mut self) {
        #[cfg(feature = "value-hash")]
        {
            self.hash = Some(HashMap::new());
        }
    }
}

/// String tables of one stream: the URI partition tree plus the global
/// value partition.
#[derive(Debug, Clone)]
pub struct StringTables {
    pub uris: UriTable,
    pub values: ValueTable,
}

impl StringTables {
    pub fn initial() -> Self {
        StringTables {
            uris: UriTable::initial(),
            values: ValueTable::default(),
        }
    }

    pub fn with_uris(uris: UriTable) -> Self {
        StringTables {
            uris,
            values: ValueTable::default(),
        }
    }

    /// Local-partition hit: the id within the qname's cross table.
    pub fn local_value_hit(
        &self,
        qname: QNameId,
        value: &str,
    ) -> Option<usize> {
        let row = self.uris.row(qname.uri)?.locals.row(qname.ln)?;
        row.value_cross
            .iter()
            .position(|&gid| self.values.get(gid) == Some(value))
    }

    /// Resolve a local-partition id back to the global value string.
    pub fn local_value(&self, qname: QNameId, local_id: usize) -> Option<&str> {
        let row = self.uris.row(qname.uri)?.locals.row(qname.ln)?;
        let gid = *row.value_cross.get(local_id)?;
        self.values.get(gid)
    }

    pub fn local_value_count(&self, qname: QNameId) -> usize {
        self.uris
            .row(qname.uri)
            .and_then(|row| row.locals.row(qname.ln))
            .map_or(0, |row| row.value_cross.len())
    }

    /// Append a value to the global partition and to the qname's local
    /// cross table, subject to the retention policy.
    pub fn add_value(
        &mut self,
        opts: &Options,
        qname: QNameId,
        value: &str,
    ) -> bool {
        if !opts.retains_value(value.chars().count(), self.values.len()) {
            return false;
        }
        let gid = self.values.add(value.to_owned());
        if let Some(row) = self
            .uris
            .row_mut(qname.uri)
            .and_then(|row| row.locals.row_mut(qname.ln))
        {
            row.value_cross.push(gid);
        }
        true
    }
}
