use anyhow::Result;

use crate::grammar::proto::ProtoGrammar;
use crate::grammar::{GrammarId, GrammarType};
use crate::schema::{
    builtin_simple_types, exi_value_type, push_empty_type_grammar,
    BuiltinType, ExiSchema,
};
use crate::string_tables::UriTable;
use crate::QNameId;

/// One attribute use of a complex type.
#[derive(Debug, Clone)]
pub struct AttributeDef {
    pub uri: String,
    pub name: String,
    pub type_id: BuiltinType,
    pub required: bool,
}

impl AttributeDef {
    pub fn new(
        uri: impl Into<String>,
        name: impl Into<String>,
        type_id: BuiltinType,
    ) -> Self {
        AttributeDef {
            uri: uri.into(),
            name: name.into(),
            type_id,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Element content: a simple type reference or a complex type with
/// attribute uses and an optional content particle.
#[derive(Debug, Clone)]
pub enum ContentDef {
    Simple(BuiltinType),
    Complex {
        attributes: Vec<AttributeDef>,
        particle: Option<Box<ParticleDef>>,
    },
}

#[derive(Debug, Clone)]
pub struct ElementDef {
    pub uri: String,
    pub name: String,
    pub content: ContentDef,
    pub nillable: bool,
}

impl ElementDef {
    pub fn simple(
        uri: impl Into<String>,
        name: impl Into<String>,
        type_id: BuiltinType,
    ) -> Self {
        ElementDef {
            uri: uri.into(),
            name: name.into(),
            content: ContentDef::Simple(type_id),
            nillable: false,
        }
    }

    pub fn complex(
        uri: impl Into<String>,
        name: impl Into<String>,
        attributes: Vec<AttributeDef>,
        particle: Option<ParticleDef>,
    ) -> Self {
        ElementDef {
            uri: uri.into(),
            name: name.into(),
            content: ContentDef::Complex {
                attributes,
                particle: particle.map(Box::new),
            },
            nillable: false,
        }
    }

    pub fn nillable(mut self) -> Self {
        self.nillable = true;
        self
    }
}

/// Occurrence-bounded term; `max: None` is unbounded.
#[derive(Debug, Clone)]
pub struct ParticleDef {
    pub min: u32,
    pub max: Option<u32>,
    pub term: TermDef,
}

impl ParticleDef {
    pub fn new(min: u32, max: Option<u32>, term: TermDef) -> Self {
        ParticleDef { min, max, term }
    }

    pub fn once(term: TermDef) -> Self {
        ParticleDef::new(1, Some(1), term)
    }
}

#[derive(Debug, Clone)]
pub enum TermDef {
    Element(ElementDef),
    Wildcard,
    Sequence(Vec<ParticleDef>),
    Choice(Vec<ParticleDef>),
}

/// Compiles a programmatic XSD shape into an [`ExiSchema`]: every element
/// gets a type grammar and an empty-type grammar bound to its qname row,
/// built through the proto-grammar algebra and `assign_codes`.
pub struct SchemaBuilder {
    uris: UriTable,
    pool: Vec<crate::grammar::Grammar>,
    globals: Vec<QNameId>,
    shared_empty: Option<GrammarId>,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        SchemaBuilder::new()
    }
}

impl SchemaBuilder {
    pub fn new() -> Self {
        SchemaBuilder {
            uris: UriTable::initial(),
            pool: Vec::new(),
            globals: Vec::new(),
            shared_empty: None,
        }
    }

    pub fn global_element(mut self, element: ElementDef) -> Result<Self> {
        let qn = self.register_element(&element)?;
        if !self.globals.contains(&qn) {
            self.globals.push(qn);
        }
        Ok(self)
    }

    pub fn finish(mut self) -> ExiSchema {
        // Global elements are presented sorted by URI then local name; the
        // document grammar's SE(qname) codes follow this order.
        let uris = &self.uris;
        self.globals.sort_by(|a, b| {
            let (a_uri, a_ln) = uris.name_of(*a).unwrap_or(("", ""));
            let (b_uri, b_ln) = uris.name_of(*b).unwrap_or(("", ""));
            a_uri.cmp(b_uri).then_with(|| a_ln.cmp(b_ln))
        });
        ExiSchema {
            uris: self.uris,
            pool: self.pool,
            global_elements: self.globals,
            simple_types: builtin_simple_types(),
            is_static: true,
        }
    }

    fn intern(&mut self, uri: &str, name: &str) -> QNameId {
        let uri_id = self
            .uris
            .find(uri)
            .unwrap_or_else(|| self.uris.add(uri.to_owned()));
        let row = self.uris.row_mut(uri_id).expect("row just resolved");
        let ln = row
            .locals
            .find(name)
            .unwrap_or_else(|| row.locals.add(name.to_owned()));
        QNameId::new(uri_id, ln)
    }

    fn shared_empty_grammar(&mut self) -> GrammarId {
        match self.shared_empty {
            Some(id) => id,
            None => {
                let id = push_empty_type_grammar(&mut self.pool);
                self.shared_empty = Some(id);
                id
            }
        }
    }

    /// Register an element's qname and bind its type grammars. The first
    /// registration of a qname wins; later references reuse it.
    fn register_element(&mut self, element: &ElementDef) -> Result<QNameId> {
        let qn = self.intern(&element.uri, &element.name);
        let already_bound = self
            .uris
            .row(qn.uri)
            .and_then(|row| row.locals.row(qn.ln))
            .is_some_and(|row| row.type_grammar.is_some());
        if already_bound {
            return Ok(qn);
        }

        let (type_grammar, empty_grammar) =
            self.build_content(&element.content)?;
        if element.nillable {
            self.pool[type_grammar].is_nillable = true;
        }
        let row = self
            .uris
            .row_mut(qn.uri)
            .and_then(|row| row.locals.row_mut(qn.ln))
            .expect("row just interned");
        row.type_grammar = Some(type_grammar);
        row.type_empty_grammar = Some(empty_grammar);
        Ok(qn)
    }

    fn build_content(
        &mut self,
        content: &ContentDef,
    ) -> Result<(GrammarId, GrammarId)> {
        match content {
            ContentDef::Simple(type_id) => {
                let value = exi_value_type(*type_id, &builtin_simple_types());
                let proto = ProtoGrammar::simple_type(value);
                let grammar = proto
                    .assign_codes(&self.uris, GrammarType::SchemaType);
                self.pool.push(grammar);
                let gid = self.pool.len() - 1;
                Ok((gid, self.shared_empty_grammar()))
            }
            ContentDef::Complex {
                attributes,
                particle,
            } => {
                // Attribute uses fold in canonical order: local name, then
                // URI.
                let mut attributes: Vec<&AttributeDef> =
                    attributes.iter().collect();
                attributes.sort_by(|a, b| {
                    a.name.cmp(&b.name).then_with(|| a.uri.cmp(&b.uri))
                });
                let types = builtin_simple_types();
                let attr_protos: Vec<ProtoGrammar> = attributes
                    .iter()
                    .map(|attr| {
                        let qn = self.intern(&attr.uri, &attr.name);
                        ProtoGrammar::attribute_use(
                            attr.required,
                            qn,
                            exi_value_type(attr.type_id, &types),
                        )
                    })
                    .collect();

                let content_proto = match particle {
                    Some(particle) => self.build_particle(particle)?,
                    None => ProtoGrammar::accepting(),
                };
                let proto = ProtoGrammar::complex_type(
                    &attr_protos,
                    content_proto,
                )?;
                let grammar = proto
                    .assign_codes(&self.uris, GrammarType::SchemaType);
                self.pool.push(grammar);
                let gid = self.pool.len() - 1;

                let empty = if attr_protos.is_empty() {
                    self.shared_empty_grammar()
                } else {
                    let proto =
                        ProtoGrammar::complex_empty_type(&attr_protos)?;
                    let grammar = proto.assign_codes(
                        &self.uris,
                        GrammarType::SchemaEmptyType,
                    );
                    self.pool.push(grammar);
                    self.pool.len() - 1
                };
                Ok((gid, empty))
            }
        }
    }

    fn build_particle(
        &mut self,
        particle: &ParticleDef,
    ) -> Result<ProtoGrammar> {
        let term = match &particle.term {
            TermDef::Element(element) => {
                let qn = self.register_element(element)?;
                ProtoGrammar::element_term(qn)
            }
            TermDef::Wildcard => ProtoGrammar::wildcard_term(),
            TermDef::Sequence(parts) => ProtoGrammar::sequence(
                parts
                    .iter()
                    .map(|p| self.build_particle(p))
                    .collect::<Result<_>>()?,
            )?,
            TermDef::Choice(parts) => ProtoGrammar::choice(
                parts
                    .iter()
                    .map(|p| self.build_particle(p))
                    .collect::<Result<_>>()?,
            )?,
        };
        ProtoGrammar::particle(particle.min, particle.max, term)
    }
}
