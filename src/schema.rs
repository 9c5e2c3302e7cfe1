use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

use crate::grammar::{
    Event, EventType, ExiType, Grammar, GrammarId, GrammarRule, GrammarType,
    Production, ValueType, VOID_NON_TERMINAL,
};
use crate::string_tables::{UriTable, URI_XSD_ID};
use crate::values::DateTimeKind;
use crate::QNameId;

pub mod build;

// Constraining-facet bits.
pub const FACET_LENGTH: u16 = 0x0001;
pub const FACET_MIN_LENGTH: u16 = 0x0002;
pub const FACET_MAX_LENGTH: u16 = 0x0004;
pub const FACET_PATTERN: u16 = 0x0008;
pub const FACET_ENUMERATION: u16 = 0x0010;
pub const FACET_WHITE_SPACE: u16 = 0x0020;
pub const FACET_MAX_INCLUSIVE: u16 = 0x0040;
pub const FACET_MAX_EXCLUSIVE: u16 = 0x0080;
pub const FACET_MIN_EXCLUSIVE: u16 = 0x0100;
pub const FACET_MIN_INCLUSIVE: u16 = 0x0200;
pub const FACET_TOTAL_DIGITS: u16 = 0x0400;
pub const FACET_FRACTION_DIGITS: u16 = 0x0800;
pub const FACET_NAMED_SUBTYPE: u16 = 0x1000;
pub const FACET_SIMPLE_UNION: u16 = 0x2000;

/// Facet description of one simple type.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SimpleType {
    pub facets: u16,
    pub min_inclusive: i64,
    pub max_inclusive: i64,
    pub max_length: u32,
}

impl SimpleType {
    fn plain() -> Self {
        SimpleType::default()
    }

    fn subtyped() -> Self {
        SimpleType {
            facets: FACET_NAMED_SUBTYPE,
            ..SimpleType::default()
        }
    }

    fn bounded(min: i64, max: i64, subtyped: bool) -> Self {
        SimpleType {
            facets: FACET_MIN_INCLUSIVE
                | FACET_MAX_INCLUSIVE
                | if subtyped { FACET_NAMED_SUBTYPE } else { 0 },
            min_inclusive: min,
            max_inclusive: max,
            max_length: 0,
        }
    }

    pub fn bounds(&self) -> Option<(i64, i64)> {
        (self.facets & FACET_MIN_INCLUSIVE != 0
            && self.facets & FACET_MAX_INCLUSIVE != 0)
            .then_some((self.min_inclusive, self.max_inclusive))
    }
}

/// The XSD built-in simple types, ids 0..=44.
#[repr(u16)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    TryFromPrimitive,
    IntoPrimitive,
)]
pub enum BuiltinType {
    String = 0,
    NormalizedString = 1,
    Token = 2,
    Nmtoken = 3,
    Name = 4,
    Language = 5,
    NcName = 6,
    Idref = 7,
    Idrefs = 8,
    Entity = 9,
    Entities = 10,
    Id = 11,
    Decimal = 12,
    Integer = 13,
    NonPositiveInteger = 14,
    NegativeInteger = 15,
    Long = 16,
    Int = 17,
    Short = 18,
    Byte = 19,
    NonNegativeInteger = 20,
    UnsignedLong = 21,
    UnsignedInt = 22,
    UnsignedShort = 23,
    UnsignedByte = 24,
    PositiveInteger = 25,
    Boolean = 26,
    Base64Binary = 27,
    HexBinary = 28,
    Float = 29,
    Double = 30,
    AnyUri = 31,
    QName = 32,
    Notation = 33,
    Duration = 34,
    DateTime = 35,
    Time = 36,
    Date = 37,
    GYearMonth = 38,
    GYear = 39,
    GMonthDay = 40,
    GDay = 41,
    GMonth = 42,
    AnySimpleType = 43,
    AnyType = 44,
}

pub const SIMPLE_TYPE_COUNT: usize = 45;

impl BuiltinType {
    /// Resolve one of the XSD namespace's seeded local names. `NMTOKENS`
    /// has no simple-type slot of its own and degrades to its item type.
    pub fn from_xsd_name(name: &str) -> Option<BuiltinType> {
        use BuiltinType::*;
        Some(match name {
            "ENTITIES" => Entities,
            "ENTITY" => Entity,
            "ID" => Id,
            "IDREF" => Idref,
            "IDREFS" => Idrefs,
            "NCName" => NcName,
            "NMTOKEN" | "NMTOKENS" => Nmtoken,
            "NOTATION" => Notation,
            "Name" => Name,
            "QName" => QName,
            "anySimpleType" => AnySimpleType,
            "anyType" => AnyType,
            "anyURI" => AnyUri,
            "base64Binary" => Base64Binary,
            "boolean" => Boolean,
            "byte" => Byte,
            "date" => Date,
            "dateTime" => DateTime,
            "decimal" => Decimal,
            "double" => Double,
            "duration" => Duration,
            "float" => Float,
            "gDay" => GDay,
            "gMonth" => GMonth,
            "gMonthDay" => GMonthDay,
            "gYear" => GYear,
            "gYearMonth" => GYearMonth,
            "hexBinary" => HexBinary,
            "int" => Int,
            "integer" => Integer,
            "language" => Language,
            "long" => Long,
            "negativeInteger" => NegativeInteger,
            "nonNegativeInteger" => NonNegativeInteger,
            "nonPositiveInteger" => NonPositiveInteger,
            "normalizedString" => NormalizedString,
            "positiveInteger" => PositiveInteger,
            "short" => Short,
            "string" => String,
            "time" => Time,
            "token" => Token,
            "unsignedByte" => UnsignedByte,
            "unsignedInt" => UnsignedInt,
            "unsignedLong" => UnsignedLong,
            "unsignedShort" => UnsignedShort,
            _ => return None,
        })
    }
}

/// Facet table for the built-in types, indexed by [`BuiltinType`] id.
pub fn builtin_simple_types() -> Vec<SimpleType> {
    use SimpleType as St;
    vec![
        St::subtyped(),                      // string
        St::subtyped(),                      // normalizedString
        St::subtyped(),                      // token
        St::subtyped(),                      // NMTOKEN
        St::subtyped(),                      // Name
        St::plain(),                         // language
        St::subtyped(),                      // NCName
        St::subtyped(),                      // IDREF
        St::plain(),                         // IDREFS
        St::subtyped(),                      // ENTITY
        St::plain(),                         // ENTITIES
        St::plain(),                         // ID
        St::subtyped(),                      // decimal
        St::subtyped(),                      // integer
        St {
            facets: FACET_NAMED_SUBTYPE | FACET_MAX_INCLUSIVE,
            max_inclusive: 0,
            ..St::default()
        },                                   // nonPositiveInteger
        St {
            facets: FACET_MAX_INCLUSIVE,
            max_inclusive: -1,
            ..St::default()
        },                                   // negativeInteger
        St::subtyped(),                      // long
        St::subtyped(),                      // int
        St::bounded(-32768, 32767, true),    // short
        St::bounded(-128, 127, false),       // byte
        St {
            facets: FACET_NAMED_SUBTYPE | FACET_MIN_INCLUSIVE,
            ..St::default()
        },                                   // nonNegativeInteger
        St {
            facets: FACET_NAMED_SUBTYPE | FACET_MIN_INCLUSIVE,
            ..St::default()
        },                                   // unsignedLong
        St {
            facets: FACET_NAMED_SUBTYPE | FACET_MIN_INCLUSIVE,
            ..St::default()
        },                                   // unsignedInt
        St::bounded(0, 65535, true),         // unsignedShort
        St::bounded(0, 255, false),          // unsignedByte
        St {
            facets: FACET_MIN_INCLUSIVE,
            min_inclusive: 1,
            ..St::default()
        },                                   // positiveInteger
        St::plain(),                         // boolean
        St::plain(),                         // base64Binary
        St::plain(),                         // hexBinary
        St::plain(),                         // float
        St::plain(),                         // double
        St::plain(),                         // anyURI
        St::plain(),                         // QName
        St::plain(),                         // NOTATION
        St::plain(),                         // duration
        St::plain(),                         // dateTime
        St::plain(),                         // time
        St::plain(),                         // date
        St::plain(),                         // gYearMonth
        St::plain(),                         // gYear
        St::plain(),                         // gMonthDay
        St::plain(),                         // gDay
        St::plain(),                         // gMonth
        St::plain(),                         // anySimpleType
        St::plain(),                         // anyType
    ]
}

/// Span a bounded integer type can take before it stops qualifying for the
/// n-bit small-integer representation.
const SMALL_INTEGER_SPAN: i64 = 4096;

/// The wire classification of a built-in simple type.
pub fn exi_value_type(id: BuiltinType, types: &[SimpleType]) -> ValueType {
    use BuiltinType::*;
    let type_id: u16 = id.into();
    let exi_type = match id {
        Boolean => ExiType::Boolean,
        Base64Binary | HexBinary => ExiType::Binary,
        Float | Double => ExiType::Float,
        Decimal => ExiType::Decimal,
        DateTime | Time | Date | GYearMonth | GYear | GMonthDay | GDay
        | GMonth => ExiType::DateTime,
        Integer | NonPositiveInteger | NegativeInteger | Long | Int
        | Short | Byte | NonNegativeInteger | UnsignedLong | UnsignedInt
        | UnsignedShort | UnsignedByte | PositiveInteger => {
            integer_exi_type(&types[usize::from(type_id)])
        }
        _ => ExiType::String,
    };
    ValueType::typed(exi_type, type_id)
}

fn integer_exi_type(st: &SimpleType) -> ExiType {
    if let Some((min, max)) = st.bounds() {
        if max - min < SMALL_INTEGER_SPAN {
            return ExiType::SmallInteger;
        }
    }
    if st.facets & FACET_MIN_INCLUSIVE != 0 && st.min_inclusive >= 0 {
        ExiType::NonNegativeInteger
    } else {
        ExiType::Integer
    }
}

/// Date-time component set behind a typed production; plain dateTime when
/// the production carries no simple type.
pub fn date_time_kind(simple_type: Option<u16>) -> DateTimeKind {
    match simple_type.and_then(|id| BuiltinType::try_from(id).ok()) {
        Some(BuiltinType::Time) => DateTimeKind::Time,
        Some(BuiltinType::Date) => DateTimeKind::Date,
        Some(BuiltinType::GYearMonth) => DateTimeKind::GYearMonth,
        Some(BuiltinType::GYear) => DateTimeKind::GYear,
        Some(BuiltinType::GMonthDay) => DateTimeKind::GMonthDay,
        Some(BuiltinType::GDay) => DateTimeKind::GDay,
        Some(BuiltinType::GMonth) => DateTimeKind::GMonth,
        _ => DateTimeKind::DateTime,
    }
}

/// A compiled schema: seeded string tables whose qname rows point into the
/// grammar pool, the sorted global elements, and the simple-type table.
///
/// A schema marked `is_static` is read-only after construction; streams
/// clone the tables and pool at init, so learned productions never touch
/// the shared object.
#[derive(Debug, Clone)]
pub struct ExiSchema {
    pub uris: UriTable,
    pub pool: Vec<Grammar>,
    /// Sorted by URI then local name.
    pub global_elements: Vec<QNameId>,
    pub simple_types: Vec<SimpleType>,
    pub is_static: bool,
}

/// The schema used for `schemaId = empty` streams: the XSD built-in type
/// grammars and nothing else.
pub fn generate_builtin_types_schema() -> ExiSchema {
    let mut uris = UriTable::initial();
    let mut pool = Vec::new();
    let types = builtin_simple_types();

    let empty_id = push_empty_type_grammar(&mut pool);

    let xsd = uris.row_mut(URI_XSD_ID).expect("seeded table");
    let names: Vec<String> = xsd
        .locals
        .iter()
        .map(|row| row.name().to_owned())
        .collect();
    for (ln, name) in names.iter().enumerate() {
        let Some(builtin) = BuiltinType::from_xsd_name(name) else {
            continue;
        };
        let value = exi_value_type(builtin, &types);
        pool.push(simple_type_grammar(value));
        let gid = pool.len() - 1;
        let row = xsd.locals.row_mut(ln).expect("seeded row");
        row.type_grammar = Some(gid);
        row.type_empty_grammar = Some(empty_id);
    }

    ExiSchema {
        uris,
        pool,
        global_elements: Vec::new(),
        simple_types: types,
        is_static: false,
    }
}

/// `CH[type] → EE` as a runtime grammar, not yet augmented.
pub(crate) fn simple_type_grammar(value: ValueType) -> Grammar {
    let mut g = Grammar::new(GrammarType::SchemaType);
    let mut rule0 = GrammarRule::default();
    rule0.parts[0].push(Production::new(
        Event::typed(EventType::Ch, value),
        1,
    ));
    rule0.recompute_bits();
    let mut rule1 = GrammarRule::default();
    rule1.parts[0].push(Production::new(
        Event::of(EventType::Ee),
        VOID_NON_TERMINAL,
    ));
    rule1.recompute_bits();
    g.rules = vec![rule0, rule1];
    g
}

/// The shared empty-content grammar, not yet augmented.
pub(crate) fn push_empty_type_grammar(pool: &mut Vec<Grammar>) -> GrammarId {
    let mut g = Grammar::new(GrammarType::SchemaEmptyType);
    let mut rule0 = GrammarRule::default();
    rule0.parts[0].push(Production::new(
        Event::of(EventType::Ee),
        VOID_NON_TERMINAL,
    ));
    rule0.recompute_bits();
    g.rules = vec![rule0];
    pool.push(g);
    pool.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_type_table_matches_ids() {
        let types = builtin_simple_types();
        assert_eq!(types.len(), SIMPLE_TYPE_COUNT);
        let unsigned_byte = &types[usize::from(u16::from(
            BuiltinType::UnsignedByte,
        ))];
        assert_eq!(unsigned_byte.bounds(), Some((0, 255)));
        let byte = &types[usize::from(u16::from(BuiltinType::Byte))];
        assert_eq!(byte.bounds(), Some((-128, 127)));
        assert_eq!(u16::from(BuiltinType::UnsignedByte), 24);
        assert_eq!(u16::from(BuiltinType::AnyType), 44);
        assert_eq!(
            BuiltinType::try_from(26u16).unwrap(),
            BuiltinType::Boolean
        );
    }

    #[test]
    fn integer_classification() {
        let types = builtin_simple_types();
        let classify = |id: BuiltinType| exi_value_type(id, &types).exi_type;
        assert_eq!(classify(BuiltinType::UnsignedByte), ExiType::SmallInteger);
        assert_eq!(classify(BuiltinType::Byte), ExiType::SmallInteger);
        assert_eq!(classify(BuiltinType::Short), ExiType::Integer);
        assert_eq!(
            classify(BuiltinType::UnsignedShort),
            ExiType::NonNegativeInteger
        );
        assert_eq!(
            classify(BuiltinType::NonNegativeInteger),
            ExiType::NonNegativeInteger
        );
        assert_eq!(classify(BuiltinType::Integer), ExiType::Integer);
        assert_eq!(classify(BuiltinType::NegativeInteger), ExiType::Integer);
        assert_eq!(classify(BuiltinType::Boolean), ExiType::Boolean);
        assert_eq!(classify(BuiltinType::Duration), ExiType::String);
        assert_eq!(classify(BuiltinType::GDay), ExiType::DateTime);
    }

    #[test]
    fn builtin_types_schema_covers_the_xsd_row() {
        let schema = generate_builtin_types_schema();
        let xsd = schema.uris.row(URI_XSD_ID).unwrap();
        for row in xsd.locals.iter() {
            assert!(
                row.type_grammar.is_some(),
                "no grammar for {}",
                row.name()
            );
            assert!(row.type_empty_grammar.is_some());
        }
        // One grammar per name plus the shared empty grammar.
        assert_eq!(schema.pool.len(), xsd.locals.len() + 1);
        assert!(schema.global_elements.is_empty());
    }

    #[test]
    fn date_time_kinds_follow_type_ids() {
        assert_eq!(
            date_time_kind(Some(BuiltinType::Time.into())),
            DateTimeKind::Time
        );
        assert_eq!(
            date_time_kind(Some(BuiltinType::GMonth.into())),
            DateTimeKind::GMonth
        );
        assert_eq!(date_time_kind(None), DateTimeKind::DateTime);
    }
}
