use std::sync::OnceLock;

use crate::grammar::{
    Event, EventType, ExiType, Grammar, GrammarRule, GrammarType,
    Production, ValueType, VOID_NON_TERMINAL,
};
use crate::schema::{builtin_simple_types, ExiSchema};
use crate::string_tables::{UriTable, URI_EXI_ID, URI_XSI_ID, XSI_NIL_LN};
use crate::QNameId;

// Local-name ids within the exi namespace row, as seeded.
const LN_ALIGNMENT: usize = 0;
const LN_BASE64BINARY: usize = 1;
const LN_BLOCK_SIZE: usize = 2;
const LN_BOOLEAN: usize = 3;
const LN_BYTE: usize = 4;
const LN_COMMENTS: usize = 5;
const LN_COMMON: usize = 6;
const LN_COMPRESSION: usize = 7;
const LN_DRM: usize = 8;
const LN_DATETIME: usize = 9;
const LN_DATE: usize = 10;
const LN_DECIMAL: usize = 11;
const LN_DOUBLE: usize = 12;
const LN_DTD: usize = 13;
const LN_FRAGMENT: usize = 14;
const LN_GDAY: usize = 15;
const LN_GMONTHDAY: usize = 16;
const LN_GMONTH: usize = 17;
const LN_GYEARMONTH: usize = 18;
const LN_GYEAR: usize = 19;
pub(crate) const LN_HEADER: usize = 20;
const LN_HEXBINARY: usize = 21;
const LN_IEEE32: usize = 22;
const LN_IEEE64: usize = 23;
const LN_INTEGER: usize = 24;
const LN_LESSCOMMON: usize = 25;
const LN_LEXICAL_VALUES: usize = 26;
const LN_PIS: usize = 27;
const LN_PRE_COMPRESS: usize = 28;
const LN_PREFIXES: usize = 29;
const LN_PRESERVE: usize = 30;
const LN_SCHEMA_ID: usize = 31;
const LN_SELF_CONTAINED: usize = 32;
const LN_STRICT: usize = 33;
const LN_STRING: usize = 34;
const LN_TIME: usize = 35;
const LN_UNCOMMON: usize = 36;
const LN_VALUE_MAX_LENGTH: usize = 37;
const LN_VALUE_PARTITION_CAPACITY: usize = 38;

fn se(ln: usize, non_term: usize) -> Production {
    Production::with_qname(
        Event::of(EventType::SeQname),
        QNameId::new(URI_EXI_ID, ln),
        non_term,
    )
}

fn ch(exi_type: ExiType, non_term: usize) -> Production {
    Production::new(
        Event::typed(EventType::Ch, ValueType::of(exi_type)),
        non_term,
    )
}

fn ee() -> Production {
    Production::new(Event::of(EventType::Ee), VOID_NON_TERMINAL)
}

/// Rule from productions given in event-code order.
fn rule(mut code_order: Vec<Production>) -> GrammarRule {
    code_order.reverse();
    let mut rule = GrammarRule {
        parts: [code_order, Vec::new(), Vec::new()],
        bits: [0; 3],
    };
    rule.recompute_bits();
    rule
}

/// Type grammars here carry their event codes already assigned and the
/// strict additions baked in, so stream init never augments them further.
fn grammar(rules: Vec<GrammarRule>) -> Grammar {
    let mut g = Grammar::new(GrammarType::SchemaType);
    g.is_augmented = true;
    g.rules = rules;
    g
}

fn simple(exi_type: ExiType) -> Grammar {
    grammar(vec![rule(vec![ch(exi_type, 1)]), rule(vec![ee()])])
}

/// `schemaId`: string content, nillable in the strict options grammar.
fn schema_id_grammar() -> Grammar {
    let mut rule0 = rule(vec![ch(ExiType::String, 1)]);
    rule0.parts[1] = vec![Production::with_qname(
        Event::typed(EventType::AtQname, ValueType::of(ExiType::Boolean)),
        QNameId::new(URI_XSI_ID, XSI_NIL_LN),
        0,
    )];
    rule0.recompute_bits();
    grammar(vec![rule0, rule(vec![ee()])])
}

fn empty_grammar() -> Grammar {
    let mut g = grammar(vec![rule(vec![ee()])]);
    g.grammar_type = GrammarType::SchemaEmptyType;
    g
}

/// The statically defined schema for the EXI options document: the five
/// seeded URI rows with a type grammar per option element and the single
/// global element `exi:header`.
pub(crate) fn options_schema() -> &'static ExiSchema {
    static SCHEMA: OnceLock<ExiSchema> = OnceLock::new();
    SCHEMA.get_or_init(build)
}

fn build() -> ExiSchema {
    let mut uris = UriTable::initial();
    let mut pool: Vec<Grammar> = Vec::new();
    let mut push = |g: Grammar| -> usize {
        pool.push(g);
        pool.len() - 1
    };

    let empty = push(empty_grammar());

    let alignment = push(grammar(vec![
        rule(vec![se(LN_BYTE, 2), se(LN_PRE_COMPRESS, 1)]),
        rule(vec![ee()]),
        rule(vec![ee()]),
    ]));

    let common = push(grammar(vec![
        rule(vec![
            se(LN_COMPRESSION, 1),
            se(LN_FRAGMENT, 2),
            se(LN_SCHEMA_ID, 3),
            ee(),
        ]),
        rule(vec![se(LN_FRAGMENT, 2), se(LN_SCHEMA_ID, 3), ee()]),
        rule(vec![se(LN_SCHEMA_ID, 3), ee()]),
        rule(vec![ee()]),
    ]));

    let drm = push(grammar(vec![
        rule(vec![Production::new(Event::of(EventType::SeAll), 1)]),
        rule(vec![ee()]),
    ]));

    let header = push(grammar(vec![
        rule(vec![
            se(LN_LESSCOMMON, 1),
            se(LN_COMMON, 2),
            se(LN_STRICT, 3),
            ee(),
        ]),
        rule(vec![se(LN_COMMON, 2), se(LN_STRICT, 3), ee()]),
        rule(vec![se(LN_STRICT, 3), ee()]),
        rule(vec![ee()]),
    ]));

    let lesscommon = push(grammar(vec![
        rule(vec![
            se(LN_UNCOMMON, 1),
            se(LN_PRESERVE, 2),
            se(LN_BLOCK_SIZE, 3),
            ee(),
        ]),
        rule(vec![se(LN_PRESERVE, 2), se(LN_BLOCK_SIZE, 3), ee()]),
        rule(vec![se(LN_BLOCK_SIZE, 3), ee()]),
        rule(vec![ee()]),
    ]));

    let preserve = push(grammar(vec![
        rule(vec![
            se(LN_DTD, 1),
            se(LN_PREFIXES, 2),
            se(LN_LEXICAL_VALUES, 3),
            se(LN_COMMENTS, 4),
            se(LN_PIS, 5),
            ee(),
        ]),
        rule(vec![
            se(LN_PREFIXES, 2),
            se(LN_LEXICAL_VALUES, 3),
            se(LN_COMMENTS, 4),
            se(LN_PIS, 5),
            ee(),
        ]),
        rule(vec![
            se(LN_LEXICAL_VALUES, 3),
            se(LN_COMMENTS, 4),
            se(LN_PIS, 5),
            ee(),
        ]),
        rule(vec![se(LN_COMMENTS, 4), se(LN_PIS, 5), ee()]),
        rule(vec![se(LN_PIS, 5), ee()]),
        rule(vec![ee()]),
    ]));

    let schema_id = push(schema_id_grammar());

    let uncommon = push(grammar(vec![
        rule(vec![
            se(LN_ALIGNMENT, 1),
            se(LN_SELF_CONTAINED, 2),
            se(LN_VALUE_MAX_LENGTH, 3),
            se(LN_VALUE_PARTITION_CAPACITY, 4),
            se(LN_DRM, 5),
            Production::new(Event::of(EventType::SeAll), 1),
            ee(),
        ]),
        rule(vec![
            se(LN_SELF_CONTAINED, 2),
            se(LN_VALUE_MAX_LENGTH, 3),
            se(LN_VALUE_PARTITION_CAPACITY, 4),
            se(LN_DRM, 5),
            ee(),
        ]),
        rule(vec![
            se(LN_VALUE_MAX_LENGTH, 3),
            se(LN_VALUE_PARTITION_CAPACITY, 4),
            se(LN_DRM, 5),
            ee(),
        ]),
        rule(vec![
            se(LN_VALUE_PARTITION_CAPACITY, 4),
            se(LN_DRM, 5),
            ee(),
        ]),
        rule(vec![se(LN_DRM, 5), ee()]),
        rule(vec![se(LN_DRM, 5), ee()]),
    ]));

    let base64 = push(simple(ExiType::Binary));
    let hex = push(simple(ExiType::Binary));
    let uint = push(simple(ExiType::NonNegativeInteger));
    let uint2 = push(simple(ExiType::NonNegativeInteger));
    let uint3 = push(simple(ExiType::NonNegativeInteger));
    let boolean = push(simple(ExiType::Boolean));
    let date_time = push(simple(ExiType::DateTime));
    let date = push(simple(ExiType::DateTime));
    let decimal = push(simple(ExiType::Decimal));
    let double = push(simple(ExiType::Float));
    let g_day = push(simple(ExiType::DateTime));
    let g_month_day = push(simple(ExiType::DateTime));
    let g_month = push(simple(ExiType::DateTime));
    let g_year_month = push(simple(ExiType::DateTime));
    let g_year = push(simple(ExiType::DateTime));
    let ieee32 = push(simple(ExiType::Float));
    let ieee64 = push(simple(ExiType::Float));
    let integer = push(simple(ExiType::Integer));
    let string = push(simple(ExiType::String));
    let time = push(simple(ExiType::DateTime));

    let bindings: [(usize, usize); 39] = [
        (LN_ALIGNMENT, alignment),
        (LN_BASE64BINARY, base64),
        (LN_BLOCK_SIZE, uint),
        (LN_BOOLEAN, boolean),
        (LN_BYTE, empty),
        (LN_COMMENTS, empty),
        (LN_COMMON, common),
        (LN_COMPRESSION, empty),
        (LN_DRM, drm),
        (LN_DATETIME, date_time),
        (LN_DATE, date),
        (LN_DECIMAL, decimal),
        (LN_DOUBLE, double),
        (LN_DTD, empty),
        (LN_FRAGMENT, empty),
        (LN_GDAY, g_day),
        (LN_GMONTHDAY, g_month_day),
        (LN_GMONTH, g_month),
        (LN_GYEARMONTH, g_year_month),
        (LN_GYEAR, g_year),
        (LN_HEADER, header),
        (LN_HEXBINARY, hex),
        (LN_IEEE32, ieee32),
        (LN_IEEE64, ieee64),
        (LN_INTEGER, integer),
        (LN_LESSCOMMON, lesscommon),
        (LN_LEXICAL_VALUES, empty),
        (LN_PIS, empty),
        (LN_PRE_COMPRESS, empty),
        (LN_PREFIXES, empty),
        (LN_PRESERVE, preserve),
        (LN_SCHEMA_ID, schema_id),
        (LN_SELF_CONTAINED, empty),
        (LN_STRICT, empty),
        (LN_STRING, string),
        (LN_TIME, time),
        (LN_UNCOMMON, uncommon),
        (LN_VALUE_MAX_LENGTH, uint2),
        (LN_VALUE_PARTITION_CAPACITY, uint3),
    ];

    let exi_row = uris.row_mut(URI_EXI_ID).expect("seeded table");
    for (ln, gid) in bindings {
        let row = exi_row.locals.row_mut(ln).expect("seeded row");
        row.type_grammar = Some(gid);
        row.type_empty_grammar = Some(empty);
    }

    ExiSchema {
        uris,
        pool,
        global_elements: vec![QNameId::new(URI_EXI_ID, LN_HEADER)],
        simple_types: builtin_simple_types(),
        is_static: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_binds_every_option_name() {
        let schema = options_schema();
        let exi = schema.uris.row(URI_EXI_ID).unwrap();
        assert_eq!(exi.locals.len(), 39);
        for row in exi.locals.iter() {
            assert!(
                row.type_grammar.is_some(),
                "unbound option element {}",
                row.name()
            );
        }
        assert_eq!(
            schema.global_elements,
            vec![QNameId::new(URI_EXI_ID, LN_HEADER)]
        );
    }

    #[test]
    fn header_grammar_codes() {
        let schema = options_schema();
        let exi = schema.uris.row(URI_EXI_ID).unwrap();
        let gid = exi.locals.row(LN_HEADER).unwrap().type_grammar.unwrap();
        let header = &schema.pool[gid];
        assert_eq!(header.rules.len(), 4);
        let rule0 = &header.rules[0];
        assert_eq!(rule0.bits[0], 2);
        assert_eq!(
            rule0.production(0, 0).unwrap().qname,
            Some(QNameId::new(URI_EXI_ID, LN_LESSCOMMON))
        );
        assert_eq!(
            rule0.production(0, 3).unwrap().event.event_type,
            EventType::Ee
        );
    }

    #[test]
    fn schema_id_is_nillable_in_place() {
        let schema = options_schema();
        let exi = schema.uris.row(URI_EXI_ID).unwrap();
        let row = exi.locals.row(LN_SCHEMA_ID).unwrap();
        let g = &schema.pool[row.type_grammar.unwrap()];
        let nil = g.rules[0].production(1, 0).unwrap();
        assert_eq!(nil.qname, Some(QNameId::new(URI_XSI_ID, XSI_NIL_LN)));
        assert_eq!(nil.event.value.exi_type, ExiType::Boolean);
        assert!(row.type_empty_grammar.is_some());
    }
}
