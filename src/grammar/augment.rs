use crate::grammar::{
    Event, EventType, ExiType, Grammar, GrammarRule, Production, ValueType,
    GR_FRAGMENT, VOID_NON_TERMINAL,
};
use crate::options::Options;
use crate::schema::{
    SimpleType, FACET_NAMED_SUBTYPE, FACET_SIMPLE_UNION,
};
use crate::string_tables::{URI_XSI_ID, XSI_NIL_LN, XSI_TYPE_LN};
use crate::QNameId;

fn xsi_type_production() -> Production {
    Production::with_qname(
        Event::typed(EventType::AtQname, ValueType::of(ExiType::QName)),
        QNameId::new(URI_XSI_ID, XSI_TYPE_LN),
        0,
    )
}

fn xsi_nil_production() -> Production {
    Production::with_qname(
        Event::typed(EventType::AtQname, ValueType::of(ExiType::Boolean)),
        QNameId::new(URI_XSI_ID, XSI_NIL_LN),
        0,
    )
}

fn has_ee_exit(rule: &GrammarRule) -> bool {
    rule.parts[0].iter().any(|p| {
        p.event.event_type == EventType::Ee
            && p.non_term == VOID_NON_TERMINAL
    })
}

/// Add the undeclared productions that let a schema-informed grammar accept
/// non-strict streams, or the small strict-mode set. Idempotent: a grammar
/// already augmented is left alone.
pub fn add_undeclared_productions(
    grammar: &mut Grammar,
    opts: &Options,
    simple_types: &[SimpleType],
) {
    if grammar.is_augmented {
        return;
    }
    if opts.strict {
        augment_strict(grammar, simple_types);
    } else {
        augment_lax(grammar, opts);
    }
    grammar.is_augmented = true;
}

/// Augment every not-yet-augmented grammar of a pool. Built-in grammars
/// carry the flag from construction and pass through untouched.
pub fn augment_pool(
    pool: &mut [Grammar],
    opts: &Options,
    simple_types: &[SimpleType],
) {
    for grammar in pool {
        add_undeclared_productions(grammar, opts, simple_types);
    }
}

fn augment_lax(grammar: &mut Grammar, opts: &Options) {
    // The content rule gets a twin that undeclared SE/CH jump to, so that
    // skipping unknown leading content cannot re-enter attribute rules.
    let content2 = grammar.rules[grammar.content_index].clone();
    grammar.rules.push(content2);
    let content2_id = grammar.rules.len() - 1;

    for i in 0..=grammar.content_index {
        let rule_is_first = i == 0;
        let declared_atts: Vec<Production> = grammar.rules[i].parts[0]
            .iter()
            .filter(|p| p.event.event_type == EventType::AtQname)
            .cloned()
            .collect();
        let ee_found = has_ee_exit(&grammar.rules[i]);

        let mut part1 = Vec::new();
        if !ee_found {
            part1.push(Production::new(
                Event::of(EventType::Ee),
                VOID_NON_TERMINAL,
            ));
        }
        if rule_is_first {
            part1.push(xsi_type_production());
            part1.push(xsi_nil_production());
        }
        part1.push(Production::new(Event::of(EventType::AtAll), i));
        if rule_is_first {
            if opts.preserve.prefixes {
                part1.push(Production::new(Event::of(EventType::Ns), 0));
            }
            if opts.self_contained {
                part1.push(Production::new(
                    Event::of(EventType::Sc),
                    GR_FRAGMENT,
                ));
            }
        }
        part1.push(Production::new(
            Event::of(EventType::SeAll),
            content2_id,
        ));
        part1.push(Production::new(
            Event::typed(EventType::Ch, ValueType::of(ExiType::Untyped)),
            content2_id,
        ));
        if opts.preserve.dtd {
            part1.push(Production::new(
                Event::of(EventType::Er),
                content2_id,
            ));
        }
        part1.reverse();

        // Length-3 codes: the untyped twin of every declared attribute,
        // the untyped wildcard, then comments and PIs.
        let mut part2: Vec<Production> = declared_atts
            .iter()
            .map(|at| Production {
                event: Event::typed(
                    EventType::AtQname,
                    ValueType::of(ExiType::Untyped),
                ),
                qname: at.qname,
                non_term: at.non_term,
            })
            .collect();
        part2.push(Production::new(
            Event::typed(EventType::AtAll, ValueType::of(ExiType::Untyped)),
            i,
        ));
        if opts.preserve.comments {
            part2.push(Production::new(
                Event::of(EventType::Cm),
                content2_id,
            ));
        }
        if opts.preserve.pis {
            part2.push(Production::new(
                Event::of(EventType::Pi),
                content2_id,
            ));
        }
        part2.reverse();

        let rule = &mut grammar.rules[i];
        rule.parts[1] = part1;
        rule.parts[2] = part2;
        rule.recompute_bits();
    }

    for i in grammar.content_index + 1..grammar.rules.len() {
        let ee_found = has_ee_exit(&grammar.rules[i]);

        let mut part1 = Vec::new();
        if !ee_found {
            part1.push(Production::new(
                Event::of(EventType::Ee),
                VOID_NON_TERMINAL,
            ));
        }
        part1.push(Production::new(Event::of(EventType::SeAll), i));
        part1.push(Production::new(
            Event::typed(EventType::Ch, ValueType::of(ExiType::Untyped)),
            i,
        ));
        if opts.preserve.dtd {
            part1.push(Production::new(Event::of(EventType::Er), i));
        }
        part1.reverse();

        let mut part2 = Vec::new();
        if opts.preserve.comments {
            part2.push(Production::new(Event::of(EventType::Cm), i));
        }
        if opts.preserve.pis {
            part2.push(Production::new(Event::of(EventType::Pi), i));
        }
        part2.reverse();

        let rule = &mut grammar.rules[i];
        rule.parts[1] = part1;
        rule.parts[2] = part2;
        rule.recompute_bits();
    }
}

fn augment_strict(grammar: &mut Grammar, simple_types: &[SimpleType]) {
    let subtype = grammar.has_named_subtype_or_union
        || grammar.rules.iter().any(|rule| {
            rule.parts[0].iter().any(|p| {
                p.event.event_type == EventType::Ch
                    && p.event
                        .value
                        .simple_type
                        .and_then(|id| simple_types.get(usize::from(id)))
                        .is_some_and(|st| {
                            st.facets
                                & (FACET_NAMED_SUBTYPE | FACET_SIMPLE_UNION)
                                != 0
                        })
            })
        });

    let mut part1 = Vec::new();
    if subtype {
        part1.push(xsi_type_production());
    }
    if grammar.is_nillable {
        part1.push(xsi_nil_production());
    }
    if part1.is_empty() {
        return;
    }
    let rule = &mut grammar.rules[0];
    rule.parts[1] = part1;
    rule.recompute_bits();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::proto::ProtoGrammar;
    use crate::grammar::GrammarType;
    use crate::options::Preserve;
    use crate::schema::builtin_simple_types;
    use crate::string_tables::UriTable;

    fn simple_string_grammar() -> Grammar {
        let proto =
            ProtoGrammar::simple_type(ValueType::of(ExiType::String));
        proto.assign_codes(&UriTable::initial(), GrammarType::SchemaType)
    }

    #[test]
    fn lax_augment_adds_wildcards_everywhere() {
        let mut g = simple_string_grammar();
        let opts = Options::default();
        add_undeclared_productions(&mut g, &opts, &builtin_simple_types());
        assert!(g.is_augmented);
        // content2 twin appended.
        assert_eq!(g.rules.len(), 3);

        for i in 0..=g.content_index {
            let rule = &g.rules[i];
            assert!(rule.parts[1]
                .iter()
                .any(|p| p.event.event_type == EventType::AtAll));
            assert!(rule.parts[2].iter().any(|p| {
                p.event.event_type == EventType::AtAll
                    && p.event.value.exi_type == ExiType::Untyped
            }));
        }
        // Rule 0 offers the xsi attributes in code order type, nil after EE.
        let rule0 = &g.rules[0];
        let code_events: Vec<_> = rule0
            .code_order(1)
            .map(|p| (p.event.event_type, p.qname))
            .collect();
        assert_eq!(code_events[0].0, EventType::Ee);
        assert_eq!(
            code_events[1].1,
            Some(QNameId::new(URI_XSI_ID, XSI_TYPE_LN))
        );
        assert_eq!(
            code_events[2].1,
            Some(QNameId::new(URI_XSI_ID, XSI_NIL_LN))
        );

        // Rules past the content index self-loop on SE(*) and CH.
        let tail = &g.rules[g.content_index + 1];
        assert!(tail.parts[1].iter().any(|p| {
            p.event.event_type == EventType::SeAll
                && p.non_term == g.content_index + 1
        }));
    }

    #[test]
    fn lax_augment_is_idempotent() {
        let mut g = simple_string_grammar();
        let opts = Options::default();
        add_undeclared_productions(&mut g, &opts, &builtin_simple_types());
        let snapshot = g.rules.len();
        add_undeclared_productions(&mut g, &opts, &builtin_simple_types());
        assert_eq!(g.rules.len(), snapshot);
    }

    #[test]
    fn lax_augment_twins_declared_attributes() {
        let attr = ProtoGrammar::attribute_use(
            true,
            QNameId::new(0, 0),
            ValueType::of(ExiType::String),
        );
        let content =
            ProtoGrammar::simple_type(ValueType::of(ExiType::String));
        let proto =
            ProtoGrammar::complex_type(&[attr], content).unwrap();
        let mut g = proto
            .assign_codes(&UriTable::initial(), GrammarType::SchemaType);
        add_undeclared_productions(
            &mut g,
            &Options::default(),
            &builtin_simple_types(),
        );
        // The declared AT(qname) got an untyped length-3 twin on rule 0.
        let twin = g.rules[0].parts[2].iter().find(|p| {
            p.event.event_type == EventType::AtQname
                && p.event.value.exi_type == ExiType::Untyped
        });
        assert_eq!(twin.unwrap().qname, Some(QNameId::new(0, 0)));
    }

    #[test]
    fn lax_preserve_options_extend_parts() {
        let mut g = simple_string_grammar();
        let opts = Options {
            preserve: Preserve {
                comments: true,
                pis: true,
                dtd: true,
                ..Preserve::default()
            },
            ..Options::default()
        };
        add_undeclared_productions(&mut g, &opts, &builtin_simple_types());
        let rule0 = &g.rules[0];
        assert!(rule0.parts[1]
            .iter()
            .any(|p| p.event.event_type == EventType::Er));
        assert!(rule0.parts[2]
            .iter()
            .any(|p| p.event.event_type == EventType::Cm));
        assert!(rule0.parts[2]
            .iter()
            .any(|p| p.event.event_type == EventType::Pi));
    }

    #[test]
    fn strict_augment_only_for_nillable_or_subtyped() {
        let opts = Options {
            strict: true,
            ..Options::default()
        };

        let mut plain = simple_string_grammar();
        add_undeclared_productions(
            &mut plain,
            &opts,
            &builtin_simple_types(),
        );
        assert!(plain.rules[0].parts[1].is_empty());

        let mut nillable = simple_string_grammar();
        nillable.is_nillable = true;
        add_undeclared_productions(
            &mut nillable,
            &opts,
            &builtin_simple_types(),
        );
        let rule0 = &nillable.rules[0];
        assert_eq!(rule0.parts[1].len(), 1);
        assert_eq!(
            rule0.production(1, 0).unwrap().qname,
            Some(QNameId::new(URI_XSI_ID, XSI_NIL_LN))
        );
        assert_eq!(
            rule0.production(1, 0).unwrap().event.value.exi_type,
            ExiType::Boolean
        );
        // Escape to part 1 now costs one value in part 0.
        assert_eq!(rule0.bits[0], 1);
    }
}
