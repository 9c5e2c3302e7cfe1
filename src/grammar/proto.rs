use anyhow::{ensure, Result};

use std::cmp::Ordering;

use crate::grammar::{
    Event, EventType, Grammar, GrammarRule, GrammarType, Production,
    ValueType, VOID_NON_TERMINAL,
};
use crate::string_tables::UriTable;
use crate::{ExiError, QNameId};

/// Bound on distinct non-terminal collision pairs per concatenation walk.
const MAX_COLLISIONS: usize = 50;

/// A grammar under construction: rule-indexed production lists with
/// non-terminal ids local to the grammar. All productions are length-1
/// here; the longer parts appear later, during augmentation.
#[derive(Debug, Clone, Default)]
pub struct ProtoGrammar {
    pub rules: Vec<Vec<Production>>,
    pub content_index: usize,
}

#[derive(Debug, Clone, Copy)]
struct Collision {
    left: usize,
    right: usize,
    created: usize,
}

fn ee_production() -> Production {
    Production::new(Event::of(EventType::Ee), VOID_NON_TERMINAL)
}

fn is_ee(p: &Production) -> bool {
    p.event.event_type == EventType::Ee
}

fn shift_target(p: &Production, shift: usize) -> usize {
    if is_ee(p) {
        p.non_term
    } else {
        p.non_term + shift
    }
}

impl ProtoGrammar {
    /// A single-rule grammar accepting only EE; the identity for
    /// concatenation.
    pub fn accepting() -> Self {
        ProtoGrammar {
            rules: vec![vec![ee_production()]],
            content_index: 0,
        }
    }

    /// Grammar of a simple-type content model: `CH[type] → EE`.
    pub fn simple_type(value: ValueType) -> Self {
        ProtoGrammar {
            rules: vec![
                vec![Production::new(
                    Event::typed(EventType::Ch, value),
                    1,
                )],
                vec![ee_production()],
            ],
            content_index: 0,
        }
    }

    /// Grammar of one element particle term: `SE(qname) → EE`.
    pub fn element_term(qname: QNameId) -> Self {
        ProtoGrammar {
            rules: vec![
                vec![Production::with_qname(
                    Event::of(EventType::SeQname),
                    qname,
                    1,
                )],
                vec![ee_production()],
            ],
            content_index: 0,
        }
    }

    /// Grammar of an `##any`-style wildcard term: `SE(*) → EE`.
    pub fn wildcard_term() -> Self {
        ProtoGrammar {
            rules: vec![
                vec![Production::new(Event::of(EventType::SeAll), 1)],
                vec![ee_production()],
            ],
            content_index: 0,
        }
    }

    /// Grammar of one attribute use: `AT(qname)[type] → EE`, optional uses
    /// may skip straight to EE.
    pub fn attribute_use(
        required: bool,
        qname: QNameId,
        value: ValueType,
    ) -> Self {
        let mut rule0 = vec![Production::with_qname(
            Event::typed(EventType::AtQname, value),
            qname,
            1,
        )];
        if !required {
            rule0.push(ee_production());
        }
        ProtoGrammar {
            rules: vec![rule0, vec![ee_production()]],
            content_index: 0,
        }
    }

    /// Append `right` after this grammar: every EE exit of the existing
    /// rules is rewired to `right`'s first rule, with collisions between
    /// same-terminal productions resolved into fresh merged rules.
    pub fn concat(&mut self, right: &ProtoGrammar) -> Result<()> {
        let initial = self.rules.len();
        for rule in right.rules.iter().skip(1) {
            self.rules.push(
                rule.iter()
                    .map(|p| Production {
                        non_term: shift_target(p, initial - 1),
                        ..*p
                    })
                    .collect(),
            );
        }

        let mut collisions = Vec::new();
        let mut next_rule = self.rules.len();
        for rule_idx in 0..initial {
            let Some(pos) = self.rules[rule_idx].iter().position(is_ee)
            else {
                continue;
            };
            self.rules[rule_idx].remove(pos);
            add_productions_to_rule(
                self,
                rule_idx,
                &right.rules[0],
                &mut collisions,
                &mut next_rule,
                initial - 1,
            )?;
        }

        resolve_collisions(self, &mut collisions, &mut next_rule)
    }

    /// Apply `{min, max}` occurrence bounds to a term grammar. Unbounded
    /// tails loop every EE exit of the term back to its own first rule.
    pub fn particle(
        min: u32,
        max: Option<u32>,
        mut term: ProtoGrammar,
    ) -> Result<ProtoGrammar> {
        let mut result = ProtoGrammar::accepting();
        for _ in 0..min {
            result.concat(&term)?;
        }

        let optional_tail = max.map_or(true, |m| m > min);
        if optional_tail {
            if !term.rules[0].iter().any(is_ee) {
                term.rules[0].push(ee_production());
            }
            match max {
                Some(max) => {
                    for _ in 0..max - min {
                        result.concat(&term)?;
                    }
                }
                None => {
                    let mut collisions = Vec::new();
                    let mut next_rule = term.rules.len();
                    for rule_idx in 1..term.rules.len() {
                        let Some(pos) =
                            term.rules[rule_idx].iter().position(is_ee)
                        else {
                            continue;
                        };
                        term.rules[rule_idx].remove(pos);
                        let rule0 = term.rules[0].clone();
                        add_productions_to_rule(
                            &mut term,
                            rule_idx,
                            &rule0,
                            &mut collisions,
                            &mut next_rule,
                            0,
                        )?;
                    }
                    resolve_collisions(
                        &mut term,
                        &mut collisions,
                        &mut next_rule,
                    )?;
                    result.concat(&term)?;
                }
            }
        }

        result.content_index = 0;
        Ok(result)
    }

    /// Sequence model group: left-to-right concatenation.
    pub fn sequence(parts: Vec<ProtoGrammar>) -> Result<ProtoGrammar> {
        let mut result = ProtoGrammar::accepting();
        for part in &parts {
            result.concat(part)?;
        }
        result.content_index = 0;
        Ok(result)
    }

    /// Choice model group: rule 0 unites the first productions of every
    /// alternative, with collision resolution.
    pub fn choice(parts: Vec<ProtoGrammar>) -> Result<ProtoGrammar> {
        let mut result = ProtoGrammar::accepting();
        let mut iter = parts.into_iter();
        let Some(first) = iter.next() else {
            return Ok(result);
        };
        result.concat(&first)?;

        for part in iter {
            let initial = result.rules.len();
            for rule in part.rules.iter().skip(1) {
                result.rules.push(
                    rule.iter()
                        .map(|p| Production {
                            non_term: shift_target(p, initial - 1),
                            ..*p
                        })
                        .collect(),
                );
            }
            let mut collisions = Vec::new();
            let mut next_rule = result.rules.len();
            add_productions_to_rule(
                &mut result,
                0,
                &part.rules[0],
                &mut collisions,
                &mut next_rule,
                initial - 1,
            )?;
            resolve_collisions(&mut result, &mut collisions, &mut next_rule)?;
        }
        result.content_index = 0;
        Ok(result)
    }

    /// Complex-type grammar: fold the attribute uses, remember where
    /// content starts, then append the content model.
    pub fn complex_type(
        attr_uses: &[ProtoGrammar],
        content: ProtoGrammar,
    ) -> Result<ProtoGrammar> {
        if attr_uses.is_empty() {
            let mut result = content;
            result.content_index = 0;
            return Ok(result);
        }
        let mut result = ProtoGrammar::accepting();
        for attr in attr_uses {
            result.concat(attr)?;
        }
        result.content_index = result.rules.len() - 1;
        result.concat(&content)?;
        Ok(result)
    }

    /// The empty-content variant of a complex type: attribute uses only.
    pub fn complex_empty_type(
        attr_uses: &[ProtoGrammar],
    ) -> Result<ProtoGrammar> {
        let mut result = ProtoGrammar::accepting();
        for attr in attr_uses {
            result.concat(attr)?;
        }
        result.content_index = result.rules.len() - 1;
        Ok(result)
    }

    /// Sort every rule into canonical event-code order and materialise the
    /// runtime grammar. All productions land in part 0; parts 1 and 2 stay
    /// empty until augmentation.
    pub fn assign_codes(
        mut self,
        tables: &UriTable,
        grammar_type: GrammarType,
    ) -> Grammar {
        for rule in &mut self.rules {
            rule.sort_by(|a, b| compare_productions(a, b, tables));
        }
        let mut grammar = Grammar::new(grammar_type);
        grammar.content_index = self.content_index;
        for prods in self.rules {
            let mut rule = GrammarRule {
                parts: [prods, Vec::new(), Vec::new()],
                bits: [0; 3],
            };
            rule.recompute_bits();
            grammar.rules.push(rule);
        }
        grammar
    }
}

/// Collision-aware merge of `right_rule`'s productions into
/// `left.rules[rule_idx]`.
fn add_productions_to_rule(
    left: &mut ProtoGrammar,
    rule_idx: usize,
    right_rule: &[Production],
    collisions: &mut Vec<Collision>,
    next_rule: &mut usize,
    shift: usize,
) -> Result<()> {
    for rp in right_rule {
        let target = shift_target(rp, shift);
        let hit = left.rules[rule_idx]
            .iter()
            .position(|lp| lp.event == rp.event && lp.qname == rp.qname);
        let Some(hit) = hit else {
            left.rules[rule_idx].push(Production {
                non_term: target,
                ..*rp
            });
            continue;
        };

        let left_target = left.rules[rule_idx][hit].non_term;
        if is_ee(rp) || left_target == target {
            // Identical production; nothing to add.
            continue;
        }
        if let Some(known) = collisions
            .iter()
            .find(|c| c.left == left_target && c.right == target)
        {
            left.rules[rule_idx][hit].non_term = known.created;
            continue;
        }
        ensure!(
            collisions.len() < MAX_COLLISIONS,
            ExiError::InvalidConfiguration
        );
        let created = *next_rule;
        collisions.push(Collision {
            left: left_target,
            right: target,
            created,
        });
        left.rules[rule_idx][hit].non_term = created;
        *next_rule += 1;
    }
    Ok(())
}

/// Materialise one merged rule per recorded collision pair: the union of
/// both successors' productions, which may itself collide further.
fn resolve_collisions(
    left: &mut ProtoGrammar,
    collisions: &mut Vec<Collision>,
    next_rule: &mut usize,
) -> Result<()> {
    let mut idx = 0;
    while idx < collisions.len() {
        let collision = collisions[idx];
        left.rules.push(left.rules[collision.left].clone());
        debug_assert_eq!(left.rules.len() - 1, collision.created);
        let right_rule = left.rules[collision.right].clone();
        add_productions_to_rule(
            left,
            collision.created,
            &right_rule,
            collisions,
            next_rule,
            0,
        )?;
        idx += 1;
    }
    Ok(())
}

/// Canonical production order within a rule. Physical order is descending,
/// so the production sorting first here takes the highest event code and
/// the one sorting last takes code 0.
fn compare_productions(
    a: &Production,
    b: &Production,
    tables: &UriTable,
) -> Ordering {
    let by_type =
        (b.event.event_type as u8).cmp(&(a.event.event_type as u8));
    if by_type != Ordering::Equal {
        return by_type;
    }
    match a.event.event_type {
        EventType::AtQname => {
            let (a_uri, a_ln) = qname_strings(a, tables);
            let (b_uri, b_ln) = qname_strings(b, tables);
            b_ln.cmp(a_ln).then_with(|| b_uri.cmp(a_uri))
        }
        EventType::AtUri | EventType::SeUri => {
            let (a_uri, _) = qname_strings(a, tables);
            let (b_uri, _) = qname_strings(b, tables);
            b_uri.cmp(a_uri)
        }
        // Declaration order: local names are appended to the target
        // namespace in schema order, so the row id is the declaration rank.
        EventType::SeQname => {
            let a_ln = a.qname.map_or(usize::MAX, |q| q.ln);
            let b_ln = b.qname.map_or(usize::MAX, |q| q.ln);
            b_ln.cmp(&a_ln)
        }
        _ => Ordering::Equal,
    }
}

fn qname_strings<'t>(
    p: &Production,
    tables: &'t UriTable,
) -> (&'t str, &'t str) {
    p.qname
        .and_then(|q| tables.name_of(q))
        .unwrap_or(("", ""))
}
