use serde::Serialize;

use crate::options::Options;
use crate::{bits_for, QNameId};

pub mod augment;
pub mod proto;

/// Index of a grammar within its pool. Grammars reference each other by id,
/// never by pointer, so the pool graph may contain cycles.
pub type GrammarId = usize;

/// Right-hand side marker for "no non-terminal": the grammar is left after
/// this production.
pub const VOID_NON_TERMINAL: usize = usize::MAX;

// Built-in grammar non-terminal ids.
pub const GR_DOCUMENT: usize = 0;
pub const GR_DOC_CONTENT: usize = 1;
pub const GR_DOC_END: usize = 2;

pub const GR_START_TAG_CONTENT: usize = 0;
pub const GR_ELEMENT_CONTENT: usize = 1;

pub const GR_FRAGMENT: usize = 0;
pub const GR_FRAGMENT_CONTENT: usize = 1;

/// Terminal symbol kinds. The numeric order is normative: the production
/// sorting behind `assign_codes` keys on it.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
)]
pub enum EventType {
    Sd = 0,
    Ed = 1,
    AtQname = 2,
    AtUri = 3,
    AtAll = 4,
    SeQname = 5,
    SeUri = 6,
    SeAll = 7,
    Ee = 8,
    Ch = 9,
    Ns = 10,
    Cm = 11,
    Pi = 12,
    Dt = 13,
    Er = 14,
    Sc = 15,
    /// No terminal; proto-grammars only.
    Void = 16,
}

/// Classification of the typed content carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExiType {
    None,
    String,
    Float,
    Decimal,
    DateTime,
    Boolean,
    Binary,
    List,
    QName,
    Untyped,
    Integer,
    SmallInteger,
    NonNegativeInteger,
}

/// Value classification plus, where the codec needs facets (small
/// integers), the simple-type id to recover them from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ValueType {
    pub exi_type: ExiType,
    pub simple_type: Option<u16>,
}

impl ValueType {
    pub const NONE: ValueType = ValueType {
        exi_type: ExiType::None,
        simple_type: None,
    };

    pub fn of(exi_type: ExiType) -> Self {
        ValueType {
            exi_type,
            simple_type: None,
        }
    }

    pub fn typed(exi_type: ExiType, simple_type: u16) -> Self {
        ValueType {
            exi_type,
            simple_type: Some(simple_type),
        }
    }
}

/// A terminal with its value classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Event {
    pub event_type: EventType,
    pub value: ValueType,
}

impl Event {
    pub fn of(event_type: EventType) -> Self {
        Event {
            event_type,
            value: ValueType::NONE,
        }
    }

    pub fn typed(event_type: EventType, value: ValueType) -> Self {
        Event { event_type, value }
    }
}

/// One grammar production: terminal, optional qname restriction, and the
/// right-hand side non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Production {
    pub event: Event,
    /// For SE(qname), SE(uri:*), AT(qname), AT(uri:*); the ln id is
    /// meaningless for the uri:* forms.
    pub qname: Option<QNameId>,
    pub non_term: usize,
}

impl Production {
    pub fn new(event: Event, non_term: usize) -> Self {
        Production {
            event,
            qname: None,
            non_term,
        }
    }

    pub fn with_qname(event: Event, qname: QNameId, non_term: usize) -> Self {
        Production {
            event,
            qname: Some(qname),
            non_term,
        }
    }
}

/// Event an encoder asks the grammar to produce. QNames arrive already
/// resolved against the string tables when the name is known there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeEvent {
    Sd,
    Ed,
    Ee,
    Se(Option<QNameId>),
    At(Option<QNameId>),
    Ch,
    Ns,
    Sc,
    Cm,
    Pi,
    Dt,
    Er,
}

/// One grammar rule: three production arrays, one per event-code length.
///
/// Within each part productions are stored in reverse: the physical index
/// from the end of the array equals the last integer of the event code, so
/// a production appended at the end takes event code 0 and shifts the rest
/// up by one.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GrammarRule {
    pub parts: [Vec<Production>; 3],
    pub bits: [u8; 3],
}

impl GrammarRule {
    /// Production carrying event-code integer `code` within `part`.
    pub fn production(&self, part: usize, code: usize) -> Option<&Production> {
        let arr = self.parts.get(part)?;
        arr.get(arr.len().checked_sub(1 + code)?)
    }

    /// Productions of a part in event-code order.
    pub fn code_order(
        &self,
        part: usize,
    ) -> impl Iterator<Item = &Production> {
        self.parts[part].iter().rev()
    }

    /// Recompute the three widths from the part populations: a part that
    /// can escape to a longer code spends one extra value on the escape.
    pub fn recompute_bits(&mut self) {
        for k in 0..3 {
            let escape = self.parts[k + 1..].iter().any(|p| !p.is_empty());
            self.bits[k] =
                bits_for(self.parts[k].len() + usize::from(escape));
        }
    }

    /// Learn a length-1 production with event code 0; every existing part-0
    /// production moves up by one and the width follows.
    pub fn insert_zero_production(
        &mut self,
        event: Event,
        non_term: usize,
        qname: Option<QNameId>,
    ) {
        self.parts[0].push(Production {
            event,
            qname,
            non_term,
        });
        self.bits[0] = bits_for(self.parts[0].len() + 1);
    }

    fn scan(
        &self,
        mut pred: impl FnMut(&Production) -> bool,
    ) -> Option<(usize, usize)> {
        for part in 0..3 {
            for (code, prod) in self.code_order(part).enumerate() {
                if pred(prod) {
                    return Some((part, code));
                }
            }
        }
        None
    }

    /// Find the production to encode `ev` with: exact qname match first,
    /// then the uri:* form, then the wildcard or plain event kind.
    pub fn find_production(
        &self,
        ev: EncodeEvent,
    ) -> Option<(usize, usize)> {
        use EventType::*;
        let by_kind = |kind: EventType| {
            move |p: &Production| p.event.event_type == kind
        };
        match ev {
            EncodeEvent::Se(Some(qn)) => self
                .scan(|p| {
                    p.event.event_type == SeQname && p.qname == Some(qn)
                })
                .or_else(|| {
                    self.scan(|p| {
                        p.event.event_type == SeUri
                            && p.qname.map(|q| q.uri) == Some(qn.uri)
                    })
                })
                .or_else(|| self.scan(by_kind(SeAll))),
            EncodeEvent::Se(None) => self.scan(by_kind(SeAll)),
            EncodeEvent::At(Some(qn)) => self
                .scan(|p| {
                    p.event.event_type == AtQname && p.qname == Some(qn)
                })
                .or_else(|| {
                    self.scan(|p| {
                        p.event.event_type == AtUri
                            && p.qname.map(|q| q.uri) == Some(qn.uri)
                    })
                })
                .or_else(|| self.scan(by_kind(AtAll))),
            EncodeEvent::At(None) => self.scan(by_kind(AtAll)),
            EncodeEvent::Sd => self.scan(by_kind(Sd)),
            EncodeEvent::Ed => self.scan(by_kind(Ed)),
            EncodeEvent::Ee => self.scan(by_kind(Ee)),
            EncodeEvent::Ch => self.scan(by_kind(Ch)),
            EncodeEvent::Ns => self.scan(by_kind(Ns)),
            EncodeEvent::Sc => self.scan(by_kind(Sc)),
            EncodeEvent::Cm => self.scan(by_kind(Cm)),
            EncodeEvent::Pi => self.scan(by_kind(Pi)),
            EncodeEvent::Dt => self.scan(by_kind(Dt)),
            EncodeEvent::Er => self.scan(by_kind(Er)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GrammarType {
    BuiltinDoc,
    BuiltinFrag,
    BuiltinElem,
    SchemaDoc,
    SchemaFrag,
    SchemaElemFrag,
    SchemaElem,
    SchemaType,
    SchemaEmptyType,
}

impl GrammarType {
    pub fn is_schema(self) -> bool {
        matches!(
            self,
            GrammarType::SchemaDoc
                | GrammarType::SchemaFrag
                | GrammarType::SchemaElemFrag
                | GrammarType::SchemaElem
                | GrammarType::SchemaType
                | GrammarType::SchemaEmptyType
        )
    }

    pub fn is_builtin_elem(self) -> bool {
        self == GrammarType::BuiltinElem
    }
}

/// A finite-state grammar: rule 0 is the initial rule; the rule index is
/// the left-hand-side non-terminal id.
#[derive(Debug, Clone, Serialize)]
pub struct Grammar {
    pub rules: Vec<GrammarRule>,
    pub grammar_type: GrammarType,
    pub is_nillable: bool,
    pub is_augmented: bool,
    pub has_named_subtype_or_union: bool,
    /// Rule at which attribute declarations end and child content begins.
    pub content_index: usize,
}

impl Grammar {
    pub fn new(grammar_type: GrammarType) -> Self {
        Grammar {
            rules: Vec::new(),
            grammar_type,
            is_nillable: false,
            is_augmented: false,
            has_named_subtype_or_union: false,
            content_index: 0,
        }
    }

    pub fn rule(&self, non_term: usize) -> Option<&GrammarRule> {
        self.rules.get(non_term)
    }

    pub fn rule_mut(&mut self, non_term: usize) -> Option<&mut GrammarRule> {
        self.rules.get_mut(non_term)
    }
}

/// One level of the grammar stack: the active grammar and the caller's
/// resume state.
#[derive(Debug, Clone, Copy)]
pub struct GrammarFrame {
    pub grammar: GrammarId,
    pub last_non_term: usize,
}

impl GrammarFrame {
    pub fn new(grammar: GrammarId) -> Self {
        GrammarFrame {
            grammar,
            last_non_term: VOID_NON_TERMINAL,
        }
    }
}

fn ee() -> Production {
    Production::new(Event::of(EventType::Ee), VOID_NON_TERMINAL)
}

/// The document grammar. With `globals` this is the schema-informed
/// variant: one SE(qname) production per global element, sorted, ahead of
/// the SE(*) wildcard.
///
/// ```text
/// Document    : SD DocContent                    0
/// DocContent  : SE(G-0) DocEnd 0 .. SE(G-n-1) DocEnd n-1
///               SE(*) DocEnd  n
///               DT DocContent n+1.0
///               CM DocContent n+1.1.0 | PI DocContent n+1.1.1
/// DocEnd      : ED 0 | CM DocEnd 1.0 | PI DocEnd 1.1
/// ```
pub fn document_grammar(
    opts: &Options,
    globals: Option<&[QNameId]>,
) -> Grammar {
    let mut g = Grammar::new(match globals {
        Some(_) => GrammarType::SchemaDoc,
        None => GrammarType::BuiltinDoc,
    });
    g.is_augmented = true;

    let mut document = GrammarRule::default();
    document.parts[0].push(Production::new(
        Event::of(EventType::Sd),
        GR_DOC_CONTENT,
    ));
    document.recompute_bits();
    g.rules.push(document);

    let mut content = GrammarRule::default();
    // Physical order is reverse event-code order.
    content.parts[0].push(Production::new(
        Event::of(EventType::SeAll),
        GR_DOC_END,
    ));
    if let Some(globals) = globals {
        for qn in globals.iter().rev() {
            content.parts[0].push(Production::with_qname(
                Event::of(EventType::SeQname),
                *qn,
                GR_DOC_END,
            ));
        }
    }
    if opts.preserve.dtd {
        content.parts[1].push(Production::new(
            Event::of(EventType::Dt),
            GR_DOC_CONTENT,
        ));
    }
    if opts.preserve.pis {
        content.parts[2].push(Production::new(
            Event::of(EventType::Pi),
            GR_DOC_CONTENT,
        ));
    }
    if opts.preserve.comments {
        content.parts[2].push(Production::new(
            Event::of(EventType::Cm),
            GR_DOC_CONTENT,
        ));
    }
    content.recompute_bits();
    g.rules.push(content);

    let mut doc_end = GrammarRule::default();
    doc_end.parts[0].push(Production::new(
        Event::of(EventType::Ed),
        VOID_NON_TERMINAL,
    ));
    if opts.preserve.pis {
        doc_end.parts[1].push(Production::new(
            Event::of(EventType::Pi),
            GR_DOC_END,
        ));
    }
    if opts.preserve.comments {
        doc_end.parts[1].push(Production::new(
            Event::of(EventType::Cm),
            GR_DOC_END,
        ));
    }
    doc_end.recompute_bits();
    g.rules.push(doc_end);

    g
}

/// The fragment grammar.
///
/// ```text
/// Fragment        : SD FragmentContent 0
/// FragmentContent : SE(F-0) .. SE(F-n-1)   0 .. n-1
///                   SE(*) FragmentContent  n
///                   ED                     n+1
///                   CM FragmentContent n+2.0 | PI FragmentContent n+2.1
/// ```
pub fn fragment_grammar(
    opts: &Options,
    globals: Option<&[QNameId]>,
) -> Grammar {
    let mut g = Grammar::new(match globals {
        Some(_) => GrammarType::SchemaFrag,
        None => GrammarType::BuiltinFrag,
    });
    g.is_augmented = true;

    let mut fragment = GrammarRule::default();
    fragment.parts[0].push(Production::new(
        Event::of(EventType::Sd),
        GR_FRAGMENT_CONTENT,
    ));
    fragment.recompute_bits();
    g.rules.push(fragment);

    let mut content = GrammarRule::default();
    content.parts[0].push(Production::new(
        Event::of(EventType::Ed),
        VOID_NON_TERMINAL,
    ));
    content.parts[0].push(Production::new(
        Event::of(EventType::SeAll),
        GR_FRAGMENT_CONTENT,
    ));
    if let Some(globals) = globals {
        for qn in globals.iter().rev() {
            content.parts[0].push(Production::with_qname(
                Event::of(EventType::SeQname),
                *qn,
                GR_FRAGMENT_CONTENT,
            ));
        }
    }
    if opts.preserve.pis {
        content.parts[1].push(Production::new(
            Event::of(EventType::Pi),
            GR_FRAGMENT_CONTENT,
        ));
    }
    if opts.preserve.comments {
        content.parts[1].push(Production::new(
            Event::of(EventType::Cm),
            GR_FRAGMENT_CONTENT,
        ));
    }
    content.recompute_bits();
    g.rules.push(content);

    g
}

/// A fresh built-in element grammar. Rule 0's part 0 starts empty and
/// learns length-1 productions as the stream uses wildcards.
///
/// ```text
/// StartTagContent : EE 0.0 | AT(*) StartTagContent 0.1
///                   NS StartTagContent | SC Fragment
///                   SE(*) ElementContent | CH ElementContent
///                   ER ElementContent
///                   CM ElementContent 0.m.0 | PI ElementContent 0.m.1
/// ElementContent  : EE 0
///                   SE(*) ElementContent 1.0 | CH ElementContent 1.1
///                   ER ElementContent
///                   CM ElementContent 1.m.0 | PI ElementContent 1.m.1
/// ```
pub fn builtin_element_grammar(opts: &Options) -> Grammar {
    let mut g = Grammar::new(GrammarType::BuiltinElem);
    g.is_augmented = true;

    let mut start_tag = GrammarRule::default();
    let mut codes = vec![
        ee(),
        Production::new(Event::of(EventType::AtAll), GR_START_TAG_CONTENT),
    ];
    if opts.preserve.prefixes {
        codes.push(Production::new(
            Event::of(EventType::Ns),
            GR_START_TAG_CONTENT,
        ));
    }
    if opts.self_contained {
        codes.push(Production::new(Event::of(EventType::Sc), GR_FRAGMENT));
    }
    codes.push(Production::new(
        Event::of(EventType::SeAll),
        GR_ELEMENT_CONTENT,
    ));
    codes.push(Production::new(
        Event::typed(EventType::Ch, ValueType::of(ExiType::Untyped)),
        GR_ELEMENT_CONTENT,
    ));
    if opts.preserve.dtd {
        codes.push(Production::new(
            Event::of(EventType::Er),
            GR_ELEMENT_CONTENT,
        ));
    }
    codes.reverse();
    start_tag.parts[1] = codes;
    start_tag.parts[2] = comment_pi_part(opts, GR_ELEMENT_CONTENT);
    start_tag.recompute_bits();
    g.rules.push(start_tag);

    let mut element_content = GrammarRule::default();
    element_content.parts[0].push(ee());
    let mut codes = vec![
        Production::new(Event::of(EventType::SeAll), GR_ELEMENT_CONTENT),
        Production::new(
            Event::typed(EventType::Ch, ValueType::of(ExiType::Untyped)),
            GR_ELEMENT_CONTENT,
        ),
    ];
    if opts.preserve.dtd {
        codes.push(Production::new(
            Event::of(EventType::Er),
            GR_ELEMENT_CONTENT,
        ));
    }
    codes.reverse();
    element_content.parts[1] = codes;
    element_content.parts[2] = comment_pi_part(opts, GR_ELEMENT_CONTENT);
    element_content.recompute_bits();
    g.rules.push(element_content);

    g
}

fn comment_pi_part(opts: &Options, non_term: usize) -> Vec<Production> {
    let mut codes = Vec::new();
    if opts.preserve.comments {
        codes.push(Production::new(Event::of(EventType::Cm), non_term));
    }
    if opts.preserve.pis {
        codes.push(Production::new(Event::of(EventType::Pi), non_term));
    }
    codes.reverse();
    codes
}
