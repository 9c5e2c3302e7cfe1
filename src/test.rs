use std::io::Cursor;

use crate::grammar::ExiType;
use crate::header::ExiHeader;
use crate::options::{Alignment, Options, SchemaId};
use crate::parser::{ContentHandler, HandlerAction, Parser};
use crate::schema::build::{
    AttributeDef, ElementDef, ParticleDef, SchemaBuilder, TermDef,
};
use crate::schema::{BuiltinType, ExiSchema};
use crate::serializer::Serializer;
use crate::values::{ExiDateTime, ExiDecimal, ExiFloat};
use crate::{error_kind, ExiError, QName};

#[derive(Debug, Clone, PartialEq)]
enum Ev {
    Sd,
    Ed,
    Se(String, String),
    Ee,
    At(String, String),
    Str(String),
    Int(i64),
    Bool(bool),
    Float(i64, i16),
    Dec(bool, u64, u64),
    Bin(Vec<u8>),
    Dt(i64, u8, u8),
    Ns(String, String, bool),
}

#[derive(Default)]
struct Recorder {
    events: Vec<Ev>,
    stop_on_element: bool,
}

impl ContentHandler for Recorder {
    fn start_document(&mut self) -> HandlerAction {
        self.events.push(Ev::Sd);
        HandlerAction::Continue
    }
    fn end_document(&mut self) -> HandlerAction {
        self.events.push(Ev::Ed);
        HandlerAction::Continue
    }
    fn start_element(&mut self, qname: &QName) -> HandlerAction {
        if self.stop_on_element {
            return HandlerAction::Stop;
        }
        self.events
            .push(Ev::Se(qname.uri.clone(), qname.local_name.clone()));
        HandlerAction::Continue
    }
    fn end_element(&mut self) -> HandlerAction {
        self.events.push(Ev::Ee);
        HandlerAction::Continue
    }
    fn attribute(&mut self, qname: &QName) -> HandlerAction {
        self.events
            .push(Ev::At(qname.uri.clone(), qname.local_name.clone()));
        HandlerAction::Continue
    }
    fn string_data(&mut self, value: &str) -> HandlerAction {
        self.events.push(Ev::Str(value.to_owned()));
        HandlerAction::Continue
    }
    fn int_data(&mut self, value: i64) -> HandlerAction {
        self.events.push(Ev::Int(value));
        HandlerAction::Continue
    }
    fn boolean_data(&mut self, value: bool) -> HandlerAction {
        self.events.push(Ev::Bool(value));
        HandlerAction::Continue
    }
    fn float_data(&mut self, value: ExiFloat) -> HandlerAction {
        self.events.push(Ev::Float(value.mantissa, value.exponent));
        HandlerAction::Continue
    }
    fn decimal_data(&mut self, value: ExiDecimal) -> HandlerAction {
        self.events.push(Ev::Dec(
            value.negative,
            value.integral,
            value.fraction_rev,
        ));
        HandlerAction::Continue
    }
    fn binary_data(&mut self, value: &[u8]) -> HandlerAction {
        self.events.push(Ev::Bin(value.to_vec()));
        HandlerAction::Continue
    }
    fn date_time_data(&mut self, value: ExiDateTime) -> HandlerAction {
        self.events
            .push(Ev::Dt(value.year, value.month, value.day));
        HandlerAction::Continue
    }
    fn namespace_declaration(
        &mut self,
        uri: &str,
        prefix: &str,
        is_local: bool,
    ) -> HandlerAction {
        self.events
            .push(Ev::Ns(uri.to_owned(), prefix.to_owned(), is_local));
        HandlerAction::Continue
    }
}

fn decode(bytes: &[u8], schema: Option<ExiSchema>) -> Vec<Ev> {
    let mut parser = Parser::new(Cursor::new(bytes.to_vec()), schema);
    let mut recorder = Recorder::default();
    parser.parse_all(&mut recorder).unwrap();
    recorder.events
}

fn qn(uri: &str, name: &str) -> QName {
    QName::new(uri, name)
}

#[test]
fn empty_document_bytes_and_round_trip() {
    let mut s =
        Serializer::new(Vec::new(), ExiHeader::default(), None).unwrap();
    s.start_document().unwrap();
    s.start_element(&qn("", "a")).unwrap();
    s.end_element().unwrap();
    s.end_document().unwrap();
    let bytes = s.close_stream().unwrap();

    // Header byte, then: SE(*) zero bits, URI hit "" as 001, local-name
    // miss of one character 'a', EE as two zero bits, ED zero bits.
    assert_eq!(bytes, vec![0x80, 0x20, 0x4C, 0x20]);

    let events = decode(&bytes, None);
    assert_eq!(
        events,
        vec![Ev::Sd, Ev::Se("".into(), "a".into()), Ev::Ee, Ev::Ed]
    );
}

#[test]
fn attribute_and_text_populate_value_table() {
    let mut s =
        Serializer::new(Vec::new(), ExiHeader::default(), None).unwrap();
    s.start_document().unwrap();
    s.start_element(&qn("", "x")).unwrap();
    s.attribute(&qn("", "v"), ExiType::String).unwrap();
    s.string_data("0.1").unwrap();
    s.string_data("hi").unwrap();
    s.end_element().unwrap();
    s.end_document().unwrap();

    {
        let values = &s.body().tables.values;
        assert_eq!(values.len(), 2);
        assert_eq!(values.get(0), Some("0.1"));
        assert_eq!(values.get(1), Some("hi"));
    }
    let bytes = s.close_stream().unwrap();

    let events = decode(&bytes, None);
    assert_eq!(
        events,
        vec![
            Ev::Sd,
            Ev::Se("".into(), "x".into()),
            Ev::At("".into(), "v".into()),
            Ev::Str("0.1".into()),
            Ev::Str("hi".into()),
            Ev::Ee,
            Ev::Ed,
        ]
    );
}

fn unsigned_byte_schema() -> ExiSchema {
    SchemaBuilder::new()
        .global_element(ElementDef::simple("", "n", BuiltinType::UnsignedByte))
        .unwrap()
        .finish()
}

#[test]
fn schema_informed_small_integer_is_eight_bits() {
    let schema = unsigned_byte_schema();
    let mut s =
        Serializer::new(Vec::new(), ExiHeader::default(), Some(&schema))
            .unwrap();
    s.start_document().unwrap();
    s.start_element(&qn("", "n")).unwrap();
    s.int_data(7).unwrap();
    s.end_element().unwrap();
    s.end_document().unwrap();
    let bytes = s.close_stream().unwrap();

    // Header byte plus an 11-bit body: SE(n) one bit, CH one bit, the
    // value as exactly eight bits, EE one bit.
    assert_eq!(bytes.len(), 3);

    let events = decode(&bytes, Some(unsigned_byte_schema()));
    assert_eq!(
        events,
        vec![
            Ev::Sd,
            Ev::Se("".into(), "n".into()),
            Ev::Int(7),
            Ev::Ee,
            Ev::Ed,
        ]
    );
}

#[test]
fn small_integer_out_of_range_is_rejected() {
    let schema = unsigned_byte_schema();
    let mut s =
        Serializer::new(Vec::new(), ExiHeader::default(), Some(&schema))
            .unwrap();
    s.start_document().unwrap();
    s.start_element(&qn("", "n")).unwrap();
    let err = s.int_data(256).unwrap_err();
    assert_eq!(error_kind(&err), ExiError::InvalidInput);
}

#[test]
fn repeated_value_takes_the_global_hit_branch() {
    let text = "Hello EXI!";
    assert_eq!(text.chars().count(), 10);

    let mut s =
        Serializer::new(Vec::new(), ExiHeader::default(), None).unwrap();
    s.start_document().unwrap();
    s.start_element(&qn("", "x")).unwrap();
    s.attribute(&qn("", "a"), ExiType::String).unwrap();
    s.string_data(text).unwrap();
    s.attribute(&qn("", "b"), ExiType::String).unwrap();
    s.string_data(text).unwrap();
    s.end_element().unwrap();
    s.end_document().unwrap();

    // The second emission hit the global partition: one table row only.
    assert_eq!(s.body().tables.values.len(), 1);
    let bytes = s.close_stream().unwrap();

    let events = decode(&bytes, None);
    assert_eq!(
        events,
        vec![
            Ev::Sd,
            Ev::Se("".into(), "x".into()),
            Ev::At("".into(), "a".into()),
            Ev::Str(text.into()),
            Ev::At("".into(), "b".into()),
            Ev::Str(text.into()),
            Ev::Ee,
            Ev::Ed,
        ]
    );
}

fn nillable_schema() -> ExiSchema {
    SchemaBuilder::new()
        .global_element(
            ElementDef::simple("", "e", BuiltinType::String).nillable(),
        )
        .unwrap()
        .finish()
}

#[test]
fn nil_element_switches_to_empty_grammar() {
    let opts = Options {
        strict: true,
        ..Options::default()
    };
    let schema = nillable_schema();
    let mut s = Serializer::new(
        Vec::new(),
        ExiHeader::new(opts.clone()),
        Some(&schema),
    )
    .unwrap();
    s.start_document().unwrap();
    s.start_element(&qn("", "e")).unwrap();
    s.attribute(
        &qn("http://www.w3.org/2001/XMLSchema-instance", "nil"),
        ExiType::Boolean,
    )
    .unwrap();
    s.boolean_data(true).unwrap();

    // The empty-content grammar accepts nothing but EE.
    let err = s.start_element(&qn("", "child")).unwrap_err();
    assert_eq!(error_kind(&err), ExiError::InconsistentProcState);

    s.end_element().unwrap();
    s.end_document().unwrap();
    let bytes = s.close_stream().unwrap();

    // No options document on the wire: the decoder gets the strict
    // configuration out of band.
    let mut parser = Parser::with_options(
        Cursor::new(bytes),
        opts,
        Some(nillable_schema()),
    );
    let mut recorder = Recorder::default();
    parser.parse_all(&mut recorder).unwrap();
    assert_eq!(
        recorder.events,
        vec![
            Ev::Sd,
            Ev::Se("".into(), "e".into()),
            Ev::At(
                "http://www.w3.org/2001/XMLSchema-instance".into(),
                "nil".into()
            ),
            Ev::Bool(true),
            Ev::Ee,
            Ev::Ed,
        ]
    );
}

#[test]
fn learned_attribute_shortens_the_second_sibling() {
    let run = |second_attr: &str| -> Vec<u8> {
        let mut s =
            Serializer::new(Vec::new(), ExiHeader::default(), None)
                .unwrap();
        s.start_document().unwrap();
        s.start_element(&qn("", "root")).unwrap();
        for attr in ["q1", second_attr] {
            s.start_element(&qn("", "b")).unwrap();
            s.attribute(&qn("", attr), ExiType::String).unwrap();
            s.string_data("v").unwrap();
            s.end_element().unwrap();
        }
        s.end_element().unwrap();
        s.end_document().unwrap();
        s.close_stream().unwrap()
    };

    let learned = run("q1");
    let fresh = run("q2");
    // The second AT(q1) rides the learned length-1 production and the
    // string-table hit; a new attribute name cannot.
    assert!(learned.len() < fresh.len());
    assert_eq!(decode(&learned, None).len(), decode(&fresh, None).len());
}

#[test]
fn events_after_end_document_are_rejected() {
    let mut s =
        Serializer::new(Vec::new(), ExiHeader::default(), None).unwrap();
    s.start_document().unwrap();
    s.start_element(&qn("", "a")).unwrap();
    s.end_element().unwrap();
    s.end_document().unwrap();
    let err = s.start_element(&qn("", "b")).unwrap_err();
    assert_eq!(error_kind(&err), ExiError::InconsistentProcState);
}

#[test]
fn start_document_twice_is_rejected() {
    let mut s =
        Serializer::new(Vec::new(), ExiHeader::default(), None).unwrap();
    s.start_document().unwrap();
    let err = s.start_document().unwrap_err();
    assert_eq!(error_kind(&err), ExiError::InconsistentProcState);
}

#[test]
fn handler_stop_aborts_the_parse() {
    let mut s =
        Serializer::new(Vec::new(), ExiHeader::default(), None).unwrap();
    s.start_document().unwrap();
    s.start_element(&qn("", "a")).unwrap();
    s.end_element().unwrap();
    s.end_document().unwrap();
    let bytes = s.close_stream().unwrap();

    let mut parser = Parser::new(Cursor::new(bytes), None);
    let mut recorder = Recorder {
        stop_on_element: true,
        ..Recorder::default()
    };
    let err = parser.parse_all(&mut recorder).unwrap_err();
    assert_eq!(error_kind(&err), ExiError::HandlerStop);
    assert_eq!(recorder.events, vec![Ev::Sd]);
}

#[test]
fn truncated_stream_reports_buffer_end() {
    let mut s =
        Serializer::new(Vec::new(), ExiHeader::default(), None).unwrap();
    s.start_document().unwrap();
    s.start_element(&qn("", "abcdefgh")).unwrap();
    s.end_element().unwrap();
    s.end_document().unwrap();
    let bytes = s.close_stream().unwrap();

    let mut parser = Parser::new(Cursor::new(bytes[..3].to_vec()), None);
    let mut recorder = Recorder::default();
    let err = parser.parse_all(&mut recorder).unwrap_err();
    assert_eq!(error_kind(&err), ExiError::BufferEnd);
}

#[test]
fn uri_hit_out_of_range_is_invalid_input() {
    // Header, then SE(*) takes no bits and the 3-bit URI field reads 7:
    // id 6 is past the seeded five rows.
    let bytes = vec![0x80, 0xFF, 0xFF];
    let mut parser = Parser::new(Cursor::new(bytes), None);
    let mut recorder = Recorder::default();
    let err = parser.parse_all(&mut recorder).unwrap_err();
    assert_eq!(error_kind(&err), ExiError::InvalidInput);
}

#[test]
fn fragment_round_trip() {
    let opts = Options {
        fragment: true,
        ..Options::default()
    };
    let mut s = Serializer::new(
        Vec::new(),
        ExiHeader::new(opts).with_options_document(),
        None,
    )
    .unwrap();
    s.start_document().unwrap();
    for name in ["a", "b"] {
        s.start_element(&qn("", name)).unwrap();
        s.string_data("text").unwrap();
        s.end_element().unwrap();
    }
    s.end_document().unwrap();
    let bytes = s.close_stream().unwrap();

    // The options document tells the decoder this is a fragment.
    let events = decode(&bytes, None);
    assert_eq!(
        events,
        vec![
            Ev::Sd,
            Ev::Se("".into(), "a".into()),
            Ev::Str("text".into()),
            Ev::Ee,
            Ev::Se("".into(), "b".into()),
            Ev::Str("text".into()),
            Ev::Ee,
            Ev::Ed,
        ]
    );
}

#[test]
fn byte_aligned_body_round_trip() {
    let opts = Options {
        alignment: Alignment::ByteAligned,
        ..Options::default()
    };
    let mut s = Serializer::new(
        Vec::new(),
        ExiHeader::new(opts).with_options_document(),
        None,
    )
    .unwrap();
    s.start_document().unwrap();
    s.start_element(&qn("urn:demo", "doc")).unwrap();
    s.attribute(&qn("", "version"), ExiType::String).unwrap();
    s.string_data("2").unwrap();
    s.string_data("payload").unwrap();
    s.end_element().unwrap();
    s.end_document().unwrap();
    let bytes = s.close_stream().unwrap();

    let events = decode(&bytes, None);
    assert_eq!(
        events,
        vec![
            Ev::Sd,
            Ev::Se("urn:demo".into(), "doc".into()),
            Ev::At("".into(), "version".into()),
            Ev::Str("2".into()),
            Ev::Str("payload".into()),
            Ev::Ee,
            Ev::Ed,
        ]
    );
}

#[test]
fn namespace_declarations_round_trip() {
    let opts = Options {
        preserve: crate::options::Preserve {
            prefixes: true,
            ..Default::default()
        },
        ..Options::default()
    };
    let mut s = Serializer::new(
        Vec::new(),
        ExiHeader::new(opts).with_options_document(),
        None,
    )
    .unwrap();
    s.start_document().unwrap();
    s.start_element(&qn("", "root")).unwrap();
    s.namespace_declaration("urn:ns", "p", false).unwrap();
    s.start_element(&qn("urn:ns", "child")).unwrap();
    s.end_element().unwrap();
    s.end_element().unwrap();
    s.end_document().unwrap();
    let bytes = s.close_stream().unwrap();

    let events = decode(&bytes, None);
    assert_eq!(
        events,
        vec![
            Ev::Sd,
            Ev::Se("".into(), "root".into()),
            Ev::Ns("urn:ns".into(), "p".into(), false),
            Ev::Se("urn:ns".into(), "child".into()),
            Ev::Ee,
            Ev::Ee,
            Ev::Ed,
        ]
    );
}

#[test]
fn schema_id_nil_discards_the_bound_schema() {
    let opts = Options {
        schema_id: SchemaId::Nil,
        ..Options::default()
    };
    let mut s = Serializer::new(
        Vec::new(),
        ExiHeader::new(opts).with_options_document(),
        None,
    )
    .unwrap();
    s.start_document().unwrap();
    s.start_element(&qn("", "free")).unwrap();
    s.string_data("form").unwrap();
    s.end_element().unwrap();
    s.end_document().unwrap();
    let bytes = s.close_stream().unwrap();

    // A schema is bound at the decoder, but schemaId=nil overrides it.
    let events = decode(&bytes, Some(unsigned_byte_schema()));
    assert_eq!(
        events,
        vec![
            Ev::Sd,
            Ev::Se("".into(), "free".into()),
            Ev::Str("form".into()),
            Ev::Ee,
            Ev::Ed,
        ]
    );
}

#[test]
fn schema_with_nil_id_is_an_invalid_configuration() {
    let opts = Options {
        schema_id: SchemaId::Nil,
        ..Options::default()
    };
    let schema = unsigned_byte_schema();
    let err =
        Serializer::new(Vec::new(), ExiHeader::new(opts), Some(&schema))
            .unwrap_err();
    assert_eq!(error_kind(&err), ExiError::InvalidConfiguration);
}

fn typed_children_schema() -> ExiSchema {
    let child = |name: &str, type_id| {
        ParticleDef::once(TermDef::Element(ElementDef::simple(
            "", name, type_id,
        )))
    };
    SchemaBuilder::new()
        .global_element(ElementDef::complex(
            "",
            "root",
            vec![AttributeDef::new("", "count", BuiltinType::UnsignedByte)
                .required()],
            Some(ParticleDef::once(TermDef::Sequence(vec![
                child("f", BuiltinType::Double),
                child("d", BuiltinType::Decimal),
                child("raw", BuiltinType::Base64Binary),
                child("when", BuiltinType::Date),
            ]))),
        ))
        .unwrap()
        .finish()
}

#[test]
fn typed_content_round_trip() {
    let schema = typed_children_schema();
    let mut s =
        Serializer::new(Vec::new(), ExiHeader::default(), Some(&schema))
            .unwrap();
    s.start_document().unwrap();
    s.start_element(&qn("", "root")).unwrap();
    s.attribute(&qn("", "count"), ExiType::SmallInteger).unwrap();
    s.int_data(4).unwrap();

    s.start_element(&qn("", "f")).unwrap();
    s.float_data(ExiFloat::new(-15, -2)).unwrap();
    s.end_element().unwrap();

    s.start_element(&qn("", "d")).unwrap();
    s.decimal_data(&ExiDecimal::new(false, 3, 41)).unwrap();
    s.end_element().unwrap();

    s.start_element(&qn("", "raw")).unwrap();
    s.binary_data(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
    s.end_element().unwrap();

    s.start_element(&qn("", "when")).unwrap();
    let date = ExiDateTime {
        year: 2012,
        month: 7,
        day: 31,
        ..Default::default()
    };
    s.date_time_data(&date).unwrap();
    s.end_element().unwrap();

    s.end_element().unwrap();
    s.end_document().unwrap();
    let bytes = s.close_stream().unwrap();

    let events = decode(&bytes, Some(typed_children_schema()));
    assert_eq!(
        events,
        vec![
            Ev::Sd,
            Ev::Se("".into(), "root".into()),
            Ev::At("".into(), "count".into()),
            Ev::Int(4),
            Ev::Se("".into(), "f".into()),
            Ev::Float(-15, -2),
            Ev::Ee,
            Ev::Se("".into(), "d".into()),
            Ev::Dec(false, 3, 41),
            Ev::Ee,
            Ev::Se("".into(), "raw".into()),
            Ev::Bin(vec![0xDE, 0xAD, 0xBE, 0xEF]),
            Ev::Ee,
            Ev::Se("".into(), "when".into()),
            Ev::Dt(2012, 7, 31),
            Ev::Ee,
            Ev::Ee,
            Ev::Ed,
        ]
    );
}

#[test]
fn lax_stream_accepts_undeclared_attributes() {
    // Non-strict schema stream with an attribute the schema never
    // declared: the lax AT(*) production carries it.
    let schema = unsigned_byte_schema();
    let mut s =
        Serializer::new(Vec::new(), ExiHeader::default(), Some(&schema))
            .unwrap();
    s.start_document().unwrap();
    s.start_element(&qn("", "n")).unwrap();
    s.attribute(&qn("", "extra"), ExiType::String).unwrap();
    s.string_data("yes").unwrap();
    s.int_data(9).unwrap();
    s.end_element().unwrap();
    s.end_document().unwrap();
    let bytes = s.close_stream().unwrap();

    let events = decode(&bytes, Some(unsigned_byte_schema()));
    assert_eq!(
        events,
        vec![
            Ev::Sd,
            Ev::Se("".into(), "n".into()),
            Ev::At("".into(), "extra".into()),
            Ev::Str("yes".into()),
            Ev::Int(9),
            Ev::Ee,
            Ev::Ed,
        ]
    );
}

#[test]
fn nested_document_round_trip() {
    let mut s =
        Serializer::new(Vec::new(), ExiHeader::default(), None).unwrap();
    s.start_document().unwrap();
    s.start_element(&qn("urn:demo", "library")).unwrap();
    for title in ["one", "two", "three"] {
        s.start_element(&qn("urn:demo", "book")).unwrap();
        s.attribute(&qn("", "title"), ExiType::String).unwrap();
        s.string_data(title).unwrap();
        s.start_element(&qn("urn:demo", "blurb")).unwrap();
        s.string_data("text").unwrap();
        s.end_element().unwrap();
        s.end_element().unwrap();
    }
    s.end_element().unwrap();
    s.end_document().unwrap();
    let bytes = s.close_stream().unwrap();

    let events = decode(&bytes, None);
    assert_eq!(events.len(), 3 + 3 * 7 + 1);
    assert_eq!(events[0], Ev::Sd);
    assert_eq!(events[1], Ev::Se("urn:demo".into(), "library".into()));
    assert_eq!(events[2], Ev::Se("urn:demo".into(), "book".into()));
    assert_eq!(*events.last().unwrap(), Ev::Ed);
}
