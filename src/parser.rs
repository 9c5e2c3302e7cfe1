use anyhow::{anyhow, ensure, Result};

use std::io::Read;

use log::{debug, trace};

use crate::bitstream::BitReader;
use crate::body::Body;
use crate::grammar::{
    Event, EventType, ExiType, Production, ValueType, VOID_NON_TERMINAL,
};
use crate::header::{self, ExiHeader};
use crate::options::{Options, SchemaId};
use crate::schema::{date_time_kind, generate_builtin_types_schema, ExiSchema};
use crate::string_tables::{URI_XSI_ID, XSI_NIL_LN};
use crate::values::{ExiDateTime, ExiDecimal, ExiFloat, ValueRead};
use crate::{bits_for, error_kind, ExiError, QName, QNameId};

/// Continuation decision of a content-handler callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAction {
    Continue,
    Stop,
}

/// Application callbacks driven by the decoder. Every method defaults to
/// "carry on"; returning [`HandlerAction::Stop`] aborts the parse at the
/// next event boundary with [`ExiError::HandlerStop`].
pub trait ContentHandler {
    fn start_document(&mut self) -> HandlerAction {
        HandlerAction::Continue
    }
    fn end_document(&mut self) -> HandlerAction {
        HandlerAction::Continue
    }
    fn start_element(&mut self, _qname: &QName) -> HandlerAction {
        HandlerAction::Continue
    }
    fn end_element(&mut self) -> HandlerAction {
        HandlerAction::Continue
    }
    fn attribute(&mut self, _qname: &QName) -> HandlerAction {
        HandlerAction::Continue
    }

    fn int_data(&mut self, _value: i64) -> HandlerAction {
        HandlerAction::Continue
    }
    fn boolean_data(&mut self, _value: bool) -> HandlerAction {
        HandlerAction::Continue
    }
    fn string_data(&mut self, _value: &str) -> HandlerAction {
        HandlerAction::Continue
    }
    fn float_data(&mut self, _value: ExiFloat) -> HandlerAction {
        HandlerAction::Continue
    }
    fn binary_data(&mut self, _value: &[u8]) -> HandlerAction {
        HandlerAction::Continue
    }
    fn date_time_data(&mut self, _value: ExiDateTime) -> HandlerAction {
        HandlerAction::Continue
    }
    fn decimal_data(&mut self, _value: ExiDecimal) -> HandlerAction {
        HandlerAction::Continue
    }

    fn namespace_declaration(
        &mut self,
        _uri: &str,
        _prefix: &str,
        _is_local: bool,
    ) -> HandlerAction {
        HandlerAction::Continue
    }
    fn processing_instruction(&mut self) -> HandlerAction {
        HandlerAction::Continue
    }
    fn self_contained(&mut self) -> HandlerAction {
        HandlerAction::Continue
    }

    fn warning(&mut self, _code: ExiError, _msg: &str) -> HandlerAction {
        HandlerAction::Continue
    }
    fn error(&mut self, _code: ExiError, _msg: &str) -> HandlerAction {
        HandlerAction::Continue
    }
    fn fatal_error(&mut self, _code: ExiError, _msg: &str) -> HandlerAction {
        HandlerAction::Continue
    }
}

macro_rules! emit {
    ($call:expr) => {
        if $call == HandlerAction::Stop {
            return Err(ExiError::HandlerStop.into());
        }
    };
}

/// Pull parser over an EXI stream.
pub struct Parser<R: Read> {
    reader: BitReader<R>,
    schema: Option<ExiSchema>,
    out_of_band: Option<Options>,
    header: Option<ExiHeader>,
    body: Option<Body>,
}

impl<R: Read> Parser<R> {
    pub fn new(input: R, schema: Option<ExiSchema>) -> Self {
        Parser {
            reader: BitReader::new(input),
            schema,
            out_of_band: None,
            header: None,
            body: None,
        }
    }

    /// Like [`Parser::new`], for streams whose header carries no options
    /// document: the communicated-out-of-band options to decode with.
    pub fn with_options(
        input: R,
        opts: Options,
        schema: Option<ExiSchema>,
    ) -> Self {
        let mut parser = Parser::new(input, schema);
        parser.out_of_band = Some(opts);
        parser
    }

    /// Decode the header, including an in-band options document when
    /// present, and set up the body state it dictates.
    pub fn parse_header(&mut self) -> Result<&ExiHeader> {
        if self.header.is_some() {
            return Ok(self.header.as_ref().expect("checked"));
        }
        let mut header = header::decode_header(&mut self.reader)?;
        if !header.has_options {
            if let Some(opts) = self.out_of_band.take() {
                header.opts = opts;
            }
        }

        // The schemaId option overrides whatever schema was bound at
        // construction: nil discards it, empty swaps in the XSD built-in
        // type grammars.
        let schema = match &header.opts.schema_id {
            SchemaId::Nil => None,
            SchemaId::Empty => Some(generate_builtin_types_schema()),
            _ => self.schema.take(),
        };

        self.reader
            .set_byte_aligned(header.opts.byte_oriented());
        self.body = Some(Body::new(header.opts.clone(), schema.as_ref()));
        self.header = Some(header);
        Ok(self.header.as_ref().expect("just set"))
    }

    /// Decode one production and fire its callback. `Ok(false)` once the
    /// document grammar has been closed by ED.
    pub fn parse_next<H: ContentHandler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> Result<bool> {
        if self.header.is_none() {
            self.parse_header()?;
        }
        let body = self.body.as_mut().expect("header parsed");
        if body.done {
            return Ok(false);
        }
        decode_event(&mut self.reader, body, handler)
    }

    /// Drive the read loop to the end of the document.
    pub fn parse_all<H: ContentHandler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> Result<()> {
        loop {
            match self.parse_next(handler) {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(err) => {
                    let kind = error_kind(&err);
                    handler.fatal_error(kind, &format!("{err:#}"));
                    return Err(err);
                }
            }
        }
    }
}

/// Decode lookup: walk the three parts, following escapes, and return the
/// production the event code selects together with its part index.
fn next_production<R: Read>(
    reader: &mut BitReader<R>,
    body: &Body,
) -> Result<(usize, Production)> {
    let rule = body.current_rule()?;
    for part in 0..3 {
        let count = rule.parts[part].len();
        if count == 0 {
            continue;
        }
        if rule.bits[part] == 0 {
            return Ok((part, rule.parts[part][0]));
        }
        let value = reader.read_n_bit_uint(rule.bits[part])? as usize;
        if value == count {
            // Escape to the next, longer event-code part.
            continue;
        }
        ensure!(value < count, ExiError::InvalidInput);
        let prod = *rule
            .production(part, value)
            .expect("value checked against part population");
        trace!("event code part {part} value {value}: {:?}", prod.event);
        return Ok((part, prod));
    }
    Err(anyhow!(ExiError::InvalidInput))
}

/// Decode one event: production lookup, content, handler dispatch, state
/// transition. `Ok(false)` signals the final ED.
pub(crate) fn decode_event<R: Read, H: ContentHandler + ?Sized>(
    reader: &mut BitReader<R>,
    body: &mut Body,
    handler: &mut H,
) -> Result<bool> {
    let (part, prod) = next_production(reader, body)?;
    debug!(
        "decoded {:?}, non-term {} -> {}",
        prod.event.event_type, body.non_term, prod.non_term
    );

    match prod.event.event_type {
        EventType::Sd => {
            emit!(handler.start_document());
            body.non_term = prod.non_term;
        }
        EventType::Ed => {
            emit!(handler.end_document());
            body.stack.clear();
            body.done = true;
            return Ok(false);
        }
        EventType::Ee => {
            emit!(handler.end_element());
            if part > 0 && body.in_builtin_element() {
                body.current_rule_mut()?.insert_zero_production(
                    prod.event,
                    prod.non_term,
                    None,
                );
            }
            if prod.non_term == VOID_NON_TERMINAL {
                body.pop_element()?;
            } else {
                body.non_term = prod.non_term;
            }
        }
        EventType::SeQname => {
            let qname = prod.qname.ok_or(ExiError::InconsistentProcState)?;
            let name = resolve_qname(reader, body, qname)?;
            emit!(handler.start_element(&name));
            body.push_element(qname, prod.non_term)?;
        }
        EventType::SeAll => {
            let qname = decode_qname(reader, body)?;
            let name = resolve_qname(reader, body, qname)?;
            emit!(handler.start_element(&name));
            if body.in_builtin_element() {
                body.current_rule_mut()?.insert_zero_production(
                    Event::of(EventType::SeQname),
                    prod.non_term,
                    Some(qname),
                );
            }
            body.push_element(qname, prod.non_term)?;
        }
        EventType::AtQname => {
            let qname = prod.qname.ok_or(ExiError::InconsistentProcState)?;
            let name = resolve_qname(reader, body, qname)?;
            emit!(handler.attribute(&name));
            body.curr_attr = qname;
            body.non_term = prod.non_term;
            decode_value_item(reader, body, handler, prod.event.value, qname)?;
        }
        EventType::AtAll => {
            let qname = decode_qname(reader, body)?;
            let name = resolve_qname(reader, body, qname)?;
            emit!(handler.attribute(&name));
            body.curr_attr = qname;
            body.non_term = prod.non_term;
            decode_value_item(reader, body, handler, prod.event.value, qname)?;
            if body.in_builtin_element() {
                body.current_rule_mut()?.insert_zero_production(
                    Event::of(EventType::AtQname),
                    prod.non_term,
                    Some(qname),
                );
            }
        }
        EventType::Ch => {
            if part > 0 && body.in_builtin_element() {
                body.current_rule_mut()?.insert_zero_production(
                    prod.event,
                    prod.non_term,
                    None,
                );
            }
            let context = body.curr_elem;
            body.non_term = prod.non_term;
            decode_value_item(
                reader,
                body,
                handler,
                prod.event.value,
                context,
            )?;
        }
        EventType::Ns => {
            decode_namespace(reader, body, handler)?;
            body.non_term = prod.non_term;
        }
        EventType::Sc
        | EventType::SeUri
        | EventType::AtUri
        | EventType::Cm
        | EventType::Pi
        | EventType::Dt
        | EventType::Er => {
            return Err(anyhow!(ExiError::NotImplemented));
        }
        EventType::Void => {
            return Err(anyhow!(ExiError::InconsistentProcState));
        }
    }
    Ok(true)
}

/// URI partition read: n-bit hit id (+1) or a miss carrying the string.
fn decode_uri<R: Read>(
    reader: &mut BitReader<R>,
    body: &mut Body,
) -> Result<u16> {
    let bits = bits_for(body.tables.uris.len() + 1);
    let value = reader.read_n_bit_uint(bits)?;
    if value == 0 {
        let uri = reader.read_string()?;
        trace!("uri miss: {uri:?}");
        Ok(body.tables.uris.add(uri))
    } else {
        let id = (value - 1) as u16;
        ensure!(
            usize::from(id) < body.tables.uris.len(),
            ExiError::InvalidInput
        );
        Ok(id)
    }
}

/// Local-name partition read: unsigned 0 is a hit followed by an n-bit id,
/// anything else is a miss carrying `u - 1` characters.
fn decode_local_name<R: Read>(
    reader: &mut BitReader<R>,
    body: &mut Body,
    uri: u16,
) -> Result<usize> {
    let value = reader.read_unsigned()?;
    let row = body
        .tables
        .uris
        .row_mut(uri)
        .ok_or(ExiError::InvalidInput)?;
    if value == 0 {
        let bits = bits_for(row.locals.len());
        let id = reader.read_n_bit_uint(bits)? as usize;
        ensure!(id < row.locals.len(), ExiError::InvalidInput);
        Ok(id)
    } else {
        let name = reader.read_string_chars((value - 1) as usize)?;
        trace!("local-name miss: {name:?}");
        Ok(row.locals.add(name))
    }
}

fn decode_qname<R: Read>(
    reader: &mut BitReader<R>,
    body: &mut Body,
) -> Result<QNameId> {
    let uri = decode_uri(reader, body)?;
    let ln = decode_local_name(reader, body, uri)?;
    Ok(QNameId::new(uri, ln))
}

/// Build the application-facing qname, consuming the prefix id when
/// prefixes are preserved.
fn resolve_qname<R: Read>(
    reader: &mut BitReader<R>,
    body: &mut Body,
    qname: QNameId,
) -> Result<QName> {
    let prefix = decode_qname_prefix(reader, body, qname.uri)?;
    let (uri, local_name) = body
        .tables
        .uris
        .name_of(qname)
        .ok_or(ExiError::InvalidInput)?;
    Ok(QName {
        uri: uri.to_owned(),
        local_name: local_name.to_owned(),
        prefix,
    })
}

fn decode_qname_prefix<R: Read>(
    reader: &mut BitReader<R>,
    body: &mut Body,
    uri: u16,
) -> Result<Option<String>> {
    if !body.opts.preserve.prefixes {
        return Ok(None);
    }
    let Some(table) =
        body.tables.uris.row(uri).and_then(|row| row.prefixes.as_ref())
    else {
        return Ok(None);
    };
    if table.len() == 0 {
        return Ok(None);
    }
    let bits = bits_for(table.len());
    let id = if bits > 0 {
        reader.read_n_bit_uint(bits)? as usize
    } else {
        0
    };
    let prefix = table.get(id).ok_or(ExiError::InvalidInput)?;
    Ok(Some(prefix.to_owned()))
}

/// Prefix partition read for NS events: hit/miss like the URI partition.
fn decode_prefix<R: Read>(
    reader: &mut BitReader<R>,
    body: &mut Body,
    uri: u16,
) -> Result<usize> {
    let count = body
        .tables
        .uris
        .row(uri)
        .and_then(|row| row.prefixes.as_ref())
        .map_or(0, |t| t.len());
    let bits = bits_for(count + 1);
    let value = reader.read_n_bit_uint(bits)?;
    let row = body
        .tables
        .uris
        .row_mut(uri)
        .ok_or(ExiError::InvalidInput)?;
    if value == 0 {
        let prefix = reader.read_string()?;
        Ok(row.prefixes_mut().add(prefix))
    } else {
        let id = (value - 1) as usize;
        ensure!(id < count, ExiError::InvalidInput);
        Ok(id)
    }
}

fn decode_namespace<R: Read, H: ContentHandler + ?Sized>(
    reader: &mut BitReader<R>,
    body: &mut Body,
    handler: &mut H,
) -> Result<()> {
    let uri = decode_uri(reader, body)?;
    // Rows appended mid-stream have no prefix table yet; create it lazily.
    body.tables
        .uris
        .row_mut(uri)
        .ok_or(ExiError::InvalidInput)?
        .prefixes_mut();
    let prefix_id = decode_prefix(reader, body, uri)?;
    let is_local = reader.read_boolean()?;

    let row = body.tables.uris.row(uri).ok_or(ExiError::InvalidInput)?;
    let uri_str = row.uri().to_owned();
    let prefix = row
        .prefixes
        .as_ref()
        .and_then(|t| t.get(prefix_id))
        .ok_or(ExiError::InvalidInput)?
        .to_owned();
    emit!(handler.namespace_declaration(&uri_str, &prefix, is_local));
    Ok(())
}

/// String-content read against the value partitions: local hit, global
/// hit, or a miss that may enter the tables.
fn decode_string_value<R: Read>(
    reader: &mut BitReader<R>,
    body: &mut Body,
    qname: QNameId,
) -> Result<String> {
    let value = reader.read_unsigned()?;
    match value {
        0 => {
            let bits = bits_for(body.tables.local_value_count(qname));
            let id = reader.read_n_bit_uint(bits)? as usize;
            body.tables
                .local_value(qname, id)
                .map(str::to_owned)
                .ok_or_else(|| anyhow!(ExiError::InvalidInput))
        }
        1 => {
            let bits = bits_for(body.tables.values.len());
            let id = reader.read_n_bit_uint(bits)? as usize;
            body.tables
                .values
                .get(id)
                .map(str::to_owned)
                .ok_or_else(|| anyhow!(ExiError::InvalidInput))
        }
        miss => {
            let text = reader.read_string_chars((miss - 2) as usize)?;
            let opts = body.opts.clone();
            body.tables.add_value(&opts, qname, &text);
            Ok(text)
        }
    }
}

/// Typed content dispatch, driven by the production's value type.
fn decode_value_item<R: Read, H: ContentHandler + ?Sized>(
    reader: &mut BitReader<R>,
    body: &mut Body,
    handler: &mut H,
    value: ValueType,
    qname: QNameId,
) -> Result<()> {
    match value.exi_type {
        ExiType::NonNegativeInteger => {
            let v = reader.read_unsigned()?;
            ensure!(v <= i64::MAX as u64, ExiError::InvalidInput);
            emit!(handler.int_data(v as i64));
        }
        ExiType::Integer => {
            let v = reader.read_integer()?;
            emit!(handler.int_data(v));
        }
        ExiType::SmallInteger => {
            let (min, max) = body.small_int_bounds(value)?;
            let bits = bits_for((max - min + 1) as usize);
            let v = reader.read_n_bit_uint(bits)?;
            emit!(handler.int_data(min + i64::from(v)));
        }
        ExiType::Float => {
            let v = reader.read_float()?;
            emit!(handler.float_data(v));
        }
        ExiType::Boolean => {
            let v = reader.read_boolean()?;
            emit!(handler.boolean_data(v));
            // xsi:nil="true" on a schema grammar switches the element to
            // its empty-content grammar.
            if v
                && body.in_schema_grammar()
                && qname == QNameId::new(URI_XSI_ID, XSI_NIL_LN)
            {
                body.switch_to_empty_grammar()?;
            }
        }
        ExiType::Binary => {
            let v = reader.read_binary()?;
            emit!(handler.binary_data(&v));
        }
        ExiType::Decimal => {
            let v = reader.read_decimal()?;
            emit!(handler.decimal_data(v));
        }
        ExiType::DateTime => {
            let kind = date_time_kind(value.simple_type);
            let v = reader.read_date_time(kind)?;
            emit!(handler.date_time_data(v));
        }
        ExiType::List | ExiType::QName => {
            return Err(anyhow!(ExiError::NotImplemented));
        }
        ExiType::String | ExiType::None | ExiType::Untyped => {
            let text = decode_string_value(reader, body, qname)?;
            emit!(handler.string_data(&text));
        }
    }
    Ok(())
}
