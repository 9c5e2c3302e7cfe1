use anyhow::{anyhow, ensure, Result};

use std::io::Write;

use log::debug;

use crate::bitstream::BitWriter;
use crate::body::Body;
use crate::grammar::{
    EncodeEvent, Event, EventType, ExiType, GrammarRule, ValueType,
    GR_DOCUMENT, VOID_NON_TERMINAL,
};
use crate::header::{self, ExiHeader};
use crate::options::SchemaId;
use crate::schema::{date_time_kind, generate_builtin_types_schema, ExiSchema};
use crate::string_tables::{URI_XSI_ID, XSI_NIL_LN};
use crate::values::{ExiDateTime, ExiDecimal, ExiFloat, ValueWrite};
use crate::{bits_for, ExiError, QName, QNameId};

/// Push serializer producing an EXI stream; one method per event kind.
///
/// The header (with the options document when requested) is written before
/// the first event; [`Serializer::close_stream`] flushes and returns the
/// sink.
#[derive(Debug)]
pub struct Serializer<W: Write> {
    writer: BitWriter<W>,
    header: ExiHeader,
    body: Body,
    header_written: bool,
    body_started: bool,
}

impl<W: Write> Serializer<W> {
    pub fn new(
        output: W,
        header: ExiHeader,
        schema: Option<&ExiSchema>,
    ) -> Result<Self> {
        ensure!(
            !matches!(
                (&header.opts.schema_id, schema),
                (SchemaId::Nil | SchemaId::Empty, Some(_))
            ),
            ExiError::InvalidConfiguration
        );

        let builtin;
        let effective = match &header.opts.schema_id {
            SchemaId::Nil => None,
            SchemaId::Empty => {
                builtin = generate_builtin_types_schema();
                Some(&builtin)
            }
            _ => schema,
        };
        let body = Body::new(header.opts.clone(), effective);
        Ok(Serializer {
            writer: BitWriter::new(output),
            header,
            body,
            header_written: false,
            body_started: false,
        })
    }

    /// Write the EXI header. Called implicitly by the first event when the
    /// application does not do it itself.
    pub fn encode_header(&mut self) -> Result<()> {
        ensure!(!self.header_written, ExiError::InconsistentProcState);
        header::encode_header(&mut self.writer, &self.header)?;
        self.header_written = true;
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        if !self.header_written {
            self.encode_header()?;
        }
        if !self.body_started {
            self.writer
                .set_byte_aligned(self.body.opts.byte_oriented());
            self.body_started = true;
        }
        Ok(())
    }

    pub fn start_document(&mut self) -> Result<()> {
        self.prepare()?;
        ensure!(
            self.body.non_term == GR_DOCUMENT && !self.body.done,
            ExiError::InconsistentProcState
        );
        start_document(&mut self.writer, &mut self.body)
    }

    pub fn end_document(&mut self) -> Result<()> {
        self.prepare()?;
        end_document(&mut self.writer, &mut self.body)
    }

    pub fn start_element(&mut self, qname: &QName) -> Result<()> {
        self.prepare()?;
        start_element(&mut self.writer, &mut self.body, qname)
    }

    pub fn end_element(&mut self) -> Result<()> {
        self.prepare()?;
        end_element(&mut self.writer, &mut self.body)
    }

    pub fn attribute(
        &mut self,
        qname: &QName,
        exi_type: ExiType,
    ) -> Result<()> {
        self.prepare()?;
        attribute(&mut self.writer, &mut self.body, qname, exi_type)
    }

    pub fn int_data(&mut self, value: i64) -> Result<()> {
        self.prepare()?;
        int_data(&mut self.writer, &mut self.body, value)
    }

    pub fn boolean_data(&mut self, value: bool) -> Result<()> {
        self.prepare()?;
        boolean_data(&mut self.writer, &mut self.body, value)
    }

    pub fn string_data(&mut self, value: &str) -> Result<()> {
        self.prepare()?;
        string_data(&mut self.writer, &mut self.body, value)
    }

    pub fn float_data(&mut self, value: ExiFloat) -> Result<()> {
        self.prepare()?;
        float_data(&mut self.writer, &mut self.body, value)
    }

    pub fn binary_data(&mut self, value: &[u8]) -> Result<()> {
        self.prepare()?;
        binary_data(&mut self.writer, &mut self.body, value)
    }

    pub fn decimal_data(&mut self, value: &ExiDecimal) -> Result<()> {
        self.prepare()?;
        decimal_data(&mut self.writer, &mut self.body, value)
    }

    pub fn date_time_data(&mut self, value: &ExiDateTime) -> Result<()> {
        self.prepare()?;
        date_time_data(&mut self.writer, &mut self.body, value)
    }

    pub fn namespace_declaration(
        &mut self,
        uri: &str,
        prefix: &str,
        is_local: bool,
    ) -> Result<()> {
        self.prepare()?;
        namespace_declaration(
            &mut self.writer,
            &mut self.body,
            uri,
            prefix,
            is_local,
        )
    }

    /// Reserved: the SC production exists in the grammars but encoding a
    /// self-contained fragment is not implemented.
    pub fn self_contained(&mut self) -> Result<()> {
        Err(anyhow!(ExiError::NotImplemented))
    }

    /// Flush everything and hand back the sink.
    pub fn close_stream(self) -> Result<W> {
        self.writer.finish()
    }

    #[cfg(test)]
    pub(crate) fn body(&self) -> &Body {
        &self.body
    }
}

fn write_event_code<W: Write>(
    writer: &mut BitWriter<W>,
    rule: &GrammarRule,
    part: usize,
    code: usize,
) -> Result<()> {
    for j in 0..part {
        // Escape into the longer code: the part's population count.
        writer.write_n_bit_uint(rule.bits[j], rule.parts[j].len() as u32)?;
    }
    writer.write_n_bit_uint(rule.bits[part], code as u32)
}

/// Find the production for `ev` in the current rule and write its event
/// code. Fails with `InconsistentProcState` when the rule cannot produce
/// the event.
fn select<W: Write>(
    writer: &mut BitWriter<W>,
    body: &Body,
    ev: EncodeEvent,
) -> Result<(usize, crate::grammar::Production)> {
    let rule = body.current_rule()?;
    let (part, code) = rule
        .find_production(ev)
        .ok_or(ExiError::InconsistentProcState)?;
    let prod = *rule
        .production(part, code)
        .expect("find_production returned a valid code");
    write_event_code(writer, rule, part, code)?;
    debug!("encoded {:?} as part {part} code {code}", prod.event.event_type);
    Ok((part, prod))
}

pub(crate) fn start_document<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
) -> Result<()> {
    let (_, prod) = select(writer, body, EncodeEvent::Sd)?;
    body.non_term = prod.non_term;
    Ok(())
}

pub(crate) fn end_document<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
) -> Result<()> {
    select(writer, body, EncodeEvent::Ed)?;
    body.stack.clear();
    body.done = true;
    Ok(())
}

pub(crate) fn start_element<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
    qname: &QName,
) -> Result<()> {
    let resolved = find_qname_id(body, qname);
    let (_, prod) = select(writer, body, EncodeEvent::Se(resolved))?;

    let qn = match prod.event.event_type {
        EventType::SeQname => {
            let qn = prod.qname.ok_or(ExiError::InconsistentProcState)?;
            encode_qname_prefix(writer, body, qn.uri, qname.prefix.as_deref())?;
            qn
        }
        EventType::SeAll => {
            let qn = encode_qname(writer, body, qname)?;
            if body.in_builtin_element() {
                body.current_rule_mut()?.insert_zero_production(
                    Event::of(EventType::SeQname),
                    prod.non_term,
                    Some(qn),
                );
            }
            qn
        }
        _ => return Err(anyhow!(ExiError::NotImplemented)),
    };
    body.push_element(qn, prod.non_term)
}

pub(crate) fn end_element<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
) -> Result<()> {
    let (part, prod) = select(writer, body, EncodeEvent::Ee)?;
    if part > 0 && body.in_builtin_element() {
        body.current_rule_mut()?.insert_zero_production(
            prod.event,
            prod.non_term,
            None,
        );
    }
    if prod.non_term == VOID_NON_TERMINAL {
        body.pop_element()
    } else {
        body.non_term = prod.non_term;
        Ok(())
    }
}

pub(crate) fn attribute<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
    qname: &QName,
    exi_type: ExiType,
) -> Result<()> {
    let resolved = find_qname_id(body, qname);
    let (_, prod) = select(writer, body, EncodeEvent::At(resolved))?;

    // A typed declaration must agree with what the application announced.
    let declared = prod.event.value.exi_type;
    ensure!(
        declared == ExiType::None
            || declared == ExiType::Untyped
            || declared == exi_type,
        ExiError::InconsistentProcState
    );

    let qn = match prod.event.event_type {
        EventType::AtQname => {
            let qn = prod.qname.ok_or(ExiError::InconsistentProcState)?;
            encode_qname_prefix(writer, body, qn.uri, qname.prefix.as_deref())?;
            qn
        }
        EventType::AtAll => {
            let qn = encode_qname(writer, body, qname)?;
            if body.in_builtin_element() {
                body.current_rule_mut()?.insert_zero_production(
                    Event::typed(EventType::AtQname, prod.event.value),
                    prod.non_term,
                    Some(qn),
                );
            }
            qn
        }
        _ => return Err(anyhow!(ExiError::NotImplemented)),
    };
    body.curr_attr = qn;
    body.non_term = prod.non_term;
    body.expect_at = Some(prod.event.value);
    Ok(())
}

/// Value context for a data call: either the pending attribute type, or a
/// CH production looked up (and coded) on the spot.
fn value_context<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
) -> Result<(ValueType, QNameId)> {
    if let Some(value) = body.expect_at.take() {
        return Ok((value, body.curr_attr));
    }
    let (part, prod) = select(writer, body, EncodeEvent::Ch)?;
    if part > 0 && body.in_builtin_element() {
        body.current_rule_mut()?.insert_zero_production(
            prod.event,
            prod.non_term,
            None,
        );
    }
    body.non_term = prod.non_term;
    Ok((prod.event.value, body.curr_elem))
}

pub(crate) fn int_data<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
    value: i64,
) -> Result<()> {
    let (vt, qname) = value_context(writer, body)?;
    match vt.exi_type {
        ExiType::Integer => writer.write_integer(value),
        ExiType::NonNegativeInteger => {
            ensure!(value >= 0, ExiError::InvalidInput);
            writer.write_unsigned(value as u64)
        }
        ExiType::SmallInteger => {
            let (min, max) = body.small_int_bounds(vt)?;
            ensure!(value >= min && value <= max, ExiError::InvalidInput);
            let bits = bits_for((max - min + 1) as usize);
            writer.write_n_bit_uint(bits, (value - min) as u32)
        }
        // Untyped content carries the decimal string form.
        ExiType::None | ExiType::Untyped | ExiType::String => {
            encode_string_value(writer, body, qname, &value.to_string())
        }
        _ => Err(anyhow!(ExiError::InconsistentProcState)),
    }
}

pub(crate) fn boolean_data<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
    value: bool,
) -> Result<()> {
    let was_attr = body.expect_at.is_some();
    let (vt, qname) = value_context(writer, body)?;
    match vt.exi_type {
        ExiType::Boolean => writer.write_boolean(value)?,
        ExiType::None | ExiType::Untyped | ExiType::String => {
            let text = if value { "true" } else { "false" };
            encode_string_value(writer, body, qname, text)?;
        }
        _ => return Err(anyhow!(ExiError::InconsistentProcState)),
    }

    // xsi:nil="true" on a schema grammar: continue in the empty-content
    // grammar of the element.
    if value
        && was_attr
        && qname == QNameId::new(URI_XSI_ID, XSI_NIL_LN)
        && body.in_schema_grammar()
    {
        body.switch_to_empty_grammar()?;
    }
    Ok(())
}

pub(crate) fn string_data<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
    value: &str,
) -> Result<()> {
    let (vt, qname) = value_context(writer, body)?;
    match vt.exi_type {
        ExiType::None | ExiType::Untyped | ExiType::String => {
            encode_string_value(writer, body, qname, value)
        }
        _ => Err(anyhow!(ExiError::InconsistentProcState)),
    }
}

pub(crate) fn float_data<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
    value: ExiFloat,
) -> Result<()> {
    let (vt, _) = value_context(writer, body)?;
    ensure!(
        matches!(vt.exi_type, ExiType::Float),
        ExiError::InconsistentProcState
    );
    writer.write_float(&value)
}

pub(crate) fn binary_data<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
    value: &[u8],
) -> Result<()> {
    let (vt, _) = value_context(writer, body)?;
    ensure!(
        matches!(vt.exi_type, ExiType::Binary),
        ExiError::InconsistentProcState
    );
    writer.write_binary(value)
}

pub(crate) fn decimal_data<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
    value: &ExiDecimal,
) -> Result<()> {
    let (vt, _) = value_context(writer, body)?;
    ensure!(
        matches!(vt.exi_type, ExiType::Decimal),
        ExiError::InconsistentProcState
    );
    writer.write_decimal(value)
}

pub(crate) fn date_time_data<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
    value: &ExiDateTime,
) -> Result<()> {
    let (vt, _) = value_context(writer, body)?;
    ensure!(
        matches!(vt.exi_type, ExiType::DateTime),
        ExiError::InconsistentProcState
    );
    writer.write_date_time(date_time_kind(vt.simple_type), value)
}

pub(crate) fn namespace_declaration<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
    uri: &str,
    prefix: &str,
    is_local: bool,
) -> Result<()> {
    let (_, prod) = select(writer, body, EncodeEvent::Ns)?;
    body.non_term = prod.non_term;
    let uri_id = encode_uri(writer, body, uri)?;
    body.tables
        .uris
        .row_mut(uri_id)
        .ok_or(ExiError::InvalidInput)?
        .prefixes_mut();
    encode_prefix(writer, body, uri_id, prefix)?;
    writer.write_boolean(is_local)
}

/// Resolve an application qname against the tables without inserting.
fn find_qname_id(body: &Body, qname: &QName) -> Option<QNameId> {
    let uri = body.tables.uris.find(&qname.uri)?;
    let ln = body
        .tables
        .uris
        .row(uri)?
        .locals
        .find(&qname.local_name)?;
    Some(QNameId::new(uri, ln))
}

/// URI partition write: id+1 on a hit, 0 plus the string on a miss.
fn encode_uri<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
    uri: &str,
) -> Result<u16> {
    let bits = bits_for(body.tables.uris.len() + 1);
    match body.tables.uris.find(uri) {
        Some(id) => {
            writer.write_n_bit_uint(bits, u32::from(id) + 1)?;
            Ok(id)
        }
        None => {
            writer.write_n_bit_uint(bits, 0)?;
            writer.write_string(uri)?;
            Ok(body.tables.uris.add(uri.to_owned()))
        }
    }
}

fn encode_local_name<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
    uri: u16,
    name: &str,
) -> Result<usize> {
    let row = body
        .tables
        .uris
        .row_mut(uri)
        .ok_or(ExiError::InvalidInput)?;
    match row.locals.find(name) {
        Some(ln) => {
            writer.write_unsigned(0)?;
            writer.write_n_bit_uint(bits_for(row.locals.len()), ln as u32)?;
            Ok(ln)
        }
        None => {
            writer.write_unsigned(name.chars().count() as u64 + 1)?;
            writer.write_string_chars(name)?;
            Ok(row.locals.add(name.to_owned()))
        }
    }
}

fn encode_qname<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
    qname: &QName,
) -> Result<QNameId> {
    let uri = encode_uri(writer, body, &qname.uri)?;
    let ln = encode_local_name(writer, body, uri, &qname.local_name)?;
    encode_qname_prefix(writer, body, uri, qname.prefix.as_deref())?;
    Ok(QNameId::new(uri, ln))
}

fn encode_qname_prefix<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
    uri: u16,
    prefix: Option<&str>,
) -> Result<()> {
    if !body.opts.preserve.prefixes {
        return Ok(());
    }
    let Some(table) =
        body.tables.uris.row(uri).and_then(|row| row.prefixes.as_ref())
    else {
        return Ok(());
    };
    if table.len() == 0 {
        return Ok(());
    }
    let bits = bits_for(table.len());
    if bits > 0 {
        let id = prefix.and_then(|p| table.find(p)).unwrap_or(0);
        writer.write_n_bit_uint(bits, id as u32)?;
    }
    Ok(())
}

/// Prefix partition write for NS events.
fn encode_prefix<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
    uri: u16,
    prefix: &str,
) -> Result<usize> {
    let row = body
        .tables
        .uris
        .row_mut(uri)
        .ok_or(ExiError::InvalidInput)?;
    let table = row.prefixes_mut();
    let bits = bits_for(table.len() + 1);
    match table.find(prefix) {
        Some(id) => {
            writer.write_n_bit_uint(bits, id as u32 + 1)?;
            Ok(id)
        }
        None => {
            writer.write_n_bit_uint(bits, 0)?;
            writer.write_string(prefix)?;
            Ok(table.add(prefix.to_owned()))
        }
    }
}

/// String-content write against the value partitions: prefer the local
/// partition, then the global one, then a miss that may enter the tables.
fn encode_string_value<W: Write>(
    writer: &mut BitWriter<W>,
    body: &mut Body,
    qname: QNameId,
    value: &str,
) -> Result<()> {
    if let Some(local) = body.tables.local_value_hit(qname, value) {
        writer.write_unsigned(0)?;
        let bits = bits_for(body.tables.local_value_count(qname));
        return writer.write_n_bit_uint(bits, local as u32);
    }
    if let Some(global) = body.tables.values.find(value) {
        writer.write_unsigned(1)?;
        let bits = bits_for(body.tables.values.len());
        return writer.write_n_bit_uint(bits, global as u32);
    }
    writer.write_unsigned(value.chars().count() as u64 + 2)?;
    writer.write_string_chars(value)?;
    let opts = body.opts.clone();
    body.tables.add_value(&opts, qname, value);
    Ok(())
}
