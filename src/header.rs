use anyhow::{ensure, Result};

use std::io::{Read, Write};

use log::debug;

use serde::Serialize;

use crate::bitstream::{BitReader, BitWriter};
use crate::body::Body;
use crate::options::{
    Alignment, Options, SchemaId, DEFAULT_BLOCK_SIZE,
};
use crate::parser::{decode_event, ContentHandler, HandlerAction};
use crate::serializer as enc;
use crate::string_tables::{EXI_NAMESPACE, XSI_NAMESPACE};
use crate::{ExiError, QName};

mod options_schema;

use options_schema::options_schema;

/// Decoded EXI header: cookie and version framing plus the effective
/// stream options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExiHeader {
    pub has_cookie: bool,
    /// Whether the options document is carried in band.
    pub has_options: bool,
    pub is_preview_version: bool,
    pub version_number: u16,
    pub opts: Options,
}

impl ExiHeader {
    pub fn new(opts: Options) -> Self {
        ExiHeader {
            has_cookie: false,
            has_options: false,
            is_preview_version: false,
            version_number: 1,
            opts,
        }
    }

    pub fn with_cookie(mut self) -> Self {
        self.has_cookie = true;
        self
    }

    /// Carry the options document in the header, so a decoder needs no
    /// out-of-band configuration.
    pub fn with_options_document(mut self) -> Self {
        self.has_options = true;
        self
    }
}

impl Default for ExiHeader {
    fn default() -> Self {
        ExiHeader::new(Options::default())
    }
}

/// Decode the header: optional `$EXI` cookie, distinguishing bits `10`,
/// presence and version fields, then the in-band options document when
/// flagged.
pub fn decode_header<R: Read>(
    reader: &mut BitReader<R>,
) -> Result<ExiHeader> {
    let mut header = ExiHeader::default();

    match reader.read_bits(2)? {
        // Distinguishing bits straight away; no cookie.
        0b10 => header.has_cookie = false,
        // '$' starts with 00; the rest of the cookie must follow.
        0b00 => {
            ensure!(reader.read_bits(6)? == 36, ExiError::InvalidHeader);
            ensure!(reader.read_bits(8)? == u32::from(b'E'), ExiError::InvalidHeader);
            ensure!(reader.read_bits(8)? == u32::from(b'X'), ExiError::InvalidHeader);
            ensure!(reader.read_bits(8)? == u32::from(b'I'), ExiError::InvalidHeader);
            ensure!(reader.read_bits(2)? == 0b10, ExiError::InvalidHeader);
            header.has_cookie = true;
        }
        _ => return Err(ExiError::InvalidHeader.into()),
    }

    header.has_options = reader.read_bit()?;
    header.is_preview_version = reader.read_bit()?;
    header.version_number = 1;
    loop {
        let group = reader.read_bits(4)? as u16;
        header.version_number += group;
        if group < 15 {
            break;
        }
    }
    debug!(
        "EXI header: cookie {}, options {}, version {}",
        header.has_cookie, header.has_options, header.version_number
    );

    if header.has_options {
        header.opts = decode_options_document(reader)?;
        // The body restarts on a byte boundary for compressed and
        // non-bit-packed streams.
        if header.opts.byte_oriented() {
            reader.align_to_byte();
        }
    }

    Ok(header)
}

/// Encode the header, mirror of [`decode_header`].
pub fn encode_header<W: Write>(
    writer: &mut BitWriter<W>,
    header: &ExiHeader,
) -> Result<()> {
    if header.has_cookie {
        for byte in *b"$EXI" {
            writer.write_bits(8, u32::from(byte))?;
        }
    }
    writer.write_bits(2, 0b10)?;
    writer.write_bit(header.has_options)?;
    writer.write_bit(header.is_preview_version)?;

    ensure!(header.version_number >= 1, ExiError::InvalidConfiguration);
    let mut version = header.version_number - 1;
    while version >= 15 {
        writer.write_bits(4, 15)?;
        version -= 15;
    }
    writer.write_bits(4, u32::from(version))?;

    if header.has_options {
        encode_options_document(writer, &header.opts)?;
        if header.opts.byte_oriented() {
            writer.align_to_byte()?;
        }
    }
    Ok(())
}

/// Collects option settings from the decoded options document.
#[derive(Default)]
struct OptionsBuilder {
    opts: Options,
    current: String,
}

impl ContentHandler for OptionsBuilder {
    fn start_element(&mut self, qname: &QName) -> HandlerAction {
        if qname.uri != EXI_NAMESPACE {
            return HandlerAction::Stop;
        }
        self.current = qname.local_name.clone();
        match qname.local_name.as_str() {
            "strict" => self.opts.strict = true,
            "compression" => self.opts.compression = true,
            "fragment" => self.opts.fragment = true,
            "selfContained" => self.opts.self_contained = true,
            "byte" => self.opts.alignment = Alignment::ByteAligned,
            "pre-compress" => self.opts.alignment = Alignment::PreCompression,
            "dtd" => self.opts.preserve.dtd = true,
            "prefixes" => self.opts.preserve.prefixes = true,
            "lexicalValues" => self.opts.preserve.lexical_values = true,
            "comments" => self.opts.preserve.comments = true,
            "pis" => self.opts.preserve.pis = true,
            _ => {}
        }
        HandlerAction::Continue
    }

    fn int_data(&mut self, value: i64) -> HandlerAction {
        match self.current.as_str() {
            "blockSize" => self.opts.block_size = value as u32,
            "valueMaxLength" => {
                self.opts.value_max_length = Some(value as usize)
            }
            "valuePartitionCapacity" => {
                self.opts.value_partition_capacity = Some(value as usize)
            }
            _ => {}
        }
        HandlerAction::Continue
    }

    fn string_data(&mut self, value: &str) -> HandlerAction {
        if self.current == "schemaId" {
            self.opts.schema_id = if value.is_empty() {
                SchemaId::Empty
            } else {
                SchemaId::Set(value.to_owned())
            };
        }
        HandlerAction::Continue
    }

    fn boolean_data(&mut self, value: bool) -> HandlerAction {
        // xsi:nil="true" on the schemaId element.
        if self.current == "schemaId" && value {
            self.opts.schema_id = SchemaId::Nil;
        }
        HandlerAction::Continue
    }
}

/// The options document is a nested EXI body over the static options
/// schema, processed strict and bit-packed.
fn substream_options() -> Options {
    Options {
        strict: true,
        ..Options::default()
    }
}

fn decode_options_document<R: Read>(
    reader: &mut BitReader<R>,
) -> Result<Options> {
    let mut body = Body::new(substream_options(), Some(options_schema()));
    let mut builder = OptionsBuilder::default();
    while decode_event(reader, &mut body, &mut builder)? {}
    Ok(builder.opts)
}

fn encode_options_document<W: Write>(
    writer: &mut BitWriter<W>,
    opts: &Options,
) -> Result<()> {
    let body = &mut Body::new(substream_options(), Some(options_schema()));
    let name = |ln: &str| QName::new(EXI_NAMESPACE, ln);
    let empty = |writer: &mut BitWriter<W>, body: &mut Body, ln: &str| {
        enc::start_element(writer, body, &name(ln))?;
        enc::end_element(writer, body)
    };

    enc::start_document(writer, body)?;
    enc::start_element(writer, body, &name("header"))?;

    let has_uncommon = opts.alignment != Alignment::BitPacked
        || opts.self_contained
        || opts.value_max_length.is_some()
        || opts.value_partition_capacity.is_some();
    let has_lesscommon = has_uncommon
        || opts.preserve.any()
        || opts.block_size != DEFAULT_BLOCK_SIZE;

    if has_lesscommon {
        enc::start_element(writer, body, &name("lesscommon"))?;
        if has_uncommon {
            enc::start_element(writer, body, &name("uncommon"))?;
            if opts.alignment != Alignment::BitPacked {
                enc::start_element(writer, body, &name("alignment"))?;
                match opts.alignment {
                    Alignment::ByteAligned => empty(writer, body, "byte")?,
                    _ => empty(writer, body, "pre-compress")?,
                }
                enc::end_element(writer, body)?;
            }
            if opts.self_contained {
                empty(writer, body, "selfContained")?;
            }
            if let Some(max) = opts.value_max_length {
                enc::start_element(writer, body, &name("valueMaxLength"))?;
                enc::int_data(writer, body, max as i64)?;
                enc::end_element(writer, body)?;
            }
            if let Some(capacity) = opts.value_partition_capacity {
                enc::start_element(
                    writer,
                    body,
                    &name("valuePartitionCapacity"),
                )?;
                enc::int_data(writer, body, capacity as i64)?;
                enc::end_element(writer, body)?;
            }
            enc::end_element(writer, body)?;
        }
        if opts.preserve.any() {
            enc::start_element(writer, body, &name("preserve"))?;
            if opts.preserve.dtd {
                empty(writer, body, "dtd")?;
            }
            if opts.preserve.prefixes {
                empty(writer, body, "prefixes")?;
            }
            if opts.preserve.lexical_values {
                empty(writer, body, "lexicalValues")?;
            }
            if opts.preserve.comments {
                empty(writer, body, "comments")?;
            }
            if opts.preserve.pis {
                empty(writer, body, "pis")?;
            }
            enc::end_element(writer, body)?;
        }
        if opts.block_size != DEFAULT_BLOCK_SIZE {
            enc::start_element(writer, body, &name("blockSize"))?;
            enc::int_data(writer, body, i64::from(opts.block_size))?;
            enc::end_element(writer, body)?;
        }
        enc::end_element(writer, body)?;
    }

    let has_common = opts.compression
        || opts.fragment
        || opts.schema_id != SchemaId::Absent;
    if has_common {
        enc::start_element(writer, body, &name("common"))?;
        if opts.compression {
            empty(writer, body, "compression")?;
        }
        if opts.fragment {
            empty(writer, body, "fragment")?;
        }
        match &opts.schema_id {
            SchemaId::Absent => {}
            SchemaId::Set(id) => {
                enc::start_element(writer, body, &name("schemaId"))?;
                enc::string_data(writer, body, id)?;
                enc::end_element(writer, body)?;
            }
            SchemaId::Empty => {
                enc::start_element(writer, body, &name("schemaId"))?;
                enc::string_data(writer, body, "")?;
                enc::end_element(writer, body)?;
            }
            SchemaId::Nil => {
                enc::start_element(writer, body, &name("schemaId"))?;
                let nil = QName::new(XSI_NAMESPACE, "nil");
                enc::attribute(
                    writer,
                    body,
                    &nil,
                    crate::grammar::ExiType::Boolean,
                )?;
                enc::boolean_data(writer, body, true)?;
                enc::end_element(writer, body)?;
            }
        }
        enc::end_element(writer, body)?;
    }

    if opts.strict {
        empty(writer, body, "strict")?;
    }

    enc::end_element(writer, body)?;
    enc::end_document(writer, body)
}
