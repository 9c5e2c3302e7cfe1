#![forbid(unsafe_code)]
pub mod bitstream;
pub(crate) mod body;
pub mod grammar;
pub mod header;
pub mod options;
pub mod parser;
pub mod schema;
pub mod serializer;
pub mod string_tables;
pub mod values;

#[cfg(test)]
mod test;

use std::fmt;

use serde::Serialize;

/// Closed set of failure kinds surfaced by the processor.
///
/// Errors travel as [`anyhow::Error`]; the kind is recovered with
/// `err.downcast_ref::<ExiError>()`. Only [`ExiError::BufferEnd`] is locally
/// recoverable, and only inside the bit codec when the byte source can still
/// produce data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExiError {
    /// Byte source exhausted mid-value.
    BufferEnd,
    /// Cookie or distinguishing bits wrong.
    InvalidHeader,
    /// Event-code escape past the last part, out-of-range table id,
    /// non-finite float with an illegal mantissa, and the like.
    InvalidInput,
    /// Event issued that the current grammar rule cannot produce, or a pop
    /// demanded from an empty grammar stack.
    InconsistentProcState,
    /// Allocation failed while growing a stream-owned table.
    OutOfMemory,
    /// Value-partition hash index construction failed.
    HashTableError,
    /// A content-handler callback returned [`HandlerAction::Stop`].
    ///
    /// [`HandlerAction::Stop`]: crate::parser::HandlerAction::Stop
    HandlerStop,
    /// Reserved path: compression, self-contained, datatype representation
    /// maps.
    NotImplemented,
    /// Options contradict the schema-id mode given at stream init.
    InvalidConfiguration,
    /// Required input missing.
    MissingInput,
    /// Default, uninitialised.
    Unexpected,
}

impl fmt::Display for ExiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ExiError::BufferEnd => "byte source exhausted mid-value",
            ExiError::InvalidHeader => "invalid EXI header",
            ExiError::InvalidInput => "invalid EXI input",
            ExiError::InconsistentProcState => "inconsistent processor state",
            ExiError::OutOfMemory => "out of memory",
            ExiError::HashTableError => "value hash index error",
            ExiError::HandlerStop => "content handler requested stop",
            ExiError::NotImplemented => "not implemented",
            ExiError::InvalidConfiguration => "invalid stream configuration",
            ExiError::MissingInput => "required input missing",
            ExiError::Unexpected => "unexpected error",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ExiError {}

/// Kind of an [`anyhow::Error`] produced by this crate.
pub fn error_kind(err: &anyhow::Error) -> ExiError {
    err.downcast_ref::<ExiError>()
        .copied()
        .unwrap_or(ExiError::Unexpected)
}

/// Qualified name as exchanged with the application.
///
/// The strings are owned copies; the string tables keep their own rows and
/// the ids assigned there never rebind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct QName {
    pub uri: String,
    pub local_name: String,
    /// Only populated when `preserve.prefixes` is in effect.
    pub prefix: Option<String>,
}

impl QName {
    pub fn new(uri: impl Into<String>, local_name: impl Into<String>) -> Self {
        QName {
            uri: uri.into(),
            local_name: local_name.into(),
            prefix: None,
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.uri.is_empty() {
            write!(f, "{}", self.local_name)
        } else {
            write!(f, "{{{}}}{}", self.uri, self.local_name)
        }
    }
}

/// Compact qualified-name identifier: indexes into the URI partition and
/// that row's local-name partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct QNameId {
    pub uri: u16,
    pub ln: usize,
}

impl QNameId {
    pub fn new(uri: u16, ln: usize) -> Self {
        QNameId { uri, ln }
    }
}

/// Number of bits needed to pick one of `choices` values, 0 when the choice
/// is implicit.
pub(crate) fn bits_for(choices: usize) -> u8 {
    match choices {
        0 | 1 => 0,
        n => (usize::BITS - (n - 1).leading_zeros()) as u8,
    }
}

#[cfg(test)]
mod lib_test {
    use super::*;

    #[test]
    fn bits_for_choice_counts() {
        assert_eq!(bits_for(0), 0);
        assert_eq!(bits_for(1), 0);
        assert_eq!(bits_for(2), 1);
        assert_eq!(bits_for(3), 2);
        assert_eq!(bits_for(4), 2);
        assert_eq!(bits_for(5), 3);
        assert_eq!(bits_for(256), 8);
        assert_eq!(bits_for(257), 9);
    }

    #[test]
    fn error_kind_recovers_from_anyhow() {
        let err = anyhow::Error::new(ExiError::BufferEnd);
        assert_eq!(error_kind(&err), ExiError::BufferEnd);
        let other = anyhow::anyhow!("something else");
        assert_eq!(error_kind(&other), ExiError::Unexpected);
    }
}
