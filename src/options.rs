use serde::Serialize;

/// Body alignment. A two-valued wire field in the options document; held as
/// a proper enum rather than mask bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Alignment {
    #[default]
    BitPacked,
    ByteAligned,
    PreCompression,
}

/// Fidelity options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Preserve {
    pub comments: bool,
    pub pis: bool,
    pub dtd: bool,
    pub prefixes: bool,
    pub lexical_values: bool,
}

impl Preserve {
    pub fn any(&self) -> bool {
        self.comments
            || self.pis
            || self.dtd
            || self.prefixes
            || self.lexical_values
    }
}

/// The schemaId option states. `Nil` discards any bound schema, `Empty`
/// processes with the XSD built-in type grammars only, `Set` carries an
/// opaque identifier the core retains but does not interpret.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub enum SchemaId {
    #[default]
    Absent,
    Set(String),
    Nil,
    Empty,
}

pub const DEFAULT_BLOCK_SIZE: u32 = 1_000_000;

/// Minimum value-partition capacity before the encoder bothers building a
/// hash index; a full scan wins below this.
pub const VALUE_HASH_THRESHOLD: usize = 50;

/// EXI stream options. Unbounded limits are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Options {
    pub alignment: Alignment,
    pub compression: bool,
    pub strict: bool,
    pub fragment: bool,
    pub self_contained: bool,
    pub preserve: Preserve,
    pub block_size: u32,
    pub value_max_length: Option<usize>,
    pub value_partition_capacity: Option<usize>,
    pub schema_id: SchemaId,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            alignment: Alignment::BitPacked,
            compression: false,
            strict: false,
            fragment: false,
            self_contained: false,
            preserve: Preserve::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            value_max_length: None,
            value_partition_capacity: None,
            schema_id: SchemaId::Absent,
        }
    }
}

impl Options {
    /// Whether n-bit integers in the body take whole bytes.
    pub fn byte_oriented(&self) -> bool {
        self.compression || self.alignment != Alignment::BitPacked
    }

    /// Whether a value string of `len` characters enters the partitions.
    pub fn retains_value(&self, len: usize, global_count: usize) -> bool {
        len > 0
            && self.value_max_length.map_or(true, |max| len <= max)
            && self
                .value_partition_capacity
                .map_or(true, |cap| cap > 0 && global_count < cap)
    }

    /// Hash-index policy for the global value partition: only worth it for
    /// large partitions, and only when values are retained at all.
    pub fn wants_value_hash(&self) -> bool {
        self.value_partition_capacity
            .map_or(true, |cap| cap > VALUE_HASH_THRESHOLD)
            && self.value_max_length.map_or(true, |max| max > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let opts = Options::default();
        insta::assert_debug_snapshot!(opts, @r###"
        Options {
            alignment: BitPacked,
            compression: false,
            strict: false,
            fragment: false,
            self_contained: false,
            preserve: Preserve {
                comments: false,
                pis: false,
                dtd: false,
                prefixes: false,
                lexical_values: false,
            },
            block_size: 1000000,
            value_max_length: None,
            value_partition_capacity: None,
            schema_id: Absent,
        }
        "###);
        assert!(!opts.byte_oriented());
        assert!(opts.wants_value_hash());
    }

    #[test]
    fn value_retention_policy() {
        let mut opts = Options::default();
        assert!(opts.retains_value(10, 0));
        assert!(!opts.retains_value(0, 0));

        opts.value_max_length = Some(5);
        assert!(!opts.retains_value(10, 0));
        assert!(opts.retains_value(5, 0));

        opts.value_partition_capacity = Some(2);
        assert!(opts.retains_value(3, 1));
        assert!(!opts.retains_value(3, 2));
        assert!(!opts.wants_value_hash());
    }
}
