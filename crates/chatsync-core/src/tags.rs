//! The tag table: which block and field types exist and what they mean.
//!
//! Nothing about the chatsync format is published. The type values below
//! were inferred from sample files, so they live in a runtime table rather
//! than in `match` arms. New observations can be added with
//! [`TagTable::with_block`] / [`TagTable::with_field`] or parsed from
//! `block:N=role:layout` and `field:N=encoding` strings.
//!
//! Block types (the `type` word of a block header):
//!
//! | type | role         | layout   |
//! |------|--------------|----------|
//! | 1    | participants | records  |
//! | 2    | opaque       | records  |
//! | 3    | opaque       | records  |
//! | 4    | opaque       | records  |
//! | 5    | opaque       | entries  |
//! | 6    | conversation | messages |
//!
//! Field types (the first byte of a record field):
//!
//! | type | encoding      |
//! |------|---------------|
//! | 0    | varint        |
//! | 1    | fixed64       |
//! | 3    | text          |
//! | 4    | blob          |
//! | 5    | end-of-record |
//! | 6    | varint-list   |

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// How the data of a block is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockLayout {
    /// A sequence of records
    Records,
    /// Fixed 16-byte entries of four little-endian `u32`
    Entries,
    /// A sequence of messages, each a header followed by records
    Messages,
}

impl BlockLayout {
    /// Every layout
    pub const ALL: [BlockLayout; 3] = [Self::Records, Self::Entries, Self::Messages];

    /// Returns the name used in tag specifications
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Records => "records",
            Self::Entries => "entries",
            Self::Messages => "messages",
        }
    }
}

/// How the value of a record field is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// 7-bit varint
    Varint,
    /// Eight raw bytes
    Fixed64,
    /// NUL-terminated string
    Text,
    /// Varint length followed by that many bytes
    Blob,
    /// No value; closes the record
    EndOfRecord,
    /// Varint count followed by that many varints
    VarintList,
}

impl FieldKind {
    /// Every encoding
    pub const ALL: [FieldKind; 6] = [
        Self::Varint,
        Self::Fixed64,
        Self::Text,
        Self::Blob,
        Self::EndOfRecord,
        Self::VarintList,
    ];

    /// Returns the name used in tag specifications
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Varint => "varint",
            Self::Fixed64 => "fixed64",
            Self::Text => "text",
            Self::Blob => "blob",
            Self::EndOfRecord => "end-of-record",
            Self::VarintList => "varint-list",
        }
    }
}

/// Semantic role of a block, as far as it is understood
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkRole {
    /// First record carries the participant roster
    Participants,
    /// Holds the messages
    Conversation,
    /// Observed in files, meaning unknown
    Opaque,
}

impl ChunkRole {
    /// Every role
    pub const ALL: [ChunkRole; 3] = [Self::Participants, Self::Conversation, Self::Opaque];

    /// Returns the name used in tag specifications
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Participants => "participants",
            Self::Conversation => "conversation",
            Self::Opaque => "opaque",
        }
    }
}

macro_rules! named_enum {
    ($ty:ident, $what:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                $ty::ALL
                    .into_iter()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| Error::invalid_tag_spec(s, concat!("unknown ", $what)))
            }
        }
    };
}

named_enum!(BlockLayout, "layout");
named_enum!(FieldKind, "encoding");
named_enum!(ChunkRole, "role");

/// Structural kind of a scanned chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    /// A block; its children follow the layout
    Block(BlockLayout),
    /// A message inside a message block; its children are records
    Message,
    /// A record; its children are fields
    Record,
    /// A fixed 16-byte entry
    Entry,
    /// A record field
    Field(FieldKind),
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block(layout) => write!(f, "block/{}", layout),
            Self::Message => f.write_str("message"),
            Self::Record => f.write_str("record"),
            Self::Entry => f.write_str("entry"),
            Self::Field(kind) => write!(f, "field/{}", kind),
        }
    }
}

impl serde::Serialize for ChunkKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// What the table knows about a block type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpec {
    /// Semantic role
    pub role: ChunkRole,
    /// Data layout
    pub layout: BlockLayout,
}

impl BlockSpec {
    /// Creates a new block spec
    pub fn new(role: ChunkRole, layout: BlockLayout) -> Self {
        Self { role, layout }
    }
}

/// One table entry as accepted on the command line.
///
/// `block:7=opaque:records` adds a block type, `field:2=varint` a field
/// type. Values may be decimal or `0x` hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOverride {
    /// Block type entry
    Block {
        /// Block type word
        tag: u32,
        /// What the block holds
        spec: BlockSpec,
    },
    /// Field type entry
    Field {
        /// Field type byte
        tag: u8,
        /// How the value is encoded
        kind: FieldKind,
    },
}

fn parse_number<T: TryFrom<u64>>(s: &str, text: &str) -> Result<T> {
    let text = text.trim();
    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse::<u64>(),
    }
    .map_err(|e| Error::invalid_tag_spec(s, format!("bad type value: {}", e)))?;
    T::try_from(value).map_err(|_| Error::invalid_tag_spec(s, "type value out of range"))
}

impl FromStr for TagOverride {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        const USAGE: &str = "expected block:N=role:layout or field:N=encoding";

        let (target, rest) = s
            .split_once(':')
            .ok_or_else(|| Error::invalid_tag_spec(s, USAGE))?;
        let (tag, value) = rest
            .split_once('=')
            .ok_or_else(|| Error::invalid_tag_spec(s, USAGE))?;

        match target.trim() {
            "block" => {
                let (role, layout) = value
                    .split_once(':')
                    .ok_or_else(|| Error::invalid_tag_spec(s, USAGE))?;
                Ok(Self::Block {
                    tag: parse_number(s, tag)?,
                    spec: BlockSpec::new(role.trim().parse()?, layout.trim().parse()?),
                })
            }
            "field" => Ok(Self::Field {
                tag: parse_number(s, tag)?,
                kind: value.trim().parse()?,
            }),
            _ => Err(Error::invalid_tag_spec(s, USAGE)),
        }
    }
}

/// Block and field types the scanner and parser recognize
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagTable {
    blocks: BTreeMap<u32, BlockSpec>,
    fields: BTreeMap<u8, FieldKind>,
}

impl Default for TagTable {
    fn default() -> Self {
        use BlockLayout::*;
        use ChunkRole::*;

        Self::empty()
            .with_block(1, Participants, Records)
            .with_block(2, Opaque, Records)
            .with_block(3, Opaque, Records)
            .with_block(4, Opaque, Records)
            .with_block(5, Opaque, Entries)
            .with_block(6, Conversation, Messages)
            .with_field(0, FieldKind::Varint)
            .with_field(1, FieldKind::Fixed64)
            .with_field(3, FieldKind::Text)
            .with_field(4, FieldKind::Blob)
            .with_field(5, FieldKind::EndOfRecord)
            .with_field(6, FieldKind::VarintList)
    }
}

impl TagTable {
    /// Creates the table of all types observed so far
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table that recognizes nothing
    pub fn empty() -> Self {
        Self {
            blocks: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds or replaces a block type
    pub fn with_block(mut self, tag: u32, role: ChunkRole, layout: BlockLayout) -> Self {
        self.blocks.insert(tag, BlockSpec::new(role, layout));
        self
    }

    /// Adds or replaces a field type
    pub fn with_field(mut self, tag: u8, kind: FieldKind) -> Self {
        self.fields.insert(tag, kind);
        self
    }

    /// Applies a parsed override
    pub fn with_override(mut self, entry: TagOverride) -> Self {
        self.apply(entry);
        self
    }

    /// Removes a block type so that the scanner treats it as unrecognized
    pub fn without_block(mut self, tag: u32) -> Self {
        self.blocks.remove(&tag);
        self
    }

    /// Removes a field type so that the scanner treats it as unrecognized
    pub fn without_field(mut self, tag: u8) -> Self {
        self.fields.remove(&tag);
        self
    }

    /// Applies a parsed override in place
    pub fn apply(&mut self, entry: TagOverride) {
        match entry {
            TagOverride::Block { tag, spec } => {
                self.blocks.insert(tag, spec);
            }
            TagOverride::Field { tag, kind } => {
                self.fields.insert(tag, kind);
            }
        }
    }

    /// Looks up a block type
    pub fn block(&self, tag: u32) -> Option<BlockSpec> {
        self.blocks.get(&tag).copied()
    }

    /// Looks up a field type
    pub fn field(&self, tag: u8) -> Option<FieldKind> {
        self.fields.get(&tag).copied()
    }

    /// Lowest block type with the given role and layout
    pub fn block_tag_for(&self, role: ChunkRole, layout: BlockLayout) -> Option<u32> {
        self.blocks
            .iter()
            .find(|(_, spec)| spec.role == role && spec.layout == layout)
            .map(|(tag, _)| *tag)
    }

    /// Lowest field type with the given encoding
    pub fn field_tag_for(&self, kind: FieldKind) -> Option<u8> {
        self.fields
            .iter()
            .find(|(_, k)| **k == kind)
            .map(|(tag, _)| *tag)
    }

    /// Block types in ascending order
    pub fn blocks(&self) -> impl Iterator<Item = (u32, BlockSpec)> + '_ {
        self.blocks.iter().map(|(tag, spec)| (*tag, *spec))
    }

    /// Field types in ascending order
    pub fn fields(&self) -> impl Iterator<Item = (u8, FieldKind)> + '_ {
        self.fields.iter().map(|(tag, kind)| (*tag, *kind))
    }

    /// Number of known block types; a well-formed file has one block of each
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns true if neither block nor field types are known
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let table = TagTable::default();
        assert_eq!(
            table.block(6),
            Some(BlockSpec::new(ChunkRole::Conversation, BlockLayout::Messages))
        );
        assert_eq!(table.block(5).map(|s| s.layout), Some(BlockLayout::Entries));
        assert_eq!(table.block(7), None);
        assert_eq!(table.field(3), Some(FieldKind::Text));
        assert_eq!(table.field(2), None);
        assert_eq!(table.field_tag_for(FieldKind::Blob), Some(4));
        assert_eq!(
            table.block_tag_for(ChunkRole::Participants, BlockLayout::Records),
            Some(1)
        );
        assert_eq!(table.block_count(), 6);
    }

    #[test]
    fn test_parse_block_override() {
        let entry: TagOverride = "block:0x7=opaque:records".parse().unwrap();
        assert_eq!(
            entry,
            TagOverride::Block {
                tag: 7,
                spec: BlockSpec::new(ChunkRole::Opaque, BlockLayout::Records),
            }
        );

        let entry: TagOverride = "block: 9 = conversation : messages".parse().unwrap();
        assert!(matches!(entry, TagOverride::Block { tag: 9, .. }));
    }

    #[test]
    fn test_parse_field_override() {
        let entry: TagOverride = "field:2=varint".parse().unwrap();
        assert_eq!(
            entry,
            TagOverride::Field {
                tag: 2,
                kind: FieldKind::Varint
            }
        );
    }

    #[test]
    fn test_parse_override_errors() {
        assert!("block:7".parse::<TagOverride>().is_err());
        assert!("block:7=opaque".parse::<TagOverride>().is_err());
        assert!("field:0x100=varint".parse::<TagOverride>().is_err());
        assert!("field:2=float".parse::<TagOverride>().is_err());
        assert!("block:7=sender:records".parse::<TagOverride>().is_err());
        assert!("chunk:7=varint".parse::<TagOverride>().is_err());
        assert!("7=opaque:records".parse::<TagOverride>().is_err());
    }

    #[test]
    fn test_override_and_removal() {
        let table = TagTable::default()
            .with_override("field:2=blob".parse().unwrap())
            .without_block(5);
        assert_eq!(table.field(2), Some(FieldKind::Blob));
        assert_eq!(table.block(5), None);
        assert_eq!(table.block_count(), 5);
    }

    #[test]
    fn test_names_round_trip() {
        for role in ChunkRole::ALL {
            assert_eq!(role.as_str().parse::<ChunkRole>().unwrap(), role);
        }
        for kind in FieldKind::ALL {
            assert_eq!(kind.to_string().parse::<FieldKind>().unwrap(), kind);
        }
        for layout in BlockLayout::ALL {
            assert_eq!(layout.as_str().parse::<BlockLayout>().unwrap(), layout);
        }
    }

    #[test]
    fn test_chunk_kind_display() {
        assert_eq!(ChunkKind::Block(BlockLayout::Messages).to_string(), "block/messages");
        assert_eq!(ChunkKind::Field(FieldKind::EndOfRecord).to_string(), "field/end-of-record");
        assert_eq!(ChunkKind::Record.to_string(), "record");
    }
}
