//! Chunk records shared by the scanner and the parser.
//!
//! A scan yields a tree: blocks at the top, then messages, records or
//! entries, then record fields. Every node is a [`RawChunk`].

use crate::error::{ScanStop, ScanWarning};
use crate::scanner::{FileHeader, MessageHeader};
use crate::tags::ChunkKind;
use bytes::Bytes;
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Header values of a chunk that are not part of its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkMeta {
    /// Nothing beyond tag and length
    #[default]
    None,
    /// Block header word of unknown meaning
    Block {
        /// The `x` word of the block header
        x: u32,
    },
    /// Full message header
    Message(MessageHeader),
    /// Second byte of a record
    Record {
        /// Non-zero when fields follow
        count: u8,
    },
    /// Field code
    Field {
        /// Code following the field type
        code: u64,
    },
}

/// One delimited item as found in the byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    /// Structural kind
    pub kind: ChunkKind,
    /// Type as declared in the stream: block type, field type or record
    /// marker; zero for messages and entries, which declare none
    pub tag: u32,
    /// Header values besides the tag
    pub meta: ChunkMeta,
    /// Offset of the chunk start in the source stream
    pub offset: usize,
    /// Payload bytes, header and length bytes excluded
    pub payload: Bytes,
    /// Decoded sub-chunks (blocks, messages and records), empty for fields
    pub children: Vec<RawChunk>,
    /// True if decoding of the children stopped early
    pub children_partial: bool,
}

impl RawChunk {
    /// Creates a leaf chunk
    pub fn new(kind: ChunkKind, tag: u32, offset: usize, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            tag,
            meta: ChunkMeta::None,
            offset,
            payload: payload.into(),
            children: Vec::new(),
            children_partial: false,
        }
    }

    /// Attaches header values
    pub fn with_meta(mut self, meta: ChunkMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Attaches decoded sub-chunks
    pub fn with_children(mut self, children: Vec<RawChunk>, partial: bool) -> Self {
        self.children = children;
        self.children_partial = partial;
        self
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns true if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Returns the payload as a slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Returns a lightweight reference to this chunk
    pub fn chunk_ref(&self) -> ChunkRef {
        ChunkRef {
            tag: self.tag,
            offset: self.offset,
        }
    }

    /// Returns the direct child at `index`
    pub fn child(&self, index: usize) -> Option<&RawChunk> {
        self.children.get(index)
    }

    /// Message header, for message chunks
    pub fn message_header(&self) -> Option<MessageHeader> {
        match self.meta {
            ChunkMeta::Message(header) => Some(header),
            _ => None,
        }
    }
}

// Payload bytes stay out of serialized output; only the location is exposed.
impl Serialize for RawChunk {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RawChunk", 4)?;
        state.serialize_field("tag", &self.tag)?;
        state.serialize_field("kind", &self.kind)?;
        state.serialize_field("offset", &self.offset)?;
        state.serialize_field("len", &self.payload.len())?;
        state.end()
    }
}

/// Back-reference from a decoded event to the chunk it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct ChunkRef {
    /// Declared type of the chunk
    pub tag: u32,
    /// Offset of the chunk start in the source stream
    pub offset: usize,
}

/// What the scanner noticed besides the chunks themselves
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanDiagnostics {
    /// Whether the configured file signature was present
    pub signature_found: bool,
    /// Decoded file header, if the signature was found and complete
    pub header: Option<FileHeader>,
    /// Every place where scanning stopped early, innermost level first
    pub stops: Vec<ScanStop>,
    /// Structural oddities that did not stop scanning
    pub warnings: Vec<ScanWarning>,
}

impl ScanDiagnostics {
    /// Types the table did not know, with their offsets
    pub fn unrecognized_tags(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.stops.iter().filter_map(|stop| match *stop {
            ScanStop::UnrecognizedTag { offset, tag } => Some((offset, tag)),
            _ => None,
        })
    }

    /// Number of warnings
    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

/// Result of scanning one byte stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Blocks in stream order
    pub chunks: Vec<RawChunk>,
    /// True if any level of the stream could not be consumed completely
    pub partial: bool,
    /// Details about header, early stops and warnings
    pub diagnostics: ScanDiagnostics,
}

impl ScanOutcome {
    /// Number of blocks
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true if no block was decoded
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total number of chunks, nested ones included
    pub fn total_chunks(&self) -> usize {
        fn count(chunks: &[RawChunk]) -> usize {
            chunks.iter().map(|c| 1 + count(&c.children)).sum()
        }
        count(&self.chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::{BlockLayout, FieldKind};

    fn record() -> RawChunk {
        RawChunk::new(ChunkKind::Record, 0x41, 16, vec![0u8; 4])
            .with_meta(ChunkMeta::Record { count: 1 })
            .with_children(
                vec![
                    RawChunk::new(ChunkKind::Field(FieldKind::Text), 3, 18, b"a".to_vec()),
                    RawChunk::new(ChunkKind::Field(FieldKind::EndOfRecord), 5, 21, Vec::new()),
                ],
                false,
            )
    }

    #[test]
    fn test_child_lookup() {
        let record = record();
        assert_eq!(record.child(0).map(|c| c.as_bytes()), Some(&b"a"[..]));
        assert!(record.child(2).is_none());
        assert_eq!(record.chunk_ref(), ChunkRef { tag: 0x41, offset: 16 });
        assert_eq!(record.message_header(), None);
    }

    #[test]
    fn test_total_chunks_counts_nested() {
        let outcome = ScanOutcome {
            chunks: vec![
                RawChunk::new(ChunkKind::Block(BlockLayout::Records), 1, 0, vec![0u8; 6])
                    .with_children(vec![record()], false),
                RawChunk::new(ChunkKind::Block(BlockLayout::Entries), 5, 22, Vec::new()),
            ],
            ..Default::default()
        };
        assert_eq!(outcome.len(), 2);
        assert_eq!(outcome.total_chunks(), 5);
    }

    #[test]
    fn test_unrecognized_tags_filter() {
        let diagnostics = ScanDiagnostics {
            stops: vec![
                ScanStop::MalformedLength { offset: 1 },
                ScanStop::UnrecognizedTag { offset: 9, tag: 2 },
            ],
            warnings: vec![ScanWarning::HeaderPadding],
            ..Default::default()
        };
        assert_eq!(diagnostics.unrecognized_tags().collect::<Vec<_>>(), vec![(9, 2)]);
        assert_eq!(diagnostics.warning_count(), 1);
    }
}
