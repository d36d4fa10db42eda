//! Error types for the chatsync-core library.
//!
//! Only I/O and configuration failures are reported as [`Error`]. Anomalies
//! in the byte stream itself never surface as errors: the scanner reports them
//! through [`ScanStop`] and the partial flag, the parser downgrades individual
//! events with [`FieldError`].

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for chatsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for operations that can actually fail
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to read from a non-file byte source
    #[error("failed to read input stream: {0}")]
    StreamRead(#[from] std::io::Error),

    /// Directory to walk does not exist or is not a directory
    #[error("not a directory: '{path}'")]
    NotADirectory {
        /// The offending path
        path: PathBuf,
    },

    /// Scanning produced no chunks at all
    #[error("no chunks could be decoded from '{path}'")]
    NoChunksFound {
        /// Path to the file
        path: PathBuf,
    },

    /// A writer section does not fit its 32-bit size field
    #[error("{what} of {len} bytes does not fit a 32-bit size field")]
    Oversized {
        /// Which section
        what: &'static str,
        /// Its length
        len: usize,
    },

    /// Invalid tag table entry
    #[error("invalid tag specification '{spec}': {details}")]
    InvalidTagSpec {
        /// The override string as given
        spec: String,
        /// What is wrong with it
        details: String,
    },
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new not-a-directory error
    pub fn not_a_directory(path: impl Into<PathBuf>) -> Self {
        Self::NotADirectory { path: path.into() }
    }

    /// Creates a new empty-scan error
    pub fn no_chunks_found(path: impl Into<PathBuf>) -> Self {
        Self::NoChunksFound { path: path.into() }
    }

    /// Creates a new tag specification error
    pub fn invalid_tag_spec(spec: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidTagSpec {
            spec: spec.into(),
            details: details.into(),
        }
    }

    /// Creates a new oversize error
    pub fn oversized(what: &'static str, len: usize) -> Self {
        Self::Oversized { what, len }
    }

    /// Returns true if the failure is scoped to a single file and a batch
    /// operation should carry on with the next one
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::FileRead { .. } | Self::StreamRead(_) | Self::NoChunksFound { .. }
        )
    }
}

/// Why the scanner stopped before consuming a whole level of the stream
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ScanStop {
    /// A header, size or value ran past the end of the available bytes
    #[error("stream truncated at offset {offset}: need {needed} bytes, have {available}")]
    Truncated {
        /// Offset of the item that could not be completed
        offset: usize,
        /// Bytes the item needs (header plus data)
        needed: usize,
        /// Bytes actually remaining at that point
        available: usize,
    },

    /// A varint had the continuation bit set on more than ten bytes
    #[error("malformed varint at offset {offset}")]
    MalformedLength {
        /// Offset of the varint
        offset: usize,
    },

    /// A block or field type is not present in the tag table
    #[error("unrecognized type {tag} at offset {offset}")]
    UnrecognizedTag {
        /// Offset of the block header or field
        offset: usize,
        /// The type value
        tag: u32,
    },

    /// A record did not start with the record marker
    #[error("expected record marker at offset {offset}, found 0x{found:02x}")]
    MissingRecordMarker {
        /// Offset where the record should start
        offset: usize,
        /// The byte found instead
        found: u8,
    },

    /// The file does not hold exactly one conversation block
    #[error("expected one conversation block, found {found}")]
    ConversationBlocks {
        /// Number of conversation blocks found
        found: usize,
    },
}

impl ScanStop {
    /// Offset in the source stream where scanning stopped, if the stop is
    /// tied to a position
    pub fn offset(&self) -> Option<usize> {
        match *self {
            Self::Truncated { offset, .. }
            | Self::MalformedLength { offset }
            | Self::UnrecognizedTag { offset, .. }
            | Self::MissingRecordMarker { offset, .. } => Some(offset),
            Self::ConversationBlocks { .. } => None,
        }
    }
}

/// A structural oddity that does not stop scanning
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum ScanWarning {
    /// The file header padding is not all zero
    #[error("file header padding not all zeroes")]
    HeaderPadding,

    /// A block header padding is not all zero
    #[error("block header padding at offset {offset} not all zeroes")]
    BlockPadding {
        /// Offset of the block header
        offset: usize,
    },

    /// The file does not hold one block per known block type
    #[error("found {found} blocks, expected {expected}")]
    BlockCount {
        /// Blocks found
        found: usize,
        /// Known block types
        expected: usize,
    },

    /// The block count is right but some types are missing
    #[error("block types missing: {missing:?}")]
    MissingBlockTypes {
        /// Known types that did not occur
        missing: Vec<u32>,
    },

    /// An entry block's size is not a multiple of the entry size
    #[error("{len} trailing bytes in entry block at offset {offset}")]
    TrailingEntryBytes {
        /// Offset of the block header
        offset: usize,
        /// Bytes that do not form a whole entry
        len: usize,
    },
}

/// A sub-field of a recognized chunk could not be interpreted.
///
/// Never escapes the parser: the affected event becomes
/// [`MessageEvent::Unknown`](crate::model::MessageEvent::Unknown).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// A message has fewer records than the text record needs
    #[error("message has no record #{0}")]
    MissingRecord(usize),

    /// A record lacks a field at the expected position
    #[error("missing {0} field")]
    Missing(&'static str),

    /// The field does not have the encoding its position requires
    #[error("{what} field is not {expected}")]
    WrongKind {
        /// Which field
        what: &'static str,
        /// Encoding name the position requires
        expected: &'static str,
    },

    /// A varint value could not be decoded
    #[error("malformed varint in {0} field")]
    MalformedVarint(&'static str),

    /// The message blob carries neither text marker
    #[error("no text marker in message blob")]
    NoTextMarker,

    /// Text is not valid UTF-8
    #[error("{0} is not valid UTF-8")]
    InvalidText(&'static str),

    /// The author id does not map to a known participant
    #[error("author not resolvable ({known} participants known)")]
    UnknownAuthor {
        /// Number of participants known when the message was decoded
        known: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_a_directory("/tmp/nope");
        assert!(err.to_string().contains("not a directory"));
        assert!(err.to_string().contains("/tmp/nope"));
    }

    #[test]
    fn test_is_recoverable() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(Error::file_read("/x.dat", io).is_recoverable());
        assert!(Error::no_chunks_found("/x.dat").is_recoverable());
        assert!(!Error::not_a_directory("/x").is_recoverable());
        assert!(!Error::invalid_tag_spec("zz", "bad").is_recoverable());
    }

    #[test]
    fn test_scan_stop_offset() {
        let stop = ScanStop::UnrecognizedTag { offset: 42, tag: 9 };
        assert_eq!(stop.offset(), Some(42));
        assert!(stop.to_string().contains("type 9"));
        assert_eq!(ScanStop::ConversationBlocks { found: 0 }.offset(), None);
    }

    #[test]
    fn test_malformed_length_display() {
        let stop = ScanStop::MalformedLength { offset: 5 };
        assert_eq!(stop.to_string(), "malformed varint at offset 5");
    }

    #[test]
    fn test_warning_serializes_with_kind() {
        let warning = ScanWarning::BlockPadding { offset: 48 };
        let json = serde_json::to_string(&warning).unwrap();
        assert_eq!(json, r#"{"warning":"block_padding","offset":48}"#);
    }
}
