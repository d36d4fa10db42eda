//! Scanner and parser wired together for whole files.

use crate::chunk::ScanDiagnostics;
use crate::error::{Error, Result};
use crate::model::ConversationModel;
use crate::parser::{Parser, ParserConfig};
use crate::scanner::{ScanStrategy, Scanner, ScannerConfig};
use crate::tags::TagTable;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

/// How much of a file could be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStatus {
    /// The whole stream was consumed
    Complete,
    /// Some blocks decoded, the rest of the stream did not
    Partial,
    /// The file could not be read or yielded no blocks at all
    Unreadable,
}

impl DecodeStatus {
    /// Returns the lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeStatus::Complete => "complete",
            DecodeStatus::Partial => "partial",
            DecodeStatus::Unreadable => "unreadable",
        }
    }
}

impl fmt::Display for DecodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Result of decoding one byte stream
#[derive(Debug, Clone)]
pub struct Decoded {
    /// The recovered conversation
    pub model: ConversationModel,
    /// Completeness of the decode
    pub status: DecodeStatus,
    /// Number of blocks decoded
    pub chunk_count: usize,
    /// What the scanner noticed
    pub diagnostics: ScanDiagnostics,
    /// Short blake3 digest of the input bytes
    pub digest: String,
}

/// Scanner plus parser with a shared tag table
#[derive(Clone)]
pub struct Decoder {
    scanner: Arc<dyn ScanStrategy>,
    parser: Parser,
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("parser", &self.parser)
            .finish_non_exhaustive()
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// Creates a decoder with the default tag table
    pub fn new() -> Self {
        Self::with_tags(TagTable::default())
    }

    /// Creates a decoder whose scanner and parser share `tags`
    pub fn with_tags(tags: TagTable) -> Self {
        let tags = Arc::new(tags);
        Self::from_configs(
            ScannerConfig::new().tags(Arc::clone(&tags)),
            ParserConfig::new().tags(tags),
        )
    }

    /// Creates a decoder from explicit configurations
    pub fn from_configs(scanner: ScannerConfig, parser: ParserConfig) -> Self {
        Self {
            scanner: Arc::new(Scanner::with_config(scanner)),
            parser: Parser::with_config(parser),
        }
    }

    /// Creates a decoder with a custom scanning strategy
    pub fn from_parts(scanner: impl ScanStrategy + 'static, parser: Parser) -> Self {
        Self {
            scanner: Arc::new(scanner),
            parser,
        }
    }

    /// Returns the parser
    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    /// Decode an in-memory stream
    pub fn decode_bytes(&self, data: Bytes) -> Decoded {
        let digest = short_digest(&data);
        let outcome = self.scanner.scan_bytes(data);
        let model = self.parser.parse(&outcome);

        let status = if outcome.is_empty() {
            DecodeStatus::Unreadable
        } else if outcome.partial {
            DecodeStatus::Partial
        } else {
            DecodeStatus::Complete
        };
        trace!("Decoded stream {} as {}", digest, status);

        Decoded {
            model,
            status,
            chunk_count: outcome.len(),
            diagnostics: outcome.diagnostics,
            digest,
        }
    }

    /// Read and decode a file.
    ///
    /// Only I/O failures are errors; a file with no decodable blocks comes
    /// back with [`DecodeStatus::Unreadable`].
    pub fn decode_file(&self, path: impl AsRef<Path>) -> Result<Decoded> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
        debug!("Read {} bytes from {}", data.len(), path.display());
        Ok(self.decode_bytes(Bytes::from(data)))
    }
}

/// First 16 hex characters of the blake3 hash
pub fn short_digest(data: &[u8]) -> String {
    blake3::hash(data).to_hex()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_digest() {
        let a = short_digest(b"hello");
        assert_eq!(a, short_digest(b"hello"));
        assert_ne!(a, short_digest(b"world"));
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_garbage_is_unreadable() {
        let decoded = Decoder::new().decode_bytes(Bytes::from_static(b"\xEE\xEE\xEE"));
        assert_eq!(decoded.status, DecodeStatus::Unreadable);
        assert!(decoded.model.is_empty());
    }

    #[test]
    fn test_decode_missing_file() {
        assert!(Decoder::new().decode_file("/no/such/file.dat").is_err());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(DecodeStatus::Partial.to_string(), "partial");
    }
}
