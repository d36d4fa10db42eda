//! # chatsync-core
//!
//! A library for recovering conversations from the desktop client's
//! undocumented `chatsync/*.dat` files, including messages that were edited
//! or removed and no longer show up in the client.
//!
//! This crate provides the core functionality for:
//! - Scanning the binary stream into a tree of blocks, messages, records
//!   and fields
//! - Interpreting the chunks as a conversation: timestamp, participants and
//!   an ordered list of posted, edited and removed messages
//! - Walking a profile directory and decoding every file in it
//!
//! ## Architecture
//!
//! - [`scanner`]: byte stream to [`RawChunk`] tree, no semantics
//! - [`parser`]: chunk tree to [`ConversationModel`]
//! - [`tags`]: the block and field type table both stages are driven by
//! - [`profile`]: directory walking and per-file reports
//! - [`writer`]: encoder for building synthetic files
//! - [`error`]: error types and handling
//!
//! The format is reverse-engineered. Both stages degrade instead of failing:
//! the scanner returns whatever it decoded together with a `partial` flag,
//! the parser turns undecodable messages into [`MessageEvent::Unknown`].
//!
//! ## Example
//!
//! ```no_run
//! use chatsync_core::{DecodeStatus, ProfileWalker};
//!
//! let report = ProfileWalker::new().walk("./profile/chatsync")?;
//! for file in report.decoded() {
//!     println!("{} ({})", file.path.display(), file.status);
//!     for event in file.conversation() {
//!         println!("  {:?}", event);
//!     }
//! }
//! println!("{} unreadable", report.count(DecodeStatus::Unreadable));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! - [`TagTable`]: adjust block and field types as new samples are observed
//! - [`ScanStrategy`]: replace the scanning algorithm
//! - [`TimestampPolicy`] and [`UnrecognizedPolicy`]: change parser decisions
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod chunk;
pub mod decoder;
pub mod error;
pub mod model;
pub mod parser;
pub mod profile;
pub mod scanner;
pub mod tags;
pub mod writer;

// Re-export primary types for convenience
pub use chunk::{ChunkMeta, ChunkRef, RawChunk, ScanDiagnostics, ScanOutcome};
pub use decoder::{DecodeStatus, Decoded, Decoder};
pub use error::{Error, FieldError, Result, ScanStop, ScanWarning};
pub use model::{ConversationModel, MessageEvent, ParseStats};
pub use parser::{
    FirstWins, LastWins, Parser, ParserConfig, SkipAndContinue, StopParsing, TimestampPolicy,
    UnrecognizedPolicy,
};
pub use profile::{scan_profile_dir, FileReport, ProfileReport, ProfileWalker, WalkerConfig};
pub use scanner::{ScanStrategy, Scanner, ScannerConfig};
pub use tags::{
    BlockLayout, BlockSpec, ChunkKind, ChunkRole, FieldKind, TagOverride, TagTable,
};
pub use writer::ChatsyncWriter;

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
