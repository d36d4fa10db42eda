//! Binary scanning module: byte stream to chunk tree.
//!
//! The scanner knows how items are delimited and which block and field types
//! exist, but nothing about conversations.
//!
//! ## Algorithm Overview
//!
//! 1. Check for the file signature and decode the fixed header
//! 2. Read blocks (16-byte header plus data) up to the declared data size
//! 3. Split each block's data by its layout: records, fixed entries, or
//!    messages that themselves hold records
//! 4. Split records into fields, up to the end-of-record field
//!
//! Malformed input never fails the scan. An anomaly stops the sequence it
//! occurs in; the enclosing block or message has a declared size, so the
//! level above carries on. Whatever was decoded is returned and
//! [`ScanOutcome::partial`] is set.
//!
//! ## Extensibility
//!
//! The [`ScanStrategy`] trait allows custom scanning algorithms:
//!
//! ```no_run
//! use bytes::Bytes;
//! use chatsync_core::scanner::ScanStrategy;
//! use chatsync_core::ScanOutcome;
//!
//! struct NothingScanner;
//!
//! impl ScanStrategy for NothingScanner {
//!     fn scan_bytes(&self, _data: Bytes) -> ScanOutcome {
//!         ScanOutcome::default()
//!     }
//! }
//! ```

mod wire;

use crate::chunk::{ChunkMeta, RawChunk, ScanDiagnostics, ScanOutcome};
use crate::error::{Error, Result, ScanStop, ScanWarning};
use crate::tags::{BlockLayout, ChunkKind, FieldKind, TagTable};
use bytes::Bytes;
use std::collections::BTreeSet;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub use wire::{
    decode_varint, encode_varint, read_varint, varint_len, BlockHeader, FileHeader,
    MessageHeader, VarintError, BLOCK_HEADER_LEN, DEFAULT_SIGNATURE, ENTRY_LEN,
    HEADER_PADDING_LEN, HEADER_TAIL_LEN, MAX_VARINT_LEN, MESSAGE_HEADER_LEN, RECORD_MARKER,
};

/// Configuration for the scanner
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Known block and field types
    pub tags: Arc<TagTable>,
    /// Expected file signature; `None` scans the input as a bare block sequence
    pub signature: Option<Vec<u8>>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            tags: Arc::new(TagTable::default()),
            signature: Some(DEFAULT_SIGNATURE.to_vec()),
        }
    }
}

impl ScannerConfig {
    /// Creates a new scanner config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tag table
    pub fn tags(mut self, tags: impl Into<Arc<TagTable>>) -> Self {
        self.tags = tags.into();
        self
    }

    /// Sets the expected file signature
    pub fn signature(mut self, signature: impl Into<Vec<u8>>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Treats input as a bare block sequence without file header
    pub fn headerless(mut self) -> Self {
        self.signature = None;
        self
    }
}

/// Trait for implementing custom scanning strategies
pub trait ScanStrategy: Send + Sync {
    /// Scan a complete in-memory stream
    fn scan_bytes(&self, data: Bytes) -> ScanOutcome;

    /// Scan a borrowed slice (copies it once)
    fn scan(&self, data: &[u8]) -> ScanOutcome {
        self.scan_bytes(Bytes::copy_from_slice(data))
    }

    /// Read a sequential source to its end, then scan it
    fn scan_reader(&self, mut reader: impl Read) -> Result<ScanOutcome>
    where
        Self: Sized,
    {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(self.scan_bytes(Bytes::from(data)))
    }
}

/// Primary scanner for chatsync files
#[derive(Debug, Clone)]
pub struct Scanner {
    config: ScannerConfig,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Items of one delimited area
struct Sequence {
    items: Vec<RawChunk>,
    partial: bool,
}

/// One area of the input: its bytes and their absolute offset
#[derive(Clone)]
struct Area {
    data: Bytes,
    base: usize,
}

impl Area {
    fn sub(&self, start: usize, len: usize) -> Area {
        Area {
            data: self.data.slice(start..start + len),
            base: self.base + start,
        }
    }

    fn remaining(&self, pos: usize) -> &[u8] {
        &self.data[pos..]
    }

    fn need(&self, pos: usize, needed: usize) -> std::result::Result<(), ScanStop> {
        let available = self.data.len() - pos;
        if needed > available {
            return Err(ScanStop::Truncated {
                offset: self.base + pos,
                needed,
                available,
            });
        }
        Ok(())
    }

    fn varint(&self, pos: usize) -> std::result::Result<(u64, usize), ScanStop> {
        read_varint(self.remaining(pos), self.base + pos)
    }
}

/// A record ends where its fields end, so a broken field also ends the
/// record sequence around it
struct RecordScan {
    chunk: RawChunk,
    end: usize,
    complete: bool,
}

/// Walks one input, collecting stops and warnings
struct Tokenizer<'a> {
    tags: &'a TagTable,
    diagnostics: &'a mut ScanDiagnostics,
}

impl Tokenizer<'_> {
    fn stop(&mut self, stop: ScanStop) {
        debug!("Scan stopped: {}", stop);
        self.diagnostics.stops.push(stop);
    }

    fn warn(&mut self, warning: ScanWarning) {
        warn!("{}", warning);
        self.diagnostics.warnings.push(warning);
    }

    fn blocks(&mut self, area: &Area) -> Sequence {
        let mut items = Vec::new();
        let mut pos = 0;
        while pos < area.data.len() {
            match self.block(area, pos) {
                Ok((block, end)) => {
                    items.push(block);
                    pos = end;
                }
                Err(stop) => {
                    self.stop(stop);
                    return Sequence {
                        items,
                        partial: true,
                    };
                }
            }
        }
        Sequence {
            items,
            partial: false,
        }
    }

    fn block(&mut self, area: &Area, pos: usize) -> std::result::Result<(RawChunk, usize), ScanStop> {
        let offset = area.base + pos;
        area.need(pos, BLOCK_HEADER_LEN)?;
        let header = BlockHeader::decode(area.remaining(pos)).ok_or(ScanStop::Truncated {
            offset,
            needed: BLOCK_HEADER_LEN,
            available: area.data.len() - pos,
        })?;

        let spec = self.tags.block(header.block_type).ok_or(ScanStop::UnrecognizedTag {
            offset,
            tag: header.block_type,
        })?;

        let size = header.data_size as usize;
        area.need(pos, BLOCK_HEADER_LEN.saturating_add(size))?;
        if !header.padding_clean {
            self.warn(ScanWarning::BlockPadding { offset });
        }

        let data = area.sub(pos + BLOCK_HEADER_LEN, size);
        trace!(
            "block type {} ({}) at {} with {} bytes",
            header.block_type,
            spec.layout,
            offset,
            size
        );

        let children = match spec.layout {
            BlockLayout::Records => self.records(&data),
            BlockLayout::Messages => self.messages(&data),
            BlockLayout::Entries => self.entries(&data, offset),
        };

        let chunk = RawChunk::new(
            ChunkKind::Block(spec.layout),
            header.block_type,
            offset,
            data.data,
        )
        .with_meta(ChunkMeta::Block { x: header.x })
        .with_children(children.items, children.partial);
        Ok((chunk, pos + BLOCK_HEADER_LEN + size))
    }

    fn entries(&mut self, area: &Area, block_offset: usize) -> Sequence {
        let items = (0..area.data.len() / ENTRY_LEN)
            .map(|i| {
                let start = i * ENTRY_LEN;
                let entry = area.sub(start, ENTRY_LEN);
                RawChunk::new(ChunkKind::Entry, 0, entry.base, entry.data)
            })
            .collect();

        let trailing = area.data.len() % ENTRY_LEN;
        if trailing != 0 {
            self.warn(ScanWarning::TrailingEntryBytes {
                offset: block_offset,
                len: trailing,
            });
        }
        Sequence {
            items,
            partial: false,
        }
    }

    fn messages(&mut self, area: &Area) -> Sequence {
        let mut items = Vec::new();
        let mut pos = 0;
        while pos < area.data.len() {
            match self.message(area, pos) {
                Ok((message, end)) => {
                    items.push(message);
                    pos = end;
                }
                Err(stop) => {
                    self.stop(stop);
                    return Sequence {
                        items,
                        partial: true,
                    };
                }
            }
        }
        Sequence {
            items,
            partial: false,
        }
    }

    fn message(&mut self, area: &Area, pos: usize) -> std::result::Result<(RawChunk, usize), ScanStop> {
        let offset = area.base + pos;
        area.need(pos, MESSAGE_HEADER_LEN)?;
        let header = MessageHeader::decode(area.remaining(pos)).ok_or(ScanStop::Truncated {
            offset,
            needed: MESSAGE_HEADER_LEN,
            available: area.data.len() - pos,
        })?;

        let size = header.data_size as usize;
        area.need(pos, MESSAGE_HEADER_LEN.saturating_add(size))?;
        let data = area.sub(pos + MESSAGE_HEADER_LEN, size);
        let records = self.records(&data);

        let chunk = RawChunk::new(ChunkKind::Message, 0, offset, data.data)
            .with_meta(ChunkMeta::Message(header))
            .with_children(records.items, records.partial);
        Ok((chunk, pos + MESSAGE_HEADER_LEN + size))
    }

    fn records(&mut self, area: &Area) -> Sequence {
        let mut items = Vec::new();
        let mut pos = 0;
        while pos < area.data.len() {
            match self.record(area, pos) {
                Ok(scan) => {
                    items.push(scan.chunk);
                    pos = scan.end;
                    if !scan.complete {
                        return Sequence {
                            items,
                            partial: true,
                        };
                    }
                }
                Err(stop) => {
                    self.stop(stop);
                    return Sequence {
                        items,
                        partial: true,
                    };
                }
            }
        }
        Sequence {
            items,
            partial: false,
        }
    }

    fn record(&mut self, area: &Area, pos: usize) -> std::result::Result<RecordScan, ScanStop> {
        let offset = area.base + pos;
        area.need(pos, 2)?;
        let marker = area.data[pos];
        if marker != RECORD_MARKER {
            return Err(ScanStop::MissingRecordMarker {
                offset,
                found: marker,
            });
        }
        let count = area.data[pos + 1];
        let start = pos + 2;
        let meta = ChunkMeta::Record { count };

        if count == 0 {
            return Ok(RecordScan {
                chunk: RawChunk::new(ChunkKind::Record, u32::from(marker), offset, Bytes::new())
                    .with_meta(meta),
                end: start,
                complete: true,
            });
        }

        let mut fields = Vec::new();
        let mut end = start;
        let mut complete = true;
        while end < area.data.len() {
            match self.field(area, end) {
                Ok((field, next)) => {
                    let closes = field.kind == ChunkKind::Field(FieldKind::EndOfRecord);
                    fields.push(field);
                    end = next;
                    if closes {
                        break;
                    }
                }
                Err(stop) => {
                    self.stop(stop);
                    complete = false;
                    break;
                }
            }
        }

        let chunk = RawChunk::new(
            ChunkKind::Record,
            u32::from(marker),
            offset,
            area.data.slice(start..end),
        )
        .with_meta(meta)
        .with_children(fields, !complete);
        Ok(RecordScan {
            chunk,
            end,
            complete,
        })
    }

    fn field(&self, area: &Area, pos: usize) -> std::result::Result<(RawChunk, usize), ScanStop> {
        let offset = area.base + pos;
        let tag = area.data[pos];
        let kind = self.tags.field(tag).ok_or(ScanStop::UnrecognizedTag {
            offset,
            tag: u32::from(tag),
        })?;

        let mut at = pos + 1;
        let code = if kind == FieldKind::VarintList {
            area.need(at, 1)?;
            at += 1;
            u64::from(area.data[at - 1])
        } else {
            let (code, len) = area.varint(at)?;
            at += len;
            code
        };

        let (value_start, value_end, next) = match kind {
            FieldKind::Varint => {
                let (_, len) = area.varint(at)?;
                (at, at + len, at + len)
            }
            FieldKind::Fixed64 => {
                area.need(at, 8)?;
                (at, at + 8, at + 8)
            }
            FieldKind::Text => {
                let Some(nul) = area.remaining(at).iter().position(|&b| b == 0) else {
                    let available = area.data.len() - at;
                    return Err(ScanStop::Truncated {
                        offset,
                        needed: available + 1,
                        available,
                    });
                };
                (at, at + nul, at + nul + 1)
            }
            FieldKind::Blob => {
                let (len, len_len) = area.varint(at)?;
                let start = at + len_len;
                let len = usize::try_from(len).unwrap_or(usize::MAX);
                area.need(start, len)?;
                (start, start + len, start + len)
            }
            FieldKind::EndOfRecord => (at, at, at),
            FieldKind::VarintList => {
                let (count, count_len) = area.varint(at)?;
                let start = at + count_len;
                let mut end = start;
                for _ in 0..count {
                    let (_, len) = area.varint(end)?;
                    end += len;
                }
                (start, end, end)
            }
        };

        let chunk = RawChunk::new(
            ChunkKind::Field(kind),
            u32::from(tag),
            offset,
            area.data.slice(value_start..value_end),
        )
        .with_meta(ChunkMeta::Field { code });
        Ok((chunk, next))
    }

    /// Checks the block set of a file against the tag table
    fn validate(&mut self, blocks: &[RawChunk]) {
        let expected = self.tags.block_count();
        if blocks.len() != expected {
            self.warn(ScanWarning::BlockCount {
                found: blocks.len(),
                expected,
            });
        } else {
            let present: BTreeSet<u32> = blocks.iter().map(|b| b.tag).collect();
            let missing: Vec<u32> = self
                .tags
                .blocks()
                .map(|(tag, _)| tag)
                .filter(|tag| !present.contains(tag))
                .collect();
            if !missing.is_empty() {
                self.warn(ScanWarning::MissingBlockTypes { missing });
            }
        }

        let conversations = blocks
            .iter()
            .filter(|b| b.kind == ChunkKind::Block(BlockLayout::Messages))
            .count();
        if conversations != 1 {
            self.stop(ScanStop::ConversationBlocks {
                found: conversations,
            });
        }
    }
}

impl Scanner {
    /// Creates a new scanner with default configuration
    pub fn new() -> Self {
        Self {
            config: ScannerConfig::default(),
        }
    }

    /// Creates a new scanner with custom configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Returns the active configuration
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Splits off the file header.
    ///
    /// Returns the block area, or `None` if the input ends inside the header.
    fn split_header(&self, data: Bytes, diagnostics: &mut ScanDiagnostics) -> Option<Area> {
        let Some(signature) = self.config.signature.as_deref() else {
            return Some(Area { data, base: 0 });
        };
        let header_len = signature.len() + HEADER_TAIL_LEN;

        let inside_header = data.len() < header_len
            && if data.len() <= signature.len() {
                signature.starts_with(&data[..])
            } else {
                data.starts_with(signature)
            };
        if inside_header {
            debug!("Input ends inside the file header ({} bytes)", data.len());
            diagnostics.signature_found = data.len() >= signature.len();
            diagnostics.stops.push(ScanStop::Truncated {
                offset: 0,
                needed: header_len,
                available: data.len(),
            });
            return None;
        }

        if !data.starts_with(signature) {
            debug!("Signature missing, scanning from offset 0");
            return Some(Area { data, base: 0 });
        }

        diagnostics.signature_found = true;
        let header = FileHeader::decode(&data[signature.len()..])?;
        if !header.padding_clean {
            warn!("{}", ScanWarning::HeaderPadding);
            diagnostics.warnings.push(ScanWarning::HeaderPadding);
        }
        diagnostics.header = Some(header);

        let body = data.slice(header_len..);
        let declared = header.data_size as usize;
        if body.len() < declared {
            debug!(
                "Block area shorter than declared: {} of {} bytes",
                body.len(),
                declared
            );
            diagnostics.stops.push(ScanStop::Truncated {
                offset: header_len + body.len(),
                needed: declared,
                available: body.len(),
            });
            return Some(Area {
                data: body,
                base: header_len,
            });
        }
        if body.len() > declared {
            debug!("Ignoring {} bytes past the declared size", body.len() - declared);
        }
        Some(Area {
            data: body.slice(..declared),
            base: header_len,
        })
    }
}

impl ScanStrategy for Scanner {
    fn scan_bytes(&self, data: Bytes) -> ScanOutcome {
        let mut diagnostics = ScanDiagnostics::default();
        debug!("Starting scan of {} bytes", data.len());

        let Some(area) = self.split_header(data, &mut diagnostics) else {
            return ScanOutcome {
                chunks: Vec::new(),
                partial: true,
                diagnostics,
            };
        };

        let mut tokenizer = Tokenizer {
            tags: self.config.tags.as_ref(),
            diagnostics: &mut diagnostics,
        };
        let blocks = tokenizer.blocks(&area);
        tokenizer.validate(&blocks.items);

        let partial = blocks.partial || !diagnostics.stops.is_empty();
        debug!(
            "Scan complete: {} blocks, partial = {}, {} warnings",
            blocks.items.len(),
            partial,
            diagnostics.warning_count()
        );
        ScanOutcome {
            chunks: blocks.items,
            partial,
            diagnostics,
        }
    }
}

/// Scan a file with the default configuration
pub fn scan_file(path: impl AsRef<std::path::Path>) -> Result<ScanOutcome> {
    scan_file_with_config(path, ScannerConfig::default())
}

/// Scan a file with custom configuration
pub fn scan_file_with_config(
    path: impl AsRef<std::path::Path>,
    config: ScannerConfig,
) -> Result<ScanOutcome> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
    Ok(Scanner::with_config(config).scan_bytes(Bytes::from(data)))
}
