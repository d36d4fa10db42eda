//! Encoder for chatsync files.
//!
//! The reader never writes to profile files. [`ChatsyncWriter`] exists to
//! build synthetic files: fixtures for tests and reproductions of layouts seen
//! in the wild. It writes the layout the client writes: the participants
//! block, one opaque block, the conversation block, then the remaining opaque
//! blocks.
//!
//! # Example
//!
//! ```
//! use chatsync_core::{ChatsyncWriter, Decoder};
//!
//! let mut writer = ChatsyncWriter::new();
//! writer.participants(["alice", "bob"]);
//! writer.posted("alice", "hi", None);
//! let bytes = writer.finish()?;
//!
//! let decoded = Decoder::new().decode_bytes(bytes.into());
//! assert_eq!(decoded.model.participants(), &["alice", "bob"]);
//! # Ok::<(), chatsync_core::Error>(())
//! ```

use crate::chunk::RawChunk;
use crate::error::{Error, Result};
use crate::model::MessageEvent;
use crate::scanner::{
    encode_varint, BlockHeader, FileHeader, MessageHeader, DEFAULT_SIGNATURE, HEADER_TAIL_LEN,
    RECORD_MARKER,
};
use crate::tags::{BlockLayout, ChunkRole, FieldKind, TagTable};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

/// Types the writer emits, resolved once from a [`TagTable`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterTags {
    participants: u32,
    conversation: u32,
    opaque: Vec<u32>,
    varint: u8,
    text: u8,
    blob: u8,
    end: u8,
}

impl Default for WriterTags {
    fn default() -> Self {
        Self {
            participants: 1,
            conversation: 6,
            opaque: vec![2, 3, 4, 5],
            varint: 0,
            text: 3,
            blob: 4,
            end: 5,
        }
    }
}

impl WriterTags {
    /// Looks up every block and field type the writer needs
    pub fn resolve(table: &TagTable) -> Result<Self> {
        let block = |role: ChunkRole, layout: BlockLayout| {
            table.block_tag_for(role, layout).ok_or_else(|| {
                Error::invalid_tag_spec(
                    format!("{}:{}", role, layout),
                    "tag table has no block type for this role",
                )
            })
        };
        let field = |kind: FieldKind| {
            table.field_tag_for(kind).ok_or_else(|| {
                Error::invalid_tag_spec(kind.as_str(), "tag table has no field type for this encoding")
            })
        };

        Ok(Self {
            participants: block(ChunkRole::Participants, BlockLayout::Records)?,
            conversation: block(ChunkRole::Conversation, BlockLayout::Messages)?,
            opaque: table
                .blocks()
                .filter(|(_, spec)| spec.role == ChunkRole::Opaque)
                .map(|(tag, _)| tag)
                .collect(),
            varint: field(FieldKind::Varint)?,
            text: field(FieldKind::Text)?,
            blob: field(FieldKind::Blob)?,
            end: field(FieldKind::EndOfRecord)?,
        })
    }
}

/// Length as a `u32` header word
fn size_u32(what: &'static str, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::oversized(what, len))
}

/// Append one block (header and data)
pub fn put_block(buf: &mut impl BufMut, block_type: u32, data: &[u8]) -> Result<()> {
    BlockHeader {
        data_size: size_u32("block", data.len())?,
        x: 0,
        block_type,
        padding_clean: true,
    }
    .encode(buf);
    buf.put_slice(data);
    Ok(())
}

/// Append one message (header and records)
pub fn put_message(buf: &mut impl BufMut, header: MessageHeader, records: &[u8]) -> Result<()> {
    MessageHeader {
        data_size: size_u32("message", records.len())?,
        ..header
    }
    .encode(buf);
    buf.put_slice(records);
    Ok(())
}

/// Append one record; `fields` must end with an end-of-record field
pub fn put_record(buf: &mut impl BufMut, fields: &[u8]) {
    buf.put_u8(RECORD_MARKER);
    buf.put_u8(1);
    buf.put_slice(fields);
}

/// Append a varint field
pub fn put_varint_field(buf: &mut impl BufMut, tag: u8, code: u64, value: u64) {
    buf.put_u8(tag);
    encode_varint(code, buf);
    encode_varint(value, buf);
}

/// Append a NUL-terminated text field
pub fn put_text_field(buf: &mut impl BufMut, tag: u8, code: u64, text: &str) {
    buf.put_u8(tag);
    encode_varint(code, buf);
    buf.put_slice(text.as_bytes());
    buf.put_u8(0);
}

/// Append a length-prefixed blob field
pub fn put_blob_field(buf: &mut impl BufMut, tag: u8, code: u64, data: &[u8]) {
    buf.put_u8(tag);
    encode_varint(code, buf);
    encode_varint(data.len() as u64, buf);
    buf.put_slice(data);
}

/// Append an end-of-record field
pub fn put_end_field(buf: &mut impl BufMut, tag: u8, code: u64) {
    buf.put_u8(tag);
    encode_varint(code, buf);
}

/// Seconds since the epoch; zero when absent or outside the `u32` range
fn unix_seconds(ts: Option<DateTime<Utc>>) -> u32 {
    ts.and_then(|ts| u32::try_from(ts.timestamp()).ok())
        .unwrap_or(0)
}

/// A message waiting to be encoded
#[derive(Debug, Clone)]
struct PendingMessage {
    header: MessageHeader,
    records: Bytes,
}

/// Builds a chatsync file block by block
#[derive(Debug, Clone)]
pub struct ChatsyncWriter {
    tags: WriterTags,
    signature: Vec<u8>,
    timestamp: u32,
    names: Vec<String>,
    users: Vec<String>,
    messages: Vec<PendingMessage>,
    opaque: Vec<(u32, Bytes)>,
}

impl Default for ChatsyncWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatsyncWriter {
    /// Creates a writer for the default tag table
    pub fn new() -> Self {
        Self::from_tags(WriterTags::default())
    }

    /// Creates a writer for a custom tag table
    pub fn with_tags(table: &TagTable) -> Result<Self> {
        Ok(Self::from_tags(WriterTags::resolve(table)?))
    }

    fn from_tags(tags: WriterTags) -> Self {
        let opaque = tags.opaque.iter().map(|&tag| (tag, Bytes::new())).collect();
        Self {
            tags,
            signature: DEFAULT_SIGNATURE.to_vec(),
            timestamp: 0,
            names: Vec::new(),
            users: Vec::new(),
            messages: Vec::new(),
            opaque,
        }
    }

    /// Uses a different file signature
    pub fn signature(mut self, signature: impl Into<Vec<u8>>) -> Self {
        self.signature = signature.into();
        self
    }

    /// Sets the file header timestamp
    pub fn timestamp(&mut self, ts: DateTime<Utc>) -> &mut Self {
        self.timestamp = unix_seconds(Some(ts));
        self
    }

    /// Sets the data of an opaque block; unknown types are appended as extra blocks
    pub fn block(&mut self, block_type: u32, data: impl Into<Bytes>) -> &mut Self {
        let data = data.into();
        match self.opaque.iter_mut().find(|(tag, _)| *tag == block_type) {
            Some(slot) => slot.1 = data,
            None => self.opaque.push((block_type, data)),
        }
        self
    }

    /// Adds names to the roster
    pub fn participants<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.names
            .extend(names.into_iter().map(|n| n.as_ref().to_owned()));
        self
    }

    /// Appends a posted message
    pub fn posted(&mut self, author: &str, text: &str, at: Option<DateTime<Utc>>) -> &mut Self {
        self.message(author, b"\x03\x02", text, at)
    }

    /// Appends an edit; the text should not be empty, an empty edit reads back as a removal
    pub fn edited(&mut self, author: &str, new_text: &str, at: Option<DateTime<Utc>>) -> &mut Self {
        self.message(author, b"\x03\"", new_text, at)
    }

    /// Appends a removal
    pub fn removed(&mut self, author: &str, at: Option<DateTime<Utc>>) -> &mut Self {
        self.message(author, b"\x03\"", "", at)
    }

    /// Appends any event; unknown events are written back byte for byte
    pub fn event(&mut self, event: &MessageEvent) -> &mut Self {
        match event {
            MessageEvent::Posted {
                author,
                text,
                local_timestamp,
            } => self.posted(author, text, *local_timestamp),
            MessageEvent::Edited {
                author,
                new_text,
                local_timestamp,
            } => self.edited(author, new_text, *local_timestamp),
            MessageEvent::Removed {
                author,
                local_timestamp,
            } => self.removed(author, *local_timestamp),
            MessageEvent::Unknown { raw } => self.raw(raw),
        }
    }

    /// Writes a scanned message back out
    pub fn raw(&mut self, chunk: &RawChunk) -> &mut Self {
        self.messages.push(PendingMessage {
            header: chunk.message_header().unwrap_or_default(),
            records: chunk.payload.clone(),
        });
        self
    }

    /// Ids follow first appearance, starting at one
    fn user_id(&mut self, author: &str) -> u64 {
        let index = match self.users.iter().position(|u| u == author) {
            Some(index) => index,
            None => {
                self.users.push(author.to_owned());
                self.users.len() - 1
            }
        };
        index as u64 + 1
    }

    fn message(
        &mut self,
        author: &str,
        marker: &[u8],
        text: &str,
        at: Option<DateTime<Utc>>,
    ) -> &mut Self {
        let id = self.messages.len() as u32 + 1;
        let user = self.user_id(author);
        let tags = &self.tags;

        let mut blob = Vec::with_capacity(marker.len() + text.len() + 1);
        blob.extend_from_slice(marker);
        blob.extend_from_slice(text.as_bytes());
        blob.push(0);

        let mut records = BytesMut::new();
        let mut fields = BytesMut::new();
        put_varint_field(&mut fields, tags.varint, 0, u64::from(id));
        put_end_field(&mut fields, tags.end, 1);
        put_record(&mut records, &fields);

        fields.clear();
        put_varint_field(&mut fields, tags.varint, 0, 0);
        put_varint_field(&mut fields, tags.varint, 1, user);
        put_blob_field(&mut fields, tags.blob, 2, &blob);
        put_end_field(&mut fields, tags.end, 3);
        put_record(&mut records, &fields);

        self.messages.push(PendingMessage {
            header: MessageHeader {
                id,
                timestamp: unix_seconds(at),
                ..Default::default()
            },
            records: records.freeze(),
        });
        self
    }

    fn roster(&self) -> BytesMut {
        let mut data = BytesMut::new();
        if self.names.is_empty() {
            return data;
        }
        let roster = self
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| format!("{}{}", if i == 0 { '#' } else { '$' }, name))
            .collect::<Vec<_>>()
            .join("/");

        let mut fields = BytesMut::new();
        put_text_field(&mut fields, self.tags.text, 0, &roster);
        put_end_field(&mut fields, self.tags.end, 1);
        put_record(&mut data, &fields);
        data
    }

    /// Encodes the block area
    pub fn body(&self) -> Result<BytesMut> {
        let mut conversation = BytesMut::new();
        for message in &self.messages {
            put_message(&mut conversation, message.header, &message.records)?;
        }

        let mut body = BytesMut::new();
        put_block(&mut body, self.tags.participants, &self.roster())?;
        let mut opaque = self.opaque.iter();
        if let Some((tag, data)) = opaque.next() {
            put_block(&mut body, *tag, data)?;
        }
        put_block(&mut body, self.tags.conversation, &conversation)?;
        for (tag, data) in opaque {
            put_block(&mut body, *tag, data)?;
        }
        Ok(body)
    }

    /// Prepends the file header and returns the complete file
    pub fn finish(self) -> Result<Vec<u8>> {
        let body = self.body()?;
        let mut out = BytesMut::with_capacity(self.signature.len() + HEADER_TAIL_LEN + body.len());
        out.put_slice(&self.signature);
        FileHeader {
            timestamp: self.timestamp,
            data_size: size_u32("block area", body.len())?,
            padding_clean: true,
        }
        .encode(&mut out);
        out.put_slice(&body);
        Ok(out.to_vec())
    }

    /// Returns the block area without a file header
    pub fn finish_headerless(self) -> Result<Vec<u8>> {
        Ok(self.body()?.to_vec())
    }
}
