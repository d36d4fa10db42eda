//! Field interpreters for roster records and message records.
//!
//! A message keeps its content in its second record: field 1 is the sender's
//! user id, field 2 a blob holding the text after a two-byte marker.

use crate::chunk::RawChunk;
use crate::error::FieldError;
use crate::model::MessageEvent;
use crate::scanner::decode_varint;
use crate::tags::{ChunkKind, FieldKind};
use chrono::{DateTime, Utc};

/// Blob marker in front of text as first sent
pub(crate) const POSTED_MARKER: &[u8] = b"\x03\x02";

/// Blob marker in front of replacement text
pub(crate) const EDITED_MARKER: &[u8] = b"\x03\"";

/// Record of a message that carries the content
const CONTENT_RECORD: usize = 1;
const USER_ID_FIELD: usize = 1;
const BLOB_FIELD: usize = 2;

fn expect_kind<'a>(
    chunk: &'a RawChunk,
    kind: FieldKind,
    what: &'static str,
) -> Result<&'a [u8], FieldError> {
    if chunk.kind != ChunkKind::Field(kind) {
        return Err(FieldError::WrongKind {
            what,
            expected: kind.as_str(),
        });
    }
    Ok(chunk.as_bytes())
}

pub(crate) fn decode_text(chunk: &RawChunk, what: &'static str) -> Result<String, FieldError> {
    let bytes = expect_kind(chunk, FieldKind::Text, what)?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| FieldError::InvalidText(what))
}

pub(crate) fn decode_integer(chunk: &RawChunk, what: &'static str) -> Result<u64, FieldError> {
    let bytes = expect_kind(chunk, FieldKind::Varint, what)?;
    decode_varint(bytes)
        .map(|(value, _)| value)
        .map_err(|_| FieldError::MalformedVarint(what))
}

/// Unix seconds to UTC; zero means not recorded
pub(crate) fn unix_seconds(secs: u32) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    DateTime::from_timestamp(i64::from(secs), 0)
}

/// Names from a `#alice/$bob;token` roster string.
///
/// The part after the first `;` is dropped and each name loses its
/// one-character sigil.
pub(crate) fn split_roster(roster: &str) -> impl Iterator<Item = &str> {
    let names = roster.split(';').next().unwrap_or_default();
    names
        .split('/')
        .map(|name| {
            let mut chars = name.chars();
            chars.next();
            chars.as_str()
        })
        .filter(|name| !name.is_empty())
}

/// Participant names from a participants block.
///
/// The roster is the first field of the block's first record. A block
/// without records yields no names.
pub(crate) fn participant_ids(block: &RawChunk) -> Result<Vec<String>, FieldError> {
    let Some(record) = block.child(0) else {
        return Ok(Vec::new());
    };
    let Some(field) = record.child(0) else {
        return Ok(Vec::new());
    };
    let roster = decode_text(field, "roster")?;
    Ok(split_roster(&roster).map(str::to_owned).collect())
}

/// Sender id of a message, if its content record has one
pub(crate) fn user_id(message: &RawChunk) -> Option<u64> {
    let field = message.child(CONTENT_RECORD)?.child(USER_ID_FIELD)?;
    decode_integer(field, "user id").ok()
}

/// How the blob introduced its text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextMark {
    Posted,
    Edited,
}

/// Text bytes of a message blob.
///
/// The text starts after the first posted marker, or failing that the first
/// edited marker, and runs to the next NUL or the end of the blob.
pub(crate) fn extract_text(blob: &[u8]) -> Result<(TextMark, &[u8]), FieldError> {
    let (mark, start) = find(blob, POSTED_MARKER)
        .map(|at| (TextMark::Posted, at))
        .or_else(|| find(blob, EDITED_MARKER).map(|at| (TextMark::Edited, at)))
        .ok_or(FieldError::NoTextMarker)?;

    let text = &blob[start + 2..];
    let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
    Ok((mark, &text[..end]))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Turn one message chunk into one event.
///
/// `first_user` is the id that belongs to the first participant; every
/// other id belongs to the second.
pub(crate) fn interpret_message(
    chunk: &RawChunk,
    first_user: Option<u64>,
    participants: &[String],
) -> Result<MessageEvent, FieldError> {
    if chunk.kind != ChunkKind::Message {
        return Err(FieldError::WrongKind {
            what: "conversation item",
            expected: "message",
        });
    }

    let record = chunk
        .child(CONTENT_RECORD)
        .ok_or(FieldError::MissingRecord(CONTENT_RECORD))?;
    let user = decode_integer(
        record.child(USER_ID_FIELD).ok_or(FieldError::Missing("user id"))?,
        "user id",
    )?;
    let blob = expect_kind(
        record.child(BLOB_FIELD).ok_or(FieldError::Missing("message"))?,
        FieldKind::Blob,
        "message",
    )?;

    let (mark, text) = extract_text(blob)?;
    let text = std::str::from_utf8(text)
        .map_err(|_| FieldError::InvalidText("message"))?
        .to_owned();

    let index = if Some(user) == first_user { 0 } else { 1 };
    let author = participants
        .get(index)
        .cloned()
        .ok_or(FieldError::UnknownAuthor {
            known: participants.len(),
        })?;
    let local_timestamp = chunk.message_header().and_then(|h| unix_seconds(h.timestamp));

    Ok(match mark {
        TextMark::Posted => MessageEvent::Posted {
            author,
            text,
            local_timestamp,
        },
        TextMark::Edited if text.is_empty() => MessageEvent::Removed {
            author,
            local_timestamp,
        },
        TextMark::Edited => MessageEvent::Edited {
            author,
            new_text: text,
            local_timestamp,
        },
    })
}
