//! Conversation model produced by the parser.

use crate::chunk::{ChunkRef, RawChunk};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One entry of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// A message as first sent
    Posted {
        /// Participant who sent it
        author: String,
        /// Message text
        text: String,
        /// Send time, if recorded
        local_timestamp: Option<DateTime<Utc>>,
    },
    /// Replacement text for an earlier message
    Edited {
        /// Participant who edited
        author: String,
        /// Text after the edit
        new_text: String,
        /// Edit time, if recorded
        local_timestamp: Option<DateTime<Utc>>,
    },
    /// A message that was removed
    Removed {
        /// Participant who removed it
        author: String,
        /// Removal time, if recorded
        local_timestamp: Option<DateTime<Utc>>,
    },
    /// A message whose records could not be decoded
    Unknown {
        /// The undecoded chunk, kept for troubleshooting
        raw: RawChunk,
    },
}

impl MessageEvent {
    /// Author, unless the event is [`MessageEvent::Unknown`]
    pub fn author(&self) -> Option<&str> {
        match self {
            Self::Posted { author, .. } | Self::Edited { author, .. } | Self::Removed { author, .. } => {
                Some(author)
            }
            Self::Unknown { .. } => None,
        }
    }

    /// Text carried by the event, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Posted { text, .. } => Some(text),
            Self::Edited { new_text, .. } => Some(new_text),
            Self::Removed { .. } | Self::Unknown { .. } => None,
        }
    }

    /// Local timestamp, if recorded
    pub fn local_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Posted { local_timestamp, .. }
            | Self::Edited { local_timestamp, .. }
            | Self::Removed { local_timestamp, .. } => *local_timestamp,
            Self::Unknown { .. } => None,
        }
    }

    /// Returns true for [`MessageEvent::Unknown`]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown { .. })
    }

    /// Short lowercase name of the variant
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Posted { .. } => "posted",
            Self::Edited { .. } => "edited",
            Self::Removed { .. } => "removed",
            Self::Unknown { .. } => "unknown",
        }
    }
}

/// Counters collected during one parse pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    /// Blocks without an interpreter
    pub unrecognized: usize,
    /// Fields that failed to decode (events downgraded, rosters dropped)
    pub field_failures: usize,
    /// Timestamp candidates that were not used
    pub timestamps_ignored: usize,
}

/// Everything recovered from one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversationModel {
    timestamp: Option<DateTime<Utc>>,
    participants: Vec<String>,
    conversation: Vec<MessageEvent>,
    #[serde(skip)]
    sources: Vec<ChunkRef>,
    stats: ParseStats,
}

impl ConversationModel {
    pub(crate) fn new(
        timestamp: Option<DateTime<Utc>>,
        participants: Vec<String>,
        conversation: Vec<MessageEvent>,
        sources: Vec<ChunkRef>,
        stats: ParseStats,
    ) -> Self {
        debug_assert_eq!(conversation.len(), sources.len());
        Self {
            timestamp,
            participants,
            conversation,
            sources,
            stats,
        }
    }

    /// Conversation start time
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Participants, first-seen order, no duplicates
    pub fn participants(&self) -> &[String] {
        &self.participants
    }

    /// Events in stream order
    pub fn conversation(&self) -> &[MessageEvent] {
        &self.conversation
    }

    /// Events paired with the chunk each was decoded from
    pub fn events_with_sources(&self) -> impl Iterator<Item = (&MessageEvent, ChunkRef)> + '_ {
        self.conversation.iter().zip(self.sources.iter().copied())
    }

    /// Parse counters
    pub fn stats(&self) -> ParseStats {
        self.stats
    }

    /// Returns true if nothing at all was decoded
    pub fn is_empty(&self) -> bool {
        self.timestamp.is_none() && self.participants.is_empty() && self.conversation.is_empty()
    }

    /// Number of events that could not be decoded
    pub fn unknown_count(&self) -> usize {
        self.conversation.iter().filter(|e| e.is_unknown()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::ChunkKind;

    #[test]
    fn test_event_accessors() {
        let posted = MessageEvent::Posted {
            author: "alice".into(),
            text: "hi".into(),
            local_timestamp: DateTime::from_timestamp(10, 0),
        };
        assert_eq!(posted.author(), Some("alice"));
        assert_eq!(posted.text(), Some("hi"));
        assert_eq!(posted.kind_name(), "posted");

        let unknown = MessageEvent::Unknown {
            raw: RawChunk::new(ChunkKind::Message, 0, 0, Vec::new()),
        };
        assert_eq!(unknown.author(), None);
        assert!(unknown.is_unknown());
    }

    #[test]
    fn test_default_model_is_empty() {
        let model = ConversationModel::default();
        assert!(model.is_empty());
        assert_eq!(model.unknown_count(), 0);
    }

    #[test]
    fn test_serialized_event_hides_payload() {
        let unknown = MessageEvent::Unknown {
            raw: RawChunk::new(ChunkKind::Message, 0, 40, b"secret".to_vec()),
        };
        let json = serde_json::to_string(&unknown).unwrap();
        assert!(json.contains("\"type\":\"unknown\""));
        assert!(json.contains("\"offset\":40"));
        assert!(json.contains("\"len\":6"));
        assert!(!json.contains("secret"));
    }
}
