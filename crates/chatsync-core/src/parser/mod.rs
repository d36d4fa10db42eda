//! Chunk tree to conversation model.
//!
//! ## Architecture
//!
//! [`Parser`] walks the blocks in stream order and dispatches on the role
//! the tag table assigns to each block type:
//!
//! - `participants`: roster names appended, first-seen order, no duplicates
//! - `conversation`: exactly one [`MessageEvent`] per message; anything that
//!   does not decode becomes [`MessageEvent::Unknown`]
//! - anything else: handed to the [`UnrecognizedPolicy`]
//!
//! Timestamp candidates are the file header's timestamp followed by each
//! message header's timestamp; the [`TimestampPolicy`] picks one.
//!
//! Parsing never fails. A stream with nothing recognizable yields an empty
//! model.

mod fields;
mod policy;

use crate::chunk::{ChunkRef, RawChunk, ScanOutcome};
use crate::model::{ConversationModel, MessageEvent, ParseStats};
use crate::tags::{ChunkKind, ChunkRole, TagTable};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

pub use policy::{
    FirstWins, Flow, LastWins, SkipAndContinue, StopParsing, TimestampPolicy, UnrecognizedPolicy,
};

/// Configuration for the parser
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Roles of the block types
    pub tags: Arc<TagTable>,
    /// Which timestamp candidate wins
    pub timestamp_policy: Arc<dyn TimestampPolicy>,
    /// What happens at blocks without an interpreter
    pub unrecognized_policy: Arc<dyn UnrecognizedPolicy>,
    /// Offer the file header's timestamp as the first candidate
    pub header_timestamp: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            tags: Arc::new(TagTable::default()),
            timestamp_policy: Arc::new(FirstWins),
            unrecognized_policy: Arc::new(SkipAndContinue),
            header_timestamp: true,
        }
    }
}

impl ParserConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tag table
    pub fn tags(mut self, tags: impl Into<Arc<TagTable>>) -> Self {
        self.tags = tags.into();
        self
    }

    /// Sets the timestamp policy
    pub fn timestamp_policy(mut self, policy: impl TimestampPolicy + 'static) -> Self {
        self.timestamp_policy = Arc::new(policy);
        self
    }

    /// Sets the policy for blocks without an interpreter
    pub fn unrecognized_policy(mut self, policy: impl UnrecognizedPolicy + 'static) -> Self {
        self.unrecognized_policy = Arc::new(policy);
        self
    }

    /// Sets whether the header timestamp is a candidate
    pub fn header_timestamp(mut self, enabled: bool) -> Self {
        self.header_timestamp = enabled;
        self
    }
}

/// Interprets scanned chunks
#[derive(Debug, Clone, Default)]
pub struct Parser {
    config: ParserConfig,
}

/// Mutable state of a single parse pass
#[derive(Default)]
struct ParseState {
    timestamp: Option<DateTime<Utc>>,
    participants: Vec<String>,
    seen: HashSet<String>,
    first_user: Option<u64>,
    conversation: Vec<MessageEvent>,
    sources: Vec<ChunkRef>,
    stats: ParseStats,
}

impl ParseState {
    fn add_participant(&mut self, id: String) {
        if self.seen.insert(id.clone()) {
            self.participants.push(id);
        }
    }

    fn finish(self) -> ConversationModel {
        ConversationModel::new(
            self.timestamp,
            self.participants,
            self.conversation,
            self.sources,
            self.stats,
        )
    }
}

impl Parser {
    /// Creates a new parser with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new parser with custom configuration
    pub fn with_config(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Returns the active configuration
    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Parse the result of a scan
    pub fn parse(&self, outcome: &ScanOutcome) -> ConversationModel {
        let mut state = ParseState::default();
        if self.config.header_timestamp {
            if let Some(header) = outcome.diagnostics.header {
                self.offer_timestamp(header.timestamp, &mut state);
            }
        }
        self.run(&outcome.chunks, &mut state);
        state.finish()
    }

    /// Parse a bare block sequence
    pub fn parse_chunks(&self, chunks: &[RawChunk]) -> ConversationModel {
        let mut state = ParseState::default();
        self.run(chunks, &mut state);
        state.finish()
    }

    fn run(&self, chunks: &[RawChunk], state: &mut ParseState) {
        let tags = self.config.tags.as_ref();

        for chunk in chunks {
            let role = tags.block(chunk.tag).map(|spec| spec.role);
            match role {
                Some(ChunkRole::Participants) => self.participants(chunk, state),
                Some(ChunkRole::Conversation) => self.conversation(chunk, state),
                _ => {
                    debug!(
                        "No interpreter for block type {} at offset {}",
                        chunk.tag, chunk.offset
                    );
                    state.stats.unrecognized += 1;
                    if self.config.unrecognized_policy.on_unrecognized(chunk) == Flow::Stop {
                        debug!("Parsing stopped at offset {}", chunk.offset);
                        break;
                    }
                }
            }
        }

        debug!(
            "Parsed {} events, {} participants, {} unrecognized blocks",
            state.conversation.len(),
            state.participants.len(),
            state.stats.unrecognized
        );
    }

    fn offer_timestamp(&self, secs: u32, state: &mut ParseState) {
        let Some(candidate) = fields::unix_seconds(secs) else {
            return;
        };

        if self
            .config
            .timestamp_policy
            .accept(state.timestamp, candidate)
        {
            if state.timestamp.is_some() {
                state.stats.timestamps_ignored += 1;
            }
            state.timestamp = Some(candidate);
        } else {
            trace!("Ignoring timestamp {}", candidate);
            state.stats.timestamps_ignored += 1;
        }
    }

    fn participants(&self, chunk: &RawChunk, state: &mut ParseState) {
        match fields::participant_ids(chunk) {
            Ok(ids) => {
                for id in ids {
                    state.add_participant(id);
                }
            }
            Err(e) => {
                debug!("Roster at offset {} not decodable: {}", chunk.offset, e);
                state.stats.field_failures += 1;
            }
        }
    }

    fn conversation(&self, chunk: &RawChunk, state: &mut ParseState) {
        if state.first_user.is_none() {
            state.first_user = chunk
                .children
                .iter()
                .filter(|m| m.kind == ChunkKind::Message)
                .find_map(fields::user_id);
        }

        for message in &chunk.children {
            self.message(message, state);
        }
    }

    fn message(&self, chunk: &RawChunk, state: &mut ParseState) {
        if let Some(header) = chunk.message_header() {
            self.offer_timestamp(header.timestamp, state);
        }

        let event = match fields::interpret_message(chunk, state.first_user, &state.participants) {
            Ok(event) => event,
            Err(e) => {
                debug!("Message at offset {} kept undecoded: {}", chunk.offset, e);
                state.stats.field_failures += 1;
                MessageEvent::Unknown { raw: chunk.clone() }
            }
        };
        trace!("{} event at offset {}", event.kind_name(), chunk.offset);
        state.conversation.push(event);
        state.sources.push(chunk.chunk_ref());
    }
}
