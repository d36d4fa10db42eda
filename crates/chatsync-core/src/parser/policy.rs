//! Swappable parsing policies.
//!
//! Both policies encode guesses about the format. They sit behind traits so
//! a different choice can be plugged in without touching the interpreters.

use crate::chunk::RawChunk;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Decides which of several timestamp candidates becomes the conversation time
pub trait TimestampPolicy: Debug + Send + Sync {
    /// Returns true if `candidate` should replace `current`
    fn accept(&self, current: Option<DateTime<Utc>>, candidate: DateTime<Utc>) -> bool;
}

/// Keep the first timestamp offered, ignore later ones
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstWins;

impl TimestampPolicy for FirstWins {
    fn accept(&self, current: Option<DateTime<Utc>>, _candidate: DateTime<Utc>) -> bool {
        current.is_none()
    }
}

/// Keep the last timestamp offered
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWins;

impl TimestampPolicy for LastWins {
    fn accept(&self, _current: Option<DateTime<Utc>>, _candidate: DateTime<Utc>) -> bool {
        true
    }
}

/// What to do after a block without an interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Go on with the next chunk
    Continue,
    /// Stop interpreting; the model keeps what was decoded so far
    Stop,
}

/// Reaction to blocks the parser has no interpreter for
pub trait UnrecognizedPolicy: Debug + Send + Sync {
    /// Called once per such chunk, in stream order
    fn on_unrecognized(&self, chunk: &RawChunk) -> Flow;
}

/// Skip the chunk and carry on
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipAndContinue;

impl UnrecognizedPolicy for SkipAndContinue {
    fn on_unrecognized(&self, _chunk: &RawChunk) -> Flow {
        Flow::Continue
    }
}

/// Stop at the first chunk the parser cannot interpret
#[derive(Debug, Clone, Copy, Default)]
pub struct StopParsing;

impl UnrecognizedPolicy for StopParsing {
    fn on_unrecognized(&self, _chunk: &RawChunk) -> Flow {
        Flow::Stop
    }
}
