//! Where blocks come from: a finite file read on demand (pull) or a live
//! capture feed running on its own thread (push).

pub mod live;
pub mod wav_file;

use std::time::Duration;

use crate::models::audio_models::{Block, StreamFormat};
use crate::models::error::CourierError;

/// Production model of a source; selects the aggregation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pull,
    Push,
}

/// Result of asking a source for its next block.
#[derive(Debug, Clone, PartialEq)]
pub enum SourcePoll {
    Block(Block),
    /// No block arrived within the timeout; the source is still live.
    Idle,
    /// No more blocks will ever be produced.
    Exhausted,
}

pub trait BlockSource {
    fn kind(&self) -> SourceKind;

    /// PCM layout of every block this source produces.
    fn format(&self) -> StreamFormat;

    /// Next block, waiting at most `timeout` (None = wait indefinitely).
    /// Pull sources never wait and ignore the timeout.
    fn next_block(&mut self, timeout: Option<Duration>) -> Result<SourcePoll, CourierError>;

    /// Called once, only after the source is exhausted and every package
    /// derived from it was delivered.
    fn complete(&mut self) -> Result<bool, CourierError> {
        Ok(false)
    }
}
