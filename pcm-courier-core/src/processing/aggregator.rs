use std::time::{Duration, Instant};

use crate::models::audio_models::Block;
use crate::models::config::DEFAULT_THRESHOLD_BYTES;
use crate::models::package::{Package, PackageTemplate};

/// When buffered blocks become a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Every block becomes exactly one package. Used for file input, whose
    /// reads are already sized near the target package size.
    PassThrough,
    /// Blocks are concatenated until buffered bytes strictly exceed `bytes`.
    /// With `max_age` set, a non-empty buffer older than that is flushed too.
    Threshold {
        bytes: usize,
        max_age: Option<Duration>,
    },
}

impl FlushPolicy {
    pub fn threshold(bytes: usize) -> Self {
        Self::Threshold { bytes, max_age: None }
    }
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self::threshold(DEFAULT_THRESHOLD_BYTES)
    }
}

/// Turns a sequence of blocks into packages under one `FlushPolicy`.
///
/// The package timestamp is always the timestamp of the first block folded
/// into it; later blocks' timestamps are discarded.
#[derive(Debug)]
pub struct Aggregator {
    policy: FlushPolicy,
    template: PackageTemplate,
    buffer: Vec<u8>,
    first_timestamp: Option<f64>,
    first_arrival: Option<Instant>,
    blocks_buffered: usize,
}

impl Aggregator {
    pub fn new(policy: FlushPolicy, template: PackageTemplate) -> Self {
        Self {
            policy,
            template,
            buffer: Vec::new(),
            first_timestamp: None,
            first_arrival: None,
            blocks_buffered: 0,
        }
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn blocks_buffered(&self) -> usize {
        self.blocks_buffered
    }

    /// Fold one block in; returns a package if the policy says to flush.
    pub fn push(&mut self, block: Block) -> Option<Package> {
        if block.is_empty() {
            return None;
        }

        match self.policy {
            FlushPolicy::PassThrough => Some(self.template.build(block.payload, block.timestamp)),
            FlushPolicy::Threshold { bytes, .. } => {
                if self.first_timestamp.is_none() {
                    self.first_timestamp = Some(block.timestamp);
                    self.first_arrival = Some(Instant::now());
                }
                if self.buffer.is_empty() {
                    self.buffer = block.payload;
                } else {
                    self.buffer.extend_from_slice(&block.payload);
                }
                self.blocks_buffered += 1;

                if self.buffer.len() > bytes {
                    self.take()
                } else {
                    None
                }
            }
        }
    }

    /// Time left before the buffered data must be flushed, if a max age is set
    /// and anything is buffered.
    pub fn time_to_deadline(&self, now: Instant) -> Option<Duration> {
        match (self.policy, self.first_arrival) {
            (FlushPolicy::Threshold { max_age: Some(age), .. }, Some(arrival)) => {
                Some(age.saturating_sub(now.saturating_duration_since(arrival)))
            }
            _ => None,
        }
    }

    /// Flush the buffer if it has been held longer than the policy's max age.
    pub fn flush_if_stale(&mut self, now: Instant) -> Option<Package> {
        match self.time_to_deadline(now) {
            Some(remaining) if remaining.is_zero() => self.take(),
            _ => None,
        }
    }

    /// Flush whatever is buffered, regardless of threshold. Used on drain.
    pub fn finish(&mut self) -> Option<Package> {
        self.take()
    }

    fn take(&mut self) -> Option<Package> {
        let timestamp = self.first_timestamp.take()?;
        self.first_arrival = None;
        self.blocks_buffered = 0;
        let payload = std::mem::take(&mut self.buffer);
        if payload.is_empty() {
            return None;
        }
        Some(self.template.build(payload, timestamp))
    }
}
