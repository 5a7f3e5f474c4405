use std::path::PathBuf;

use super::error::CourierError;

/// Pipeline state machine.
///
/// State transitions:
/// ```text
/// idle → streaming → draining → completed / failed
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    Idle,
    Streaming { packages_delivered: u64 },
    Draining,
    Completed(RunSummary),
    Failed(CourierError),
}

impl PipelineState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }
}

/// Terminal result of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { key: String, attempts: u32 },
    /// Retry policy exhausted. `spooled` is where the package was kept, if anywhere.
    Abandoned {
        key: String,
        attempts: u32,
        spooled: Option<PathBuf>,
    },
}

impl DeliveryOutcome {
    pub fn key(&self) -> &str {
        match self {
            Self::Delivered { key, .. } | Self::Abandoned { key, .. } => key,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts, .. } | Self::Abandoned { attempts, .. } => *attempts,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Totals reported when a run ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub packages_delivered: u64,
    pub packages_abandoned: u64,
    pub bytes_delivered: u64,
    /// Seconds of audio covered by delivered packages.
    pub audio_secs: f64,
    /// Source was consumed to the end (not cancelled).
    pub exhausted: bool,
    /// The pull source's file was removed after full delivery.
    pub source_removed: bool,
}

/// Counters for debugging a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineDiagnostics {
    pub blocks_received: u64,
    pub bytes_received: u64,
    pub packages_built: u64,
    pub upload_attempts: u64,
    pub upload_failures: u64,
    pub packages_delivered: u64,
    pub packages_abandoned: u64,
}
