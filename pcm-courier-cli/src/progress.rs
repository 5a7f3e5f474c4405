use std::sync::atomic::{AtomicU64, Ordering};

use pcm_courier_core::{CourierError, DeliveryOutcome, PipelineDelegate, PipelineState};

/// Reports pipeline progress through the log.
#[derive(Default)]
pub struct LogProgress {
    delivered: AtomicU64,
    abandoned: AtomicU64,
}

impl PipelineDelegate for LogProgress {
    fn on_state_changed(&self, state: &PipelineState) {
        match state {
            PipelineState::Streaming { .. } => {}
            PipelineState::Draining => log::info!("draining"),
            other => log::debug!("pipeline state: {:?}", other),
        }
    }

    fn on_package_finished(&self, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered { key, .. } => {
                let n = self.delivered.fetch_add(1, Ordering::Relaxed) + 1;
                log::info!("[{} delivered] {}", n, key);
            }
            DeliveryOutcome::Abandoned { key, spooled, .. } => {
                let n = self.abandoned.fetch_add(1, Ordering::Relaxed) + 1;
                match spooled {
                    Some(path) => log::warn!("[{} abandoned] {} kept at {}", n, key, path.display()),
                    None => log::warn!("[{} abandoned] {} lost", n, key),
                }
            }
        }
    }

    fn on_error(&self, error: &CourierError) {
        log::error!("pipeline failed: {}", error);
    }
}
