use crate::models::error::CourierError;
use crate::models::state::{DeliveryOutcome, PipelineState};

/// Observability hook for pipeline runs.
///
/// All methods are called from the delivery thread, between uploads.
/// Every method has an empty default so implementors pick what they need.
pub trait PipelineDelegate: Send + Sync {
    /// Called when the pipeline state changes.
    fn on_state_changed(&self, _state: &PipelineState) {}

    /// Called after an upload attempt fails; `attempt` is 1-based.
    fn on_attempt_failed(&self, _key: &str, _attempt: u32, _error: &CourierError) {}

    /// Called once per package with its terminal outcome.
    fn on_package_finished(&self, _outcome: &DeliveryOutcome) {}

    /// Called when a fatal error ends the run.
    fn on_error(&self, _error: &CourierError) {}
}
