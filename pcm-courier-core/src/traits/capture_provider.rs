use std::sync::Arc;

use crate::models::audio_models::InputDevice;
use crate::models::error::CourierError;

/// Callback invoked when an audio buffer is available.
///
/// Parameters:
/// - `samples`: Interleaved f32 samples.
/// - `sample_rate`: The actual sample rate of the delivered audio.
/// - `channels`: Number of interleaved channels.
pub type AudioBufferCallback = Arc<dyn Fn(&[f32], f64, u16) + Send + Sync + 'static>;

/// Callback invoked once if the device fails after capture has started.
pub type CaptureFaultCallback = Arc<dyn Fn(CourierError) + Send + Sync + 'static>;

/// Interface for platform-specific live audio inputs.
///
/// Implemented by:
/// - `CpalCapture` (pcm-courier-cpal)
pub trait CaptureProvider: Send {
    /// Whether this capture source is currently available.
    fn is_available(&self) -> bool;

    /// Start capturing audio, delivering buffers via `on_samples`.
    ///
    /// Device-open failures must be returned from here, before any buffer
    /// is delivered. The callback fires on the device's own thread; keep
    /// processing minimal.
    fn start(&mut self, on_samples: AudioBufferCallback, on_fault: CaptureFaultCallback) -> Result<(), CourierError>;

    /// Stop capturing and release the device.
    fn stop(&mut self) -> Result<(), CourierError>;

    /// Information about the device backing this provider.
    fn device_info(&self) -> InputDevice;
}
