//! cpal input capture provider.
//!
//! Opens an input device in its default configuration and delivers
//! interleaved f32 samples via the `AudioBufferCallback`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;

use pcm_courier_core::models::audio_models::InputDevice;
use pcm_courier_core::models::error::CourierError;
use pcm_courier_core::traits::capture_provider::{AudioBufferCallback, CaptureFaultCallback, CaptureProvider};

use crate::devices::{list_input_devices, open_input_device, select_device, DeviceSelector};

/// Live capture from a cpal input device.
///
/// `cpal::Stream` is not `Send`, so the stream is built, played and dropped
/// on a dedicated thread; `start` waits for that thread to report whether
/// the device opened.
pub struct CpalCapture {
    selector: DeviceSelector,
    info: InputDevice,
    running: Arc<AtomicBool>,
    capture_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl CpalCapture {
    /// Capture from the host's default input device.
    pub fn default_device() -> Result<Self, CourierError> {
        Self::new(DeviceSelector::Default)
    }

    /// Capture from the device at `index` in `list_input_devices()`.
    pub fn with_index(index: usize) -> Result<Self, CourierError> {
        Self::new(DeviceSelector::Index(index))
    }

    /// Capture from the device named `name`.
    pub fn with_name(name: impl Into<String>) -> Result<Self, CourierError> {
        Self::new(DeviceSelector::Name(name.into()))
    }

    pub fn new(selector: DeviceSelector) -> Result<Self, CourierError> {
        let listed = list_input_devices();
        let info = select_device(&listed, &selector)
            .cloned()
            .ok_or_else(|| CourierError::DeviceNotAvailable(format!("no input device matches {:?}", selector)))?;
        Ok(Self {
            selector,
            info,
            running: Arc::new(AtomicBool::new(false)),
            capture_handle: Mutex::new(None),
        })
    }
}

impl CaptureProvider for CpalCapture {
    fn is_available(&self) -> bool {
        list_input_devices().iter().any(|d| d.name == self.info.name)
    }

    fn start(&mut self, on_samples: AudioBufferCallback, on_fault: CaptureFaultCallback) -> Result<(), CourierError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CourierError::ConfigurationFailed("capture already running".into()));
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let selector = self.selector.clone();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), CourierError>>(1);

        let handle = thread::Builder::new()
            .name("pcm-courier-cpal".into())
            .spawn(move || match open_stream(&selector, on_samples, on_fault) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    while running.load(Ordering::SeqCst) {
                        thread::sleep(Duration::from_millis(20));
                    }
                    drop(stream);
                    log::debug!("input stream closed");
                }
                Err(e) => {
                    running.store(false, Ordering::SeqCst);
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| CourierError::CaptureFailed(format!("failed to spawn capture thread: {}", e)))?;

        let opened = ready_rx
            .recv()
            .map_err(|_| CourierError::CaptureFailed("capture thread exited before opening the device".into()))
            .and_then(|result| result);

        if let Err(e) = opened {
            self.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(e);
        }

        *self.capture_handle.lock() = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CourierError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_handle.lock().take() {
            let _ = handle.join();
        }
        Ok(())
    }

    fn device_info(&self) -> InputDevice {
        self.info.clone()
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Build and play an input stream for the selected device.
///
/// Runs on the capture thread; the returned stream must be dropped there.
fn open_stream(
    selector: &DeviceSelector,
    on_samples: AudioBufferCallback,
    on_fault: CaptureFaultCallback,
) -> Result<Stream, CourierError> {
    let (device, info) = open_input_device(selector)?;

    let supported = device
        .default_input_config()
        .map_err(|e| CourierError::DeviceNotAvailable(format!("{}: {}", info.name, e)))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let sample_format = supported.sample_format();
    log::info!(
        "opening input device {} ({} Hz, {} ch, {:?})",
        info.name,
        sample_rate,
        channels,
        sample_format
    );

    let config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let rate = sample_rate as f64;
    let on_error = move |err: cpal::StreamError| {
        log::error!("audio stream error: {}", err);
        on_fault(CourierError::CaptureFailed(err.to_string()));
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _| on_samples(data, rate, channels),
            on_error,
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    scratch.clear();
                    scratch.extend(data.iter().map(|&s| s as f32 / 32768.0));
                    on_samples(&scratch, rate, channels);
                },
                on_error,
                None,
            )
        }
        SampleFormat::U16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[u16], _| {
                    scratch.clear();
                    scratch.extend(data.iter().map(|&s| (s as f32 - 32768.0) / 32768.0));
                    on_samples(&scratch, rate, channels);
                },
                on_error,
                None,
            )
        }
        SampleFormat::U8 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[u8], _| {
                    scratch.clear();
                    scratch.extend(data.iter().map(|&s| (s as f32 - 128.0) / 128.0));
                    on_samples(&scratch, rate, channels);
                },
                on_error,
                None,
            )
        }
        other => {
            return Err(CourierError::CaptureFailed(format!(
                "unsupported sample format: {:?}",
                other
            )))
        }
    }
    .map_err(|e| CourierError::CaptureFailed(format!("failed to build input stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| CourierError::CaptureFailed(format!("failed to start input stream: {}", e)))?;
    Ok(stream)
}
