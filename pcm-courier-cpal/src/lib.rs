//! # pcm-courier-cpal
//!
//! Cross-platform live capture backend for pcm-courier, built on cpal.
//!
//! Provides:
//! - `CpalCapture` — input capture implementing `CaptureProvider`
//! - `list_input_devices` — input device enumeration
//!
//! ## Usage
//! ```ignore
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//! use pcm_courier_cpal::CpalCapture;
//! use pcm_courier_core::{LiveConfig, LiveSource};
//!
//! let running = Arc::new(AtomicBool::new(true));
//! let mic = CpalCapture::default_device()?;
//! let source = LiveSource::start(Box::new(mic), LiveConfig::default(), running)?;
//! ```

pub mod cpal_capture;
pub mod devices;

pub use cpal_capture::CpalCapture;
pub use devices::{list_input_devices, DeviceSelector};
