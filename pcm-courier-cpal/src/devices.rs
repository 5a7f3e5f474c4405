//! Input device enumeration and selection via the cpal default host.

use cpal::traits::{DeviceTrait, HostTrait};

use pcm_courier_core::models::audio_models::InputDevice;
use pcm_courier_core::models::error::CourierError;

/// Which input device to capture from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    Default,
    /// Position in `list_input_devices()`.
    Index(usize),
    /// Exact name, falling back to a case-insensitive substring match.
    Name(String),
}

impl DeviceSelector {
    /// Parse a command-line device argument: a number selects by index,
    /// anything else by name.
    pub fn parse(arg: Option<&str>) -> Self {
        match arg.map(str::trim) {
            None | Some("") => Self::Default,
            Some(text) => match text.parse::<usize>() {
                Ok(index) => Self::Index(index),
                Err(_) => Self::Name(text.to_string()),
            },
        }
    }
}

/// List all input devices of the default host.
///
/// Returns an empty `Vec` if the host cannot enumerate devices.
pub fn list_input_devices() -> Vec<InputDevice> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(index, device)| {
                let name = device.name().unwrap_or_else(|_| format!("Input Device {}", index + 1));
                let is_default = default_name.as_deref() == Some(name.as_str());
                InputDevice { index, name, is_default }
            })
            .collect(),
        Err(e) => {
            log::warn!("failed to enumerate input devices: {}", e);
            Vec::new()
        }
    }
}

/// Pick the entry `selector` refers to from an enumerated device list.
pub fn select_device<'a>(devices: &'a [InputDevice], selector: &DeviceSelector) -> Option<&'a InputDevice> {
    match selector {
        DeviceSelector::Default => devices.iter().find(|d| d.is_default).or_else(|| devices.first()),
        DeviceSelector::Index(index) => devices.iter().find(|d| d.index == *index),
        DeviceSelector::Name(name) => devices.iter().find(|d| d.name == *name).or_else(|| {
            let wanted = name.to_lowercase();
            devices.iter().find(|d| d.name.to_lowercase().contains(&wanted))
        }),
    }
}

/// Resolve `selector` to a concrete device and its description.
pub(crate) fn open_input_device(selector: &DeviceSelector) -> Result<(cpal::Device, InputDevice), CourierError> {
    let listed = list_input_devices();
    let info = select_device(&listed, selector)
        .cloned()
        .ok_or_else(|| CourierError::DeviceNotAvailable(format!("no input device matches {:?}", selector)))?;

    let host = cpal::default_host();
    let device = host
        .input_devices()
        .map_err(|e| CourierError::DeviceNotAvailable(e.to_string()))?
        .nth(info.index)
        .ok_or_else(|| CourierError::DeviceNotAvailable(format!("input device {} disappeared", info.name)))?;
    Ok((device, info))
}
