//! Audio device enumeration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Metadata about one audio endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub direction: DeviceDirection,
    /// Whether this is the system default for its direction.
    pub is_default: bool,
}

/// Default device first, then by case-insensitive name.
fn sort_devices(list: &mut [DeviceInfo]) {
    list.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
}

/// List microphones. Empty when no backend is compiled in or none exist.
pub fn list_input_devices() -> Vec<DeviceInfo> {
    let mut list = enumerate(DeviceDirection::Input);
    sort_devices(&mut list);
    list
}

/// List speakers. Empty when no backend is compiled in or none exist.
pub fn list_output_devices() -> Vec<DeviceInfo> {
    let mut list = enumerate(DeviceDirection::Output);
    sort_devices(&mut list);
    list
}

#[cfg(feature = "audio-cpal")]
fn enumerate(direction: DeviceDirection) -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let (default_name, devices) = match direction {
        DeviceDirection::Input => (
            host.default_input_device().and_then(|d| d.name().ok()),
            host.input_devices().map(|d| d.collect::<Vec<_>>()),
        ),
        DeviceDirection::Output => (
            host.default_output_device().and_then(|d| d.name().ok()),
            host.output_devices().map(|d| d.collect::<Vec<_>>()),
        ),
    };

    match devices {
        Ok(devices) => devices
            .iter()
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("{direction:?} Device {}", idx + 1));
                let is_default = default_name.as_deref() == Some(name.as_str());
                DeviceInfo {
                    name,
                    direction,
                    is_default,
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("failed to enumerate {direction:?} devices: {e}");
            default_name
                .map(|name| {
                    vec![DeviceInfo {
                        name,
                        direction,
                        is_default: true,
                    }]
                })
                .unwrap_or_default()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
fn enumerate(_direction: DeviceDirection) -> Vec<DeviceInfo> {
    vec![]
}
