//! Output device enumeration and selection.

use serde::{Deserialize, Serialize};

/// Metadata about an audio output device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default output device.
    pub is_default: bool,
    /// Heuristic flag for sinks that do not reach a speaker (null sinks,
    /// dummy outputs, monitors).
    pub is_virtual: bool,
}

const VIRTUAL_KEYWORDS: &[&str] = &[
    "null",
    "dummy",
    "discard",
    "monitor of",
    "virtual",
    "loopback",
];

pub fn is_virtual_output_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    VIRTUAL_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// List all available audio output devices, default first, virtual last.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    match host.output_devices() {
        Ok(devices) => {
            let mut list = devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Output Device {}", idx + 1));
                    DeviceInfo {
                        is_default: default_name.as_deref() == Some(name.as_str()),
                        is_virtual: is_virtual_output_name(&name),
                        name,
                    }
                })
                .collect::<Vec<_>>();
            sort_devices(&mut list);
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            default_name
                .map(|name| {
                    vec![DeviceInfo {
                        is_virtual: is_virtual_output_name(&name),
                        name,
                        is_default: true,
                    }]
                })
                .unwrap_or_default()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}

fn sort_devices(list: &mut [DeviceInfo]) {
    list.sort_by_key(|d| (!d.is_default, d.is_virtual, d.name.to_ascii_lowercase()));
}

/// Open an output device by preferred name, otherwise fall back to the
/// default output device and then the first available one.
#[cfg(feature = "audio-cpal")]
pub(crate) fn resolve_output_device(
    preferred_name: Option<&str>,
) -> crate::error::Result<cpal::Device> {
    use crate::error::VocalisError;
    use cpal::traits::{DeviceTrait, HostTrait};
    use tracing::warn;

    let host = cpal::default_host();

    if let Some(preferred) = preferred_name {
        match host.output_devices() {
            Ok(mut devices) => {
                if let Some(found) =
                    devices.find(|d| d.name().map(|n| n == preferred).unwrap_or(false))
                {
                    return Ok(found);
                }
                warn!("preferred output device '{preferred}' not found, falling back");
            }
            Err(e) => warn!("failed to list output devices while resolving preference: {e}"),
        }
    }

    if let Some(default) = host.default_output_device() {
        return Ok(default);
    }

    let mut devices = host
        .output_devices()
        .map_err(|e| VocalisError::AudioDevice(e.to_string()))?;
    let fallback = devices.next().ok_or(VocalisError::NoDefaultOutputDevice)?;
    warn!("no default output device, falling back to first available output");
    Ok(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_virtual_outputs() {
        assert!(is_virtual_output_name("Null Output"));
        assert!(is_virtual_output_name("Monitor of Built-in Audio"));
        assert!(!is_virtual_output_name("Speakers (Realtek High Definition Audio)"));
    }

    #[test]
    fn default_sorts_first_and_virtual_last() {
        let mut list = vec![
            DeviceInfo {
                name: "Null Output".into(),
                is_default: false,
                is_virtual: true,
            },
            DeviceInfo {
                name: "b headphones".into(),
                is_default: false,
                is_virtual: false,
            },
            DeviceInfo {
                name: "Speakers".into(),
                is_default: true,
                is_virtual: false,
            },
        ];
        sort_devices(&mut list);
        let names: Vec<&str> = list.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["Speakers", "b headphones", "Null Output"]);
    }
}
