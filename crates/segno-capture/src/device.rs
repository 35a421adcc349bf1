//! Input device registry and mic/loopback classification.

use cpal::traits::{DeviceTrait, HostTrait};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Label substrings that mark a virtual loopback/system-capture device.
/// Matched case-insensitively against the device label.
pub const LOOPBACK_MARKERS: &[&str] = &[
    "blackhole",
    "loopback",
    "soundflower",
    "monitor of",
    "stereo mix",
    "what u hear",
];

/// Stable identity of an input device within one registry snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Microphone,
    Loopback,
}

/// One enumerated input device.
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub id: DeviceId,
    /// Display label; duplicates carry a ` #2`, ` #3` suffix.
    pub label: String,
    pub kind: DeviceKind,
    /// Channels of the device's default config.
    pub channels: u16,
    /// Sample rate of the device's default config, Hz.
    pub default_rate: u32,
    /// More than two channels, or a loopback device: stream negotiation
    /// asks for the native channel count and reduces to stereo itself.
    pub multichannel: bool,
    /// Host label before de-duplication, used to find the cpal device.
    pub(crate) raw_label: String,
    /// 1-based position among devices sharing `raw_label`.
    pub(crate) ordinal: usize,
}

/// Classify a device label as microphone or loopback.
pub fn classify_label(label: &str) -> DeviceKind {
    let lower = label.to_lowercase();
    if LOOPBACK_MARKERS.iter().any(|m| lower.contains(m)) {
        DeviceKind::Loopback
    } else {
        DeviceKind::Microphone
    }
}

/// Cached view of the host's input devices.
///
/// Enumeration failures are soft: they log and produce an empty list, so
/// a machine with no input hardware still gets a working station.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    cached: RwLock<Vec<AudioDeviceInfo>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-query the host and replace the cached snapshot.
    pub fn refresh(&self) -> Vec<AudioDeviceInfo> {
        let devices = enumerate_inputs();
        *self.cached.write() = devices.clone();
        devices
    }

    /// The cached snapshot; enumerates on first use.
    pub fn devices(&self) -> Vec<AudioDeviceInfo> {
        {
            let cached = self.cached.read();
            if !cached.is_empty() {
                return cached.clone();
            }
        }
        self.refresh()
    }

    pub fn find(&self, id: &DeviceId) -> Option<AudioDeviceInfo> {
        self.devices().into_iter().find(|d| &d.id == id)
    }

    /// First device whose label starts with `prefix` (case-insensitive).
    pub fn find_by_label_prefix(&self, prefix: &str) -> Option<AudioDeviceInfo> {
        let prefix = prefix.to_lowercase();
        self.devices()
            .into_iter()
            .find(|d| d.label.to_lowercase().starts_with(&prefix))
    }

    /// The host default input, matched into the registry snapshot.
    pub fn default_input(&self) -> Option<AudioDeviceInfo> {
        let host = cpal::default_host();
        let name = host.default_input_device()?.name().ok()?;
        let devices = self.devices();
        devices
            .iter()
            .find(|d| d.raw_label == name)
            .cloned()
            .or_else(|| devices.first().cloned())
    }
}

fn enumerate_inputs() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let iter = match host.input_devices() {
        Ok(iter) => iter,
        Err(err) => {
            warn!(%err, "input device enumeration failed");
            return Vec::new();
        }
    };

    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut devices = Vec::new();
    for device in iter {
        let raw_label = match device.name() {
            Ok(name) => name,
            Err(err) => {
                warn!(%err, "skipping unnamed input device");
                continue;
            }
        };
        let (channels, default_rate) = match device.default_input_config() {
            Ok(config) => (config.channels(), config.sample_rate().0),
            Err(err) => {
                warn!(label = %raw_label, %err, "no default input config, assuming stereo");
                (2, 48_000)
            }
        };

        let ordinal = {
            let count = seen.entry(raw_label.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let label = if ordinal > 1 {
            format!("{raw_label} #{ordinal}")
        } else {
            raw_label.clone()
        };
        let kind = classify_label(&raw_label);
        devices.push(AudioDeviceInfo {
            id: DeviceId::new(label.clone()),
            multichannel: channels > 2 || kind == DeviceKind::Loopback,
            label,
            kind,
            channels,
            default_rate,
            raw_label,
            ordinal,
        });
    }
    devices
}

/// Find the cpal device behind a registry entry by label and ordinal.
pub(crate) fn lookup_device(info: &AudioDeviceInfo) -> Option<cpal::Device> {
    let host = cpal::default_host();
    let mut seen = 0usize;
    for device in host.input_devices().ok()? {
        if device.name().ok().as_deref() == Some(info.raw_label.as_str()) {
            seen += 1;
            if seen == info.ordinal {
                return Some(device);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blackhole_classifies_as_loopback() {
        assert_eq!(classify_label("BlackHole 2ch"), DeviceKind::Loopback);
    }

    #[test]
    fn common_virtual_devices_classify_as_loopback() {
        for label in [
            "Loopback Audio",
            "Soundflower (64ch)",
            "Monitor of Built-in Audio",
            "Stereo Mix (Realtek)",
            "What U Hear",
        ] {
            assert_eq!(classify_label(label), DeviceKind::Loopback, "{label}");
        }
    }

    #[test]
    fn hardware_mics_classify_as_microphone() {
        for label in ["MacBook Pro Microphone", "USB Audio CODEC", "Scarlett 2i2"] {
            assert_eq!(classify_label(label), DeviceKind::Microphone, "{label}");
        }
    }

    #[test]
    fn registry_survives_headless_hosts() {
        // On machines with no input hardware this returns empty instead
        // of erroring; with hardware it returns labeled entries.
        let registry = DeviceRegistry::new();
        let devices = registry.devices();
        for device in &devices {
            assert!(!device.label.is_empty());
            assert!(device.channels >= 1);
        }
    }
}
