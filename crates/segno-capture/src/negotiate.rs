//! Stream negotiation: pick a device and config in three tiers.

use crate::device::{lookup_device, AudioDeviceInfo};
use crate::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait};
use tracing::{debug, warn};

/// Which negotiation tier produced the opened stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Requested device at its native channel count and rate.
    Exact,
    /// Requested device with its default config.
    Relaxed,
    /// Host default input with its default config.
    Fallback,
}

/// How a multichannel capture frame reduces to a stereo pair.
///
/// Capture is always raw: no echo cancellation, gain control or noise
/// suppression is ever requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMap {
    /// Pick two explicit channel indices.
    Pair(usize, usize),
    /// Average even channels into the left side and odd channels into
    /// the right.
    MergeAll,
}

impl Default for ChannelMap {
    fn default() -> Self {
        ChannelMap::Pair(0, 1)
    }
}

impl ChannelMap {
    /// Reduce one interleaved frame to a stereo pair. Mono duplicates;
    /// missing channels read as silence.
    #[inline]
    pub fn fold(&self, frame: &[f32]) -> (f32, f32) {
        match frame.len() {
            0 => (0.0, 0.0),
            1 => (frame[0], frame[0]),
            _ => match *self {
                ChannelMap::Pair(l, r) => (
                    frame.get(l).copied().unwrap_or(0.0),
                    frame.get(r).copied().unwrap_or(0.0),
                ),
                ChannelMap::MergeAll => {
                    let mut left = 0.0f32;
                    let mut right = 0.0f32;
                    let mut pairs = 0u32;
                    for pair in frame.chunks(2) {
                        left += pair[0];
                        right += pair.get(1).copied().unwrap_or(pair[0]);
                        pairs += 1;
                    }
                    let n = pairs as f32;
                    (left / n, right / n)
                }
            },
        }
    }
}

pub(crate) struct Negotiated {
    pub device: cpal::Device,
    pub config: cpal::SupportedStreamConfig,
    pub tier: Tier,
}

/// Walk the negotiation ladder for a registry entry.
///
/// Tier failures log and fall through; only all three failing errors.
pub(crate) fn negotiate_input(info: &AudioDeviceInfo) -> Result<Negotiated> {
    if let Some(device) = lookup_device(info) {
        match exact_config(&device, info) {
            Some(config) => {
                debug!(label = %info.label, "input negotiated at native config");
                return Ok(Negotiated {
                    device,
                    config,
                    tier: Tier::Exact,
                });
            }
            None => warn!(label = %info.label, "native config unavailable, relaxing"),
        }

        match device.default_input_config() {
            Ok(config) => {
                return Ok(Negotiated {
                    device,
                    config,
                    tier: Tier::Relaxed,
                })
            }
            Err(err) => warn!(label = %info.label, %err, "default config failed, falling back"),
        }
    } else {
        warn!(label = %info.label, "device no longer present, falling back");
    }

    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::NoUsableInput(info.label.clone()))?;
    let config = device
        .default_input_config()
        .map_err(|_| Error::NoUsableInput(info.label.clone()))?;
    Ok(Negotiated {
        device,
        config,
        tier: Tier::Fallback,
    })
}

/// Native channel count at the device's default rate, if supported.
fn exact_config(
    device: &cpal::Device,
    info: &AudioDeviceInfo,
) -> Option<cpal::SupportedStreamConfig> {
    let wanted_rate = cpal::SampleRate(info.default_rate);
    let ranges = device.supported_input_configs().ok()?;
    for range in ranges {
        if range.channels() == info.channels {
            if let Some(config) = range.try_with_sample_rate(wanted_rate) {
                return Some(config);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mono_duplicates_into_both_sides() {
        let map = ChannelMap::default();
        assert_eq!(map.fold(&[0.7]), (0.7, 0.7));
    }

    #[test]
    fn pair_selects_explicit_channels() {
        let frame = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(ChannelMap::Pair(0, 1).fold(&frame), (0.1, 0.2));
        assert_eq!(ChannelMap::Pair(2, 3).fold(&frame), (0.3, 0.4));
        // Out-of-range side reads silence.
        assert_eq!(ChannelMap::Pair(0, 9).fold(&frame), (0.1, 0.0));
    }

    #[test]
    fn merge_averages_adjacent_pairs() {
        let frame = [1.0, 0.0, 0.0, 1.0];
        let (l, r) = ChannelMap::MergeAll.fold(&frame);
        assert_relative_eq!(l, 0.5);
        assert_relative_eq!(r, 0.5);
    }

    #[test]
    fn empty_frame_is_silent() {
        assert_eq!(ChannelMap::MergeAll.fold(&[]), (0.0, 0.0));
    }
}
