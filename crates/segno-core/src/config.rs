//! Station configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a looping station.
///
/// The app layer persists this alongside its own UI state and feeds it back
/// on the next launch; everything here is validated before a context opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// Render sample rate in Hz.
    pub sample_rate: f64,
    /// Requested output buffer size in frames. Hosts that reject the
    /// request fall back to their default buffer.
    pub buffer_frames: u32,
    /// Number of track channels.
    pub tracks: usize,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            buffer_frames: 512,
            tracks: 4,
        }
    }
}

impl StationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate < 8_000.0 || self.sample_rate > 384_000.0 {
            return Err(Error::InvalidConfig(format!(
                "sample_rate {} out of range (8000-384000 Hz)",
                self.sample_rate
            )));
        }
        if self.buffer_frames < 32 || self.buffer_frames > 8_192 {
            return Err(Error::InvalidConfig(format!(
                "buffer_frames {} out of range (32-8192)",
                self.buffer_frames
            )));
        }
        if self.tracks == 0 || self.tracks > 16 {
            return Err(Error::InvalidConfig(format!(
                "tracks {} out of range (1-16)",
                self.tracks
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = StationConfig::default();
        assert_eq!(config.sample_rate, 48_000.0);
        assert_eq!(config.tracks, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = StationConfig::default();
        config.sample_rate = 1_000.0;
        assert!(config.validate().is_err());

        let mut config = StationConfig::default();
        config.buffer_frames = 16;
        assert!(config.validate().is_err());

        let mut config = StationConfig::default();
        config.tracks = 17;
        assert!(config.validate().is_err());
    }
}
