//! Builder for configuring and constructing a [`Station`].

use segno_core::StationConfig;

use crate::engine::Station;
use crate::error::Result;

/// Collects a [`StationConfig`] and assembles the station.
///
/// `build` opens the default output device; `build_offline` makes a
/// station that renders only when pumped, which is what tests and
/// offline bounces use. Validation happens at build time: sample rate
/// 8 kHz to 384 kHz, 1 to 16 tracks, buffer 32 to 8192 frames.
///
/// # Example
///
/// ```ignore
/// use segno::Station;
///
/// let station = Station::builder()
///     .sample_rate(48_000.0)
///     .buffer_frames(256)
///     .tracks(8)
///     .build()?;
/// ```
pub struct StationBuilder {
    config: StationConfig,
}

impl StationBuilder {
    pub fn new() -> Self {
        Self {
            config: StationConfig::default(),
        }
    }

    /// Start from a persisted configuration instead of the defaults.
    pub fn config(mut self, config: StationConfig) -> Self {
        self.config = config;
        self
    }

    /// Default: 48000. A live device that cannot honor the rate falls
    /// back to its own; query [`Station::sample_rate`] after building.
    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.config.sample_rate = rate;
        self
    }

    /// Default: 512
    pub fn buffer_frames(mut self, frames: u32) -> Self {
        self.config.buffer_frames = frames;
        self
    }

    /// Default: 4
    pub fn tracks(mut self, count: usize) -> Self {
        self.config.tracks = count;
        self
    }

    /// Open the default output device and start rendering.
    pub fn build(self) -> Result<Station> {
        Station::assemble(self.config, false)
    }

    /// Build a station that renders only when pumped.
    pub fn build_offline(self) -> Result<Station> {
        Station::assemble(self.config, true)
    }
}

impl Default for StationBuilder {
    fn default() -> Self {
        Self::new()
    }
}
