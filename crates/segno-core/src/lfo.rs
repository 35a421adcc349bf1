//! Global low-frequency oscillators.
//!
//! The station carries two LFOs that any track parameter can bind to.
//! Control code owns an [`LfoBank`]; the render side owns an [`LfoBankRt`]
//! that advances phase per block and publishes the latest value back
//! through the shared meter cells for the UI.

use crate::lockfree::{AtomicFlag, AtomicLevel};
use crate::{Error, Result};
use std::sync::Arc;

/// Number of global LFOs.
pub const LFO_COUNT: usize = 2;

/// Allowed LFO frequency range in Hz.
pub const LFO_MIN_HZ: f32 = 0.01;
pub const LFO_MAX_HZ: f32 = 40.0;

/// State shared between one LFO's control handle and its oscillator.
#[derive(Debug)]
pub struct LfoShared {
    enabled: AtomicFlag,
    freq_hz: AtomicLevel,
    meter: AtomicLevel,
}

impl LfoShared {
    fn new() -> Self {
        Self {
            enabled: AtomicFlag::new(false),
            freq_hz: AtomicLevel::new(1.0),
            meter: AtomicLevel::new(0.0),
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled.get()
    }

    #[inline]
    pub fn freq_hz(&self) -> f32 {
        self.freq_hz.get()
    }

    /// Last rendered sample in [-1, 1]; 0 while disabled.
    #[inline]
    pub fn meter(&self) -> f32 {
        self.meter.get()
    }
}

/// Control-domain handle to the two global LFOs.
#[derive(Debug, Clone)]
pub struct LfoBank {
    shared: [Arc<LfoShared>; LFO_COUNT],
}

impl LfoBank {
    pub fn new() -> Self {
        Self {
            shared: [Arc::new(LfoShared::new()), Arc::new(LfoShared::new())],
        }
    }

    /// Set frequency and enable state. Frequency clamps to
    /// [`LFO_MIN_HZ`, `LFO_MAX_HZ`].
    pub fn set(&self, index: usize, freq_hz: f32, enabled: bool) -> Result<()> {
        let lfo = self.shared.get(index).ok_or(Error::NoSuchLfo(index))?;
        lfo.freq_hz.set(freq_hz.clamp(LFO_MIN_HZ, LFO_MAX_HZ));
        lfo.enabled.set(enabled);
        if !enabled {
            lfo.meter.set(0.0);
        }
        Ok(())
    }

    pub fn meter(&self, index: usize) -> Result<f32> {
        self.shared
            .get(index)
            .map(|l| l.meter())
            .ok_or(Error::NoSuchLfo(index))
    }

    pub fn shared(&self, index: usize) -> Option<Arc<LfoShared>> {
        self.shared.get(index).cloned()
    }

    /// Build the render-side oscillator bank.
    pub fn oscillators(&self) -> LfoBankRt {
        LfoBankRt {
            oscs: [
                LfoOsc::new(self.shared[0].clone()),
                LfoOsc::new(self.shared[1].clone()),
            ],
        }
    }
}

impl Default for LfoBank {
    fn default() -> Self {
        Self::new()
    }
}

/// One sine oscillator. Phase lives only on the render side.
#[derive(Debug)]
struct LfoOsc {
    shared: Arc<LfoShared>,
    phase: f64,
    value: f32,
    active: bool,
}

impl LfoOsc {
    fn new(shared: Arc<LfoShared>) -> Self {
        Self {
            shared,
            phase: 0.0,
            value: 0.0,
            active: false,
        }
    }

    fn render_block(&mut self, sample_rate: f64, frames: usize) {
        self.active = self.shared.enabled.get();
        if !self.active {
            // Phase resets so re-enabling starts from a zero crossing.
            self.phase = 0.0;
            self.value = 0.0;
            return;
        }
        let freq = f64::from(self.shared.freq_hz.get());
        self.phase += freq * frames as f64 / sample_rate;
        self.phase -= self.phase.floor();
        self.value = (self.phase * std::f64::consts::TAU).sin() as f32;
        self.shared.meter.set(self.value);
    }
}

/// Render-domain bank: advances both LFOs once per block.
#[derive(Debug)]
pub struct LfoBankRt {
    oscs: [LfoOsc; LFO_COUNT],
}

impl LfoBankRt {
    pub fn render_block(&mut self, sample_rate: f64, frames: usize) {
        for osc in self.oscs.iter_mut() {
            osc.render_block(sample_rate, frames);
        }
    }

    /// Block-rate value of an LFO, or `None` while it is disabled.
    #[inline]
    pub fn value(&self, index: usize) -> Option<f32> {
        let osc = self.oscs.get(index)?;
        osc.active.then_some(osc.value)
    }
}
