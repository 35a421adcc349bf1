//! Master output section: volume trim, brickwall limiter, meters.

use crate::lockfree::AtomicLevel;
use crate::meter::{Levels, Scope, StereoMeter};
use std::sync::Arc;

/// Master volume range in dB.
pub const MASTER_DB_MIN: f32 = -80.0;
pub const MASTER_DB_MAX: f32 = 20.0;

/// Limiter ceiling. Slightly under full scale so downstream 16-bit
/// conversion never ticks over.
pub const LIMITER_THRESHOLD_DB: f32 = -0.3;

const LIMITER_RELEASE_SECS: f32 = 0.08;

#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

#[inline]
pub fn linear_to_db(lin: f32) -> f32 {
    20.0 * lin.max(1e-10).log10()
}

#[derive(Debug)]
struct MasterShared {
    volume_db: AtomicLevel,
}

/// Control-domain handle to the master section.
#[derive(Debug, Clone)]
pub struct MasterBus {
    shared: Arc<MasterShared>,
    meter: Arc<StereoMeter>,
    scope: Arc<Scope>,
}

impl MasterBus {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(MasterShared {
                volume_db: AtomicLevel::new(0.0),
            }),
            meter: Arc::new(StereoMeter::new()),
            scope: Arc::new(Scope::default()),
        }
    }

    /// Set master volume in dB, clamped to
    /// [`MASTER_DB_MIN`, `MASTER_DB_MAX`]. Out-of-range values clamp
    /// rather than error.
    pub fn set_volume_db(&self, db: f32) {
        self.shared
            .volume_db
            .set(db.clamp(MASTER_DB_MIN, MASTER_DB_MAX));
    }

    pub fn volume_db(&self) -> f32 {
        self.shared.volume_db.get()
    }

    /// Post-limiter peak/RMS.
    pub fn levels(&self) -> Levels {
        self.meter.levels()
    }

    /// Post-limiter waveform outline for the analyzer view.
    pub fn scope_snapshot(&self) -> Vec<f32> {
        self.scope.snapshot()
    }

    /// Build the render-side section.
    pub fn section(&self, sample_rate: f32) -> MasterSection {
        MasterSection {
            shared: self.shared.clone(),
            meter: self.meter.clone(),
            scope: self.scope.clone(),
            limiter: Limiter::new(db_to_linear(LIMITER_THRESHOLD_DB), sample_rate),
            gain: db_to_linear(self.shared.volume_db.get()),
        }
    }
}

impl Default for MasterBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stereo brickwall limiter: instant attack, exponential release.
#[derive(Debug)]
struct Limiter {
    threshold: f32,
    release: f32,
    gain: f32,
}

impl Limiter {
    fn new(threshold: f32, sample_rate: f32) -> Self {
        Self {
            threshold,
            release: (-1.0 / (sample_rate * LIMITER_RELEASE_SECS)).exp(),
            gain: 1.0,
        }
    }

    #[inline]
    fn process(&mut self, l: f32, r: f32) -> (f32, f32) {
        let peak = l.abs().max(r.abs());
        let target = if peak > self.threshold {
            self.threshold / peak
        } else {
            1.0
        };
        if target < self.gain {
            self.gain = target;
        } else {
            self.gain = target + (self.gain - target) * self.release;
        }
        (l * self.gain, r * self.gain)
    }
}

/// Render-domain master section.
///
/// Applies the volume trim with a one-block linear ramp, limits, then
/// writes the meters. The caller hands in the already-summed mix.
#[derive(Debug)]
pub struct MasterSection {
    shared: Arc<MasterShared>,
    meter: Arc<StereoMeter>,
    scope: Arc<Scope>,
    limiter: Limiter,
    gain: f32,
}

impl MasterSection {
    pub fn process_block(&mut self, buf: &mut [(f32, f32)]) {
        if buf.is_empty() {
            return;
        }
        let target = db_to_linear(self.shared.volume_db.get());
        let step = (target - self.gain) / buf.len() as f32;
        for frame in buf.iter_mut() {
            self.gain += step;
            let (l, r) = (frame.0 * self.gain, frame.1 * self.gain);
            *frame = self.limiter.process(l, r);
        }
        self.gain = target;
        self.meter.write_block(buf);
        self.scope.write_block(buf);
    }
}
