//! Stereo level metering and the analyzer scope.

use crate::lockfree::{AtomicCounter, AtomicLevel};

/// One meter reading.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Levels {
    /// Absolute peak per side since the last read.
    pub peak: (f32, f32),
    /// RMS of the most recent block per side.
    pub rms: (f32, f32),
}

/// Peak/RMS meter written by the render domain, read by the UI.
///
/// Peaks latch via [`AtomicLevel::raise`] and reset when read, so a slow
/// UI never misses a transient between polls.
#[derive(Debug, Default)]
pub struct StereoMeter {
    peak_l: AtomicLevel,
    peak_r: AtomicLevel,
    rms_l: AtomicLevel,
    rms_r: AtomicLevel,
}

impl StereoMeter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn write_block(&self, buf: &[(f32, f32)]) {
        if buf.is_empty() {
            return;
        }
        let mut peak_l = 0.0f32;
        let mut peak_r = 0.0f32;
        let mut sum_l = 0.0f32;
        let mut sum_r = 0.0f32;
        for &(l, r) in buf {
            peak_l = peak_l.max(l.abs());
            peak_r = peak_r.max(r.abs());
            sum_l += l * l;
            sum_r += r * r;
        }
        let n = buf.len() as f32;
        self.peak_l.raise(peak_l);
        self.peak_r.raise(peak_r);
        self.rms_l.set((sum_l / n).sqrt());
        self.rms_r.set((sum_r / n).sqrt());
    }

    /// Read and reset the latched peaks; RMS reads non-destructively.
    pub fn levels(&self) -> Levels {
        Levels {
            peak: (self.peak_l.swap(0.0), self.peak_r.swap(0.0)),
            rms: (self.rms_l.get(), self.rms_r.get()),
        }
    }
}

/// Coarse waveform scope behind the master meter.
///
/// The render side drops one peak value per block into a ring of bins;
/// the UI polls [`Scope::snapshot`] for a scrolling outline. Nothing here
/// allocates on the render path.
#[derive(Debug)]
pub struct Scope {
    bins: Box<[AtomicLevel]>,
    cursor: AtomicCounter,
}

impl Scope {
    pub fn new(bins: usize) -> Self {
        Self {
            bins: (0..bins.max(1)).map(|_| AtomicLevel::default()).collect(),
            cursor: AtomicCounter::new(0),
        }
    }

    #[inline]
    pub fn write_block(&self, buf: &[(f32, f32)]) {
        let mut peak = 0.0f32;
        for &(l, r) in buf {
            peak = peak.max(l.abs().max(r.abs()));
        }
        let idx = (self.cursor.bump() as usize) % self.bins.len();
        self.bins[idx].set(peak);
    }

    /// Bins ordered oldest to newest.
    pub fn snapshot(&self) -> Vec<f32> {
        let len = self.bins.len();
        let cursor = self.cursor.get() as usize;
        (0..len)
            .map(|i| self.bins[(cursor + i) % len].get())
            .collect()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peaks_latch_until_read() {
        let meter = StereoMeter::new();
        meter.write_block(&[(0.5, -0.8), (0.1, 0.2)]);
        meter.write_block(&[(0.1, 0.1)]);
        let levels = meter.levels();
        assert!((levels.peak.0 - 0.5).abs() < f32::EPSILON);
        assert!((levels.peak.1 - 0.8).abs() < f32::EPSILON);
        // Second read sees only what arrived since.
        let levels = meter.levels();
        assert_eq!(levels.peak, (0.0, 0.0));
    }

    #[test]
    fn rms_reflects_last_block() {
        let meter = StereoMeter::new();
        let block: Vec<(f32, f32)> = std::iter::repeat((0.5, 0.5)).take(64).collect();
        meter.write_block(&block);
        let levels = meter.levels();
        assert!((levels.rms.0 - 0.5).abs() < 1e-6);
        assert!((levels.rms.1 - 0.5).abs() < 1e-6);
    }

    #[test]
    fn scope_orders_oldest_to_newest() {
        let scope = Scope::new(4);
        for v in [0.1f32, 0.2, 0.3] {
            scope.write_block(&[(v, 0.0)]);
        }
        let snap = scope.snapshot();
        assert_eq!(snap.len(), 4);
        // Three writes into four bins: newest value lands last.
        assert!((snap[3] - 0.3).abs() < f32::EPSILON);
    }
}
