//! Sample clock for a rendering context.

use crate::lockfree::AtomicCounter;

/// Monotonic frame counter advanced by the render callback.
///
/// Control-domain code converts to seconds for UI display and for the
/// watchdog's progress check; the render domain only ever adds.
#[derive(Debug)]
pub struct SampleClock {
    frames: AtomicCounter,
    sample_rate: f64,
}

impl SampleClock {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            frames: AtomicCounter::new(0),
            sample_rate,
        }
    }

    #[inline]
    pub fn advance(&self, frames: u64) {
        self.frames.add(frames);
    }

    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames.get()
    }

    #[inline]
    pub fn seconds(&self) -> f64 {
        self.frames.get() as f64 / self.sample_rate
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_follow_frames() {
        let clock = SampleClock::new(48_000.0);
        assert_eq!(clock.seconds(), 0.0);
        clock.advance(24_000);
        assert!((clock.seconds() - 0.5).abs() < 1e-9);
        clock.advance(24_000);
        assert!((clock.seconds() - 1.0).abs() < 1e-9);
        assert_eq!(clock.frames(), 48_000);
    }
}
