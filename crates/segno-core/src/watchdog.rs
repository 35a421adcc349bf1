//! Render progress watchdog.
//!
//! A healthy context renders one second of audio per wall second. The
//! watchdog samples clock progress on a control thread and reports when
//! the ratio falls below [`PROGRESS_FLOOR`] on consecutive checks, which
//! catches dead devices and starved callbacks that never error out.

use crate::context::ContextShared;
use crate::lockfree::{AtomicCounter, AtomicFlag};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::error;

/// Seconds between progress checks.
pub const CHECK_INTERVAL_SECS: f64 = 2.0;

/// Minimum rendered-time / wall-time ratio considered healthy.
pub const PROGRESS_FLOOR: f64 = 0.75;

/// Consecutive failing checks before a stall is reported. Two, so one
/// scheduler hiccup on the watchdog thread itself stays quiet.
const STRIKES_TO_REPORT: u32 = 2;

const POLL_STEP: Duration = Duration::from_millis(100);

pub struct RenderWatchdog {
    stop: Arc<AtomicFlag>,
    stalls: Arc<AtomicCounter>,
    handle: Option<JoinHandle<()>>,
}

impl RenderWatchdog {
    pub fn spawn(shared: Arc<ContextShared>) -> Self {
        let stop = Arc::new(AtomicFlag::new(false));
        let stalls = Arc::new(AtomicCounter::new(0));
        let thread_stop = stop.clone();
        let thread_stalls = stalls.clone();

        let handle = thread::Builder::new()
            .name("segno-watchdog".into())
            .spawn(move || watch(shared, thread_stop, thread_stalls))
            .ok();

        Self {
            stop,
            stalls,
            handle,
        }
    }

    /// Stalls reported since spawn.
    pub fn stall_count(&self) -> u64 {
        self.stalls.get()
    }
}

impl Drop for RenderWatchdog {
    fn drop(&mut self) {
        self.stop.set(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn watch(shared: Arc<ContextShared>, stop: Arc<AtomicFlag>, stalls: Arc<AtomicCounter>) {
    let sample_rate = shared.clock().sample_rate();
    let mut baseline: Option<(u64, Instant)> = None;
    let mut strikes = 0u32;

    'outer: loop {
        let mut slept = Duration::ZERO;
        while slept.as_secs_f64() < CHECK_INTERVAL_SECS {
            if stop.get() {
                break 'outer;
            }
            thread::sleep(POLL_STEP);
            slept += POLL_STEP;
        }

        if !shared.is_running() {
            // Suspended contexts make no progress on purpose.
            baseline = None;
            strikes = 0;
            continue;
        }

        let frames = shared.clock().frames();
        let now = Instant::now();
        if let Some((base_frames, base_time)) = baseline {
            let rendered = (frames.saturating_sub(base_frames)) as f64 / sample_rate;
            let elapsed = now.duration_since(base_time).as_secs_f64();
            if elapsed > 0.0 {
                let ratio = rendered / elapsed;
                if ratio < PROGRESS_FLOOR {
                    strikes += 1;
                    if strikes >= STRIKES_TO_REPORT {
                        error!(ratio, rendered, elapsed, "render context stalled");
                        shared.mark_stalled();
                        stalls.bump();
                        strikes = 0;
                    }
                } else {
                    strikes = 0;
                }
            }
        }
        baseline = Some((frames, now));
    }
}
