//! Loop transport math.
//!
//! Positions are fractional source-frame indices (`f64`). The render
//! side steps the playhead once per output frame; everything here is
//! pure so the wrap behavior can be tested without an audio context.

use segno_core::StateCell;

/// Loop regions shorter than this are treated as non-looping.
pub const MIN_LOOP_SECS: f64 = 1e-3;

/// Per-track playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    Idle = 0,
    Playing = 1,
    Recording = 2,
    Paused = 3,
}

impl From<u8> for TransportState {
    fn from(raw: u8) -> Self {
        match raw {
            1 => Self::Playing,
            2 => Self::Recording,
            3 => Self::Paused,
            _ => Self::Idle,
        }
    }
}

impl From<TransportState> for u8 {
    fn from(state: TransportState) -> Self {
        state as u8
    }
}

/// Shared atomic cell holding a [`TransportState`].
pub type TransportCell = StateCell<TransportState>;

/// A validated loop region in source frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSpan {
    pub start: f64,
    pub end: f64,
}

impl LoopSpan {
    /// Resolve user loop bounds (seconds) against a source buffer.
    ///
    /// Returns `None` when the region is degenerate (`end <= start`, or
    /// shorter than [`MIN_LOOP_SECS`] once clipped to the buffer), in
    /// which case playback runs unlooped.
    pub fn resolve(
        start_secs: f64,
        end_secs: f64,
        source_rate: f64,
        total_frames: f64,
    ) -> Option<Self> {
        let start = (start_secs * source_rate).clamp(0.0, total_frames);
        let end = (end_secs * source_rate).clamp(0.0, total_frames);
        if end - start <= MIN_LOOP_SECS * source_rate {
            return None;
        }
        Some(Self { start, end })
    }

    #[inline]
    pub fn len(&self) -> f64 {
        self.end - self.start
    }
}

/// Result of advancing the playhead by one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    At(f64),
    Finished,
}

/// Playhead step per output frame for a given rate and rate mismatch.
#[inline]
pub fn step_per_frame(rate: f64, source_rate: f64, context_rate: f64) -> f64 {
    rate * (source_rate / context_rate)
}

/// Advance one step, wrapping inside `span` when looping.
///
/// Forward wraps preserve the overshoot past the loop end; reverse
/// wraps mirror that from the top. Looped positions stay in
/// `[span.start, span.end)`. Without a span the playhead runs off the
/// buffer ends and reports `Finished`.
pub fn advance(
    pos: f64,
    step: f64,
    reverse: bool,
    span: Option<LoopSpan>,
    total_frames: f64,
) -> StepOutcome {
    if reverse {
        let next = pos - step;
        match span {
            Some(s) => {
                if next < s.start {
                    let mut wrapped = s.end - (s.start - next) % s.len();
                    if wrapped >= s.end {
                        wrapped = s.start;
                    }
                    StepOutcome::At(wrapped)
                } else {
                    StepOutcome::At(next)
                }
            }
            None => {
                if next < 0.0 {
                    StepOutcome::Finished
                } else {
                    StepOutcome::At(next)
                }
            }
        }
    } else {
        let next = pos + step;
        match span {
            Some(s) => {
                if next >= s.end {
                    let mut wrapped = s.start + (next - s.end) % s.len();
                    if wrapped >= s.end {
                        wrapped = s.start;
                    }
                    StepOutcome::At(wrapped)
                } else {
                    StepOutcome::At(next)
                }
            }
            None => {
                if next >= total_frames {
                    StepOutcome::Finished
                } else {
                    StepOutcome::At(next)
                }
            }
        }
    }
}
