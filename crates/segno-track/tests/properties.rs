//! Property-based tests for the loop transport math.
//!
//! The playhead invariants are what the rest of the station leans on:
//! wrapped positions never leave the loop region, wraps preserve the
//! overshoot, and unlooped playback terminates. Regions, rates and
//! start positions are randomized with proptest.

use proptest::prelude::*;
use segno_track::transport::{
    advance, step_per_frame, LoopSpan, StepOutcome, MIN_LOOP_SECS,
};

const SOURCE_RATE: f64 = 48_000.0;

/// A loop region at least twice the degenerate threshold, inside a
/// 10 s buffer, plus a start position inside the region.
fn looped_setup() -> impl Strategy<Value = (LoopSpan, f64)> {
    (0.0f64..8.0, 0.01f64..2.0, 0.0f64..1.0).prop_filter_map(
        "resolvable region",
        |(start_secs, len_secs, offset)| {
            let total = 10.0 * SOURCE_RATE;
            let span = LoopSpan::resolve(
                start_secs,
                start_secs + len_secs,
                SOURCE_RATE,
                total,
            )?;
            let pos = span.start + offset * (span.len() - 1.0).max(0.0);
            Some((span, pos))
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Forward looped playback never leaves `[start, end)`, at any rate
    /// in the legal range and for any region and starting offset.
    #[test]
    fn forward_wrap_stays_inside_the_region(
        (span, start_pos) in looped_setup(),
        rate in 0.25f64..4.0,
        frames in 1usize..4096,
    ) {
        let step = step_per_frame(rate, SOURCE_RATE, SOURCE_RATE);
        let total = 10.0 * SOURCE_RATE;
        let mut pos = start_pos;
        for _ in 0..frames {
            match advance(pos, step, false, Some(span), total) {
                StepOutcome::At(next) => pos = next,
                StepOutcome::Finished => {
                    prop_assert!(false, "looped playback must not finish");
                }
            }
            prop_assert!(
                pos >= span.start && pos < span.end,
                "position {} left [{}, {})", pos, span.start, span.end
            );
        }
    }

    /// Reverse looped playback mirrors the forward invariant.
    #[test]
    fn reverse_wrap_stays_inside_the_region(
        (span, start_pos) in looped_setup(),
        rate in 0.25f64..4.0,
        frames in 1usize..4096,
    ) {
        let step = step_per_frame(rate, SOURCE_RATE, SOURCE_RATE);
        let total = 10.0 * SOURCE_RATE;
        let mut pos = start_pos;
        for _ in 0..frames {
            match advance(pos, step, true, Some(span), total) {
                StepOutcome::At(next) => pos = next,
                StepOutcome::Finished => {
                    prop_assert!(false, "looped playback must not finish");
                }
            }
            prop_assert!(
                pos >= span.start && pos < span.end,
                "reverse position {} left [{}, {})", pos, span.start, span.end
            );
        }
    }

    /// A forward wrap keeps the overshoot: stepping off the end by `d`
    /// lands `d` past the start (modulo the region length).
    #[test]
    fn forward_wrap_preserves_overshoot(
        (span, _) in looped_setup(),
        overshoot_frac in 0.0f64..0.99,
    ) {
        // One step that crosses the end by a known amount under one length.
        let overshoot = overshoot_frac * span.len();
        let pos = span.end - 1.0;
        let step = 1.0 + overshoot;
        match advance(pos, step, false, Some(span), 10.0 * SOURCE_RATE) {
            StepOutcome::At(next) => {
                let expected = span.start + overshoot;
                prop_assert!(
                    (next - expected).abs() < 1e-6,
                    "wrapped to {next}, expected {expected}"
                );
            }
            StepOutcome::Finished => prop_assert!(false, "looped playback must not finish"),
        }
    }

    /// Unlooped forward playback reports `Finished` within the frame
    /// count implied by the remaining runway, and never yields a
    /// position outside the buffer.
    #[test]
    fn unlooped_playback_terminates(
        start_secs in 9.5f64..9.99,
        rate in 1.0f64..4.0,
    ) {
        let total = 10.0 * SOURCE_RATE;
        let step = step_per_frame(rate, SOURCE_RATE, SOURCE_RATE);
        let mut pos = start_secs * SOURCE_RATE;
        let budget = ((total - pos) / step).ceil() as usize + 2;
        let mut finished = false;
        for _ in 0..budget {
            match advance(pos, step, false, None, total) {
                StepOutcome::At(next) => {
                    prop_assert!(next >= 0.0 && next < total);
                    pos = next;
                }
                StepOutcome::Finished => {
                    finished = true;
                    break;
                }
            }
        }
        prop_assert!(finished, "ran {} frames without finishing", budget);
    }

    /// Regions at or under the degenerate threshold never resolve, and
    /// resolvable bounds are clipped into the buffer.
    #[test]
    fn degenerate_regions_do_not_resolve(
        start_secs in 0.0f64..10.0,
        len_secs in -1.0f64..=MIN_LOOP_SECS,
    ) {
        let resolved = LoopSpan::resolve(
            start_secs,
            start_secs + len_secs,
            SOURCE_RATE,
            10.0 * SOURCE_RATE,
        );
        prop_assert!(resolved.is_none(), "resolved a degenerate region: {resolved:?}");
    }

    /// Bounds beyond the buffer clip to it; a region that survives the
    /// clip always sits inside `[0, total]`.
    #[test]
    fn resolve_clips_into_the_buffer(
        start_secs in -5.0f64..12.0,
        end_secs in -5.0f64..12.0,
    ) {
        let total = 10.0 * SOURCE_RATE;
        if let Some(span) = LoopSpan::resolve(start_secs, end_secs, SOURCE_RATE, total) {
            prop_assert!(span.start >= 0.0);
            prop_assert!(span.end <= total);
            prop_assert!(span.len() > MIN_LOOP_SECS * SOURCE_RATE);
        }
    }
}
