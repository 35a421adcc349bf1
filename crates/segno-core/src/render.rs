//! The render seam between the context and the station graph.

/// Per-block render parameters.
#[derive(Debug, Clone, Copy)]
pub struct BlockCtx {
    /// Context sample rate in Hz.
    pub sample_rate: f32,
    /// Context frame position at the start of this block.
    pub start_frame: u64,
}

/// A block renderer driven by an [`crate::AudioContext`].
///
/// `render` fills `out` with stereo frames. It runs on the audio thread:
/// no locks, no allocation, no blocking. State shared with the control
/// domain goes through the cells in [`crate::lockfree`] or `ArcSwap`
/// snapshots.
pub trait Render: Send {
    fn render(&mut self, ctx: &BlockCtx, out: &mut [(f32, f32)]);
}

/// Renders silence. Stands in while a station graph is not yet installed.
#[derive(Debug, Default)]
pub struct Silence;

impl Render for Silence {
    fn render(&mut self, _ctx: &BlockCtx, out: &mut [(f32, f32)]) {
        for frame in out.iter_mut() {
            *frame = (0.0, 0.0);
        }
    }
}
