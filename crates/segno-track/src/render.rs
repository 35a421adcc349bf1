//! Render-side track processing.
//!
//! One [`TrackRenderer`] per track runs inside the station's render
//! callback. Per block it drains pending commands, resolves LFO
//! bindings against the current snapshot, then walks the strip per
//! frame: sample playhead, live input, sampler aux, EQ, slot chain,
//! gain/pan. Nothing here locks, blocks or allocates; displaced chains
//! and links go back to the control thread through the trash channel.

use crate::bindings::{BindingSnapshot, ParamTarget};
use crate::channel::{
    TrackCommand, TrackShared, TrackTrash, RATE_MAX, RATE_MIN, VOLUME_MAX,
};
use crate::fx::{SlotChain, TrackEq};
use crate::transport::{advance, step_per_frame, LoopSpan, StepOutcome, TransportState};
use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender};
use segno_core::{AudioLink, BlockCtx, LfoBankRt};
use std::f32::consts::{FRAC_PI_4, SQRT_2};
use std::sync::Arc;

/// Constant-power pan scaled so a centered pan passes unity per side.
/// Hard left/right lands at +3 dB on the remaining side.
#[inline]
fn pan_gains(volume: f32, pan: f32) -> (f32, f32) {
    let angle = (pan + 1.0) * FRAC_PI_4;
    (
        SQRT_2 * angle.cos() * volume,
        SQRT_2 * angle.sin() * volume,
    )
}

/// Audio-thread half of a track.
pub struct TrackRenderer {
    shared: Arc<TrackShared>,
    cmd_rx: Receiver<TrackCommand>,
    trash_tx: Sender<TrackTrash>,
    bindings: Arc<ArcSwap<BindingSnapshot>>,
    chain: SlotChain,
    eq: TrackEq,
    input: Option<AudioLink>,
    /// Playhead in source frames, fractional for the interpolator.
    position: f64,
    /// Smoothed (left, right) gain reached at the end of the last block.
    gain: (f32, f32),
    sample_rate: f32,
}

impl TrackRenderer {
    pub(crate) fn new(
        shared: Arc<TrackShared>,
        cmd_rx: Receiver<TrackCommand>,
        trash_tx: Sender<TrackTrash>,
        bindings: Arc<ArcSwap<BindingSnapshot>>,
        sample_rate: f32,
    ) -> Self {
        Self {
            shared,
            cmd_rx,
            trash_tx,
            bindings,
            chain: SlotChain::empty(),
            eq: TrackEq::new(sample_rate),
            input: None,
            position: 0.0,
            gain: pan_gains(1.0, 0.0),
            sample_rate,
        }
    }

    /// Render one block into `out`. `aux` carries sampler pads routed to
    /// this track and may be shorter than the block.
    pub fn process(
        &mut self,
        ctx: &BlockCtx,
        lfos: &LfoBankRt,
        aux: &[(f32, f32)],
        out: &mut [(f32, f32)],
    ) {
        self.drain_commands();
        if out.is_empty() {
            return;
        }
        if ctx.sample_rate != self.sample_rate {
            self.sample_rate = ctx.sample_rate;
            self.eq.set_sample_rate(ctx.sample_rate);
        }

        // Block-rate parameter resolve: bound targets read the LFO, the
        // rest read their control cells. Clamps apply after the resolve
        // so a wild binding range cannot push past the legal limits.
        let snapshot = self.bindings.load();
        let resolve = |target: ParamTarget| -> Option<f32> {
            let binding = snapshot.get(&target)?;
            lfos.value(binding.lfo).map(|v| binding.scaled(v))
        };
        let volume = resolve(ParamTarget::Volume)
            .unwrap_or_else(|| self.shared.volume.get())
            .clamp(0.0, VOLUME_MAX);
        let pan = resolve(ParamTarget::Pan)
            .unwrap_or_else(|| self.shared.pan.get())
            .clamp(-1.0, 1.0);
        let rate = resolve(ParamTarget::Rate)
            .unwrap_or_else(|| self.shared.rate.get())
            .clamp(RATE_MIN, RATE_MAX);
        let eq_low = resolve(ParamTarget::EqLow).unwrap_or_else(|| self.shared.eq_low_db.get());
        let eq_mid = resolve(ParamTarget::EqMid).unwrap_or_else(|| self.shared.eq_mid_db.get());
        let eq_high = resolve(ParamTarget::EqHigh).unwrap_or_else(|| self.shared.eq_high_db.get());
        self.eq.set_gains(eq_low, eq_mid, eq_high);
        self.chain
            .apply_params(|slot, index| resolve(ParamTarget::SlotParam { slot, index }));

        let sample = self.shared.sample.load_full();
        let reverse = self.shared.reverse.get();
        let monitor = self.shared.monitor.get();
        let input_gain = self.shared.input_gain.get();

        let mut playing =
            self.shared.state.get() == TransportState::Playing && sample.is_some();
        let mut src_rate = 0.0;
        let mut total = 0.0;
        let mut step = 0.0;
        let mut span = None;
        if let Some(src) = sample.as_deref() {
            src_rate = f64::from(src.sample_rate());
            total = src.frames() as f64;
            if self.shared.seek_flag.take() {
                self.position = (self.shared.seek_to.get() * src_rate).clamp(0.0, total);
            }
            if self.shared.loop_enabled.get() {
                span = LoopSpan::resolve(
                    self.shared.loop_start.get(),
                    self.shared.loop_end.get(),
                    src_rate,
                    total,
                );
            }
            step = step_per_frame(f64::from(rate), src_rate, f64::from(ctx.sample_rate));
        }

        // A stalled consumer leaves frames behind; cap the bridge backlog
        // at two blocks so monitoring latency cannot creep.
        if let Some(AudioLink::Bridged(rx)) = &self.input {
            let cap = out.len() * 2;
            while rx.len() > cap {
                let _ = rx.pop();
            }
        }

        let target = pan_gains(volume, pan);
        let frames = out.len() as f32;
        let ramp = (
            (target.0 - self.gain.0) / frames,
            (target.1 - self.gain.1) / frames,
        );
        let mut gain = self.gain;

        for (i, slot) in out.iter_mut().enumerate() {
            let mut l = 0.0;
            let mut r = 0.0;
            if playing {
                if let Some(src) = sample.as_deref() {
                    let (sl, sr) = src.frame_lerp(self.position);
                    l = sl;
                    r = sr;
                    match advance(self.position, step, reverse, span, total) {
                        StepOutcome::At(next) => self.position = next,
                        StepOutcome::Finished => {
                            self.shared
                                .state
                                .transition(TransportState::Playing, TransportState::Idle);
                            self.position = 0.0;
                            playing = false;
                        }
                    }
                }
            }
            // The bridge drains even while unmonitored, so toggling the
            // monitor on never replays stale audio.
            if let Some(link) = &self.input {
                if let Some((il, ir)) = link.pop() {
                    if monitor {
                        l += il * input_gain;
                        r += ir * input_gain;
                    }
                }
            }
            if let Some(&(al, ar)) = aux.get(i) {
                l += al;
                r += ar;
            }
            let (l, r) = self.eq.process(l, r);
            let (l, r) = self.chain.process(l, r);
            gain.0 += ramp.0;
            gain.1 += ramp.1;
            *slot = (l * gain.0, r * gain.1);
        }
        self.gain = target;

        self.shared.meter.write_block(out);
        if src_rate > 0.0 {
            self.shared.position.set(self.position / src_rate);
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                TrackCommand::InstallChain(next) => {
                    let old = std::mem::replace(&mut self.chain, next);
                    self.discard(TrackTrash::Chain(old));
                }
                TrackCommand::SetInput(link) => {
                    if let Some(old) = std::mem::replace(&mut self.input, link) {
                        self.discard(TrackTrash::Input(old));
                    }
                }
            }
        }
    }

    /// Hand an allocation back to the control thread. A full or closed
    /// trash channel drops it here instead; that only happens once the
    /// control half stopped draining.
    fn discard(&self, trash: TrackTrash) {
        let _ = self.trash_tx.try_send(trash);
    }
}
