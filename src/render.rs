//! The station graph: one renderer driving sampler voices, track strips
//! and the master section inside the context callback.

use crossbeam_channel::{Receiver, Sender};
use ringbuf::{traits::Producer, HeapProd};
use segno_core::{BlockCtx, FrameTx, LfoBankRt, MasterSection, Render};
use segno_sampler::SamplerRenderer;
use segno_track::TrackRenderer;

/// Scratch capacity reserved up front; blocks beyond this grow the
/// buffers once.
pub(crate) const BLOCK_CAPACITY: usize = 8_192;

/// Graph changes shipped from the station to the renderer. Allocation
/// happens control-side; the renderer only swaps and pushes.
pub(crate) enum GraphCommand {
    /// A new track strip plus its pre-allocated sampler aux buffer.
    AddTrack(TrackRenderer, Vec<(f32, f32)>),
    SetCastTap(Option<HeapProd<(f32, f32)>>),
    SetMasterTap(Option<FrameTx>),
}

/// Replaced taps shipped back so their drop happens off the audio thread.
pub(crate) enum GraphTrash {
    CastTap(HeapProd<(f32, f32)>),
    MasterTap(FrameTx),
}

/// Audio-thread half of the station.
///
/// Per block: advance the LFOs, render sampler voices into the bus and
/// the per-track aux buffers, run every track strip, sum, master
/// section, then feed the cast and master-record taps.
pub(crate) struct StationRenderer {
    cmd_rx: Receiver<GraphCommand>,
    trash_tx: Sender<GraphTrash>,
    lfos: LfoBankRt,
    sampler: SamplerRenderer,
    tracks: Vec<TrackRenderer>,
    master: MasterSection,
    cast_tap: Option<HeapProd<(f32, f32)>>,
    master_tap: Option<FrameTx>,
    sampler_bus: Vec<(f32, f32)>,
    track_aux: Vec<Vec<(f32, f32)>>,
    track_out: Vec<(f32, f32)>,
}

impl StationRenderer {
    pub(crate) fn new(
        cmd_rx: Receiver<GraphCommand>,
        trash_tx: Sender<GraphTrash>,
        lfos: LfoBankRt,
        sampler: SamplerRenderer,
        tracks: Vec<TrackRenderer>,
        master: MasterSection,
    ) -> Self {
        let track_aux = tracks
            .iter()
            .map(|_| Vec::with_capacity(BLOCK_CAPACITY))
            .collect();
        Self {
            cmd_rx,
            trash_tx,
            lfos,
            sampler,
            tracks,
            master,
            cast_tap: None,
            master_tap: None,
            sampler_bus: Vec::with_capacity(BLOCK_CAPACITY),
            track_aux,
            track_out: Vec::with_capacity(BLOCK_CAPACITY),
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                GraphCommand::AddTrack(renderer, aux) => {
                    self.tracks.push(renderer);
                    self.track_aux.push(aux);
                }
                GraphCommand::SetCastTap(tap) => {
                    if let Some(old) = std::mem::replace(&mut self.cast_tap, tap) {
                        self.discard(GraphTrash::CastTap(old));
                    }
                }
                GraphCommand::SetMasterTap(tap) => {
                    if let Some(old) = std::mem::replace(&mut self.master_tap, tap) {
                        self.discard(GraphTrash::MasterTap(old));
                    }
                }
            }
        }
    }

    /// Hand a replaced tap back to the control thread. A full or closed
    /// trash channel drops it here instead; that only happens once the
    /// control half stopped draining.
    fn discard(&self, trash: GraphTrash) {
        let _ = self.trash_tx.try_send(trash);
    }
}

impl Render for StationRenderer {
    fn render(&mut self, ctx: &BlockCtx, out: &mut [(f32, f32)]) {
        self.drain_commands();
        let frames = out.len();
        if frames == 0 {
            return;
        }

        self.lfos.render_block(f64::from(ctx.sample_rate), frames);

        // Sampler buffers carry exactly one block; voices render as many
        // frames as the buffer holds.
        self.sampler_bus.clear();
        self.sampler_bus.resize(frames, (0.0, 0.0));
        for aux in &mut self.track_aux {
            aux.clear();
            aux.resize(frames, (0.0, 0.0));
        }
        self.sampler
            .process(ctx, &mut self.sampler_bus, &mut self.track_aux);

        if self.track_out.len() < frames {
            self.track_out.resize(frames, (0.0, 0.0));
        }
        for slot in out.iter_mut() {
            *slot = (0.0, 0.0);
        }

        let empty: &[(f32, f32)] = &[];
        let track_out = &mut self.track_out[..frames];
        for (index, track) in self.tracks.iter_mut().enumerate() {
            let aux = self.track_aux.get(index).map_or(empty, Vec::as_slice);
            track.process(ctx, &self.lfos, aux, track_out);
            for (slot, &(l, r)) in out.iter_mut().zip(track_out.iter()) {
                slot.0 += l;
                slot.1 += r;
            }
        }

        // Bus-routed pads bypass the strips and join the mix here.
        for (slot, &(l, r)) in out.iter_mut().zip(self.sampler_bus.iter()) {
            slot.0 += l;
            slot.1 += r;
        }

        self.master.process_block(out);

        // Post-limiter taps. A full cast ring means the pump is gone or
        // far behind; the shortfall is dropped and the pump's drift
        // compensation reports it. FrameTx counts its own drops.
        if let Some(tap) = &mut self.cast_tap {
            let _ = tap.push_slice(out);
        }
        if let Some(tap) = &self.master_tap {
            let _ = tap.push_block(out);
        }
    }
}
