//! Control-side track channel.
//!
//! A [`TrackChannel`] owns everything the UI touches: transport, loop
//! region, EQ and slot state, LFO bindings, the live input connection and
//! the sample recorder. Its render twin ([`TrackRenderer`]) runs on the
//! audio thread and shares state through the lock-free cells in
//! [`TrackShared`], plus a command channel for anything that carries an
//! allocation (effect chains, input links). The renderer never frees what
//! it is handed; displaced objects come back through a trash channel and
//! drop here.

use crate::bindings::{BindingSnapshot, BindingTable, LfoBinding, ParamTarget};
use crate::fx::{EffectRegistry, EqParams, SlotBank, SlotChain, SlotSpec};
use crate::recorder::{RecordedSample, RecorderConfig, RecorderState, SampleRecorder};
use crate::render::TrackRenderer;
use crate::sample::SampleBuffer;
use crate::transport::{TransportCell, TransportState};
use crate::{Error, Result};
use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use segno_core::lockfree::{AtomicFlag, AtomicLevel, AtomicSeconds};
use segno_core::{AudioLink, ContextId, Levels, StereoMeter};
use segno_capture::{DeviceId, SharedStream, SharedStreamCache, TapToken};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Track volume clamps to [0, 2] (unity + 6 dB of headroom).
pub const VOLUME_MAX: f32 = 2.0;
/// Playback rate clamps to [0.25, 4].
pub const RATE_MIN: f32 = 0.25;
pub const RATE_MAX: f32 = 4.0;
/// Pitch offset in percent maps linearly onto rate: +-50 % -> 0.5..1.5.
pub const PITCH_PCT_MAX: f32 = 50.0;
/// Input monitor gain clamps to [0, 4].
pub const INPUT_GAIN_MAX: f32 = 4.0;

/// Live-input bridge depth in frames. Two blocks of backlog at most;
/// the renderer trims anything beyond that.
pub(crate) const INPUT_QUEUE_FRAMES: usize = 4096;
/// Recorder tap depth. Generous: the collector drains in batches and a
/// hiccup there must not cost capture frames.
pub(crate) const RECORD_QUEUE_FRAMES: usize = 16384;
/// Trash return depth. Drained on every control call that can push to it.
const TRASH_CAPACITY: usize = 64;

/// State shared between a [`TrackChannel`] and its [`TrackRenderer`].
///
/// Control writes, render reads, except `position` and the meter which
/// flow the other way. Everything is a lock-free cell; the one pointer
/// field (`sample`) swaps whole buffers.
pub(crate) struct TrackShared {
    pub(crate) state: TransportCell,
    /// Playhead in seconds, published by the renderer for the UI.
    pub(crate) position: AtomicSeconds,
    pub(crate) seek_to: AtomicSeconds,
    pub(crate) seek_flag: AtomicFlag,
    pub(crate) loop_enabled: AtomicFlag,
    pub(crate) loop_start: AtomicSeconds,
    pub(crate) loop_end: AtomicSeconds,
    pub(crate) reverse: AtomicFlag,
    pub(crate) monitor: AtomicFlag,
    pub(crate) rate: AtomicLevel,
    pub(crate) volume: AtomicLevel,
    pub(crate) pan: AtomicLevel,
    pub(crate) input_gain: AtomicLevel,
    pub(crate) eq_low_db: AtomicLevel,
    pub(crate) eq_mid_db: AtomicLevel,
    pub(crate) eq_high_db: AtomicLevel,
    pub(crate) sample: ArcSwapOption<SampleBuffer>,
    pub(crate) meter: StereoMeter,
}

impl TrackShared {
    fn new() -> Self {
        Self {
            state: TransportCell::new(TransportState::Idle),
            position: AtomicSeconds::default(),
            seek_to: AtomicSeconds::default(),
            seek_flag: AtomicFlag::default(),
            loop_enabled: AtomicFlag::default(),
            loop_start: AtomicSeconds::default(),
            loop_end: AtomicSeconds::default(),
            reverse: AtomicFlag::default(),
            monitor: AtomicFlag::default(),
            rate: AtomicLevel::new(1.0),
            volume: AtomicLevel::new(1.0),
            pan: AtomicLevel::new(0.0),
            input_gain: AtomicLevel::new(1.0),
            eq_low_db: AtomicLevel::default(),
            eq_mid_db: AtomicLevel::default(),
            eq_high_db: AtomicLevel::default(),
            sample: ArcSwapOption::empty(),
            meter: StereoMeter::new(),
        }
    }
}

/// Allocation-carrying hand-offs to the renderer.
pub(crate) enum TrackCommand {
    InstallChain(SlotChain),
    SetInput(Option<AudioLink>),
}

/// What the renderer hands back for the control thread to drop.
pub(crate) enum TrackTrash {
    Chain(SlotChain),
    Input(AudioLink),
}

/// A live capture connection: the stream, the tap keeping the renderer's
/// link alive, and the recorder's tap while a recording runs.
struct ConnectedInput {
    device: DeviceId,
    stream: Arc<SharedStream>,
    _monitor_tap: TapToken,
    recorder_tap: Option<TapToken>,
}

/// The user-visible loop region in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct LoopRegion {
    pub start_secs: f64,
    pub end_secs: f64,
    pub enabled: bool,
}

/// Snapshot of every per-track control, for persistence and bulk apply.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackParams {
    pub volume: f32,
    pub pan: f32,
    pub rate: f32,
    pub reverse: bool,
    pub input_gain: f32,
    pub monitor: bool,
    pub loop_region: LoopRegion,
    pub eq: EqParams,
}

impl Default for TrackParams {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pan: 0.0,
            rate: 1.0,
            reverse: false,
            input_gain: 1.0,
            monitor: false,
            loop_region: LoopRegion::default(),
            eq: EqParams::default(),
        }
    }
}

/// One track of the station, control side.
pub struct TrackChannel {
    id: usize,
    sample_rate: f32,
    shared: Arc<TrackShared>,
    registry: Arc<EffectRegistry>,
    bank: Mutex<SlotBank>,
    bindings: BindingTable,
    recorder: SampleRecorder,
    input: Mutex<Option<ConnectedInput>>,
    cmd_tx: Sender<TrackCommand>,
    trash_rx: Receiver<TrackTrash>,
}

impl TrackChannel {
    /// Build a channel and its renderer half for `sample_rate`.
    pub fn new(
        id: usize,
        sample_rate: f32,
        registry: Arc<EffectRegistry>,
    ) -> (Self, TrackRenderer) {
        let shared = Arc::new(TrackShared::new());
        let bindings = BindingTable::new();
        let (cmd_tx, cmd_rx) = unbounded();
        let (trash_tx, trash_rx) = bounded(TRASH_CAPACITY);
        let renderer = TrackRenderer::new(
            Arc::clone(&shared),
            cmd_rx,
            trash_tx,
            bindings.snapshot_arc(),
            sample_rate,
        );
        let channel = Self {
            id,
            sample_rate,
            shared,
            registry,
            bank: Mutex::new(SlotBank::default()),
            bindings,
            recorder: SampleRecorder::new(),
            input: Mutex::new(None),
            cmd_tx,
            trash_rx,
        };
        (channel, renderer)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    // ---- transport -------------------------------------------------

    /// Start playback from the current offset. A track without a sample
    /// stays idle; an active recording is not interrupted.
    pub fn play(&self) {
        if self.shared.sample.load().is_none() {
            debug!(track = self.id, "play ignored: no sample loaded");
            return;
        }
        match self.shared.state.get() {
            TransportState::Recording => {
                debug!(track = self.id, "play ignored while recording");
            }
            TransportState::Idle | TransportState::Paused => {
                self.shared.state.set(TransportState::Playing);
            }
            TransportState::Playing => {}
        }
    }

    /// Freeze the playhead where it is.
    pub fn pause(&self) {
        self.shared
            .state
            .transition(TransportState::Playing, TransportState::Paused);
    }

    /// Stop and rewind to the loop start, or to zero when the loop is
    /// disabled. A degenerate loop region still rewinds to its start.
    pub fn stop(&self) {
        match self.shared.state.get() {
            TransportState::Recording => return,
            _ => self.shared.state.set(TransportState::Idle),
        }
        let origin = if self.shared.loop_enabled.get() {
            self.shared.loop_start.get()
        } else {
            0.0
        };
        self.seek(origin);
    }

    /// Move the playhead. Takes effect on the next rendered block.
    pub fn seek(&self, secs: f64) {
        let secs = secs.max(0.0);
        self.shared.seek_to.set(secs);
        self.shared.position.set(secs);
        self.shared.seek_flag.set(true);
    }

    pub fn transport_state(&self) -> TransportState {
        self.shared.state.get()
    }

    /// Playhead in seconds of the source sample.
    pub fn position_secs(&self) -> f64 {
        self.shared.position.get()
    }

    /// Length of the loaded sample, zero when empty.
    pub fn duration_secs(&self) -> f64 {
        self.shared
            .sample
            .load()
            .as_ref()
            .map(|s| s.duration_secs())
            .unwrap_or(0.0)
    }

    // ---- sample ----------------------------------------------------

    /// Swap a decoded buffer in and reset the transport.
    pub fn load_sample(&self, buffer: Arc<SampleBuffer>) {
        debug!(
            track = self.id,
            frames = buffer.frames(),
            sample_rate = buffer.sample_rate(),
            "sample loaded"
        );
        self.install_sample(buffer);
    }

    /// Decode WAV bytes and load the result.
    pub fn load_sample_bytes(&self, bytes: &[u8]) -> Result<()> {
        let buffer = SampleBuffer::decode_wav(bytes)?;
        self.load_sample(Arc::new(buffer));
        Ok(())
    }

    /// Read and decode a WAV file and load the result.
    pub fn load_sample_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let buffer = SampleBuffer::load_wav_file(path)?;
        self.load_sample(Arc::new(buffer));
        Ok(())
    }

    /// Drop the sample, slot chain, bindings and transport state.
    /// The live input connection survives; an active recording is
    /// stopped and its capture discarded.
    pub fn clear_track(&self) -> Result<()> {
        if self.recorder.state() != RecorderState::Idle {
            let _ = self.recorder.stop()?;
            if let Some(connected) = self.input.lock().as_mut() {
                connected.recorder_tap = None;
            }
        }
        self.shared.state.set(TransportState::Idle);
        self.shared.sample.store(None);
        self.shared.position.set(0.0);
        self.shared.seek_to.set(0.0);
        self.shared.seek_flag.set(true);
        self.bindings.clear();
        {
            let mut bank = self.bank.lock();
            bank.clear();
        }
        self.install_chain();
        self.apply_params(&TrackParams {
            monitor: self.shared.monitor.get(),
            ..TrackParams::default()
        });
        Ok(())
    }

    fn install_sample(&self, buffer: Arc<SampleBuffer>) {
        self.shared.state.set(TransportState::Idle);
        self.shared.sample.store(Some(buffer));
        self.shared.position.set(0.0);
        self.shared.seek_to.set(0.0);
        self.shared.seek_flag.set(true);
    }

    // ---- parameters ------------------------------------------------

    pub fn set_volume(&self, volume: f32) {
        self.shared.volume.set(volume.clamp(0.0, VOLUME_MAX));
    }

    pub fn set_pan(&self, pan: f32) {
        self.shared.pan.set(pan.clamp(-1.0, 1.0));
    }

    pub fn set_rate(&self, rate: f32) {
        self.shared.rate.set(rate.clamp(RATE_MIN, RATE_MAX));
    }

    /// Pitch offset in percent; +-50 % maps onto rate 0.5..1.5.
    pub fn set_pitch_pct(&self, pct: f32) {
        let pct = pct.clamp(-PITCH_PCT_MAX, PITCH_PCT_MAX);
        self.set_rate(1.0 + pct / 100.0);
    }

    pub fn set_reverse(&self, reverse: bool) {
        self.shared.reverse.set(reverse);
    }

    /// Loop bounds in seconds. A region that resolves shorter than the
    /// minimum plays unlooped; it is stored as given so the UI can keep
    /// editing it.
    pub fn set_loop(&self, start_secs: f64, end_secs: f64) {
        self.shared.loop_start.set(start_secs.max(0.0));
        self.shared.loop_end.set(end_secs.max(0.0));
    }

    pub fn set_loop_enabled(&self, enabled: bool) {
        self.shared.loop_enabled.set(enabled);
    }

    pub fn loop_region(&self) -> LoopRegion {
        LoopRegion {
            start_secs: self.shared.loop_start.get(),
            end_secs: self.shared.loop_end.get(),
            enabled: self.shared.loop_enabled.get(),
        }
    }

    pub fn set_input_gain(&self, gain: f32) {
        self.shared.input_gain.set(gain.clamp(0.0, INPUT_GAIN_MAX));
    }

    /// Gate the live input tap into the channel strip.
    pub fn set_input_monitor(&self, monitor: bool) {
        self.shared.monitor.set(monitor);
    }

    pub fn set_eq(&self, eq: EqParams) {
        let eq = eq.clamped();
        self.shared.eq_low_db.set(eq.low_db);
        self.shared.eq_mid_db.set(eq.mid_db);
        self.shared.eq_high_db.set(eq.high_db);
    }

    /// Snapshot every control value.
    pub fn params(&self) -> TrackParams {
        TrackParams {
            volume: self.shared.volume.get(),
            pan: self.shared.pan.get(),
            rate: self.shared.rate.get(),
            reverse: self.shared.reverse.get(),
            input_gain: self.shared.input_gain.get(),
            monitor: self.shared.monitor.get(),
            loop_region: self.loop_region(),
            eq: EqParams {
                low_db: self.shared.eq_low_db.get(),
                mid_db: self.shared.eq_mid_db.get(),
                high_db: self.shared.eq_high_db.get(),
            },
        }
    }

    /// Apply a whole snapshot through the clamping setters.
    pub fn apply_params(&self, params: &TrackParams) {
        self.set_volume(params.volume);
        self.set_pan(params.pan);
        self.set_rate(params.rate);
        self.set_reverse(params.reverse);
        self.set_input_gain(params.input_gain);
        self.set_input_monitor(params.monitor);
        self.set_loop(params.loop_region.start_secs, params.loop_region.end_secs);
        self.set_loop_enabled(params.loop_region.enabled);
        self.set_eq(params.eq);
    }

    // ---- effect slots ----------------------------------------------

    /// Put an effect in slot `index` (or clear it) and swap the rebuilt
    /// chain onto the render side.
    pub fn set_slot(&self, index: usize, spec: Option<SlotSpec>) -> Result<()> {
        self.bank.lock().set_slot(index, spec)?;
        self.install_chain();
        Ok(())
    }

    /// Exchange two slots, preserving instance parameters via rebuild.
    pub fn swap_slots(&self, a: usize, b: usize) -> Result<()> {
        self.bank.lock().swap_slots(a, b)?;
        self.install_chain();
        Ok(())
    }

    /// Set or clear the audition slot, which renders after slot 6.
    pub fn set_audition(&self, spec: Option<SlotSpec>) {
        self.bank.lock().set_audition(spec);
        self.install_chain();
    }

    /// Current slot layout.
    pub fn slot_bank(&self) -> SlotBank {
        self.bank.lock().clone()
    }

    /// Replace the whole layout at once (preset load).
    pub fn apply_slot_bank(&self, bank: SlotBank) {
        *self.bank.lock() = bank;
        self.install_chain();
    }

    fn install_chain(&self) {
        let chain = {
            let bank = self.bank.lock();
            SlotChain::build(&bank, &self.registry, self.sample_rate)
        };
        if self.cmd_tx.send(TrackCommand::InstallChain(chain)).is_err() {
            warn!(track = self.id, "renderer gone, chain install dropped");
        }
        self.drain_trash();
    }

    // ---- LFO bindings ----------------------------------------------

    /// Bind a parameter to a global LFO. A target holds one binding;
    /// binding it again replaces the previous connection.
    pub fn bind_lfo(&self, target: ParamTarget, binding: LfoBinding) -> Result<()> {
        self.bindings.bind(target, binding)
    }

    /// Returns whether a binding existed. The parameter snaps back to
    /// its base value on the next rendered block.
    pub fn unbind_lfo(&self, target: ParamTarget) -> bool {
        self.bindings.unbind(target)
    }

    pub fn lfo_connections(&self) -> Vec<(ParamTarget, LfoBinding)> {
        self.bindings.connections()
    }

    pub(crate) fn binding_snapshot(&self) -> Arc<ArcSwap<BindingSnapshot>> {
        self.bindings.snapshot_arc()
    }

    // ---- live input ------------------------------------------------

    /// Connect a capture device through the shared stream cache. The
    /// renderer receives a bridged link into `render_context`; monitor
    /// and recorder share this one stream.
    pub fn connect_input(
        &self,
        cache: &SharedStreamCache,
        render_context: ContextId,
        device: &DeviceId,
    ) -> Result<()> {
        let stream = cache.acquire(device)?;
        let (token, link) = stream.link_to(render_context, INPUT_QUEUE_FRAMES);
        if self
            .cmd_tx
            .send(TrackCommand::SetInput(Some(link)))
            .is_err()
        {
            warn!(track = self.id, "renderer gone, input link dropped");
        }
        *self.input.lock() = Some(ConnectedInput {
            device: device.clone(),
            stream,
            _monitor_tap: token,
            recorder_tap: None,
        });
        self.drain_trash();
        debug!(track = self.id, device = %device, "input connected");
        Ok(())
    }

    /// Drop the input connection. A recording in flight keeps collecting
    /// nothing and stops normally when asked.
    pub fn disconnect_input(&self) {
        if self.input.lock().take().is_some() {
            if self.cmd_tx.send(TrackCommand::SetInput(None)).is_err() {
                warn!(track = self.id, "renderer gone, input disconnect dropped");
            }
            self.drain_trash();
            debug!(track = self.id, "input disconnected");
        }
    }

    /// Device of the current input connection, if any.
    pub fn input_device(&self) -> Option<DeviceId> {
        self.input.lock().as_ref().map(|c| c.device.clone())
    }

    // ---- recording -------------------------------------------------

    /// Start capturing from the connected input.
    ///
    /// `extra_latency_secs` is added to the stream's measured capture
    /// latency (the caller knows the output side); the summed window is
    /// discarded from the head. With a target the recorder stops
    /// accepting at exactly that many frames and fires `on_target` once,
    /// from the collector thread; call [`TrackChannel::stop_recording`]
    /// from another thread to finalize.
    pub fn start_recording(
        &self,
        target_secs: Option<f64>,
        extra_latency_secs: f64,
        on_target: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        let mut guard = self.input.lock();
        let connected = guard.as_mut().ok_or(Error::InputNotConnected)?;
        let capture_rate = connected.stream.sample_rate();
        let latency = (connected.stream.latency_secs() + extra_latency_secs).max(0.0);
        let config = RecorderConfig {
            sample_rate: capture_rate,
            latency_samples: (latency * f64::from(capture_rate)).round() as u64,
            target_frames: target_secs
                .map(|secs| (secs.max(0.0) * f64::from(capture_rate)).round() as u64),
        };
        let (token, rx) = connected.stream.subscribe(RECORD_QUEUE_FRAMES);
        self.recorder.start(rx, config, on_target)?;
        connected.recorder_tap = Some(token);
        self.shared.state.set(TransportState::Recording);
        Ok(())
    }

    /// Finalize the capture. The recorded buffer is loaded into this
    /// track; the WAV encoding comes back for persistence. Idempotent:
    /// without a recording in flight this returns `Ok(None)`.
    pub fn stop_recording(&self) -> Result<Option<RecordedSample>> {
        let recorded = self.recorder.stop()?;
        if let Some(connected) = self.input.lock().as_mut() {
            connected.recorder_tap = None;
        }
        self.shared
            .state
            .transition(TransportState::Recording, TransportState::Idle);
        if let Some(rec) = &recorded {
            self.install_sample(Arc::clone(&rec.buffer));
            debug!(
                track = self.id,
                frames = rec.frames,
                sample_rate = rec.sample_rate,
                "recording loaded"
            );
        }
        Ok(recorded)
    }

    pub fn recorder_state(&self) -> RecorderState {
        self.recorder.state()
    }

    /// Seconds captured so far, zero outside a recording.
    pub fn recorded_secs(&self) -> f64 {
        self.recorder.recorded_secs()
    }

    // ---- telemetry -------------------------------------------------

    /// Post-chain peak/RMS since the last read.
    pub fn levels(&self) -> Levels {
        self.shared.meter.levels()
    }

    fn drain_trash(&self) {
        while let Ok(item) = self.trash_rx.try_recv() {
            drop(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MIN_LOOP_SECS;
    use segno_capture::DeviceRegistry;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn test_channel() -> (TrackChannel, TrackRenderer) {
        TrackChannel::new(0, 48_000.0, Arc::new(EffectRegistry::with_builtins()))
    }

    fn one_second_sample() -> Arc<SampleBuffer> {
        Arc::new(SampleBuffer::silent(48_000, 48_000))
    }

    #[test]
    fn defaults_match_a_fresh_strip() {
        let (channel, _renderer) = test_channel();
        let params = channel.params();
        assert_eq!(params, TrackParams::default());
        assert_eq!(channel.transport_state(), TransportState::Idle);
        assert_eq!(channel.position_secs(), 0.0);
        assert_eq!(channel.duration_secs(), 0.0);
    }

    #[test]
    fn setters_clamp_out_of_range_values() {
        let (channel, _renderer) = test_channel();
        channel.set_volume(3.0);
        channel.set_pan(-2.0);
        channel.set_rate(0.1);
        channel.set_input_gain(9.0);
        let params = channel.params();
        assert_eq!(params.volume, VOLUME_MAX);
        assert_eq!(params.pan, -1.0);
        assert_eq!(params.rate, RATE_MIN);
        assert_eq!(params.input_gain, INPUT_GAIN_MAX);

        channel.set_pitch_pct(80.0);
        assert_eq!(channel.params().rate, 1.5);
        channel.set_pitch_pct(-80.0);
        assert_eq!(channel.params().rate, 0.5);
    }

    #[test]
    fn play_without_a_sample_stays_idle() {
        let (channel, _renderer) = test_channel();
        channel.play();
        assert_eq!(channel.transport_state(), TransportState::Idle);
    }

    #[test]
    fn transport_cycle_play_pause_stop() {
        let (channel, _renderer) = test_channel();
        channel.load_sample(one_second_sample());
        channel.play();
        assert_eq!(channel.transport_state(), TransportState::Playing);
        channel.pause();
        assert_eq!(channel.transport_state(), TransportState::Paused);
        channel.play();
        assert_eq!(channel.transport_state(), TransportState::Playing);
        channel.stop();
        assert_eq!(channel.transport_state(), TransportState::Idle);
        assert_eq!(channel.position_secs(), 0.0);
    }

    #[test]
    fn stop_rewinds_to_the_loop_start() {
        let (channel, _renderer) = test_channel();
        channel.load_sample(one_second_sample());
        channel.set_loop(0.25, 0.75);
        channel.set_loop_enabled(true);
        channel.play();
        channel.stop();
        assert_eq!(channel.position_secs(), 0.25);

        channel.set_loop_enabled(false);
        channel.seek(0.5);
        channel.stop();
        assert_eq!(channel.position_secs(), 0.0);
    }

    #[test]
    fn degenerate_loop_region_still_stores_its_bounds() {
        let (channel, _renderer) = test_channel();
        channel.set_loop(0.5, 0.5 + MIN_LOOP_SECS / 2.0);
        channel.set_loop_enabled(true);
        let region = channel.loop_region();
        assert_eq!(region.start_secs, 0.5);
        assert!(region.enabled);
    }

    #[test]
    fn params_apply_and_read_back() {
        let (channel, _renderer) = test_channel();
        let params = TrackParams {
            volume: 0.8,
            pan: 0.3,
            rate: 2.0,
            reverse: true,
            input_gain: 2.0,
            monitor: true,
            loop_region: LoopRegion {
                start_secs: 0.1,
                end_secs: 0.9,
                enabled: true,
            },
            eq: EqParams {
                low_db: -6.0,
                mid_db: 3.0,
                high_db: 30.0,
            },
        };
        channel.apply_params(&params);
        let read = channel.params();
        assert_eq!(read.volume, 0.8);
        assert!(read.reverse);
        assert_eq!(read.loop_region.end_secs, 0.9);
        // EQ clamps on the way in.
        assert_eq!(read.eq.high_db, 24.0);

        let json = serde_json::to_string(&read).unwrap();
        let back: TrackParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, read);
    }

    #[test]
    fn slot_index_out_of_range_errors() {
        let (channel, _renderer) = test_channel();
        assert!(channel.set_slot(0, Some(SlotSpec::new("gain"))).is_ok());
        assert!(matches!(
            channel.set_slot(9, Some(SlotSpec::new("gain"))),
            Err(Error::SlotOutOfRange(9))
        ));
        assert!(channel.slot_bank().slot(0).is_some());
    }

    #[test]
    fn rebinding_a_target_replaces_the_connection() {
        let (channel, _renderer) = test_channel();
        let to_lfo = |lfo| LfoBinding {
            lfo,
            min: 0.0,
            max: 1.0,
            reversed: false,
        };
        channel.bind_lfo(ParamTarget::Volume, to_lfo(0)).unwrap();
        channel.bind_lfo(ParamTarget::Volume, to_lfo(1)).unwrap();
        let connections = channel.lfo_connections();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].1.lfo, 1);
        assert!(channel.unbind_lfo(ParamTarget::Volume));
        assert!(!channel.unbind_lfo(ParamTarget::Volume));
    }

    #[test]
    fn binding_an_unknown_lfo_errors() {
        let (channel, _renderer) = test_channel();
        let err = channel
            .bind_lfo(
                ParamTarget::Pan,
                LfoBinding {
                    lfo: 5,
                    min: -1.0,
                    max: 1.0,
                    reversed: false,
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchLfo(5)));
    }

    #[test]
    fn recording_requires_a_connected_input() {
        let (channel, _renderer) = test_channel();
        let err = channel.start_recording(None, 0.0, || {}).unwrap_err();
        assert!(matches!(err, Error::InputNotConnected));
    }

    #[test]
    fn record_from_detached_stream_and_autoload() {
        let (channel, _renderer) = test_channel();
        let cache = SharedStreamCache::new(Arc::new(DeviceRegistry::new()));
        let id = DeviceId::from("Test Mic");
        let stream = cache.insert_detached(id.clone());
        channel
            .connect_input(&cache, ContextId::next(), &id)
            .unwrap();
        assert_eq!(channel.input_device(), Some(id));

        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        // 0.1 s at the detached stream's 48 kHz.
        channel
            .start_recording(Some(0.1), 0.0, move || flag.store(true, Ordering::Release))
            .unwrap();
        assert_eq!(channel.transport_state(), TransportState::Recording);

        let frames: Vec<(f32, f32)> = (0..6000).map(|i| (i as f32 * 1e-4, 0.5)).collect();
        for _ in 0..80 {
            stream.feed(&frames[..600]);
            if done.load(Ordering::Acquire) {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(done.load(Ordering::Acquire), "auto-stop target not reached");

        let recorded = channel.stop_recording().unwrap().expect("a recording");
        assert_eq!(recorded.frames, 4800);
        assert_eq!(channel.transport_state(), TransportState::Idle);
        // The capture is now this track's sample.
        assert!((channel.duration_secs() - 0.1).abs() < 1e-6);
        assert!(channel.stop_recording().unwrap().is_none());
    }

    #[test]
    fn clear_track_keeps_the_input_connection() {
        let (channel, _renderer) = test_channel();
        let cache = SharedStreamCache::new(Arc::new(DeviceRegistry::new()));
        let id = DeviceId::from("Test Mic");
        cache.insert_detached(id.clone());
        channel
            .connect_input(&cache, ContextId::next(), &id)
            .unwrap();

        channel.load_sample(one_second_sample());
        channel.set_volume(0.2);
        channel.set_slot(0, Some(SlotSpec::new("gain"))).unwrap();
        channel
            .bind_lfo(
                ParamTarget::Volume,
                LfoBinding {
                    lfo: 0,
                    min: 0.0,
                    max: 1.0,
                    reversed: false,
                },
            )
            .unwrap();

        channel.clear_track().unwrap();
        assert_eq!(channel.duration_secs(), 0.0);
        assert_eq!(channel.params().volume, 1.0);
        assert!(channel.slot_bank().is_empty());
        assert!(channel.lfo_connections().is_empty());
        assert_eq!(channel.input_device(), Some(id));
    }
}
