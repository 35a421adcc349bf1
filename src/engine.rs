//! The station: one control surface over capture, tracks, sampler pads,
//! the master section and the cast pipeline.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use ringbuf::{traits::Split, HeapRb};
use segno_capture::{AudioDeviceInfo, DeviceId, DeviceRegistry, SharedStreamCache};
use segno_cast::{
    CastMode, CastPipeline, IpcSink, PcmFormat, SessionHealth, SessionPhase,
    BACKLOG_LIMIT_FRAMES, CAST_FRAME_SAMPLES,
};
use segno_core::{
    frame_channel, AudioContext, Levels, LfoBank, MasterBus, RenderWatchdog, StationConfig,
};
use segno_sampler::{ChokeGroup, PadMode, SamplerEngine, VoiceRoute};
use segno_track::recorder::RecorderConfig;
use segno_track::{
    encode_wav_f32, encode_wav_i16, EffectRegistry, LfoBinding, ParamTarget, RecordedSample,
    SampleBuffer, SampleRecorder, TrackChannel,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::builder::StationBuilder;
use crate::error::{Error, Result};
use crate::render::{GraphCommand, GraphTrash, StationRenderer, BLOCK_CAPACITY};

/// Hard ceiling on track strips, matching config validation.
pub const MAX_TRACKS: usize = 16;

/// Master tap queue length in frames. Sized like the track recorder
/// queue: a third of a second at 48 kHz, far more than the collector
/// thread ever leaves behind.
const MASTER_TAP_FRAMES: usize = 16_384;

const TRASH_CAPACITY: usize = 16;

/// WAV sample format for master captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterCaptureFormat {
    Int16,
    Float32,
}

/// A finished master capture.
#[derive(Debug, Clone)]
pub struct MasterTake {
    pub wav: Vec<u8>,
    pub frames: u64,
    pub sample_rate: u32,
}

/// A running looping station.
///
/// Every method is safe to call from any control thread while audio
/// renders; changes land at the next block boundary. Audio-rate state
/// lives behind the lock-free cells of the member crates, so nothing
/// here blocks the render callback.
///
/// # Example
///
/// ```ignore
/// use segno::Station;
///
/// let station = Station::builder()
///     .sample_rate(48_000.0)
///     .tracks(4)
///     .build()?;
///
/// station.load_file_to_track(0, "loop.wav")?;
/// station.track(0)?.set_loop(0.0, 4.0);
/// station.play_track(0)?;
/// ```
pub struct Station {
    context: AudioContext,
    watchdog: Option<RenderWatchdog>,
    registry: Arc<DeviceRegistry>,
    cache: SharedStreamCache,
    effects: Arc<EffectRegistry>,
    master: MasterBus,
    lfos: LfoBank,
    sampler: SamplerEngine,
    tracks: Mutex<Vec<Arc<TrackChannel>>>,
    last_input: Mutex<Option<DeviceId>>,
    master_recorder: Mutex<Option<SampleRecorder>>,
    cast: Mutex<Option<CastPipeline>>,
    cmd_tx: Sender<GraphCommand>,
    trash_rx: Receiver<GraphTrash>,
}

impl Station {
    pub fn builder() -> StationBuilder {
        StationBuilder::new()
    }

    pub(crate) fn assemble(config: StationConfig, offline: bool) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(DeviceRegistry::new());
        registry.refresh();
        let cache = SharedStreamCache::new(Arc::clone(&registry));
        let effects = Arc::new(EffectRegistry::with_builtins());
        let master = MasterBus::new();
        let lfos = LfoBank::new();
        let (sampler, sampler_rt) = SamplerEngine::new(config.tracks);

        let sample_rate = config.sample_rate as f32;
        let mut channels = Vec::with_capacity(config.tracks);
        let mut strips = Vec::with_capacity(config.tracks);
        for id in 0..config.tracks {
            let (channel, strip) = TrackChannel::new(id, sample_rate, Arc::clone(&effects));
            channels.push(Arc::new(channel));
            strips.push(strip);
        }

        let (cmd_tx, cmd_rx) = unbounded();
        let (trash_tx, trash_rx) = bounded(TRASH_CAPACITY);
        let renderer = StationRenderer::new(
            cmd_rx,
            trash_tx,
            lfos.oscillators(),
            sampler_rt,
            strips,
            master.section(sample_rate),
        );

        let context = if offline {
            AudioContext::offline(&config, Box::new(renderer))?
        } else {
            AudioContext::open(&config, Box::new(renderer))?
        };
        // Offline contexts advance only when pumped; progress per wall
        // second means nothing there.
        let watchdog = (!offline).then(|| RenderWatchdog::spawn(context.shared()));

        debug!(
            sample_rate = context.sample_rate(),
            tracks = config.tracks,
            offline,
            "station assembled"
        );

        Ok(Self {
            context,
            watchdog,
            registry,
            cache,
            effects,
            master,
            lfos,
            sampler,
            tracks: Mutex::new(channels),
            last_input: Mutex::new(None),
            master_recorder: Mutex::new(None),
            cast: Mutex::new(None),
            cmd_tx,
            trash_rx,
        })
    }

    fn send_graph(&self, cmd: GraphCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            warn!("renderer gone, graph change dropped");
        }
    }

    fn drain_trash(&self) {
        while self.trash_rx.try_recv().is_ok() {}
    }

    // ---- tracks ----------------------------------------------------

    /// Handle to a track's full control surface.
    pub fn track(&self, index: usize) -> Result<Arc<TrackChannel>> {
        self.tracks
            .lock()
            .get(index)
            .cloned()
            .ok_or(Error::NoSuchTrack(index))
    }

    pub fn track_count(&self) -> usize {
        self.tracks.lock().len()
    }

    /// Add a track strip to the running graph. Returns its index.
    pub fn create_track(&self) -> Result<usize> {
        let mut tracks = self.tracks.lock();
        if tracks.len() >= MAX_TRACKS {
            return Err(Error::TrackLimit(MAX_TRACKS));
        }
        let id = tracks.len();
        let (channel, strip) = TrackChannel::new(
            id,
            self.context.sample_rate() as f32,
            Arc::clone(&self.effects),
        );
        self.send_graph(GraphCommand::AddTrack(
            strip,
            Vec::with_capacity(BLOCK_CAPACITY),
        ));
        tracks.push(Arc::new(channel));
        self.sampler.set_track_count(tracks.len());
        debug!(track = id, "track created");
        Ok(id)
    }

    pub fn play_track(&self, index: usize) -> Result<()> {
        self.track(index)?.play();
        Ok(())
    }

    pub fn pause_track(&self, index: usize) -> Result<()> {
        self.track(index)?.pause();
        Ok(())
    }

    pub fn stop_track(&self, index: usize) -> Result<()> {
        self.track(index)?.stop();
        Ok(())
    }

    pub fn seek_track(&self, index: usize, secs: f64) -> Result<()> {
        self.track(index)?.seek(secs);
        Ok(())
    }

    pub fn load_file_to_track(&self, index: usize, path: impl AsRef<Path>) -> Result<()> {
        self.track(index)?.load_sample_file(path)?;
        Ok(())
    }

    pub fn load_wav_to_track(&self, index: usize, bytes: &[u8]) -> Result<()> {
        self.track(index)?.load_sample_bytes(bytes)?;
        Ok(())
    }

    // ---- devices and recording -------------------------------------

    pub fn input_devices(&self) -> Vec<AudioDeviceInfo> {
        self.registry.devices()
    }

    /// Re-enumerate and return the fresh list.
    pub fn refresh_devices(&self) -> Vec<AudioDeviceInfo> {
        self.registry.refresh()
    }

    pub fn connect_track_input(&self, index: usize, device: &DeviceId) -> Result<()> {
        let track = self.track(index)?;
        track.connect_input(&self.cache, self.context.id(), device)?;
        *self.last_input.lock() = Some(device.clone());
        Ok(())
    }

    pub fn disconnect_track_input(&self, index: usize) -> Result<()> {
        self.track(index)?.disconnect_input();
        Ok(())
    }

    /// Close capture streams nobody taps anymore. Returns how many.
    pub fn close_idle_inputs(&self) -> usize {
        self.cache.close_idle()
    }

    /// The shared capture stream cache, for custom channel maps or
    /// stream inspection.
    pub fn capture_cache(&self) -> &SharedStreamCache {
        &self.cache
    }

    /// Start capturing into a track.
    ///
    /// A track without an input connection gets one first: the last
    /// device used, or the default input. With `target_secs` the
    /// recorder stops accepting at exactly that length; either way
    /// [`Station::stop_recording`] finalizes and loads the take.
    pub fn start_recording(&self, index: usize, target_secs: Option<f64>) -> Result<()> {
        let track = self.track(index)?;
        if track.input_device().is_none() {
            let device = self
                .last_input
                .lock()
                .clone()
                .or_else(|| self.registry.default_input().map(|info| info.id))
                .ok_or(Error::NoInputDevice)?;
            debug!(track = index, device = %device, "reconnecting input for recording");
            track.connect_input(&self.cache, self.context.id(), &device)?;
            *self.last_input.lock() = Some(device);
        }
        let output_latency = self.context.shared().output_latency();
        track.start_recording(target_secs, output_latency, move || {
            debug!(track = index, "recording reached its target length");
        })?;
        Ok(())
    }

    /// Finalize a track capture. The take is already loaded into the
    /// track; the WAV encoding comes back for persistence.
    pub fn stop_recording(&self, index: usize) -> Result<Option<RecordedSample>> {
        Ok(self.track(index)?.stop_recording()?)
    }

    pub fn recorded_secs(&self, index: usize) -> Result<f64> {
        Ok(self.track(index)?.recorded_secs())
    }

    // ---- master capture --------------------------------------------

    /// Tap the post-limiter mix into a recorder.
    pub fn start_master_recording(&self) -> Result<()> {
        let mut guard = self.master_recorder.lock();
        if guard.is_some() {
            return Err(Error::MasterRecordingBusy);
        }
        let (tx, rx) = frame_channel(MASTER_TAP_FRAMES);
        let recorder = SampleRecorder::new();
        recorder.start(
            rx,
            RecorderConfig {
                sample_rate: self.context.sample_rate().round() as u32,
                latency_samples: 0,
                target_frames: None,
            },
            || {},
        )?;
        self.send_graph(GraphCommand::SetMasterTap(Some(tx)));
        *guard = Some(recorder);
        Ok(())
    }

    /// Stop the master capture and encode it. Idempotent: `Ok(None)`
    /// without a capture in flight.
    pub fn stop_master_recording(
        &self,
        format: MasterCaptureFormat,
    ) -> Result<Option<MasterTake>> {
        let recorder = match self.master_recorder.lock().take() {
            Some(recorder) => recorder,
            None => return Ok(None),
        };
        self.send_graph(GraphCommand::SetMasterTap(None));
        let recorded = recorder.stop()?;
        self.drain_trash();
        let Some(rec) = recorded else {
            return Ok(None);
        };
        let wav = match format {
            MasterCaptureFormat::Float32 => rec.wav,
            MasterCaptureFormat::Int16 => {
                let (left, right) = rec.buffer.channels();
                encode_wav_i16(left, right, rec.sample_rate)?
            }
        };
        Ok(Some(MasterTake {
            wav,
            frames: rec.frames,
            sample_rate: rec.sample_rate,
        }))
    }

    /// Seconds captured by the master recorder so far, zero outside a
    /// capture.
    pub fn master_recorded_secs(&self) -> f64 {
        self.master_recorder
            .lock()
            .as_ref()
            .map_or(0.0, SampleRecorder::recorded_secs)
    }

    /// Render `secs` of the current mix on demand and encode it as WAV.
    /// Only offline stations render on demand; live ones return the
    /// context error.
    pub fn bounce(&self, secs: f64, format: MasterCaptureFormat) -> Result<Vec<u8>> {
        let frames = (secs.max(0.0) * self.context.sample_rate()).round() as usize;
        let rendered = self.context.pump(frames)?;
        let (left, right): (Vec<f32>, Vec<f32>) = rendered.into_iter().unzip();
        let rate = self.context.sample_rate().round() as u32;
        let wav = match format {
            MasterCaptureFormat::Float32 => encode_wav_f32(&left, &right, rate)?,
            MasterCaptureFormat::Int16 => encode_wav_i16(&left, &right, rate)?,
        };
        Ok(wav)
    }

    // ---- sampler ---------------------------------------------------

    /// Direct access to the pad engine for queries and the less common
    /// setters.
    pub fn sampler(&self) -> &SamplerEngine {
        &self.sampler
    }

    pub fn assign_pad(&self, pad: usize, path: impl AsRef<Path>) -> Result<()> {
        Ok(self.sampler.assign_file(pad, path)?)
    }

    pub fn assign_pad_bytes(&self, pad: usize, bytes: &[u8]) -> Result<()> {
        Ok(self.sampler.assign_bytes(pad, bytes)?)
    }

    pub fn assign_pad_sample(&self, pad: usize, sample: SampleBuffer) -> Result<()> {
        Ok(self.sampler.assign_sample(pad, sample)?)
    }

    pub fn clear_pad(&self, pad: usize) -> Result<()> {
        Ok(self.sampler.clear_pad(pad)?)
    }

    pub fn trigger_pad(&self, pad: usize, velocity: f32) -> Result<()> {
        Ok(self.sampler.trigger_pad(pad, velocity)?)
    }

    pub fn release_pad(&self, pad: usize) -> Result<()> {
        Ok(self.sampler.release_pad(pad)?)
    }

    pub fn stop_all_pads(&self) {
        self.sampler.stop_all();
    }

    pub fn set_pad_mode(&self, pad: usize, mode: PadMode) -> Result<()> {
        Ok(self.sampler.set_pad_mode(pad, mode)?)
    }

    pub fn set_pad_choke(&self, pad: usize, group: Option<ChokeGroup>) -> Result<()> {
        Ok(self.sampler.set_pad_choke(pad, group)?)
    }

    pub fn set_pad_route(&self, pad: usize, route: VoiceRoute) -> Result<()> {
        Ok(self.sampler.set_pad_route(pad, route)?)
    }

    pub fn set_pad_character(&self, pad: usize, name: &str) -> Result<()> {
        Ok(self.sampler.set_character(pad, name)?)
    }

    pub fn pad_active(&self, pad: usize) -> Result<bool> {
        Ok(self.sampler.pad_active(pad)?)
    }

    // ---- cast ------------------------------------------------------

    /// Start casting the master mix through `sink`. A running cast is
    /// replaced; the chunk sequence starts over.
    pub fn start_cast(&self, mode: CastMode, sink: Arc<dyn IpcSink>) -> Result<()> {
        let mut guard = self.cast.lock();
        if let Some(mut old) = guard.take() {
            old.stop();
        }
        let ring = HeapRb::<(f32, f32)>::new(CAST_FRAME_SAMPLES * (BACKLOG_LIMIT_FRAMES + 4));
        let (producer, tap) = ring.split();
        let mut pipeline = CastPipeline::new(
            sink,
            PcmFormat::Int24,
            self.context.sample_rate().round() as u32,
        );
        match mode {
            CastMode::Batched => pipeline.start_batched(tap)?,
            CastMode::Negotiated => pipeline.start_negotiated(tap)?,
        }
        self.send_graph(GraphCommand::SetCastTap(Some(producer)));
        self.drain_trash();
        *guard = Some(pipeline);
        Ok(())
    }

    pub fn stop_cast(&self) {
        if let Some(mut pipeline) = self.cast.lock().take() {
            self.send_graph(GraphCommand::SetCastTap(None));
            pipeline.stop();
            self.drain_trash();
        }
    }

    pub fn cast_mode(&self) -> Option<CastMode> {
        self.cast.lock().as_ref().and_then(CastPipeline::mode)
    }

    pub fn cast_phase(&self) -> SessionPhase {
        self.cast
            .lock()
            .as_ref()
            .map_or(SessionPhase::Idle, CastPipeline::session_phase)
    }

    pub fn cast_health(&self) -> SessionHealth {
        self.cast
            .lock()
            .as_ref()
            .map_or(SessionHealth::Ok, CastPipeline::session_health)
    }

    /// Forward a remote answer to the negotiated session.
    pub fn handle_cast_answer(&self, message: &str) -> Result<()> {
        match self.cast.lock().as_mut() {
            Some(pipeline) => Ok(pipeline.handle_answer(message)?),
            None => Err(Error::Cast(segno_cast::Error::Signaling(
                "no cast session running",
            ))),
        }
    }

    pub fn cast_chunks_sent(&self) -> u64 {
        self.cast.lock().as_ref().map_or(0, CastPipeline::chunks_sent)
    }

    pub fn cast_samples_shed(&self) -> u64 {
        self.cast
            .lock()
            .as_ref()
            .map_or(0, CastPipeline::samples_shed)
    }

    // ---- LFOs ------------------------------------------------------

    pub fn set_lfo(&self, index: usize, freq_hz: f32, enabled: bool) -> Result<()> {
        Ok(self.lfos.set(index, freq_hz, enabled)?)
    }

    /// Latest rendered LFO value, for UI display.
    pub fn lfo_meter(&self, index: usize) -> Result<f32> {
        Ok(self.lfos.meter(index)?)
    }

    pub fn bind_lfo(&self, track: usize, target: ParamTarget, binding: LfoBinding) -> Result<()> {
        self.track(track)?.bind_lfo(target, binding)?;
        Ok(())
    }

    pub fn unbind_lfo(&self, track: usize, target: ParamTarget) -> Result<bool> {
        Ok(self.track(track)?.unbind_lfo(target))
    }

    // ---- master and meters -----------------------------------------

    pub fn set_master_volume_db(&self, db: f32) {
        self.master.set_volume_db(db);
    }

    pub fn master_volume_db(&self) -> f32 {
        self.master.volume_db()
    }

    /// Post-limiter peak/RMS since the last read.
    pub fn master_levels(&self) -> Levels {
        self.master.levels()
    }

    /// Post-limiter waveform outline for the analyzer view.
    pub fn master_scope(&self) -> Vec<f32> {
        self.master.scope_snapshot()
    }

    pub fn track_levels(&self, index: usize) -> Result<Levels> {
        Ok(self.track(index)?.levels())
    }

    /// Playhead of a track in seconds.
    pub fn position(&self, index: usize) -> Result<f64> {
        Ok(self.track(index)?.position_secs())
    }

    // ---- context ---------------------------------------------------

    /// Effect registry used by every track's slots.
    pub fn effects(&self) -> &Arc<EffectRegistry> {
        &self.effects
    }

    pub fn sample_rate(&self) -> f64 {
        self.context.sample_rate()
    }

    pub fn buffer_frames(&self) -> u32 {
        self.context.buffer_frames()
    }

    /// Seconds of audio rendered so far.
    pub fn current_time(&self) -> f64 {
        self.context.current_time()
    }

    pub fn is_running(&self) -> bool {
        self.context.is_running()
    }

    /// Input plus output latency, for recording compensation.
    pub fn total_latency_secs(&self) -> f64 {
        self.context.total_latency_secs()
    }

    /// Stalls the watchdog has reported. Offline stations have none.
    pub fn stall_count(&self) -> u64 {
        self.watchdog.as_ref().map_or(0, RenderWatchdog::stall_count)
    }

    pub fn suspend(&self) -> Result<()> {
        Ok(self.context.suspend()?)
    }

    pub fn resume(&self) -> Result<()> {
        Ok(self.context.ensure_running()?)
    }

    /// Render `frames` frames from an offline station.
    pub fn pump(&self, frames: usize) -> Result<Vec<(f32, f32)>> {
        Ok(self.context.pump(frames)?)
    }

    /// Render into `buf` from an offline station, advancing the clock.
    pub fn pump_into(&self, buf: &mut [(f32, f32)]) -> Result<()> {
        Ok(self.context.pump_into(buf)?)
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        // The master recorder's collector thread must not outlive the
        // graph feeding it.
        if let Some(recorder) = self.master_recorder.lock().take() {
            let _ = recorder.stop();
        }
        if let Some(mut pipeline) = self.cast.lock().take() {
            pipeline.stop();
        }
        self.context.close();
    }
}
