//! Per-track sample capture.
//!
//! The recorder drains a capture tap on its own collector thread, far
//! away from the render callback. Frames are appended in chunks and
//! only stitched together at finalize time; round-trip latency is
//! compensated by discarding the first `latency_samples` frames.

use crate::sample::{encode_wav_f32, SampleBuffer};
use crate::{Error, Result};
use parking_lot::Mutex;
use segno_core::{AtomicCounter, AtomicFlag, FrameRx, StateCell};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thread_priority::ThreadPriority;
use tracing::{debug, error, warn};

/// Frames returned when a recording captured nothing at all.
pub const MIN_SILENT_FRAMES: usize = 64;

/// Linear fade applied to both edges of a finished recording.
const FADE_SECS: f64 = 0.005;

const COLLECT_BATCH: usize = 4096;
const POLL: Duration = Duration::from_millis(5);
const READY_STEPS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecorderState {
    Idle = 0,
    Armed = 1,
    Recording = 2,
    Finalizing = 3,
}

impl From<u8> for RecorderState {
    fn from(raw: u8) -> Self {
        match raw {
            1 => Self::Armed,
            2 => Self::Recording,
            3 => Self::Finalizing,
            _ => Self::Idle,
        }
    }
}

impl From<RecorderState> for u8 {
    fn from(state: RecorderState) -> Self {
        state as u8
    }
}

/// Capture parameters resolved by the caller at start time.
#[derive(Debug, Clone, Copy)]
pub struct RecorderConfig {
    /// Rate of the capture stream feeding the tap (the recording keeps
    /// this rate; playback resamples).
    pub sample_rate: u32,
    /// Round-trip latency to discard from the head of the capture.
    pub latency_samples: u64,
    /// Auto-stop after exactly this many accepted frames.
    pub target_frames: Option<u64>,
}

/// A finished recording.
pub struct RecordedSample {
    /// 32-bit float WAV encoding, ready to hand to a persistence layer.
    pub wav: Vec<u8>,
    /// Decoded buffer, ready to load straight into a track.
    pub buffer: Arc<SampleBuffer>,
    pub frames: u64,
    pub sample_rate: u32,
}

/// Frames accumulated by the collector thread.
struct RecordingSession {
    target: Option<u64>,
    skip_remaining: u64,
    recorded: u64,
    left_chunks: Vec<Vec<f32>>,
    right_chunks: Vec<Vec<f32>>,
}

impl RecordingSession {
    fn new(config: &RecorderConfig) -> Self {
        Self {
            target: config.target_frames,
            skip_remaining: config.latency_samples,
            recorded: 0,
            left_chunks: Vec::new(),
            right_chunks: Vec::new(),
        }
    }

    /// Append a drained batch, honoring the latency skip and the exact
    /// target count. Returns true once the target is reached.
    fn absorb(&mut self, mut frames: &[(f32, f32)]) -> bool {
        if self.skip_remaining > 0 {
            let skip = self.skip_remaining.min(frames.len() as u64) as usize;
            frames = &frames[skip..];
            self.skip_remaining -= skip as u64;
        }
        let mut take = frames.len();
        if let Some(target) = self.target {
            take = take.min(target.saturating_sub(self.recorded) as usize);
        }
        if take > 0 {
            self.left_chunks.push(frames[..take].iter().map(|f| f.0).collect());
            self.right_chunks.push(frames[..take].iter().map(|f| f.1).collect());
            self.recorded += take as u64;
        }
        matches!(self.target, Some(target) if self.recorded >= target)
    }
}

struct Collector {
    handle: JoinHandle<RecordingSession>,
    stop: Arc<AtomicFlag>,
    sample_rate: u32,
}

/// One recorder lives inside each track channel.
///
/// The caller owns the capture tap token; dropping it after `stop()`
/// detaches the tap from the shared stream.
pub struct SampleRecorder {
    state: Arc<StateCell<RecorderState>>,
    recorded: Arc<AtomicCounter>,
    active: Mutex<Option<Collector>>,
}

impl SampleRecorder {
    pub fn new() -> Self {
        Self {
            state: Arc::new(StateCell::new(RecorderState::Idle)),
            recorded: Arc::new(AtomicCounter::new(0)),
            active: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state.get()
    }

    pub fn recorded_frames(&self) -> u64 {
        self.recorded.get()
    }

    pub fn recorded_secs(&self) -> f64 {
        let guard = self.active.lock();
        match guard.as_ref() {
            Some(collector) => self.recorded.get() as f64 / f64::from(collector.sample_rate),
            None => 0.0,
        }
    }

    /// Begin collecting from `rx`.
    ///
    /// Waits briefly for the first frames to prove the tap is flowing;
    /// a quiet tap logs a warning but the recording still proceeds.
    /// `on_target` fires exactly once if an auto-stop target is reached.
    pub fn start(
        &self,
        rx: FrameRx,
        config: RecorderConfig,
        on_target: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        if !self
            .state
            .transition(RecorderState::Idle, RecorderState::Armed)
        {
            return Err(Error::RecorderBusy("a recording is already in progress"));
        }
        self.recorded.set(0);

        let stop = Arc::new(AtomicFlag::new(false));
        let saw_frames = Arc::new(AtomicFlag::new(false));
        let session = RecordingSession::new(&config);
        let state = Arc::clone(&self.state);
        let recorded = Arc::clone(&self.recorded);
        let thread_stop = Arc::clone(&stop);
        let thread_saw = Arc::clone(&saw_frames);
        let callback: Box<dyn FnOnce() + Send> = Box::new(on_target);

        let handle = match thread::Builder::new().name("segno-recorder".into()).spawn(
            move || {
                let _ = thread_priority::set_current_thread_priority(ThreadPriority::Max);
                collector_loop(rx, session, thread_stop, thread_saw, state, recorded, callback)
            },
        ) {
            Ok(handle) => handle,
            Err(err) => {
                self.state.set(RecorderState::Idle);
                return Err(err.into());
            }
        };

        *self.active.lock() = Some(Collector {
            handle,
            stop,
            sample_rate: config.sample_rate,
        });

        // Readiness handshake: the first drained batch proves the tap
        // is being fed. Bounded so a dead input cannot hang the caller.
        for _ in 0..READY_STEPS {
            if saw_frames.get() {
                break;
            }
            thread::sleep(POLL);
        }
        if !saw_frames.get() {
            warn!("recorder started but the capture tap has not produced frames yet");
        }
        debug!(
            sample_rate = config.sample_rate,
            latency_samples = config.latency_samples,
            target_frames = ?config.target_frames,
            "recording started"
        );
        Ok(())
    }

    /// Stop and finalize. Idempotent: without an active recording this
    /// returns `Ok(None)`.
    pub fn stop(&self) -> Result<Option<RecordedSample>> {
        let collector = match self.active.lock().take() {
            Some(collector) => collector,
            None => return Ok(None),
        };
        self.state.set(RecorderState::Finalizing);
        collector.stop.set(true);

        let session = match collector.handle.join() {
            Ok(session) => session,
            Err(_) => {
                error!("recorder collector thread panicked, discarding the take");
                self.state.set(RecorderState::Idle);
                return Ok(None);
            }
        };

        let finalized = finalize(session, collector.sample_rate);
        self.state.set(RecorderState::Idle);
        let sample = finalized?;
        debug!(frames = sample.frames, "recording finalized");
        Ok(Some(sample))
    }
}

impl Default for SampleRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn collector_loop(
    rx: FrameRx,
    mut session: RecordingSession,
    stop: Arc<AtomicFlag>,
    saw_frames: Arc<AtomicFlag>,
    state: Arc<StateCell<RecorderState>>,
    recorded: Arc<AtomicCounter>,
    on_target: Box<dyn FnOnce() + Send>,
) -> RecordingSession {
    let mut on_target = Some(on_target);
    let mut batch = vec![(0.0f32, 0.0f32); COLLECT_BATCH];
    loop {
        let drained = rx.drain_into(&mut batch);
        if drained == 0 {
            if stop.get() {
                break;
            }
            thread::sleep(POLL);
            continue;
        }
        if !saw_frames.get() {
            saw_frames.set(true);
            state.transition(RecorderState::Armed, RecorderState::Recording);
        }
        let target_reached = session.absorb(&batch[..drained]);
        recorded.set(session.recorded);
        if target_reached {
            state.transition(RecorderState::Recording, RecorderState::Finalizing);
            if let Some(callback) = on_target.take() {
                callback();
            }
            break;
        }
        if stop.get() {
            break;
        }
    }
    session
}

fn finalize(session: RecordingSession, sample_rate: u32) -> Result<RecordedSample> {
    let mut left: Vec<f32> = session.left_chunks.concat();
    let mut right: Vec<f32> = session.right_chunks.concat();
    if left.is_empty() {
        warn!("recording captured no frames, producing a short silent sample");
        left = vec![0.0; MIN_SILENT_FRAMES];
        right = vec![0.0; MIN_SILENT_FRAMES];
    } else {
        duplicate_silent_side(&mut left, &mut right);
        apply_edge_fades(&mut left, sample_rate);
        apply_edge_fades(&mut right, sample_rate);
    }

    let frames = left.len() as u64;
    let wav = encode_wav_f32(&left, &right, sample_rate)?;
    let buffer = Arc::new(SampleBuffer::from_channels(left, right, sample_rate)?);
    Ok(RecordedSample {
        wav,
        buffer,
        frames,
        sample_rate,
    })
}

/// A channel that stayed exactly zero (unconnected mic side, mono
/// source) takes a copy of the live one.
fn duplicate_silent_side(left: &mut [f32], right: &mut [f32]) {
    let left_live = left.iter().any(|s| *s != 0.0);
    let right_live = right.iter().any(|s| *s != 0.0);
    if left_live && !right_live {
        right.copy_from_slice(left);
    } else if right_live && !left_live {
        left.copy_from_slice(right);
    }
}

fn apply_edge_fades(samples: &mut [f32], sample_rate: u32) {
    let fade = ((f64::from(sample_rate) * FADE_SECS) as usize).min(samples.len() / 2);
    if fade == 0 {
        return;
    }
    let scale = 1.0 / fade as f32;
    for i in 0..fade {
        samples[i] *= i as f32 * scale;
    }
    let len = samples.len();
    for i in (len - fade)..len {
        samples[i] *= (len - i) as f32 * scale;
    }
}
