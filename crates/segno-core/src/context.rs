//! The rendering context: owns the output stream and the sample clock.

use crate::bridge::ContextId;
use crate::clock::SampleClock;
use crate::config::StationConfig;
use crate::lockfree::{AtomicFlag, AtomicSeconds};
use crate::render::{BlockCtx, Render};
use crate::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Wrapper to hold a `cpal::Stream` in a `Send` context.
///
/// `cpal::Stream` is `!Send` because of platform internals. Holding it
/// here is sound: the handle sits behind a `Mutex` inside
/// [`AudioContext`], control threads only play/pause/drop it serially,
/// and it is never handed to the render thread.
struct StreamHandle(#[allow(dead_code)] cpal::Stream);

// SAFETY: only reached through the Mutex in AudioContext, so access is
// serialized; the stream stays alive until the context drops it.
unsafe impl Send for StreamHandle {}

/// State a context shares with the render callback, the watchdog and the
/// capture side.
#[derive(Debug)]
pub struct ContextShared {
    id: ContextId,
    clock: SampleClock,
    running: AtomicFlag,
    stalled: AtomicFlag,
    panicked: AtomicFlag,
    output_latency: AtomicSeconds,
    input_latency_hint: AtomicSeconds,
}

impl ContextShared {
    fn new(sample_rate: f64) -> Self {
        Self {
            id: ContextId::next(),
            clock: SampleClock::new(sample_rate),
            running: AtomicFlag::new(false),
            stalled: AtomicFlag::new(false),
            panicked: AtomicFlag::new(false),
            output_latency: AtomicSeconds::new(0.0),
            input_latency_hint: AtomicSeconds::new(0.0),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn clock(&self) -> &SampleClock {
        &self.clock
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Set by the error callback or the watchdog when the stream stops
    /// making progress.
    pub fn is_stalled(&self) -> bool {
        self.stalled.get()
    }

    pub fn mark_stalled(&self) {
        self.stalled.set(true);
    }

    pub fn clear_stalled(&self) {
        self.stalled.set(false);
    }

    /// Output path latency in seconds, measured from callback timestamps.
    pub fn output_latency(&self) -> f64 {
        self.output_latency.get()
    }

    /// Latest capture-side latency, reported by whichever input stream
    /// opened most recently. Used for recording compensation.
    pub fn input_latency_hint(&self) -> f64 {
        self.input_latency_hint.get()
    }

    pub fn set_input_latency_hint(&self, secs: f64) {
        self.input_latency_hint.set(secs);
    }
}

enum Backend {
    Live(Mutex<Option<StreamHandle>>),
    Offline(Mutex<Box<dyn Render>>),
}

/// A rendering context.
///
/// [`AudioContext::open`] drives a cpal output stream; the renderer runs
/// in the device callback. [`AudioContext::offline`] renders only when
/// pumped, which is what tests and the master bounce use. Either way the
/// context owns the sample clock and the latency estimates.
pub struct AudioContext {
    shared: Arc<ContextShared>,
    backend: Backend,
    sample_rate: f64,
    buffer_frames: u32,
}

impl AudioContext {
    /// Open a live context on the default output device.
    ///
    /// The device's supported configs are searched for the requested
    /// sample rate; when none matches, the device default wins and the
    /// actual rate is reported by [`AudioContext::sample_rate`].
    pub fn open(config: &StationConfig, renderer: Box<dyn Render>) -> Result<Self> {
        config.validate()?;
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(Error::NoOutputDevice)?;
        let supported = pick_output_config(&device, config.sample_rate)?;
        let sample_rate = f64::from(supported.sample_rate().0);
        if (sample_rate - config.sample_rate).abs() > 0.5 {
            warn!(
                requested = config.sample_rate,
                actual = sample_rate,
                "output device does not support requested rate"
            );
        }

        let shared = Arc::new(ContextShared::new(sample_rate));
        let stream = build_output_stream(
            &device,
            &supported,
            config.buffer_frames,
            shared.clone(),
            renderer,
        )?;
        stream.play()?;
        shared.running.set(true);
        debug!(
            device = device.name().as_deref().unwrap_or("<unnamed>"),
            sample_rate, "context opened"
        );

        Ok(Self {
            shared,
            backend: Backend::Live(Mutex::new(Some(StreamHandle(stream)))),
            sample_rate,
            buffer_frames: config.buffer_frames,
        })
    }

    /// Open an offline context that renders only when pumped.
    pub fn offline(config: &StationConfig, renderer: Box<dyn Render>) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(ContextShared::new(config.sample_rate));
        shared.running.set(true);
        shared
            .output_latency
            .set(f64::from(config.buffer_frames) / config.sample_rate);
        Ok(Self {
            shared,
            backend: Backend::Offline(Mutex::new(renderer)),
            sample_rate: config.sample_rate,
            buffer_frames: config.buffer_frames,
        })
    }

    /// Render `frames` frames from an offline context.
    pub fn pump(&self, frames: usize) -> Result<Vec<(f32, f32)>> {
        let mut buf = vec![(0.0, 0.0); frames];
        self.pump_into(&mut buf)?;
        Ok(buf)
    }

    /// Render into `buf` from an offline context, advancing the clock.
    pub fn pump_into(&self, buf: &mut [(f32, f32)]) -> Result<()> {
        let renderer = match &self.backend {
            Backend::Offline(r) => r,
            Backend::Live(_) => return Err(Error::NotOffline),
        };
        let ctx = BlockCtx {
            sample_rate: self.sample_rate as f32,
            start_frame: self.shared.clock.frames(),
        };
        renderer.lock().render(&ctx, buf);
        self.shared.clock.advance(buf.len() as u64);
        Ok(())
    }

    /// Resume a suspended context. Called before any operation that needs
    /// live audio; a running context is left alone.
    pub fn ensure_running(&self) -> Result<()> {
        match &self.backend {
            Backend::Offline(_) => Ok(()),
            Backend::Live(slot) => {
                let guard = slot.lock();
                let handle = guard.as_ref().ok_or(Error::ContextClosed)?;
                if !self.shared.running.get() {
                    handle.0.play()?;
                    self.shared.running.set(true);
                    debug!("context resumed");
                }
                Ok(())
            }
        }
    }

    /// Pause the output stream. Offline contexts ignore this.
    pub fn suspend(&self) -> Result<()> {
        match &self.backend {
            Backend::Offline(_) => Ok(()),
            Backend::Live(slot) => {
                let guard = slot.lock();
                let handle = guard.as_ref().ok_or(Error::ContextClosed)?;
                if self.shared.running.get() {
                    handle.0.pause()?;
                    self.shared.running.set(false);
                    debug!("context suspended");
                }
                Ok(())
            }
        }
    }

    /// Drop the output stream. The context cannot be reopened.
    pub fn close(&self) {
        if let Backend::Live(slot) = &self.backend {
            slot.lock().take();
            self.shared.running.set(false);
        }
    }

    pub fn id(&self) -> ContextId {
        self.shared.id
    }

    pub fn shared(&self) -> Arc<ContextShared> {
        self.shared.clone()
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn buffer_frames(&self) -> u32 {
        self.buffer_frames
    }

    /// Seconds of audio rendered so far.
    pub fn current_time(&self) -> f64 {
        self.shared.clock.seconds()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Input plus output latency, for recording compensation.
    pub fn total_latency_secs(&self) -> f64 {
        self.shared.output_latency.get() + self.shared.input_latency_hint.get()
    }
}

fn pick_output_config(
    device: &cpal::Device,
    requested_rate: f64,
) -> Result<cpal::SupportedStreamConfig> {
    let wanted = cpal::SampleRate(requested_rate.round() as u32);
    if let Ok(ranges) = device.supported_output_configs() {
        for range in ranges {
            if range.channels() >= 2 {
                if let Some(cfg) = range.try_with_sample_rate(wanted) {
                    return Ok(cfg);
                }
            }
        }
    }
    Ok(device.default_output_config()?)
}

fn build_output_stream(
    device: &cpal::Device,
    supported: &cpal::SupportedStreamConfig,
    buffer_frames: u32,
    shared: Arc<ContextShared>,
    renderer: Box<dyn Render>,
) -> Result<cpal::Stream> {
    let mut config: cpal::StreamConfig = supported.config();
    config.buffer_size = match *supported.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            let clamped = buffer_frames.clamp(min, max);
            if clamped != buffer_frames {
                warn!(
                    requested = buffer_frames,
                    clamped, "buffer size outside device range"
                );
            }
            cpal::BufferSize::Fixed(clamped)
        }
        cpal::SupportedBufferSize::Unknown => {
            warn!("device does not report a buffer range, using its default");
            cpal::BufferSize::Default
        }
    };

    match supported.sample_format() {
        cpal::SampleFormat::F32 => typed_stream::<f32>(device, &config, shared, renderer),
        cpal::SampleFormat::I16 => typed_stream::<i16>(device, &config, shared, renderer),
        cpal::SampleFormat::U16 => typed_stream::<u16>(device, &config, shared, renderer),
        format => Err(Error::UnsupportedFormat(format!("{format:?}"))),
    }
}

fn typed_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<ContextShared>,
    mut renderer: Box<dyn Render>,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0 as f32;
    let mut scratch: Vec<(f32, f32)> = vec![(0.0, 0.0); 8_192];

    let cb_shared = shared.clone();
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels.max(1);
            if cb_shared.panicked.get() {
                silence(data);
                return;
            }
            if frames > scratch.len() {
                scratch.resize(frames, (0.0, 0.0));
            }

            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let block = &mut scratch[..frames];
                let ctx = BlockCtx {
                    sample_rate,
                    start_frame: cb_shared.clock.frames(),
                };
                renderer.render(&ctx, block);

                for (frame_idx, out) in data.chunks_mut(channels).enumerate() {
                    let (l, r) = block[frame_idx];
                    match out.len() {
                        1 => out[0] = T::from_sample((l + r) * 0.5),
                        _ => {
                            out[0] = T::from_sample(l);
                            out[1] = T::from_sample(r);
                            for extra in out.iter_mut().skip(2) {
                                *extra = T::from_sample(0.0);
                            }
                        }
                    }
                }
            }));

            if result.is_err() {
                // A panicking graph renders silence from here on; the
                // watchdog and the panicked flag surface it to control.
                cb_shared.panicked.set(true);
                cb_shared.mark_stalled();
                silence(data);
                return;
            }

            cb_shared.clock.advance(frames as u64);
            let ts = info.timestamp();
            if let Some(delay) = ts.playback.duration_since(&ts.callback) {
                cb_shared.output_latency.set(delay.as_secs_f64());
            }
        },
        {
            let err_shared = shared.clone();
            move |err: cpal::StreamError| {
                error!(%err, "output stream error");
                err_shared.mark_stalled();
                err_shared.running.set(false);
            }
        },
        None,
    )?;
    Ok(stream)
}

fn silence<T: cpal::SizedSample + cpal::FromSample<f32>>(data: &mut [T]) {
    for sample in data.iter_mut() {
        *sample = T::from_sample(0.0);
    }
}
