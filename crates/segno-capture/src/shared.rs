//! Shared capture streams, one per device id.
//!
//! Every consumer of a device (track live input, sample recorder, cast
//! mic path) taps the same open stream. The device callback folds each
//! interleaved frame to a stereo pair and fans it out to bounded per-tap
//! queues; a slow consumer drops its own frames and never stalls the
//! callback or its neighbors.

use crate::device::{AudioDeviceInfo, DeviceId, DeviceRegistry};
use crate::negotiate::{negotiate_input, ChannelMap, Negotiated, Tier};
use crate::{Error, Result};
use arc_swap::ArcSwap;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::Sample;
use dashmap::DashMap;
use parking_lot::Mutex;
use segno_core::lockfree::{AtomicFlag, AtomicLevel, AtomicSeconds};
use segno_core::{frame_channel, needs_bridge, AudioLink, ContextId, FrameRx, FrameTx};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Interleaved channels beyond this are ignored when folding to stereo.
const FOLD_MAX_CHANNELS: usize = 32;

/// Wrapper to hold a `cpal::Stream` in a `Send` context.
///
/// The handle only lives behind the Mutex in [`SharedStream`]; control
/// threads open, stop and drop it serially and it never reaches the
/// callback side.
struct InputStreamHandle(#[allow(dead_code)] cpal::Stream);

// SAFETY: access is serialized by the Mutex in SharedStream; the stream
// stays where it was created until the shared stream closes.
unsafe impl Send for InputStreamHandle {}

/// Keeps a subscription alive. Dropping it lets the fan-out prune the
/// tap and lets `close_idle` retire the stream.
#[derive(Debug)]
pub struct TapToken {
    _alive: Arc<()>,
}

struct Tap {
    tx: FrameTx,
    alive: Weak<()>,
}

struct StreamState {
    taps: ArcSwap<Vec<Tap>>,
    map: ChannelMap,
    peak: AtomicLevel,
    latency: AtomicSeconds,
    capturing: AtomicFlag,
}

/// One open capture stream, shared by every consumer of its device.
pub struct SharedStream {
    id: DeviceId,
    context_id: ContextId,
    sample_rate: u32,
    channels: u16,
    tier: Tier,
    state: Arc<StreamState>,
    handle: Mutex<Option<InputStreamHandle>>,
}

impl std::fmt::Debug for SharedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStream")
            .field("id", &self.id)
            .field("context_id", &self.context_id)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("tier", &self.tier)
            .finish_non_exhaustive()
    }
}

impl SharedStream {
    /// Subscribe a new tap. The token keeps the tap alive; the receiver
    /// is handed to whoever consumes the frames.
    pub fn subscribe(&self, capacity: usize) -> (TapToken, FrameRx) {
        let (tx, rx) = frame_channel(capacity);
        let alive = Arc::new(());
        let tap = Tap {
            tx,
            alive: Arc::downgrade(&alive),
        };
        self.edit_taps(move |taps| taps.push(tap));
        (TapToken { _alive: alive }, rx)
    }

    /// Tag a connection into `dst`'s clock domain. Capture streams run
    /// their own clock, so in practice this always bridges; the tag makes
    /// that visible at the call site.
    pub fn link_to(&self, dst: ContextId, capacity: usize) -> (TapToken, AudioLink) {
        if needs_bridge(self.context_id, dst) {
            let (token, rx) = self.subscribe(capacity);
            (token, AudioLink::Bridged(rx))
        } else {
            (
                TapToken {
                    _alive: Arc::new(()),
                },
                AudioLink::Direct,
            )
        }
    }

    /// Drop taps whose tokens are gone; returns the live count.
    pub fn prune(&self) -> usize {
        self.edit_taps(|taps| taps.retain(|t| t.alive.strong_count() > 0));
        self.tap_count()
    }

    /// Taps whose tokens are still held.
    pub fn tap_count(&self) -> usize {
        self.state
            .taps
            .load()
            .iter()
            .filter(|t| t.alive.strong_count() > 0)
            .count()
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.id
    }

    /// Clock domain of this stream. Distinct from the render context.
    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Which negotiation tier opened this stream.
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Capture-path latency in seconds, from callback timestamps.
    pub fn latency_secs(&self) -> f64 {
        self.state.latency.get()
    }

    /// Latched input peak; reading resets it.
    pub fn take_peak(&self) -> f32 {
        self.state.peak.swap(0.0)
    }

    /// False once the device errored or the stream was closed.
    pub fn is_open(&self) -> bool {
        self.state.capturing.get()
    }

    fn close(&self) {
        self.handle.lock().take();
        self.state.capturing.set(false);
    }

    fn edit_taps(&self, f: impl FnOnce(&mut Vec<Tap>)) {
        // Taps mutate rarely (connect/disconnect); the callback only ever
        // loads the snapshot.
        let current = self.state.taps.load();
        let mut next = Vec::with_capacity(current.len() + 1);
        for tap in current.iter() {
            if tap.alive.strong_count() > 0 {
                next.push(Tap {
                    tx: tap.tx.clone(),
                    alive: tap.alive.clone(),
                });
            }
        }
        f(&mut next);
        self.state.taps.store(Arc::new(next));
    }

    /// A stream with no device behind it, for tests. Frames come from
    /// [`SharedStream::feed`] instead of a callback.
    #[cfg(any(test, feature = "test-support"))]
    pub fn detached(id: DeviceId, map: ChannelMap) -> Self {
        let state = Arc::new(StreamState {
            taps: ArcSwap::from_pointee(Vec::new()),
            map,
            peak: AtomicLevel::default(),
            latency: AtomicSeconds::default(),
            capturing: AtomicFlag::new(true),
        });
        Self {
            id,
            context_id: ContextId::next(),
            sample_rate: 48_000,
            channels: 2,
            tier: Tier::Exact,
            state,
            handle: Mutex::new(None),
        }
    }

    /// Push frames as the device callback would. Test-only.
    #[cfg(any(test, feature = "test-support"))]
    pub fn feed(&self, frames: &[(f32, f32)]) {
        let taps = self.state.taps.load();
        let mut peak = 0.0f32;
        for &(l, r) in frames {
            peak = peak.max(l.abs().max(r.abs()));
            for tap in taps.iter() {
                if tap.alive.strong_count() > 0 {
                    tap.tx.push((l, r));
                }
            }
        }
        self.state.peak.raise(peak);
    }
}

/// Registry of shared capture streams keyed by device id.
pub struct SharedStreamCache {
    registry: Arc<DeviceRegistry>,
    streams: DashMap<DeviceId, Arc<SharedStream>>,
    opening: Mutex<HashMap<DeviceId, Arc<Mutex<()>>>>,
}

impl SharedStreamCache {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            registry,
            streams: DashMap::new(),
            opening: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// The open stream for a device, opening it on first use with the
    /// default stereo fold.
    pub fn acquire(&self, id: &DeviceId) -> Result<Arc<SharedStream>> {
        self.acquire_with_map(id, ChannelMap::default())
    }

    /// As [`SharedStreamCache::acquire`] with an explicit channel fold.
    /// The map only applies when this call actually opens the stream; an
    /// already-open stream keeps its fold.
    pub fn acquire_with_map(&self, id: &DeviceId, map: ChannelMap) -> Result<Arc<SharedStream>> {
        if let Some(stream) = self.get_open(id) {
            return Ok(stream);
        }

        // Concurrent callers for the same id wait on one gate so the
        // device opens exactly once.
        let gate = {
            let mut opening = self.opening.lock();
            opening.entry(id.clone()).or_default().clone()
        };
        let _guard = gate.lock();

        if let Some(stream) = self.get_open(id) {
            return Ok(stream);
        }
        self.streams.remove(id);

        let info = self
            .registry
            .find(id)
            .ok_or_else(|| Error::UnknownDevice(id.to_string()))?;
        let stream = Arc::new(open_stream(&info, map)?);
        self.streams.insert(id.clone(), stream.clone());
        debug!(device = %id, tier = ?stream.tier(), "capture stream opened");
        Ok(stream)
    }

    pub fn get(&self, id: &DeviceId) -> Option<Arc<SharedStream>> {
        self.streams.get(id).map(|s| s.clone())
    }

    fn get_open(&self, id: &DeviceId) -> Option<Arc<SharedStream>> {
        self.streams
            .get(id)
            .map(|s| s.clone())
            .filter(|s| s.is_open())
    }

    /// Stop and forget a stream immediately.
    pub fn close(&self, id: &DeviceId) {
        if let Some((_, stream)) = self.streams.remove(id) {
            stream.close();
            debug!(device = %id, "capture stream closed");
        }
    }

    /// Retire streams whose last tap is gone; returns how many closed.
    pub fn close_idle(&self) -> usize {
        let idle: Vec<DeviceId> = self
            .streams
            .iter()
            .filter(|entry| entry.value().prune() == 0)
            .map(|entry| entry.key().clone())
            .collect();
        for id in &idle {
            self.close(id);
        }
        idle.len()
    }

    pub fn open_count(&self) -> usize {
        self.streams
            .iter()
            .filter(|entry| entry.value().is_open())
            .count()
    }

    /// Register a detached stream under `id`, for tests.
    #[cfg(any(test, feature = "test-support"))]
    pub fn insert_detached(&self, id: DeviceId) -> Arc<SharedStream> {
        let stream = Arc::new(SharedStream::detached(id.clone(), ChannelMap::default()));
        self.streams.insert(id, stream.clone());
        stream
    }
}

fn open_stream(info: &AudioDeviceInfo, map: ChannelMap) -> Result<SharedStream> {
    let Negotiated {
        device,
        config,
        tier,
    } = negotiate_input(info)?;

    let state = Arc::new(StreamState {
        taps: ArcSwap::from_pointee(Vec::new()),
        map,
        peak: AtomicLevel::default(),
        latency: AtomicSeconds::default(),
        capturing: AtomicFlag::new(false),
    });

    let stream_config: cpal::StreamConfig = config.config();
    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => typed_input::<f32>(&device, &stream_config, state.clone())?,
        cpal::SampleFormat::I16 => typed_input::<i16>(&device, &stream_config, state.clone())?,
        cpal::SampleFormat::U16 => typed_input::<u16>(&device, &stream_config, state.clone())?,
        format => return Err(Error::UnsupportedFormat(format!("{format:?}"))),
    };
    stream.play()?;
    state.capturing.set(true);

    Ok(SharedStream {
        id: info.id.clone(),
        context_id: ContextId::next(),
        sample_rate: stream_config.sample_rate.0,
        channels: stream_config.channels,
        tier,
        state,
        handle: Mutex::new(Some(InputStreamHandle(stream))),
    })
}

fn typed_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    state: Arc<StreamState>,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let channels = (config.channels as usize).max(1);
    let cb_state = state.clone();

    let stream = device.build_input_stream(
        config,
        move |data: &[T], info: &cpal::InputCallbackInfo| {
            let taps = cb_state.taps.load();
            let mut scratch = [0.0f32; FOLD_MAX_CHANNELS];
            let mut peak = 0.0f32;
            for frame in data.chunks(channels) {
                let n = frame.len().min(FOLD_MAX_CHANNELS);
                for (slot, sample) in scratch.iter_mut().zip(frame.iter().take(n)) {
                    *slot = f32::from_sample(*sample);
                }
                let (l, r) = cb_state.map.fold(&scratch[..n]);
                peak = peak.max(l.abs().max(r.abs()));
                for tap in taps.iter() {
                    if tap.alive.strong_count() > 0 {
                        tap.tx.push((l, r));
                    }
                }
            }
            cb_state.peak.raise(peak);
            let ts = info.timestamp();
            if let Some(delay) = ts.callback.duration_since(&ts.capture) {
                cb_state.latency.set(delay.as_secs_f64());
            }
        },
        {
            let err_state = state.clone();
            move |err: cpal::StreamError| {
                warn!(%err, "input stream error, stream marked closed");
                err_state.capturing.set(false);
            }
        },
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cache() -> SharedStreamCache {
        SharedStreamCache::new(Arc::new(DeviceRegistry::new()))
    }

    #[test]
    fn acquire_reuses_the_open_stream() {
        let cache = test_cache();
        let id = DeviceId::from("Test Mic");
        let inserted = cache.insert_detached(id.clone());
        let a = cache.acquire(&id).unwrap();
        let b = cache.acquire(&id).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &inserted));
        assert_eq!(cache.open_count(), 1);
    }

    #[test]
    fn unknown_device_errors() {
        let cache = test_cache();
        let err = cache.acquire(&DeviceId::from("No Such Device")).unwrap_err();
        assert!(matches!(err, Error::UnknownDevice(_)));
    }

    #[test]
    fn taps_receive_fanned_out_frames() {
        let stream = SharedStream::detached(DeviceId::from("Test Mic"), ChannelMap::default());
        let (_token_a, rx_a) = stream.subscribe(16);
        let (_token_b, rx_b) = stream.subscribe(16);
        stream.feed(&[(0.1, 0.2), (0.3, 0.4)]);
        assert_eq!(rx_a.pop(), Some((0.1, 0.2)));
        assert_eq!(rx_b.pop(), Some((0.1, 0.2)));
        assert_eq!(rx_a.pop(), Some((0.3, 0.4)));
        assert!((stream.take_peak() - 0.4).abs() < f32::EPSILON);
        assert_eq!(stream.take_peak(), 0.0);
    }

    #[test]
    fn dropped_token_prunes_the_tap() {
        let stream = SharedStream::detached(DeviceId::from("Test Mic"), ChannelMap::default());
        let (token, _rx) = stream.subscribe(16);
        let (_token_b, _rx_b) = stream.subscribe(16);
        assert_eq!(stream.tap_count(), 2);
        drop(token);
        assert_eq!(stream.prune(), 1);
    }

    #[test]
    fn close_idle_retires_untapped_streams() {
        let cache = test_cache();
        let id = DeviceId::from("Test Mic");
        let stream = cache.insert_detached(id.clone());
        let (token, _rx) = stream.subscribe(16);
        assert_eq!(cache.close_idle(), 0);
        drop(token);
        assert_eq!(cache.close_idle(), 1);
        assert!(cache.get(&id).is_none());
    }

    #[test]
    fn link_to_render_context_is_bridged() {
        let stream = SharedStream::detached(DeviceId::from("Test Mic"), ChannelMap::default());
        let (_token, link) = stream.link_to(ContextId::next(), 16);
        assert!(!link.is_direct());
        stream.feed(&[(0.5, -0.5)]);
        assert_eq!(link.pop(), Some((0.5, -0.5)));
    }
}
