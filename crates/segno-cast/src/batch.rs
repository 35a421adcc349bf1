//! Batched cast mode: a pump thread drains the master tap, assembles
//! fixed frames and pushes them to the sink best-effort.

use ringbuf::traits::{Consumer, Observer};
use ringbuf::HeapCons;
use segno_core::{AtomicCounter, AtomicFlag};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thread_priority::ThreadPriority;
use tracing::{debug, warn};

use crate::error::Result;
use crate::frames::{FramePacker, PcmFormat, CAST_FRAME_SAMPLES};
use crate::ipc::IpcSink;

/// Assembled frames of backlog tolerated before old audio is shed.
pub const BACKLOG_LIMIT_FRAMES: usize = 4;

const PUMP_SLEEP: Duration = Duration::from_millis(5);
const DRAIN_CHUNK: usize = 1024;

/// Sheds tap backlog when the render side outpaces the sink, so the
/// cast stays time-aligned with local monitoring.
pub struct DriftCompensator {
    limit_samples: usize,
    shed: u64,
}

impl DriftCompensator {
    pub fn new(limit_frames: usize) -> Self {
        Self {
            limit_samples: limit_frames * CAST_FRAME_SAMPLES,
            shed: 0,
        }
    }

    /// Trim the backlog down to one assembled frame once it exceeds the
    /// limit. Returns the samples shed.
    pub fn trim(&mut self, tap: &mut HeapCons<(f32, f32)>) -> usize {
        let backlog = tap.occupied_len();
        if backlog <= self.limit_samples {
            return 0;
        }
        let skipped = tap.skip(backlog - CAST_FRAME_SAMPLES);
        self.shed += skipped as u64;
        skipped
    }

    /// Samples shed since the compensator was created.
    pub fn samples_shed(&self) -> u64 {
        self.shed
    }
}

struct PumpShared {
    running: AtomicFlag,
    chunks_sent: AtomicCounter,
    samples_shed: AtomicCounter,
}

/// Handle to the running pump thread.
pub struct BatchedCaster {
    shared: Arc<PumpShared>,
    thread: Option<JoinHandle<()>>,
}

impl BatchedCaster {
    /// Start the pump on `tap`, pushing chunks into `sink`.
    pub fn start(
        tap: HeapCons<(f32, f32)>,
        sink: Arc<dyn IpcSink>,
        format: PcmFormat,
        sample_rate: u32,
    ) -> Result<Self> {
        let shared = Arc::new(PumpShared {
            running: AtomicFlag::new(true),
            chunks_sent: AtomicCounter::default(),
            samples_shed: AtomicCounter::default(),
        });
        let packer = FramePacker::new(format, sample_rate);
        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("segno-cast-pump".into())
            .spawn(move || {
                let _ = thread_priority::set_current_thread_priority(ThreadPriority::Max);
                pump_loop(tap, sink, packer, thread_shared);
            })?;
        debug!(?format, sample_rate, "batched cast started");
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Stop the pump and drop the tap. Idempotent.
    pub fn stop(&mut self) {
        self.shared.running.set(false);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Chunks accepted by the sink so far.
    pub fn chunks_sent(&self) -> u64 {
        self.shared.chunks_sent.get()
    }

    /// Samples shed by drift compensation so far.
    pub fn samples_shed(&self) -> u64 {
        self.shared.samples_shed.get()
    }
}

impl Drop for BatchedCaster {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump_loop(
    mut tap: HeapCons<(f32, f32)>,
    sink: Arc<dyn IpcSink>,
    mut packer: FramePacker,
    shared: Arc<PumpShared>,
) {
    let mut drift = DriftCompensator::new(BACKLOG_LIMIT_FRAMES);
    let mut drain = vec![(0.0f32, 0.0f32); DRAIN_CHUNK];
    let mut ready = Vec::new();

    while shared.running.get() {
        if tap.occupied_len() == 0 {
            thread::sleep(PUMP_SLEEP);
            continue;
        }

        let shed = drift.trim(&mut tap);
        if shed > 0 {
            shared.samples_shed.add(shed as u64);
            warn!(shed, "cast backlog shed, render outpaced the sink");
        }

        let to_read = tap.occupied_len().min(drain.len());
        let read = tap.pop_slice(&mut drain[..to_read]);
        packer.push_frames(&drain[..read], &mut ready);
        for chunk in ready.drain(..) {
            let seq = chunk.seq;
            match sink.push_chunk(&chunk) {
                Ok(()) => {
                    shared.chunks_sent.bump();
                }
                Err(err) => warn!(%err, seq, "cast push failed, continuing"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::decode_chunk;
    use crate::ipc::{ChannelSink, SinkEvent};
    use ringbuf::traits::{Producer, Split};
    use ringbuf::HeapRb;

    #[test]
    fn pump_assembles_and_pushes_chunks() {
        let rb = HeapRb::<(f32, f32)>::new(CAST_FRAME_SAMPLES * 8);
        let (mut prod, cons) = rb.split();
        let (sink, rx) = ChannelSink::new();

        let signal: Vec<(f32, f32)> = (0..CAST_FRAME_SAMPLES * 2)
            .map(|i| {
                let x = (i as f32 * 0.01).sin() * 0.5;
                (x, -x)
            })
            .collect();
        assert_eq!(prod.push_slice(&signal), signal.len());

        let mut caster =
            BatchedCaster::start(cons, sink, PcmFormat::Float32, 48_000).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let (first, second) = match (first, second) {
            (SinkEvent::Chunk(a), SinkEvent::Chunk(b)) => (a, b),
            other => panic!("expected two chunks, got {other:?}"),
        };
        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert_eq!(first.frames, CAST_FRAME_SAMPLES);

        let back = decode_chunk(&first).unwrap();
        assert!((back[100].0 - signal[100].0).abs() < 1e-5);

        caster.stop();
        caster.stop();
        assert_eq!(caster.chunks_sent(), 2);
    }

    #[test]
    fn drift_compensator_sheds_down_to_one_frame() {
        let rb = HeapRb::<(f32, f32)>::new(CAST_FRAME_SAMPLES * 6);
        let (mut prod, mut cons) = rb.split();
        let backlog = vec![(0.1f32, 0.1f32); CAST_FRAME_SAMPLES * 5];
        assert_eq!(prod.push_slice(&backlog), backlog.len());

        let mut drift = DriftCompensator::new(BACKLOG_LIMIT_FRAMES);
        let shed = drift.trim(&mut cons);
        assert_eq!(shed, CAST_FRAME_SAMPLES * 4);
        assert_eq!(cons.occupied_len(), CAST_FRAME_SAMPLES);
        assert_eq!(drift.samples_shed(), shed as u64);

        // Under the limit nothing is shed.
        assert_eq!(drift.trim(&mut cons), 0);
    }

    #[test]
    fn pump_survives_a_dead_sink() {
        let rb = HeapRb::<(f32, f32)>::new(CAST_FRAME_SAMPLES * 2);
        let (mut prod, cons) = rb.split();
        let (sink, rx) = ChannelSink::new();
        drop(rx);

        let frames = vec![(0.2f32, 0.2f32); CAST_FRAME_SAMPLES];
        assert_eq!(prod.push_slice(&frames), frames.len());

        let mut caster =
            BatchedCaster::start(cons, sink, PcmFormat::Int24, 48_000).unwrap();
        // Give the pump time to attempt the push; the error is logged
        // and the thread keeps running.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(caster.chunks_sent(), 0);
        caster.stop();
    }
}
