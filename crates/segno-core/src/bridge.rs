//! Frame channels and context bridging.
//!
//! Audio that crosses clock domains (an input stream feeding the render
//! context, the render context feeding the cast pump) moves through
//! bounded frame channels. Whether a hop needs such a bridge is explicit:
//! [`needs_bridge`] compares the two context ids and the connection is
//! tagged [`AudioLink::Direct`] or [`AudioLink::Bridged`] accordingly.
//! Nothing bridges silently.

use crate::lockfree::AtomicCounter;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a clock domain: one per rendering context
/// and one per open capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    pub fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Producer half of a bounded stereo frame channel.
///
/// `push` never blocks; a full queue counts a drop and moves on. The
/// consumer side decides what missing frames mean (silence, backlog trim).
#[derive(Debug, Clone)]
pub struct FrameTx {
    tx: Sender<(f32, f32)>,
    dropped: Arc<AtomicCounter>,
}

impl FrameTx {
    /// Push one frame. Returns false once the consumer half is gone so
    /// fan-outs can prune dead taps; a full queue counts a drop but the
    /// tap stays live.
    #[inline]
    pub fn push(&self, frame: (f32, f32)) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.bump();
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Push a block; returns false once the consumer half is gone.
    #[inline]
    pub fn push_block(&self, frames: &[(f32, f32)]) -> bool {
        for &frame in frames {
            if !self.push(frame) {
                return false;
            }
        }
        true
    }

    /// Frames discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }
}

/// Consumer half of a bounded stereo frame channel.
#[derive(Debug)]
pub struct FrameRx {
    rx: Receiver<(f32, f32)>,
    dropped: Arc<AtomicCounter>,
}

impl FrameRx {
    #[inline]
    pub fn pop(&self) -> Option<(f32, f32)> {
        match self.rx.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Fill `buf` from the queue; returns how many frames were written.
    /// The remainder of `buf` is untouched.
    #[inline]
    pub fn drain_into(&self, buf: &mut [(f32, f32)]) -> usize {
        let mut n = 0;
        for slot in buf.iter_mut() {
            match self.pop() {
                Some(frame) => {
                    *slot = frame;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Frames the producer discarded because this queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }
}

/// Bounded stereo frame channel with drop accounting.
pub fn frame_channel(capacity: usize) -> (FrameTx, FrameRx) {
    let (tx, rx) = bounded(capacity);
    let dropped = Arc::new(AtomicCounter::new(0));
    (
        FrameTx {
            tx,
            dropped: dropped.clone(),
        },
        FrameRx { rx, dropped },
    )
}

/// Whether audio from `src` must cross a queue to reach `dst`.
#[inline]
pub fn needs_bridge(src: ContextId, dst: ContextId) -> bool {
    src != dst
}

/// The sink-side view of a source connection.
///
/// Construction sites check [`needs_bridge`] and build the matching
/// variant, so a reader of the graph always sees whether a hop crosses
/// clock domains.
#[derive(Debug)]
pub enum AudioLink {
    /// Same context: the renderer routes in-pass, no queue.
    Direct,
    /// Another clock domain: frames arrive through a bounded queue whose
    /// producer half lives in the source's callback.
    Bridged(FrameRx),
}

impl AudioLink {
    pub fn is_direct(&self) -> bool {
        matches!(self, AudioLink::Direct)
    }

    /// Pull one frame from a bridged link; `Direct` yields nothing here
    /// because the renderer mixes it in-pass.
    #[inline]
    pub fn pop(&self) -> Option<(f32, f32)> {
        match self {
            AudioLink::Direct => None,
            AudioLink::Bridged(rx) => rx.pop(),
        }
    }
}
