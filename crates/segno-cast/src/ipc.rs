//! The sink seam between the cast pump and the host transport.

use crossbeam_channel::{unbounded, Receiver, Sender};
use segno_core::AtomicCounter;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::frames::CastChunk;

/// Where encoded audio and signaling go.
///
/// Implementations must not block: `push_chunk` runs on the pump thread
/// at frame cadence. Push errors are reported to the caller, which logs
/// and keeps pumping.
pub trait IpcSink: Send + Sync {
    /// Push one audio chunk.
    fn push_chunk(&self, chunk: &CastChunk) -> Result<()>;
    /// Push a signaling message (offers, answers, session control).
    fn push_signaling(&self, message: &str) -> Result<()>;
    /// Clients currently attached to the sink.
    fn client_count(&self) -> usize;
    /// Total payload bytes accepted since the sink was created.
    fn bytes_sent(&self) -> u64;
}

/// Everything a [`ChannelSink`] forwards.
#[derive(Debug, Clone)]
pub enum SinkEvent {
    Chunk(CastChunk),
    Signaling(String),
}

/// In-process sink backed by an unbounded channel. The receiving half
/// is the client: a UI thread, a local relay, or a test.
pub struct ChannelSink {
    tx: Sender<SinkEvent>,
    clients: AtomicUsize,
    bytes: AtomicCounter,
}

impl ChannelSink {
    /// Create the sink and its receiving half.
    pub fn new() -> (Arc<Self>, Receiver<SinkEvent>) {
        let (tx, rx) = unbounded();
        (
            Arc::new(Self {
                tx,
                clients: AtomicUsize::new(0),
                bytes: AtomicCounter::default(),
            }),
            rx,
        )
    }

    /// Record a client attaching or detaching.
    pub fn set_client_count(&self, clients: usize) {
        self.clients.store(clients, Ordering::Release);
    }
}

impl IpcSink for ChannelSink {
    fn push_chunk(&self, chunk: &CastChunk) -> Result<()> {
        self.tx
            .send(SinkEvent::Chunk(chunk.clone()))
            .map_err(|_| Error::Sink("channel client hung up".into()))?;
        self.bytes.add(chunk.payload.len() as u64);
        Ok(())
    }

    fn push_signaling(&self, message: &str) -> Result<()> {
        self.tx
            .send(SinkEvent::Signaling(message.to_string()))
            .map_err(|_| Error::Sink("channel client hung up".into()))
    }

    fn client_count(&self) -> usize {
        self.clients.load(Ordering::Acquire)
    }

    fn bytes_sent(&self) -> u64 {
        self.bytes.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::PcmFormat;

    fn chunk(payload: &str) -> CastChunk {
        CastChunk {
            seq: 0,
            format: PcmFormat::Float32,
            sample_rate: 48_000,
            frames: 0,
            payload: payload.to_string(),
        }
    }

    #[test]
    fn pushes_arrive_in_order_and_count_bytes() {
        let (sink, rx) = ChannelSink::new();
        sink.push_signaling("hello").unwrap();
        sink.push_chunk(&chunk("abcd")).unwrap();
        assert_eq!(sink.bytes_sent(), 4);

        assert!(matches!(rx.recv().unwrap(), SinkEvent::Signaling(s) if s == "hello"));
        assert!(matches!(rx.recv().unwrap(), SinkEvent::Chunk(c) if c.payload == "abcd"));
    }

    #[test]
    fn push_fails_once_the_client_hangs_up() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        assert!(sink.push_chunk(&chunk("abcd")).is_err());
        assert_eq!(sink.bytes_sent(), 0);
    }

    #[test]
    fn client_count_tracks_attachment() {
        let (sink, _rx) = ChannelSink::new();
        assert_eq!(sink.client_count(), 0);
        sink.set_client_count(2);
        assert_eq!(sink.client_count(), 2);
    }
}
