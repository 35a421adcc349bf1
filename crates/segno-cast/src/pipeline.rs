//! Top-level cast pipeline: one sink, one optional pump, one optional
//! negotiated session.

use ringbuf::HeapCons;
use std::sync::Arc;

use crate::batch::BatchedCaster;
use crate::error::{Error, Result};
use crate::frames::PcmFormat;
use crate::ipc::IpcSink;
use crate::session::{NegotiatedSession, SessionHealth, SessionPhase};

/// Which delivery mode the pipeline is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastMode {
    /// Chunked PCM pushed straight to the sink.
    Batched,
    /// Batched delivery plus an offer/answer session on top.
    Negotiated,
}

/// Owns the cast state for one engine. Starting a mode tears down the
/// previous one, which also resets the chunk sequence.
pub struct CastPipeline {
    sink: Arc<dyn IpcSink>,
    format: PcmFormat,
    sample_rate: u32,
    batched: Option<BatchedCaster>,
    session: Option<NegotiatedSession>,
}

impl CastPipeline {
    pub fn new(sink: Arc<dyn IpcSink>, format: PcmFormat, sample_rate: u32) -> Self {
        Self {
            sink,
            format,
            sample_rate,
            batched: None,
            session: None,
        }
    }

    pub fn mode(&self) -> Option<CastMode> {
        if self.session.is_some() {
            Some(CastMode::Negotiated)
        } else if self.batched.is_some() {
            Some(CastMode::Batched)
        } else {
            None
        }
    }

    /// Start pumping chunks from `tap` to the sink.
    pub fn start_batched(&mut self, tap: HeapCons<(f32, f32)>) -> Result<()> {
        self.stop();
        self.batched = Some(BatchedCaster::start(
            tap,
            Arc::clone(&self.sink),
            self.format,
            self.sample_rate,
        )?);
        Ok(())
    }

    /// Start the pump and push an offer on the signaling channel.
    pub fn start_negotiated(&mut self, tap: HeapCons<(f32, f32)>) -> Result<()> {
        self.stop();
        self.batched = Some(BatchedCaster::start(
            tap,
            Arc::clone(&self.sink),
            self.format,
            self.sample_rate,
        )?);
        self.session = Some(NegotiatedSession::offer(Arc::clone(&self.sink))?);
        Ok(())
    }

    /// Forward a remote answer to the live session.
    pub fn handle_answer(&mut self, message: &str) -> Result<()> {
        match self.session.as_mut() {
            Some(session) => session.handle_answer(message),
            None => Err(Error::Signaling("no session waiting for an answer")),
        }
    }

    pub fn session_phase(&self) -> SessionPhase {
        self.session
            .as_ref()
            .map(NegotiatedSession::phase)
            .unwrap_or(SessionPhase::Idle)
    }

    pub fn session_health(&self) -> SessionHealth {
        self.session
            .as_ref()
            .map(NegotiatedSession::health)
            .unwrap_or(SessionHealth::Ok)
    }

    pub fn chunks_sent(&self) -> u64 {
        self.batched.as_ref().map_or(0, BatchedCaster::chunks_sent)
    }

    pub fn samples_shed(&self) -> u64 {
        self.batched.as_ref().map_or(0, BatchedCaster::samples_shed)
    }

    /// Stop whatever is running. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut caster) = self.batched.take() {
            caster.stop();
        }
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}
