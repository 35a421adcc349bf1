//! Cast delivery for the looping station.
//!
//! The master mix is tapped into a lock-free ring, drained by a
//! background pump that packs fixed-size PCM chunks ([`FramePacker`])
//! and pushes them over an [`IpcSink`]. On top of the batched path,
//! [`NegotiatedSession`] runs a minimal offer/answer exchange with
//! forced stereo encoding parameters and watches the sink's byte
//! counter for a connected-but-silent link.
//!
//! ```ignore
//! use ringbuf::{traits::Split, HeapRb};
//! use segno_cast::{CastPipeline, ChannelSink, PcmFormat};
//!
//! let (producer, tap) = HeapRb::<(f32, f32)>::new(48_000).split();
//! let (sink, events) = ChannelSink::new();
//! let mut pipeline = CastPipeline::new(sink, PcmFormat::Int24, 48_000);
//! pipeline.start_batched(tap)?;
//! // ...audio callback pushes into `producer`, `events` receives chunks.
//! pipeline.stop();
//! # Ok::<(), segno_cast::Error>(())
//! ```

pub mod error;
pub use error::{Error, Result};

mod batch;
mod frames;
mod ipc;
mod pipeline;
mod session;

pub use batch::{BatchedCaster, DriftCompensator, BACKLOG_LIMIT_FRAMES};
pub use frames::{
    decode_chunk, CastChunk, FramePacker, PcmFormat, CAST_FRAME_SAMPLES, CAST_HEADROOM_DB,
};
pub use ipc::{ChannelSink, IpcSink, SinkEvent};
pub use pipeline::{CastMode, CastPipeline};
pub use session::{
    munge_session_description, NegotiatedSession, SessionHealth, SessionPhase, SignalMessage,
    FORCED_PARAMS, OFFER_WAIT_LIMIT, OFFER_WAIT_STEP,
};
