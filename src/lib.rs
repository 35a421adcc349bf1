//! # Segno - Live Looping Station Engine
//!
//! A multi-track looping station built from modular subsystems:
//!
//! - **segno-core** - Rendering context, master section, LFOs, watchdog
//! - **segno-capture** - Input device registry and shared capture streams
//! - **segno-track** - Track strips (transport, loop region, EQ, effect
//!   slots, LFO bindings, live input, sample recorder)
//! - **segno-sampler** - Twenty performance pads with choke groups and
//!   character profiles
//! - **segno-cast** - Chunked PCM delivery and negotiated stream sessions
//!
//! ## Quick Start
//!
//! ```ignore
//! use segno::prelude::*;
//!
//! let station = Station::builder()
//!     .sample_rate(48_000.0)
//!     .tracks(4)
//!     .build()?;
//!
//! // Loop a sample on track 0.
//! station.load_file_to_track(0, "bassline.wav")?;
//! station.track(0)?.set_loop(0.0, 4.0);
//! station.track(0)?.set_loop_enabled(true);
//! station.play_track(0)?;
//!
//! // Fire a pad.
//! station.assign_pad(0, "kick.wav")?;
//! station.trigger_pad(0, 1.0)?;
//! ```
//!
//! Tests and offline bounces use [`StationBuilder::build_offline`] and
//! pump the renderer by hand; nothing in the crate requires hardware
//! until a live station is built.

/// Re-export of segno-core for direct access.
pub use segno_core as core;

pub use segno_core::{
    db_to_linear,
    linear_to_db,
    // Lock-free primitives
    AtomicCounter,
    AtomicFlag,
    AtomicLevel,
    AtomicSeconds,
    // Rendering context
    AudioContext,
    BlockCtx,
    ContextId,
    Levels,
    LfoBank,
    MasterBus,
    Render,
    StateCell,
    StationConfig,
    StereoMeter,
};

// Capture subsystem
pub use segno_capture as capture;

pub use segno_capture::{
    classify_label, AudioDeviceInfo, ChannelMap, DeviceId, DeviceKind, DeviceRegistry,
    SharedStreamCache, Tier,
};

// Track strips
pub use segno_track as track;

pub use segno_track::{
    encode_wav_f32, encode_wav_i16, EffectRegistry, EqParams, LfoBinding, LoopRegion, ParamTarget,
    RecordedSample, RecorderState, SampleBuffer, SlotSpec, TrackChannel, TrackParams,
    TransportState,
};

// Performance pads
pub use segno_sampler as sampler;

pub use segno_sampler::{
    CharacterProfile, ChokeGroup, PadMode, SamplerEngine, VoiceRoute, PAD_COUNT, TRACK_PAD_BASE,
};

// Cast delivery
pub use segno_cast as cast;

pub use segno_cast::{
    decode_chunk, CastChunk, CastMode, ChannelSink, IpcSink, PcmFormat, SessionHealth,
    SessionPhase, SignalMessage, SinkEvent,
};

mod builder;
mod engine;
pub mod error;
mod render;

pub use builder::StationBuilder;
pub use engine::{MasterCaptureFormat, MasterTake, Station, MAX_TRACKS};
pub use error::{Error, Result};

/// Convenience prelude for common imports.
pub mod prelude {
    // Main engine
    pub use crate::{Station, StationBuilder};

    // Essential types
    pub use crate::{
        CastMode, DeviceId, LfoBinding, MasterCaptureFormat, PadMode, ParamTarget, SessionPhase,
        StationConfig, TransportState, VoiceRoute,
    };

    // Errors
    pub use crate::{Error, Result};
}
