//! Core runtime for the segno looping station.
//!
//! # Primary API
//!
//! - [`AudioContext`]: rendering context (live cpal stream or offline pump)
//! - [`MasterBus`] / [`MasterSection`]: volume, limiter, meters
//! - [`LfoBank`]: the two global LFOs
//! - [`RenderWatchdog`]: clock-progress stall detection
//! - [`frame_channel`] / [`AudioLink`]: audio across clock domains
//!
//! # Example
//!
//! ```ignore
//! use segno_core::{AudioContext, StationConfig, Silence};
//!
//! let ctx = AudioContext::offline(&StationConfig::default(), Box::new(Silence))?;
//! let frames = ctx.pump(512)?;
//! ```

pub mod error;
pub use error::{Error, Result};

mod config;
pub use config::StationConfig;

pub mod lockfree;
pub use lockfree::{AtomicCounter, AtomicFlag, AtomicLevel, AtomicSeconds, StateCell};

mod clock;
pub use clock::SampleClock;

mod render;
pub use render::{BlockCtx, Render, Silence};

mod context;
pub use context::{AudioContext, ContextShared};

pub mod bridge;
pub use bridge::{frame_channel, needs_bridge, AudioLink, ContextId, FrameRx, FrameTx};

mod master;
pub use master::{
    db_to_linear, linear_to_db, MasterBus, MasterSection, LIMITER_THRESHOLD_DB, MASTER_DB_MAX,
    MASTER_DB_MIN,
};

mod lfo;
pub use lfo::{LfoBank, LfoBankRt, LfoShared, LFO_COUNT, LFO_MAX_HZ, LFO_MIN_HZ};

mod meter;
pub use meter::{Levels, Scope, StereoMeter};

mod watchdog;
pub use watchdog::{RenderWatchdog, CHECK_INTERVAL_SECS, PROGRESS_FLOOR};
