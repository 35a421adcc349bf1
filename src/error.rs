//! Station-level error type.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate
//! boundaries; the non-wrapping variants are the station's own.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] segno_core::Error),

    #[error(transparent)]
    Capture(#[from] segno_capture::Error),

    #[error(transparent)]
    Track(#[from] segno_track::Error),

    #[error(transparent)]
    Sampler(#[from] segno_sampler::Error),

    #[error(transparent)]
    Cast(#[from] segno_cast::Error),

    #[error("No such track: {0}")]
    NoSuchTrack(usize),

    #[error("Track limit reached ({0})")]
    TrackLimit(usize),

    #[error("Master recording already running")]
    MasterRecordingBusy,

    #[error("No input device available for recording")]
    NoInputDevice,
}

pub type Result<T> = std::result::Result<T, Error>;
