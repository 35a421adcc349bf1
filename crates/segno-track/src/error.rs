//! Error types for segno-track.

use thiserror::Error;

/// Error type for track operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Recorder busy: {0}")]
    RecorderBusy(&'static str),

    #[error("Track has no live input connected")]
    InputNotConnected,

    #[error("No such LFO: {0} (station has 2)")]
    NoSuchLfo(usize),

    #[error("Effect slot {0} out of range (0-6)")]
    SlotOutOfRange(usize),

    #[error("Sample has no audio channels")]
    EmptySample,

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Capture(#[from] segno_capture::Error),

    #[error(transparent)]
    Core(#[from] segno_core::Error),
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;
