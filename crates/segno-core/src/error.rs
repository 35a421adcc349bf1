//! Error types for segno-core.

use thiserror::Error;

/// Error type for segno-core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("No output device available")]
    NoOutputDevice,

    #[error("Unsupported output sample format: {0}")]
    UnsupportedFormat(String),

    #[error("No such LFO: {0} (station has 2)")]
    NoSuchLfo(usize),

    #[error("Context has been closed")]
    ContextClosed,

    #[error("Operation requires an offline context")]
    NotOffline,

    #[error("Audio device not available")]
    DeviceNotAvailable(#[from] cpal::DefaultStreamConfigError),

    #[error("Failed to build audio stream")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Failed to play audio stream")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Failed to pause audio stream")]
    PauseStream(#[from] cpal::PauseStreamError),

    #[error("Failed to enumerate devices")]
    Devices(#[from] cpal::DevicesError),

    #[error("Failed to get device name")]
    DeviceName(#[from] cpal::DeviceNameError),
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;
