//! Error types for segno-capture.

use thiserror::Error;

/// Error type for capture operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("No usable input for '{0}': every negotiation tier failed")]
    NoUsableInput(String),

    #[error("Unsupported input sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to enumerate devices")]
    Devices(#[from] cpal::DevicesError),

    #[error("Failed to get device name")]
    DeviceName(#[from] cpal::DeviceNameError),

    #[error("Device has no default config")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("Failed to query supported configs")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("Failed to build input stream")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Failed to start input stream")]
    PlayStream(#[from] cpal::PlayStreamError),
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;
