//! Error types for segno-cast.

use thiserror::Error;

/// Error type for cast operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Cast sink rejected the push: {0}")]
    Sink(String),

    #[error("Bad signaling message: {0}")]
    Signaling(&'static str),

    #[error("Bad chunk payload: {0}")]
    Payload(#[from] base64::DecodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;
