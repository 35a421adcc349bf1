//! Error types for segno-sampler.

use thiserror::Error;

/// Error type for sampler operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("No such pad: {0} (sampler has 20)")]
    NoSuchPad(usize),

    #[error("No such track for pad route: {0}")]
    NoSuchTrack(usize),

    #[error(transparent)]
    Track(#[from] segno_track::Error),
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;
