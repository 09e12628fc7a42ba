//! Error types for sonomix

use thiserror::Error;

/// Errors reported by the non-real-time surface of the crate.
///
/// Nothing inside the mixing path returns these: invalid handles, exhausted
/// pools and out-of-range parameters degrade silently so the audio callback
/// never has to unwind.
#[derive(Error, Debug)]
pub enum SonomixError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("Invalid sound asset: {0}")]
    InvalidAsset(String),
}

pub type Result<T> = std::result::Result<T, SonomixError>;
