use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IconError>;

/// Why a single resolution stage produced nothing.
///
/// These never cross the resolver boundary: the chain logs them and moves
/// on to the next stage.
#[derive(Error, Debug)]
pub enum IconError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("decode failure: {0}")]
    DecodeFailure(String),

    #[error("platform unavailable: {0}")]
    PlatformUnavailable(String),

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl IconError {
    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        IconError::DecodeFailure(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        IconError::NotFound(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        IconError::UnsupportedFormat(msg.into())
    }
}

impl From<reqwest::Error> for IconError {
    fn from(e: reqwest::Error) -> Self {
        IconError::NetworkFailure(e.to_string())
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for IconError {
    fn from(e: windows::core::Error) -> Self {
        IconError::PlatformUnavailable(e.to_string())
    }
}
