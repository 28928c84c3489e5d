//! Cache error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("No conversation is open")]
    NotOpen,

    #[error("Live stream error: {0}")]
    Live(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
