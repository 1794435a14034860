//! Error types for dictd

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for dictd operations
pub type Result<T> = std::result::Result<T, DictError>;

/// Custom error types for dictd
#[derive(Error, Debug)]
pub enum DictError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Read timed out after {0:?}")]
    Timeout(Duration),
}

impl From<nom::Err<nom::error::Error<&str>>> for DictError {
    fn from(err: nom::Err<nom::error::Error<&str>>) -> Self {
        DictError::Protocol(format!("Parse error: {:?}", err))
    }
}
