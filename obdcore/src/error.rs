//! Error taxonomy. Connection failures surface as `ConnectionState::Failed`
//! rather than as returned errors; everything here is for collaborators.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the transport collaborator.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// The device or adapter rejected or dropped the connection.
    #[error("device error: {0}")]
    Device(String),

    /// The acquisition stream itself failed mid-flight.
    #[error("stream error: {0}")]
    Stream(String),

    #[error("diagnostic scan failed: {0}")]
    Scan(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from the key-value persistence collaborator. These never block a
/// state mutation; callers log them and keep the in-memory state.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialize failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
