//! Client error types

use thiserror::Error;

/// Errors that can occur in the live feed client
///
/// None of these propagate out of the connection or batching loops; transport
/// and decode failures degrade to a retry or a log line. They surface only
/// from setup paths (configuration, runner) and subscriber callbacks.
#[derive(Error, Debug)]
pub enum LiveError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for live feed operations
pub type LiveResult<T> = std::result::Result<T, LiveError>;
