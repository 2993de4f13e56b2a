//! Error types for FocusUp

use thiserror::Error;

/// Result type alias for FocusUp operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in FocusUp
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio processing error (codec, resampling, stream)
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone or speaker could not be opened
    #[error("device access error: {0}")]
    DeviceAccess(String),

    /// Invalid or missing credential
    #[error("auth error: {0}")]
    Auth(String),

    /// Network-layer failure (unreachable, aborted, reset)
    #[error("network error: {0}")]
    Network(String),

    /// Remote endpoint sent something we could not understand
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Tool invocation could not be executed
    #[error("tool error: {0}")]
    Tool(String),

    /// Task store error
    #[error("task store error: {0}")]
    Store(String),

    /// Task persistence error
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Session lifecycle error
    #[error("session error: {0}")]
    Session(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WebSocket transport error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
