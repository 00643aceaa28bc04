//! Error types for cloud connections.

use thiserror::Error;

/// Result type for cloud connection operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that end one cloud session. None of them are fatal to the lane;
/// the connection reconnects after a backoff delay.
#[derive(Error, Debug)]
pub enum Error {
    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
