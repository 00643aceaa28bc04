//! Error types for lane synchronization.

use thiserror::Error;

/// Result type for lane-registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the remote lane registry or input validation.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("registry returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The registry answered with `status: false`.
    #[error("registry rejected {method}: {message}")]
    Api { method: String, message: String },

    /// Response body could not be decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A lane id, address, or key failed validation.
    #[error("invalid input: {0}")]
    Invalid(String),
}
