//! Error types for the device protocol.

use thiserror::Error;

/// Result type for device protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a terminal.
#[derive(Error, Debug)]
pub enum Error {
    /// The host address was empty.
    #[error("invalid host: {0:?}")]
    InvalidHost(String),

    /// The terminal could not be reached.
    #[error("unable to connect to {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// An operation needed an open socket but the channel has none.
    #[error("channel is not connected")]
    NotConnected,

    /// The terminal closed the socket.
    #[error("connection closed by terminal")]
    ConnectionClosed,

    /// Socket-level I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame carried a protocol version other than the supported one.
    #[error("unsupported protocol version: expected {expected:#04x}, received {received:#04x}")]
    UnsupportedVersion { expected: u8, received: u8 },

    /// Frame checksum did not match its payload.
    #[error("checksum mismatch: expected {expected:#010x}, received {received:#018x}")]
    Integrity { expected: u32, received: u64 },

    /// Frame carried an unknown message type byte.
    #[error("unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Declared payload length exceeds the accepted maximum.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// The terminal refused a frame on every attempt.
    #[error("frame rejected after {attempts} attempts")]
    Rejected { attempts: u32 },

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true for a frame that was read in full but must be answered
    /// with NACK and dropped.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedVersion { .. }
                | Error::Integrity { .. }
                | Error::UnknownMessageType(_)
        )
    }

    /// Returns true for errors about the frame format rather than the link.
    pub fn is_protocol(&self) -> bool {
        self.is_rejection() || matches!(self, Error::FrameTooLarge(_))
    }
}
