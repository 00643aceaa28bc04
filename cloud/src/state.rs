//! Per-lane connection state.

use std::fmt;

/// Lifecycle of one lane's cloud connection.
///
/// ```text
/// Disconnected -> Connecting -> Authenticated -> Active
///      ^                                          |
///      +------------- unsolicited close ----------+
///
/// any state -- close() --> Closing
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticated,
    Active,
    Closing,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Active => "active",
            ConnectionState::Closing => "closing",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Active)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
