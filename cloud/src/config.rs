//! Cloud connection settings.

use std::time::Duration;

/// Default cloud endpoint.
pub const DEFAULT_CLOUD_URL: &str = "wss://sandbox.tripleplaypay.com/pax";

/// Interval between heartbeats while a lane is active.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// First reconnect delay after a lost connection.
pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_millis(1000);

/// Reconnect delay ceiling.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_millis(60_000);

/// Settings shared by every lane connection.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// WebSocket URL of the cloud service.
    pub url: String,
    /// Heartbeat period.
    pub heartbeat_interval: Duration,
    /// Initial reconnect delay.
    pub backoff_initial: Duration,
    /// Maximum reconnect delay.
    pub backoff_max: Duration,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CLOUD_URL.to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl CloudConfig {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}
