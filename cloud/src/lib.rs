//! Cloud side of the terminal gateway.
//!
//! Every configured lane keeps one persistent WebSocket connection to the
//! cloud service. The connection authenticates, heartbeats, receives charge
//! instructions and answers each one with a [`ChargeOutcome`].
//!
//! - [`LaneConnection`]: one lane's connection, with reconnect and backoff
//! - [`ConnectionRegistry`]: lane id → connection map and aggregate status
//! - [`ChargeDispatcher`]: routes charges to protocol-X or legacy terminals
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use termgate_cloud::{
//!     ChargeDispatcher, CloudConfig, ConnectionRegistry, UnconfiguredLegacyTerminal,
//! };
//! use termgate_devproto::DeviceGatewayCaller;
//! use termgate_store::LaneConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let dispatcher = ChargeDispatcher::new(
//!         DeviceGatewayCaller::default(),
//!         Arc::new(UnconfiguredLegacyTerminal),
//!     );
//!     let registry = ConnectionRegistry::new(CloudConfig::default(), Arc::new(dispatcher));
//!
//!     let lanes = vec![LaneConfig::new("5", "10.0.0.5", "merchant-key")];
//!     registry.sync_connections(&lanes).await;
//!
//!     let mut status = registry.subscribe();
//!     while status.changed().await.is_ok() {
//!         println!("connected: {}", *status.borrow());
//!     }
//! }
//! ```

mod backoff;
mod config;
mod connection;
mod dispatch;
mod error;
pub mod legacy;
pub mod message;
mod registry;
mod state;

pub use backoff::ReconnectBackoff;
pub use config::{
    CloudConfig, DEFAULT_BACKOFF_INITIAL, DEFAULT_BACKOFF_MAX, DEFAULT_CLOUD_URL,
    DEFAULT_HEARTBEAT_INTERVAL,
};
pub use connection::{ConnectivityEvent, LaneConnection};
pub use dispatch::{ChargeDispatcher, DEFAULT_DEVICE_PORT, Dispatch};
pub use error::{Error, Result};
pub use legacy::{LegacyTerminal, UnconfiguredLegacyTerminal};
pub use message::{ChargeDetails, ChargeInstruction, ChargeOutcome, DeviceFamily};
pub use registry::{ConnectionRegistry, SyncSummary};
pub use state::ConnectionState;
