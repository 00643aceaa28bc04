//! Client for payment terminals that speak the framed binary device protocol.
//!
//! - [`frame`]: frame codec (header, JSON payload, CRC-32 trailer)
//! - [`DeviceChannel`]: one blocking TCP connection with ACK/NACK and retry
//! - [`DeviceGatewayCaller`]: one sale exchange, blocking or async
//!
//! # Example
//!
//! ```no_run
//! use rust_decimal::Decimal;
//! use termgate_devproto::{DeviceGatewayCaller, DeviceRequest};
//!
//! let caller = DeviceGatewayCaller::default();
//! let amount = Decimal::new(1250, 2);
//! let request = DeviceRequest::new("10.0.0.5", 6000, "merchant-key", amount, "credit");
//! let result = caller.submit(&request);
//! if result.success {
//!     println!("{}", result.response.unwrap_or_default());
//! }
//! ```

mod caller;
mod channel;
mod error;
pub mod frame;

pub use caller::{
    CallerConfig, DEFAULT_POLL_INTERVAL, DEFAULT_RESPONSE_TIMEOUT, DeviceCallResult,
    DeviceGatewayCaller, DeviceRequest,
};
pub use channel::{ChannelState, DEFAULT_IO_TIMEOUT, DEFAULT_MAX_RETRIES, DeviceChannel};
pub use error::{Error, Result};
pub use frame::{DeviceFrame, MessageType, PROTOCOL_VERSION};
