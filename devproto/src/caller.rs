//! One sale exchange with a custom-protocol terminal.

use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::channel::{DEFAULT_IO_TIMEOUT, DEFAULT_MAX_RETRIES, DeviceChannel};
use crate::error::Error;

/// Default time allowed for the terminal to produce its result.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(240);

/// Default granularity of response polling and cancellation checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Tuning for [`DeviceGatewayCaller`].
#[derive(Debug, Clone)]
pub struct CallerConfig {
    /// Socket read/write timeout, also the per-attempt ACK wait.
    pub io_timeout: Duration,
    /// Response poll and cancellation check interval.
    pub poll_interval: Duration,
    /// Send attempts per frame.
    pub max_retries: u32,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            io_timeout: DEFAULT_IO_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// A sale to submit to one terminal.
#[derive(Debug, Clone)]
pub struct DeviceRequest {
    pub host: String,
    pub port: u16,
    pub merchant_key: String,
    pub amount: Decimal,
    pub payment_type: String,
    pub timeout: Duration,
}

impl DeviceRequest {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        merchant_key: impl Into<String>,
        amount: Decimal,
        payment_type: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            merchant_key: merchant_key.into(),
            amount,
            payment_type: payment_type.into(),
            timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of one exchange. Exactly one of `success`, `was_cancelled`,
/// `timed_out` is set, or none of them for an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceCallResult {
    pub success: bool,
    pub response: Option<String>,
    pub error_message: Option<String>,
    pub was_cancelled: bool,
    pub timed_out: bool,
}

impl DeviceCallResult {
    fn completed(response: String) -> Self {
        Self {
            success: true,
            response: Some(response),
            ..Default::default()
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    fn cancelled() -> Self {
        Self {
            was_cancelled: true,
            error_message: Some("Payment process was cancelled".to_string()),
            ..Default::default()
        }
    }

    fn timed_out(timeout: Duration) -> Self {
        Self {
            timed_out: true,
            error_message: Some(format!(
                "Payment timed out after {} seconds",
                timeout.as_secs()
            )),
            ..Default::default()
        }
    }
}

/// Sale request payload as the terminal firmware expects it.
#[derive(Serialize)]
struct SaleMessage<'a> {
    #[serde(rename = "MerchantKey")]
    merchant_key: &'a str,
    #[serde(rename = "Amount", with = "rust_decimal::serde::float")]
    amount: Decimal,
    #[serde(rename = "PaymentType")]
    payment_type: &'a str,
}

/// Runs request/response exchanges against custom-protocol terminals.
///
/// Every exchange opens its own [`DeviceChannel`] and closes it on every
/// exit path.
#[derive(Debug, Clone, Default)]
pub struct DeviceGatewayCaller {
    config: CallerConfig,
}

impl DeviceGatewayCaller {
    pub fn new(config: CallerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CallerConfig {
        &self.config
    }

    /// Submits a sale and blocks until the terminal answers or the request
    /// timeout elapses.
    pub fn submit(&self, request: &DeviceRequest) -> DeviceCallResult {
        self.submit_with_cancel(request, &CancellationToken::new())
    }

    /// Like [`submit`](Self::submit), stopping early once `cancel` fires.
    pub fn submit_with_cancel(
        &self,
        request: &DeviceRequest,
        cancel: &CancellationToken,
    ) -> DeviceCallResult {
        if request.host.trim().is_empty() {
            return DeviceCallResult::failed("Host address cannot be empty");
        }

        let started = Instant::now();
        let mut channel = DeviceChannel::new(request.host.as_str(), request.port)
            .with_io_timeout(self.config.io_timeout);
        let result = self.exchange(&mut channel, request, cancel);
        channel.close();

        info!(
            addr = %channel.addr(),
            success = result.success,
            cancelled = result.was_cancelled,
            timed_out = result.timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "terminal exchange finished"
        );
        result
    }

    /// Runs the blocking exchange on the blocking thread pool.
    ///
    /// Cancelling `cancel` stops the exchange within one poll interval.
    pub async fn submit_async(
        &self,
        request: DeviceRequest,
        cancel: CancellationToken,
    ) -> DeviceCallResult {
        let caller = self.clone();
        let token = cancel.child_token();
        match tokio::task::spawn_blocking(move || caller.submit_with_cancel(&request, &token)).await
        {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "terminal exchange task failed");
                DeviceCallResult::failed(format!("Unexpected error: {}", e))
            }
        }
    }

    fn exchange(
        &self,
        channel: &mut DeviceChannel,
        request: &DeviceRequest,
        cancel: &CancellationToken,
    ) -> DeviceCallResult {
        if let Err(e) = channel.connect() {
            warn!(error = %e, "terminal unreachable");
            return DeviceCallResult::failed(format!(
                "Unable to connect to device at {}:{}",
                request.host, request.port
            ));
        }
        if cancel.is_cancelled() {
            return DeviceCallResult::cancelled();
        }

        let payload = match serde_json::to_vec(&SaleMessage {
            merchant_key: &request.merchant_key,
            amount: request.amount,
            payment_type: &request.payment_type,
        }) {
            Ok(payload) => payload,
            Err(e) => return DeviceCallResult::failed(describe(&Error::Json(e))),
        };

        if let Err(e) = channel.send_reliable(&payload, self.config.max_retries) {
            warn!(error = %e, "sale request not delivered");
            return DeviceCallResult::failed("Failed to send message to terminal");
        }

        match channel.poll_for_response(request.timeout, self.config.poll_interval, cancel) {
            Ok(Some(bytes)) => {
                DeviceCallResult::completed(String::from_utf8_lossy(&bytes).into_owned())
            }
            Ok(None) if cancel.is_cancelled() => DeviceCallResult::cancelled(),
            Ok(None) => DeviceCallResult::timed_out(request.timeout),
            Err(e) => {
                warn!(error = %e, "terminal response failed");
                DeviceCallResult::failed(describe(&e))
            }
        }
    }
}

fn describe(err: &Error) -> String {
    match err {
        e if e.is_protocol() => format!("Protocol error: {}", e),
        Error::InvalidHost(_)
        | Error::Connection { .. }
        | Error::NotConnected
        | Error::ConnectionClosed
        | Error::Io(_) => format!("Connection error: {}", err),
        Error::Rejected { .. } => format!("Device error: {}", err),
        _ => format!("Unexpected error: {}", err),
    }
}
