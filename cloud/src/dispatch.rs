//! Routes a charge instruction to the right terminal family.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use termgate_devproto::{
    DEFAULT_RESPONSE_TIMEOUT, DeviceCallResult, DeviceGatewayCaller, DeviceRequest,
};
use termgate_store::LaneConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::legacy::{LEGACY_PORT, LegacySale, LegacyTerminal, PaymentMethod};
use crate::message::{ChargeDetails, ChargeInstruction, ChargeOutcome, DeviceFamily};

/// Default TCP port of protocol-X terminals.
pub const DEFAULT_DEVICE_PORT: u16 = 6000;

/// Executes one charge and produces its outcome.
///
/// Implementations report failures as an outcome with `status: false`.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(
        &self,
        lane: &LaneConfig,
        charge: ChargeInstruction,
        cancel: CancellationToken,
    ) -> ChargeOutcome;
}

/// Dispatcher backed by a [`DeviceGatewayCaller`] and a legacy driver.
pub struct ChargeDispatcher {
    caller: DeviceGatewayCaller,
    legacy: Arc<dyn LegacyTerminal>,
    device_port: u16,
    legacy_port: u16,
    device_timeout: Duration,
}

impl ChargeDispatcher {
    pub fn new(caller: DeviceGatewayCaller, legacy: Arc<dyn LegacyTerminal>) -> Self {
        Self {
            caller,
            legacy,
            device_port: DEFAULT_DEVICE_PORT,
            legacy_port: LEGACY_PORT,
            device_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    pub fn with_device_port(mut self, port: u16) -> Self {
        self.device_port = port;
        self
    }

    pub fn with_legacy_port(mut self, port: u16) -> Self {
        self.legacy_port = port;
        self
    }

    /// Time a protocol-X terminal has to produce its result.
    pub fn with_device_timeout(mut self, timeout: Duration) -> Self {
        self.device_timeout = timeout;
        self
    }

    async fn charge_protocol_x(
        &self,
        lane: &LaneConfig,
        charge: &ChargeInstruction,
        cancel: CancellationToken,
    ) -> ChargeOutcome {
        let request = DeviceRequest::new(
            lane.ip_address.as_str(),
            self.device_port,
            lane.access_key.as_str(),
            charge.amount,
            charge.payment_type.as_str(),
        )
        .with_timeout(self.device_timeout);

        let result = self.caller.submit_async(request, cancel).await;
        device_outcome(lane, &charge.request_id, result)
    }

    async fn charge_legacy(&self, lane: &LaneConfig, charge: &ChargeInstruction) -> ChargeOutcome {
        let sale = LegacySale {
            ip_address: lane.ip_address.clone(),
            port: self.legacy_port,
            amount: charge.amount,
            payment_method: PaymentMethod::from_payment_type(&charge.payment_type),
            allow_duplicates: true,
            reference: charge.request_id.clone(),
        };

        match self.legacy.sale(sale).await {
            Ok(response) => {
                ChargeOutcome::success(lane, &charge.request_id, ChargeDetails::Legacy(response))
            }
            Err(e) => {
                warn!(
                    lane_id = %lane.lane_id,
                    request_id = %charge.request_id,
                    error = %e,
                    "legacy sale failed"
                );
                ChargeOutcome::failure(lane, &charge.request_id, e.to_string())
            }
        }
    }
}

#[async_trait]
impl Dispatch for ChargeDispatcher {
    async fn dispatch(
        &self,
        lane: &LaneConfig,
        charge: ChargeInstruction,
        cancel: CancellationToken,
    ) -> ChargeOutcome {
        info!(
            lane_id = %lane.lane_id,
            request_id = %charge.request_id,
            family = ?charge.device_family,
            "dispatching charge"
        );
        match charge.device_family {
            DeviceFamily::ProtocolX => self.charge_protocol_x(lane, &charge, cancel).await,
            DeviceFamily::Legacy => self.charge_legacy(lane, &charge).await,
        }
    }
}

fn device_outcome(lane: &LaneConfig, request_id: &str, result: DeviceCallResult) -> ChargeOutcome {
    if let (true, Some(body)) = (result.success, result.response.as_deref()) {
        let details = serde_json::from_str(body)
            .unwrap_or_else(|_| serde_json::Value::String(body.to_string()));
        return ChargeOutcome::success(lane, request_id, ChargeDetails::ProtocolX(details));
    }
    let message = result
        .error_message
        .unwrap_or_else(|| "Device error: no response".to_string());
    ChargeOutcome::failure(lane, request_id, message)
}
