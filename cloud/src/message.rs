//! Cloud wire messages.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use termgate_store::LaneConfig;

use crate::legacy::LegacySaleResponse;

/// The only inbound action the gateway acts on.
pub const ACTION_CHARGE: &str = "charge";

/// Outcome message for instructions the gateway cannot handle.
pub const UNSUPPORTED: &str = "unsupported";

/// Kind of an outbound control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlKind {
    Auth,
    Heartbeat,
}

/// AUTH and HEARTBEAT messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "Type")]
    pub kind: ControlKind,
    #[serde(rename = "ApiKey")]
    pub api_key: String,
    #[serde(rename = "LaneId")]
    pub lane_id: String,
}

impl ControlMessage {
    pub fn auth(lane: &LaneConfig) -> Self {
        Self::new(ControlKind::Auth, lane)
    }

    pub fn heartbeat(lane: &LaneConfig) -> Self {
        Self::new(ControlKind::Heartbeat, lane)
    }

    fn new(kind: ControlKind, lane: &LaneConfig) -> Self {
        Self {
            kind,
            api_key: lane.access_key.clone(),
            lane_id: lane.lane_id.clone(),
        }
    }
}

/// Terminal family a lane's hardware belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFamily {
    /// Driven through the vendor SDK.
    Legacy,
    /// Speaks the framed binary device protocol.
    ProtocolX,
}

impl DeviceFamily {
    /// Parses `terminal_type`. An absent value means the legacy family.
    pub fn parse(terminal_type: Option<&str>) -> Option<Self> {
        let Some(value) = terminal_type.map(str::trim).filter(|v| !v.is_empty()) else {
            return Some(DeviceFamily::Legacy);
        };
        match value.to_ascii_uppercase().as_str() {
            "PAX" | "LEGACY" => Some(DeviceFamily::Legacy),
            "TPP" | "PROTOCOL_X" => Some(DeviceFamily::ProtocolX),
            _ => None,
        }
    }
}

/// An instruction as it arrives from the cloud.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundCharge {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub amount: Decimal,
    #[serde(rename = "laneId")]
    pub lane_id: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub terminal_payment_type: String,
    #[serde(default)]
    pub terminal_type: Option<String>,
}

impl InboundCharge {
    /// Returns the charge to dispatch, or `None` when the action or device
    /// family is not supported.
    pub fn instruction(&self) -> Option<ChargeInstruction> {
        if self.action != ACTION_CHARGE {
            return None;
        }
        let device_family = DeviceFamily::parse(self.terminal_type.as_deref())?;
        Some(ChargeInstruction {
            request_id: self.request_id.clone(),
            amount: self.amount,
            lane_id: self.lane_id.clone(),
            action: self.action.clone(),
            payment_type: self.terminal_payment_type.clone(),
            device_family,
        })
    }
}

/// A validated charge, consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeInstruction {
    pub request_id: String,
    pub amount: Decimal,
    pub lane_id: String,
    pub action: String,
    pub payment_type: String,
    pub device_family: DeviceFamily,
}

/// Terminal result attached to an outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChargeDetails {
    /// Response body from a protocol-X terminal; a JSON string if the body
    /// was not JSON.
    ProtocolX(serde_json::Value),
    /// Result reported by a legacy terminal.
    Legacy(LegacySaleResponse),
}

/// Result sent back to the cloud for one instruction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeOutcome {
    pub status: bool,
    pub message: String,
    pub details: Option<ChargeDetails>,
    pub request_id: String,
    pub api_key: String,
    pub lane_id: String,
}

impl ChargeOutcome {
    pub fn success(lane: &LaneConfig, request_id: &str, details: ChargeDetails) -> Self {
        Self {
            status: true,
            message: String::new(),
            details: Some(details),
            request_id: request_id.to_string(),
            api_key: lane.access_key.clone(),
            lane_id: lane.lane_id.clone(),
        }
    }

    pub fn failure(lane: &LaneConfig, request_id: &str, message: impl Into<String>) -> Self {
        Self {
            status: false,
            message: message.into(),
            details: None,
            request_id: request_id.to_string(),
            api_key: lane.access_key.clone(),
            lane_id: lane.lane_id.clone(),
        }
    }

    pub fn unsupported(lane: &LaneConfig, request_id: &str) -> Self {
        Self::failure(lane, request_id, UNSUPPORTED)
    }
}
