//! Seam for the legacy terminal family driven through a vendor SDK.
//!
//! The gateway only needs "submit a sale amount to the terminal at this
//! address and obtain a result or error". Drivers implement
//! [`LegacyTerminal`]; the SDK internals live outside this crate.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// TCP port legacy terminals listen on.
pub const LEGACY_PORT: u16 = 10009;

/// Tender type understood by legacy terminals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMethod {
    Credit,
    Debit,
    Reference,
    Ebt,
    Cash,
    Ach,
    Gift,
    Other,
}

impl PaymentMethod {
    /// Maps a cloud payment type. Unknown types fall back to credit.
    pub fn from_payment_type(payment_type: &str) -> Self {
        match payment_type.trim().to_ascii_uppercase().as_str() {
            "DEBIT" => PaymentMethod::Debit,
            "REFERENCE" => PaymentMethod::Reference,
            "EBT" => PaymentMethod::Ebt,
            "CASH" => PaymentMethod::Cash,
            "ACH" => PaymentMethod::Ach,
            "GIFT" => PaymentMethod::Gift,
            "OTHER" => PaymentMethod::Other,
            _ => PaymentMethod::Credit,
        }
    }
}

/// A sale for a legacy terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacySale {
    pub ip_address: String,
    pub port: u16,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    /// Lets the terminal accept a repeat of an identical sale.
    pub allow_duplicates: bool,
    /// Cloud request id, echoed as the terminal's reference number.
    pub reference: String,
}

/// What a legacy terminal reports for a sale.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LegacySaleResponse {
    pub result_code: String,
    pub result_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_reference: Option<String>,
    #[serde(
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub approved_amount: Option<Decimal>,
}

/// Errors a legacy driver can report.
#[derive(Error, Debug)]
pub enum LegacyError {
    #[error("legacy terminal driver not configured")]
    NotConfigured,

    #[error("terminal error: {0}")]
    Terminal(String),
}

/// Driver for the legacy terminal family.
#[async_trait]
pub trait LegacyTerminal: Send + Sync {
    async fn sale(&self, sale: LegacySale) -> Result<LegacySaleResponse, LegacyError>;
}

/// Default driver used when no vendor SDK is linked in.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredLegacyTerminal;

#[async_trait]
impl LegacyTerminal for UnconfiguredLegacyTerminal {
    async fn sale(&self, _sale: LegacySale) -> Result<LegacySaleResponse, LegacyError> {
        Err(LegacyError::NotConfigured)
    }
}
