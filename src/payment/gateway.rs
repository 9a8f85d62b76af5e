//! Payment gateway seam
//!
//! The coordinator drives a two-phase flow through this trait: a payment is
//! created with intent `authorization` (funds frozen), then executed later to
//! capture. Implementations report transport and protocol failures as
//! [`GatewayError`]; a well-formed response with a non-success status code is
//! returned as `Ok` and judged by the caller.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status code the gateway returns for a successful call.
pub const SUCCESS_STATUS: &str = "0000";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}: {details}")]
pub struct GatewayError {
    pub message: String,
    pub details: String,
}

impl GatewayError {
    pub fn new(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: details.into(),
        }
    }

    /// A well-formed reply whose status code is not [`SUCCESS_STATUS`].
    pub fn rejected(what: &str, status_code: &str, status_message: &str) -> Self {
        Self::new(
            format!("{what} rejected by gateway"),
            format!("status {status_code}: {status_message}"),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentIntent {
    /// Freeze funds; capture later
    Authorization,
}

impl PaymentIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentIntent::Authorization => "authorization",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePayment {
    pub amount: Decimal,
    /// Payer account reference (e.g. wallet number)
    pub payer_ref: String,
    /// Merchant-side invoice reference
    pub invoice_ref: String,
    pub intent: PaymentIntent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentCreated {
    pub payment_id: String,
    pub trx_id: String,
    pub status_code: String,
    pub status_message: String,
    /// Token the payment must later be executed with
    pub auth_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentExecuted {
    pub payment_id: String,
    pub trx_id: String,
    pub status_code: String,
    pub status_message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PaymentState {
    pub payment_id: String,
    pub trx_id: String,
    /// Gateway-side lifecycle label (e.g. `Authorized`, `Completed`)
    pub transaction_status: String,
    pub amount: Option<Decimal>,
    pub status_code: String,
    pub status_message: String,
}

macro_rules! success_check {
    ($($t:ty),*) => {$(
        impl $t {
            pub fn is_success(&self) -> bool {
                self.status_code == SUCCESS_STATUS
            }
        }
    )*};
}

success_check!(PaymentCreated, PaymentExecuted, PaymentState);

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Gateway name for logging
    fn name(&self) -> &'static str;

    async fn create_payment(&self, request: &CreatePayment) -> Result<PaymentCreated, GatewayError>;

    /// Execute (capture) a previously created payment.
    async fn execute_payment(
        &self,
        auth_token: &str,
        payment_id: &str,
    ) -> Result<PaymentExecuted, GatewayError>;

    async fn query_payment(
        &self,
        auth_token: &str,
        payment_id: &str,
    ) -> Result<PaymentState, GatewayError>;
}
