//! HTTP client for a tokenized-checkout JSON API
//!
//! Endpoints (relative to `gateway.base_url`):
//! - `POST /checkout/token/grant`: exchange app credentials for an id token
//! - `POST /checkout/create`: create a payment (intent `authorization`)
//! - `POST /checkout/execute`: execute (capture) a created payment
//! - `POST /checkout/payment/status`: query a payment
//!
//! The granted id token is cached until shortly before it expires.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::gateway::{
    CreatePayment, GatewayError, PaymentCreated, PaymentExecuted, PaymentGateway, PaymentState,
};
use crate::config::GatewayConfig;

/// Tokenized checkout mode
const CHECKOUT_MODE: &str = "0011";

/// Re-grant this long before the token's stated expiry
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct GrantRequest<'a> {
    app_key: &'a str,
    app_secret: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GrantResponse {
    #[serde(rename = "statusCode")]
    status_code: Option<String>,
    #[serde(rename = "statusMessage")]
    status_message: Option<String>,
    id_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest<'a> {
    mode: &'static str,
    payer_reference: &'a str,
    #[serde(rename = "callbackURL")]
    callback_url: &'a str,
    amount: String,
    currency: &'a str,
    intent: &'static str,
    merchant_invoice_number: &'a str,
}

#[derive(Debug, Serialize)]
struct PaymentRef<'a> {
    #[serde(rename = "paymentID")]
    payment_id: &'a str,
}

/// Shared shape of create / execute / status replies.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CheckoutResponse {
    #[serde(rename = "paymentID")]
    payment_id: String,
    #[serde(rename = "trxID")]
    trx_id: String,
    transaction_status: String,
    amount: String,
    status_code: String,
    status_message: String,
}

#[derive(Debug, Clone)]
struct GrantedToken {
    id_token: String,
    refresh_at: Instant,
}

pub struct HttpGateway {
    config: GatewayConfig,
    client: reqwest::Client,
    token: Mutex<Option<GrantedToken>>,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        info!(base_url = %config.base_url, "Initializing checkout gateway client");

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::new("Failed to create HTTP client", e.to_string()))?;

        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Cached id token, granting a new one when absent or near expiry.
    async fn id_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| Instant::now() < t.refresh_at) {
            return Ok(token.id_token.clone());
        }

        let granted = self.grant_token().await?;
        let id_token = granted.id_token.clone();
        *cached = Some(granted);
        Ok(id_token)
    }

    async fn grant_token(&self) -> Result<GrantedToken, GatewayError> {
        let response = self
            .client
            .post(self.url("/checkout/token/grant"))
            .header("Accept", "application/json")
            .header("username", &self.config.username)
            .header("password", &self.config.password)
            .json(&GrantRequest {
                app_key: &self.config.app_key,
                app_secret: &self.config.app_secret,
            })
            .send()
            .await
            .map_err(|e| GatewayError::new("Token grant request failed", e.to_string()))?;

        let body: GrantResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::new("Failed to parse token grant response", e.to_string()))?;

        let id_token = body.id_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            GatewayError::new(
                "Token grant rejected by gateway",
                format!(
                    "status {}: {}",
                    body.status_code.as_deref().unwrap_or("?"),
                    body.status_message.as_deref().unwrap_or("no id_token in response")
                ),
            )
        })?;

        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(3600));
        debug!(expires_in_secs = lifetime.as_secs(), "Gateway token granted");
        Ok(GrantedToken {
            id_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN),
        })
    }

    async fn post_checkout<B: Serialize>(
        &self,
        path: &str,
        token: &str,
        body: &B,
    ) -> Result<CheckoutResponse, GatewayError> {
        let response = self
            .client
            .post(self.url(path))
            .header("Accept", "application/json")
            .header("authorization", token)
            .header("x-app-key", &self.config.app_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::new(format!("Request to {path} failed"), e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::new(
                format!("Gateway returned HTTP {}", status.as_u16()),
                path.to_string(),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::new(format!("Failed to parse {path} response"), e.to_string()))
    }

    fn create_body<'a>(&'a self, request: &'a CreatePayment) -> CreateRequest<'a> {
        CreateRequest {
            mode: CHECKOUT_MODE,
            payer_reference: &request.payer_ref,
            callback_url: &self.config.callback_url,
            amount: format!("{:.2}", request.amount),
            currency: &self.config.currency,
            intent: request.intent.as_str(),
            merchant_invoice_number: &request.invoice_ref,
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    fn name(&self) -> &'static str {
        "checkout-http"
    }

    async fn create_payment(&self, request: &CreatePayment) -> Result<PaymentCreated, GatewayError> {
        let token = self.id_token().await?;
        let body = self.create_body(request);
        let reply = self.post_checkout("/checkout/create", &token, &body).await?;

        Ok(PaymentCreated {
            payment_id: reply.payment_id,
            trx_id: reply.trx_id,
            status_code: reply.status_code,
            status_message: reply.status_message,
            auth_token: token,
        })
    }

    async fn execute_payment(
        &self,
        auth_token: &str,
        payment_id: &str,
    ) -> Result<PaymentExecuted, GatewayError> {
        let reply = self
            .post_checkout("/checkout/execute", auth_token, &PaymentRef { payment_id })
            .await?;

        Ok(PaymentExecuted {
            payment_id: reply.payment_id,
            trx_id: reply.trx_id,
            status_code: reply.status_code,
            status_message: reply.status_message,
        })
    }

    async fn query_payment(
        &self,
        auth_token: &str,
        payment_id: &str,
    ) -> Result<PaymentState, GatewayError> {
        let reply = self
            .post_checkout("/checkout/payment/status", auth_token, &PaymentRef { payment_id })
            .await?;

        Ok(PaymentState {
            payment_id: reply.payment_id,
            trx_id: reply.trx_id,
            transaction_status: reply.transaction_status,
            amount: reply.amount.trim().parse::<Decimal>().ok(),
            status_code: reply.status_code,
            status_message: reply.status_message,
        })
    }
}
