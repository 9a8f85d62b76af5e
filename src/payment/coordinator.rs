//! Payment Coordinator
//!
//! Drives the two-phase authorize/capture flow for escrow transactions.
//!
//! # Safety properties
//! - At most one `authorization`-phase row per transaction: inserts go
//!   through `create_unique` on `(transactionId, phase = authorization)`.
//! - Capture happens at most once: the row is promoted with a
//!   compare-and-set on `phase = authorization`, so a second capture finds
//!   no open authorization.
//! - A rejected or unreachable gateway leaves the table untouched.
//!
//! Store work runs on tokio's blocking pool (`spawn_blocking`); no store
//! lock is held while a gateway call is awaited.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

use super::gateway::{
    CreatePayment, GatewayError, PaymentExecuted, PaymentGateway, PaymentIntent, PaymentState,
};
use super::model::{PaymentAuthorization, PaymentPhase};
use crate::config::EscrowConfig;
use crate::core_types::{EscrowId, UserId};
use crate::entity::{self, Entity};
use crate::error::{EscrowError, ValidationError};
use crate::escrow::fee::{FeePolicy, seller_payout};
use crate::escrow::model::EscrowTransaction;
use crate::escrow::notice::{authorized_notice, captured_notices, send_all};
use crate::escrow::status::TransactionStatus;
use crate::notify::NotificationSink;
use crate::payment::gateway::SUCCESS_STATUS;
use crate::store::{Filter, RecordStore, StoreError, fields};
use crate::users::UserDirectory;

/// Result of a successful capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureReceipt {
    /// The promoted row (`phase = capture`)
    pub authorization: PaymentAuthorization,
    pub seller_payout: Decimal,
    pub gateway_txn_id: String,
}

#[derive(Clone)]
pub struct PaymentCoordinator {
    store: Arc<RecordStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationSink>,
    users: Arc<dyn UserDirectory>,
    fees: FeePolicy,
    auth_ttl: Duration,
}

impl PaymentCoordinator {
    pub fn new(
        store: Arc<RecordStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationSink>,
        users: Arc<dyn UserDirectory>,
        config: &EscrowConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            users,
            fees: FeePolicy::new(config.service_fee_rate),
            auth_ttl: Duration::hours(config.authorization_ttl_hours),
        }
    }

    /// Freeze `amount` for an ACCEPTED transaction.
    pub async fn authorize(
        &self,
        tx_id: EscrowId,
        amount: Decimal,
        payer_ref: &str,
        invoice_ref: &str,
    ) -> Result<PaymentAuthorization, EscrowError> {
        if amount <= Decimal::ZERO {
            return Err(ValidationError::InvalidAmount.into());
        }

        let tx = self
            .off_runtime(move |c| {
                let tx = c.load_transaction(tx_id)?;
                if tx.status != TransactionStatus::Accepted {
                    return Err(EscrowError::IllegalTransition {
                        op: "authorize",
                        from: tx.status,
                    });
                }
                if c.open_authorization(tx_id)?.is_some() {
                    return Err(ValidationError::AuthorizationAlreadyOpen.into());
                }
                Ok(tx)
            })
            .await?;

        let request = CreatePayment {
            amount,
            payer_ref: payer_ref.to_string(),
            invoice_ref: invoice_ref.to_string(),
            intent: PaymentIntent::Authorization,
        };
        let created = self.gateway.create_payment(&request).await.inspect_err(|e| {
            warn!(tx_id, gateway = self.gateway.name(), error = %e, "Authorization call failed");
        })?;

        if !created.is_success() {
            warn!(
                tx_id,
                status_code = %created.status_code,
                status_message = %created.status_message,
                "Authorization rejected by gateway"
            );
            return Err(GatewayError::rejected(
                "Authorization",
                &created.status_code,
                &created.status_message,
            )
            .into());
        }

        let row = PaymentAuthorization {
            id: 0,
            transaction_id: tx_id,
            gateway_payment_id: created.payment_id,
            gateway_txn_id: created.trx_id,
            phase: PaymentPhase::Authorization,
            status: created.status_code,
            amount,
            counterparty_ref: request.payer_ref,
            invoice_ref: request.invoice_ref,
            auth_token: created.auth_token,
            created_at: None,
            updated_at: None,
            expires_at: Some(Utc::now() + self.auth_ttl),
        };
        self.off_runtime(move |c| c.record_authorization(&tx, row)).await
    }

    /// Capture the open authorization of `tx_id` and pay the seller.
    ///
    /// The transaction must already be COMPLETED.
    pub async fn capture_on_completion(&self, tx_id: EscrowId) -> Result<CaptureReceipt, EscrowError> {
        let (auth, tx) = self
            .off_runtime(move |c| {
                let auth = c.open_authorization(tx_id)?.ok_or_else(|| {
                    EscrowError::not_found(format!(
                        "open payment authorization for transaction {tx_id}"
                    ))
                })?;
                let tx = c.load_transaction(tx_id)?;
                if tx.status != TransactionStatus::Completed {
                    return Err(EscrowError::IllegalTransition {
                        op: "capture",
                        from: tx.status,
                    });
                }
                Ok((auth, tx))
            })
            .await?;

        if auth.gateway_payment_id.is_empty() || auth.auth_token.is_empty() {
            return Err(EscrowError::Internal(format!(
                "authorization {} has no gateway payment id or token",
                auth.id
            )));
        }
        if auth.is_expired_at(Utc::now()) {
            warn!(
                tx_id,
                auth_id = auth.id,
                expires_at = ?auth.expires_at,
                "Capturing an expired authorization"
            );
        }

        let executed = self
            .gateway
            .execute_payment(&auth.auth_token, &auth.gateway_payment_id)
            .await
            .inspect_err(|e| {
                warn!(tx_id, auth_id = auth.id, error = %e, "Capture call failed");
            })?;

        if !executed.is_success() {
            warn!(
                tx_id,
                auth_id = auth.id,
                status_code = %executed.status_code,
                "Capture rejected by gateway"
            );
            return Err(GatewayError::rejected(
                "Capture",
                &executed.status_code,
                &executed.status_message,
            )
            .into());
        }

        self.off_runtime(move |c| c.settle_capture(&tx, &auth, executed))
            .await
    }

    /// Gateway-side status of the most recent payment for `tx_id`.
    pub async fn query(&self, tx_id: EscrowId) -> Result<PaymentState, EscrowError> {
        let latest = self
            .off_runtime(move |c| {
                entity::find_where::<PaymentAuthorization>(
                    &c.store,
                    &Filter::new().eq("transactionId", tx_id.to_string()),
                )?
                .into_iter()
                .max_by_key(|a| a.id)
                .ok_or_else(|| EscrowError::not_found(format!("payment for transaction {tx_id}")))
            })
            .await?;

        Ok(self
            .gateway
            .query_payment(&latest.auth_token, &latest.gateway_payment_id)
            .await?)
    }

    // ============================================================
    // Store side of authorize / capture
    // ============================================================

    fn record_authorization(
        &self,
        tx: &EscrowTransaction,
        row: PaymentAuthorization,
    ) -> Result<PaymentAuthorization, EscrowError> {
        let tx_id = tx.id;
        let record = self
            .store
            .create_unique(PaymentAuthorization::TABLE, &open_filter(tx_id), row.to_fields())
            .map_err(|e| match e {
                StoreError::Conflict { .. } => {
                    // The gateway holds funds we have no row for; needs manual release
                    error!(
                        tx_id,
                        gateway_payment_id = %row.gateway_payment_id,
                        "Concurrent authorization won; gateway payment left unrecorded"
                    );
                    ValidationError::AuthorizationAlreadyOpen.into()
                }
                other => EscrowError::from(other),
            })?;
        let auth = PaymentAuthorization::from_record(&record)?;

        info!(
            tx_id,
            auth_id = auth.id,
            gateway_payment_id = %auth.gateway_payment_id,
            amount = %auth.amount,
            "Funds authorized"
        );
        authorized_notice(tx, auth.amount).send(self.notifier.as_ref());
        Ok(auth)
    }

    /// Promote the row to `capture`, then work out and announce the payout.
    fn settle_capture(
        &self,
        tx: &EscrowTransaction,
        auth: &PaymentAuthorization,
        executed: PaymentExecuted,
    ) -> Result<CaptureReceipt, EscrowError> {
        let tx_id = tx.id;
        let promoted = self
            .store
            .update_if(
                PaymentAuthorization::TABLE,
                auth.id,
                &Filter::new().eq("phase", PaymentPhase::Authorization.as_str()),
                fields([
                    ("phase", PaymentPhase::Capture.as_str()),
                    ("status", executed.status_code.as_str()),
                    ("gatewayTxnId", executed.trx_id.as_str()),
                ]),
            )
            .map_err(|e| match e {
                StoreError::Conflict { .. } => {
                    error!(tx_id, auth_id = auth.id, "Authorization was captured concurrently");
                    EscrowError::not_found(format!(
                        "open payment authorization for transaction {tx_id}"
                    ))
                }
                other => EscrowError::from(other),
            })?;
        let promoted = PaymentAuthorization::from_record(&promoted)?;

        let fee = tx
            .service_fee
            .unwrap_or_else(|| self.fees.service_fee(promoted.amount));
        let payout = seller_payout(promoted.amount, tx.charge_option(), fee);

        info!(
            tx_id,
            auth_id = promoted.id,
            gateway_txn_id = %executed.trx_id,
            payout = %payout,
            "Funds captured"
        );

        let buyer_name = self.display_name(tx.buyer_id, "Buyer");
        let seller_name = self.display_name(tx.seller_id, "Seller");
        send_all(
            self.notifier.as_ref(),
            &captured_notices(tx, payout, &buyer_name, &seller_name),
        );

        Ok(CaptureReceipt {
            authorization: promoted,
            seller_payout: payout,
            gateway_txn_id: executed.trx_id,
        })
    }

    /// Run store work on the blocking pool. Store I/O can sleep between
    /// retries and must not stall an async worker.
    async fn off_runtime<T, F>(&self, op: F) -> Result<T, EscrowError>
    where
        F: FnOnce(&PaymentCoordinator) -> Result<T, EscrowError> + Send + 'static,
        T: Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || op(&this))
            .await
            .map_err(|e| EscrowError::Internal(format!("store task failed: {e}")))?
    }

    // ============================================================
    // Reads
    // ============================================================

    pub fn open_authorization(
        &self,
        tx_id: EscrowId,
    ) -> Result<Option<PaymentAuthorization>, EscrowError> {
        entity::find_first(&self.store, &open_filter(tx_id))
    }

    /// Successful authorizations still awaiting capture, newest first.
    pub fn pending_captures(&self) -> Result<Vec<PaymentAuthorization>, EscrowError> {
        let mut list = entity::find_where::<PaymentAuthorization>(
            &self.store,
            &Filter::new()
                .eq("phase", PaymentPhase::Authorization.as_str())
                .eq("status", SUCCESS_STATUS),
        )?;
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(list)
    }

    /// Captured payments, most recently captured first.
    pub fn captured(&self) -> Result<Vec<PaymentAuthorization>, EscrowError> {
        let mut list = entity::find_where::<PaymentAuthorization>(
            &self.store,
            &Filter::new().eq("phase", PaymentPhase::Capture.as_str()),
        )?;
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(list)
    }

    fn load_transaction(&self, tx_id: EscrowId) -> Result<EscrowTransaction, EscrowError> {
        entity::find(&self.store, tx_id)?
            .ok_or_else(|| EscrowError::not_found(format!("transaction {tx_id}")))
    }

    fn display_name(&self, user_id: UserId, fallback: &str) -> String {
        match self.users.resolve(user_id) {
            Ok(Some(profile)) if !profile.display_name.is_empty() => profile.display_name,
            Ok(_) => fallback.to_string(),
            Err(e) => {
                warn!(user_id, error = %e, "User lookup failed; using placeholder name");
                fallback.to_string()
            }
        }
    }
}

fn open_filter(tx_id: EscrowId) -> Filter {
    Filter::new()
        .eq("transactionId", tx_id.to_string())
        .eq("phase", PaymentPhase::Authorization.as_str())
}
