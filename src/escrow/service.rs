//! Escrow lifecycle operations
//!
//! Every transition follows the same steps:
//! 1. re-read the stored transaction
//! 2. check the actor is a participant, fully verified, and in the right role
//! 3. check the move is legal from the status just read
//! 4. persist with a compare-and-set on that status
//! 5. notify both parties (best-effort)
//!
//! A concurrent change between steps 1 and 4 surfaces as `IllegalTransition`
//! carrying the status actually found on disk.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::fee::{FeePolicy, ServiceChargeOption};
use super::model::{EscrowTransaction, NewTransaction, PartyRole, REFERENCE_PREFIX};
use super::notice::{capture_failed_notices, send_all, status_notices};
use super::status::{Actor, Operation, TransactionStatus};
use crate::config::EscrowConfig;
use crate::core_types::{EscrowId, UserId};
use crate::entity::{self, Entity, fmt_timestamp};
use crate::error::{EscrowError, ValidationError};
use crate::notify::NotificationSink;
use crate::payment::coordinator::{CaptureReceipt, PaymentCoordinator};
use crate::store::{Fields, Filter, RecordStore, StoreError, fields};
use crate::users::{UserDirectory, UserProfile};

/// Attempts at drawing an unused transaction reference
const REFERENCE_ATTEMPTS: usize = 5;

/// What happened to the payment when a transaction was completed.
#[derive(Debug)]
pub enum CaptureStatus {
    /// Not paid through the gateway; nothing to capture
    NotApplicable,
    Captured(CaptureReceipt),
    /// Completion stands; funds are still held at the gateway
    Failed(EscrowError),
}

#[derive(Debug)]
pub struct CompletionOutcome {
    pub transaction: EscrowTransaction,
    pub capture: CaptureStatus,
}

#[derive(Clone)]
pub struct EscrowService {
    pub(super) store: Arc<RecordStore>,
    pub(super) users: Arc<dyn UserDirectory>,
    notifier: Arc<dyn NotificationSink>,
    payments: Arc<PaymentCoordinator>,
    fees: FeePolicy,
    config: EscrowConfig,
}

impl EscrowService {
    pub fn new(
        store: Arc<RecordStore>,
        users: Arc<dyn UserDirectory>,
        notifier: Arc<dyn NotificationSink>,
        payments: Arc<PaymentCoordinator>,
        config: &EscrowConfig,
    ) -> Self {
        Self {
            store,
            users,
            notifier,
            payments,
            fees: FeePolicy::new(config.service_fee_rate),
            config: config.clone(),
        }
    }

    // ============================================================
    // Create
    // ============================================================

    /// Open a PENDING transaction on behalf of `buyer_id`.
    pub fn create(
        &self,
        buyer_id: UserId,
        new_tx: NewTransaction,
    ) -> Result<EscrowTransaction, EscrowError> {
        self.require_verified(buyer_id)?;

        let option: ServiceChargeOption = new_tx.service_charge_option.parse()?;
        if new_tx.amount <= Decimal::ZERO {
            return Err(ValidationError::InvalidAmount.into());
        }
        if buyer_id == new_tx.seller_id {
            return Err(ValidationError::SameParty.into());
        }
        if self.users.resolve(new_tx.seller_id)?.is_none() {
            return Err(EscrowError::not_found(format!("seller {}", new_tx.seller_id)));
        }

        let quote = self.fees.quote(new_tx.amount, option);
        let mut draft = EscrowTransaction {
            id: 0,
            transaction_id: String::new(),
            buyer_id,
            seller_id: new_tx.seller_id,
            amount: new_tx.amount,
            description: new_tx.description.trim().to_string(),
            status: TransactionStatus::Pending,
            payment_method: String::new(),
            delivery_proof: String::new(),
            due_date: new_tx.due_date.filter(|d| !d.trim().is_empty()),
            notes: new_tx.notes.unwrap_or_default(),
            service_charge_option: Some(option),
            service_fee: Some(quote.service_fee),
            total_amount: Some(quote.total_amount),
            created_at: None,
            updated_at: None,
            completed_at: None,
        };

        let tx = self.insert_with_reference(&mut draft)?;
        info!(
            tx_id = tx.id,
            reference = %tx.transaction_id,
            buyer_id,
            seller_id = tx.seller_id,
            amount = %tx.amount,
            service_fee = %quote.service_fee,
            "Transaction created"
        );
        send_all(
            self.notifier.as_ref(),
            &status_notices(&tx, TransactionStatus::Pending),
        );
        Ok(tx)
    }

    fn insert_with_reference(
        &self,
        draft: &mut EscrowTransaction,
    ) -> Result<EscrowTransaction, EscrowError> {
        for _ in 0..REFERENCE_ATTEMPTS {
            draft.transaction_id = new_reference();
            let guard = Filter::new().eq("transactionId", draft.transaction_id.as_str());
            match self
                .store
                .create_unique(EscrowTransaction::TABLE, &guard, draft.to_fields())
            {
                Ok(record) => return Ok(EscrowTransaction::from_record(&record)?),
                Err(StoreError::Conflict { .. }) => {
                    warn!(reference = %draft.transaction_id, "Transaction reference collision");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EscrowError::Internal(
            "could not allocate a unique transaction reference".to_string(),
        ))
    }

    // ============================================================
    // Transitions
    // ============================================================

    pub fn accept(&self, tx_id: EscrowId, actor: UserId) -> Result<EscrowTransaction, EscrowError> {
        self.transition(tx_id, actor, Operation::Accept, |_| Fields::new())
    }

    /// Record the payment method. Funds are expected to be authorized
    /// already through the payment coordinator.
    pub fn fund(
        &self,
        tx_id: EscrowId,
        actor: UserId,
        payment_method: &str,
    ) -> Result<EscrowTransaction, EscrowError> {
        let method = payment_method.trim();
        if method.is_empty() {
            return Err(ValidationError::MissingField("paymentMethod").into());
        }
        self.transition(tx_id, actor, Operation::Fund, |_| {
            fields([("paymentMethod", method)])
        })
    }

    pub fn deliver(
        &self,
        tx_id: EscrowId,
        actor: UserId,
        delivery_proof: &str,
    ) -> Result<EscrowTransaction, EscrowError> {
        let proof = delivery_proof.trim();
        if proof.is_empty() {
            return Err(ValidationError::MissingField("deliveryProof").into());
        }
        self.transition(tx_id, actor, Operation::Deliver, |_| {
            fields([("deliveryProof", proof)])
        })
    }

    /// Release the funds. Completion is recorded first; a gateway capture
    /// follows when the transaction was paid through the gateway. A failed
    /// capture does not undo completion: it is reported in the outcome and
    /// both parties are warned.
    pub async fn complete(
        &self,
        tx_id: EscrowId,
        actor: UserId,
    ) -> Result<CompletionOutcome, EscrowError> {
        let tx = self
            .off_runtime(move |svc| {
                svc.transition(tx_id, actor, Operation::Complete, |_| {
                    fields([("completedAt", fmt_timestamp(&Utc::now()))])
                })
            })
            .await?;

        if !self.is_gateway_method(&tx.payment_method) {
            return Ok(CompletionOutcome {
                transaction: tx,
                capture: CaptureStatus::NotApplicable,
            });
        }

        let capture = match self.payments.capture_on_completion(tx.id).await {
            Ok(receipt) => CaptureStatus::Captured(receipt),
            Err(e) => {
                error!(
                    tx_id = tx.id,
                    reference = %tx.transaction_id,
                    error = %e,
                    "Transaction completed but capture failed"
                );
                let notices = capture_failed_notices(&tx, &e.to_string());
                let notifier = self.notifier.clone();
                if let Err(join) =
                    tokio::task::spawn_blocking(move || send_all(notifier.as_ref(), &notices)).await
                {
                    warn!(tx_id = tx.id, error = %join, "Capture warning was not sent");
                }
                CaptureStatus::Failed(e)
            }
        };

        Ok(CompletionOutcome {
            transaction: tx,
            capture,
        })
    }

    pub fn cancel(
        &self,
        tx_id: EscrowId,
        actor: UserId,
        reason: Option<&str>,
    ) -> Result<EscrowTransaction, EscrowError> {
        self.transition(tx_id, actor, Operation::Cancel, |tx| {
            notes_fields(tx, "Cancellation reason", reason)
        })
    }

    pub fn dispute(
        &self,
        tx_id: EscrowId,
        actor: UserId,
        reason: Option<&str>,
    ) -> Result<EscrowTransaction, EscrowError> {
        self.transition(tx_id, actor, Operation::Dispute, |tx| {
            notes_fields(tx, "Dispute reason", reason)
        })
    }

    /// Stored transaction, unchecked.
    pub fn get(&self, tx_id: EscrowId) -> Result<Option<EscrowTransaction>, EscrowError> {
        entity::find(&self.store, tx_id)
    }

    fn transition(
        &self,
        tx_id: EscrowId,
        actor: UserId,
        op: Operation,
        changes: impl FnOnce(&EscrowTransaction) -> Fields,
    ) -> Result<EscrowTransaction, EscrowError> {
        let current = self.load_for_participant(tx_id, actor)?;

        match (op.actor(), current.role_of(actor)) {
            (Actor::Buyer, Some(PartyRole::Seller)) => {
                return Err(EscrowError::permission_denied(format!(
                    "only the buyer can {op} a transaction"
                )));
            }
            (Actor::Seller, Some(PartyRole::Buyer)) => {
                return Err(EscrowError::permission_denied(format!(
                    "only the seller can {op} a transaction"
                )));
            }
            _ => {}
        }

        if !op.allowed_from(current.status, self.config.restrict_disputes) {
            return Err(EscrowError::IllegalTransition {
                op: op.name(),
                from: current.status,
            });
        }

        let target = op.target();
        let mut update = changes(&current);
        update.insert("status".to_string(), target.as_str().to_string());

        let record = self
            .store
            .update_if(
                EscrowTransaction::TABLE,
                current.id,
                &Filter::new().eq("status", current.status.as_str()),
                update,
            )
            .map_err(|e| match e {
                StoreError::Conflict { current: found, .. } => {
                    let from = found
                        .and_then(|r| r.get("status").and_then(|s| s.parse().ok()))
                        .unwrap_or(current.status);
                    warn!(tx_id, op = op.name(), observed = %current.status, found = %from, "Concurrent status change");
                    EscrowError::IllegalTransition { op: op.name(), from }
                }
                other => EscrowError::from(other),
            })?;
        let updated = EscrowTransaction::from_record(&record)?;

        info!(
            tx_id,
            reference = %updated.transaction_id,
            actor,
            from = %current.status,
            to = %target,
            "Transaction {}", op
        );
        send_all(self.notifier.as_ref(), &status_notices(&updated, target));
        Ok(updated)
    }

    // ============================================================
    // Access checks
    // ============================================================

    /// Load `tx_id` and check `actor` is a verified participant.
    pub(super) fn load_for_participant(
        &self,
        tx_id: EscrowId,
        actor: UserId,
    ) -> Result<EscrowTransaction, EscrowError> {
        let tx = self
            .get(tx_id)?
            .ok_or_else(|| EscrowError::not_found(format!("transaction {tx_id}")))?;
        if tx.role_of(actor).is_none() {
            return Err(EscrowError::permission_denied(
                "not a participant in this transaction",
            ));
        }
        self.require_verified(actor)?;
        Ok(tx)
    }

    pub(super) fn require_verified(&self, user_id: UserId) -> Result<UserProfile, EscrowError> {
        let profile = self
            .users
            .resolve(user_id)?
            .ok_or_else(|| EscrowError::not_found(format!("user {user_id}")))?;
        if !profile.is_fully_verified() {
            return Err(ValidationError::VerificationRequired.into());
        }
        Ok(profile)
    }

    /// Run a synchronous step on the blocking pool; store I/O may sleep
    /// between retries.
    async fn off_runtime<T, F>(&self, op: F) -> Result<T, EscrowError>
    where
        F: FnOnce(&EscrowService) -> Result<T, EscrowError> + Send + 'static,
        T: Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || op(&this))
            .await
            .map_err(|e| EscrowError::Internal(format!("store task failed: {e}")))?
    }

    fn is_gateway_method(&self, method: &str) -> bool {
        method
            .trim()
            .eq_ignore_ascii_case(&self.config.gateway_payment_method)
    }
}

/// `TXN-` plus 8 uppercase hex characters.
fn new_reference() -> String {
    let id = Uuid::new_v4().simple().to_string().to_ascii_uppercase();
    format!("{REFERENCE_PREFIX}{}", &id[..8])
}

fn notes_fields(tx: &EscrowTransaction, label: &str, reason: Option<&str>) -> Fields {
    match reason.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) => fields([("notes", tx.notes_with(&format!("{label}: {reason}")))]),
        None => Fields::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::model::PaymentPhase;
    use crate::test_support::{Fixture, new_tx};

    #[test]
    fn test_reference_format() {
        let r = new_reference();
        assert_eq!(r.len(), 12);
        assert!(r.starts_with("TXN-"));
        assert!(r[4..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_create_split_fee() {
        let fx = Fixture::new();
        let tx = fx
            .escrow
            .create(fx.buyer, new_tx(fx.seller, "1000", "SPLIT"))
            .unwrap();

        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.service_fee, Some("20.00".parse().unwrap()));
        assert_eq!(tx.total_amount, Some("1010.00".parse().unwrap()));
        assert_eq!(tx.payment_method, "");
        assert!(tx.created_at.is_some());

        // Seller hears about it
        assert!(fx.sink.sent_to(fx.seller).iter().any(|n| n.title == "New Transaction"));
    }

    #[test]
    fn test_create_requires_verified_buyer() {
        let fx = Fixture::new();
        let err = fx
            .escrow
            .create(fx.unverified, new_tx(fx.seller, "100", "BUYER_PAYS"))
            .unwrap_err();
        assert!(err.is_verification_required());
        assert!(fx.store.list_all("transactions").unwrap().is_empty());
    }

    #[test]
    fn test_create_validation() {
        let fx = Fixture::new();

        let err = fx
            .escrow
            .create(fx.buyer, new_tx(fx.seller, "100", "HALF"))
            .unwrap_err();
        assert!(matches!(
            err,
            EscrowError::Validation(ValidationError::UnknownServiceChargeOption(_))
        ));

        let err = fx
            .escrow
            .create(fx.buyer, new_tx(fx.seller, "0", "SPLIT"))
            .unwrap_err();
        assert!(matches!(err, EscrowError::Validation(ValidationError::InvalidAmount)));

        let err = fx
            .escrow
            .create(fx.buyer, new_tx(fx.buyer, "10", "SPLIT"))
            .unwrap_err();
        assert!(matches!(err, EscrowError::Validation(ValidationError::SameParty)));

        let err = fx
            .escrow
            .create(fx.buyer, new_tx(9_999, "10", "SPLIT"))
            .unwrap_err();
        assert!(matches!(err, EscrowError::NotFound(_)));

        assert!(fx.store.list_all("transactions").unwrap().is_empty());
    }

    #[test]
    fn test_references_are_unique() {
        let fx = Fixture::new();
        let mut refs = std::collections::HashSet::new();
        for _ in 0..20 {
            let tx = fx.pending_transaction("10", "SPLIT");
            assert!(refs.insert(tx.transaction_id));
        }
    }

    #[test]
    fn test_roles_enforced() {
        let fx = Fixture::new();
        let tx = fx.pending_transaction("100", "SPLIT");

        assert!(matches!(
            fx.escrow.accept(tx.id, fx.buyer),
            Err(EscrowError::PermissionDenied(_))
        ));
        assert!(matches!(
            fx.escrow.accept(tx.id, fx.outsider),
            Err(EscrowError::PermissionDenied(_))
        ));
        fx.escrow.accept(tx.id, fx.seller).unwrap();
        assert!(matches!(
            fx.escrow.fund(tx.id, fx.seller, "mobile_wallet"),
            Err(EscrowError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_deliver_before_funding_is_illegal() {
        let fx = Fixture::new();
        let tx = fx.accepted_transaction("100", "SPLIT");

        let err = fx.escrow.deliver(tx.id, fx.seller, "courier-123").unwrap_err();
        assert!(matches!(
            err,
            EscrowError::IllegalTransition {
                op: "deliver",
                from: TransactionStatus::Accepted
            }
        ));
        assert_eq!(
            fx.escrow.get(tx.id).unwrap().unwrap().status,
            TransactionStatus::Accepted
        );
    }

    #[test]
    fn test_deliver_requires_proof() {
        let fx = Fixture::new();
        let tx = fx.funded_transaction("100", "SPLIT", "cash");
        assert!(matches!(
            fx.escrow.deliver(tx.id, fx.seller, "  "),
            Err(EscrowError::Validation(ValidationError::MissingField("deliveryProof")))
        ));
    }

    #[test]
    fn test_cancel_appends_reason() {
        let fx = Fixture::new();
        let tx = fx.pending_transaction("100", "SPLIT");

        let cancelled = fx
            .escrow
            .cancel(tx.id, fx.buyer, Some("changed my mind"))
            .unwrap();
        assert_eq!(cancelled.status, TransactionStatus::Cancelled);
        assert_eq!(cancelled.notes, "Cancellation reason: changed my mind");

        assert!(matches!(
            fx.escrow.accept(tx.id, fx.seller),
            Err(EscrowError::IllegalTransition { from: TransactionStatus::Cancelled, .. })
        ));
    }

    #[test]
    fn test_cancel_after_funding_is_illegal() {
        let fx = Fixture::new();
        let tx = fx.funded_transaction("100", "SPLIT", "cash");
        assert!(matches!(
            fx.escrow.cancel(tx.id, fx.seller, None),
            Err(EscrowError::IllegalTransition { op: "cancel", .. })
        ));
    }

    #[test]
    fn test_dispute_from_any_status_by_default() {
        let fx = Fixture::new();
        let tx = fx.pending_transaction("100", "SPLIT");
        let disputed = fx.escrow.dispute(tx.id, fx.seller, Some("no reply")).unwrap();
        assert_eq!(disputed.status, TransactionStatus::Disputed);
        assert_eq!(disputed.notes, "Dispute reason: no reply");
    }

    #[test]
    fn test_dispute_restriction() {
        let fx = Fixture::with_config(EscrowConfig {
            restrict_disputes: true,
            ..EscrowConfig::default()
        });
        let pending = fx.pending_transaction("100", "SPLIT");
        assert!(matches!(
            fx.escrow.dispute(pending.id, fx.buyer, None),
            Err(EscrowError::IllegalTransition { op: "dispute", .. })
        ));

        let funded = fx.funded_transaction("100", "SPLIT", "cash");
        fx.escrow.dispute(funded.id, fx.buyer, None).unwrap();
    }

    #[test]
    fn test_failing_notifier_does_not_fail_transition() {
        let fx = Fixture::with_failing_notifier();
        let tx = fx.pending_transaction("100", "SPLIT");
        let accepted = fx.escrow.accept(tx.id, fx.seller).unwrap();
        assert_eq!(accepted.status, TransactionStatus::Accepted);
    }

    #[test]
    fn test_unverified_participant_rejected() {
        let fx = Fixture::new();
        let tx = fx.pending_transaction("100", "SPLIT");
        fx.revoke_verification(fx.seller);

        let err = fx.escrow.accept(tx.id, fx.seller).unwrap_err();
        assert!(err.is_verification_required());
    }

    #[test]
    fn test_transition_checks_stored_status() {
        let fx = Fixture::new();
        let tx = fx.pending_transaction("100", "SPLIT");

        // Another writer moved the row after `tx` was read
        fx.store
            .update("transactions", tx.id, fields([("status", "CANCELLED")]))
            .unwrap();
        let err = fx.escrow.accept(tx.id, fx.seller).unwrap_err();
        assert!(matches!(
            err,
            EscrowError::IllegalTransition { from: TransactionStatus::Cancelled, .. }
        ));
    }

    #[tokio::test]
    async fn test_complete_with_gateway_capture() {
        let fx = Fixture::new();
        let tx = fx.accepted_transaction("1000", "SPLIT");
        fx.payments
            .authorize(tx.id, tx.amount, "017", &tx.transaction_id)
            .await
            .unwrap();
        fx.escrow.fund(tx.id, fx.buyer, "Mobile_Wallet").unwrap();
        fx.escrow.deliver(tx.id, fx.seller, "https://proof/1").unwrap();

        let outcome = fx.escrow.complete(tx.id, fx.buyer).await.unwrap();
        assert_eq!(outcome.transaction.status, TransactionStatus::Completed);
        assert!(outcome.transaction.completed_at.is_some());
        match outcome.capture {
            CaptureStatus::Captured(receipt) => {
                assert_eq!(receipt.seller_payout, "990.00".parse::<Decimal>().unwrap());
                assert_eq!(receipt.authorization.phase, PaymentPhase::Capture);
            }
            other => panic!("expected capture, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_complete_survives_capture_failure() {
        let fx = Fixture::new();
        let tx = fx.accepted_transaction("300", "BUYER_PAYS");
        fx.payments
            .authorize(tx.id, tx.payable_amount(), "017", &tx.transaction_id)
            .await
            .unwrap();
        fx.escrow.fund(tx.id, fx.buyer, "mobile_wallet").unwrap();
        fx.escrow.deliver(tx.id, fx.seller, "receipt.pdf").unwrap();
        fx.gateway.set_fail_transport(true);

        let outcome = fx.escrow.complete(tx.id, fx.buyer).await.unwrap();
        assert_eq!(outcome.transaction.status, TransactionStatus::Completed);
        assert!(matches!(
            outcome.capture,
            CaptureStatus::Failed(EscrowError::Gateway { .. })
        ));
        assert_eq!(
            fx.escrow.get(tx.id).unwrap().unwrap().status,
            TransactionStatus::Completed
        );
        assert!(fx.payments.open_authorization(tx.id).unwrap().is_some());
        assert!(
            fx.sink
                .sent_to(fx.seller)
                .iter()
                .any(|n| n.title == "Payment Capture Pending")
        );
    }

    #[tokio::test]
    async fn test_complete_other_method_skips_capture() {
        let fx = Fixture::new();
        let tx = fx.funded_transaction("100", "SPLIT", "bank_transfer");
        fx.escrow.deliver(tx.id, fx.seller, "tracking-42").unwrap();

        let outcome = fx.escrow.complete(tx.id, fx.buyer).await.unwrap();
        assert!(matches!(outcome.capture, CaptureStatus::NotApplicable));
        assert_eq!(fx.gateway.execute_count(), 0);
    }

    #[tokio::test]
    async fn test_complete_twice_is_illegal() {
        let fx = Fixture::new();
        let tx = fx.funded_transaction("100", "SPLIT", "cash");
        fx.escrow.deliver(tx.id, fx.seller, "proof").unwrap();
        fx.escrow.complete(tx.id, fx.buyer).await.unwrap();

        assert!(matches!(
            fx.escrow.complete(tx.id, fx.buyer).await,
            Err(EscrowError::IllegalTransition { from: TransactionStatus::Completed, .. })
        ));
    }
}
