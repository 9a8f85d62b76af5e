//! End-to-end escrow flows over a real store file, the store-backed user
//! directory and notifier, and a scripted gateway.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tempfile::TempDir;

use escrow_engine::config::{EscrowConfig, StoreConfig};
use escrow_engine::escrow::{
    CaptureStatus, DisputeDesk, DisputeStatus, EscrowService, ListQuery, NewTransaction,
    TransactionStatus,
};
use escrow_engine::notify::StoreNotifier;
use escrow_engine::payment::gateway::{
    CreatePayment, GatewayError, PaymentCreated, PaymentExecuted, PaymentGateway, PaymentState,
    SUCCESS_STATUS,
};
use escrow_engine::payment::{PaymentCoordinator, PaymentPhase};
use escrow_engine::store::RecordStore;
use escrow_engine::users::{NewUser, StoreUserDirectory};
use escrow_engine::{EscrowError, UserId};

#[derive(Default)]
struct ScriptedGateway {
    created: AtomicUsize,
    executed: AtomicUsize,
    down: AtomicBool,
}

impl ScriptedGateway {
    fn check_up(&self) -> Result<(), GatewayError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(GatewayError::new("Gateway unreachable", "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn create_payment(&self, _request: &CreatePayment) -> Result<PaymentCreated, GatewayError> {
        self.check_up()?;
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PaymentCreated {
            payment_id: format!("P{n}"),
            trx_id: String::new(),
            status_code: SUCCESS_STATUS.to_string(),
            status_message: "Successful".to_string(),
            auth_token: format!("tok-{n}"),
        })
    }

    async fn execute_payment(
        &self,
        _auth_token: &str,
        payment_id: &str,
    ) -> Result<PaymentExecuted, GatewayError> {
        self.check_up()?;
        let n = self.executed.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PaymentExecuted {
            payment_id: payment_id.to_string(),
            trx_id: format!("T{n}"),
            status_code: SUCCESS_STATUS.to_string(),
            status_message: "Successful".to_string(),
        })
    }

    async fn query_payment(
        &self,
        _auth_token: &str,
        payment_id: &str,
    ) -> Result<PaymentState, GatewayError> {
        self.check_up()?;
        Ok(PaymentState {
            payment_id: payment_id.to_string(),
            transaction_status: "Authorized".to_string(),
            status_code: SUCCESS_STATUS.to_string(),
            ..PaymentState::default()
        })
    }
}

struct Market {
    _dir: TempDir,
    store: Arc<RecordStore>,
    notifier: Arc<StoreNotifier>,
    gateway: Arc<ScriptedGateway>,
    payments: Arc<PaymentCoordinator>,
    escrow: Arc<EscrowService>,
    buyer: UserId,
    seller: UserId,
}

fn market() -> Market {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RecordStore::open(&StoreConfig::at(dir.path().join("escrow.json"))).unwrap());
    let users = Arc::new(StoreUserDirectory::new(store.clone(), chrono::Duration::minutes(5)));
    let notifier = Arc::new(StoreNotifier::new(store.clone()));
    let gateway = Arc::new(ScriptedGateway::default());
    let config = EscrowConfig::default();

    let payments = Arc::new(PaymentCoordinator::new(
        store.clone(),
        gateway.clone(),
        notifier.clone(),
        users.clone(),
        &config,
    ));
    let escrow = Arc::new(EscrowService::new(
        store.clone(),
        users.clone(),
        notifier.clone(),
        payments.clone(),
        &config,
    ));

    let verified = |name: &str, email: &str| {
        let user = users
            .register(NewUser {
                full_name: name.to_string(),
                email: email.to_string(),
                phone: String::new(),
            })
            .unwrap();
        let code = users.issue_code(user.id, "01711111111").unwrap();
        users.verify_code(user.id, &code.code).unwrap();
        users.mark_nid_verified(user.id).unwrap();
        user.id
    };
    let buyer = verified("Amina Buyer", "amina@example.com");
    let seller = verified("Rafi Seller", "rafi@example.com");

    Market {
        _dir: dir,
        store,
        notifier,
        gateway,
        payments,
        escrow,
        buyer,
        seller,
    }
}

fn order(seller_id: UserId, amount: &str, option: &str) -> NewTransaction {
    NewTransaction {
        seller_id,
        amount: amount.parse().unwrap(),
        description: "Camera lens".to_string(),
        due_date: Some("2026-12-01".to_string()),
        notes: None,
        service_charge_option: option.to_string(),
    }
}

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_happy_path_with_capture() {
    let m = market();

    let tx = m.escrow.create(m.buyer, order(m.seller, "1000", "SPLIT")).unwrap();
    assert_eq!(tx.total_amount, Some(dec("1010.00")));

    m.escrow.accept(tx.id, m.seller).unwrap();
    let auth = m
        .payments
        .authorize(tx.id, tx.amount, "01711111111", &tx.transaction_id)
        .await
        .unwrap();
    assert_eq!(auth.phase, PaymentPhase::Authorization);
    assert_eq!(auth.amount, dec("1000"));

    m.escrow.fund(tx.id, m.buyer, "mobile_wallet").unwrap();
    m.escrow.deliver(tx.id, m.seller, "https://tracking/abc").unwrap();
    let outcome = m.escrow.complete(tx.id, m.buyer).await.unwrap();

    assert_eq!(outcome.transaction.status, TransactionStatus::Completed);
    let CaptureStatus::Captured(receipt) = outcome.capture else {
        panic!("expected a capture");
    };
    // Seller bears half of the 20.00 fee
    assert_eq!(receipt.seller_payout, dec("990.00"));
    assert_eq!(receipt.gateway_txn_id, "T1");
    assert!(m.payments.pending_captures().unwrap().is_empty());
    assert_eq!(m.payments.captured().unwrap().len(), 1);

    let seller_inbox = m.notifier.list_for_user(m.seller).unwrap();
    assert!(seller_inbox.iter().any(|n| n.title == "Payment Received"
        && n.message.contains("990.00")
        && n.message.contains("Amina Buyer")));
}

#[tokio::test]
async fn test_gateway_outage_leaves_completion_and_authorization() {
    let m = market();
    let tx = m.escrow.create(m.buyer, order(m.seller, "250", "SELLER_PAYS")).unwrap();
    m.escrow.accept(tx.id, m.seller).unwrap();
    m.payments
        .authorize(tx.id, tx.payable_amount(), "017", &tx.transaction_id)
        .await
        .unwrap();
    m.escrow.fund(tx.id, m.buyer, "MOBILE_WALLET").unwrap();
    m.escrow.deliver(tx.id, m.seller, "photo.jpg").unwrap();

    m.gateway.down.store(true, Ordering::SeqCst);
    let outcome = m.escrow.complete(tx.id, m.buyer).await.unwrap();
    assert!(matches!(outcome.capture, CaptureStatus::Failed(EscrowError::Gateway { .. })));
    assert_eq!(m.payments.pending_captures().unwrap().len(), 1);

    // Capture can be retried once the gateway is back
    m.gateway.down.store(false, Ordering::SeqCst);
    let receipt = m.payments.capture_on_completion(tx.id).await.unwrap();
    assert_eq!(receipt.seller_payout, dec("245.00"));
    assert_eq!(m.gateway.executed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_authorization_is_rejected() {
    let m = market();
    let tx = m.escrow.create(m.buyer, order(m.seller, "80", "BUYER_PAYS")).unwrap();
    m.escrow.accept(tx.id, m.seller).unwrap();

    m.payments.authorize(tx.id, dec("81.60"), "017", "inv-1").await.unwrap();
    let err = m
        .payments
        .authorize(tx.id, dec("81.60"), "017", "inv-2")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "AUTHORIZATION_ALREADY_OPEN");
    assert_eq!(m.gateway.created.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dispute_and_listing() {
    let m = market();
    let desk = DisputeDesk::new(m.store.clone(), m.escrow.clone());

    let first = m.escrow.create(m.buyer, order(m.seller, "40", "SPLIT")).unwrap();
    let second = m.escrow.create(m.buyer, order(m.seller, "60", "SPLIT")).unwrap();
    m.escrow.cancel(second.id, m.buyer, Some("found it cheaper")).unwrap();

    let dispute = desk.file(first.id, m.seller, "buyer asked off-platform", None).unwrap();
    desk.resolve(dispute.id, DisputeStatus::Resolved, "warned buyer").unwrap();

    let page = m.escrow.list_for_user(m.seller, &ListQuery::default()).unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.transactions[0].transaction.id, second.id);

    let stats = m.escrow.stats_for_user(m.buyer).unwrap();
    assert_eq!(stats.total_transactions, 2);
    assert_eq!(stats.disputed_transactions, 1);
    assert_eq!(stats.pending_transactions, 0);
}

#[test]
fn test_state_survives_reopen() {
    let m = market();
    let tx = m.escrow.create(m.buyer, order(m.seller, "15.5", "BUYER_PAYS")).unwrap();

    let path = m.store.path().to_path_buf();
    let reopened = RecordStore::open(&StoreConfig::at(&path)).unwrap();
    let row = reopened.find_by_id("transactions", tx.id).unwrap().unwrap();
    assert_eq!(row.get("transactionId"), Some(tx.transaction_id.as_str()));
    assert_eq!(row.get("status"), Some("PENDING"));
    assert_eq!(row.get("serviceFee"), Some("0.31"));
}
