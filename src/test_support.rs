//! Shared fixtures for unit tests

use std::sync::Arc;

use tempfile::TempDir;

use crate::config::{EscrowConfig, StoreConfig};
use crate::core_types::UserId;
use crate::escrow::model::{EscrowTransaction, NewTransaction};
use crate::escrow::service::EscrowService;
use crate::notify::NotificationSink;
use crate::notify::mock::{FailingSink, RecordingSink};
use crate::payment::coordinator::PaymentCoordinator;
use crate::payment::gateway::mock::MockGateway;
use crate::store::{RecordStore, fields};
use crate::users::{NewUser, StoreUserDirectory};

/// Migrated store in a fresh directory. Keep the `TempDir` alive.
pub fn temp_store() -> (TempDir, Arc<RecordStore>) {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        retry_delay_ms: 1,
        ..StoreConfig::at(dir.path().join("store.json"))
    };
    let store = RecordStore::open(&config).unwrap();
    (dir, Arc::new(store))
}

pub fn new_tx(seller_id: UserId, amount: &str, option: &str) -> NewTransaction {
    NewTransaction {
        seller_id,
        amount: amount.parse().unwrap(),
        description: "Used laptop".to_string(),
        due_date: None,
        notes: None,
        service_charge_option: option.to_string(),
    }
}

pub struct Fixture {
    _dir: TempDir,
    pub store: Arc<RecordStore>,
    pub users: Arc<StoreUserDirectory>,
    pub sink: Arc<RecordingSink>,
    pub gateway: Arc<MockGateway>,
    pub payments: Arc<PaymentCoordinator>,
    pub escrow: Arc<EscrowService>,
    pub buyer: UserId,
    pub seller: UserId,
    pub outsider: UserId,
    pub unverified: UserId,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(EscrowConfig::default(), false)
    }

    pub fn with_config(config: EscrowConfig) -> Self {
        Self::build(config, false)
    }

    /// Every notification fails; `sink` stays empty.
    pub fn with_failing_notifier() -> Self {
        Self::build(EscrowConfig::default(), true)
    }

    fn build(config: EscrowConfig, failing_notifier: bool) -> Self {
        let (dir, store) = temp_store();
        let users = Arc::new(StoreUserDirectory::new(
            store.clone(),
            chrono::Duration::minutes(5),
        ));
        let sink = Arc::new(RecordingSink::default());
        let notifier: Arc<dyn NotificationSink> = if failing_notifier {
            Arc::new(FailingSink)
        } else {
            sink.clone()
        };
        let gateway = Arc::new(MockGateway::new());
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
            notifier,
            payments.clone(),
            &config,
        ));

        let register = |name: &str, email: &str, verified: bool| {
            let user = users
                .register(NewUser {
                    full_name: name.to_string(),
                    email: email.to_string(),
                    phone: "01700000000".to_string(),
                })
                .unwrap();
            if verified {
                users.mark_phone_verified(user.id).unwrap();
                users.mark_nid_verified(user.id).unwrap();
            }
            user.id
        };
        let buyer = register("Buyer One", "buyer@example.com", true);
        let seller = register("Seller Two", "seller@example.com", true);
        let outsider = register("Outsider", "outsider@example.com", true);
        let unverified = register("New Comer", "new@example.com", false);

        Self {
            _dir: dir,
            store,
            users,
            sink,
            gateway,
            payments,
            escrow,
            buyer,
            seller,
            outsider,
            unverified,
        }
    }

    pub fn pending_transaction(&self, amount: &str, option: &str) -> EscrowTransaction {
        self.escrow
            .create(self.buyer, new_tx(self.seller, amount, option))
            .unwrap()
    }

    pub fn accepted_transaction(&self, amount: &str, option: &str) -> EscrowTransaction {
        let tx = self.pending_transaction(amount, option);
        self.escrow.accept(tx.id, self.seller).unwrap()
    }

    pub fn funded_transaction(&self, amount: &str, option: &str, method: &str) -> EscrowTransaction {
        let tx = self.accepted_transaction(amount, option);
        self.escrow.fund(tx.id, self.buyer, method).unwrap()
    }

    /// Drop both identity checks directly in the store.
    pub fn revoke_verification(&self, user_id: UserId) {
        self.store
            .update(
                "users",
                user_id,
                fields([("isNidVerified", "false"), ("isVerified", "false")]),
            )
            .unwrap();
    }
}
