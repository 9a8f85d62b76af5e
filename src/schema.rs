//! Store schema migrations
//!
//! The store file records the last applied migration in `schemaVersion`.
//! [`migrate`] applies every newer step in order and bumps the version after
//! each one. Steps only call `ensure_table`, so re-running one is harmless.

use tracing::{info, warn};

use crate::entity::Entity;
use crate::escrow::dispute::Dispute;
use crate::escrow::model::EscrowTransaction;
use crate::notify::Notification;
use crate::payment::model::PaymentAuthorization;
use crate::store::{CREATED_AT, RecordStore, StoreError, UPDATED_AT};
use crate::users::{PhoneVerification, User};

pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub apply: fn(&RecordStore) -> Result<(), StoreError>,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "base tables",
        apply: base_tables,
    },
    Migration {
        version: 2,
        description: "service fee columns and per-document verification flags",
        apply: fee_and_verification_columns,
    },
];

/// Latest schema version known to this build.
pub const SCHEMA_VERSION: u32 = 2;

/// Bring `store` up to [`SCHEMA_VERSION`]; returns the resulting version.
pub fn migrate(store: &RecordStore) -> Result<u32, StoreError> {
    let mut current = store.schema_version()?;
    if current > SCHEMA_VERSION {
        warn!(
            file_version = current,
            known_version = SCHEMA_VERSION,
            "Store file was written by a newer schema; leaving it untouched"
        );
        return Ok(current);
    }

    let applied = current;
    for step in MIGRATIONS.iter().filter(|m| m.version > applied) {
        (step.apply)(store)?;
        store.set_schema_version(step.version)?;
        current = step.version;
        info!(version = step.version, step = step.description, "Migration applied");
    }
    Ok(current)
}

fn base_tables(store: &RecordStore) -> Result<(), StoreError> {
    store.ensure_table(
        EscrowTransaction::TABLE,
        &[
            "transactionId",
            "buyerId",
            "sellerId",
            "amount",
            "description",
            "status",
            "paymentMethod",
            "deliveryProof",
            "dueDate",
            "notes",
            CREATED_AT,
            UPDATED_AT,
            "completedAt",
        ],
    )?;
    store.ensure_table(
        User::TABLE,
        &["fullName", "email", "phone", "isVerified", CREATED_AT, UPDATED_AT],
    )?;
    store.ensure_table(PaymentAuthorization::TABLE, PaymentAuthorization::COLUMNS)?;
    store.ensure_table(Notification::TABLE, Notification::COLUMNS)?;
    store.ensure_table(PhoneVerification::TABLE, PhoneVerification::COLUMNS)?;
    store.ensure_table(Dispute::TABLE, Dispute::COLUMNS)
}

fn fee_and_verification_columns(store: &RecordStore) -> Result<(), StoreError> {
    store.ensure_table(EscrowTransaction::TABLE, EscrowTransaction::COLUMNS)?;
    store.ensure_table(User::TABLE, User::COLUMNS)
}
