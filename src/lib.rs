//! Escrow Engine - marketplace escrow core
//!
//! A buyer opens a transaction, the seller accepts, funds are frozen with a
//! payment gateway, the seller delivers and the buyer releases the funds.
//!
//! # Modules
//!
//! - [`core_types`] - Row identifiers (RecordId, UserId, EscrowId)
//! - [`store`] - File-backed keyed-table record store
//! - [`schema`] - Versioned store migrations
//! - [`entity`] - Typed rows over store records
//! - [`escrow`] - Transaction lifecycle, fees, views and disputes
//! - [`payment`] - Two-phase gateway authorize/capture
//! - [`users`] - User directory and phone verification codes
//! - [`notify`] - User notifications
//! - [`config`] / [`logging`] - Runtime configuration and tracing setup

// Core types - must be first!
pub mod core_types;

// Persistence
pub mod entity;
pub mod schema;
pub mod store;

// Domain
pub mod escrow;
pub mod notify;
pub mod payment;
pub mod users;

// Ambient
pub mod config;
pub mod error;
pub mod logging;

#[cfg(test)]
pub(crate) mod test_support;

// Convenient re-exports at crate root
pub use core_types::{EscrowId, RecordId, UserId};
pub use error::{EscrowError, ValidationError};
pub use escrow::{EscrowService, EscrowTransaction, TransactionStatus};
pub use payment::{PaymentCoordinator, PaymentGateway};
pub use store::{RecordStore, StoreError};
