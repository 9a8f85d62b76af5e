//! Escrow transactions
//!
//! - [`status`] - states and the transition graph
//! - [`fee`] - service fee policy and seller payout
//! - [`model`] - the stored transaction row
//! - [`service`] - lifecycle operations
//! - [`view`] - per-user read side (views, listing, stats)
//! - [`notice`] - notification texts
//! - [`dispute`] - dispute records and their review

pub mod dispute;
pub mod fee;
pub mod model;
pub mod notice;
pub mod service;
pub mod status;
pub mod view;

pub use dispute::{Dispute, DisputeDesk, DisputeStatus};
pub use fee::{FeePolicy, FeeQuote, ServiceChargeOption};
pub use model::{EscrowTransaction, NewTransaction, PartyRole};
pub use service::{CaptureStatus, CompletionOutcome, EscrowService};
pub use status::{Operation, TransactionStatus};
pub use view::{ListQuery, SortOrder, TransactionPage, TransactionView, UserStats};
