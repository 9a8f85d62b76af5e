//! Core types used throughout the system
//!
//! Type aliases shared by the store, the escrow lifecycle and the payment
//! coordinator. Every identifier here is the numeric `id` column of a row.

/// Row ID - unique within its table, assigned by the store.
///
/// # Constraints:
/// - **Immutable**: Once assigned, NEVER changes
/// - **Monotonic**: `max(existing) + 1`, starting at 1
pub type RecordId = u64;

/// User ID - primary key of the `users` table.
pub type UserId = u64;

/// Escrow transaction ID - primary key of the `transactions` table.
///
/// Not to be confused with the human-readable `TXN-XXXXXXXX` reference.
pub type EscrowId = u64;
