//! Escrow transaction states and the operations that move between them
//!
//! ```text
//! PENDING -> ACCEPTED -> FUNDED -> DELIVERED -> COMPLETED
//!    |          |
//!    +----------+--> CANCELLED
//!
//! any (or FUNDED / DELIVERED when restricted) --> DISPUTED
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Created by the buyer, awaiting the seller
    Pending,
    /// Seller agreed; funds may now be authorized
    Accepted,
    /// Funds frozen with the gateway
    Funded,
    /// Seller supplied delivery proof
    Delivered,
    /// Terminal: buyer released the funds
    Completed,
    /// Terminal
    Cancelled,
    /// Under review
    Disputed,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 7] = [
        TransactionStatus::Pending,
        TransactionStatus::Accepted,
        TransactionStatus::Funded,
        TransactionStatus::Delivered,
        TransactionStatus::Completed,
        TransactionStatus::Cancelled,
        TransactionStatus::Disputed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Accepted => "ACCEPTED",
            TransactionStatus::Funded => "FUNDED",
            TransactionStatus::Delivered => "DELIVERED",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Disputed => "DISPUTED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown transaction status {:?}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for TransactionStatus {
    type Err = UnknownStatus;

    /// Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        TransactionStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Who may perform an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Buyer,
    Seller,
    /// Either party
    Participant,
}

/// A lifecycle operation on an existing transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Accept,
    Fund,
    Deliver,
    Complete,
    Cancel,
    Dispute,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Accept => "accept",
            Operation::Fund => "fund",
            Operation::Deliver => "deliver",
            Operation::Complete => "complete",
            Operation::Cancel => "cancel",
            Operation::Dispute => "dispute",
        }
    }

    pub fn actor(&self) -> Actor {
        match self {
            Operation::Accept | Operation::Deliver => Actor::Seller,
            Operation::Fund | Operation::Complete => Actor::Buyer,
            Operation::Cancel | Operation::Dispute => Actor::Participant,
        }
    }

    pub fn target(&self) -> TransactionStatus {
        match self {
            Operation::Accept => TransactionStatus::Accepted,
            Operation::Fund => TransactionStatus::Funded,
            Operation::Deliver => TransactionStatus::Delivered,
            Operation::Complete => TransactionStatus::Completed,
            Operation::Cancel => TransactionStatus::Cancelled,
            Operation::Dispute => TransactionStatus::Disputed,
        }
    }

    /// Whether the operation may start from `from`.
    ///
    /// `restrict_disputes` limits disputes to funded or delivered
    /// transactions; otherwise a dispute may be raised from any status.
    pub fn allowed_from(&self, from: TransactionStatus, restrict_disputes: bool) -> bool {
        use TransactionStatus::*;
        match self {
            Operation::Accept => from == Pending,
            Operation::Fund => from == Accepted,
            Operation::Deliver => from == Funded,
            Operation::Complete => from == Delivered,
            Operation::Cancel => matches!(from, Pending | Accepted),
            Operation::Dispute if restrict_disputes => matches!(from, Funded | Delivered),
            Operation::Dispute => true,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
