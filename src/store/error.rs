//! Store error types

use thiserror::Error;

use super::record::Record;
use crate::core_types::RecordId;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Backing file could not be opened or saved within the retry budget.
    #[error("Store file {path} unavailable after {attempts} attempts: {reason}")]
    Unavailable {
        path: String,
        attempts: u32,
        reason: String,
    },

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Record {id} not found in table {table}")]
    NotFound { table: String, id: RecordId },

    #[error("Unknown column {column} for table {table}")]
    UnknownColumn { table: String, column: String },

    /// Guard of a conditional write did not hold. Carries the row that
    /// violated it, if any.
    #[error("Write conflict on table {table}")]
    Conflict {
        table: String,
        current: Option<Box<Record>>,
    },

    #[error("Store file is corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
