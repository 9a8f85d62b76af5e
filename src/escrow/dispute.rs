//! Dispute records
//!
//! Filing a dispute moves the transaction to DISPUTED and opens an
//! UNDER_REVIEW record that an operator later resolves or rejects.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::service::EscrowService;
use crate::core_types::{EscrowId, RecordId, UserId};
use crate::entity::{self, Entity, MappingError, RowReader, fmt_timestamp, put, put_opt, put_time};
use crate::error::{EscrowError, ValidationError};
use crate::store::{CREATED_AT, Fields, Filter, Record, RecordStore, StoreError, UPDATED_AT, fields};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    UnderReview,
    Resolved,
    Rejected,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::UnderReview => "UNDER_REVIEW",
            DisputeStatus::Resolved => "RESOLVED",
            DisputeStatus::Rejected => "REJECTED",
        }
    }

    pub fn is_closed(&self) -> bool {
        !matches!(self, DisputeStatus::UnderReview)
    }
}

impl fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisputeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UNDER_REVIEW" => Ok(DisputeStatus::UnderReview),
            "RESOLVED" => Ok(DisputeStatus::Resolved),
            "REJECTED" => Ok(DisputeStatus::Rejected),
            other => Err(format!("unknown dispute status {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispute {
    pub id: RecordId,
    pub transaction_id: EscrowId,
    pub filed_by: UserId,
    pub reason: String,
    pub evidence: Option<String>,
    pub status: DisputeStatus,
    pub resolution: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Entity for Dispute {
    const TABLE: &'static str = "disputes";
    const COLUMNS: &'static [&'static str] = &[
        "transactionId",
        "filedBy",
        "reason",
        "evidence",
        "status",
        "resolution",
        CREATED_AT,
        UPDATED_AT,
        "resolvedAt",
    ];

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let row = RowReader::new(Self::TABLE, record);
        Ok(Self {
            id: row.id()?,
            transaction_id: row.parse("transactionId")?,
            filed_by: row.parse("filedBy")?,
            reason: row.string("reason"),
            evidence: row.opt_string("evidence"),
            status: row.parse("status")?,
            resolution: row.opt_string("resolution"),
            created_at: row.timestamp(CREATED_AT)?,
            updated_at: row.timestamp(UPDATED_AT)?,
            resolved_at: row.timestamp("resolvedAt")?,
        })
    }

    fn to_fields(&self) -> Fields {
        let mut f = Fields::new();
        put(&mut f, "transactionId", self.transaction_id);
        put(&mut f, "filedBy", self.filed_by);
        put(&mut f, "reason", &self.reason);
        put_opt(&mut f, "evidence", self.evidence.as_ref());
        put(&mut f, "status", self.status);
        put_opt(&mut f, "resolution", self.resolution.as_ref());
        put_time(&mut f, CREATED_AT, self.created_at.as_ref());
        put_time(&mut f, UPDATED_AT, self.updated_at.as_ref());
        put_time(&mut f, "resolvedAt", self.resolved_at.as_ref());
        f
    }
}

pub struct DisputeDesk {
    store: Arc<RecordStore>,
    escrow: Arc<EscrowService>,
}

impl DisputeDesk {
    pub fn new(store: Arc<RecordStore>, escrow: Arc<EscrowService>) -> Self {
        Self { store, escrow }
    }

    /// Dispute `tx_id` on behalf of `actor` and open a review record.
    pub fn file(
        &self,
        tx_id: EscrowId,
        actor: UserId,
        reason: &str,
        evidence: Option<&str>,
    ) -> Result<Dispute, EscrowError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::MissingField("reason").into());
        }

        self.escrow.dispute(tx_id, actor, Some(reason))?;

        let draft = Dispute {
            id: 0,
            transaction_id: tx_id,
            filed_by: actor,
            reason: reason.to_string(),
            evidence: evidence
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string),
            status: DisputeStatus::UnderReview,
            resolution: None,
            created_at: None,
            updated_at: None,
            resolved_at: None,
        };
        let dispute = entity::insert(&self.store, &draft)?;
        info!(dispute_id = dispute.id, tx_id, filed_by = actor, "Dispute filed");
        Ok(dispute)
    }

    /// Close an open dispute as RESOLVED or REJECTED.
    pub fn resolve(
        &self,
        id: RecordId,
        outcome: DisputeStatus,
        resolution: &str,
    ) -> Result<Dispute, EscrowError> {
        if !outcome.is_closed() {
            return Err(ValidationError::UnknownStatus(outcome.to_string()).into());
        }
        let current: Dispute = entity::find(&self.store, id)?
            .ok_or_else(|| EscrowError::not_found(format!("dispute {id}")))?;
        if current.status.is_closed() {
            return Err(ValidationError::DisputeClosed.into());
        }

        let update = fields([
            ("status", outcome.as_str().to_string()),
            ("resolution", resolution.trim().to_string()),
            ("resolvedAt", fmt_timestamp(&Utc::now())),
        ]);
        let record = self
            .store
            .update_if(
                Dispute::TABLE,
                id,
                &Filter::new().eq("status", DisputeStatus::UnderReview.as_str()),
                update,
            )
            .map_err(|e| match e {
                StoreError::Conflict { .. } => EscrowError::from(ValidationError::DisputeClosed),
                other => EscrowError::from(other),
            })?;
        let closed = Dispute::from_record(&record)?;
        info!(dispute_id = id, tx_id = closed.transaction_id, outcome = %outcome, "Dispute closed");
        Ok(closed)
    }

    pub fn get(&self, id: RecordId) -> Result<Option<Dispute>, EscrowError> {
        entity::find(&self.store, id)
    }

    pub fn list_filed_by(&self, user_id: UserId) -> Result<Vec<Dispute>, EscrowError> {
        entity::find_where(&self.store, &Filter::new().eq("filedBy", user_id.to_string()))
    }

    pub fn list_by_status(&self, status: DisputeStatus) -> Result<Vec<Dispute>, EscrowError> {
        entity::find_where(&self.store, &Filter::new().eq("status", status.as_str()))
    }
}
