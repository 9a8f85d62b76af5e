//! Read side: enriched transaction views for API responses

use std::str::FromStr;

use serde::Serialize;

use super::model::{EscrowTransaction, PartyRole};
use super::service::EscrowService;
use super::status::TransactionStatus;
use crate::core_types::{EscrowId, UserId};
use crate::entity;
use crate::error::{EscrowError, ValidationError};
use crate::store::Filter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartySummary {
    pub id: UserId,
    pub full_name: String,
}

/// A transaction as seen by one of its parties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    #[serde(flatten)]
    pub transaction: EscrowTransaction,
    /// `None` when the user record is gone
    pub buyer: Option<PartySummary>,
    pub seller: Option<PartySummary>,
    pub user_role: PartyRole,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

impl FromStr for SortOrder {
    type Err = std::convert::Infallible;

    /// `oldest`/`asc` sort ascending; anything else is newest first.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "oldest" | "asc" => SortOrder::Oldest,
            _ => SortOrder::Newest,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// `None` lists every status
    pub status: Option<TransactionStatus>,
    /// Page size; `None` or 0 returns everything
    pub limit: Option<usize>,
    /// 1-based
    pub page: Option<usize>,
    pub sort: SortOrder,
}

impl ListQuery {
    /// Parse a status filter where `all` (or empty) means no filter.
    pub fn status_filter(s: &str) -> Result<Option<TransactionStatus>, EscrowError> {
        match s.trim() {
            "" => Ok(None),
            v if v.eq_ignore_ascii_case("all") => Ok(None),
            v => v
                .parse()
                .map(Some)
                .map_err(|_| ValidationError::UnknownStatus(v.to_string()).into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPage {
    pub transactions: Vec<TransactionView>,
    /// Matches before pagination
    pub total: usize,
    pub page: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total_transactions: usize,
    pub completed_transactions: usize,
    pub pending_transactions: usize,
    pub disputed_transactions: usize,
}

impl EscrowService {
    /// Transaction `tx_id` as seen by `user_id`, who must be a verified
    /// participant.
    pub fn get_for_user(
        &self,
        tx_id: EscrowId,
        user_id: UserId,
    ) -> Result<TransactionView, EscrowError> {
        let tx = self.load_for_participant(tx_id, user_id)?;
        self.view_of(tx, user_id)
    }

    /// Lookup by `TXN-` reference, with the same access rules.
    pub fn find_by_reference(
        &self,
        reference: &str,
        user_id: UserId,
    ) -> Result<TransactionView, EscrowError> {
        let tx: EscrowTransaction = entity::find_first(
            &self.store,
            &Filter::new().eq("transactionId", reference.trim()),
        )?
        .ok_or_else(|| EscrowError::not_found(format!("transaction {reference}")))?;
        let tx = self.load_for_participant(tx.id, user_id)?;
        self.view_of(tx, user_id)
    }

    /// Transactions where `user_id` is buyer or seller.
    pub fn list_for_user(
        &self,
        user_id: UserId,
        query: &ListQuery,
    ) -> Result<TransactionPage, EscrowError> {
        let mut mine: Vec<EscrowTransaction> = self
            .transactions_of(user_id)?
            .into_iter()
            .filter(|tx| query.status.is_none_or(|s| tx.status == s))
            .collect();

        mine.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if query.sort == SortOrder::Newest {
            mine.reverse();
        }

        let total = mine.len();
        let page = query.page.unwrap_or(1).max(1);
        let selected: Vec<EscrowTransaction> = match query.limit.filter(|l| *l > 0) {
            Some(limit) => mine
                .into_iter()
                .skip((page - 1).saturating_mul(limit))
                .take(limit)
                .collect(),
            None => mine,
        };

        let transactions = selected
            .into_iter()
            .map(|tx| self.view_of(tx, user_id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TransactionPage {
            transactions,
            total,
            page,
            limit: query.limit,
        })
    }

    pub fn stats_for_user(&self, user_id: UserId) -> Result<UserStats, EscrowError> {
        let mine = self.transactions_of(user_id)?;
        let count = |status: TransactionStatus| mine.iter().filter(|t| t.status == status).count();
        Ok(UserStats {
            total_transactions: mine.len(),
            completed_transactions: count(TransactionStatus::Completed),
            pending_transactions: count(TransactionStatus::Pending),
            disputed_transactions: count(TransactionStatus::Disputed),
        })
    }

    fn transactions_of(&self, user_id: UserId) -> Result<Vec<EscrowTransaction>, EscrowError> {
        let id = user_id.to_string();
        let mut mine: Vec<EscrowTransaction> =
            entity::find_where(&self.store, &Filter::new().eq("buyerId", id.as_str()))?;
        mine.extend(entity::find_where::<EscrowTransaction>(
            &self.store,
            &Filter::new().eq("sellerId", id.as_str()),
        )?);
        Ok(mine)
    }

    fn view_of(&self, tx: EscrowTransaction, user_id: UserId) -> Result<TransactionView, EscrowError> {
        let user_role = tx.role_of(user_id).ok_or_else(|| {
            EscrowError::permission_denied("not a participant in this transaction")
        })?;
        let buyer = self.party(tx.buyer_id)?;
        let seller = self.party(tx.seller_id)?;
        Ok(TransactionView {
            transaction: tx,
            buyer,
            seller,
            user_role,
        })
    }

    fn party(&self, user_id: UserId) -> Result<Option<PartySummary>, EscrowError> {
        Ok(self.users.resolve(user_id)?.map(|p| PartySummary {
            id: p.user_id,
            full_name: p.display_name,
        }))
    }
}
