use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::fee::ServiceChargeOption;
use super::status::TransactionStatus;
use crate::core_types::{EscrowId, UserId};
use crate::entity::{Entity, MappingError, RowReader, put, put_opt, put_time};
use crate::store::{CREATED_AT, Fields, Record, UPDATED_AT};

/// Prefix of the human-facing transaction reference
pub const REFERENCE_PREFIX: &str = "TXN-";

/// A row of the `transactions` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowTransaction {
    pub id: EscrowId,
    /// `TXN-XXXXXXXX`, fixed at creation
    pub transaction_id: String,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub amount: Decimal,
    pub description: String,
    pub status: TransactionStatus,
    /// Empty until the buyer funds the transaction
    pub payment_method: String,
    pub delivery_proof: String,
    pub due_date: Option<String>,
    /// Newline-separated reasons, append only
    pub notes: String,
    /// `None` on rows written before fees existed
    pub service_charge_option: Option<ServiceChargeOption>,
    pub service_fee: Option<Decimal>,
    pub total_amount: Option<Decimal>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Which side of a transaction a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyRole {
    Buyer,
    Seller,
}

impl EscrowTransaction {
    pub fn role_of(&self, user_id: UserId) -> Option<PartyRole> {
        if user_id == self.buyer_id {
            Some(PartyRole::Buyer)
        } else if user_id == self.seller_id {
            Some(PartyRole::Seller)
        } else {
            None
        }
    }

    /// Rows predating fee options are treated as buyer-pays.
    pub fn charge_option(&self) -> ServiceChargeOption {
        self.service_charge_option
            .unwrap_or(ServiceChargeOption::BuyerPays)
    }

    /// What the buyer pays: the stored total, or the bare amount on old rows.
    pub fn payable_amount(&self) -> Decimal {
        self.total_amount.unwrap_or(self.amount)
    }

    /// `notes` with `line` appended on its own line.
    pub fn notes_with(&self, line: &str) -> String {
        if self.notes.is_empty() {
            line.to_string()
        } else {
            format!("{}\n{}", self.notes, line)
        }
    }
}

impl Entity for EscrowTransaction {
    const TABLE: &'static str = "transactions";
    const COLUMNS: &'static [&'static str] = &[
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
        "serviceChargeOption",
        "serviceFee",
        "totalAmount",
        CREATED_AT,
        UPDATED_AT,
        "completedAt",
    ];

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let row = RowReader::new(Self::TABLE, record);
        Ok(Self {
            id: row.id()?,
            transaction_id: row.string("transactionId"),
            buyer_id: row.parse("buyerId")?,
            seller_id: row.parse("sellerId")?,
            amount: row.decimal("amount")?,
            description: row.string("description"),
            status: row.parse("status")?,
            payment_method: row.string("paymentMethod"),
            delivery_proof: row.string("deliveryProof"),
            due_date: row.opt_string("dueDate"),
            notes: row.string("notes"),
            service_charge_option: row.opt_parse("serviceChargeOption")?,
            service_fee: row.opt_decimal("serviceFee")?,
            total_amount: row.opt_decimal("totalAmount")?,
            created_at: row.timestamp(CREATED_AT)?,
            updated_at: row.timestamp(UPDATED_AT)?,
            completed_at: row.timestamp("completedAt")?,
        })
    }

    fn to_fields(&self) -> Fields {
        let mut f = Fields::new();
        put(&mut f, "transactionId", &self.transaction_id);
        put(&mut f, "buyerId", self.buyer_id);
        put(&mut f, "sellerId", self.seller_id);
        put(&mut f, "amount", self.amount);
        put(&mut f, "description", &self.description);
        put(&mut f, "status", self.status);
        put(&mut f, "paymentMethod", &self.payment_method);
        put(&mut f, "deliveryProof", &self.delivery_proof);
        put_opt(&mut f, "dueDate", self.due_date.as_ref());
        put(&mut f, "notes", &self.notes);
        put_opt(&mut f, "serviceChargeOption", self.service_charge_option.as_ref());
        put_opt(&mut f, "serviceFee", self.service_fee.as_ref());
        put_opt(&mut f, "totalAmount", self.total_amount.as_ref());
        put_time(&mut f, CREATED_AT, self.created_at.as_ref());
        put_time(&mut f, UPDATED_AT, self.updated_at.as_ref());
        put_time(&mut f, "completedAt", self.completed_at.as_ref());
        f
    }
}

/// Input to `EscrowService::create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub seller_id: UserId,
    pub amount: Decimal,
    pub description: String,
    pub due_date: Option<String>,
    pub notes: Option<String>,
    /// `BUYER_PAYS`, `SPLIT` or `SELLER_PAYS`
    pub service_charge_option: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fields;

    fn v1_row() -> Record {
        Record::from(fields([
            ("id", "5"),
            ("transactionId", "TXN-0000ABCD"),
            ("buyerId", "1"),
            ("sellerId", "2"),
            ("amount", "250.00"),
            ("description", "Camera"),
            ("status", "FUNDED"),
            ("paymentMethod", "mobile_wallet"),
            ("deliveryProof", ""),
            ("dueDate", ""),
            ("notes", ""),
            ("createdAt", "2024-05-01T10:00:00.000Z"),
            ("updatedAt", "2024-05-01T10:00:00.000Z"),
            ("completedAt", ""),
        ]))
    }

    #[test]
    fn test_old_row_maps_with_defaults() {
        let tx = EscrowTransaction::from_record(&v1_row()).unwrap();
        assert_eq!(tx.status, TransactionStatus::Funded);
        assert_eq!(tx.service_charge_option, None);
        assert_eq!(tx.charge_option(), ServiceChargeOption::BuyerPays);
        assert_eq!(tx.payable_amount(), Decimal::new(25000, 2));
        assert_eq!(tx.due_date, None);
        assert!(tx.completed_at.is_none());
    }

    #[test]
    fn test_roles() {
        let tx = EscrowTransaction::from_record(&v1_row()).unwrap();
        assert_eq!(tx.role_of(1), Some(PartyRole::Buyer));
        assert_eq!(tx.role_of(2), Some(PartyRole::Seller));
        assert_eq!(tx.role_of(3), None);
    }

    #[test]
    fn test_notes_append() {
        let mut tx = EscrowTransaction::from_record(&v1_row()).unwrap();
        assert_eq!(tx.notes_with("first"), "first");
        tx.notes = "first".into();
        assert_eq!(tx.notes_with("second"), "first\nsecond");
    }

    #[test]
    fn test_unknown_status_is_mapping_error() {
        let mut f = v1_row().into_fields();
        f.insert("status".into(), "SHIPPED".into());
        let err = EscrowTransaction::from_record(&Record::from(f)).unwrap_err();
        assert_eq!(err.column, "status");
        assert_eq!(err.value, "SHIPPED");
    }

    #[test]
    fn test_to_fields_skips_id_and_unset_times() {
        let tx = EscrowTransaction::from_record(&v1_row()).unwrap();
        let f = tx.to_fields();
        assert!(!f.contains_key("id"));
        assert!(!f.contains_key("completedAt"));
        assert_eq!(f["serviceFee"], "");
        assert_eq!(f["status"], "FUNDED");
    }
}
