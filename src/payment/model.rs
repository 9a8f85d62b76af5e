//! `payment_authorizations` rows
//!
//! One row per funded transaction. It is inserted in the `authorization`
//! phase and promoted in place to `capture`; a second row is never added.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::core_types::{EscrowId, RecordId};
use crate::entity::{Entity, MappingError, RowReader, put, put_time};
use crate::store::{CREATED_AT, Fields, Record, UPDATED_AT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentPhase {
    /// Funds frozen, awaiting capture
    Authorization,
    /// Funds released to the seller
    Capture,
}

impl PaymentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPhase::Authorization => "authorization",
            PaymentPhase::Capture => "capture",
        }
    }
}

impl fmt::Display for PaymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "authorization" => Ok(PaymentPhase::Authorization),
            "capture" => Ok(PaymentPhase::Capture),
            other => Err(format!("unknown payment phase {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorization {
    pub id: RecordId,
    /// `transactions.id`
    pub transaction_id: EscrowId,
    pub gateway_payment_id: String,
    /// Set by the gateway on capture
    pub gateway_txn_id: String,
    pub phase: PaymentPhase,
    /// Last gateway status code
    pub status: String,
    pub amount: Decimal,
    /// Payer account reference
    pub counterparty_ref: String,
    pub invoice_ref: String,
    #[serde(skip_serializing)]
    pub auth_token: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PaymentAuthorization {
    pub fn is_open(&self) -> bool {
        self.phase == PaymentPhase::Authorization
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }
}

impl Entity for PaymentAuthorization {
    const TABLE: &'static str = "payment_authorizations";
    const COLUMNS: &'static [&'static str] = &[
        "transactionId",
        "gatewayPaymentId",
        "gatewayTxnId",
        "phase",
        "status",
        "amount",
        "counterpartyRef",
        "invoiceRef",
        "authToken",
        CREATED_AT,
        UPDATED_AT,
        "expiresAt",
    ];

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let row = RowReader::new(Self::TABLE, record);
        Ok(Self {
            id: row.id()?,
            transaction_id: row.parse("transactionId")?,
            gateway_payment_id: row.string("gatewayPaymentId"),
            gateway_txn_id: row.string("gatewayTxnId"),
            phase: row.parse("phase")?,
            status: row.string("status"),
            amount: row.decimal("amount")?,
            counterparty_ref: row.string("counterpartyRef"),
            invoice_ref: row.string("invoiceRef"),
            auth_token: row.string("authToken"),
            created_at: row.timestamp(CREATED_AT)?,
            updated_at: row.timestamp(UPDATED_AT)?,
            expires_at: row.timestamp("expiresAt")?,
        })
    }

    fn to_fields(&self) -> Fields {
        let mut f = Fields::new();
        put(&mut f, "transactionId", self.transaction_id);
        put(&mut f, "gatewayPaymentId", &self.gateway_payment_id);
        put(&mut f, "gatewayTxnId", &self.gateway_txn_id);
        put(&mut f, "phase", self.phase);
        put(&mut f, "status", &self.status);
        put(&mut f, "amount", self.amount);
        put(&mut f, "counterpartyRef", &self.counterparty_ref);
        put(&mut f, "invoiceRef", &self.invoice_ref);
        put(&mut f, "authToken", &self.auth_token);
        put_time(&mut f, CREATED_AT, self.created_at.as_ref());
        put_time(&mut f, UPDATED_AT, self.updated_at.as_ref());
        put_time(&mut f, "expiresAt", self.expires_at.as_ref());
        f
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fields;

    #[test]
    fn test_from_record() {
        let record = Record::from(fields([
            ("id", "3"),
            ("transactionId", "12"),
            ("gatewayPaymentId", "PAY1"),
            ("gatewayTxnId", ""),
            ("phase", "authorization"),
            ("status", "0000"),
            ("amount", "1010.00"),
            ("counterpartyRef", "017"),
            ("invoiceRef", "TXN-AAAA0001"),
            ("authToken", "tok"),
            ("createdAt", "2024-05-01T10:00:00.000Z"),
            ("updatedAt", "2024-05-01T10:00:00.000Z"),
            ("expiresAt", "2024-05-02T10:00:00.000Z"),
        ]));

        let auth = PaymentAuthorization::from_record(&record).unwrap();
        assert_eq!(auth.transaction_id, 12);
        assert!(auth.is_open());
        assert_eq!(auth.amount, Decimal::new(101000, 2));

        let later = DateTime::parse_from_rfc3339("2024-05-03T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(auth.is_expired_at(later));

        let fields = auth.to_fields();
        assert!(!fields.contains_key("id"));
        assert_eq!(fields["phase"], "authorization");
    }

    #[test]
    fn test_bad_phase_is_mapping_error() {
        let record = Record::from(fields([
            ("id", "1"),
            ("transactionId", "1"),
            ("phase", "refund"),
            ("amount", "1"),
        ]));
        let err = PaymentAuthorization::from_record(&record).unwrap_err();
        assert_eq!(err.column, "phase");
    }

    #[test]
    fn test_token_not_serialized() {
        let record = Record::from(fields([
            ("id", "1"),
            ("transactionId", "1"),
            ("phase", "capture"),
            ("amount", "5"),
            ("authToken", "secret"),
        ]));
        let auth = PaymentAuthorization::from_record(&record).unwrap();
        let json = serde_json::to_string(&auth).unwrap();
        assert!(!json.contains("secret"));
    }
}
