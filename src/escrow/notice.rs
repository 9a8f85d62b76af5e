//! Notification texts for lifecycle and payment events

use rust_decimal::Decimal;

use super::model::EscrowTransaction;
use super::status::TransactionStatus;
use crate::core_types::UserId;
use crate::notify::{NotificationSink, Severity, notify_best_effort};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub user_id: UserId,
    pub severity: Severity,
    pub title: &'static str,
    pub body: String,
}

impl Notice {
    fn new(user_id: UserId, severity: Severity, title: &'static str, body: String) -> Self {
        Self {
            user_id,
            severity,
            title,
            body,
        }
    }

    pub fn send(&self, sink: &dyn NotificationSink) {
        notify_best_effort(sink, self.user_id, self.severity, self.title, &self.body);
    }
}

pub fn send_all(sink: &dyn NotificationSink, notices: &[Notice]) {
    for notice in notices {
        notice.send(sink);
    }
}

/// Messages for both parties once `tx` has entered `status`.
pub fn status_notices(tx: &EscrowTransaction, status: TransactionStatus) -> Vec<Notice> {
    use Severity::*;
    use TransactionStatus::*;

    let what = format!("{} (ID: {})", tx.description, tx.transaction_id);
    let (buyer, seller) = (tx.buyer_id, tx.seller_id);

    match status {
        Pending => vec![Notice::new(
            seller,
            Info,
            "New Transaction",
            format!("A buyer has opened a transaction with you: {what}. Please review and accept it."),
        )],
        Accepted => vec![
            Notice::new(
                buyer,
                Info,
                "Transaction Accepted",
                format!("Seller has accepted your transaction: {what}. Please make payment to escrow."),
            ),
            Notice::new(
                seller,
                Success,
                "Transaction Accepted",
                format!("You have accepted the transaction: {what}. Awaiting buyer payment."),
            ),
        ],
        Funded => vec![
            Notice::new(
                seller,
                Info,
                "Payment Received",
                format!("Buyer has made payment for transaction: {what}. Please deliver the goods or service."),
            ),
            Notice::new(
                buyer,
                Success,
                "Payment Sent",
                format!("Your payment has been sent to escrow for transaction: {what}. Awaiting delivery."),
            ),
        ],
        Delivered => vec![
            Notice::new(
                buyer,
                Info,
                "Delivery Completed",
                format!("Seller has marked transaction as delivered: {what}. Please confirm if you received it."),
            ),
            Notice::new(
                seller,
                Success,
                "Delivery Marked",
                format!("You have marked the transaction as delivered: {what}. Awaiting buyer confirmation."),
            ),
        ],
        Completed => vec![
            Notice::new(
                seller,
                Success,
                "Transaction Completed",
                format!("Transaction completed! Payment released for: {what}."),
            ),
            Notice::new(
                buyer,
                Success,
                "Transaction Completed",
                format!("Transaction completed successfully: {what}."),
            ),
        ],
        Cancelled => [buyer, seller]
            .into_iter()
            .map(|user| {
                Notice::new(
                    user,
                    Warning,
                    "Transaction Cancelled",
                    format!("Transaction has been cancelled: {what}."),
                )
            })
            .collect(),
        Disputed => [buyer, seller]
            .into_iter()
            .map(|user| {
                Notice::new(
                    user,
                    Warning,
                    "Dispute Filed",
                    format!("A dispute has been filed for transaction: {what}. An administrator will review it."),
                )
            })
            .collect(),
    }
}

/// Buyer notice once funds are frozen.
pub fn authorized_notice(tx: &EscrowTransaction, amount: Decimal) -> Notice {
    Notice::new(
        tx.buyer_id,
        Severity::Info,
        "Payment Authorized",
        format!(
            "{amount:.2} has been frozen for transaction {}. It will be captured once you confirm completion.",
            tx.transaction_id
        ),
    )
}

/// Notices to both parties after a successful capture.
pub fn captured_notices(
    tx: &EscrowTransaction,
    payout: Decimal,
    buyer_name: &str,
    seller_name: &str,
) -> Vec<Notice> {
    vec![
        Notice::new(
            tx.buyer_id,
            Severity::Success,
            "Payment Captured",
            format!(
                "{payout:.2} has been transferred to {seller_name} for transaction {}",
                tx.transaction_id
            ),
        ),
        Notice::new(
            tx.seller_id,
            Severity::Success,
            "Payment Received",
            format!(
                "{payout:.2} has been transferred from {buyer_name} for transaction {}",
                tx.transaction_id
            ),
        ),
    ]
}

/// Warnings to both parties when completion could not capture funds.
pub fn capture_failed_notices(tx: &EscrowTransaction, reason: &str) -> Vec<Notice> {
    [tx.buyer_id, tx.seller_id]
        .into_iter()
        .map(|user| {
            Notice::new(
                user,
                Severity::Warning,
                "Payment Capture Pending",
                format!(
                    "Transaction {} is complete but the payment could not be captured yet ({reason}). Support has been notified.",
                    tx.transaction_id
                ),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::store::{Record, fields};

    fn tx() -> EscrowTransaction {
        EscrowTransaction::from_record(&Record::from(fields([
            ("id", "1"),
            ("transactionId", "TXN-1234ABCD"),
            ("buyerId", "10"),
            ("sellerId", "20"),
            ("amount", "1000"),
            ("description", "Laptop"),
            ("status", "DELIVERED"),
        ])))
        .unwrap()
    }

    #[test]
    fn test_every_status_has_notices() {
        let tx = tx();
        for status in TransactionStatus::ALL {
            let notices = status_notices(&tx, status);
            assert!(!notices.is_empty(), "{status}");
            for n in &notices {
                assert!(n.body.contains("TXN-1234ABCD"));
            }
        }
    }

    #[test]
    fn test_completed_reaches_both_parties() {
        let notices = status_notices(&tx(), TransactionStatus::Completed);
        let users: Vec<_> = notices.iter().map(|n| n.user_id).collect();
        assert_eq!(users, vec![20, 10]);
    }

    #[test]
    fn test_capture_texts() {
        let notices = captured_notices(&tx(), Decimal::new(99000, 2), "Rahim", "Karim");
        assert_eq!(
            notices[0].body,
            "990.00 has been transferred to Karim for transaction TXN-1234ABCD"
        );
        assert_eq!(notices[1].title, "Payment Received");
        assert!(notices[1].body.contains("from Rahim"));
    }
}
