//! User notifications
//!
//! Lifecycle and payment code emit notifications through [`NotificationSink`]
//! after their state change is persisted. Delivery is best-effort: a failing
//! sink is logged and never fails the operation that triggered it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::core_types::{RecordId, UserId};
use crate::entity::{self, Entity, MappingError, RowReader, put, put_time};
use crate::error::EscrowError;
use crate::store::{CREATED_AT, Fields, Filter, Record, RecordStore, UPDATED_AT, fields};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "success" => Ok(Severity::Success),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => Err(format!("unknown severity {other:?}")),
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn notify(
        &self,
        user_id: UserId,
        severity: Severity,
        title: &str,
        body: &str,
    ) -> Result<(), EscrowError>;
}

/// Send and swallow failures with a warning.
pub fn notify_best_effort(
    sink: &dyn NotificationSink,
    user_id: UserId,
    severity: Severity,
    title: &str,
    body: &str,
) {
    if let Err(e) = sink.notify(user_id, severity, title, body) {
        warn!(user_id, title, error = %e, "Notification delivery failed");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: RecordId,
    pub user_id: UserId,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl Entity for Notification {
    const TABLE: &'static str = "notifications";
    const COLUMNS: &'static [&'static str] = &[
        "userId", "severity", "title", "message", "isRead", CREATED_AT, UPDATED_AT,
    ];

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let row = RowReader::new(Self::TABLE, record);
        Ok(Self {
            id: row.id()?,
            user_id: row.parse("userId")?,
            // Unknown severities degrade to info rather than hiding the row
            severity: row.parse("severity").unwrap_or(Severity::Info),
            title: row.string("title"),
            message: row.string("message"),
            is_read: row.flag("isRead"),
            created_at: row.timestamp(CREATED_AT)?,
        })
    }

    fn to_fields(&self) -> Fields {
        let mut f = Fields::new();
        put(&mut f, "userId", self.user_id);
        put(&mut f, "severity", self.severity);
        put(&mut f, "title", &self.title);
        put(&mut f, "message", &self.message);
        put(&mut f, "isRead", self.is_read);
        put_time(&mut f, CREATED_AT, self.created_at.as_ref());
        f
    }
}

/// Persists notifications into the `notifications` table.
pub struct StoreNotifier {
    store: Arc<RecordStore>,
}

impl StoreNotifier {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    /// Newest first.
    pub fn list_for_user(&self, user_id: UserId) -> Result<Vec<Notification>, EscrowError> {
        let mut list: Vec<Notification> = entity::find_where(
            &self.store,
            &Filter::new().eq("userId", user_id.to_string()),
        )?;
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(list)
    }

    pub fn unread_count(&self, user_id: UserId) -> Result<usize, EscrowError> {
        Ok(self
            .list_for_user(user_id)?
            .iter()
            .filter(|n| !n.is_read)
            .count())
    }

    /// Mark one of `user_id`'s notifications as read.
    pub fn mark_read(&self, id: RecordId, user_id: UserId) -> Result<Notification, EscrowError> {
        let current: Notification = entity::find(&self.store, id)?
            .ok_or_else(|| EscrowError::not_found(format!("notification {id}")))?;
        if current.user_id != user_id {
            return Err(EscrowError::permission_denied(
                "notification belongs to another user",
            ));
        }
        if current.is_read {
            return Ok(current);
        }
        let record = self
            .store
            .update(Notification::TABLE, id, fields([("isRead", "true")]))?;
        Ok(Notification::from_record(&record)?)
    }
}

impl NotificationSink for StoreNotifier {
    fn notify(
        &self,
        user_id: UserId,
        severity: Severity,
        title: &str,
        body: &str,
    ) -> Result<(), EscrowError> {
        let notification = Notification {
            id: 0,
            user_id,
            severity,
            title: title.to_string(),
            message: body.to_string(),
            is_read: false,
            created_at: None,
        };
        entity::insert(&self.store, &notification)?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_store;

    #[test]
    fn test_store_notifier_roundtrip() {
        let (_dir, store) = temp_store();
        let notifier = StoreNotifier::new(store);

        notifier.notify(7, Severity::Info, "First", "one").unwrap();
        notifier.notify(7, Severity::Success, "Second", "two").unwrap();
        notifier.notify(8, Severity::Warning, "Other", "x").unwrap();

        let list = notifier.list_for_user(7).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].title, "Second");
        assert_eq!(list[0].severity, Severity::Success);
        assert_eq!(notifier.unread_count(7).unwrap(), 2);

        let read = notifier.mark_read(list[1].id, 7).unwrap();
        assert!(read.is_read);
        assert_eq!(notifier.unread_count(7).unwrap(), 1);
    }

    #[test]
    fn test_mark_read_checks_owner() {
        let (_dir, store) = temp_store();
        let notifier = StoreNotifier::new(store);
        notifier.notify(7, Severity::Info, "Mine", "").unwrap();
        let id = notifier.list_for_user(7).unwrap()[0].id;

        assert!(matches!(
            notifier.mark_read(id, 8),
            Err(EscrowError::PermissionDenied(_))
        ));
        assert!(matches!(
            notifier.mark_read(999, 7),
            Err(EscrowError::NotFound(_))
        ));
    }

    #[test]
    fn test_best_effort_swallows_failure() {
        notify_best_effort(&mock::FailingSink, 1, Severity::Info, "t", "b");
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!("WARNING".parse::<Severity>().unwrap(), Severity::Warning);
        assert!("loud".parse::<Severity>().is_err());
    }
}
