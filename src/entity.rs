//! Typed rows
//!
//! Each table has a struct implementing [`Entity`]: the table name, its
//! column list (used by migrations) and the mapping to and from a stored
//! [`Record`]. Services only handle typed values; raw string maps stop here.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::core_types::RecordId;
use crate::error::EscrowError;
use crate::store::{Fields, Filter, Record, RecordStore};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid value {value:?} in {table}.{column}: {reason}")]
pub struct MappingError {
    pub table: &'static str,
    pub column: &'static str,
    pub value: String,
    pub reason: String,
}

pub trait Entity: Sized {
    const TABLE: &'static str;
    /// Current column set, excluding `id`
    const COLUMNS: &'static [&'static str];

    fn from_record(record: &Record) -> Result<Self, MappingError>;

    /// Column values to persist. `id` is never included; unset timestamps
    /// are left out so the store stamps them.
    fn to_fields(&self) -> Fields;
}

// ============================================================
// Table access
// ============================================================

pub fn find<E: Entity>(store: &RecordStore, id: RecordId) -> Result<Option<E>, EscrowError> {
    match store.find_by_id(E::TABLE, id)? {
        Some(record) => Ok(Some(E::from_record(&record)?)),
        None => Ok(None),
    }
}

pub fn find_first<E: Entity>(store: &RecordStore, filter: &Filter) -> Result<Option<E>, EscrowError> {
    match store.find_one(E::TABLE, filter)? {
        Some(record) => Ok(Some(E::from_record(&record)?)),
        None => Ok(None),
    }
}

pub fn find_where<E: Entity>(store: &RecordStore, filter: &Filter) -> Result<Vec<E>, EscrowError> {
    store
        .find_many(E::TABLE, filter)?
        .iter()
        .map(|r| E::from_record(r).map_err(EscrowError::from))
        .collect()
}

pub fn insert<E: Entity>(store: &RecordStore, entity: &E) -> Result<E, EscrowError> {
    let record = store.create(E::TABLE, entity.to_fields())?;
    Ok(E::from_record(&record)?)
}

// ============================================================
// Column readers
// ============================================================

/// Typed accessors over one record, reporting failures against `table`.
pub(crate) struct RowReader<'a> {
    table: &'static str,
    record: &'a Record,
}

impl<'a> RowReader<'a> {
    pub fn new(table: &'static str, record: &'a Record) -> Self {
        Self { table, record }
    }

    fn err(&self, column: &'static str, reason: impl Display) -> MappingError {
        MappingError {
            table: self.table,
            column,
            value: self.record.get_or_empty(column).to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn id(&self) -> Result<RecordId, MappingError> {
        self.record
            .id()
            .ok_or_else(|| self.err("id", "not a numeric id"))
    }

    pub fn string(&self, column: &'static str) -> String {
        self.record.get_or_empty(column).to_string()
    }

    pub fn opt_string(&self, column: &'static str) -> Option<String> {
        let v = self.record.get_or_empty(column).trim();
        (!v.is_empty()).then(|| v.to_string())
    }

    pub fn parse<T>(&self, column: &'static str) -> Result<T, MappingError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.record
            .get_or_empty(column)
            .trim()
            .parse()
            .map_err(|e| self.err(column, e))
    }

    pub fn opt_parse<T>(&self, column: &'static str) -> Result<Option<T>, MappingError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.record.get_or_empty(column).trim() {
            "" => Ok(None),
            v => v.parse().map(Some).map_err(|e| self.err(column, e)),
        }
    }

    pub fn decimal(&self, column: &'static str) -> Result<Decimal, MappingError> {
        self.parse(column)
    }

    pub fn opt_decimal(&self, column: &'static str) -> Result<Option<Decimal>, MappingError> {
        self.opt_parse(column)
    }

    /// `"true"` (any case) is true; anything else, including empty, is false.
    pub fn flag(&self, column: &'static str) -> bool {
        self.record
            .get_or_empty(column)
            .trim()
            .eq_ignore_ascii_case("true")
    }

    pub fn timestamp(&self, column: &'static str) -> Result<Option<DateTime<Utc>>, MappingError> {
        match self.record.get_or_empty(column).trim() {
            "" => Ok(None),
            v => DateTime::parse_from_rfc3339(v)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| self.err(column, e)),
        }
    }
}

// ============================================================
// Column writers
// ============================================================

pub(crate) fn fmt_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub(crate) fn put(fields: &mut Fields, column: &str, value: impl ToString) {
    fields.insert(column.to_string(), value.to_string());
}

pub(crate) fn put_opt<T: ToString>(fields: &mut Fields, column: &str, value: Option<&T>) {
    fields.insert(
        column.to_string(),
        value.map(ToString::to_string).unwrap_or_default(),
    );
}

/// Timestamps are written only when set.
pub(crate) fn put_time(fields: &mut Fields, column: &str, value: Option<&DateTime<Utc>>) {
    if let Some(t) = value {
        fields.insert(column.to_string(), fmt_timestamp(t));
    }
}
