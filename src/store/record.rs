//! Record and filter types

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core_types::RecordId;

/// Name of the primary key column (always column 0).
pub const ID: &str = "id";

/// Stamped on create when the table declares it.
pub const CREATED_AT: &str = "createdAt";

/// Stamped on every write when the table declares it.
pub const UPDATED_AT: &str = "updatedAt";

/// Column values keyed by column name.
pub type Fields = BTreeMap<String, String>;

/// A stored row: column name -> string value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: Fields,
}

impl Record {
    pub(crate) fn from_row(header: &[String], row: &[String]) -> Self {
        let fields = header
            .iter()
            .enumerate()
            .map(|(i, col)| (col.clone(), row.get(i).cloned().unwrap_or_default()))
            .collect();
        Self { fields }
    }

    /// Numeric id, `None` if the cell is not a number.
    pub fn id(&self) -> Option<RecordId> {
        self.get(ID).and_then(|v| v.trim().parse().ok())
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    /// Value of `column`, empty string when absent.
    pub fn get_or_empty(&self, column: &str) -> &str {
        self.get(column).unwrap_or("")
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }
}

impl From<Fields> for Record {
    fn from(fields: Fields) -> Self {
        Self { fields }
    }
}

/// Exact-match conjunction over named columns.
///
/// A column missing from the row never matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    terms: Vec<(String, String)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `column == value` term.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.terms.push((column.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.terms
            .iter()
            .all(|(col, val)| record.get(col) == Some(val.as_str()))
    }
}

/// Build a [`Fields`] map from `(column, value)` pairs.
pub fn fields<K, V, I>(pairs: I) -> Fields
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<String> {
        vec!["id".into(), "name".into(), "status".into()]
    }

    #[test]
    fn test_from_row_pads_missing_cells() {
        let record = Record::from_row(&header(), &["7".into(), "alice".into()]);
        assert_eq!(record.id(), Some(7));
        assert_eq!(record.get("name"), Some("alice"));
        assert_eq!(record.get("status"), Some(""));
        assert_eq!(record.get("missing"), None);
    }

    #[test]
    fn test_non_numeric_id() {
        let record = Record::from_row(&header(), &["abc".into()]);
        assert_eq!(record.id(), None);
    }

    #[test]
    fn test_filter_conjunction() {
        let record = Record::from_row(&header(), &["1".into(), "bob".into(), "OPEN".into()]);

        assert!(Filter::new().matches(&record));
        assert!(Filter::new().eq("name", "bob").matches(&record));
        assert!(
            Filter::new()
                .eq("name", "bob")
                .eq("status", "OPEN")
                .matches(&record)
        );
        assert!(
            !Filter::new()
                .eq("name", "bob")
                .eq("status", "CLOSED")
                .matches(&record)
        );
        // Unknown column never matches, even against an empty value
        assert!(!Filter::new().eq("nope", "").matches(&record));
    }
}
