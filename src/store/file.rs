//! On-disk layout of the store file
//!
//! One JSON document holds every table:
//!
//! ```text
//! {
//!   "schemaVersion": 2,
//!   "tables": {
//!     "transactions": { "header": ["id", ...], "rows": [["1", ...], ...] }
//!   }
//! }
//! ```
//!
//! Every write rewrites the whole document through a sibling temp file and an
//! atomic rename, so readers never observe a half-written file.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::StoreError;
use super::record::{Fields, ID, Record};
use crate::core_types::RecordId;

// ============================================================
// Retry policy
// ============================================================

/// Bounded retry around physical open/save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or the attempt budget is spent.
    pub(crate) fn run<T>(
        &self,
        path: &Path,
        what: &str,
        mut op: impl FnMut() -> io::Result<T>,
    ) -> Result<T, StoreError> {
        let attempts = self.attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        attempt,
                        attempts,
                        error = %e,
                        "Store {} failed",
                        what
                    );
                    last_err = Some(e);
                    if attempt < attempts {
                        thread::sleep(self.delay);
                    }
                }
            }
        }

        Err(StoreError::Unavailable {
            path: path.display().to_string(),
            attempts,
            reason: last_err.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

// ============================================================
// File model
// ============================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoreFile {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub tables: BTreeMap<String, TableData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct TableData {
    pub header: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

impl TableData {
    /// New table; `id` is forced into column 0.
    pub fn with_header(columns: &[&str]) -> Self {
        let mut table = TableData {
            header: vec![ID.to_string()],
            rows: Vec::new(),
        };
        table.extend_header(columns);
        table
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.header.iter().any(|c| c == column)
    }

    /// Append any missing columns; existing columns are never removed or
    /// reordered. Returns whether the header changed.
    pub fn extend_header(&mut self, columns: &[&str]) -> bool {
        let before = self.header.len();
        for col in columns {
            if !self.has_column(col) {
                self.header.push((*col).to_string());
            }
        }
        let changed = self.header.len() != before;
        if changed {
            let width = self.header.len();
            for row in &mut self.rows {
                if row.len() < width {
                    row.resize(width, String::new());
                }
            }
        }
        changed
    }

    /// Reject any supplied column the header does not declare.
    pub fn check_columns(&self, table: &str, fields: &Fields) -> Result<(), StoreError> {
        match fields.keys().find(|k| !self.has_column(k)) {
            Some(col) => Err(StoreError::UnknownColumn {
                table: table.to_string(),
                column: col.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| Record::from_row(&self.header, row))
            .collect()
    }

    pub fn record_at(&self, index: usize) -> Option<Record> {
        self.rows
            .get(index)
            .map(|row| Record::from_row(&self.header, row))
    }

    /// Physical index of the row whose column 0 equals `id`.
    pub fn position(&self, id: RecordId) -> Option<usize> {
        let wanted = id.to_string();
        self.rows
            .iter()
            .position(|row| row.first().map(|c| c.trim()) == Some(wanted.as_str()))
    }

    /// `max(numeric ids) + 1`; non-numeric ids are ignored.
    pub fn next_id(&self) -> RecordId {
        self.rows
            .iter()
            .filter_map(|row| row.first().and_then(|c| c.trim().parse::<RecordId>().ok()))
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Lay `fields` out in header order.
    pub fn to_row(&self, fields: &Fields) -> Vec<String> {
        self.header
            .iter()
            .map(|col| fields.get(col).cloned().unwrap_or_default())
            .collect()
    }
}

// ============================================================
// Physical I/O
// ============================================================

/// Read the whole store. A missing or empty file is an empty store.
pub(crate) fn load(path: &Path, retry: &RetryPolicy) -> Result<StoreFile, StoreError> {
    if !path.exists() {
        return Ok(StoreFile::default());
    }

    let content = retry.run(path, "open", || fs::read_to_string(path))?;
    if content.trim().is_empty() {
        return Ok(StoreFile::default());
    }

    serde_json::from_str(&content)
        .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))
}

/// Rewrite the whole store: temp file, fsync, atomic rename.
pub(crate) fn save(path: &Path, file: &StoreFile, retry: &RetryPolicy) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(file)
        .map_err(|e| StoreError::Corrupt(format!("serialize failed: {}", e)))?;
    let tmp = tmp_path(path);

    retry.run(path, "save", || {
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, path)
    })?;

    debug!(path = %path.display(), bytes = bytes.len(), "Store file written");
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
