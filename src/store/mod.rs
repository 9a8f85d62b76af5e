//! File-backed record store
//!
//! A minimal keyed-table store over one shared JSON file.
//!
//! # Locking
//!
//! All tables live in one physical file guarded by one readers-writer lock
//! (shared by every `RecordStore` on the same path). Reads proceed together;
//! a write excludes every other read and write on the file, including ones
//! against unrelated tables.
//!
//! # Writes
//!
//! Every write reloads the file from disk, mutates it in memory and rewrites
//! it. Nothing is written through or served from the read cache; the table's
//! cache entry is dropped before the write lock is released.
//!
//! # Blocking
//!
//! The API is synchronous. Physical I/O is retried with `thread::sleep`
//! between attempts, so async callers run store work through
//! `tokio::task::spawn_blocking`.

mod cache;
mod error;
mod file;
mod record;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::core_types::RecordId;

pub use cache::DEFAULT_TTL;
pub use error::StoreError;
pub use file::RetryPolicy;
pub use record::{CREATED_AT, Fields, Filter, ID, Record, UPDATED_AT, fields};

use cache::SharedFile;
use file::{StoreFile, TableData};

/// Timestamp format used for `createdAt` / `updatedAt`.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Table name, column list and row count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: usize,
}

pub struct RecordStore {
    path: PathBuf,
    retry: RetryPolicy,
    shared: Arc<SharedFile>,
}

impl RecordStore {
    /// Open the store and bring its schema up to date.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let store = Self::with_options(&config.path, config.retry_policy(), config.cache_ttl())?;
        let version = crate::schema::migrate(&store)?;
        info!(path = %store.path.display(), schema_version = version, "Record store ready");
        Ok(store)
    }

    /// Open the file without running migrations.
    pub fn with_options(
        path: impl AsRef<Path>,
        retry: RetryPolicy,
        cache_ttl: Duration,
    ) -> Result<Self, StoreError> {
        let path = canonical_path(path.as_ref())?;
        let shared = cache::shared_for(&path, cache_ttl);
        Ok(Self {
            path,
            retry,
            shared,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ============================================================
    // Schema
    // ============================================================

    /// Create `name` with `columns`, or append any missing columns to its
    /// header. Never removes or reorders columns.
    pub fn ensure_table(&self, name: &str, columns: &[&str]) -> Result<(), StoreError> {
        self.write(name, |file| {
            let changed = match file.tables.get_mut(name) {
                Some(table) => table.extend_header(columns),
                None => {
                    file.tables
                        .insert(name.to_string(), TableData::with_header(columns));
                    true
                }
            };
            if changed {
                debug!(table = name, "Table header updated");
            }
            Ok(((), changed))
        })
    }

    pub fn schema_version(&self) -> Result<u32, StoreError> {
        self.read(|file| Ok(file.schema_version))
    }

    pub(crate) fn set_schema_version(&self, version: u32) -> Result<(), StoreError> {
        let _guard = self.shared.lock.write().unwrap_or_else(PoisonError::into_inner);
        let mut file = file::load(&self.path, &self.retry)?;
        file.schema_version = version;
        file::save(&self.path, &file, &self.retry)
    }

    pub fn tables(&self) -> Result<Vec<TableSummary>, StoreError> {
        self.read(|file| {
            Ok(file
                .tables
                .iter()
                .map(|(name, t)| TableSummary {
                    name: name.clone(),
                    columns: t.header.clone(),
                    rows: t.rows.len(),
                })
                .collect())
        })
    }

    // ============================================================
    // Reads
    // ============================================================

    /// Every record of `table` in physical row order; empty if the table
    /// does not exist.
    pub fn list_all(&self, table: &str) -> Result<Vec<Record>, StoreError> {
        if let Some(hit) = self.shared.cache.get(table) {
            return Ok(hit.as_ref().clone());
        }

        let _guard = self.shared.lock.read().unwrap_or_else(PoisonError::into_inner);
        let file = file::load(&self.path, &self.retry)?;
        let records = file
            .tables
            .get(table)
            .map(TableData::records)
            .unwrap_or_default();
        self.shared.cache.put(table, Arc::new(records.clone()));
        Ok(records)
    }

    /// Direct lookup against the file; bypasses the cache.
    pub fn find_by_id(&self, table: &str, id: RecordId) -> Result<Option<Record>, StoreError> {
        self.read(|file| {
            Ok(file
                .tables
                .get(table)
                .and_then(|t| t.position(id).and_then(|i| t.record_at(i))))
        })
    }

    pub fn find_one(&self, table: &str, filter: &Filter) -> Result<Option<Record>, StoreError> {
        Ok(self
            .list_all(table)?
            .into_iter()
            .find(|r| filter.matches(r)))
    }

    pub fn find_many(&self, table: &str, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        Ok(self
            .list_all(table)?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect())
    }

    // ============================================================
    // Writes
    // ============================================================

    /// Insert a row, assigning `id = max + 1` and stamping timestamps.
    pub fn create(&self, table: &str, fields: Fields) -> Result<Record, StoreError> {
        self.write(table, |file| {
            let data = table_mut(file, table)?;
            let record = insert_row(table, data, fields)?;
            Ok((record, true))
        })
    }

    /// Insert a row only if no existing row matches `guard`.
    ///
    /// The guard is evaluated against the on-disk rows under the write lock.
    pub fn create_unique(
        &self,
        table: &str,
        guard: &Filter,
        fields: Fields,
    ) -> Result<Record, StoreError> {
        self.write(table, |file| {
            let data = table_mut(file, table)?;
            if let Some(existing) = data.records().into_iter().find(|r| guard.matches(r)) {
                return Err(StoreError::Conflict {
                    table: table.to_string(),
                    current: Some(Box::new(existing)),
                });
            }
            let record = insert_row(table, data, fields)?;
            Ok((record, true))
        })
    }

    /// Merge `fields` over row `id`; unspecified columns are preserved.
    pub fn update(&self, table: &str, id: RecordId, fields: Fields) -> Result<Record, StoreError> {
        self.update_if(table, id, &Filter::new(), fields)
    }

    /// Compare-and-set update: applies only if row `id` still matches
    /// `expected` on disk.
    pub fn update_if(
        &self,
        table: &str,
        id: RecordId,
        expected: &Filter,
        fields: Fields,
    ) -> Result<Record, StoreError> {
        self.write(table, |file| {
            let data = table_mut(file, table)?;
            data.check_columns(table, &fields)?;

            let index = data.position(id).ok_or_else(|| StoreError::NotFound {
                table: table.to_string(),
                id,
            })?;
            let mut merged = data
                .record_at(index)
                .map(Record::into_fields)
                .unwrap_or_default();

            if !expected.matches(&Record::from(merged.clone())) {
                return Err(StoreError::Conflict {
                    table: table.to_string(),
                    current: Some(Box::new(Record::from(merged))),
                });
            }

            for (col, value) in fields {
                if col != ID {
                    merged.insert(col, value);
                }
            }
            if data.has_column(UPDATED_AT) {
                merged.insert(UPDATED_AT.to_string(), now_timestamp());
            }

            let row = data.to_row(&merged);
            data.rows[index] = row;
            Ok((Record::from(merged), true))
        })
    }

    // ============================================================
    // Lock helpers
    // ============================================================

    fn read<T>(&self, f: impl FnOnce(&StoreFile) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let _guard = self.shared.lock.read().unwrap_or_else(PoisonError::into_inner);
        let file = file::load(&self.path, &self.retry)?;
        f(&file)
    }

    /// Reload, mutate, save if dirty, drop the table's cache entry.
    fn write<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut StoreFile) -> Result<(T, bool), StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self.shared.lock.write().unwrap_or_else(PoisonError::into_inner);
        self.shared.cache.invalidate(table);

        let mut file = file::load(&self.path, &self.retry)?;
        let (value, dirty) = f(&mut file)?;
        if dirty {
            file::save(&self.path, &file, &self.retry)?;
        }
        self.shared.cache.invalidate(table);
        Ok(value)
    }
}

fn table_mut<'a>(file: &'a mut StoreFile, table: &str) -> Result<&'a mut TableData, StoreError> {
    file.tables
        .get_mut(table)
        .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
}

fn insert_row(table: &str, data: &mut TableData, mut fields: Fields) -> Result<Record, StoreError> {
    fields.remove(ID);
    data.check_columns(table, &fields)?;

    let id = data.next_id();
    fields.insert(ID.to_string(), id.to_string());

    let now = now_timestamp();
    for col in [CREATED_AT, UPDATED_AT] {
        if data.has_column(col) && fields.get(col).is_none_or(|v| v.is_empty()) {
            fields.insert(col.to_string(), now.clone());
        }
    }

    let row = data.to_row(&fields);
    let record = Record::from_row(&data.header, &row);
    data.rows.push(row);
    debug!(table, id, "Row created");
    Ok(record)
}

/// Canonical form of `path` so every opener of the same file shares a lock.
/// The parent directory is created if needed; the file itself may not exist.
fn canonical_path(path: &Path) -> Result<PathBuf, StoreError> {
    let unavailable = |e: std::io::Error| StoreError::Unavailable {
        path: path.display().to_string(),
        attempts: 1,
        reason: e.to_string(),
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(unavailable)?;
    let parent = fs::canonicalize(&parent).map_err(unavailable)?;

    match path.file_name() {
        Some(name) => Ok(parent.join(name)),
        None => Err(StoreError::Unavailable {
            path: path.display().to_string(),
            attempts: 1,
            reason: "store path has no file name".to_string(),
        }),
    }
}
