//! Per-file shared state: readers-writer lock and TTL table cache
//!
//! Every `RecordStore` opened on the same canonical path shares one
//! [`SharedFile`], so the lock and the cache are process-wide per file.
//! The cache only ever serves `list_all`; writers invalidate while holding
//! the write lock, readers populate while holding the read lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use cached::{Cached, TimedCache};
use once_cell::sync::Lazy;

use super::record::Record;

/// Default lifetime of a cached table listing.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

static SHARED_FILES: Lazy<Mutex<HashMap<PathBuf, Arc<SharedFile>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub(crate) struct SharedFile {
    /// Guards the physical file; `()` because the data lives on disk.
    pub lock: RwLock<()>,
    pub cache: TableCache,
}

/// Shared state for `path`, created on first use.
///
/// The TTL of the first opener wins for the lifetime of the process.
pub(crate) fn shared_for(path: &Path, ttl: Duration) -> Arc<SharedFile> {
    let mut files = SHARED_FILES
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    files
        .entry(path.to_path_buf())
        .or_insert_with(|| {
            Arc::new(SharedFile {
                lock: RwLock::new(()),
                cache: TableCache::new(ttl),
            })
        })
        .clone()
}

/// TTL cache of full table listings. A zero TTL disables caching.
pub(crate) struct TableCache {
    inner: Option<Mutex<TimedCache<String, Arc<Vec<Record>>>>>,
}

impl TableCache {
    pub fn new(ttl: Duration) -> Self {
        let secs = ttl.as_secs();
        Self {
            inner: (secs > 0).then(|| Mutex::new(TimedCache::with_lifespan(secs))),
        }
    }

    pub fn get(&self, table: &str) -> Option<Arc<Vec<Record>>> {
        let inner = self.inner.as_ref()?;
        let mut cache = inner.lock().unwrap_or_else(PoisonError::into_inner);
        cache.cache_get(table).cloned()
    }

    pub fn put(&self, table: &str, records: Arc<Vec<Record>>) {
        if let Some(inner) = &self.inner {
            let mut cache = inner.lock().unwrap_or_else(PoisonError::into_inner);
            cache.cache_set(table.to_string(), records);
        }
    }

    pub fn invalidate(&self, table: &str) {
        if let Some(inner) = &self.inner {
            let mut cache = inner.lock().unwrap_or_else(PoisonError::into_inner);
            cache.cache_remove(table);
        }
    }
}
