//! File-backed, byte-budgeted result cache.
//!
//! Each cache owns one directory. Entries are stored one file per key, the
//! file name being the percent-encoded key:
//!
//! ```text
//! <cache_root>/
//! └── <hex sha256 of the upstream pipeline signature>/
//!     ├── tileset.json
//!     ├── tiles%2F0%2F1.b3dm
//!     └── ...
//! ```
//!
//! Eviction is strictly by insertion order: once the cumulative size passes
//! the budget the oldest files are deleted. Files already present when the
//! cache is opened are indexed oldest-modified first.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use bytes::Bytes;
use lru::LruCache;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::keyed::{CacheStats, Counters};
use super::single_flight::{Role, SingleFlight};
use crate::error::IoError;

/// Suffix of partially written entries.
const TEMP_SUFFIX: &str = ".partial";

/// Directory holding the cache for the given upstream signature.
pub fn namespace_dir(cache_root: &Path, signature: &str) -> PathBuf {
    cache_root.join(hex::encode(Sha256::digest(signature.as_bytes())))
}

/// Insertion-ordered index of stored entries and their sizes.
///
/// The LRU is only ever `put` and `peek`ed, so its cold end is the oldest
/// insertion.
struct Index {
    order: LruCache<String, u64>,
    total_bytes: u64,
}

/// Persistent single-flight cache of byte payloads.
pub struct PersistentCache<E> {
    dir: PathBuf,
    budget_bytes: u64,
    index: Mutex<Index>,
    flights: SingleFlight<String, Bytes, E>,
    counters: Counters,
}

impl<E> PersistentCache<E>
where
    E: From<IoError> + Clone,
{
    /// Open (creating if needed) the cache directory and index its contents.
    pub async fn open(dir: impl Into<PathBuf>, budget_bytes: u64) -> Result<Self, IoError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let scan_dir = dir.clone();
        let existing = tokio::task::spawn_blocking(move || scan_cache_dir(&scan_dir))
            .await
            .map_err(|e| IoError::Read(format!("cache scan task failed: {}", e)))??;

        let mut index = Index {
            order: LruCache::unbounded(),
            total_bytes: 0,
        };
        for (key, size) in existing {
            index.total_bytes += size;
            index.order.put(key, size);
        }

        info!(
            dir = %dir.display(),
            entries = index.order.len(),
            bytes = index.total_bytes,
            budget_bytes,
            "Opened persistent cache"
        );

        let cache = Self {
            dir,
            budget_bytes,
            index: Mutex::new(index),
            flights: SingleFlight::new(),
            counters: Counters::default(),
        };

        let victims = cache.evict_over_budget();
        cache.delete_files(victims).await;

        Ok(cache)
    }

    /// The directory this cache writes to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Return the stored payload for `key`, or run `producer` and store its output.
    pub async fn get_or_try_insert<F, Fut>(&self, key: &str, producer: F) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        if let Some(data) = self.read(key).await? {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(data);
        }

        let (result, role) = self
            .flights
            .run(key.to_string(), || async {
                if let Some(data) = self.read(key).await? {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(data);
                }

                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                let data = producer().await?;
                self.store(key, &data).await?;
                Ok(data)
            })
            .await;

        if role == Role::Follower {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
        }

        result
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.index().order.len()
    }

    /// Whether nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cumulative size of the indexed entries.
    pub fn total_bytes(&self) -> u64 {
        self.index().total_bytes
    }

    /// Whether `key` is indexed.
    pub fn contains(&self, key: &str) -> bool {
        self.index().order.contains(key)
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(urlencoding::encode(key).as_ref())
    }

    async fn read(&self, key: &str) -> Result<Option<Bytes>, IoError> {
        if !self.contains(key) {
            return Ok(None);
        }

        match tokio::fs::read(self.entry_path(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(key, "Cached file vanished, dropping entry");
                let mut index = self.index();
                if let Some(size) = index.order.pop(key) {
                    index.total_bytes -= size;
                }
                Ok(None)
            }
            Err(e) => Err(IoError::from(e)),
        }
    }

    async fn store(&self, key: &str, data: &Bytes) -> Result<(), IoError> {
        let path = self.entry_path(key);
        let mut temp = path.clone().into_os_string();
        temp.push(TEMP_SUFFIX);

        tokio::fs::write(&temp, data).await?;
        tokio::fs::rename(&temp, &path).await?;

        {
            let mut index = self.index();
            let size = data.len() as u64;
            if let Some(old) = index.order.put(key.to_string(), size) {
                index.total_bytes -= old;
            }
            index.total_bytes += size;
        }

        let victims = self.evict_over_budget();
        self.delete_files(victims).await;
        Ok(())
    }

    /// Pop oldest entries until the total fits the budget.
    fn evict_over_budget(&self) -> Vec<String> {
        let mut index = self.index();
        let mut victims = Vec::new();
        while index.total_bytes > self.budget_bytes {
            match index.order.pop_lru() {
                Some((key, size)) => {
                    index.total_bytes -= size;
                    victims.push(key);
                }
                None => break,
            }
        }
        if !victims.is_empty() {
            self.counters
                .evictions
                .fetch_add(victims.len() as u64, Ordering::Relaxed);
            debug!(
                evicted = victims.len(),
                remaining_bytes = index.total_bytes,
                "Evicted persistent entries"
            );
        }
        victims
    }

    async fn delete_files(&self, keys: Vec<String>) {
        for key in keys {
            if let Err(e) = tokio::fs::remove_file(self.entry_path(&key)).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(key, error = %e, "Failed to delete evicted cache file");
                }
            }
        }
    }

    fn index(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// List `(key, size)` of the entries in `dir`, oldest modified first.
fn scan_cache_dir(dir: &Path) -> Result<Vec<(String, u64)>, IoError> {
    let mut found = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }

        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if name.ends_with(TEMP_SUFFIX) {
            continue;
        }
        let Ok(key) = urlencoding::decode(name) else {
            continue;
        };

        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        found.push((modified, key.into_owned(), metadata.len()));
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found
        .into_iter()
        .map(|(_, key, size)| (key, size))
        .collect())
}
