use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::debug;

use super::single_flight::{Role, SingleFlight};

/// Hard cap multiplier applied to the soft target when none is given.
const DEFAULT_HARD_CAP_FACTOR: usize = 2;

// =============================================================================
// Policy
// =============================================================================

/// Bounds applied to a [`KeyedCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Never evict.
    Unbounded,

    /// Once `hard_cap` entries are exceeded, evict least-recently-touched
    /// entries until `soft_target` remain.
    Lru { soft_target: usize, hard_cap: usize },

    /// Entries older than the given duration are dropped on access.
    Ttl(Duration),
}

impl CachePolicy {
    /// LRU policy with the default hard cap of twice the soft target.
    pub fn lru(soft_target: usize) -> Self {
        let soft_target = soft_target.max(1);
        CachePolicy::Lru {
            soft_target,
            hard_cap: soft_target.saturating_mul(DEFAULT_HARD_CAP_FACTOR),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from stored entries
    pub hits: u64,
    /// Producer invocations
    pub misses: u64,
    /// Callers that waited on another caller's producer
    pub coalesced: u64,
    /// Entries dropped by the policy
    pub evictions: u64,
}

#[derive(Default)]
pub(super) struct Counters {
    pub(super) hits: AtomicU64,
    pub(super) misses: AtomicU64,
    pub(super) coalesced: AtomicU64,
    pub(super) evictions: AtomicU64,
}

impl Counters {
    pub(super) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// KeyedCache
// =============================================================================

struct Entry<V> {
    value: V,
    inserted: Instant,
}

/// Key to result memoization with single-flight production.
///
/// `get_or_try_insert` guarantees that the producer for a key runs at most
/// once at a time, that every caller arriving meanwhile gets the same
/// outcome, and that successful results are served until the policy evicts
/// them. Errors are handed to the waiting callers but never stored.
pub struct KeyedCache<K, V, E> {
    entries: Mutex<LruCache<K, Entry<V>>>,
    policy: CachePolicy,
    flights: SingleFlight<K, V, E>,
    counters: Counters,
}

impl<K, V, E> KeyedCache<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    /// Create a cache with the given policy.
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            policy,
            flights: SingleFlight::new(),
            counters: Counters::default(),
        }
    }

    /// Create a cache that never evicts.
    pub fn unbounded() -> Self {
        Self::new(CachePolicy::Unbounded)
    }

    /// Create an LRU cache holding `soft_target` entries after a batch eviction.
    pub fn lru(soft_target: usize) -> Self {
        Self::new(CachePolicy::lru(soft_target))
    }

    /// Create a cache whose entries expire after `ttl`.
    pub fn ttl(ttl: Duration) -> Self {
        Self::new(CachePolicy::Ttl(ttl))
    }

    /// The policy this cache was created with.
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Return the stored value for `key`, or run `producer` to create it.
    pub async fn get_or_try_insert<F, Fut>(&self, key: K, producer: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.lookup(&key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        let (result, role) = self
            .flights
            .run(key.clone(), || async {
                // A flight for this key may have landed between the lookup
                // above and joining the table.
                if let Some(value) = self.lookup(&key) {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }

                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                let value = producer().await?;
                self.insert(key.clone(), value.clone());
                Ok(value)
            })
            .await;

        if role == Role::Follower {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
        }

        result
    }

    /// Return the stored value for `key`, touching it.
    pub fn get(&self, key: &K) -> Option<V> {
        self.lookup(key)
    }

    /// Store a value, applying the eviction policy.
    pub fn insert(&self, key: K, value: V) {
        let mut entries = self.entries();
        entries.put(
            key,
            Entry {
                value,
                inserted: Instant::now(),
            },
        );

        if let CachePolicy::Lru {
            soft_target,
            hard_cap,
        } = self.policy
        {
            if entries.len() > hard_cap {
                let mut evicted = 0u64;
                while entries.len() > soft_target {
                    if entries.pop_lru().is_none() {
                        break;
                    }
                    evicted += 1;
                }
                self.counters
                    .evictions
                    .fetch_add(evicted, Ordering::Relaxed);
                debug!(evicted, remaining = entries.len(), "Batch eviction");
            }
        }
    }

    /// Drop the entry for `key`.
    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.entries().pop(key).map(|entry| entry.value)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Number of stored entries (expired TTL entries included until swept).
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    fn lookup(&self, key: &K) -> Option<V> {
        let mut entries = self.entries();
        match self.policy {
            CachePolicy::Ttl(ttl) => {
                // Hits do not touch entries here, so LRU order is insertion
                // order and expired entries sit at the cold end.
                let now = Instant::now();
                let mut evicted = 0u64;
                while let Some((_, entry)) = entries.peek_lru() {
                    if now.duration_since(entry.inserted) < ttl {
                        break;
                    }
                    entries.pop_lru();
                    evicted += 1;
                }
                if evicted > 0 {
                    self.counters
                        .evictions
                        .fetch_add(evicted, Ordering::Relaxed);
                    debug!(evicted, "Expired entries swept");
                }
                entries.peek(key).map(|entry| entry.value.clone())
            }
            _ => entries.get(key).map(|entry| entry.value.clone()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<K, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
