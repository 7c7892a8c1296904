//! Keyed result caches.
//!
//! - [`SingleFlight`]: coalesces concurrent producers per key
//! - [`KeyedCache`]: in-memory memoization with LRU batch eviction or TTL
//! - [`PersistentCache`]: file-backed memoization with a byte budget
//!
//! Both caches are single-flight: concurrent callers for a missing key never
//! run the producer twice, and a failed producer leaves the key free for the
//! next caller.

mod keyed;
mod persistent;
mod single_flight;

pub use keyed::{CachePolicy, CacheStats, KeyedCache};
pub use persistent::{namespace_dir, PersistentCache};
pub use single_flight::{Role, SingleFlight};
