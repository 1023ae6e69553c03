//! Read strategies against cache penetration and cache breakdown.
//!
//! Cache-shield uses an enum-based strategy pattern: every query names how a
//! miss is handled, instead of toggling behaviour with boolean flags.
//!
//! ```
//! use cache_shield::strategy::CacheStrategy;
//!
//! // 1. PassThrough - load on miss, cache absence too (default)
//! let _s = CacheStrategy::PassThrough;
//!
//! // 2. Mutex - one loader per key fleet-wide, others wait
//! let _s = CacheStrategy::Mutex;
//!
//! // 3. LogicalExpire - never block; serve stale and rebuild in background
//! let _s = CacheStrategy::LogicalExpire;
//! ```
//!
//! # When to Use Each Strategy
//!
//! | Strategy | Hit | Miss | Expired | Use Case |
//! |----------|-----|------|---------|----------|
//! | **PassThrough** | Return | Load, cache value or sentinel | Physical TTL, acts as miss | Ordinary keys; blocks lookups of non-existent ids |
//! | **Mutex** | Return | One caller loads, others back off and retry | Physical TTL, acts as miss | Hot keys where a stampede would hurt and brief waits are fine |
//! | **LogicalExpire** | Return | `None`, no load | Return stale, rebuild async | Hot keys that must never block; entries are pre-warmed |
//!
//! # Trade-offs
//!
//! - **PassThrough**: simplest; concurrent misses on one key all reach the store.
//! - **Mutex**: consistent; callers wait up to the lock deadline and may get `Error::Timeout`.
//! - **LogicalExpire**: always fast; readers see data up to one rebuild older than the logical TTL.

/// Strategy enum controlling how a query handles misses and expiry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CacheStrategy {
    /// **PassThrough**: cache-aside read with null caching.
    ///
    /// Flow:
    /// 1. Check cache; return hit, or `None` for the null sentinel
    /// 2. On miss, load from the repository
    /// 3. Store the entity with the data TTL, or the sentinel with the null TTL
    #[default]
    PassThrough,

    /// **Mutex**: pass-through with a distributed rebuild lock.
    ///
    /// Flow:
    /// 1. Check cache as in `PassThrough`
    /// 2. On miss, try the lock; if held elsewhere, back off and start over
    /// 3. Holding the lock: re-check cache, load, store, release
    Mutex,

    /// **LogicalExpire**: entries carry their own expiry and never vanish.
    ///
    /// Flow:
    /// 1. Absent or sentinel: return `None`
    /// 2. Fresh: return entity
    /// 3. Expired: return the stale entity and, if the lock is free, queue a
    ///    background rebuild
    LogicalExpire,
}

impl CacheStrategy {
    /// Whether a miss may call the repository on the caller's task.
    pub fn loads_on_miss(&self) -> bool {
        !matches!(self, CacheStrategy::LogicalExpire)
    }
}

impl std::fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheStrategy::PassThrough => write!(f, "PassThrough"),
            CacheStrategy::Mutex => write!(f, "Mutex"),
            CacheStrategy::LogicalExpire => write!(f, "LogicalExpire"),
        }
    }
}
