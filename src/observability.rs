//! Hooks for exporting what the read path does.
//!
//! Every hook has a default body that logs, so an exporter overrides only the
//! events it counts. Clients start with [`NoOpMetrics`]; install another sink
//! with `CacheClient::with_metrics`.
//!
//! ```
//! use cache_shield::observability::{CacheMetrics, RebuildOutcome};
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::time::Duration;
//!
//! #[derive(Default)]
//! struct Counters {
//!     hits: AtomicU64,
//!     failed_rebuilds: AtomicU64,
//! }
//!
//! impl CacheMetrics for Counters {
//!     fn record_hit(&self, _key: &str, _took: Duration) {
//!         self.hits.fetch_add(1, Ordering::Relaxed);
//!     }
//!
//!     fn record_rebuild(&self, _key: &str, outcome: RebuildOutcome) {
//!         if outcome == RebuildOutcome::Failed {
//!             self.failed_rebuilds.fetch_add(1, Ordering::Relaxed);
//!         }
//!     }
//! }
//! ```

use std::fmt;
use std::time::Duration;

/// How a background rebuild of a logically expired entry ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RebuildOutcome {
    /// A fresh envelope was written.
    Refreshed,
    /// The repository no longer has the entity, so the key was deleted.
    Removed,
    /// An earlier rebuild had already made the entry fresh.
    Skipped,
    /// The loader or the store failed; the stale entry stays.
    Failed,
    /// The scheduler refused the task.
    Rejected,
}

impl RebuildOutcome {
    /// Stable lowercase label for metric tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            RebuildOutcome::Refreshed => "refreshed",
            RebuildOutcome::Removed => "removed",
            RebuildOutcome::Skipped => "skipped",
            RebuildOutcome::Failed => "failed",
            RebuildOutcome::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RebuildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait CacheMetrics: Send + Sync {
    /// An entity was answered from the cache.
    fn record_hit(&self, key: &str, took: Duration) {
        trace!("hit {} in {:?}", key, took);
    }

    /// A cached null sentinel was answered without calling the loader.
    fn record_null_hit(&self, key: &str, took: Duration) {
        trace!("null hit {} in {:?}", key, took);
    }

    fn record_miss(&self, key: &str, took: Duration) {
        trace!("miss {} in {:?}", key, took);
    }

    /// A logically expired value was served.
    fn record_stale(&self, key: &str) {
        debug!("stale {}", key);
    }

    fn record_load(&self, key: &str, found: bool, took: Duration) {
        debug!("loaded {} (found: {}) in {:?}", key, found, took);
    }

    /// The rebuild lock for `key` belonged to another caller.
    fn record_lock_contended(&self, key: &str) {
        debug!("lock busy for {}", key);
    }

    fn record_rebuild(&self, key: &str, outcome: RebuildOutcome) {
        match outcome {
            RebuildOutcome::Rejected | RebuildOutcome::Failed => {
                warn!("⚠ rebuild of {} {}", key, outcome)
            }
            _ => debug!("rebuild of {} {}", key, outcome),
        }
    }

    fn record_error(&self, key: &str, error: &str) {
        warn!("⚠ {}: {}", key, error);
    }
}

/// Drops every event, logging included.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _: &str, _: Duration) {}
    fn record_null_hit(&self, _: &str, _: Duration) {}
    fn record_miss(&self, _: &str, _: Duration) {}
    fn record_stale(&self, _: &str) {}
    fn record_load(&self, _: &str, _: bool, _: Duration) {}
    fn record_lock_contended(&self, _: &str) {}
    fn record_rebuild(&self, _: &str, _: RebuildOutcome) {}
    fn record_error(&self, _: &str, _: &str) {}
}

/// Sends every event to the `log` facade through the default hook bodies.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogMetrics;

impl CacheMetrics for LogMetrics {}
