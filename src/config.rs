//! Client-wide configuration and per-operation overrides.
//!
//! # Setup-Time vs Per-Operation Configuration
//!
//! - **Setup-time**: [`CacheConfig`] is fixed when the [`crate::CacheClient`]
//!   is built and applies to every query.
//! - **Per-operation**: [`OperationConfig`] overrides individual TTLs for a
//!   single call without touching the client.
//!
//! ```
//! use cache_shield::config::{CacheConfig, OperationConfig, TtlPolicy};
//! use std::time::Duration;
//!
//! let config = CacheConfig::default()
//!     .with_data_ttl(TtlPolicy::Fixed(Duration::from_secs(1800)))
//!     .with_null_ttl(Duration::from_secs(120))
//!     .with_rebuild_workers(10);
//! assert!(config.validate().is_ok());
//!
//! // Flash sale: shorter TTL for this one call only.
//! let op = OperationConfig::default().with_ttl(Duration::from_secs(60));
//! assert_eq!(op.data_ttl(&config, "cache:shop:"), Some(Duration::from_secs(60)));
//! ```

use crate::error::{Error, Result};
use std::time::Duration;

/// TTL (Time-to-Live) policy for data entries.
#[derive(Clone, Debug)]
pub enum TtlPolicy {
    /// Fixed duration for all entries
    Fixed(Duration),

    /// No TTL (entries live until invalidated)
    Infinite,

    /// Custom per-prefix policy
    PerType(fn(&str) -> Duration),
}

impl Default for TtlPolicy {
    fn default() -> Self {
        TtlPolicy::Fixed(Duration::from_secs(30 * 60))
    }
}

impl TtlPolicy {
    /// Get TTL for an entity prefix.
    pub fn get_ttl(&self, prefix: &str) -> Option<Duration> {
        match self {
            TtlPolicy::Fixed(d) => Some(*d),
            TtlPolicy::Infinite => None,
            TtlPolicy::PerType(f) => Some(f(prefix)),
        }
    }
}

/// Settings shared by every query of one client.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Physical TTL of cached entities (pass-through and mutex strategies).
    pub data_ttl: TtlPolicy,
    /// Physical TTL of the null sentinel. Keep short: it bounds how long a
    /// newly created entity stays invisible.
    pub null_ttl: Duration,
    /// TTL of rebuild locks; the safety net for a crashed lock holder.
    pub lock_ttl: Duration,
    /// Logical TTL written into logical-expiry envelopes.
    pub logical_ttl: Duration,
    /// First backoff after a contended lock (mutex strategy).
    pub lock_retry_backoff: Duration,
    /// Backoff ceiling; the backoff doubles per attempt up to this value.
    pub max_lock_backoff: Duration,
    /// Maximum lock attempts before giving up with `Error::Timeout`.
    pub max_lock_retries: u32,
    /// Hard deadline for waiting on a contended lock.
    pub lock_wait_timeout: Duration,
    /// Concurrent background rebuilds.
    pub rebuild_workers: usize,
    /// Maximum queued plus running rebuilds before submissions are rejected.
    pub rebuild_queue_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            data_ttl: TtlPolicy::default(),
            null_ttl: Duration::from_secs(2 * 60),
            lock_ttl: Duration::from_secs(10),
            logical_ttl: Duration::from_secs(30 * 60),
            lock_retry_backoff: Duration::from_millis(50),
            max_lock_backoff: Duration::from_secs(1),
            max_lock_retries: 100,
            lock_wait_timeout: Duration::from_secs(5),
            rebuild_workers: 10,
            rebuild_queue_capacity: 1024,
        }
    }
}

/// `Ok(None)` when `name` is unset; a value that does not parse is an error.
fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            Error::ConfigError(format!("{} has an unparseable value: {:?}", name, raw))
        }),
        Err(_) => Ok(None),
    }
}

fn env_secs(name: &str) -> Result<Option<Duration>> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_secs))
}

fn env_millis(name: &str) -> Result<Option<Duration>> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_millis))
}

impl CacheConfig {
    /// Defaults overridden by environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `CACHE_DATA_TTL_SECS` | `data_ttl` (`0` = infinite) |
    /// | `CACHE_NULL_TTL_SECS` | `null_ttl` |
    /// | `CACHE_LOCK_TTL_SECS` | `lock_ttl` |
    /// | `CACHE_LOGICAL_TTL_SECS` | `logical_ttl` |
    /// | `CACHE_LOCK_RETRY_BACKOFF_MS` | `lock_retry_backoff` |
    /// | `CACHE_MAX_LOCK_BACKOFF_MS` | `max_lock_backoff` |
    /// | `CACHE_MAX_LOCK_RETRIES` | `max_lock_retries` |
    /// | `CACHE_LOCK_WAIT_TIMEOUT_MS` | `lock_wait_timeout` |
    /// | `CACHE_REBUILD_WORKERS` | `rebuild_workers` |
    /// | `CACHE_REBUILD_QUEUE_CAPACITY` | `rebuild_queue_capacity` |
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if a variable does not parse or the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = CacheConfig::default();

        if let Some(ttl) = env_secs("CACHE_DATA_TTL_SECS")? {
            config.data_ttl = if ttl.is_zero() {
                TtlPolicy::Infinite
            } else {
                TtlPolicy::Fixed(ttl)
            };
        }
        if let Some(ttl) = env_secs("CACHE_NULL_TTL_SECS")? {
            config.null_ttl = ttl;
        }
        if let Some(ttl) = env_secs("CACHE_LOCK_TTL_SECS")? {
            config.lock_ttl = ttl;
        }
        if let Some(ttl) = env_secs("CACHE_LOGICAL_TTL_SECS")? {
            config.logical_ttl = ttl;
        }
        if let Some(backoff) = env_millis("CACHE_LOCK_RETRY_BACKOFF_MS")? {
            config.lock_retry_backoff = backoff;
        }
        if let Some(backoff) = env_millis("CACHE_MAX_LOCK_BACKOFF_MS")? {
            config.max_lock_backoff = backoff;
        }
        if let Some(retries) = env_parse("CACHE_MAX_LOCK_RETRIES")? {
            config.max_lock_retries = retries;
        }
        if let Some(timeout) = env_millis("CACHE_LOCK_WAIT_TIMEOUT_MS")? {
            config.lock_wait_timeout = timeout;
        }
        if let Some(workers) = env_parse("CACHE_REBUILD_WORKERS")? {
            config.rebuild_workers = workers;
        }
        if let Some(capacity) = env_parse("CACHE_REBUILD_QUEUE_CAPACITY")? {
            config.rebuild_queue_capacity = capacity;
        }

        config.validate()?;
        info!("✓ Cache config loaded from environment: {:?}", config);
        Ok(config)
    }

    /// Check invariants the strategies rely on.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.null_ttl.is_zero() {
            return Err(Error::ConfigError(
                "null_ttl must be non-zero or sentinels would never be stored".to_string(),
            ));
        }
        if self.lock_ttl.is_zero() {
            return Err(Error::ConfigError("lock_ttl must be non-zero".to_string()));
        }
        if self.max_lock_retries == 0 {
            return Err(Error::ConfigError(
                "max_lock_retries must be at least 1".to_string(),
            ));
        }
        if self.max_lock_backoff < self.lock_retry_backoff {
            return Err(Error::ConfigError(format!(
                "max_lock_backoff ({:?}) is below lock_retry_backoff ({:?})",
                self.max_lock_backoff, self.lock_retry_backoff
            )));
        }
        if self.rebuild_workers == 0 {
            return Err(Error::ConfigError(
                "rebuild_workers must be at least 1".to_string(),
            ));
        }
        if self.rebuild_queue_capacity < self.rebuild_workers {
            return Err(Error::ConfigError(format!(
                "rebuild_queue_capacity ({}) must be >= rebuild_workers ({})",
                self.rebuild_queue_capacity, self.rebuild_workers
            )));
        }
        Ok(())
    }

    pub fn with_data_ttl(mut self, policy: TtlPolicy) -> Self {
        self.data_ttl = policy;
        self
    }

    pub fn with_null_ttl(mut self, ttl: Duration) -> Self {
        self.null_ttl = ttl;
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn with_logical_ttl(mut self, ttl: Duration) -> Self {
        self.logical_ttl = ttl;
        self
    }

    /// Backoff schedule for the mutex strategy.
    pub fn with_lock_retry(mut self, initial: Duration, max: Duration, retries: u32) -> Self {
        self.lock_retry_backoff = initial;
        self.max_lock_backoff = max;
        self.max_lock_retries = retries;
        self
    }

    pub fn with_lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lock_wait_timeout = timeout;
        self
    }

    pub fn with_rebuild_workers(mut self, workers: usize) -> Self {
        self.rebuild_workers = workers;
        self
    }

    pub fn with_rebuild_queue_capacity(mut self, capacity: usize) -> Self {
        self.rebuild_queue_capacity = capacity;
        self
    }

    /// Backoff before lock attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.lock_retry_backoff
            .saturating_mul(factor)
            .min(self.max_lock_backoff)
    }
}

/// Per-operation overrides.
///
/// Each field is `None` by default, meaning the client's [`CacheConfig`]
/// applies.
#[derive(Clone, Debug, Default)]
pub struct OperationConfig {
    /// Override the data TTL for this operation only.
    pub ttl_override: Option<Duration>,
    /// Override the null-sentinel TTL.
    pub null_ttl_override: Option<Duration>,
    /// Override the rebuild lock TTL.
    pub lock_ttl_override: Option<Duration>,
    /// Override the logical TTL of envelopes written by this operation.
    pub logical_ttl_override: Option<Duration>,
}

impl OperationConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_override = Some(ttl);
        self
    }

    pub fn with_null_ttl(mut self, ttl: Duration) -> Self {
        self.null_ttl_override = Some(ttl);
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl_override = Some(ttl);
        self
    }

    pub fn with_logical_ttl(mut self, ttl: Duration) -> Self {
        self.logical_ttl_override = Some(ttl);
        self
    }

    /// Effective data TTL; the override takes precedence over the policy.
    pub fn data_ttl(&self, config: &CacheConfig, prefix: &str) -> Option<Duration> {
        self.ttl_override
            .or_else(|| config.data_ttl.get_ttl(prefix))
    }

    pub fn null_ttl(&self, config: &CacheConfig) -> Duration {
        self.null_ttl_override.unwrap_or(config.null_ttl)
    }

    pub fn lock_ttl(&self, config: &CacheConfig) -> Duration {
        self.lock_ttl_override.unwrap_or(config.lock_ttl)
    }

    pub fn logical_ttl(&self, config: &CacheConfig) -> Duration {
        self.logical_ttl_override.unwrap_or(config.logical_ttl)
    }
}
