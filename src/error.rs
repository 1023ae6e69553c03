//! Failures surfaced by the cache layer.
//!
//! An entity that does not exist is not a failure: queries answer `Ok(None)`
//! for it. Everything here is a fault of the store, the loader, the cached
//! bytes or the rebuild machinery.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub enum Error {
    /// An entity or envelope could not be encoded.
    SerializationError(String),

    /// Cached bytes did not decode into the expected type. The read path
    /// evicts such entries and recomputes them.
    DeserializationError(String),

    /// Cached bytes lack the `CKIT` header or the envelope is malformed.
    InvalidCacheEntry(String),

    /// The entry was written by a build with another schema version, as
    /// happens while a deployment that changes a cached type rolls out.
    VersionMismatch { expected: u32, found: u32 },

    /// A decoded or freshly loaded entity failed [`crate::CacheEntity::validate`].
    ValidationError(String),

    /// The key/value store failed. Never downgraded to a miss, since that
    /// would turn a cache outage into a stampede on the database.
    BackendError(String),

    /// The data repository failed while loading an entity.
    RepositoryError(String),

    /// The mutex strategy gave up waiting for the rebuild lock.
    Timeout(String),

    /// The rebuild scheduler refused a task because its backlog was full or
    /// it had been shut down.
    RebuildRejected(String),

    ConfigError(String),

    Other(String),
}

impl Error {
    /// Whether the same call might succeed if retried later.
    pub fn is_transient(&self) -> bool {
        use Error::*;
        matches!(
            self,
            BackendError(_) | RepositoryError(_) | Timeout(_) | RebuildRejected(_)
        )
    }

    /// Whether the cached bytes themselves are unusable and should be evicted.
    pub(crate) fn is_corrupt_entry(&self) -> bool {
        use Error::*;
        matches!(
            self,
            DeserializationError(_) | InvalidCacheEntry(_) | VersionMismatch { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, detail) = match self {
            Error::VersionMismatch { expected, found } => {
                return write!(
                    f,
                    "cached entry has schema v{}, this build reads v{}",
                    found, expected
                );
            }
            Error::SerializationError(msg) => ("encode failed", msg),
            Error::DeserializationError(msg) => ("decode failed", msg),
            Error::InvalidCacheEntry(msg) => ("invalid cache entry", msg),
            Error::ValidationError(msg) => ("validation failed", msg),
            Error::BackendError(msg) => ("cache store error", msg),
            Error::RepositoryError(msg) => ("repository error", msg),
            Error::Timeout(msg) => ("timed out", msg),
            Error::RebuildRejected(msg) => ("rebuild rejected", msg),
            Error::ConfigError(msg) => ("invalid configuration", msg),
            Error::Other(msg) => return f.write_str(msg),
        };
        write!(f, "{}: {}", kind, detail)
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        use serde_json::error::Category;
        match e.classify() {
            Category::Io => Error::BackendError(e.to_string()),
            Category::Syntax | Category::Data | Category::Eof => {
                Error::DeserializationError(e.to_string())
            }
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Other(format!("task did not complete: {}", e))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::BackendError(e.to_string())
    }
}
