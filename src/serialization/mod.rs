//! What the strategies write to the store, byte for byte.
//!
//! Three shapes of value share one key space:
//!
//! ```text
//! plain entry     CKIT envelope { magic: "CKIT", version: u32, payload: T }   (postcard)
//! null sentinel   b""                                                         (zero bytes)
//! logical entry   CKIT envelope { LogicalExpiryEnvelope { expire_at_millis, data } }
//! ```
//!
//! The sentinel is told apart by length alone: every envelope carries at
//! least the four magic bytes. Inside a logical entry `data` is the entity's
//! own encoding, decoded only after the expiry check, so an entity that
//! overrides its codec (see [`json`]) keeps it under logical expiration too.
//!
//! ```rust
//! use cache_shield::serialization::{deserialize_from_cache, serialize_for_cache};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Voucher {
//!     id: u64,
//!     stock: u32,
//! }
//!
//! # fn main() -> cache_shield::Result<()> {
//! let voucher = Voucher { id: 10, stock: 100 };
//! let stored = serialize_for_cache(&voucher)?;
//! assert_eq!(&stored[..4], b"CKIT");
//! assert_eq!(deserialize_from_cache::<Voucher>(&stored)?, voucher);
//! # Ok(())
//! # }
//! ```

pub mod json;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const CACHE_MAGIC: [u8; 4] = *b"CKIT";

/// Bump whenever a cached type changes shape. Entries carrying another
/// version are evicted on read and recomputed.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Stored for ids the repository confirmed absent.
pub const NULL_SENTINEL: &[u8] = b"";

pub fn is_null_sentinel(bytes: &[u8]) -> bool {
    bytes.is_empty()
}

/// Header-tagged wrapper around every non-sentinel value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    pub magic: [u8; 4],
    pub version: u32,
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    pub fn new(payload: T) -> Self {
        CacheEnvelope {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }

    fn into_checked_payload(self) -> Result<T> {
        if self.magic != CACHE_MAGIC {
            warn!("⚠ Cache entry header {:?} is not CKIT", self.magic);
            return Err(Error::InvalidCacheEntry(format!(
                "header {:?} is not {:?}",
                self.magic, CACHE_MAGIC
            )));
        }
        if self.version != CURRENT_SCHEMA_VERSION {
            warn!(
                "⚠ Cache entry schema v{} does not match v{}",
                self.version, CURRENT_SCHEMA_VERSION
            );
            return Err(Error::VersionMismatch {
                expected: CURRENT_SCHEMA_VERSION,
                found: self.version,
            });
        }
        Ok(self.payload)
    }
}

/// Encode `value` as a plain entry.
pub fn serialize_for_cache<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(&CacheEnvelope::new(value)).map_err(|e| {
        error!("✗ Postcard encode failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Decode a plain entry, rejecting foreign headers and other schema versions.
pub fn deserialize_from_cache<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T> {
    postcard::from_bytes::<CacheEnvelope<T>>(bytes)
        .map_err(|e| {
            warn!("⚠ Postcard decode failed ({} bytes): {}", bytes.len(), e);
            Error::DeserializationError(e.to_string())
        })?
        .into_checked_payload()
}

/// Wall-clock milliseconds since the Unix epoch. Every process sharing the
/// store compares expiries against this clock.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |since| u64::try_from(since.as_millis()).unwrap_or(u64::MAX))
}

/// Entity bytes stamped with the instant they turn stale.
///
/// Stored without a physical TTL; staleness only ever triggers a background
/// rebuild, never a miss.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LogicalExpiryEnvelope {
    pub expire_at_millis: u64,
    pub data: Vec<u8>,
}

impl LogicalExpiryEnvelope {
    pub fn expiring_in(data: Vec<u8>, ttl: Duration) -> Self {
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        Self::expiring_at(data, now_millis().saturating_add(ttl_millis))
    }

    pub fn expiring_at(data: Vec<u8>, expire_at_millis: u64) -> Self {
        LogicalExpiryEnvelope {
            expire_at_millis,
            data,
        }
    }

    /// Stale from `expire_at_millis` onwards, inclusive.
    pub fn is_expired_at(&self, now_millis: u64) -> bool {
        now_millis >= self.expire_at_millis
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    pub fn remaining(&self) -> Duration {
        Duration::from_millis(self.expire_at_millis.saturating_sub(now_millis()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serialize_for_cache(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        deserialize_from_cache(bytes)
    }
}
