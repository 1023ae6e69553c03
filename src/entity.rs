//! The contract a type signs to be cached.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::hash::Hash;

/// A record that can live in the cache under `prefix + id`.
///
/// The data key for id `1` with prefix `"cache:shop:"` is `"cache:shop:1"`;
/// its rebuild lock lives at `"lock:cache:shop:1"`. End prefixes with a
/// separator that ids never contain so entity types sharing a store cannot
/// collide.
///
/// ```
/// use cache_shield::CacheEntity;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Voucher {
///     id: u64,
///     stock: u32,
/// }
///
/// impl CacheEntity for Voucher {
///     type Key = u64;
///
///     fn cache_key(&self) -> u64 {
///         self.id
///     }
///
///     fn cache_prefix() -> &'static str {
///         "cache:voucher:"
///     }
/// }
///
/// assert_eq!(Voucher::lock_prefix(), "lock:cache:voucher:");
/// ```
pub trait CacheEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Identifier rendered into keys with `Display`.
    type Key: Display + Eq + Hash + Clone + Send + Sync + 'static;

    fn cache_key(&self) -> Self::Key;

    fn cache_prefix() -> &'static str;

    fn lock_prefix() -> String {
        format!("lock:{}", Self::cache_prefix())
    }

    /// Bytes written to the store. Postcard in a versioned `CKIT` envelope
    /// unless overridden, e.g. with [`crate::serialization::json`] for entries
    /// other services read as JSON.
    ///
    /// Must never yield an empty buffer, which is reserved for cached absence.
    fn serialize_for_cache(&self) -> Result<Vec<u8>> {
        crate::serialization::serialize_for_cache(self)
    }

    /// Inverse of [`CacheEntity::serialize_for_cache`]. Decode errors make the
    /// read path evict the entry.
    fn deserialize_from_cache(bytes: &[u8]) -> Result<Self> {
        crate::serialization::deserialize_from_cache(bytes)
    }

    /// Business check run on every decoded or loaded value.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}
