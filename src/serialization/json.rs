//! JSON codec for entities shared with non-Rust readers.
//!
//! Entities opt in by overriding the two `CacheEntity` codec hooks:
//!
//! ```rust
//! use cache_shield::{CacheEntity, Result};
//! use cache_shield::serialization::json;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct ShopType {
//!     id: u64,
//!     name: String,
//! }
//!
//! impl CacheEntity for ShopType {
//!     type Key = u64;
//!     fn cache_key(&self) -> u64 { self.id }
//!     fn cache_prefix() -> &'static str { "cache:shop-type:" }
//!
//!     fn serialize_for_cache(&self) -> Result<Vec<u8>> {
//!         json::serialize_for_cache(self)
//!     }
//!
//!     fn deserialize_from_cache(bytes: &[u8]) -> Result<Self> {
//!         json::deserialize_from_cache(bytes)
//!     }
//! }
//! ```
//!
//! JSON output of a struct is never empty, so the null sentinel stays
//! unambiguous with this codec too.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode as compact JSON.
///
/// # Errors
///
/// Returns `Error::SerializationError` if the value cannot be represented.
pub fn serialize_for_cache<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        error!("JSON cache serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Decode JSON bytes.
///
/// # Errors
///
/// Returns `Error::DeserializationError` for malformed or mismatched input.
pub fn deserialize_from_cache<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        warn!("JSON cache deserialization failed: {}", e);
        Error::DeserializationError(e.to_string())
    })
}
