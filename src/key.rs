//! Store keys for entities and their rebuild locks.

use crate::entity::CacheEntity;
use std::fmt::Display;

/// Joins a prefix and an id verbatim; the prefix carries its own separator.
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    pub fn build<T: CacheEntity>(id: &T::Key) -> String {
        Self::build_with_prefix(T::cache_prefix(), id)
    }

    pub fn lock<T: CacheEntity>(id: &T::Key) -> String {
        Self::build_with_prefix(&T::lock_prefix(), id)
    }

    pub fn build_with_prefix(prefix: &str, id: &dyn Display) -> String {
        let id = id.to_string();
        let mut key = String::with_capacity(prefix.len() + id.len());
        key.push_str(prefix);
        key.push_str(&id);
        key
    }
}
