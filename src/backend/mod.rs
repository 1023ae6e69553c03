//! Key/value stores the cache runs on.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;

pub mod inmemory;
#[cfg(feature = "redis")]
pub mod redis;

pub use inmemory::{InMemoryBackend, MemoryUsage};
#[cfg(feature = "redis")]
pub use redis::{PoolStats, RedisBackend, RedisConfig};

/// Byte-oriented store shared by every process that caches the same data.
///
/// The rebuild lock is built from `set_if_absent` and `delete_if_equals`
/// alone, so both must be atomic at the store, not merely within one
/// process. Methods take `&self`; clones must address the same store.
///
/// A present key may hold an empty value. That is the null sentinel and must
/// be returned as `Some(vec![])`, never folded into `None`.
///
/// Implementations may write `async fn` for each method; the returned
/// futures have to be `Send` because background rebuilds drive them from
/// spawned tasks.
pub trait CacheBackend: Send + Sync + Clone + 'static {
    /// `Ok(None)` when the key is absent or physically expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Overwrite `key`. `ttl: None` stores it without physical expiry.
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Write `key` only if it is absent; `true` when this call wrote it.
    fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Remove `key`. Absent keys are not an error.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Remove `key` only while it still holds `expected`; `true` when removed.
    ///
    /// Releases a lock without clobbering one a different holder took over
    /// after the first expired.
    fn delete_if_equals(
        &self,
        key: &str,
        expected: &[u8],
    ) -> impl Future<Output = Result<bool>> + Send;

    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.get(key).await?.is_some()) }
    }

    fn health_check(&self) -> impl Future<Output = Result<bool>> + Send {
        async { Ok(true) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Bare store implementing only the required methods, without TTLs.
    #[derive(Clone, Default)]
    struct MapBackend {
        map: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl CacheBackend for MapBackend {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.map.lock().expect("map lock").get(key).cloned())
        }

        async fn set(&self, key: &str, value: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
            self.map.lock().expect("map lock").insert(key.to_owned(), value);
            Ok(())
        }

        async fn set_if_absent(&self, key: &str, value: Vec<u8>, _ttl: Duration) -> Result<bool> {
            let mut map = self.map.lock().expect("map lock");
            if map.contains_key(key) {
                return Ok(false);
            }
            map.insert(key.to_owned(), value);
            Ok(true)
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.map.lock().expect("map lock").remove(key);
            Ok(())
        }

        async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
            let mut map = self.map.lock().expect("map lock");
            if map.get(key).is_some_and(|held| held == expected) {
                map.remove(key);
                return Ok(true);
            }
            Ok(false)
        }
    }

    #[tokio::test]
    async fn default_exists_counts_the_sentinel_as_present() {
        let backend = MapBackend::default();
        backend
            .set("cache:shop:404", Vec::new(), None)
            .await
            .expect("write sentinel");

        assert_eq!(
            backend.get("cache:shop:404").await.expect("read"),
            Some(Vec::new())
        );
        assert!(backend.exists("cache:shop:404").await.expect("exists"));
        assert!(!backend.exists("cache:shop:405").await.expect("exists"));
    }

    #[tokio::test]
    async fn default_health_check_reports_healthy() {
        assert!(MapBackend::default().health_check().await.expect("health"));
        assert!(InMemoryBackend::new().health_check().await.expect("health"));
    }

    #[tokio::test]
    async fn minimal_backend_supports_the_lock_primitives() {
        let lock = crate::lock::DistributedLock::new(MapBackend::default());

        let guard = lock
            .try_lock("lock:cache:shop:1", Duration::from_secs(10))
            .await
            .expect("acquire")
            .expect("lock is free");
        assert!(lock
            .try_lock("lock:cache:shop:1", Duration::from_secs(10))
            .await
            .expect("acquire")
            .is_none());

        assert!(guard.release().await.expect("release"));
    }
}
