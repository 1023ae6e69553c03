//! Loaders that fetch entities from the system of record.
//!
//! The `DataRepository` trait is the entity loader behind the cache: it is
//! called on a miss (pass-through and mutex strategies) and by background
//! rebuilds (logical expiration). Implement it for any storage backend:
//! SQLx, tokio-postgres, Diesel, an HTTP service, or the in-memory double in
//! this module.
//!
//! # Absence versus failure
//!
//! Return `Ok(None)` when the entity does not exist; the cache records that
//! absence. Return `Err` for genuine failures (connectivity, timeouts,
//! decoding); nothing is cached and the lock, if any, is released.
//!
//! # Test double
//!
//! ```
//! use cache_shield::repository::{DataRepository, InMemoryRepository};
//! use cache_shield::CacheEntity;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Shop {
//!     id: u64,
//!     name: String,
//! }
//!
//! impl CacheEntity for Shop {
//!     type Key = u64;
//!     fn cache_key(&self) -> Self::Key { self.id }
//!     fn cache_prefix() -> &'static str { "cache:shop:" }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> cache_shield::Result<()> {
//! let repo = InMemoryRepository::new();
//! repo.insert(Shop { id: 1, name: "Noodle Bar".to_string() });
//!
//! let shop = repo.fetch_by_id(&1).await?;
//! assert_eq!(shop.map(|s| s.name), Some("Noodle Bar".to_string()));
//! assert_eq!(repo.fetch_count(), 1);
//! # Ok(())
//! # }
//! ```

use crate::entity::CacheEntity;
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Loader consulted on a miss and by background rebuilds.
///
/// `Ok(None)` means the id does not exist and gets cached as such. `Err`
/// caches nothing. The future must be `Send`; `async fn` in the impl is fine.
pub trait DataRepository<T: CacheEntity>: Send + Sync {
    fn fetch_by_id(&self, id: &T::Key) -> impl Future<Output = Result<Option<T>>> + Send;
}

impl<T: CacheEntity, R: DataRepository<T>> DataRepository<T> for Arc<R> {
    fn fetch_by_id(&self, id: &T::Key) -> impl Future<Output = Result<Option<T>>> + Send {
        (**self).fetch_by_id(id)
    }
}

/// In-memory repository for tests, demos and benchmarks.
///
/// Counts every `fetch_by_id` call, which is how tests observe whether the
/// cache reached the loader. Latency and failures can be injected to model a
/// slow or broken database.
pub struct InMemoryRepository<T: CacheEntity> {
    data: DashMap<T::Key, T>,
    fetches: AtomicUsize,
    latency: Option<Duration>,
    failing: AtomicBool,
}

impl<T: CacheEntity> InMemoryRepository<T> {
    pub fn new() -> Self {
        InMemoryRepository {
            data: DashMap::new(),
            fetches: AtomicUsize::new(0),
            latency: None,
            failing: AtomicBool::new(false),
        }
    }

    /// Delay every fetch by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Insert or replace an entity under its own key.
    pub fn insert(&self, entity: T) {
        self.data.insert(entity.cache_key(), entity);
    }

    pub fn remove(&self, id: &T::Key) -> Option<T> {
        self.data.remove(id).map(|(_, entity)| entity)
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of `fetch_by_id` calls so far, failed ones included.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn reset_fetch_count(&self) {
        self.fetches.store(0, Ordering::SeqCst);
    }

    /// Make every fetch fail with `Error::RepositoryError` until turned off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl<T: CacheEntity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CacheEntity> DataRepository<T> for InMemoryRepository<T> {
    async fn fetch_by_id(&self, id: &T::Key) -> Result<Option<T>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::RepositoryError(format!(
                "injected failure loading {}",
                id
            )));
        }

        Ok(self.data.get(id).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Instant;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Shop {
        id: u64,
        name: String,
    }

    impl CacheEntity for Shop {
        type Key = u64;

        fn cache_key(&self) -> Self::Key {
            self.id
        }

        fn cache_prefix() -> &'static str {
            "cache:shop:"
        }
    }

    fn shop(id: u64) -> Shop {
        Shop {
            id,
            name: format!("shop-{}", id),
        }
    }

    #[tokio::test]
    async fn test_in_memory_repository() {
        let repo = InMemoryRepository::new();
        repo.insert(shop(1));

        let fetched = repo.fetch_by_id(&1).await.expect("Failed to fetch");
        assert_eq!(fetched, Some(shop(1)));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_repository_miss() {
        let repo: InMemoryRepository<Shop> = InMemoryRepository::new();

        let fetched = repo.fetch_by_id(&404).await.expect("Failed to fetch");
        assert!(fetched.is_none());
        assert_eq!(repo.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_count_and_remove() {
        let repo = InMemoryRepository::new();
        repo.insert(shop(1));

        repo.fetch_by_id(&1).await.expect("Failed to fetch");
        repo.fetch_by_id(&1).await.expect("Failed to fetch");
        assert_eq!(repo.fetch_count(), 2);

        assert_eq!(repo.remove(&1), Some(shop(1)));
        assert!(repo.fetch_by_id(&1).await.expect("Failed to fetch").is_none());

        repo.reset_fetch_count();
        assert_eq!(repo.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let repo = InMemoryRepository::new();
        repo.insert(shop(1));
        repo.set_failing(true);

        let result = repo.fetch_by_id(&1).await;
        assert!(matches!(result, Err(Error::RepositoryError(_))));

        repo.set_failing(false);
        assert!(repo.fetch_by_id(&1).await.expect("Failed to fetch").is_some());
    }

    #[tokio::test]
    async fn test_latency_injection() {
        let repo = InMemoryRepository::new().with_latency(Duration::from_millis(30));
        repo.insert(shop(1));

        let started = Instant::now();
        repo.fetch_by_id(&1).await.expect("Failed to fetch");
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_arc_repository_delegates() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert(shop(7));

        let fetched = DataRepository::<Shop>::fetch_by_id(&repo, &7)
            .await
            .expect("Failed to fetch");
        assert_eq!(fetched, Some(shop(7)));
        assert_eq!(repo.fetch_count(), 1);
    }
}
