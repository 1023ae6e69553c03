//! Cloneable front door for request handlers.

use crate::backend::CacheBackend;
use crate::client::CacheClient;
use crate::config::{CacheConfig, OperationConfig};
use crate::entity::CacheEntity;
use crate::error::Result;
use crate::observability::CacheMetrics;
use crate::repository::DataRepository;
use crate::strategy::CacheStrategy;
use std::future::Future;
use std::sync::Arc;

/// A [`CacheClient`] behind an `Arc`.
///
/// Clones share the store handle, the rebuild scheduler and the metrics
/// sink, so one service built at startup can be handed to every handler.
///
/// ```no_run
/// use cache_shield::backend::InMemoryBackend;
/// use cache_shield::repository::InMemoryRepository;
/// use cache_shield::{CacheEntity, CacheService, CacheStrategy, Result};
/// use serde::{Deserialize, Serialize};
/// use std::sync::Arc;
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Shop {
///     id: u64,
///     name: String,
/// }
///
/// impl CacheEntity for Shop {
///     type Key = u64;
///     fn cache_key(&self) -> u64 { self.id }
///     fn cache_prefix() -> &'static str { "cache:shop:" }
/// }
///
/// struct ShopHandler {
///     cache: CacheService<InMemoryBackend>,
///     shops: Arc<InMemoryRepository<Shop>>,
/// }
///
/// impl ShopHandler {
///     async fn show(&self, id: u64) -> Result<Option<Shop>> {
///         self.cache.execute(&id, &self.shops, CacheStrategy::Mutex).await
///     }
///
///     async fn rename(&self, id: u64, name: String) -> Result<()> {
///         let shops = Arc::clone(&self.shops);
///         self.cache
///             .update_and_invalidate::<Shop, _, _, _>(&id, || async move {
///                 shops.insert(Shop { id, name });
///                 Ok(())
///             })
///             .await
///     }
/// }
/// ```
#[derive(Clone)]
pub struct CacheService<B: CacheBackend> {
    client: Arc<CacheClient<B>>,
}

impl<B: CacheBackend> CacheService<B> {
    pub fn new(backend: B) -> Self {
        Self::from_client(CacheClient::new(backend))
    }

    /// Fails with `Error::ConfigError` when `config` does not validate.
    pub fn with_config(backend: B, config: CacheConfig) -> Result<Self> {
        CacheClient::with_config(backend, config).map(Self::from_client)
    }

    pub fn with_metrics(backend: B, metrics: Arc<dyn CacheMetrics>) -> Self {
        Self::from_client(CacheClient::new(backend).with_metrics(metrics))
    }

    /// Wrap a client assembled by hand.
    pub fn from_client(client: CacheClient<B>) -> Self {
        CacheService {
            client: Arc::new(client),
        }
    }

    /// Read `id` through `strategy` with the client-wide settings.
    pub async fn execute<T, R>(
        &self,
        id: &T::Key,
        repository: &Arc<R>,
        strategy: CacheStrategy,
    ) -> Result<Option<T>>
    where
        T: CacheEntity,
        R: DataRepository<T> + 'static,
    {
        self.client.query::<T, R>(id, repository, strategy).await
    }

    /// Like [`CacheService::execute`] with per-call TTL overrides.
    pub async fn execute_with_config<T, R>(
        &self,
        id: &T::Key,
        repository: &Arc<R>,
        strategy: CacheStrategy,
        config: OperationConfig,
    ) -> Result<Option<T>>
    where
        T: CacheEntity,
        R: DataRepository<T> + 'static,
    {
        self.client
            .query_with_config::<T, R>(id, repository, strategy, &config)
            .await
    }

    /// Run `write` against the database, then delete the cached entry for
    /// `id`.
    ///
    /// The delete happens only once `write` has succeeded. A failed write
    /// returns its error and leaves the cache as it was.
    pub async fn update_and_invalidate<T, F, Fut, V>(&self, id: &T::Key, write: F) -> Result<V>
    where
        T: CacheEntity,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let written = write().await?;
        self.client.invalidate::<T>(id).await?;
        Ok(written)
    }

    pub fn client(&self) -> &CacheClient<B> {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::client::Lookup;
    use crate::error::Error;
    use crate::repository::InMemoryRepository;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Voucher {
        id: u64,
        title: String,
        stock: u32,
    }

    impl CacheEntity for Voucher {
        type Key = u64;

        fn cache_key(&self) -> u64 {
            self.id
        }

        fn cache_prefix() -> &'static str {
            "cache:voucher:"
        }
    }

    fn voucher(id: u64, stock: u32) -> Voucher {
        Voucher {
            id,
            title: format!("voucher {}", id),
            stock,
        }
    }

    fn stocked(vouchers: impl IntoIterator<Item = Voucher>) -> Arc<InMemoryRepository<Voucher>> {
        let repo = Arc::new(InMemoryRepository::new());
        for v in vouchers {
            repo.insert(v);
        }
        repo
    }

    #[tokio::test]
    async fn execute_reads_through_once() {
        let service = CacheService::new(InMemoryBackend::new());
        let repo = stocked([voucher(1, 100)]);

        for _ in 0..3 {
            let got = service
                .execute::<Voucher, _>(&1, &repo, CacheStrategy::PassThrough)
                .await
                .expect("execute");
            assert_eq!(got, Some(voucher(1, 100)));
        }
        assert_eq!(repo.fetch_count(), 1);
    }

    #[test]
    fn clones_share_one_client() {
        let service = CacheService::new(InMemoryBackend::new());
        let cloned = service.clone();

        assert!(Arc::ptr_eq(&service.client, &cloned.client));
    }

    #[test]
    fn bad_config_is_rejected_up_front() {
        let config = CacheConfig::default().with_rebuild_workers(0);

        let built = CacheService::with_config(InMemoryBackend::new(), config);

        assert!(matches!(built, Err(Error::ConfigError(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn clones_serve_concurrent_handlers() {
        let service = CacheService::new(InMemoryBackend::new());
        let repo = stocked((0..8).map(|id| voucher(id, 10)));

        let handlers = (0..8u64).map(|id| {
            let service = service.clone();
            let repo = Arc::clone(&repo);
            tokio::spawn(async move {
                service
                    .execute::<Voucher, _>(&id, &repo, CacheStrategy::Mutex)
                    .await
            })
        });

        for joined in futures::future::join_all(handlers).await {
            let got = joined.expect("handler task").expect("execute");
            assert_eq!(got.map(|v| v.stock), Some(10));
        }
        assert_eq!(repo.fetch_count(), 8);
    }

    #[tokio::test]
    async fn per_call_ttl_reaches_the_store() {
        let backend = InMemoryBackend::new();
        let service = CacheService::new(backend.clone());
        let repo = stocked([voucher(1, 5)]);

        service
            .execute_with_config::<Voucher, _>(
                &1,
                &repo,
                CacheStrategy::PassThrough,
                OperationConfig::default().with_ttl(Duration::from_secs(45)),
            )
            .await
            .expect("execute");

        let left = backend.ttl("cache:voucher:1").await.expect("entry has a ttl");
        assert!(left <= Duration::from_secs(45) && left > Duration::from_secs(40));
    }

    #[tokio::test]
    async fn successful_write_drops_the_cached_entry() {
        let service = CacheService::new(InMemoryBackend::new());
        let repo = stocked([voucher(1, 100)]);
        service
            .execute::<Voucher, _>(&1, &repo, CacheStrategy::PassThrough)
            .await
            .expect("prime");

        let db = Arc::clone(&repo);
        let sold = service
            .update_and_invalidate::<Voucher, _, _, _>(&1, || async move {
                db.insert(voucher(1, 99));
                Ok(1u32)
            })
            .await
            .expect("write");

        assert_eq!(sold, 1);
        assert_eq!(
            service.client().lookup::<Voucher>(&1).await.expect("lookup"),
            Lookup::Miss
        );
        let reread = service
            .execute::<Voucher, _>(&1, &repo, CacheStrategy::PassThrough)
            .await
            .expect("execute");
        assert_eq!(reread.map(|v| v.stock), Some(99));
    }

    #[tokio::test]
    async fn failed_write_keeps_the_cached_entry() {
        let service = CacheService::new(InMemoryBackend::new());
        let repo = stocked([voucher(1, 100)]);
        service
            .execute::<Voucher, _>(&1, &repo, CacheStrategy::PassThrough)
            .await
            .expect("prime");

        let outcome = service
            .update_and_invalidate::<Voucher, _, _, ()>(&1, || async {
                Err(Error::RepositoryError("stock would go negative".into()))
            })
            .await;

        assert!(matches!(outcome, Err(Error::RepositoryError(_))));
        assert_eq!(
            service.client().lookup::<Voucher>(&1).await.expect("lookup"),
            Lookup::Hit(voucher(1, 100))
        );
    }
}
