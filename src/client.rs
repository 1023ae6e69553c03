//! Cache client - main entry point for cache operations.

use crate::backend::CacheBackend;
use crate::config::{CacheConfig, OperationConfig};
use crate::entity::CacheEntity;
use crate::error::{Error, Result};
use crate::key::CacheKeyBuilder;
use crate::lock::DistributedLock;
use crate::observability::{CacheMetrics, NoOpMetrics, RebuildOutcome};
use crate::repository::DataRepository;
use crate::scheduler::RebuildScheduler;
use crate::serialization::{is_null_sentinel, LogicalExpiryEnvelope, NULL_SENTINEL};
use crate::strategy::CacheStrategy;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the cache holds for a key, before any loader is consulted.
#[derive(Clone, Debug, PartialEq)]
pub enum Lookup<T> {
    /// A decoded entity.
    Hit(T),
    /// The null sentinel: the entity is known not to exist.
    Null,
    /// Nothing usable is cached.
    Miss,
}

/// Core cache client - runs the read strategies against one backend.
///
/// Holds the backend, the rebuild lock, the rebuild scheduler and the
/// settings shared by every query.
///
/// # Example
///
/// ```ignore
/// use cache_shield::{CacheClient, CacheStrategy, backend::InMemoryBackend};
/// use std::sync::Arc;
///
/// let client = CacheClient::new(InMemoryBackend::new());
/// let repo = Arc::new(ShopRepository::new(pool));
///
/// let shop = client.query::<Shop, _>(&1, &repo, CacheStrategy::Mutex).await?;
/// ```
pub struct CacheClient<B: CacheBackend> {
    backend: B,
    lock: DistributedLock<B>,
    scheduler: RebuildScheduler,
    config: CacheConfig,
    metrics: Arc<dyn CacheMetrics>,
}

impl<B: CacheBackend> CacheClient<B> {
    /// Create a client with default settings.
    pub fn new(backend: B) -> Self {
        Self::build(backend, CacheConfig::default())
    }

    /// Create a client with custom settings.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if `config` is invalid.
    pub fn with_config(backend: B, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(backend, config))
    }

    fn build(backend: B, config: CacheConfig) -> Self {
        CacheClient {
            lock: DistributedLock::new(backend.clone()),
            scheduler: RebuildScheduler::from_config(&config),
            backend,
            config,
            metrics: Arc::new(NoOpMetrics),
        }
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn lock(&self) -> &DistributedLock<B> {
        &self.lock
    }

    /// Scheduler running this client's background rebuilds.
    pub fn scheduler(&self) -> &RebuildScheduler {
        &self.scheduler
    }

    /// Read the plain entry for `id` without loading anything.
    ///
    /// Undecodable entries are evicted and reported as a miss.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the backend fails or the entity fails validation.
    pub async fn lookup<T: CacheEntity>(&self, id: &T::Key) -> Result<Lookup<T>> {
        let key = CacheKeyBuilder::build::<T>(id);
        self.lookup_key::<T>(&key).await
    }

    async fn lookup_key<T: CacheEntity>(&self, key: &str) -> Result<Lookup<T>> {
        let bytes = match self.backend.get(key).await? {
            Some(bytes) => bytes,
            None => return Ok(Lookup::Miss),
        };

        if is_null_sentinel(&bytes) {
            return Ok(Lookup::Null);
        }

        match T::deserialize_from_cache(&bytes) {
            Ok(entity) => {
                entity.validate()?;
                Ok(Lookup::Hit(entity))
            }
            Err(e) if e.is_corrupt_entry() => {
                warn!("Evicting undecodable entry {}: {}", key, e);
                self.backend.delete(key).await?;
                Ok(Lookup::Miss)
            }
            Err(e) => Err(e),
        }
    }

    /// Query with the given strategy and default per-operation settings.
    ///
    /// # Errors
    ///
    /// See [`CacheClient::query_with_config`].
    pub async fn query<T, R>(
        &self,
        id: &T::Key,
        repository: &Arc<R>,
        strategy: CacheStrategy,
    ) -> Result<Option<T>>
    where
        T: CacheEntity,
        R: DataRepository<T> + 'static,
    {
        self.query_with_config::<T, R>(id, repository, strategy, &OperationConfig::default())
            .await
    }

    /// Query with the given strategy and per-operation overrides.
    ///
    /// # Errors
    ///
    /// Returns `Err` in these cases:
    /// - `Error::BackendError`: Cache backend is unavailable
    /// - `Error::RepositoryError`: Loader failed (pass-through and mutex)
    /// - `Error::Timeout`: Rebuild lock not acquired in time (mutex)
    /// - `Error::ValidationError`: Entity validation fails
    /// - `Error::SerializationError`: Entity serialization fails
    pub async fn query_with_config<T, R>(
        &self,
        id: &T::Key,
        repository: &Arc<R>,
        strategy: CacheStrategy,
        config: &OperationConfig,
    ) -> Result<Option<T>>
    where
        T: CacheEntity,
        R: DataRepository<T> + 'static,
    {
        debug!(
            "» Query {}{} (strategy: {})",
            T::cache_prefix(),
            id,
            strategy
        );

        match strategy {
            CacheStrategy::PassThrough => {
                self.query_pass_through::<T, R>(id, repository, config)
                    .await
            }
            CacheStrategy::Mutex => self.query_with_mutex::<T, R>(id, repository, config).await,
            CacheStrategy::LogicalExpire => {
                self.query_logical_expire::<T, R>(id, repository, config)
                    .await
            }
        }
    }

    /// Cache-aside read that also caches absence.
    ///
    /// A miss calls the loader once; the result is stored with the data TTL,
    /// or the null sentinel with the null TTL when nothing was found.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the backend read or the loader fails.
    pub async fn query_pass_through<T, R>(
        &self,
        id: &T::Key,
        repository: &R,
        config: &OperationConfig,
    ) -> Result<Option<T>>
    where
        T: CacheEntity,
        R: DataRepository<T>,
    {
        let key = CacheKeyBuilder::build::<T>(id);

        let result = match self.serve_cached::<T>(&key).await {
            Ok(Some(served)) => Ok(served),
            Ok(None) => {
                self.load_and_store::<T, R>(id, &key, repository, config)
                    .await
            }
            Err(e) => Err(e),
        };

        self.observe(&key, result)
    }

    /// Pass-through read where only the holder of the rebuild lock loads.
    ///
    /// Callers that find the lock taken back off (doubling from
    /// `lock_retry_backoff` up to `max_lock_backoff`) and start over, until
    /// the entry appears or they win the lock.
    ///
    /// # Errors
    ///
    /// - `Error::Timeout`: lock not acquired within `max_lock_retries`
    ///   attempts or `lock_wait_timeout`
    /// - `Error::BackendError` / `Error::RepositoryError`: propagated after
    ///   the lock is released
    pub async fn query_with_mutex<T, R>(
        &self,
        id: &T::Key,
        repository: &R,
        config: &OperationConfig,
    ) -> Result<Option<T>>
    where
        T: CacheEntity,
        R: DataRepository<T>,
    {
        let key = CacheKeyBuilder::build::<T>(id);
        let result = self
            .mutex_loop::<T, R>(id, &key, repository, config)
            .await;
        self.observe(&key, result)
    }

    async fn mutex_loop<T, R>(
        &self,
        id: &T::Key,
        key: &str,
        repository: &R,
        config: &OperationConfig,
    ) -> Result<Option<T>>
    where
        T: CacheEntity,
        R: DataRepository<T>,
    {
        let lock_key = CacheKeyBuilder::lock::<T>(id);
        let lock_ttl = config.lock_ttl(&self.config);
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            if let Some(served) = self.serve_cached::<T>(key).await? {
                return Ok(served);
            }

            if let Some(guard) = self.lock.try_lock(&lock_key, lock_ttl).await? {
                let result = self
                    .rebuild_locked::<T, R>(id, key, repository, config)
                    .await;
                // A failed release is logged by the guard; the lock TTL cleans up.
                let _ = guard.release().await;
                return result;
            }

            attempts += 1;
            self.metrics.record_lock_contended(&lock_key);

            let waited = started.elapsed();
            if attempts >= self.config.max_lock_retries || waited >= self.config.lock_wait_timeout
            {
                warn!(
                    "✗ Gave up on lock {} after {} attempt(s) in {:?}",
                    lock_key, attempts, waited
                );
                return Err(Error::Timeout(format!(
                    "lock {} not acquired after {} attempt(s) in {:?}",
                    lock_key, attempts, waited
                )));
            }

            let backoff = self
                .config
                .backoff_for(attempts)
                .min(self.config.lock_wait_timeout.saturating_sub(waited));
            debug!(
                "Lock {} held elsewhere, retrying in {:?} (attempt {})",
                lock_key, backoff, attempts
            );
            tokio::time::sleep(backoff).await;
        }
    }

    /// Rebuild under the lock: another holder may have filled the entry
    /// between our miss and our acquisition.
    async fn rebuild_locked<T, R>(
        &self,
        id: &T::Key,
        key: &str,
        repository: &R,
        config: &OperationConfig,
    ) -> Result<Option<T>>
    where
        T: CacheEntity,
        R: DataRepository<T>,
    {
        match self.lookup_key::<T>(key).await? {
            Lookup::Hit(entity) => {
                debug!("✓ {} filled while waiting for the lock", key);
                Ok(Some(entity))
            }
            Lookup::Null => Ok(None),
            Lookup::Miss => {
                self.load_and_store::<T, R>(id, key, repository, config)
                    .await
            }
        }
    }

    /// Never-blocking read over logical-expiry envelopes.
    ///
    /// Entries written by [`CacheClient::set_with_logical_expire`] or
    /// [`CacheClient::warm_logical`] have no physical TTL. Once logically
    /// expired they are still served while one background rebuild, guarded by
    /// the rebuild lock, refreshes them. A key that was never warmed returns
    /// `None` without calling the loader.
    ///
    /// # Errors
    ///
    /// Returns `Err` only if the backend read fails. Rebuild failures are
    /// logged and counted, never returned.
    pub async fn query_logical_expire<T, R>(
        &self,
        id: &T::Key,
        repository: &Arc<R>,
        config: &OperationConfig,
    ) -> Result<Option<T>>
    where
        T: CacheEntity,
        R: DataRepository<T> + 'static,
    {
        let timer = Instant::now();
        let key = CacheKeyBuilder::build::<T>(id);

        let bytes = match self.backend.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.metrics.record_miss(&key, timer.elapsed());
                debug!("✗ {} not warmed, nothing to serve", key);
                return Ok(None);
            }
            Err(e) => return self.observe(&key, Err(e)),
        };

        if is_null_sentinel(&bytes) {
            self.metrics.record_null_hit(&key, timer.elapsed());
            return Ok(None);
        }

        let decoded = LogicalExpiryEnvelope::from_bytes(&bytes).and_then(|envelope| {
            let entity = T::deserialize_from_cache(&envelope.data)?;
            entity.validate()?;
            Ok((envelope, entity))
        });

        let (envelope, entity) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Undecodable logical entry {}: {}; rebuilding", key, e);
                self.metrics.record_error(&key, &e.to_string());
                self.schedule_rebuild::<T, R>(id, &key, repository, config)
                    .await;
                return Ok(None);
            }
        };

        if !envelope.is_expired() {
            self.metrics.record_hit(&key, timer.elapsed());
            return Ok(Some(entity));
        }

        self.metrics.record_stale(&key);
        debug!("{} logically expired, serving stale value", key);
        self.schedule_rebuild::<T, R>(id, &key, repository, config)
            .await;

        Ok(Some(entity))
    }

    /// Take the rebuild lock and queue a refresh. Never fails the caller.
    async fn schedule_rebuild<T, R>(
        &self,
        id: &T::Key,
        key: &str,
        repository: &Arc<R>,
        config: &OperationConfig,
    ) where
        T: CacheEntity,
        R: DataRepository<T> + 'static,
    {
        let lock_key = CacheKeyBuilder::lock::<T>(id);

        let guard = match self
            .lock
            .try_lock(&lock_key, config.lock_ttl(&self.config))
            .await
        {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                self.metrics.record_lock_contended(&lock_key);
                debug!("Rebuild of {} already in progress", key);
                return;
            }
            Err(e) => {
                warn!("Could not take rebuild lock {}: {}", lock_key, e);
                self.metrics.record_error(key, &e.to_string());
                return;
            }
        };

        let slot = match self.scheduler.reserve() {
            Ok(slot) => slot,
            Err(_) => {
                let _ = guard.release().await;
                self.metrics.record_rebuild(key, RebuildOutcome::Rejected);
                return;
            }
        };

        let backend = self.backend.clone();
        let repository = Arc::clone(repository);
        let metrics = Arc::clone(&self.metrics);
        let id = id.clone();
        let task_key = key.to_string();
        let logical_ttl = config.logical_ttl(&self.config);

        let task = async move {
            let result = refresh_logical::<T, B, R>(
                &backend,
                &*repository,
                &*metrics,
                &id,
                &task_key,
                logical_ttl,
            )
            .await;
            let _ = guard.release().await;

            match result {
                Ok(outcome) => {
                    metrics.record_rebuild(&task_key, outcome);
                    Ok(())
                }
                Err(e) => {
                    metrics.record_rebuild(&task_key, RebuildOutcome::Failed);
                    metrics.record_error(&task_key, &e.to_string());
                    Err(e)
                }
            }
        };

        if slot.spawn(key, task).is_err() {
            self.metrics.record_rebuild(key, RebuildOutcome::Rejected);
        }
    }

    /// Serve a hit or a cached absence; `None` means the caller must load.
    async fn serve_cached<T: CacheEntity>(&self, key: &str) -> Result<Option<Option<T>>> {
        let timer = Instant::now();

        match self.lookup_key::<T>(key).await? {
            Lookup::Hit(entity) => {
                self.metrics.record_hit(key, timer.elapsed());
                debug!("✓ Cache hit for {}", key);
                Ok(Some(Some(entity)))
            }
            Lookup::Null => {
                self.metrics.record_null_hit(key, timer.elapsed());
                debug!("✓ Null sentinel hit for {}", key);
                Ok(Some(None))
            }
            Lookup::Miss => {
                self.metrics.record_miss(key, timer.elapsed());
                debug!("✗ Cache miss for {}", key);
                Ok(None)
            }
        }
    }

    /// Call the loader and cache what it returned.
    ///
    /// A failed cache write is logged; the loaded value is still returned.
    async fn load_and_store<T, R>(
        &self,
        id: &T::Key,
        key: &str,
        repository: &R,
        config: &OperationConfig,
    ) -> Result<Option<T>>
    where
        T: CacheEntity,
        R: DataRepository<T>,
    {
        let timer = Instant::now();
        let loaded = repository.fetch_by_id(id).await?;
        self.metrics
            .record_load(key, loaded.is_some(), timer.elapsed());

        let (bytes, ttl) = match &loaded {
            Some(entity) => {
                entity.validate()?;
                (
                    entity.serialize_for_cache()?,
                    config.data_ttl(&self.config, T::cache_prefix()),
                )
            }
            None => (NULL_SENTINEL.to_vec(), Some(config.null_ttl(&self.config))),
        };

        match self.backend.set(key, bytes, ttl).await {
            Ok(()) => debug!(
                "✓ Cached {} for {} (TTL: {:?})",
                if loaded.is_some() { "entity" } else { "null sentinel" },
                key,
                ttl
            ),
            Err(e) => {
                warn!("Failed to cache {}: {}", key, e);
                self.metrics.record_error(key, &e.to_string());
            }
        }

        Ok(loaded)
    }

    fn observe<V>(&self, key: &str, result: Result<V>) -> Result<V> {
        if let Err(e) = &result {
            self.metrics.record_error(key, &e.to_string());
        }
        result
    }

    /// Write `entity` as a plain entry with the data TTL.
    ///
    /// # Errors
    ///
    /// Returns `Err` if validation, serialization or the backend write fails.
    pub async fn set<T: CacheEntity>(&self, entity: &T, config: &OperationConfig) -> Result<()> {
        entity.validate()?;
        let key = CacheKeyBuilder::build::<T>(&entity.cache_key());
        let ttl = config.data_ttl(&self.config, T::cache_prefix());

        self.backend
            .set(&key, entity.serialize_for_cache()?, ttl)
            .await?;
        debug!("✓ Set {} (TTL: {:?})", key, ttl);
        Ok(())
    }

    /// Write `entity` as a logical-expiry entry that goes stale after
    /// `logical_ttl` and is never physically expired.
    ///
    /// # Errors
    ///
    /// Returns `Err` if validation, serialization or the backend write fails.
    pub async fn set_with_logical_expire<T: CacheEntity>(
        &self,
        entity: &T,
        logical_ttl: Duration,
    ) -> Result<()> {
        entity.validate()?;
        let key = CacheKeyBuilder::build::<T>(&entity.cache_key());
        let envelope = LogicalExpiryEnvelope::expiring_in(entity.serialize_for_cache()?, logical_ttl);

        self.backend.set(&key, envelope.to_bytes()?, None).await?;
        debug!("✓ Set {} (logical TTL: {:?})", key, logical_ttl);
        Ok(())
    }

    /// Load `id` and pre-warm its logical-expiry entry.
    ///
    /// Returns whether the entity exists. When it does not, any existing
    /// entry is removed.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the loader or the backend fails.
    pub async fn warm_logical<T, R>(
        &self,
        id: &T::Key,
        repository: &R,
        config: &OperationConfig,
    ) -> Result<bool>
    where
        T: CacheEntity,
        R: DataRepository<T>,
    {
        let key = CacheKeyBuilder::build::<T>(id);
        let timer = Instant::now();
        let loaded = repository.fetch_by_id(id).await?;
        self.metrics
            .record_load(&key, loaded.is_some(), timer.elapsed());

        match loaded {
            Some(entity) => {
                self.set_with_logical_expire(&entity, config.logical_ttl(&self.config))
                    .await?;
                info!("✓ Warmed {}", key);
                Ok(true)
            }
            None => {
                self.backend.delete(&key).await?;
                debug!("Nothing to warm for {}", key);
                Ok(false)
            }
        }
    }

    /// Remove the entry for `id`, so the next query reloads it.
    ///
    /// Call after the database write has committed.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the backend fails.
    pub async fn invalidate<T: CacheEntity>(&self, id: &T::Key) -> Result<()> {
        let key = CacheKeyBuilder::build::<T>(id);
        self.backend.delete(&key).await?;
        debug!("✓ Invalidated {}", key);
        Ok(())
    }
}

/// Background half of the logical-expiration strategy.
///
/// Runs under the rebuild lock. Skips the load when another rebuild already
/// refreshed the entry; deletes the entry when the entity is gone.
async fn refresh_logical<T, B, R>(
    backend: &B,
    repository: &R,
    metrics: &dyn CacheMetrics,
    id: &T::Key,
    key: &str,
    logical_ttl: Duration,
) -> Result<RebuildOutcome>
where
    T: CacheEntity,
    B: CacheBackend,
    R: DataRepository<T>,
{
    if let Some(bytes) = backend.get(key).await? {
        // Fresh only if the entity inside still decodes; an entry written
        // under an older schema is rebuilt regardless of its expiry.
        let fresh = !is_null_sentinel(&bytes)
            && LogicalExpiryEnvelope::from_bytes(&bytes)
                .and_then(|envelope| {
                    let entity = T::deserialize_from_cache(&envelope.data)?;
                    entity.validate()?;
                    Ok(!envelope.is_expired())
                })
                .unwrap_or(false);
        if fresh {
            debug!("{} already refreshed, skipping rebuild", key);
            return Ok(RebuildOutcome::Skipped);
        }
    }

    let timer = Instant::now();
    let loaded = repository.fetch_by_id(id).await?;
    metrics.record_load(key, loaded.is_some(), timer.elapsed());

    match loaded {
        Some(entity) => {
            entity.validate()?;
            let envelope =
                LogicalExpiryEnvelope::expiring_in(entity.serialize_for_cache()?, logical_ttl);
            backend.set(key, envelope.to_bytes()?, None).await?;
            info!("✓ Rebuilt {} (fresh for {:?})", key, logical_ttl);
            Ok(RebuildOutcome::Refreshed)
        }
        None => {
            backend.delete(key).await?;
            info!("Entity behind {} no longer exists, entry removed", key);
            Ok(RebuildOutcome::Removed)
        }
    }
}
