//! # cache-shield
//!
//! Read-through caching for async services that sit in front of a database,
//! with protection against the two ways such a cache fails under load.
//!
//! **Penetration.** Requests for ids that do not exist would reach the
//! database every time. The first miss stores an empty null sentinel with a
//! short TTL and later requests answer `None` from the cache.
//!
//! **Breakdown.** When a hot key expires, every concurrent request would
//! rebuild it at once. Two strategies prevent that:
//!
//! - [`CacheStrategy::Mutex`]: one caller takes a store-wide `SET NX` lock
//!   and rebuilds; the rest back off and re-read until the value appears or
//!   the wait deadline passes.
//! - [`CacheStrategy::LogicalExpire`]: entries carry their own expiry and no
//!   store TTL. Stale values are served at once while the
//!   [`RebuildScheduler`] refreshes them on a bounded worker pool.
//!
//! Any [`CacheBackend`] with atomic set-if-absent and compare-and-delete can
//! back the cache; [`backend::InMemoryBackend`] and, behind the `redis`
//! feature, `backend::RedisBackend` ship with the crate. Loaders plug in
//! through [`DataRepository`].
//!
//! ## Quick start
//!
//! ```no_run
//! use cache_shield::backend::InMemoryBackend;
//! use cache_shield::repository::InMemoryRepository;
//! use cache_shield::{CacheEntity, CacheService, CacheStrategy};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Shop {
//!     id: u64,
//!     name: String,
//! }
//!
//! impl CacheEntity for Shop {
//!     type Key = u64;
//!     fn cache_key(&self) -> u64 { self.id }
//!     fn cache_prefix() -> &'static str { "cache:shop:" }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> cache_shield::Result<()> {
//! let repo = Arc::new(InMemoryRepository::new());
//! repo.insert(Shop { id: 1, name: "Noodle Bar".into() });
//!
//! let cache = CacheService::new(InMemoryBackend::new());
//! let shop = cache.execute::<Shop, _>(&1, &repo, CacheStrategy::Mutex).await?;
//! assert!(shop.is_some());
//!
//! // Confirmed absent: cached as a null sentinel, the repository sees one query.
//! assert!(cache.execute::<Shop, _>(&2, &repo, CacheStrategy::PassThrough).await?.is_none());
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod client;
pub mod config;
pub mod entity;
pub mod error;
pub mod key;
pub mod lock;
pub mod observability;
pub mod repository;
pub mod scheduler;
pub mod serialization;
pub mod service;
pub mod strategy;

pub use backend::CacheBackend;
pub use client::{CacheClient, Lookup};
pub use config::{CacheConfig, OperationConfig, TtlPolicy};
pub use entity::CacheEntity;
pub use error::{Error, Result};
pub use lock::{DistributedLock, LockGuard};
pub use repository::DataRepository;
pub use scheduler::RebuildScheduler;
pub use service::CacheService;
pub use strategy::CacheStrategy;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
