//! Shop lookup service exercising all three read strategies.
//!
//! Run with: cargo run --example shop_lookup
//! Set `CACHE_*` variables (e.g. `CACHE_NULL_TTL_SECS=1`) to try other settings.

use cache_shield::{
    backend::InMemoryBackend, error::Result, CacheConfig, CacheEntity, CacheService,
    CacheStrategy, DataRepository, OperationConfig,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Example entity: Shop
#[derive(Clone, Serialize, Deserialize, Debug)]
struct Shop {
    id: u64,
    name: String,
    area: String,
    avg_price: u32,
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

/// Mock repository that simulates a slow database
#[derive(Default)]
struct ShopRepository {
    queries: AtomicUsize,
}

impl DataRepository<Shop> for ShopRepository {
    async fn fetch_by_id(&self, id: &u64) -> Result<Option<Shop>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        println!("  [DB] SELECT * FROM tb_shop WHERE id = {}", id);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let shop = match id {
            1 => Some(Shop {
                id: 1,
                name: "Noodle Bar".to_string(),
                area: "Downtown".to_string(),
                avg_price: 48,
            }),
            2 => Some(Shop {
                id: 2,
                name: "Tea House".to_string(),
                area: "Riverside".to_string(),
                avg_price: 25,
            }),
            _ => None,
        };

        Ok(shop)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .ok();

    println!("\n=== cache-shield - Shop Lookup ===\n");

    let config = CacheConfig::from_env()?.with_logical_ttl(Duration::from_secs(1));
    let cache = CacheService::with_config(InMemoryBackend::new(), config)?;
    let repo = Arc::new(ShopRepository::default());

    // 1. Pass-through: the second lookup of a missing shop never reaches the DB
    println!("1. Pass-through lookups of a shop that does not exist (id 99):");
    for _ in 0..3 {
        let shop = cache
            .execute::<Shop, _>(&99, &repo, CacheStrategy::PassThrough)
            .await?;
        println!("   -> {:?}", shop);
    }
    println!(
        "   ✓ DB queries so far: {}\n",
        repo.queries.load(Ordering::SeqCst)
    );

    // 2. Mutex: a burst of requests for a cold key triggers one DB query
    println!("2. 20 concurrent mutex lookups of a cold shop (id 1):");
    let before = repo.queries.load(Ordering::SeqCst);
    let mut handles = Vec::new();
    for _ in 0..20 {
        let cache = cache.clone();
        let repo = Arc::clone(&repo);
        handles.push(tokio::spawn(async move {
            cache.execute::<Shop, _>(&1, &repo, CacheStrategy::Mutex).await
        }));
    }
    for handle in handles {
        handle.await??;
    }
    println!(
        "   ✓ DB queries for the burst: {}\n",
        repo.queries.load(Ordering::SeqCst) - before
    );

    // 3. Logical expiration: stale reads are instant, the refresh runs behind
    println!("3. Logical expiration for a hot shop (id 2):");
    cache
        .client()
        .warm_logical::<Shop, _>(&2, &*repo, &OperationConfig::default())
        .await?;
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let started = Instant::now();
    let shop = cache
        .execute::<Shop, _>(&2, &repo, CacheStrategy::LogicalExpire)
        .await?;
    println!(
        "   ✓ Stale read in {:?}: {:?}",
        started.elapsed(),
        shop.map(|s| s.name)
    );

    cache.client().scheduler().wait_idle().await;
    println!(
        "   ✓ Background rebuilds: {:?}\n",
        cache.client().scheduler().stats()
    );

    // 4. Write path: invalidate only after the write commits
    println!("4. Renaming shop 1 and invalidating its entry:");
    cache
        .update_and_invalidate::<Shop, _, _, _>(&1, || async {
            println!("  [DB] UPDATE tb_shop SET name = 'Noodle Palace' WHERE id = 1");
            Ok(())
        })
        .await?;
    println!(
        "   ✓ Cached entry after invalidation: {:?}\n",
        cache.client().lookup::<Shop>(&1).await?
    );

    Ok(())
}
