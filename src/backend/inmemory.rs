//! Process-local backend built on a sharded concurrent map.
//!
//! A slot past its deadline is invisible to every operation and is dropped
//! lazily by the next read that touches it, or eagerly by [`InMemoryBackend::purge_expired`].

use super::CacheBackend;
use crate::error::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Slot {
    bytes: Vec<u8>,
    deadline: Option<Instant>,
}

impl Slot {
    fn with_ttl(bytes: Vec<u8>, ttl: Option<Duration>) -> Self {
        Slot {
            bytes,
            deadline: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn live(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }
}

/// Shared in-process key/value store.
///
/// Clones share the same map. `set_if_absent` and `delete_if_equals` hold the
/// shard lock of their key for the whole check-and-write, which gives them
/// the same atomicity a remote store offers across processes.
///
/// ```no_run
/// use cache_shield::backend::{CacheBackend, InMemoryBackend};
/// use std::time::Duration;
///
/// # async fn demo() -> cache_shield::Result<()> {
/// let backend = InMemoryBackend::new();
/// backend.set("cache:shop:1", b"payload".to_vec(), None).await?;
///
/// let won = backend
///     .set_if_absent("lock:shop:1", b"token".to_vec(), Duration::from_secs(10))
///     .await?;
/// assert!(won);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    slots: Arc<DashMap<String, Slot>>,
}

/// Snapshot of what the store currently holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Slots in the map, dead ones included.
    pub slots: usize,
    /// Slots past their deadline that no read has evicted yet.
    pub dead: usize,
    /// Sum of stored value sizes.
    pub bytes: usize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots, including dead ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Time left before `key` expires. `None` when the key is absent, dead,
    /// or stored without a TTL.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let slot = self.slots.get(key)?;
        if !slot.live() {
            return None;
        }
        slot.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub async fn usage(&self) -> MemoryUsage {
        self.slots
            .iter()
            .fold(MemoryUsage::default(), |mut usage, slot| {
                usage.slots += 1;
                usage.bytes += slot.bytes.len();
                if !slot.live() {
                    usage.dead += 1;
                }
                usage
            })
    }

    /// Drop every dead slot now and return how many went.
    pub async fn purge_expired(&self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.live());
        let purged = before.saturating_sub(self.slots.len());
        if purged > 0 {
            debug!("InMemory purged {} expired slot(s)", purged);
        }
        purged
    }

    pub async fn clear(&self) {
        self.slots.clear();
        warn!("⚠ InMemory store cleared");
    }
}

impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(slot) = self.slots.get(key) {
            if slot.live() {
                debug!("✓ InMemory get {} hit ({} bytes)", key, slot.bytes.len());
                return Ok(Some(slot.bytes.clone()));
            }
        }

        // A writer may have replaced the dead slot since the read above.
        self.slots.remove_if(key, |_, slot| !slot.live());
        debug!("✓ InMemory get {} miss", key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        debug!("✓ InMemory set {} ttl={:?}", key, ttl);
        self.slots.insert(key.to_owned(), Slot::with_ttl(value, ttl));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool> {
        let won = match self.slots.entry(key.to_owned()) {
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::with_ttl(value, Some(ttl)));
                true
            }
            Entry::Occupied(mut occupied) if !occupied.get().live() => {
                occupied.insert(Slot::with_ttl(value, Some(ttl)));
                true
            }
            Entry::Occupied(_) => false,
        };

        debug!("✓ InMemory set_if_absent {} ttl={:?} won={}", key, ttl, won);
        Ok(won)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        debug!("✓ InMemory delete {}", key);
        self.slots.remove(key);
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let removed = self
            .slots
            .remove_if(key, |_, slot| slot.live() && slot.bytes == expected)
            .is_some();

        debug!("✓ InMemory delete_if_equals {} removed={}", key, removed);
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.slots.get(key).is_some_and(|slot| slot.live()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded(pairs: &[(&str, &str, Option<Duration>)]) -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        for (key, value, ttl) in pairs {
            backend
                .set(key, value.as_bytes().to_vec(), *ttl)
                .await
                .expect("seed write");
        }
        backend
    }

    #[tokio::test]
    async fn stored_value_is_read_back() {
        let backend = seeded(&[("cache:shop:1", "noodles", None)]).await;

        assert_eq!(
            backend.get("cache:shop:1").await.expect("read"),
            Some(b"noodles".to_vec())
        );
        assert_eq!(backend.get("cache:shop:2").await.expect("read"), None);
    }

    #[tokio::test]
    async fn empty_value_is_a_present_value() {
        let backend = seeded(&[("cache:shop:404", "", Some(Duration::from_secs(60)))]).await;

        assert_eq!(
            backend.get("cache:shop:404").await.expect("read"),
            Some(Vec::new())
        );
        assert!(backend.exists("cache:shop:404").await.expect("exists"));
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let backend = seeded(&[("k", "v", None)]).await;

        backend.delete("k").await.expect("delete");
        backend.delete("never-there").await.expect("delete absent");

        assert!(!backend.exists("k").await.expect("exists"));
    }

    #[tokio::test]
    async fn expired_slot_is_invisible_and_evicted_on_read() {
        let backend = seeded(&[("k", "v", Some(Duration::from_millis(40)))]).await;
        assert!(backend.exists("k").await.expect("exists"));

        tokio::time::sleep(Duration::from_millis(70)).await;

        assert!(!backend.exists("k").await.expect("exists"));
        assert_eq!(backend.len().await, 1);
        assert_eq!(backend.get("k").await.expect("read"), None);
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn ttl_reports_remaining_time_only_for_expiring_keys() {
        let backend = seeded(&[
            ("expiring", "v", Some(Duration::from_secs(90))),
            ("pinned", "v", None),
        ])
        .await;

        let left = backend.ttl("expiring").await.expect("remaining ttl");
        assert!(left > Duration::from_secs(80) && left <= Duration::from_secs(90));
        assert_eq!(backend.ttl("pinned").await, None);
        assert_eq!(backend.ttl("missing").await, None);
    }

    #[tokio::test]
    async fn set_if_absent_keeps_first_writer() {
        let backend = InMemoryBackend::new();
        let ttl = Duration::from_secs(10);

        assert!(backend
            .set_if_absent("lock:a", b"first".to_vec(), ttl)
            .await
            .expect("setnx"));
        assert!(!backend
            .set_if_absent("lock:a", b"second".to_vec(), ttl)
            .await
            .expect("setnx"));
        assert_eq!(
            backend.get("lock:a").await.expect("read"),
            Some(b"first".to_vec())
        );
    }

    #[tokio::test]
    async fn set_if_absent_takes_over_expired_slot() {
        let backend = InMemoryBackend::new();
        backend
            .set_if_absent("lock:a", b"old".to_vec(), Duration::from_millis(30))
            .await
            .expect("setnx");

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(backend
            .set_if_absent("lock:a", b"new".to_vec(), Duration::from_secs(10))
            .await
            .expect("setnx"));
        assert_eq!(
            backend.get("lock:a").await.expect("read"),
            Some(b"new".to_vec())
        );
    }

    #[tokio::test]
    async fn delete_if_equals_only_matches_owner_token() {
        let backend = seeded(&[("lock:a", "token-1", Some(Duration::from_secs(10)))]).await;

        assert!(!backend
            .delete_if_equals("lock:a", b"token-2")
            .await
            .expect("compare-delete"));
        assert!(backend.exists("lock:a").await.expect("exists"));

        assert!(backend
            .delete_if_equals("lock:a", b"token-1")
            .await
            .expect("compare-delete"));
        assert!(!backend.exists("lock:a").await.expect("exists"));
        assert!(!backend
            .delete_if_equals("lock:a", b"token-1")
            .await
            .expect("compare-delete"));
    }

    #[tokio::test]
    async fn usage_and_purge_account_for_dead_slots() {
        let backend = seeded(&[
            ("short", "abc", Some(Duration::from_millis(20))),
            ("long", "defgh", None),
        ])
        .await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(
            backend.usage().await,
            MemoryUsage {
                slots: 2,
                dead: 1,
                bytes: 8
            }
        );
        assert_eq!(backend.purge_expired().await, 1);
        assert_eq!(backend.len().await, 1);

        backend.clear().await;
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn clones_see_each_others_writes() {
        let writer = InMemoryBackend::new();
        let reader = writer.clone();

        writer.set("shared", b"x".to_vec(), None).await.expect("write");

        assert_eq!(reader.get("shared").await.expect("read"), Some(b"x".to_vec()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_set_if_absent_has_one_winner() {
        let backend = InMemoryBackend::new();

        let attempts = (0..32u8).map(|n| {
            let backend = backend.clone();
            tokio::spawn(async move {
                backend
                    .set_if_absent("lock:hot", vec![n], Duration::from_secs(10))
                    .await
                    .expect("setnx")
            })
        });
        let outcomes = futures::future::join_all(attempts).await;

        let winners = outcomes
            .into_iter()
            .filter(|outcome| *outcome.as_ref().expect("task"))
            .count();
        assert_eq!(winners, 1);
    }
}
