//! Distributed rebuild lock built on the backend's atomic primitives.
//!
//! A lock is a key created with `set_if_absent` and a short TTL. Its value is
//! a random token, and release is a compare-and-delete on that token, so a
//! holder whose TTL ran out cannot delete a lock that someone else has since
//! acquired. The TTL bounds how long a crashed holder can block rebuilds.

use crate::backend::CacheBackend;
use crate::error::Result;
use std::time::Duration;
use uuid::Uuid;

/// Mutual exclusion across every process sharing one backend.
#[derive(Clone)]
pub struct DistributedLock<B: CacheBackend> {
    backend: B,
}

impl<B: CacheBackend> DistributedLock<B> {
    pub fn new(backend: B) -> Self {
        DistributedLock { backend }
    }

    /// Try to take the lock at `key` without waiting.
    ///
    /// Returns `Ok(None)` when another holder has it.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the backend fails.
    pub async fn try_lock(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard<B>>> {
        let token = Uuid::new_v4().to_string();
        let acquired = self
            .backend
            .set_if_absent(key, token.as_bytes().to_vec(), ttl)
            .await?;

        if !acquired {
            debug!("Lock {} is held elsewhere", key);
            return Ok(None);
        }

        debug!("🔒 Lock {} acquired (TTL: {:?})", key, ttl);
        Ok(Some(LockGuard {
            backend: self.backend.clone(),
            key: key.to_string(),
            token,
            released: false,
        }))
    }

    /// Whether some holder currently has the lock.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the backend fails.
    pub async fn is_locked(&self, key: &str) -> Result<bool> {
        self.backend.exists(key).await
    }

    /// Delete the lock regardless of who holds it.
    ///
    /// Operator escape hatch for a lock known to be orphaned. Unsafe against a
    /// live holder: it will carry on believing it holds the lock while a
    /// second rebuilder acquires it.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the backend fails.
    pub async fn force_unlock(&self, key: &str) -> Result<()> {
        warn!("⚠ Force-unlocking {}", key);
        self.backend.delete(key).await
    }
}

/// Proof of holding a lock.
///
/// Call [`LockGuard::release`] on every exit path. A guard dropped without
/// release (panic, cancelled future) schedules a best-effort release on the
/// current Tokio runtime; the lock TTL covers the case where that also fails.
pub struct LockGuard<B: CacheBackend> {
    backend: B,
    key: String,
    token: String,
    released: bool,
}

impl<B: CacheBackend> LockGuard<B> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Release the lock if this guard still owns it.
    ///
    /// Returns `false` when the lock had already expired (and possibly been
    /// re-acquired by another holder, whose lock is left untouched).
    ///
    /// # Errors
    ///
    /// Returns `Err` if the backend fails; the lock then expires by TTL.
    pub async fn release(mut self) -> Result<bool> {
        let result = self
            .backend
            .delete_if_equals(&self.key, self.token.as_bytes())
            .await;
        self.released = true;

        match &result {
            Ok(true) => debug!("🔓 Lock {} released", self.key),
            Ok(false) => warn!(
                "Lock {} expired before release; rebuild outlived the lock TTL",
                self.key
            ),
            Err(e) => warn!("Failed to release lock {}: {}", self.key, e),
        }

        result
    }
}

impl<B: CacheBackend> Drop for LockGuard<B> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        warn!("Lock {} dropped without release", self.key);

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let backend = self.backend.clone();
            let key = std::mem::take(&mut self.key);
            let token = std::mem::take(&mut self.token);
            handle.spawn(async move {
                if let Err(e) = backend.delete_if_equals(&key, token.as_bytes()).await {
                    warn!("Deferred release of lock {} failed: {}", key, e);
                }
            });
        }
    }
}
