//! Bounded executor for background cache rebuilds.
//!
//! At most `workers` rebuilds run at once; at most `capacity` are accepted
//! (queued plus running). Submissions beyond that are rejected with
//! `Error::RebuildRejected` and counted, never dropped silently. Task errors
//! and panics are logged and counted; they never reach whoever submitted the
//! task, since that caller has already been answered.

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Notify, Semaphore};

/// Counters describing scheduler activity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    /// Accepted tasks not yet finished (queued or running).
    pub pending: usize,
}

struct Inner {
    permits: Arc<Semaphore>,
    workers: usize,
    capacity: usize,
    pending: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    closed: AtomicBool,
    idle: Notify,
}

impl Inner {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn reject(&self, reason: String) -> Error {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        warn!("⚠ Rebuild rejected: {}", reason);
        Error::RebuildRejected(reason)
    }
}

/// Worker pool for rebuild tasks.
///
/// Cheap to clone; clones share the same pool. Tasks run on the ambient
/// Tokio runtime, so `submit` must be called from within one.
///
/// # Example
///
/// ```no_run
/// use cache_shield::scheduler::RebuildScheduler;
///
/// # async fn example() -> cache_shield::Result<()> {
/// let scheduler = RebuildScheduler::new(10, 1024);
///
/// scheduler.submit("cache:shop:1", async {
///     // reload and rewrite the entry
///     Ok(())
/// })?;
///
/// scheduler.wait_idle().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RebuildScheduler {
    inner: Arc<Inner>,
}

/// A reserved backlog slot. Dropping it unused gives the slot back.
pub struct RebuildSlot {
    inner: Option<Arc<Inner>>,
}

impl RebuildScheduler {
    /// Pool running `workers` tasks at once with room for `capacity` accepted tasks.
    pub fn new(workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(workers);

        RebuildScheduler {
            inner: Arc::new(Inner {
                permits: Arc::new(Semaphore::new(workers)),
                workers,
                capacity,
                pending: AtomicUsize::new(0),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                idle: Notify::new(),
            }),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.rebuild_workers, config.rebuild_queue_capacity)
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Reserve room for one task without submitting it yet.
    ///
    /// # Errors
    ///
    /// Returns `Error::RebuildRejected` when the backlog is full or the
    /// scheduler is shut down.
    pub fn reserve(&self) -> Result<RebuildSlot> {
        let inner = &self.inner;

        if inner.closed.load(Ordering::Acquire) {
            return Err(inner.reject("scheduler is shut down".to_string()));
        }

        let capacity = inner.capacity;
        let reserved = inner
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            });

        if reserved.is_err() {
            return Err(inner.reject(format!("backlog full ({} tasks)", capacity)));
        }

        Ok(RebuildSlot {
            inner: Some(Arc::clone(inner)),
        })
    }

    /// Run `task` in the background.
    ///
    /// Returns as soon as the task is accepted.
    ///
    /// # Errors
    ///
    /// Returns `Error::RebuildRejected` when the backlog is full, the
    /// scheduler is shut down, or no Tokio runtime is available.
    pub fn submit<F>(&self, label: impl Into<String>, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.reserve()?.spawn(label, task)
    }

    pub fn stats(&self) -> SchedulerStats {
        let inner = &self.inner;
        SchedulerStats {
            submitted: inner.submitted.load(Ordering::Relaxed),
            completed: inner.completed.load(Ordering::Relaxed),
            failed: inner.failed.load(Ordering::Relaxed),
            rejected: inner.rejected.load(Ordering::Relaxed),
            pending: inner.pending.load(Ordering::Acquire),
        }
    }

    /// Wait until no accepted task is pending.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.pending.load(Ordering::Acquire) == 0 {
                return;
            }

            notified.await;
        }
    }

    /// Refuse further submissions. Accepted tasks still run to completion.
    pub fn shutdown(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            info!(
                "Rebuild scheduler shut down with {} task(s) pending",
                self.inner.pending.load(Ordering::Acquire)
            );
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl RebuildSlot {
    /// Run `task` in the reserved slot.
    ///
    /// # Errors
    ///
    /// Returns `Error::RebuildRejected` if called outside a Tokio runtime.
    pub fn spawn<F>(mut self, label: impl Into<String>, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let label = label.into();
        let inner = match self.inner.take() {
            Some(inner) => inner,
            None => return Err(Error::RebuildRejected("slot already used".to_string())),
        };

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                inner.finish_one();
                return Err(inner.reject(format!("no Tokio runtime to run {}", label)));
            }
        };

        inner.submitted.fetch_add(1, Ordering::Relaxed);
        debug!("Rebuild {} accepted", label);

        handle.spawn(async move {
            let permit = Arc::clone(&inner.permits).acquire_owned().await;
            let started = Instant::now();

            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => {
                    inner.completed.fetch_add(1, Ordering::Relaxed);
                    debug!("✓ Rebuild {} finished in {:?}", label, started.elapsed());
                }
                Ok(Err(e)) => {
                    inner.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("✗ Rebuild {} failed: {}", label, e);
                }
                Err(_) => {
                    inner.failed.fetch_add(1, Ordering::Relaxed);
                    error!("✗ Rebuild {} panicked", label);
                }
            }

            drop(permit);
            inner.finish_one();
        });

        Ok(())
    }
}

impl Drop for RebuildSlot {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.finish_one();
        }
    }
}
