/*!
C10 — a bounded fire-and-forget executor.

Used for async mutators, the sliding-expiry bump, and background eviction
(spec §4.1/§4.2/§5). Concurrency is capped at `min(available_parallelism,
configured_max)`; when the cap is saturated the caller's work runs inline
instead of queueing unboundedly (spec §5: "degrading gracefully rather than
queueing unboundedly").
*/

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Bounded off-path executor. Cheap to clone; every clone shares the same
/// semaphore and counters.
#[derive(Clone)]
pub struct FireAndForgetExecutor {
    semaphore: Arc<Semaphore>,
    scheduled: Arc<AtomicU64>,
    ran_inline: Arc<AtomicU64>,
}

impl FireAndForgetExecutor {
    /// `max_concurrency` is clamped to at least 1. A typical caller passes
    /// `min(num_cpus, configured_cap)` per spec §5.
    pub fn new(max_concurrency: usize) -> Self {
        FireAndForgetExecutor {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            scheduled: Arc::new(AtomicU64::new(0)),
            ran_inline: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_available_parallelism(configured_cap: usize) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(cpus.min(configured_cap.max(1)))
    }

    /// How many units of work were handed to the background pool.
    pub fn scheduled_count(&self) -> u64 {
        self.scheduled.load(Ordering::Relaxed)
    }

    /// How many units of work degraded to synchronous execution because
    /// the pool was saturated.
    pub fn ran_inline_count(&self) -> u64 {
        self.ran_inline.load(Ordering::Relaxed)
    }

    /// Schedule `work` in the background if a permit is immediately
    /// available, otherwise drop it without running it at all. Returns
    /// whether it was scheduled.
    ///
    /// This is the shape the sliding-expiry bump needs (spec §4.1): the
    /// bump "must not block the reader", and a lost bump is harmless
    /// because `utc_expiry` is only ever advanced, never rewound (spec
    /// §5's "monotone non-decreasing" note) — so under saturation the
    /// bump is simply skipped rather than degrading to synchronous, unlike
    /// [`Self::spawn_detached`].
    pub fn try_spawn_or_drop<F>(&self, name: &'static str, work: F) -> bool
    where
        F: Future<Output = crate::error::Result<()>> + Send + 'static,
    {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => {
                self.scheduled.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = work.await {
                        tracing::warn!(operation = name, error = %e, "background operation failed");
                    } else {
                        tracing::debug!(operation = name, "background operation completed");
                    }
                });
                true
            }
            Err(_) => false,
        }
    }

    /// Detach `work` onto the background pool if a permit is immediately
    /// available; otherwise run it inline, blocking the caller. Errors from
    /// `work` are logged and swallowed per spec §4.1/§7's policy for
    /// background operations.
    pub async fn spawn_detached<F>(&self, name: &'static str, work: F)
    where
        F: Future<Output = crate::error::Result<()>> + Send + 'static,
    {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => {
                self.scheduled.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = work.await {
                        tracing::warn!(operation = name, error = %e, "background operation failed");
                    } else {
                        tracing::debug!(operation = name, "background operation completed");
                    }
                });
            }
            Err(_) => {
                self.ran_inline.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = work.await {
                    tracing::warn!(operation = name, error = %e, "inline-degraded operation failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn runs_inline_when_saturated() {
        let executor = FireAndForgetExecutor::new(1);
        let ran = Arc::new(AtomicBool::new(false));

        // Hold the only permit open across an await point.
        let permit = executor.semaphore.clone().try_acquire_owned().unwrap();

        let ran2 = Arc::clone(&ran);
        executor
            .spawn_detached("test", async move {
                ran2.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(executor.ran_inline_count(), 1);
        drop(permit);
    }

    #[tokio::test]
    async fn schedules_in_background_when_capacity_available() {
        let executor = FireAndForgetExecutor::new(4);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        executor
            .spawn_detached("test", async move {
                ran2.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        // give the spawned task a chance to run
        tokio::task::yield_now().await;
        assert_eq!(executor.scheduled_count(), 1);
    }
}
