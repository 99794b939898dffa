// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One-shot delayed task with replace-on-schedule semantics.
//!
//! At most one timer is pending at a time. Scheduling again aborts the
//! previous timer. When a timer fires it clears its own slot before running
//! the task, so a task that schedules a follow-up never aborts itself.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Default)]
struct SchedulerInner {
    slot: Mutex<Option<(u64, JoinHandle<()>)>>,
    generation: AtomicU64,
}

/// Handle to the pending re-drain timer.
#[derive(Clone, Default)]
pub struct RetryScheduler {
    inner: Arc<SchedulerInner>,
}

impl RetryScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, replacing any timer that is still pending.
    pub fn schedule<F, Fut>(&self, delay: Duration, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        // Held across spawn so a zero-delay timer cannot check its slot early
        let mut slot = self.inner.slot.lock();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = inner.slot.lock();
                match slot.as_ref() {
                    Some((current, _)) if *current == generation => {
                        slot.take();
                    }
                    // Superseded between wake-up and lock
                    _ => return,
                }
            }
            task().await;
        });

        if let Some((_, old)) = slot.replace((generation, handle)) {
            old.abort();
            debug!("Replaced pending re-drain timer");
        }
    }

    /// Abort the pending timer. Returns `true` if one was pending.
    pub fn cancel(&self) -> bool {
        match self.inner.slot.lock().take() {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.inner.slot.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let scheduler = RetryScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();

        scheduler.schedule(Duration::from_millis(750), move || async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.is_scheduled());

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_pending_timer() {
        let scheduler = RetryScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let f = fired.clone();
            scheduler.schedule(Duration::from_millis(100), move || async move {
                f.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let scheduler = RetryScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();

        scheduler.schedule(Duration::from_millis(100), move || async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.cancel());
        assert!(!scheduler.cancel());

        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_can_reschedule_itself() {
        let scheduler = RetryScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let s = scheduler.clone();

        scheduler.schedule(Duration::from_millis(10), move || async move {
            f.fetch_add(1, Ordering::SeqCst);
            let f2 = f.clone();
            s.schedule(Duration::from_millis(10), move || async move {
                f2.fetch_add(1, Ordering::SeqCst);
            });
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
