#![forbid(unsafe_code)]

//! Teardown barrier for the engine tasks.
//!
//! Shared state is dropped only after every engine task checked out. A
//! task that never observes the stop flag within the grace period may
//! still hold references into the shared buffers, so the state is
//! deliberately leaked instead of freed. Leaking at exit is harmless;
//! freeing under a live task is not.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::warn;

/// Count of engine tasks still online.
#[derive(Debug, Default)]
pub struct OnlineTasks {
    count: AtomicUsize,
    zero: Notify,
}

impl OnlineTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn leave(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.zero.notify_waiters();
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Wait until every registered task has left.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.zero.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Outcome of the teardown barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TeardownReport {
    /// Set when the grace period elapsed with tasks still online. The
    /// shared state was leaked, not freed.
    pub threads_wont_exit: bool,
}

/// Wait up to `grace` for every engine task to exit, then drop the
/// shared state. On timeout the state is leaked instead.
pub async fn join_or_leak<T: Send + Sync + 'static>(
    online: &OnlineTasks,
    grace: Duration,
    shared: Arc<T>,
) -> TeardownReport {
    if timeout(grace, online.wait_idle()).await.is_ok() {
        drop(shared);
        TeardownReport {
            threads_wont_exit: false,
        }
    } else {
        warn!(
            online = online.count(),
            "engine tasks did not exit within the grace period, leaking shared state"
        );
        std::mem::forget(shared);
        TeardownReport {
            threads_wont_exit: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_idle_returns_once_all_tasks_leave() {
        let online = Arc::new(OnlineTasks::new());
        online.enter();
        online.enter();
        let waiter = {
            let online = online.clone();
            tokio::spawn(async move { online.wait_idle().await })
        };
        online.leave();
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        online.leave();
        waiter.await.expect("waiter task");
        assert_eq!(online.count(), 0);
    }

    #[tokio::test]
    async fn join_reports_clean_exit() {
        let online = OnlineTasks::new();
        let shared = Arc::new(vec![0u8; 16]);
        let report = join_or_leak(&online, Duration::from_millis(100), shared).await;
        assert!(!report.threads_wont_exit);
    }

    #[tokio::test]
    async fn stuck_task_leaks_instead_of_freeing() {
        let online = OnlineTasks::new();
        online.enter(); // never leaves
        let shared = Arc::new(vec![0u8; 16]);
        let probe = shared.clone();
        let report = join_or_leak(&online, Duration::from_millis(50), shared).await;
        assert!(report.threads_wont_exit);
        // The leaked handle still counts: nothing was freed.
        assert_eq!(Arc::strong_count(&probe), 2);
    }
}
