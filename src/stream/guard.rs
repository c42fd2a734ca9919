//! Single-flight publication guard
//!
//! At most one publication runs at a time. A request that arrives while
//! one is running is dropped, not queued: publications are snapshots of the
//! current manifest, so the next one that runs supersedes it. The cursor of
//! the dropped request is remembered so shutdown can tell whether a final
//! publication still has to catch up.

use parking_lot::Mutex;
use std::future::Future;

#[derive(Debug, Default)]
struct GuardState {
    /// Cursor of the running publication, `None` when idle
    in_flight: Option<u64>,

    /// Cursor of the most recently dropped request
    last_requested: u64,
}

/// Coordinates manifest publications for one broadcaster
#[derive(Debug, Default)]
pub struct SyncGuard {
    state: Mutex<GuardState>,
}

/// Clears the in-flight marker when the publication ends, however it ends
struct Release<'a> {
    guard: &'a SyncGuard,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.guard.state.lock().in_flight = None;
    }
}

impl SyncGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `publish` unless another publication is already running.
    ///
    /// Returns `None` when the request was dropped.
    pub async fn try_publish<F, Fut, T>(&self, cursor: u64, publish: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        {
            let mut state = self.state.lock();
            if let Some(running) = state.in_flight {
                state.last_requested = cursor;
                tracing::debug!(
                    "Publication for cursor {} dropped, {} still in flight",
                    cursor,
                    running
                );
                return None;
            }
            state.in_flight = Some(cursor);
        }

        let _release = Release { guard: self };
        Some(publish().await)
    }

    /// True when the last dropped request does not match `current_cursor`
    pub fn has_pending_work(&self, current_cursor: u64) -> bool {
        self.state.lock().last_requested != current_cursor
    }

    /// Cursor of the running publication, if any
    pub fn in_flight(&self) -> Option<u64> {
        self.state.lock().in_flight
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight().is_some()
    }

    pub fn last_requested(&self) -> u64 {
        self.state.lock().last_requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_idle_guard_runs_body() {
        let guard = SyncGuard::new();

        let result = guard.try_publish(4, || async { "published" }).await;

        assert_eq!(result, Some("published"));
        assert!(!guard.is_busy());
        assert_eq!(guard.last_requested(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_request_is_dropped_and_recorded() {
        let guard = Arc::new(SyncGuard::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = oneshot::channel();
        let (finish_tx, finish_rx) = oneshot::channel::<()>();

        let first = {
            let guard = guard.clone();
            let runs = runs.clone();
            tokio::spawn(async move {
                guard
                    .try_publish(1, || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        let _ = started_tx.send(());
                        let _ = finish_rx.await;
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        assert_eq!(guard.in_flight(), Some(1));

        let second_runs = runs.clone();
        let second = guard
            .try_publish(2, || async move {
                second_runs.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert!(second.is_none());
        assert_eq!(guard.last_requested(), 2);
        assert!(guard.has_pending_work(3));
        assert!(!guard.has_pending_work(2));

        finish_tx.send(()).unwrap();
        assert!(first.await.unwrap().is_some());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!guard.is_busy());
    }

    #[tokio::test]
    async fn test_release_after_error() {
        let guard = SyncGuard::new();

        let result: Option<Result<(), &str>> = guard.try_publish(1, || async { Err("boom") }).await;

        assert_eq!(result, Some(Err("boom")));
        assert!(!guard.is_busy());
        assert!(guard.try_publish(2, || async {}).await.is_some());
    }

    #[tokio::test]
    async fn test_release_when_publication_is_cancelled() {
        let guard = Arc::new(SyncGuard::new());
        let (started_tx, started_rx) = oneshot::channel();

        let task = {
            let guard = guard.clone();
            tokio::spawn(async move {
                guard
                    .try_publish(7, || async move {
                        let _ = started_tx.send(());
                        std::future::pending::<()>().await;
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        assert_eq!(guard.in_flight(), Some(7));

        task.abort();
        let _ = task.await;

        assert_eq!(guard.in_flight(), None);
    }

    #[tokio::test]
    async fn test_many_racing_requests_run_one_body_at_a_time() {
        let guard = Arc::new(SyncGuard::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for cursor in 1..=16u64 {
            let guard = guard.clone();
            let active = active.clone();
            let max_active = max_active.clone();
            handles.push(tokio::spawn(async move {
                guard
                    .try_publish(cursor, || async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_active.fetch_max(now, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(!guard.is_busy());
    }
}
