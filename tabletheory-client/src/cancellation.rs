//! A lightweight cancellation signal passed to every suspension point
//! (store call, KMS call, retry sleep). `WithContext` on the builder and
//! `WithLambdaTimeout` both produce one of these; cancellation is
//! cooperative and observed at each suspension point, never pre-empted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Clone)]
pub struct CancellationSignal {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// A signal that is never cancelled, for callers that don't need one.
    pub fn never() -> Self {
        Self::new()
    }

    /// A signal that fires after `timeout`, used by `WithLambdaTimeout` to
    /// derive a deadline shorter than the remaining execution window.
    pub fn with_timeout(timeout: Duration) -> Self {
        let signal = Self::new();
        let spawned = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            spawned.cancel();
        });
        signal
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Suspend until cancellation fires. Intended to be raced against an
    /// in-flight store/KMS call via `tokio::select!`.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_pending_waiter() {
        let signal = CancellationSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        signal.cancel();
        handle.await.unwrap();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn with_timeout_cancels_after_duration() {
        let signal = CancellationSignal::with_timeout(Duration::from_millis(20));
        assert!(!signal.is_cancelled());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(signal.is_cancelled());
    }
}
