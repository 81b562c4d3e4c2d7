//! External build cancellation.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

/// Stops dispatch of new nodes from outside the scheduler.
///
/// Nodes already running are allowed to reach a terminal state; everything
/// not yet dispatched is reported as not evaluated.
#[derive(Debug, Default)]
pub struct CancellationToken {
    // `Some` once cancelled; holds the first reason given.
    state: Mutex<Option<String>>,
    wake: Notify,
}

impl CancellationToken {
    /// Creates a token shared between the caller and the scheduler.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().is_some()
    }

    /// The reason passed to the first [`cancel`](Self::cancel) call.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.state.lock().clone()
    }

    /// Requests cancellation. Later requests keep the first reason.
    pub fn cancel(&self, reason: impl Into<String>) {
        {
            let mut state = self.state.lock();
            if state.is_some() {
                return;
            }
            *state = Some(reason.into());
        }
        tracing::debug!(reason = ?self.reason(), "Build cancellation requested");
        self.wake.notify_waiters();
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a concurrent cancel is not missed.
            let woken = self.wake.notified();
            if self.is_cancelled() {
                return;
            }
            woken.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_first_reason_is_kept() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.reason(), None);

        token.cancel("interrupted");
        token.cancel("shutdown");
        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("interrupted"));
    }

    #[test]
    fn test_waiter_is_woken_by_cancel() {
        let token = CancellationToken::new();
        let mut waiter = task::spawn(token.cancelled());
        assert_pending!(waiter.poll());

        token.cancel("interrupted");
        assert!(waiter.is_woken());
        assert_ready!(waiter.poll());
    }

    #[tokio::test]
    async fn test_spawned_waiter_wakes_on_cancel() {
        let token = CancellationToken::new();
        let waiter = tokio::spawn({
            let token = Arc::clone(&token);
            async move { token.cancelled().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        token.cancel("interrupted");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_already_cancelled_resolves_immediately() {
        let token = CancellationToken::new();
        token.cancel("early");
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .unwrap();
    }
}
