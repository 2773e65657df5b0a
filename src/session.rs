//! Per-request session context: a deadline plus a cancellation signal.
//!
//! A [`SessionContext`] is cloned into every task of a session. The matching
//! [`SessionHandle`] stays with whoever owns the request; dropping it (for
//! example when the client disconnects and the response body is dropped)
//! cancels the session.

use crate::error::RelayError;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Read side of a session: observes cancellation and the deadline.
#[derive(Debug, Clone)]
pub struct SessionContext {
    deadline: Instant,
    cancelled: watch::Receiver<bool>,
}

/// Owner side of a session. Cancels on [`SessionHandle::cancel`] or drop.
#[derive(Debug)]
pub struct SessionHandle {
    cancel: watch::Sender<bool>,
}

impl SessionContext {
    /// Start a session that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> (SessionContext, SessionHandle) {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Start a session that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> (SessionContext, SessionHandle) {
        let (cancel, cancelled) = watch::channel(false);
        (
            SessionContext {
                deadline,
                cancelled,
            },
            SessionHandle { cancel },
        )
    }

    /// Resolves once the session is cancelled or its deadline passes,
    /// returning the matching error. Cancellation wins if both hold.
    pub async fn done(&self) -> RelayError {
        tokio::select! {
            biased;
            _ = wait_cancelled(self.cancelled.clone()) => RelayError::Cancelled,
            _ = tokio::time::sleep_until(self.deadline) => RelayError::DeadlineExceeded,
        }
    }
}

/// Returns once the flag flips to `true` or the owner side is gone.
async fn wait_cancelled(mut cancelled: watch::Receiver<bool>) {
    loop {
        if *cancelled.borrow_and_update() {
            return;
        }
        if cancelled.changed().await.is_err() {
            return;
        }
    }
}

impl SessionHandle {
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
