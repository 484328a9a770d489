// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Shutdown Coordination
//!
//! One coordinator per process. Signal handlers call [`ShutdownCoordinator::
//! initiate`], every long-running task in the service holds a
//! [`CancellationToken`] clone and aborts at its next suspension point, and
//! `main` waits for the service to acknowledge completion within the grace
//! period before forcing termination.
//!
//! The grace period comes from `processing.shutdown_timeout_secs` in the
//! service configuration: active copy operations get that long to finish or
//! abandon their chunks and clean up temp files.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Clone-able cancellation token.
///
/// `cancelled()` is level-triggered: once cancelled it resolves immediately
/// for every caller, present and future, so a task can hold it across many
/// `select!` loops.
#[derive(Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    /// Creates an un-cancelled token
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Trips the token and wakes every waiter
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Non-blocking check
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves when the token is cancelled
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.notify.notified();
            // Re-check after arming the waiter so a cancel between the load
            // and the await cannot be missed
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Coordinates graceful shutdown with a bounded grace period.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    grace_period: Duration,
    initiated: Arc<AtomicBool>,
    complete: Arc<AtomicBool>,
    complete_notify: Arc<Notify>,
}

impl ShutdownCoordinator {
    /// Creates a coordinator with the given grace period.
    pub fn new(grace_period: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace_period,
            initiated: Arc::new(AtomicBool::new(false)),
            complete: Arc::new(AtomicBool::new(false)),
            complete_notify: Arc::new(Notify::new()),
        }
    }

    /// Hands out a cancellation token for a worker task
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    /// Requests shutdown. Idempotent; only the first call logs and trips the
    /// token.
    pub fn initiate(&self) {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::info!(grace_period = ?self.grace_period, "shutdown initiated");
            self.token.cancel();
        }
    }

    /// Signals that the service has finished draining and cleanup.
    pub fn mark_complete(&self) {
        self.complete.store(true, Ordering::SeqCst);
        self.complete_notify.notify_waiters();
    }

    /// Waits for [`mark_complete`](Self::mark_complete) up to the grace
    /// period. Returns `true` when shutdown completed in time, `false` when
    /// the caller should force termination.
    pub async fn wait_for_completion(&self) -> bool {
        if self.complete.load(Ordering::SeqCst) {
            return true;
        }
        tokio::select! {
            _ = self.complete_notify.notified() => true,
            _ = tokio::time::sleep(self.grace_period) => {
                tracing::warn!(grace_period = ?self.grace_period, "shutdown grace period expired, forcing termination");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_starts_clear() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_propagates_to_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_immediately_when_already_tripped() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancelled().await;
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_initiate_is_idempotent() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        coordinator.initiate();
        coordinator.initiate();
        assert!(coordinator.is_shutting_down());
        assert!(coordinator.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_succeeds_when_marked_complete() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        coordinator.initiate();

        let background = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            background.mark_complete();
        });

        assert!(coordinator.wait_for_completion().await);
    }

    #[tokio::test]
    async fn test_wait_times_out_without_completion() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(30));
        coordinator.initiate();
        assert!(!coordinator.wait_for_completion().await);
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_if_already_complete() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(30));
        coordinator.initiate();
        coordinator.mark_complete();
        assert!(coordinator.wait_for_completion().await);
    }
}
