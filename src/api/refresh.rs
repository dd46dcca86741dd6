//! Single-flight coordination for access token refresh
//!
//! When several requests hit 401 around the same time only the first one
//! (the leader) calls the refresh endpoint. Everyone else is queued and woken
//! with the leader's outcome, in the order they arrived.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;

use super::{ApiError, RefreshFailure};

/// New access token, or why there is none
pub type RefreshOutcome = Result<String, RefreshFailure>;

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    queue: VecDeque<oneshot::Sender<RefreshOutcome>>,
}

/// `Idle -> Refreshing -> Idle`, guarded by a mutex so check-and-set is atomic
/// on a multi-threaded runtime.
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    wait_limit: Duration,
}

/// Result of asking to refresh
pub enum RefreshTicket<'a> {
    /// Caller must perform the refresh and settle the lease
    Leader(RefreshLease<'a>),
    /// A refresh is already running; wait for it
    Follower(PendingRefresh),
}

impl RefreshCoordinator {
    pub fn new(wait_limit: Duration) -> Self {
        Self {
            state: Mutex::new(RefreshState::default()),
            wait_limit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Become the leader if idle, otherwise join the queue.
    pub fn begin(&self) -> RefreshTicket<'_> {
        let mut state = self.lock();
        if state.refreshing {
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(tx);
            tracing::debug!(queued = state.queue.len(), "Refresh in progress, queued");
            RefreshTicket::Follower(PendingRefresh {
                rx,
                wait_limit: self.wait_limit,
            })
        } else {
            state.refreshing = true;
            RefreshTicket::Leader(RefreshLease {
                coordinator: self,
                settled: false,
            })
        }
    }

    #[cfg(test)]
    pub fn is_refreshing(&self) -> bool {
        self.lock().refreshing
    }

    #[cfg(test)]
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Wake every queued caller in FIFO order, then return to idle.
    fn release(&self, outcome: &RefreshOutcome) -> usize {
        let mut state = self.lock();
        let mut released = 0;
        while let Some(waiter) = state.queue.pop_front() {
            // A waiter that timed out or was cancelled has dropped its receiver
            if waiter.send(outcome.clone()).is_ok() {
                released += 1;
            }
        }
        state.refreshing = false;
        released
    }
}

/// Held by the refresh leader. Dropping it unsettled rejects the queue with
/// `RefreshFailure::Abandoned` so followers never wait on a cancelled leader.
pub struct RefreshLease<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl RefreshLease<'_> {
    /// Publish the outcome to every queued caller. Returns how many were woken.
    pub fn settle(mut self, outcome: RefreshOutcome) -> usize {
        self.settled = true;
        self.coordinator.release(&outcome)
    }
}

impl Drop for RefreshLease<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("Token refresh abandoned, rejecting queued requests");
            self.coordinator.release(&Err(RefreshFailure::Abandoned));
        }
    }
}

/// A caller suspended behind someone else's refresh
pub struct PendingRefresh {
    rx: oneshot::Receiver<RefreshOutcome>,
    wait_limit: Duration,
}

impl PendingRefresh {
    /// Wait for the leader's outcome, bounded by the configured limit.
    pub async fn wait(self) -> Result<String, ApiError> {
        match tokio::time::timeout(self.wait_limit, self.rx).await {
            Ok(Ok(Ok(token))) => Ok(token),
            Ok(Ok(Err(failure))) => Err(failure.into()),
            Ok(Err(_)) => Err(RefreshFailure::Abandoned.into()),
            Err(_) => Err(ApiError::RefreshTimeout),
        }
    }
}
