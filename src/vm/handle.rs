//! Launch Handle - read-only view of one launch attempt
//!
//! The handle is what `VmLauncher::launch` returns. It observes the
//! lifecycle (current state, terminal error), can wait for the runtime to
//! reach `Running`, and can cancel a launch that has not finished.

use std::time::Instant;

use tokio::sync::watch;
use tokio::time::Duration;

use super::lifecycle::{LaunchLifecycle, LaunchPhase, LaunchState};
use crate::error::LaunchError;

/// Observable handle to a launch attempt
#[derive(Clone)]
pub struct LaunchHandle {
    /// Unique identifier for this launch (e.g., "launch-01926abc...")
    pub launch_id: String,
    lifecycle: LaunchLifecycle,
    state: watch::Receiver<LaunchState>,
    started_at: Instant,
}

impl LaunchHandle {
    pub(crate) fn new(launch_id: String, lifecycle: LaunchLifecycle, started_at: Instant) -> Self {
        let state = lifecycle.subscribe();
        Self {
            launch_id,
            lifecycle,
            state,
            started_at,
        }
    }

    /// Current state
    pub fn state(&self) -> LaunchState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> LaunchPhase {
        self.state.borrow().phase()
    }

    /// Terminal error, if the launch failed
    pub fn error(&self) -> Option<LaunchError> {
        self.state.borrow().error().cloned()
    }

    /// Check if the runtime has taken over
    pub fn is_running(&self) -> bool {
        matches!(*self.state.borrow(), LaunchState::Running)
    }

    /// Get time since the launch started
    pub fn age(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Cancel the launch; a no-op once it has failed
    pub fn cancel(&self) -> Result<(), LaunchError> {
        self.lifecycle.cancel()
    }

    /// Wait until the launch is `Running` or `Failed`
    ///
    /// Returns the failure reason if it failed.
    pub async fn wait_until_settled(&mut self) -> Result<(), LaunchError> {
        loop {
            {
                let state = self.state.borrow_and_update();
                match &*state {
                    LaunchState::Running => return Ok(()),
                    LaunchState::Failed(err) => return Err(err.clone()),
                    _ => {}
                }
            }
            if self.state.changed().await.is_err() {
                // Sender dropped: the state can no longer change
                return match self.state() {
                    LaunchState::Running => Ok(()),
                    LaunchState::Failed(err) => Err(err),
                    _ => Err(LaunchError::Cancelled),
                };
            }
        }
    }

    /// Like [`wait_until_settled`](Self::wait_until_settled), cancelling the
    /// launch if `timeout` expires first
    pub async fn wait_until_running(&mut self, timeout: Duration) -> Result<(), LaunchError> {
        match tokio::time::timeout(timeout, self.wait_until_settled()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    launch_id = %self.launch_id,
                    ?timeout,
                    "launch did not reach running in time, cancelling"
                );
                self.settle_after_timeout()
            }
        }
    }

    /// Cancel and report where the launch ended up
    ///
    /// The launch may reach `Running` between the timeout and the cancel, in
    /// which case the cancel is refused and the launch counts as started.
    fn settle_after_timeout(&self) -> Result<(), LaunchError> {
        let _ = self.cancel();
        match self.state() {
            LaunchState::Running => Ok(()),
            LaunchState::Failed(err) => Err(err),
            _ => Err(LaunchError::Cancelled),
        }
    }
}

impl std::fmt::Debug for LaunchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchHandle")
            .field("launch_id", &self.launch_id)
            .field("state", &*self.state.borrow())
            .field("age", &self.age())
            .finish()
    }
}
