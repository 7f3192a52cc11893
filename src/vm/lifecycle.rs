//! Launch lifecycle state machine
//!
//! ```text
//! Uninitialized -> Configuring -> AwaitingAssets -> Ready -> Running
//!                       |               |             |
//!                       +---------------+-------------+----> Failed(reason)
//! ```
//!
//! Transitions only move forward. A signal that arrives in a state that does
//! not accept it is rejected with `OutOfOrderSignal` and leaves the state
//! untouched. `Failed` is terminal: runtime callbacks that arrive after it
//! are ignored. Once `Running`, the runtime owns the machine and no further
//! transitions are accepted.
//!
//! The state lives in a `tokio::sync::watch` channel so handles can observe
//! it and wait on it; every transition is checked and applied inside a single
//! `send_if_modified` call.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::LaunchError;
use crate::metrics::{LAUNCH_FAILURES, LAUNCH_TRANSITIONS};

/// Current state of a launch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchState {
    /// Nothing has happened yet
    Uninitialized,
    /// Boot arguments are being built
    Configuring,
    /// Configuration handed off, runtime is fetching assets
    AwaitingAssets,
    /// Every asset fetched, waiting for boot code to start
    Ready,
    /// Boot code is executing; the runtime owns the machine
    Running,
    /// The launch failed and will not progress
    Failed(LaunchError),
}

impl LaunchState {
    pub fn phase(&self) -> LaunchPhase {
        match self {
            LaunchState::Uninitialized => LaunchPhase::Uninitialized,
            LaunchState::Configuring => LaunchPhase::Configuring,
            LaunchState::AwaitingAssets => LaunchPhase::AwaitingAssets,
            LaunchState::Ready => LaunchPhase::Ready,
            LaunchState::Running => LaunchPhase::Running,
            LaunchState::Failed(_) => LaunchPhase::Failed,
        }
    }

    /// `Failed`, or `Running` once control has passed to the runtime
    pub fn is_terminal(&self) -> bool {
        matches!(self, LaunchState::Running | LaunchState::Failed(_))
    }

    pub fn error(&self) -> Option<&LaunchError> {
        match self {
            LaunchState::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// `LaunchState` without the failure payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaunchPhase {
    Uninitialized,
    Configuring,
    AwaitingAssets,
    Ready,
    Running,
    Failed,
}

impl LaunchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchPhase::Uninitialized => "uninitialized",
            LaunchPhase::Configuring => "configuring",
            LaunchPhase::AwaitingAssets => "awaiting_assets",
            LaunchPhase::Ready => "ready",
            LaunchPhase::Running => "running",
            LaunchPhase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for LaunchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event that drives the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// Launcher started building the configuration
    BeginConfiguring,
    /// Boot arguments were produced
    ConfigurationBuilt,
    /// Runtime: `onAssetsResolved`
    AssetsResolved,
    /// Runtime: `onAssetError`
    AssetFailed,
    /// Runtime: `onBootStarted`
    BootStarted,
    /// Host requested cancellation
    Cancel,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Transition::BeginConfiguring => "begin_configuring",
            Transition::ConfigurationBuilt => "configuration_built",
            Transition::AssetsResolved => "assets_resolved",
            Transition::AssetFailed => "asset_failed",
            Transition::BootStarted => "boot_started",
            Transition::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// Outcome of applying a transition
enum Step {
    Move(LaunchState),
    Ignore,
    Reject,
}

/// Shared owner of one launch attempt's state
///
/// Cloning shares the same state; the launcher, its handle and the runtime
/// signal sink all hold clones.
#[derive(Debug, Clone)]
pub struct LaunchLifecycle {
    state: Arc<watch::Sender<LaunchState>>,
}

impl Default for LaunchLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl LaunchLifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LaunchState::Uninitialized);
        Self { state: Arc::new(tx) }
    }

    /// Snapshot of the current state
    pub fn state(&self) -> LaunchState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> LaunchPhase {
        self.state.borrow().phase()
    }

    pub fn subscribe(&self) -> watch::Receiver<LaunchState> {
        self.state.subscribe()
    }

    /// Uninitialized -> Configuring
    pub fn begin_configuring(&self) -> Result<(), LaunchError> {
        self.apply(Transition::BeginConfiguring, |state| match state {
            LaunchState::Uninitialized => Step::Move(LaunchState::Configuring),
            _ => Step::Reject,
        })
    }

    /// Configuring -> AwaitingAssets
    pub fn configuration_built(&self) -> Result<(), LaunchError> {
        self.apply(Transition::ConfigurationBuilt, |state| match state {
            LaunchState::Configuring => Step::Move(LaunchState::AwaitingAssets),
            _ => Step::Reject,
        })
    }

    /// Configuring -> Failed, for a spec that did not validate
    pub fn configuration_rejected(&self, err: LaunchError) -> Result<(), LaunchError> {
        self.apply(Transition::ConfigurationBuilt, move |state| match state {
            LaunchState::Configuring => Step::Move(LaunchState::Failed(err)),
            _ => Step::Reject,
        })
    }

    /// AwaitingAssets -> Ready
    pub fn assets_resolved(&self) -> Result<(), LaunchError> {
        self.apply(Transition::AssetsResolved, |state| match state {
            LaunchState::AwaitingAssets => Step::Move(LaunchState::Ready),
            LaunchState::Failed(_) => Step::Ignore,
            _ => Step::Reject,
        })
    }

    /// AwaitingAssets | Ready -> Failed
    ///
    /// `err` is normally `AssetResolutionFailed` or `InvalidAssetName`.
    pub fn asset_failed(&self, err: LaunchError) -> Result<(), LaunchError> {
        self.apply(Transition::AssetFailed, move |state| match state {
            LaunchState::AwaitingAssets | LaunchState::Ready => Step::Move(LaunchState::Failed(err)),
            LaunchState::Failed(_) => Step::Ignore,
            _ => Step::Reject,
        })
    }

    /// Ready -> Running
    pub fn boot_started(&self) -> Result<(), LaunchError> {
        self.apply(Transition::BootStarted, |state| match state {
            LaunchState::Ready => Step::Move(LaunchState::Running),
            LaunchState::Failed(_) => Step::Ignore,
            _ => Step::Reject,
        })
    }

    /// Any non-terminal state -> Failed(Cancelled)
    pub fn cancel(&self) -> Result<(), LaunchError> {
        self.apply(Transition::Cancel, |state| match state {
            LaunchState::Failed(_) => Step::Ignore,
            LaunchState::Running => Step::Reject,
            _ => Step::Move(LaunchState::Failed(LaunchError::Cancelled)),
        })
    }

    fn apply<F>(&self, transition: Transition, step: F) -> Result<(), LaunchError>
    where
        F: FnOnce(&LaunchState) -> Step,
    {
        let mut outcome = Ok(());
        let mut moved = None;
        // kind and message of the error the launch failed with, if it did
        let mut failure = None;

        self.state.send_if_modified(|state| {
            match step(&*state) {
                Step::Move(next) => {
                    moved = Some((state.phase(), next.phase()));
                    failure = next.error().map(|err| (err.kind(), err.to_string()));
                    *state = next;
                    true
                }
                Step::Ignore => false,
                Step::Reject => {
                    outcome = Err(LaunchError::OutOfOrderSignal {
                        from: state.phase(),
                        attempted: transition,
                    });
                    false
                }
            }
        });

        match (&outcome, moved) {
            (Ok(()), Some((from, to))) => {
                LAUNCH_TRANSITIONS.with_label_values(&[to.as_str()]).inc();
                if let Some((kind, err)) = failure {
                    LAUNCH_FAILURES.with_label_values(&[kind]).inc();
                    warn!(%from, %to, error = %err, "launch failed");
                } else {
                    info!(%from, %to, "launch state changed");
                }
            }
            (Ok(()), None) => {
                info!(%transition, "ignoring signal after launch failure");
            }
            (Err(err), _) => {
                warn!(%transition, error = %err, "rejected out-of-order signal");
            }
        }

        outcome
    }
}
