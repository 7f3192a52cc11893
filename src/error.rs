//! Launch errors
//!
//! Every failure a launch attempt can hit is one of these variants. Validation
//! errors are returned synchronously from the call that detects them; runtime
//! reported errors end up inside `LaunchState::Failed`.

use crate::vm::lifecycle::{LaunchPhase, Transition};

/// Error raised while configuring or driving a launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// MachineSpec broke one of its invariants
    InvalidMachineSpec {
        /// Offending field, e.g. `drives[2].unit`
        field: String,
        reason: String,
    },
    /// Logical asset name is empty or tries to leave the asset root
    InvalidAssetName(String),
    /// The runtime could not fetch a resolved asset
    AssetResolutionFailed { name: String, cause: String },
    /// A lifecycle signal arrived in a state that does not accept it
    OutOfOrderSignal {
        from: LaunchPhase,
        attempted: Transition,
    },
    /// The launcher already ran its single launch attempt
    AlreadyLaunched,
    /// The launch was cancelled by the host
    Cancelled,
}

impl LaunchError {
    pub(crate) fn invalid_spec(field: impl Into<String>, reason: impl Into<String>) -> Self {
        LaunchError::InvalidMachineSpec {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Stable label for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            LaunchError::InvalidMachineSpec { .. } => "invalid_machine_spec",
            LaunchError::InvalidAssetName(_) => "invalid_asset_name",
            LaunchError::AssetResolutionFailed { .. } => "asset_resolution_failed",
            LaunchError::OutOfOrderSignal { .. } => "out_of_order_signal",
            LaunchError::AlreadyLaunched => "already_launched",
            LaunchError::Cancelled => "cancelled",
        }
    }

    /// Asset name attached to the error, if any
    pub fn asset(&self) -> Option<&str> {
        match self {
            LaunchError::InvalidAssetName(name) => Some(name),
            LaunchError::AssetResolutionFailed { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchError::InvalidMachineSpec { field, reason } => {
                write!(f, "Invalid machine spec: {}: {}", field, reason)
            }
            LaunchError::InvalidAssetName(name) => write!(f, "Invalid asset name: {:?}", name),
            LaunchError::AssetResolutionFailed { name, cause } => {
                write!(f, "Failed to resolve asset {}: {}", name, cause)
            }
            LaunchError::OutOfOrderSignal { from, attempted } => {
                write!(f, "Signal {} not accepted in state {}", attempted, from)
            }
            LaunchError::AlreadyLaunched => write!(f, "Launcher has already been used"),
            LaunchError::Cancelled => write!(f, "Launch cancelled"),
        }
    }
}

impl std::error::Error for LaunchError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_field() {
        let err = LaunchError::invalid_spec("memory_size", "must be greater than zero");
        assert_eq!(
            err.to_string(),
            "Invalid machine spec: memory_size: must be greater than zero"
        );
        assert_eq!(err.kind(), "invalid_machine_spec");
    }

    #[test]
    fn test_asset_accessor() {
        let err = LaunchError::AssetResolutionFailed {
            name: "out.wasm".to_string(),
            cause: "404".to_string(),
        };
        assert_eq!(err.asset(), Some("out.wasm"));
        assert_eq!(LaunchError::Cancelled.asset(), None);
    }
}
