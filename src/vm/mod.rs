//! VM launch module
//!
//! This module prepares a machine for an external virtualization runtime:
//! - Machine description (MachineSpec, drives)
//! - Boot argument rendering
//! - Asset resolution under a fixed root
//! - Launch lifecycle (state machine, handle, runtime signals)

pub mod assets;
pub mod boot;
pub mod config;
pub mod handle;
pub mod launcher;
pub mod lifecycle;
pub mod runtime;

pub use assets::{validate_asset_name, AssetLocator, ResolvedAsset, RootedLocator};
pub use boot::{BootArgumentList, BootConfigBuilder};
pub use config::*;
pub use handle::LaunchHandle;
pub use launcher::{LauncherConfig, VmLauncher};
pub use lifecycle::{LaunchLifecycle, LaunchPhase, LaunchState, Transition};
pub use runtime::{
    AssetResolver, LaunchConfig, QemuProcessRuntime, RuntimeSignals, VmRuntime,
    DEFAULT_QEMU_BINARY,
};
