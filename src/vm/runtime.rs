//! Runtime handoff
//!
//! The virtualization runtime is an external executor. The launcher hands it
//! a [`LaunchConfig`] (boot arguments, bootstrap script, asset resolver) and a
//! [`RuntimeSignals`] sink it reports progress through:
//!
//! ```text
//! VmLauncher ──LaunchConfig──► VmRuntime
//!      ▲                          │ resolver.locate(name)    (0..n times)
//!      │                          │ on_assets_resolved()
//!      └───── RuntimeSignals ◄────┤ on_asset_error(name, cause)
//!                                 │ on_boot_started()
//! ```
//!
//! [`QemuProcessRuntime`] is a host-side executor that runs a native QEMU
//! binary with the same argument list.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use super::assets::{AssetLocator, ResolvedAsset};
use super::boot::BootArgumentList;
use super::lifecycle::{LaunchLifecycle, LaunchPhase};
use crate::error::LaunchError;
use crate::metrics::{ASSET_RESOLUTIONS, BOOT_DURATION};

/// Asset resolution callback registered with the runtime
///
/// Wraps the launcher's locator so that a rejected name also fails the
/// launch. Safe to call any number of times with the same name.
#[derive(Clone)]
pub struct AssetResolver {
    locator: Arc<dyn AssetLocator>,
    lifecycle: LaunchLifecycle,
}

impl AssetResolver {
    pub(crate) fn new(locator: Arc<dyn AssetLocator>, lifecycle: LaunchLifecycle) -> Self {
        Self { locator, lifecycle }
    }

    /// Resolve `logical_name` to the location the runtime should fetch
    pub fn locate(&self, logical_name: &str) -> Result<String, LaunchError> {
        self.locate_with_hint(logical_name, "")
    }

    /// Same as [`locate`](Self::locate), passing along the prefix the
    /// runtime would have used on its own
    pub fn locate_with_hint(
        &self,
        logical_name: &str,
        base_path_hint: &str,
    ) -> Result<String, LaunchError> {
        match self.locator.resolve(logical_name, base_path_hint) {
            Ok(asset) => {
                ASSET_RESOLUTIONS.with_label_values(&["ok"]).inc();
                Ok(asset.resolved_location().to_string())
            }
            Err(err) => {
                ASSET_RESOLUTIONS.with_label_values(&["rejected"]).inc();
                // Already logged by the lifecycle if it is out of order
                let _ = self.lifecycle.asset_failed(err.clone());
                Err(err)
            }
        }
    }
}

/// Everything the runtime needs to boot the machine
#[derive(Serialize, Clone)]
pub struct LaunchConfig {
    pub launch_id: String,
    /// Command line, replayed verbatim
    pub arguments: BootArgumentList,
    /// The runtime's own bootstrap script
    pub main_script: ResolvedAsset,
    /// Logical names of the drive images the runtime must fetch
    pub preload: Vec<String>,
    /// Path each drive is opened at, as it appears in `arguments`; same
    /// order as `preload`
    pub drive_paths: Vec<String>,
    #[serde(skip)]
    pub resolver: AssetResolver,
}

impl std::fmt::Debug for LaunchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchConfig")
            .field("launch_id", &self.launch_id)
            .field("arguments", &self.arguments)
            .field("main_script", &self.main_script)
            .field("preload", &self.preload)
            .field("drive_paths", &self.drive_paths)
            .finish()
    }
}

/// Progress callbacks the runtime invokes during startup
#[derive(Debug, Clone)]
pub struct RuntimeSignals {
    lifecycle: LaunchLifecycle,
    started_at: Instant,
}

impl RuntimeSignals {
    pub(crate) fn new(lifecycle: LaunchLifecycle, started_at: Instant) -> Self {
        Self {
            lifecycle,
            started_at,
        }
    }

    /// Phase the launch is currently in
    pub fn phase(&self) -> LaunchPhase {
        self.lifecycle.phase()
    }

    /// Every resolved asset was fetched without error
    pub fn on_assets_resolved(&self) -> Result<(), LaunchError> {
        self.lifecycle.assets_resolved()
    }

    /// Fetching `logical_name` failed
    pub fn on_asset_error(
        &self,
        logical_name: &str,
        cause: impl std::fmt::Display,
    ) -> Result<(), LaunchError> {
        self.lifecycle.asset_failed(LaunchError::AssetResolutionFailed {
            name: logical_name.to_string(),
            cause: cause.to_string(),
        })
    }

    /// Boot code started executing
    pub fn on_boot_started(&self) -> Result<(), LaunchError> {
        self.lifecycle.boot_started()?;
        if self.lifecycle.phase() == LaunchPhase::Running {
            BOOT_DURATION.observe(self.started_at.elapsed().as_secs_f64());
        }
        Ok(())
    }
}

/// External executor that consumes a launch configuration
///
/// `start` must not block on the guest: it kicks off asset loading and
/// reports back through `signals`, either before returning or later from
/// the host's event loop.
pub trait VmRuntime {
    fn start(&mut self, config: LaunchConfig, signals: RuntimeSignals);
}

/// Default QEMU system emulator binary
pub const DEFAULT_QEMU_BINARY: &str = "qemu-system-x86_64";

/// Runs the machine with a native QEMU process
///
/// Drive names are checked through the resolver. QEMU is started with the
/// asset directory as its working directory, so each drive must exist at
/// its argument-list path taken relative to that directory (absolute paths
/// are used as they are).
#[derive(Debug)]
pub struct QemuProcessRuntime {
    binary: PathBuf,
    asset_dir: PathBuf,
    child: Option<Child>,
}

impl QemuProcessRuntime {
    pub fn new(binary: impl Into<PathBuf>, asset_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            asset_dir: asset_dir.into(),
            child: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Wait for QEMU to exit
    pub fn wait(&mut self) -> std::io::Result<Option<std::process::ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => child.wait().map(Some),
            None => Ok(None),
        }
    }

    /// Kill QEMU if it is still running
    pub fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                // Process might already be dead
                warn!(error = %e, "failed to kill QEMU");
            }
            let _ = child.wait();
        }
    }

    fn spawn(&self, arguments: &BootArgumentList) -> std::io::Result<Child> {
        Command::new(&self.binary)
            .args(arguments)
            .current_dir(&self.asset_dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
    }
}

impl VmRuntime for QemuProcessRuntime {
    fn start(&mut self, config: LaunchConfig, signals: RuntimeSignals) {
        for (name, path) in config.preload.iter().zip(&config.drive_paths) {
            // A rejected name has already failed the launch
            if config.resolver.locate(name).is_err() {
                return;
            }
            if !self.asset_dir.join(path).exists() {
                let _ = signals.on_asset_error(name, format!("{} does not exist", path));
                return;
            }
        }
        if signals.on_assets_resolved().is_err() || signals.phase() != LaunchPhase::Ready {
            return;
        }

        match self.spawn(&config.arguments) {
            Ok(child) => {
                info!(
                    launch_id = %config.launch_id,
                    pid = child.id(),
                    binary = %self.binary.display(),
                    "QEMU started"
                );
                self.child = Some(child);
                let _ = signals.on_boot_started();
            }
            Err(e) => {
                let _ = signals.on_asset_error(&self.binary.display().to_string(), e);
            }
        }
    }
}

impl Drop for QemuProcessRuntime {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::assets::RootedLocator;
    use crate::vm::lifecycle::LaunchState;

    fn resolver(lifecycle: &LaunchLifecycle) -> AssetResolver {
        AssetResolver::new(Arc::new(RootedLocator::new("/AstralOS/image/")), lifecycle.clone())
    }

    fn awaiting_assets() -> LaunchLifecycle {
        let lifecycle = LaunchLifecycle::new();
        lifecycle.begin_configuring().unwrap();
        lifecycle.configuration_built().unwrap();
        lifecycle
    }

    #[test]
    fn test_locate_is_repeatable() {
        let lifecycle = awaiting_assets();
        let resolver = resolver(&lifecycle);
        assert_eq!(resolver.locate("out.wasm").unwrap(), "/AstralOS/image/out.wasm");
        assert_eq!(
            resolver.locate_with_hint("out.wasm", "/elsewhere/").unwrap(),
            "/AstralOS/image/out.wasm"
        );
        assert_eq!(lifecycle.phase(), LaunchPhase::AwaitingAssets);
    }

    #[test]
    fn test_rejected_name_fails_launch() {
        let lifecycle = awaiting_assets();
        let resolver = resolver(&lifecycle);

        let err = resolver.locate("../etc/passwd").unwrap_err();
        assert_eq!(err, LaunchError::InvalidAssetName("../etc/passwd".to_string()));
        assert_eq!(lifecycle.state(), LaunchState::Failed(err));
    }

    #[test]
    fn test_asset_error_signal() {
        let lifecycle = awaiting_assets();
        let signals = RuntimeSignals::new(lifecycle.clone(), Instant::now());
        signals.on_asset_error("out.data", "HTTP 404").unwrap();
        assert_eq!(
            lifecycle.state().error(),
            Some(&LaunchError::AssetResolutionFailed {
                name: "out.data".to_string(),
                cause: "HTTP 404".to_string(),
            })
        );
    }
}
