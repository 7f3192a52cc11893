//! VM Launcher - composition root for one launch attempt
//!
//! The VmLauncher is responsible for:
//! - Validating the MachineSpec and rendering its boot arguments
//! - Binding an asset locator to the configured root
//! - Handing the configuration and signal sink to the runtime
//! - Driving the lifecycle up to the point the runtime takes over
//!
//! A launcher runs exactly one launch attempt.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::Duration;
use tracing::{info, info_span};
use uuid::Uuid;

use super::assets::{AssetLocator, RootedLocator};
use super::boot::{BootArgumentList, BootConfigBuilder};
use super::config::MachineSpec;
use super::handle::LaunchHandle;
use super::lifecycle::{LaunchLifecycle, LaunchPhase, LaunchState};
use super::runtime::{AssetResolver, LaunchConfig, RuntimeSignals, VmRuntime};
use crate::error::LaunchError;

/// Configuration for the VmLauncher
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Logical name of the runtime's bootstrap script
    pub main_script: String,
    /// How long callers should wait for the runtime to reach Running
    pub boot_timeout: Duration,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            main_script: "out.js".to_string(),
            boot_timeout: Duration::from_secs(60),
        }
    }
}

/// Drives a single launch of a MachineSpec on a runtime
pub struct VmLauncher<R: VmRuntime> {
    runtime: R,
    builder: BootConfigBuilder,
    config: LauncherConfig,
    lifecycle: LaunchLifecycle,
    /// Set once the configuration has been built
    spec: Option<MachineSpec>,
    arguments: Option<BootArgumentList>,
}

impl<R: VmRuntime> VmLauncher<R> {
    pub fn new(runtime: R) -> Self {
        Self::with_config(runtime, LauncherConfig::default())
    }

    pub fn with_config(runtime: R, config: LauncherConfig) -> Self {
        Self {
            runtime,
            builder: BootConfigBuilder::new(),
            config,
            lifecycle: LaunchLifecycle::new(),
            spec: None,
            arguments: None,
        }
    }

    /// Launch `spec`, resolving assets under `asset_root`
    pub fn launch(
        &mut self,
        spec: MachineSpec,
        asset_root: &str,
    ) -> Result<LaunchHandle, LaunchError> {
        self.launch_with_locator(spec, Arc::new(RootedLocator::new(asset_root)))
    }

    /// Launch `spec` with a caller-supplied locator
    ///
    /// Validation errors are returned here, after moving the lifecycle to
    /// `Failed`. Anything the runtime reports later shows up on the handle.
    pub fn launch_with_locator(
        &mut self,
        spec: MachineSpec,
        locator: Arc<dyn AssetLocator>,
    ) -> Result<LaunchHandle, LaunchError> {
        if self.lifecycle.phase() != LaunchPhase::Uninitialized {
            return Err(LaunchError::AlreadyLaunched);
        }

        let started_at = Instant::now();
        let launch_id = format!("launch-{}", Uuid::now_v7());
        let span = info_span!("launch", launch_id = %launch_id);
        let _guard = span.enter();

        self.lifecycle
            .begin_configuring()
            .map_err(|_| LaunchError::AlreadyLaunched)?;

        let arguments = match self.builder.build(&spec) {
            Ok(arguments) => arguments,
            Err(err) => return Err(self.reject(err)),
        };
        let main_script = match locator.resolve(&self.config.main_script, "") {
            Ok(asset) => asset,
            Err(err) => return Err(self.reject(err)),
        };
        self.lifecycle.configuration_built()?;

        info!(
            machine = %spec.machine_type,
            drives = spec.drives.len(),
            main_script = %main_script,
            "boot configuration built"
        );

        let handoff = LaunchConfig {
            launch_id: launch_id.clone(),
            arguments: arguments.clone(),
            main_script,
            preload: spec.drives.iter().map(|d| d.file.clone()).collect(),
            drive_paths: spec.drives.iter().map(|d| d.runtime_path()).collect(),
            resolver: AssetResolver::new(locator, self.lifecycle.clone()),
        };
        self.spec = Some(spec);
        self.arguments = Some(arguments);

        let handle = LaunchHandle::new(launch_id, self.lifecycle.clone(), started_at);
        let signals = RuntimeSignals::new(self.lifecycle.clone(), started_at);
        self.runtime.start(handoff, signals);

        Ok(handle)
    }

    fn reject(&self, err: LaunchError) -> LaunchError {
        // Cannot be out of order: we just moved to Configuring
        let _ = self.lifecycle.configuration_rejected(err.clone());
        err
    }

    /// Cancel the launch if it has not finished
    pub fn cancel(&self) -> Result<(), LaunchError> {
        self.lifecycle.cancel()
    }

    pub fn state(&self) -> LaunchState {
        self.lifecycle.state()
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// The launched spec, once configuration succeeded
    pub fn spec(&self) -> Option<&MachineSpec> {
        self.spec.as_ref()
    }

    /// The argument list handed to the runtime
    pub fn arguments(&self) -> Option<&BootArgumentList> {
        self.arguments.as_ref()
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }
}
