//! Integration tests for the launcher
//!
//! These tests drive a full launch against a scripted runtime that behaves
//! like the browser-hosted emulator: it resolves each file it needs through
//! the registered callback, then reports progress.

use std::sync::Arc;

use astralvisor::vm::{
    AccessMode, AssetLocator, DriveFormat, DriveSpec, LaunchConfig, LaunchPhase, LaunchState,
    MachineSpec, MemorySize, NetworkMode, QemuProcessRuntime, ResolvedAsset, RootedLocator,
    RuntimeSignals, SerialMode, VmLauncher, VmRuntime,
};
use astralvisor::LaunchError;

/// What the scripted runtime should do once started
#[derive(Clone, Copy)]
enum Script {
    /// Resolve everything, then report boot start
    Boot,
    /// Report a fetch failure for the second asset
    FailFetch,
    /// Resolve assets but never start booting
    Stall,
}

struct ScriptedRuntime {
    script: Script,
    /// Files the emulator fetches besides the drive images
    extra_assets: Vec<&'static str>,
    fetched: Vec<String>,
    signals: Option<RuntimeSignals>,
}

impl ScriptedRuntime {
    fn new(script: Script) -> Self {
        Self {
            script,
            extra_assets: vec!["out.wasm", "out.data"],
            fetched: Vec::new(),
            signals: None,
        }
    }
}

impl VmRuntime for ScriptedRuntime {
    fn start(&mut self, config: LaunchConfig, signals: RuntimeSignals) {
        let names = self
            .extra_assets
            .iter()
            .map(|s| s.to_string())
            .chain(config.preload.iter().cloned());

        for (i, name) in names.enumerate() {
            let Ok(location) = config.resolver.locate_with_hint(&name, "/default/") else {
                return;
            };
            if matches!(self.script, Script::FailFetch) && i == 1 {
                signals.on_asset_error(&name, "HTTP 404").unwrap();
                self.signals = Some(signals);
                return;
            }
            self.fetched.push(location);
        }

        signals.on_assets_resolved().unwrap();
        if matches!(self.script, Script::Boot) {
            signals.on_boot_started().unwrap();
        }
        self.signals = Some(signals);
    }
}

fn scenario_spec() -> MachineSpec {
    MachineSpec {
        machine_type: "q35".to_string(),
        cpu_model: "qemu64".to_string(),
        memory_size: MemorySize(1 << 30),
        firmware_search_path: None,
        serial_mode: SerialMode::MonitorStdio,
        drives: vec![
            DriveSpec::boot("AstralOS.qcow2", DriveFormat::Qcow2, AccessMode::ReadWrite),
            DriveSpec::pflash(1, "OVMF_VARS-pure-efi.fd", DriveFormat::Raw, AccessMode::ReadWrite),
            DriveSpec::pflash(0, "OVMF_CODE-pure-efi.fd", DriveFormat::Raw, AccessMode::ReadOnly),
        ],
        network_mode: NetworkMode::None,
    }
}

#[tokio::test]
async fn test_full_launch_reaches_running() {
    let mut launcher = VmLauncher::new(ScriptedRuntime::new(Script::Boot));
    let mut handle = launcher.launch(scenario_spec(), "/AstralOS/image/").unwrap();

    handle.wait_until_settled().await.unwrap();
    assert_eq!(handle.state(), LaunchState::Running);

    let fetched = &launcher.runtime().fetched;
    assert_eq!(fetched.len(), 5);
    assert_eq!(fetched[0], "/AstralOS/image/out.wasm");
    assert_eq!(fetched[4], "/AstralOS/image/OVMF_CODE-pure-efi.fd");
}

#[tokio::test]
async fn test_fetch_failure_surfaces_on_handle() {
    let mut launcher = VmLauncher::new(ScriptedRuntime::new(Script::FailFetch));
    let mut handle = launcher.launch(scenario_spec(), "/AstralOS/image/").unwrap();

    let err = handle.wait_until_settled().await.unwrap_err();
    assert_eq!(
        err,
        LaunchError::AssetResolutionFailed {
            name: "out.data".to_string(),
            cause: "HTTP 404".to_string(),
        }
    );

    // The runtime keeps calling back during teardown; nothing changes
    let signals = launcher.runtime().signals.clone().unwrap();
    assert_eq!(signals.on_assets_resolved(), Ok(()));
    assert_eq!(signals.on_boot_started(), Ok(()));
    assert_eq!(handle.error(), Some(err));
}

#[test]
fn test_traversal_in_runtime_request_fails_launch() {
    let mut runtime = ScriptedRuntime::new(Script::Boot);
    runtime.extra_assets = vec!["out.wasm", "../../etc/passwd"];

    let mut launcher = VmLauncher::new(runtime);
    let handle = launcher.launch(scenario_spec(), "/AstralOS/image/").unwrap();

    assert_eq!(
        handle.error(),
        Some(LaunchError::InvalidAssetName("../../etc/passwd".to_string()))
    );
    assert_eq!(launcher.runtime().fetched, ["/AstralOS/image/out.wasm"]);
}

#[test]
fn test_second_launch_after_running() {
    let mut launcher = VmLauncher::new(ScriptedRuntime::new(Script::Boot));
    launcher.launch(scenario_spec(), "/AstralOS/image/").unwrap();
    assert_eq!(launcher.state(), LaunchState::Running);

    let err = launcher.launch(scenario_spec(), "/AstralOS/image/").unwrap_err();
    assert_eq!(err, LaunchError::AlreadyLaunched);
    assert_eq!(launcher.state(), LaunchState::Running);
}

#[test]
fn test_second_launch_after_failure() {
    let mut spec = scenario_spec();
    spec.memory_size = MemorySize(0);

    let mut launcher = VmLauncher::new(ScriptedRuntime::new(Script::Boot));
    assert!(launcher.launch(spec, "/AstralOS/image/").is_err());
    assert_eq!(
        launcher.launch(scenario_spec(), "/AstralOS/image/").unwrap_err(),
        LaunchError::AlreadyLaunched
    );
    assert_eq!(launcher.state().phase(), LaunchPhase::Failed);
}

#[tokio::test]
async fn test_stalled_launch_times_out() {
    let mut launcher = VmLauncher::new(ScriptedRuntime::new(Script::Stall));
    let mut handle = launcher.launch(scenario_spec(), "/AstralOS/image/").unwrap();
    assert_eq!(handle.phase(), LaunchPhase::Ready);

    let err = handle
        .wait_until_running(tokio::time::Duration::from_millis(20))
        .await
        .unwrap_err();
    assert_eq!(err, LaunchError::Cancelled);
    assert_eq!(launcher.state(), LaunchState::Failed(LaunchError::Cancelled));
}

/// Locator that serves every asset from a fixed CDN prefix
struct PrefixedLocator;

impl AssetLocator for PrefixedLocator {
    fn resolve(&self, logical_name: &str, _hint: &str) -> Result<ResolvedAsset, LaunchError> {
        RootedLocator::new("https://cdn.example/v2/").resolve(logical_name, "")
    }
}

#[test]
fn test_custom_locator_is_used() {
    let mut launcher = VmLauncher::new(ScriptedRuntime::new(Script::Boot));
    launcher
        .launch_with_locator(scenario_spec(), Arc::new(PrefixedLocator))
        .unwrap();
    assert!(launcher
        .runtime()
        .fetched
        .iter()
        .all(|location| location.starts_with("https://cdn.example/v2/")));
}

#[test]
fn test_qemu_runtime_reports_missing_drive() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_str().unwrap().to_string();

    let runtime = QemuProcessRuntime::new("qemu-system-x86_64", dir.path());
    let mut launcher = VmLauncher::new(runtime);
    let handle = launcher.launch(scenario_spec(), &root).unwrap();

    let err = handle.error().unwrap();
    assert_eq!(err.asset(), Some("AstralOS.qcow2"));
    assert!(launcher.runtime().pid().is_none());
}

#[cfg(unix)]
#[test]
fn test_qemu_runtime_starts_process() {
    let dir = tempfile::tempdir().unwrap();
    for drive in &scenario_spec().drives {
        std::fs::write(dir.path().join(&drive.file), b"").unwrap();
    }
    let root = dir.path().to_str().unwrap().to_string();

    // `true` accepts and ignores the QEMU argument list
    let runtime = QemuProcessRuntime::new("true", dir.path());
    let mut launcher = VmLauncher::new(runtime);
    let handle = launcher.launch(scenario_spec(), &root).unwrap();

    assert_eq!(handle.state(), LaunchState::Running);
    assert!(launcher.runtime().pid().is_some());
    let status = launcher.runtime_mut().wait().unwrap().unwrap();
    assert!(status.success());
}

/// The deployment preset with its mount directories made relative, so they
/// land inside a scratch asset directory
fn relative_preset() -> MachineSpec {
    let mut spec = MachineSpec::astral_os();
    for drive in &mut spec.drives {
        if let Some(dir) = drive.mount_dir.take() {
            drive.mount_dir = Some(dir.trim_start_matches('/').to_string());
        }
    }
    spec
}

#[test]
fn test_qemu_runtime_checks_mounted_drive_paths() {
    let dir = tempfile::tempdir().unwrap();
    // Files at the root are not where QEMU will open them
    for drive in &relative_preset().drives {
        std::fs::write(dir.path().join(&drive.file), b"").unwrap();
    }
    let root = dir.path().to_str().unwrap().to_string();

    let runtime = QemuProcessRuntime::new("qemu-system-x86_64", dir.path());
    let mut launcher = VmLauncher::new(runtime);
    let handle = launcher.launch(relative_preset(), &root).unwrap();

    assert_eq!(
        handle.error(),
        Some(LaunchError::AssetResolutionFailed {
            name: "AstralOS.qcow2".to_string(),
            cause: "tmp/AstralOS.qcow2 does not exist".to_string(),
        })
    );
    assert!(launcher.runtime().pid().is_none());
}

#[cfg(unix)]
#[test]
fn test_qemu_runtime_starts_with_mounted_drives() {
    let dir = tempfile::tempdir().unwrap();
    for drive in &relative_preset().drives {
        let path = dir.path().join(drive.runtime_path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }
    let root = dir.path().to_str().unwrap().to_string();

    let runtime = QemuProcessRuntime::new("true", dir.path());
    let mut launcher = VmLauncher::new(runtime);
    let handle = launcher.launch(relative_preset(), &root).unwrap();

    assert_eq!(handle.state(), LaunchState::Running);
    let status = launcher.runtime_mut().wait().unwrap().unwrap();
    assert!(status.success());
}
