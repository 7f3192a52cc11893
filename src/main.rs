use std::env;

use astralvisor::tracing::{init_tracing, shutdown_tracing};
use astralvisor::vm::{
    LaunchConfig, LauncherConfig, MachineSpec, QemuProcessRuntime, RuntimeSignals, VmLauncher,
    VmRuntime, DEFAULT_QEMU_BINARY,
};

const DEFAULT_ASSET_ROOT: &str = "/AstralOS/image/";

const USAGE: &str =
    "usage: astralvisor [--dry-run] [--otlp URL] [--qemu BINARY] [SPEC.json] [ASSET_ROOT]";

/// Command line options
struct Options {
    dry_run: bool,
    otlp_endpoint: Option<String>,
    qemu_binary: String,
    spec_path: Option<String>,
    asset_root: String,
}

fn parse_args() -> Result<Options, String> {
    let mut dry_run = false;
    let mut otlp_endpoint = None;
    let mut qemu_binary = DEFAULT_QEMU_BINARY.to_string();
    let mut positional = Vec::new();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dry-run" => dry_run = true,
            "--otlp" => otlp_endpoint = Some(args.next().ok_or("--otlp needs a URL")?),
            "--qemu" => qemu_binary = args.next().ok_or("--qemu needs a path")?,
            "-h" | "--help" => return Err(USAGE.to_string()),
            flag if flag.starts_with("--") => return Err(format!("unknown flag {}\n{}", flag, USAGE)),
            _ => positional.push(arg),
        }
    }
    if positional.len() > 2 {
        return Err(USAGE.to_string());
    }

    let mut positional = positional.into_iter();
    Ok(Options {
        dry_run,
        otlp_endpoint,
        qemu_binary,
        spec_path: positional.next(),
        asset_root: positional
            .next()
            .unwrap_or_else(|| DEFAULT_ASSET_ROOT.to_string()),
    })
}

/// Prints the handoff instead of starting anything
struct PrintHandoff;

impl VmRuntime for PrintHandoff {
    fn start(&mut self, config: LaunchConfig, _signals: RuntimeSignals) {
        match serde_json::to_string_pretty(&config) {
            Ok(json) => println!("{}", json),
            Err(e) => tracing::error!(error = %e, "failed to serialize launch config"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let options = match parse_args() {
        Ok(options) => options,
        Err(msg) => {
            eprintln!("{}", msg);
            std::process::exit(2);
        }
    };

    init_tracing("astralvisor", options.otlp_endpoint.as_deref())?;

    let spec = match &options.spec_path {
        Some(path) => MachineSpec::from_json_file(path)?,
        None => MachineSpec::astral_os(),
    };

    if options.dry_run {
        let mut launcher = VmLauncher::new(PrintHandoff);
        launcher.launch(spec, &options.asset_root)?;
        shutdown_tracing();
        return Ok(());
    }

    let config = LauncherConfig::default();
    let boot_timeout = config.boot_timeout;
    let runtime = QemuProcessRuntime::new(&options.qemu_binary, &options.asset_root);
    let mut launcher = VmLauncher::with_config(runtime, config);

    let mut handle = launcher.launch(spec, &options.asset_root)?;
    handle.wait_until_running(boot_timeout).await?;

    tracing::info!(launch_id = %handle.launch_id, "VM is running (press Ctrl+C to exit)");
    let status = launcher.runtime_mut().wait()?;
    tracing::info!(?status, "QEMU exited");

    shutdown_tracing();
    Ok(())
}
