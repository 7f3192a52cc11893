//! AstralVisor - boot configuration and asset resolution for an embedded VM
//!
//! This library prepares everything an external full-system emulator needs
//! to boot a machine and then hands control to it.
//!
//! # Modules
//!
//! - `vm` - Machine spec, boot arguments, asset resolution, launch lifecycle
//! - `error` - Launch error kinds
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - Logging and OpenTelemetry setup
//!
//! # Quick Start
//!
//! ```ignore
//! use astralvisor::{MachineSpec, VmLauncher};
//!
//! let mut launcher = VmLauncher::new(runtime);
//! let mut handle = launcher.launch(MachineSpec::astral_os(), "/AstralOS/image/")?;
//! handle.wait_until_settled().await?;
//! ```

pub mod error;
pub mod metrics;
pub mod tracing;
pub mod vm;

// Re-export commonly used types at crate root for convenience
pub use error::LaunchError;
pub use vm::{LaunchHandle, LaunchState, MachineSpec, VmLauncher, VmRuntime};
