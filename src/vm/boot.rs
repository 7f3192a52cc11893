//! Boot argument rendering
//!
//! Turns a [`MachineSpec`] into the flag/value token list the runtime replays
//! as its command line. The emission order is fixed:
//!
//! ```text
//! -machine <type>  -cpu <model>  -m <size>  [-L <firmware path>]
//! -serial <mode>   (-drive <value>)*         -net <mode>
//! ```
//!
//! Drives are emitted in the order they appear in the spec. Each flag is
//! immediately followed by its value.

use std::collections::HashMap;

use serde::Serialize;

use super::assets::validate_asset_name;
use super::config::{DriveRole, DriveSpec, MachineSpec};
use crate::error::LaunchError;

/// Ordered flag/value tokens handed to the runtime
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct BootArgumentList(Vec<String>);

impl BootArgumentList {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value that follows the first occurrence of `flag`
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.0
            .iter()
            .position(|token| token == flag)
            .and_then(|i| self.0.get(i + 1))
            .map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl std::fmt::Display for BootArgumentList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

impl<'a> IntoIterator for &'a BootArgumentList {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Validates a MachineSpec and renders its boot arguments
#[derive(Debug, Clone, Copy, Default)]
pub struct BootConfigBuilder;

impl BootConfigBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build the argument list for `spec`
    ///
    /// The whole spec is validated before anything is emitted, so an invalid
    /// spec never yields a partial list.
    pub fn build(&self, spec: &MachineSpec) -> Result<BootArgumentList, LaunchError> {
        validate(spec)?;

        let mut args = Vec::with_capacity(10 + 2 * spec.drives.len());
        let mut push = |flag: &str, value: String| {
            args.push(flag.to_string());
            args.push(value);
        };

        push("-machine", spec.machine_type.clone());
        push("-cpu", spec.cpu_model.clone());
        push("-m", spec.memory_size.to_qemu_size());
        if let Some(path) = &spec.firmware_search_path {
            push("-L", path.clone());
        }
        push("-serial", spec.serial_mode.as_arg().to_string());
        for drive in &spec.drives {
            push("-drive", drive_value(drive));
        }
        push("-net", spec.network_mode.as_arg().to_string());

        Ok(BootArgumentList(args))
    }
}

/// Render the `-drive` option value for one drive
fn drive_value(drive: &DriveSpec) -> String {
    let mut value = match drive.role {
        DriveRole::Boot => format!("file={}", drive.runtime_path()),
        DriveRole::Pflash => format!(
            "if=pflash,format={},unit={},file={}",
            drive.format.as_arg(),
            drive.unit.unwrap_or_default(),
            drive.runtime_path()
        ),
    };
    if drive.is_read_only() {
        value.push_str(",readonly=on");
    }
    value
}

fn validate(spec: &MachineSpec) -> Result<(), LaunchError> {
    if spec.machine_type.trim().is_empty() {
        return Err(LaunchError::invalid_spec("machine_type", "must not be empty"));
    }
    if spec.cpu_model.trim().is_empty() {
        return Err(LaunchError::invalid_spec("cpu_model", "must not be empty"));
    }
    if spec.memory_size.bytes() == 0 {
        return Err(LaunchError::invalid_spec(
            "memory_size",
            "must be greater than zero",
        ));
    }
    if let Some(path) = &spec.firmware_search_path {
        if path.is_empty() {
            return Err(LaunchError::invalid_spec(
                "firmware_search_path",
                "must not be empty when set",
            ));
        }
    }

    // pflash unit -> index of the drive that claimed it
    let mut units: HashMap<u32, usize> = HashMap::new();
    for (i, drive) in spec.drives.iter().enumerate() {
        if drive.file.is_empty() {
            return Err(LaunchError::invalid_spec(
                format!("drives[{}].file", i),
                "must not be empty",
            ));
        }
        validate_asset_name(&drive.file)?;
        if let Some(dir) = &drive.mount_dir {
            if dir.split(['/', '\\']).any(|segment| segment == "..") {
                return Err(LaunchError::invalid_spec(
                    format!("drives[{}].mount_dir", i),
                    "must not contain '..' segments",
                ));
            }
        }
        if drive.runtime_path().contains(',') {
            return Err(LaunchError::invalid_spec(
                format!("drives[{}].file", i),
                "must not contain ','",
            ));
        }

        if drive.role != DriveRole::Pflash {
            continue;
        }
        let Some(unit) = drive.unit else {
            return Err(LaunchError::invalid_spec(
                format!("drives[{}].unit", i),
                "pflash drive requires a unit index",
            ));
        };
        if let Some(first) = units.insert(unit, i) {
            return Err(LaunchError::invalid_spec(
                format!("drives[{}].unit", i),
                format!("pflash unit {} already used by drives[{}]", unit, first),
            ));
        }
    }

    Ok(())
}
