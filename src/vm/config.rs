//! Machine description structures
//!
//! These structs describe the virtual machine handed to the runtime. They are
//! plain values: built once by the caller (or loaded from JSON) and then owned
//! by the launcher for the whole launch attempt.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Guest memory size in bytes
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(transparent)]
pub struct MemorySize(pub u64);

impl MemorySize {
    /// Saturates at `u64::MAX` bytes
    pub fn from_mib(mib: u64) -> Self {
        Self(mib.saturating_mul(1 << 20))
    }

    /// Saturates at `u64::MAX` bytes
    pub fn from_gib(gib: u64) -> Self {
        Self(gib.saturating_mul(1 << 30))
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }

    /// Render with the largest unit that divides exactly ("1G", "512M", "4096")
    pub fn to_qemu_size(&self) -> String {
        const UNITS: [(u64, &str); 3] = [(1 << 30, "G"), (1 << 20, "M"), (1 << 10, "K")];

        for (scale, suffix) in UNITS {
            if self.0 >= scale && self.0 % scale == 0 {
                return format!("{}{}", self.0 / scale, suffix);
            }
        }
        self.0.to_string()
    }
}

/// How the guest console is wired
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialMode {
    /// Serial port multiplexed with the QEMU monitor on stdio
    #[serde(rename = "monitor+stdio")]
    MonitorStdio,
    #[serde(rename = "stdio")]
    Stdio,
    #[serde(rename = "null")]
    Null,
    #[serde(rename = "none")]
    None,
}

impl SerialMode {
    pub fn as_arg(&self) -> &'static str {
        match self {
            SerialMode::MonitorStdio => "mon:stdio",
            SerialMode::Stdio => "stdio",
            SerialMode::Null => "null",
            SerialMode::None => "none",
        }
    }
}

/// Guest networking backend
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    None,
    User,
    Bridge,
}

impl NetworkMode {
    pub fn as_arg(&self) -> &'static str {
        match self {
            NetworkMode::None => "none",
            NetworkMode::User => "user",
            NetworkMode::Bridge => "bridge",
        }
    }
}

/// What a drive is used for
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DriveRole {
    /// Bootable disk image
    Boot,
    /// Parallel-flash firmware slot (UEFI code / vars)
    Pflash,
}

/// On-disk image format
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DriveFormat {
    Raw,
    Qcow2,
    Vmdk,
    Vdi,
}

impl DriveFormat {
    pub fn as_arg(&self) -> &'static str {
        match self {
            DriveFormat::Raw => "raw",
            DriveFormat::Qcow2 => "qcow2",
            DriveFormat::Vmdk => "vmdk",
            DriveFormat::Vdi => "vdi",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

/// Block device attached to the machine
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DriveSpec {
    pub role: DriveRole,
    /// Logical asset name of the image
    pub file: String,
    pub format: DriveFormat,
    pub access_mode: AccessMode,
    /// Flash slot index; only meaningful for pflash drives
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<u32>,
    /// Directory in the runtime's filesystem where the image is preloaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_dir: Option<String>,
}

impl DriveSpec {
    pub fn boot(file: impl Into<String>, format: DriveFormat, access_mode: AccessMode) -> Self {
        Self {
            role: DriveRole::Boot,
            file: file.into(),
            format,
            access_mode,
            unit: None,
            mount_dir: None,
        }
    }

    pub fn pflash(
        unit: u32,
        file: impl Into<String>,
        format: DriveFormat,
        access_mode: AccessMode,
    ) -> Self {
        Self {
            role: DriveRole::Pflash,
            file: file.into(),
            format,
            access_mode,
            unit: Some(unit),
            mount_dir: None,
        }
    }

    /// Preload the image under `dir` instead of the runtime's working directory
    pub fn mounted_at(mut self, dir: impl Into<String>) -> Self {
        self.mount_dir = Some(dir.into());
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.access_mode == AccessMode::ReadOnly
    }

    /// Path the runtime sees for this drive
    pub fn runtime_path(&self) -> String {
        match &self.mount_dir {
            Some(dir) if dir.ends_with('/') => format!("{}{}", dir, self.file),
            Some(dir) => format!("{}/{}", dir, self.file),
            None => self.file.clone(),
        }
    }
}

/// Description of the virtual machine to boot
///
/// Hardware identifiers (`machine_type`, `cpu_model`) are passed through to
/// the runtime verbatim. Drive order is significant: it decides device
/// enumeration inside the guest.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MachineSpec {
    pub machine_type: String,
    pub cpu_model: String,
    pub memory_size: MemorySize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_search_path: Option<String>,
    pub serial_mode: SerialMode,
    #[serde(default)]
    pub drives: Vec<DriveSpec>,
    pub network_mode: NetworkMode,
}

impl MachineSpec {
    /// The AstralOS web deployment: q35 with OVMF firmware and a qcow2 disk
    pub fn astral_os() -> Self {
        Self {
            machine_type: "q35".to_string(),
            cpu_model: "qemu64".to_string(),
            memory_size: MemorySize::from_gib(1),
            firmware_search_path: Some("/pack-rom/".to_string()),
            serial_mode: SerialMode::MonitorStdio,
            drives: vec![
                DriveSpec::boot("AstralOS.qcow2", DriveFormat::Qcow2, AccessMode::ReadWrite)
                    .mounted_at("/tmp/"),
                DriveSpec::pflash(1, "OVMF_VARS-pure-efi.fd", DriveFormat::Raw, AccessMode::ReadWrite)
                    .mounted_at("/writable/"),
                DriveSpec::pflash(0, "OVMF_CODE-pure-efi.fd", DriveFormat::Raw, AccessMode::ReadOnly)
                    .mounted_at("/uefi/"),
            ],
            network_mode: NetworkMode::None,
        }
    }

    /// Load a machine description from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
