//! Type definitions for domain state and device specifications.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// DOMAIN STATE
// =============================================================================

/// Domain power state as reported by the backend.
///
/// Always derived from a fresh backend query, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainState {
    NoState,
    Running,
    Blocked,
    Paused,
    ShuttingDown,
    ShutOff,
    Crashed,
    Suspended,
}

impl DomainState {
    /// Whether the domain has a live instance.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DomainState::Running
                | DomainState::ShuttingDown
                | DomainState::Paused
                | DomainState::Blocked
        )
    }
}

impl Default for DomainState {
    fn default() -> Self {
        Self::NoState
    }
}

/// Snapshot of a domain's runtime information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
    /// Current power state
    pub state: DomainState,
    /// Maximum memory (KiB)
    pub max_memory_kib: u64,
    /// Current memory (KiB)
    pub memory_kib: u64,
    /// Number of virtual CPUs
    pub vcpus: u32,
    /// Total CPU time consumed (nanoseconds)
    pub cpu_time_ns: u64,
}

// =============================================================================
// DISKS
// =============================================================================

/// Disk device class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiskDevice {
    #[default]
    Disk,
    Cdrom,
    /// Any other class the backend reports (floppy, lun, ...).
    #[serde(untagged)]
    Other(String),
}

impl DiskDevice {
    pub fn as_str(&self) -> &str {
        match self {
            DiskDevice::Disk => "disk",
            DiskDevice::Cdrom => "cdrom",
            DiskDevice::Other(name) => name,
        }
    }

    pub(crate) fn parse(value: &str) -> Self {
        match value {
            "disk" => DiskDevice::Disk,
            "cdrom" => DiskDevice::Cdrom,
            other => DiskDevice::Other(other.to_string()),
        }
    }
}

/// Disk image format, passed to the driver element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    Raw,
    Qcow2,
    Vmdk,
    /// Any other format the backend understands.
    #[serde(untagged)]
    Other(String),
}

impl DiskFormat {
    pub fn as_str(&self) -> &str {
        match self {
            DiskFormat::Raw => "raw",
            DiskFormat::Qcow2 => "qcow2",
            DiskFormat::Vmdk => "vmdk",
            DiskFormat::Other(name) => name,
        }
    }

    pub(crate) fn parse(value: &str) -> Self {
        match value {
            "raw" => DiskFormat::Raw,
            "qcow2" => DiskFormat::Qcow2,
            "vmdk" => DiskFormat::Vmdk,
            other => DiskFormat::Other(other.to_string()),
        }
    }
}

/// One endpoint of a network-backed disk. Order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkHost {
    pub name: String,
    pub port: String,
}

impl NetworkHost {
    pub fn new(name: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port: port.into(),
        }
    }
}

/// Where the disk's data comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DiskSource {
    /// Image file on the host.
    File { path: String },
    /// Host block device.
    Block { dev: String },
    /// Network storage (sheepdog, rbd, nbd, ...).
    Network {
        protocol: String,
        name: String,
        #[serde(default)]
        hosts: Vec<NetworkHost>,
    },
    /// Any other disk type (volume, dir, ...), kept as the raw `<source>`
    /// attributes.
    #[serde(untagged)]
    Other {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        attributes: BTreeMap<String, String>,
    },
}

impl DiskSource {
    /// The libvirt disk `type` attribute for this source.
    pub fn kind(&self) -> &str {
        match self {
            DiskSource::File { .. } => "file",
            DiskSource::Block { .. } => "block",
            DiskSource::Network { .. } => "network",
            DiskSource::Other { kind, .. } => kind,
        }
    }
}

/// Declarative description of a disk to attach or define.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpec {
    /// Device class
    #[serde(default)]
    pub device: DiskDevice,
    /// Image format
    pub format: DiskFormat,
    /// Backing source
    pub source: DiskSource,
}

impl DiskSpec {
    /// A file-backed disk.
    pub fn file(path: impl Into<String>, format: DiskFormat) -> Self {
        Self {
            device: DiskDevice::Disk,
            format,
            source: DiskSource::File { path: path.into() },
        }
    }

    /// A network-backed disk with hosts tried in the given order.
    pub fn network(
        protocol: impl Into<String>,
        name: impl Into<String>,
        hosts: Vec<NetworkHost>,
        format: DiskFormat,
    ) -> Self {
        Self {
            device: DiskDevice::Disk,
            format,
            source: DiskSource::Network {
                protocol: protocol.into(),
                name: name.into(),
                hosts,
            },
        }
    }

    /// Change the device class.
    pub fn with_device(mut self, device: DiskDevice) -> Self {
        self.device = device;
        self
    }
}

/// A disk present in a domain's live configuration.
///
/// Only produced by decoding a backend document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedDisk {
    /// Device class
    pub device: DiskDevice,
    /// Image format
    pub format: DiskFormat,
    /// Backing source (`None` for an empty CD-ROM tray)
    pub source: Option<DiskSource>,
    /// Target identifier, e.g. "vdb"
    pub target: String,
}

// =============================================================================
// NETWORK INTERFACES
// =============================================================================

/// Where a NIC is plugged in on the host side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NicSource {
    /// Host bridge, e.g. "br100".
    Bridge { bridge: String },
    /// Libvirt virtual network, e.g. "default".
    Network { network: String },
}

impl NicSource {
    /// The libvirt interface `type` attribute for this source.
    pub fn kind(&self) -> &'static str {
        match self {
            NicSource::Bridge { .. } => "bridge",
            NicSource::Network { .. } => "network",
        }
    }
}

/// Declarative description of a virtual network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicSpec {
    /// MAC address
    pub mac: String,
    /// Host-side attachment
    pub source: NicSource,
}

impl NicSpec {
    /// A NIC plugged into a host bridge.
    pub fn bridge(mac: impl Into<String>, bridge: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            source: NicSource::Bridge {
                bridge: bridge.into(),
            },
        }
    }
}

/// Generate a random MAC address in the QEMU/KVM OUI with the locally
/// administered bit pattern kept clear of multicast.
pub fn generate_mac_address() -> String {
    let bytes: [u8; 3] = rand::random();
    format!(
        "52:54:00:{:02x}:{:02x}:{:02x}",
        bytes[0] & 0x3f,
        bytes[1],
        bytes[2]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states() {
        assert!(DomainState::Running.is_active());
        assert!(DomainState::Paused.is_active());
        assert!(DomainState::ShuttingDown.is_active());
        assert!(DomainState::Blocked.is_active());
        assert!(!DomainState::ShutOff.is_active());
        assert!(!DomainState::Crashed.is_active());
        assert!(!DomainState::NoState.is_active());
    }

    #[test]
    fn test_disk_spec_yaml() {
        let yaml = r#"
device: disk
format: raw
source:
  type: network
  protocol: sheepdog
  name: Alice
  hosts:
    - name: 127.0.0.1
      port: "7000"
"#;
        let spec: DiskSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            spec,
            DiskSpec::network(
                "sheepdog",
                "Alice",
                vec![NetworkHost::new("127.0.0.1", "7000")],
                DiskFormat::Raw
            )
        );
    }

    #[test]
    fn test_unknown_format_is_kept() {
        let spec: DiskSpec = serde_yaml::from_str(
            "format: vdi\nsource:\n  type: file\n  path: /tmp/a.vdi\n",
        )
        .unwrap();
        assert_eq!(spec.format, DiskFormat::Other("vdi".into()));
        assert_eq!(spec.format.as_str(), "vdi");
        assert_eq!(spec.device, DiskDevice::Disk);
    }

    #[test]
    fn test_unknown_device_class_is_kept() {
        assert_eq!(DiskDevice::parse("floppy"), DiskDevice::Other("floppy".into()));
        assert_eq!(DiskDevice::parse("floppy").as_str(), "floppy");
        assert_eq!(DiskDevice::parse("cdrom"), DiskDevice::Cdrom);

        let spec: DiskSpec = serde_yaml::from_str(
            "device: lun\nformat: raw\nsource:\n  type: block\n  dev: /dev/sdb\n",
        )
        .unwrap();
        assert_eq!(spec.device, DiskDevice::Other("lun".into()));
    }

    #[test]
    fn test_other_source_kind() {
        let source = DiskSource::Other {
            kind: "volume".into(),
            attributes: BTreeMap::from([("pool".to_string(), "default".to_string())]),
        };
        assert_eq!(source.kind(), "volume");
    }

    #[test]
    fn test_generate_mac_address() {
        let mac = generate_mac_address();
        assert!(mac.starts_with("52:54:00:"));
        assert_eq!(mac.split(':').count(), 6);
    }
}
