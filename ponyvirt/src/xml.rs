//! Codec between device specifications and libvirt domain XML.
//!
//! Encoding produces standalone device fragments suitable for
//! `virDomainAttachDevice`/`virDomainDefineXML`. Decoding reads the disk,
//! console and graphics elements back out of a full domain document.
//!
//! Unexpected document shapes are reported as [`DocumentError`]; nothing is
//! defaulted in their place. Callers attach the domain they were reading
//! with [`DocumentError::in_domain`].

use serde::{Deserialize, Serialize};

use crate::document;
use crate::error::{DocumentError, DocumentResult};
use crate::types::*;

/// Bus used for every disk target.
pub const DISK_BUS: &str = "virtio";
/// Device model used for every NIC.
pub const NIC_MODEL: &str = "virtio";
/// Driver name of the device emulator.
pub const DRIVER_NAME: &str = "qemu";
/// Cache mode written to every disk driver element.
pub const DRIVER_CACHE: &str = "none";

// =============================================================================
// XML SCHEMA
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DomainXml {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub memory: Option<MemoryXml>,
    #[serde(default)]
    pub vcpu: Option<VcpuXml>,
    #[serde(default)]
    pub devices: Option<DevicesXml>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MemoryXml {
    #[serde(rename = "@unit", default)]
    unit: Option<String>,
    #[serde(rename = "$text")]
    value: u64,
}

impl MemoryXml {
    /// Memory size normalised to KiB.
    pub fn kib(&self) -> DocumentResult<u64> {
        let unit = self.unit.as_deref().unwrap_or("KiB");
        let (multiplier, divisor) = match unit {
            "b" | "bytes" => (1, 1024),
            "k" | "KiB" => (1, 1),
            "KB" => (1000, 1024),
            "M" | "MiB" => (1024, 1),
            "MB" => (1_000_000, 1024),
            "G" | "GiB" => (1024 * 1024, 1),
            "GB" => (1_000_000_000, 1024),
            other => return Err(DocumentError::new(format!("unknown memory unit '{}'", other))),
        };

        self.value
            .checked_mul(multiplier)
            .map(|bytes| bytes / divisor)
            .ok_or_else(|| DocumentError::new(format!("memory size {} {} out of range", self.value, unit)))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct VcpuXml {
    #[serde(rename = "$text")]
    pub value: u32,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DevicesXml {
    #[serde(rename = "disk", default)]
    disks: Vec<DiskXml>,
    #[serde(rename = "console", default)]
    consoles: Vec<ConsoleXml>,
    #[serde(rename = "graphics", default)]
    graphics: Vec<GraphicsXml>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "disk")]
struct DiskXml {
    #[serde(rename = "@type")]
    kind: String,
    #[serde(rename = "@device", default)]
    device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<DiskSourceXml>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<TargetXml>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    driver: Option<DriverXml>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DiskSourceXml {
    #[serde(rename = "@file", default, skip_serializing_if = "Option::is_none")]
    file: Option<String>,
    #[serde(rename = "@dev", default, skip_serializing_if = "Option::is_none")]
    dev: Option<String>,
    #[serde(rename = "@protocol", default, skip_serializing_if = "Option::is_none")]
    protocol: Option<String>,
    #[serde(rename = "@name", default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "host", default, skip_serializing_if = "Vec::is_empty")]
    hosts: Vec<HostXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HostXml {
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(rename = "@port", default)]
    port: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TargetXml {
    #[serde(rename = "@dev", default)]
    dev: Option<String>,
    #[serde(rename = "@bus", default, skip_serializing_if = "Option::is_none")]
    bus: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DriverXml {
    #[serde(rename = "@name", default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "@cache", default, skip_serializing_if = "Option::is_none")]
    cache: Option<String>,
    #[serde(rename = "@type", default, skip_serializing_if = "Option::is_none")]
    format: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename = "interface")]
struct InterfaceXml {
    #[serde(rename = "@type")]
    kind: &'static str,
    mac: MacXml,
    source: NicSourceXml,
    model: ModelXml,
}

#[derive(Debug, Serialize)]
struct MacXml {
    #[serde(rename = "@address")]
    address: String,
}

#[derive(Debug, Serialize)]
struct NicSourceXml {
    #[serde(rename = "@bridge", skip_serializing_if = "Option::is_none")]
    bridge: Option<String>,
    #[serde(rename = "@network", skip_serializing_if = "Option::is_none")]
    network: Option<String>,
}

#[derive(Debug, Serialize)]
struct ModelXml {
    #[serde(rename = "@type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ConsoleXml {
    #[serde(rename = "@type", default)]
    kind: Option<String>,
    #[serde(rename = "@tty", default)]
    tty: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphicsXml {
    #[serde(rename = "@type", default)]
    kind: Option<String>,
    #[serde(rename = "@port", default)]
    port: Option<String>,
}

// =============================================================================
// ENCODING
// =============================================================================

/// Encode a disk spec as a `<disk>` fragment targeting `target`.
///
/// Host entries keep their input order; the backend tries them in sequence.
pub fn encode_disk(spec: &DiskSpec, target: &str) -> DocumentResult<String> {
    encode_disk_parts(&spec.device, &spec.format, Some(&spec.source), target)
}

/// Encode a fragment matching a disk read back from a live document.
pub fn encode_attached_disk(disk: &AttachedDisk) -> DocumentResult<String> {
    encode_disk_parts(&disk.device, &disk.format, disk.source.as_ref(), &disk.target)
}

fn encode_disk_parts(
    device: &DiskDevice,
    format: &DiskFormat,
    source: Option<&DiskSource>,
    target: &str,
) -> DocumentResult<String> {
    let kind = source.map(DiskSource::kind).unwrap_or("file");
    let source_xml = source.and_then(|source| match source {
        DiskSource::File { path } => Some(DiskSourceXml {
            file: Some(path.clone()),
            ..Default::default()
        }),
        DiskSource::Block { dev } => Some(DiskSourceXml {
            dev: Some(dev.clone()),
            ..Default::default()
        }),
        DiskSource::Network { protocol, name, hosts } => Some(DiskSourceXml {
            protocol: Some(protocol.clone()),
            name: Some(name.clone()),
            hosts: hosts
                .iter()
                .map(|host| HostXml {
                    name: Some(host.name.clone()),
                    port: Some(host.port.clone()),
                })
                .collect(),
            ..Default::default()
        }),
        // Written below from its raw attributes.
        DiskSource::Other { .. } => None,
    });

    let disk = DiskXml {
        kind: kind.to_string(),
        device: Some(device.as_str().to_string()),
        source: source_xml,
        target: Some(TargetXml {
            dev: Some(target.to_string()),
            bus: Some(DISK_BUS.to_string()),
        }),
        driver: Some(DriverXml {
            name: Some(DRIVER_NAME.to_string()),
            cache: Some(DRIVER_CACHE.to_string()),
            format: Some(format.as_str().to_string()),
        }),
    };

    let fragment = quick_xml::se::to_string(&disk).map_err(DocumentError::new)?;

    match source {
        Some(DiskSource::Other { attributes, .. }) => {
            let element = document::empty_element("source", attributes)?;
            document::append_children(&fragment, 0, "disk", &[element])
        }
        _ => Ok(fragment),
    }
}

/// Encode a NIC spec as an `<interface>` fragment.
pub fn encode_nic(spec: &NicSpec) -> DocumentResult<String> {
    let source = match &spec.source {
        NicSource::Bridge { bridge } => NicSourceXml {
            bridge: Some(bridge.clone()),
            network: None,
        },
        NicSource::Network { network } => NicSourceXml {
            bridge: None,
            network: Some(network.clone()),
        },
    };

    let nic = InterfaceXml {
        kind: spec.source.kind(),
        mac: MacXml {
            address: spec.mac.clone(),
        },
        source,
        model: ModelXml { kind: NIC_MODEL },
    };

    quick_xml::se::to_string(&nic).map_err(DocumentError::new)
}

// =============================================================================
// DECODING
// =============================================================================

pub(crate) fn parse_domain(document: &str) -> DocumentResult<DomainXml> {
    quick_xml::de::from_str(document)
        .map_err(|e| DocumentError::new(format!("unparseable domain document: {}", e)))
}

fn devices(document: &str) -> DocumentResult<DevicesXml> {
    parse_domain(document)?
        .devices
        .ok_or_else(|| DocumentError::new("domain document has no <devices> element"))
}

/// Decode every `<disk>` element of a domain document, in document order.
///
/// CD-ROM drives are returned alongside disks; use
/// [`AttachedDisk::device`] to tell them apart.
pub fn decode_disks(document: &str) -> DocumentResult<Vec<AttachedDisk>> {
    devices(document)?
        .disks
        .into_iter()
        .map(|disk| decode_disk_xml(disk, document))
        .collect()
}

/// Decode a standalone `<disk>` fragment.
pub fn decode_disk(fragment: &str) -> DocumentResult<AttachedDisk> {
    let disk: DiskXml = quick_xml::de::from_str(fragment)
        .map_err(|e| DocumentError::new(format!("unparseable disk fragment: {}", e)))?;
    decode_disk_xml(disk, fragment)
}

/// `document` is the text `disk` was read from; sources of types without a
/// fixed schema are re-read from it.
fn decode_disk_xml(disk: DiskXml, document: &str) -> DocumentResult<AttachedDisk> {
    let target = disk
        .target
        .and_then(|t| t.dev)
        .ok_or_else(|| DocumentError::new("disk element without <target dev=...>"))?;

    let device = disk
        .device
        .as_deref()
        .map(DiskDevice::parse)
        .unwrap_or_default();

    let format = disk
        .driver
        .and_then(|d| d.format)
        .map(|f| DiskFormat::parse(&f))
        .ok_or_else(|| DocumentError::new(format!("disk {} has no <driver type=...>", target)))?;

    // Removable media may be empty; a plain disk always has a backing source.
    let source = match disk.source {
        Some(source) => Some(decode_source(&disk.kind, source, &target, document)?),
        None if device != DiskDevice::Disk => None,
        None => {
            return Err(DocumentError::new(format!("disk {} has no <source>", target)));
        }
    };

    Ok(AttachedDisk {
        device,
        format,
        source,
        target,
    })
}

fn decode_source(
    kind: &str,
    source: DiskSourceXml,
    target: &str,
    document: &str,
) -> DocumentResult<DiskSource> {
    let missing = |what: &str| DocumentError::new(format!("disk {} source has no '{}'", target, what));

    match kind {
        "file" => Ok(DiskSource::File {
            path: source.file.ok_or_else(|| missing("file"))?,
        }),
        "block" => Ok(DiskSource::Block {
            dev: source.dev.ok_or_else(|| missing("dev"))?,
        }),
        "network" => {
            let hosts = source
                .hosts
                .into_iter()
                .map(|host| {
                    Ok(NetworkHost {
                        name: host.name.ok_or_else(|| missing("host/@name"))?,
                        port: host.port.ok_or_else(|| missing("host/@port"))?,
                    })
                })
                .collect::<DocumentResult<Vec<_>>>()?;

            Ok(DiskSource::Network {
                protocol: source.protocol.ok_or_else(|| missing("protocol"))?,
                name: source.name.ok_or_else(|| missing("name"))?,
                hosts,
            })
        }
        other => Ok(DiskSource::Other {
            kind: other.to_string(),
            attributes: document::disk_source_attributes(document, target)?.unwrap_or_default(),
        }),
    }
}

/// The tty path of the first pty console, if any.
pub fn console_tty(document: &str) -> DocumentResult<Option<String>> {
    Ok(devices(document)?
        .consoles
        .into_iter()
        .find(|c| c.kind.as_deref() == Some("pty"))
        .and_then(|c| c.tty))
}

/// The port of the first VNC graphics device, if one has been assigned.
///
/// Libvirt reports `-1` until an autoport domain is running.
pub fn vnc_port(document: &str) -> DocumentResult<Option<u16>> {
    let Some(port) = devices(document)?
        .graphics
        .into_iter()
        .find(|g| g.kind.as_deref() == Some("vnc"))
        .and_then(|g| g.port)
    else {
        return Ok(None);
    };

    let port: i32 = port
        .parse()
        .map_err(|_| DocumentError::new(format!("VNC port '{}' is not a number", port)))?;

    if port < 0 {
        return Ok(None);
    }

    u16::try_from(port)
        .map(Some)
        .map_err(|_| DocumentError::new(format!("VNC port {} out of range", port)))
}
