//! YAML documents accepted by `define` and `attach-disk`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use uuid::Uuid;

use ponyvirt::{generate_mac_address, DiskSpec, DomainDefinition, NicSource, NicSpec};

/// A domain to define.
///
/// ```yaml
/// name: web1
/// memory_mib: 1024
/// vcpus: 2
/// disks:
///   - format: qcow2
///     source: { type: file, path: /var/lib/libvirt/images/web1.qcow2 }
/// nics:
///   - source: { type: bridge, bridge: br100 }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DomainManifest {
    pub name: String,
    #[serde(default)]
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub memory_mib: Option<u64>,
    #[serde(default)]
    pub vcpus: Option<u32>,
    #[serde(default)]
    pub disks: Vec<DiskSpec>,
    #[serde(default)]
    pub nics: Vec<NicManifest>,
}

/// A NIC whose MAC address may be left to us.
#[derive(Debug, Clone, Deserialize)]
pub struct NicManifest {
    #[serde(default)]
    pub mac: Option<String>,
    pub source: NicSource,
}

impl DomainManifest {
    pub fn into_definition(self) -> DomainDefinition {
        let mut definition = DomainDefinition::new(self.name);

        if let Some(uuid) = self.uuid {
            definition = definition.with_uuid(uuid);
        }
        if let Some(memory) = self.memory_mib {
            definition = definition.with_memory(memory);
        }
        if let Some(vcpus) = self.vcpus {
            definition = definition.with_vcpus(vcpus);
        }

        definition.disks = self.disks;
        definition.nics = self
            .nics
            .into_iter()
            .map(|nic| NicSpec {
                mac: nic.mac.unwrap_or_else(generate_mac_address),
                source: nic.source,
            })
            .collect();

        definition
    }
}

/// Read and parse a YAML document.
pub fn read_yaml<T, P>(path: P) -> Result<T>
where
    T: serde::de::DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
