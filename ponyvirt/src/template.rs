//! Domain template documents.
//!
//! A template is a skeleton domain document with placeholder `name`, `uuid`,
//! `memory` and `vcpu` elements and a `devices` container. Rendering a
//! [`DomainDefinition`] fills those in and appends one fragment per disk and
//! NIC.

use std::path::Path;

use tracing::debug;

use crate::document;
use crate::error::{DocumentResult, Error, Result};
use crate::hypervisor::DomainDefinition;
use crate::slots::DeviceSlotPool;
use crate::xml;

/// Built-in template: KVM guest with a pty console and auto-port VNC.
pub const BUILTIN_TEMPLATE: &str = include_str!("../templates/vm.xml");

/// A skeleton domain document.
#[derive(Debug, Clone)]
pub struct Template {
    document: String,
}

impl Default for Template {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Template {
    pub fn builtin() -> Self {
        Self {
            document: BUILTIN_TEMPLATE.to_string(),
        }
    }

    /// Load a template from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|source| Error::Template {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), "Loaded domain template");
        Ok(Self { document })
    }

    pub fn from_document(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
        }
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    /// Produce the full domain document for `definition`.
    ///
    /// Disks get `vda`, `vdb`, ... in the order given, from a slot sequence
    /// private to this call.
    pub fn render(&self, definition: &DomainDefinition) -> Result<String> {
        let mut slots = DeviceSlotPool::full();
        let targets = definition
            .disks
            .iter()
            .map(|_| {
                slots.allocate().map(|slot| slot.name()).ok_or_else(|| Error::SlotsExhausted {
                    domain: definition.name.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.fill(definition, &targets)
            .map_err(|e| e.in_domain(&definition.name, "define"))
    }

    fn fill(&self, definition: &DomainDefinition, targets: &[String]) -> DocumentResult<String> {
        let document = document::set_fields(
            &self.document,
            &[
                ("name", definition.name.clone()),
                ("uuid", definition.uuid.to_string()),
                ("memory", definition.memory_mib.to_string()),
                ("vcpu", definition.vcpus.to_string()),
            ],
        )?;

        let mut fragments = Vec::with_capacity(definition.disks.len() + definition.nics.len());

        for (disk, target) in definition.disks.iter().zip(targets) {
            fragments.push(xml::encode_disk(disk, target)?);
        }

        for nic in &definition.nics {
            fragments.push(xml::encode_nic(nic)?);
        }

        document::append_devices(&document, &fragments)
    }
}
