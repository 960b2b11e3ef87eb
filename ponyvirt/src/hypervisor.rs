//! Registry of the domains reachable through one backend connection.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::backend::Backend;
use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::template::Template;
use crate::types::{DiskSpec, NicSpec};

/// How a domain is addressed in a lookup.
///
/// Numeric ids are the backend's live numbering of running domains and may
/// be recycled; names are persistent. The two are resolved independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainRef {
    Id(u32),
    Name(String),
}

impl fmt::Display for DomainRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainRef::Id(id) => write!(f, "#{}", id),
            DomainRef::Name(name) => f.write_str(name),
        }
    }
}

impl From<u32> for DomainRef {
    fn from(id: u32) -> Self {
        DomainRef::Id(id)
    }
}

impl From<&str> for DomainRef {
    fn from(name: &str) -> Self {
        DomainRef::Name(name.to_string())
    }
}

impl From<String> for DomainRef {
    fn from(name: String) -> Self {
        DomainRef::Name(name)
    }
}

impl DomainRef {
    /// Parse user input: all-digit strings are ids, anything else a name.
    ///
    /// A domain whose name is all digits (e.g. "2024") therefore cannot be
    /// reached through this function; build [`DomainRef::Name`] directly.
    pub fn parse(value: &str) -> Self {
        value
            .parse::<u32>()
            .map(DomainRef::Id)
            .unwrap_or_else(|_| DomainRef::Name(value.to_string()))
    }
}

/// Everything needed to define a new domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainDefinition {
    /// Domain name
    pub name: String,
    /// Domain UUID
    #[serde(default = "Uuid::new_v4")]
    pub uuid: Uuid,
    /// Memory size in MiB
    #[serde(default = "default_memory_mib")]
    pub memory_mib: u64,
    /// Number of virtual CPUs
    #[serde(default = "default_vcpus")]
    pub vcpus: u32,
    /// Disks, assigned vda, vdb, ... in order
    #[serde(default)]
    pub disks: Vec<DiskSpec>,
    /// Network interfaces
    #[serde(default)]
    pub nics: Vec<NicSpec>,
}

fn default_memory_mib() -> u64 {
    256
}

fn default_vcpus() -> u32 {
    1
}

impl DomainDefinition {
    /// A definition with a fresh UUID, 256 MiB of memory and one vCPU.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: Uuid::new_v4(),
            memory_mib: default_memory_mib(),
            vcpus: default_vcpus(),
            disks: Vec::new(),
            nics: Vec::new(),
        }
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    /// Set the memory size in MiB.
    pub fn with_memory(mut self, memory_mib: u64) -> Self {
        self.memory_mib = memory_mib;
        self
    }

    pub fn with_vcpus(mut self, vcpus: u32) -> Self {
        self.vcpus = vcpus;
        self
    }

    pub fn with_disk(mut self, disk: DiskSpec) -> Self {
        self.disks.push(disk);
        self
    }

    pub fn with_nic(mut self, nic: NicSpec) -> Self {
        self.nics.push(nic);
        self
    }
}

/// Collection-like view of all domains behind one backend connection.
pub struct Hypervisor<B: Backend> {
    backend: B,
    template: Template,
}

impl<B: Backend> Hypervisor<B> {
    /// Wrap a connected backend, using the built-in template.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            template: Template::builtin(),
        }
    }

    /// Use `template` for future [`define`](Self::define) calls.
    pub fn with_template(mut self, template: Template) -> Self {
        self.template = template;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Resolve a domain and build a controller for it.
    #[instrument(skip(self, domain), fields(domain = tracing::field::Empty))]
    pub fn lookup(&self, domain: impl Into<DomainRef>) -> Result<Domain<'_, B>> {
        let domain = domain.into();
        tracing::Span::current().record("domain", tracing::field::display(&domain));

        let handle = match &domain {
            DomainRef::Id(id) => self.backend.lookup_by_id(*id),
            DomainRef::Name(name) => self.backend.lookup_by_name(name),
        }
        .map_err(|e| e.translate(&domain.to_string(), "lookup"))?;

        Domain::new(&self.backend, handle)
    }

    /// Whether a lookup succeeds. Errors other than "no such domain" are
    /// returned, not reported as `false`.
    pub fn contains(&self, domain: impl Into<DomainRef>) -> Result<bool> {
        match self.lookup(domain) {
            Ok(_) => Ok(true),
            Err(Error::NoDomain { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Names of all running domains.
    ///
    /// Domains that stop between listing and name resolution are skipped.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<String>> {
        let ids = self
            .backend
            .list_active_domain_ids()
            .map_err(|e| e.translate("<all>", "list"))?;

        let mut names = Vec::with_capacity(ids.len());
        for id in ids {
            let label = DomainRef::Id(id).to_string();
            let name = self
                .backend
                .lookup_by_id(id)
                .and_then(|handle| self.backend.domain_name(&handle))
                .map_err(|e| e.translate(&label, "list"));

            match name {
                Ok(name) => names.push(name),
                Err(Error::NoDomain { .. }) => {
                    debug!(id, "Domain vanished while listing");
                }
                Err(e) => return Err(e),
            }
        }

        debug!(count = names.len(), "Listed domains");
        Ok(names)
    }

    /// Number of running plus defined-but-stopped domains.
    pub fn len(&self) -> Result<usize> {
        let active = self
            .backend
            .count_active()
            .map_err(|e| e.translate("<all>", "count_active"))?;
        let defined = self
            .backend
            .count_defined()
            .map_err(|e| e.translate("<all>", "count_defined"))?;
        Ok(active + defined)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Look a domain up and delete it (destroy if running, then undefine).
    pub fn remove(&self, domain: impl Into<DomainRef>) -> Result<()> {
        self.lookup(domain)?.delete()
    }

    /// Define a new persistent domain from the template.
    #[instrument(skip(self, definition), fields(domain = %definition.name, uuid = %definition.uuid))]
    pub fn define(&self, definition: &DomainDefinition) -> Result<Domain<'_, B>> {
        info!(
            disks = definition.disks.len(),
            nics = definition.nics.len(),
            "Defining domain"
        );

        let document = self.template.render(definition)?;
        debug!(xml = %document, "Generated domain XML");

        let handle = self
            .backend
            .define_persistent(&document)
            .map_err(|e| e.translate(&definition.name, "define"))?;

        info!("Domain defined");
        Domain::new(&self.backend, handle)
    }

    /// Close the backend connection.
    pub fn close(mut self) -> Result<()> {
        self.backend
            .close()
            .map_err(|e| e.translate("<connection>", "close"))
    }
}
