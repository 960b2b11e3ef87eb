//! Mock hypervisor backend for testing and development.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, info, instrument};

use crate::backend::Backend;
use crate::document;
use crate::error::{BackendError, BackendResult, ErrorCode};
use crate::types::{DomainInfo, DomainState};
use crate::xml;

/// Handle to a mock domain: its UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDomain {
    uuid: String,
}

impl MockDomain {
    pub fn uuid(&self) -> &str {
        &self.uuid
    }
}

/// Mock hypervisor backend.
///
/// Keeps domain documents in memory and applies hot-plug requests to them
/// the way libvirt does for the live configuration. Useful for:
/// - Unit and integration testing
/// - Development without libvirt installed
pub struct MockBackend {
    state: RwLock<MockState>,
}

#[derive(Default)]
struct MockState {
    domains: HashMap<String, MockVm>,
    next_id: u32,
    /// Injected failures, consumed by the next call of the named operation.
    failures: HashMap<&'static str, BackendError>,
    closed: bool,
}

struct MockVm {
    name: String,
    id: Option<u32>,
    state: DomainState,
    /// Persistent definition; `None` for transient domains.
    persistent: Option<String>,
    /// Live configuration while running.
    live: Option<String>,
}

impl MockVm {
    fn document(&self) -> Option<&String> {
        self.live.as_ref().or(self.persistent.as_ref())
    }
}

fn no_domain(uuid: &str) -> BackendError {
    BackendError::new(
        ErrorCode::NoDomain,
        format!("Domain not found: no domain with matching uuid '{}'", uuid),
    )
}

fn invalid(message: &str) -> BackendError {
    BackendError::new(ErrorCode::OperationInvalid, format!("Requested operation is not valid: {}", message))
}

fn internal(message: impl Into<String>) -> BackendError {
    BackendError::new(ErrorCode::Other("InternalError".to_string()), message)
}

impl MockBackend {
    /// Create a new mock backend.
    pub fn new() -> Self {
        info!("Creating mock hypervisor backend");
        Self {
            state: RwLock::new(MockState {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&MockState) -> BackendResult<T>) -> BackendResult<T> {
        let state = self.state.read().map_err(|_| internal("Lock poisoned"))?;
        if state.closed {
            return Err(internal("connection is closed"));
        }
        f(&state)
    }

    fn write<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut MockState) -> BackendResult<T>,
    ) -> BackendResult<T> {
        let mut state = self.state.write().map_err(|_| internal("Lock poisoned"))?;
        if state.closed {
            return Err(internal("connection is closed"));
        }
        if let Some(err) = state.failures.remove(operation) {
            debug!(operation, "Returning injected failure");
            return Err(err);
        }
        f(&mut state)
    }

    fn with_vm<T>(
        &self,
        operation: &'static str,
        domain: &MockDomain,
        f: impl FnOnce(&mut MockVm, &mut u32) -> BackendResult<T>,
    ) -> BackendResult<T> {
        self.write(operation, |state| {
            let vm = state
                .domains
                .get_mut(&domain.uuid)
                .ok_or_else(|| no_domain(&domain.uuid))?;
            f(vm, &mut state.next_id)
        })
    }

    /// Make the next call of `operation` (a [`Backend`] method name such as
    /// `"detach_device_live"`) fail with `error`.
    pub fn fail_next(&self, operation: &'static str, error: BackendError) {
        if let Ok(mut state) = self.state.write() {
            state.failures.insert(operation, error);
        }
    }

    /// Remove a domain behind everyone's back, as another client would.
    pub fn vanish(&self, name: &str) -> bool {
        let Ok(mut state) = self.state.write() else {
            return false;
        };
        let before = state.domains.len();
        state.domains.retain(|_, vm| vm.name != name);
        before != state.domains.len()
    }

    /// Replace the live document of a running domain, as if its
    /// configuration had been changed through another channel.
    pub fn set_live_document(&self, name: &str, document: impl Into<String>) -> bool {
        let Ok(mut state) = self.state.write() else {
            return false;
        };
        match state.domains.values_mut().find(|vm| vm.name == name && vm.live.is_some()) {
            Some(vm) => {
                vm.live = Some(document.into());
                true
            }
            None => false,
        }
    }

    /// Whether [`Backend::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state.read().map(|s| s.closed).unwrap_or(false)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MockBackend {
    type Domain = MockDomain;

    fn lookup_by_id(&self, id: u32) -> BackendResult<MockDomain> {
        self.write("lookup_by_id", |state| {
            state
                .domains
                .iter()
                .find(|(_, vm)| vm.id == Some(id))
                .map(|(uuid, _)| MockDomain { uuid: uuid.clone() })
                .ok_or_else(|| {
                    BackendError::new(
                        ErrorCode::NoDomain,
                        format!("Domain not found: no domain with matching id {}", id),
                    )
                })
        })
    }

    fn lookup_by_name(&self, name: &str) -> BackendResult<MockDomain> {
        self.write("lookup_by_name", |state| {
            state
                .domains
                .iter()
                .find(|(_, vm)| vm.name == name)
                .map(|(uuid, _)| MockDomain { uuid: uuid.clone() })
                .ok_or_else(|| {
                    BackendError::new(
                        ErrorCode::NoDomain,
                        format!("Domain not found: no domain with matching name '{}'", name),
                    )
                })
        })
    }

    fn list_active_domain_ids(&self) -> BackendResult<Vec<u32>> {
        self.write("list_active_domain_ids", |state| {
            let mut ids: Vec<u32> = state.domains.values().filter_map(|vm| vm.id).collect();
            ids.sort_unstable();
            Ok(ids)
        })
    }

    fn count_active(&self) -> BackendResult<usize> {
        self.read(|state| Ok(state.domains.values().filter(|vm| vm.state.is_active()).count()))
    }

    fn count_defined(&self) -> BackendResult<usize> {
        self.read(|state| {
            Ok(state
                .domains
                .values()
                .filter(|vm| vm.persistent.is_some() && !vm.state.is_active())
                .count())
        })
    }

    #[instrument(skip(self, document))]
    fn define_persistent(&self, document: &str) -> BackendResult<MockDomain> {
        let parsed = xml::parse_domain(document)
            .map_err(|e| BackendError::new(ErrorCode::Other("XmlError".to_string()), e.to_string()))?;
        let name = parsed
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| BackendError::new(ErrorCode::Other("XmlError".into()), "missing domain name"))?;
        let uuid = parsed
            .uuid
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        self.write("define_persistent", |state| {
            if let Some((existing, _)) = state
                .domains
                .iter()
                .find(|(other, vm)| vm.name == name && **other != uuid)
            {
                return Err(BackendError::new(
                    ErrorCode::Other("OperationFailed".into()),
                    format!("domain '{}' already exists with uuid {}", name, existing),
                ));
            }

            match state.domains.get_mut(&uuid) {
                Some(vm) => {
                    vm.persistent = Some(document.to_string());
                }
                None => {
                    state.domains.insert(
                        uuid.clone(),
                        MockVm {
                            name: name.clone(),
                            id: None,
                            state: DomainState::ShutOff,
                            persistent: Some(document.to_string()),
                            live: None,
                        },
                    );
                }
            }

            info!(name = %name, uuid = %uuid, "Mock domain defined");
            Ok(MockDomain { uuid })
        })
    }

    fn domain_info(&self, domain: &MockDomain) -> BackendResult<DomainInfo> {
        self.with_vm("domain_info", domain, |vm, _| {
            let document = vm.document().ok_or_else(|| no_domain(&domain.uuid))?;
            let parsed = xml::parse_domain(document).map_err(|e| internal(e.to_string()))?;

            let max_memory_kib = parsed
                .memory
                .map(|m| m.kib())
                .transpose()
                .map_err(|e| internal(e.to_string()))?
                .unwrap_or(0);

            Ok(DomainInfo {
                state: vm.state,
                max_memory_kib,
                memory_kib: if vm.state.is_active() { max_memory_kib } else { 0 },
                vcpus: parsed.vcpu.map(|v| v.value).unwrap_or(1),
                cpu_time_ns: 0,
            })
        })
    }

    fn domain_name(&self, domain: &MockDomain) -> BackendResult<String> {
        self.with_vm("domain_name", domain, |vm, _| Ok(vm.name.clone()))
    }

    fn domain_xml(&self, domain: &MockDomain) -> BackendResult<String> {
        self.with_vm("domain_xml", domain, |vm, _| {
            vm.document().cloned().ok_or_else(|| no_domain(&domain.uuid))
        })
    }

    fn domain_create(&self, domain: &MockDomain) -> BackendResult<()> {
        self.with_vm("domain_create", domain, |vm, next_id| {
            if vm.state.is_active() {
                return Err(invalid("domain is already running"));
            }
            vm.state = DomainState::Running;
            vm.id = Some(*next_id);
            *next_id += 1;
            vm.live = vm.persistent.clone();
            info!(name = %vm.name, id = ?vm.id, "Mock domain started");
            Ok(())
        })
    }

    fn domain_shutdown(&self, domain: &MockDomain) -> BackendResult<()> {
        // The guest cooperates instantly.
        self.stop("domain_shutdown", domain)
    }

    fn domain_destroy(&self, domain: &MockDomain) -> BackendResult<()> {
        self.stop("domain_destroy", domain)
    }

    fn domain_suspend(&self, domain: &MockDomain) -> BackendResult<()> {
        self.with_vm("domain_suspend", domain, |vm, _| {
            if vm.state != DomainState::Running {
                return Err(invalid("domain is not running"));
            }
            vm.state = DomainState::Paused;
            Ok(())
        })
    }

    fn domain_resume(&self, domain: &MockDomain) -> BackendResult<()> {
        self.with_vm("domain_resume", domain, |vm, _| {
            if vm.state != DomainState::Paused {
                return Err(invalid("domain is not paused"));
            }
            vm.state = DomainState::Running;
            Ok(())
        })
    }

    fn domain_undefine(&self, domain: &MockDomain) -> BackendResult<()> {
        self.write("domain_undefine", |state| {
            let vm = state
                .domains
                .get_mut(&domain.uuid)
                .ok_or_else(|| no_domain(&domain.uuid))?;

            if vm.persistent.take().is_none() {
                return Err(invalid("cannot undefine transient domain"));
            }

            if !vm.state.is_active() {
                state.domains.remove(&domain.uuid);
            }
            Ok(())
        })
    }

    fn attach_device_live(&self, domain: &MockDomain, fragment: &str) -> BackendResult<()> {
        self.with_vm("attach_device_live", domain, |vm, _| {
            let live = vm
                .live
                .as_deref()
                .ok_or_else(|| invalid("domain is not running"))?;

            let disk = xml::decode_disk(fragment).map_err(|e| internal(e.to_string()))?;
            let existing = xml::decode_disks(live).map_err(|e| internal(e.to_string()))?;
            if existing.iter().any(|d| d.target == disk.target) {
                return Err(BackendError::new(
                    ErrorCode::Other("OperationFailed".into()),
                    format!("target {} already exists", disk.target),
                ));
            }

            let updated = document::append_devices(live, &[fragment.to_string()])
                .map_err(|e| internal(e.to_string()))?;
            vm.live = Some(updated);
            Ok(())
        })
    }

    fn detach_device_live(&self, domain: &MockDomain, fragment: &str) -> BackendResult<()> {
        self.with_vm("detach_device_live", domain, |vm, _| {
            let live = vm
                .live
                .as_deref()
                .ok_or_else(|| invalid("domain is not running"))?;

            let disk = xml::decode_disk(fragment).map_err(|e| internal(e.to_string()))?;
            let updated = document::remove_disk(live, &disk.target)
                .map_err(|e| internal(e.to_string()))?
                .ok_or_else(|| {
                    BackendError::new(
                        ErrorCode::Other("OperationFailed".into()),
                        format!("disk {} not found", disk.target),
                    )
                })?;
            vm.live = Some(updated);
            Ok(())
        })
    }

    fn close(&mut self) -> BackendResult<()> {
        let state = self.state.get_mut().map_err(|_| internal("Lock poisoned"))?;
        state.closed = true;
        info!("Mock backend closed");
        Ok(())
    }
}

impl MockBackend {
    fn stop(&self, operation: &'static str, domain: &MockDomain) -> BackendResult<()> {
        self.write(operation, |state| {
            let vm = state
                .domains
                .get_mut(&domain.uuid)
                .ok_or_else(|| no_domain(&domain.uuid))?;

            if !vm.state.is_active() {
                return Err(invalid("domain is not running"));
            }

            vm.state = DomainState::ShutOff;
            vm.id = None;
            vm.live = None;

            // Transient domains disappear once stopped.
            if vm.persistent.is_none() {
                state.domains.remove(&domain.uuid);
            }
            Ok(())
        })
    }
}
