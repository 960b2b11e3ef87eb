//! [`Backend`] implementation over a libvirt connection.

use tracing::{debug, info};
use virt::connect::Connect;
use virt::domain::Domain;
use virt::error::ErrorNumber;
use virt::sys;

use crate::backend::Backend;
use crate::error::{BackendError, BackendResult, ErrorCode};
use crate::types::{DomainInfo, DomainState};

/// Libvirt/QEMU backend.
pub struct LibvirtBackend {
    uri: String,
    connection: Connect,
}

fn backend_error(e: virt::error::Error) -> BackendError {
    let code = match e.code() {
        ErrorNumber::OperationInvalid => ErrorCode::OperationInvalid,
        ErrorNumber::NoDomain => ErrorCode::NoDomain,
        other => ErrorCode::Other(format!("{:?}", other)),
    };
    BackendError::new(code, e.to_string())
}

impl LibvirtBackend {
    /// Open a connection to the specified URI.
    ///
    /// Common URIs:
    /// - `qemu:///system` - System-wide QEMU/KVM
    /// - `qemu:///session` - User session QEMU
    /// - `qemu+ssh://user@host/system` - Remote via SSH
    pub fn connect(uri: &str) -> BackendResult<Self> {
        info!(uri = %uri, "Connecting to libvirt");

        let connection = Connect::open(Some(uri)).map_err(backend_error)?;

        info!("Connected to libvirt");
        Ok(Self {
            uri: uri.to_string(),
            connection,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    fn state_from_libvirt(state: sys::virDomainState) -> DomainState {
        match state {
            sys::VIR_DOMAIN_RUNNING => DomainState::Running,
            sys::VIR_DOMAIN_BLOCKED => DomainState::Blocked,
            sys::VIR_DOMAIN_PAUSED => DomainState::Paused,
            sys::VIR_DOMAIN_SHUTDOWN => DomainState::ShuttingDown,
            sys::VIR_DOMAIN_SHUTOFF => DomainState::ShutOff,
            sys::VIR_DOMAIN_CRASHED => DomainState::Crashed,
            sys::VIR_DOMAIN_PMSUSPENDED => DomainState::Suspended,
            _ => DomainState::NoState,
        }
    }
}

impl Backend for LibvirtBackend {
    type Domain = Domain;

    fn lookup_by_id(&self, id: u32) -> BackendResult<Domain> {
        Domain::lookup_by_id(&self.connection, id).map_err(backend_error)
    }

    fn lookup_by_name(&self, name: &str) -> BackendResult<Domain> {
        Domain::lookup_by_name(&self.connection, name).map_err(backend_error)
    }

    fn list_active_domain_ids(&self) -> BackendResult<Vec<u32>> {
        self.connection.list_domains().map_err(backend_error)
    }

    fn count_active(&self) -> BackendResult<usize> {
        self.connection
            .num_of_domains()
            .map(|n| n as usize)
            .map_err(backend_error)
    }

    fn count_defined(&self) -> BackendResult<usize> {
        self.connection
            .num_of_defined_domains()
            .map(|n| n as usize)
            .map_err(backend_error)
    }

    fn define_persistent(&self, document: &str) -> BackendResult<Domain> {
        debug!(xml = %document, "Defining domain in libvirt");
        Domain::define_xml(&self.connection, document).map_err(backend_error)
    }

    fn domain_info(&self, domain: &Domain) -> BackendResult<DomainInfo> {
        let info = domain.get_info().map_err(backend_error)?;
        Ok(DomainInfo {
            state: Self::state_from_libvirt(info.state),
            max_memory_kib: info.max_mem,
            memory_kib: info.memory,
            vcpus: info.nr_virt_cpu,
            cpu_time_ns: info.cpu_time,
        })
    }

    fn domain_name(&self, domain: &Domain) -> BackendResult<String> {
        domain.get_name().map_err(backend_error)
    }

    fn domain_xml(&self, domain: &Domain) -> BackendResult<String> {
        domain.get_xml_desc(0).map_err(backend_error)
    }

    fn domain_create(&self, domain: &Domain) -> BackendResult<()> {
        domain.create().map(|_| ()).map_err(backend_error)
    }

    fn domain_shutdown(&self, domain: &Domain) -> BackendResult<()> {
        domain.shutdown().map(|_| ()).map_err(backend_error)
    }

    fn domain_destroy(&self, domain: &Domain) -> BackendResult<()> {
        domain.destroy().map(|_| ()).map_err(backend_error)
    }

    fn domain_suspend(&self, domain: &Domain) -> BackendResult<()> {
        domain.suspend().map(|_| ()).map_err(backend_error)
    }

    fn domain_resume(&self, domain: &Domain) -> BackendResult<()> {
        domain.resume().map(|_| ()).map_err(backend_error)
    }

    fn domain_undefine(&self, domain: &Domain) -> BackendResult<()> {
        domain.undefine().map(|_| ()).map_err(backend_error)
    }

    fn attach_device_live(&self, domain: &Domain, fragment: &str) -> BackendResult<()> {
        domain
            .attach_device_flags(fragment, sys::VIR_DOMAIN_AFFECT_LIVE)
            .map(|_| ())
            .map_err(backend_error)
    }

    fn detach_device_live(&self, domain: &Domain, fragment: &str) -> BackendResult<()> {
        domain
            .detach_device_flags(fragment, sys::VIR_DOMAIN_AFFECT_LIVE)
            .map(|_| ())
            .map_err(backend_error)
    }

    fn close(&mut self) -> BackendResult<()> {
        info!(uri = %self.uri, "Closing libvirt connection");
        self.connection.close().map(|_| ()).map_err(backend_error)
    }
}
