//! Hypervisor backend abstraction.

use crate::error::BackendResult;
use crate::types::DomainInfo;

/// The capability surface this crate consumes from a hypervisor connection.
///
/// Implementations report failures as [`BackendError`](crate::BackendError)
/// values carrying their native code; they never interpret them. Every call
/// is a blocking round-trip.
pub trait Backend {
    /// Handle to one domain inside the backend.
    ///
    /// The domain behind it may disappear at any time; calls on a stale
    /// handle fail with [`ErrorCode::NoDomain`](crate::ErrorCode::NoDomain).
    type Domain;

    // =========================================================================
    // Lookup & enumeration
    // =========================================================================

    /// Resolve a running domain by its live numeric id.
    fn lookup_by_id(&self, id: u32) -> BackendResult<Self::Domain>;

    /// Resolve a domain by its persistent name.
    fn lookup_by_name(&self, name: &str) -> BackendResult<Self::Domain>;

    /// Numeric ids of all running domains.
    fn list_active_domain_ids(&self) -> BackendResult<Vec<u32>>;

    /// Number of running domains.
    fn count_active(&self) -> BackendResult<usize>;

    /// Number of defined domains that are not running.
    fn count_defined(&self) -> BackendResult<usize>;

    /// Register a persistent domain definition.
    fn define_persistent(&self, document: &str) -> BackendResult<Self::Domain>;

    // =========================================================================
    // Per-domain queries
    // =========================================================================

    fn domain_info(&self, domain: &Self::Domain) -> BackendResult<DomainInfo>;

    fn domain_name(&self, domain: &Self::Domain) -> BackendResult<String>;

    /// The domain's current configuration document (live if running).
    fn domain_xml(&self, domain: &Self::Domain) -> BackendResult<String>;

    // =========================================================================
    // Lifecycle
    // =========================================================================

    fn domain_create(&self, domain: &Self::Domain) -> BackendResult<()>;

    fn domain_shutdown(&self, domain: &Self::Domain) -> BackendResult<()>;

    fn domain_destroy(&self, domain: &Self::Domain) -> BackendResult<()>;

    fn domain_suspend(&self, domain: &Self::Domain) -> BackendResult<()>;

    fn domain_resume(&self, domain: &Self::Domain) -> BackendResult<()>;

    fn domain_undefine(&self, domain: &Self::Domain) -> BackendResult<()>;

    // =========================================================================
    // Hot-plug (live configuration only)
    // =========================================================================

    fn attach_device_live(&self, domain: &Self::Domain, fragment: &str) -> BackendResult<()>;

    fn detach_device_live(&self, domain: &Self::Domain, fragment: &str) -> BackendResult<()>;

    // =========================================================================
    // Connection
    // =========================================================================

    /// Close the connection. Handles obtained from it become unusable.
    fn close(&mut self) -> BackendResult<()>;
}
