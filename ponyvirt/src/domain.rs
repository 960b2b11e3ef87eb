//! Per-domain controller: lifecycle requests and disk hot-plug.

use tracing::{debug, info, instrument, warn};

use crate::backend::Backend;
use crate::error::{BackendResult, DocumentResult, Error, Result};
use crate::slots::DeviceSlotPool;
use crate::types::*;
use crate::xml;

/// Controller for one domain.
///
/// Borrows the backend connection and holds the backend's handle. State and
/// configuration are re-read from the backend on every call; only the disk
/// slot pool is kept, snapshotted when the controller is built.
///
/// Use one controller per domain from one owner at a time: the slot pool does
/// not see disks attached or detached through other channels.
pub struct Domain<'c, B: Backend> {
    backend: &'c B,
    handle: B::Domain,
    /// Name at construction, used for error context only.
    label: String,
    slots: DeviceSlotPool,
}

impl<'c, B: Backend> Domain<'c, B> {
    /// Build a controller, snapshotting the disk slots in use.
    pub fn new(backend: &'c B, handle: B::Domain) -> Result<Self> {
        let label = backend
            .domain_name(&handle)
            .map_err(|e| e.translate("<unknown>", "name"))?;

        let document = backend
            .domain_xml(&handle)
            .map_err(|e| e.translate(&label, "get_xml"))?;

        let disks = xml::decode_disks(&document).map_err(|e| e.in_domain(&label, "lookup"))?;
        let slots = DeviceSlotPool::from_used(disks.iter().map(|d| d.target.as_str()));

        debug!(domain = %label, free_slots = slots.len(), "Domain controller ready");

        Ok(Self {
            backend,
            handle,
            label,
            slots,
        })
    }

    /// Run a backend call, translating its error.
    fn call<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&B, &B::Domain) -> BackendResult<T>,
    ) -> Result<T> {
        f(self.backend, &self.handle).map_err(|e| e.translate(&self.label, operation))
    }

    fn live_document(&self) -> Result<String> {
        self.call("get_xml", |b, d| b.domain_xml(d))
    }

    /// Attach this domain to a codec error.
    fn decoded<T>(&self, operation: &'static str, result: DocumentResult<T>) -> Result<T> {
        result.map_err(|e| e.in_domain(&self.label, operation))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The domain's name, as the backend reports it now.
    pub fn name(&self) -> Result<String> {
        self.call("name", |b, d| b.domain_name(d))
    }

    /// The backend handle.
    pub fn handle(&self) -> &B::Domain {
        &self.handle
    }

    pub fn info(&self) -> Result<DomainInfo> {
        self.call("info", |b, d| b.domain_info(d))
    }

    /// Current state; a domain that has vanished reports `NoState`.
    pub fn state(&self) -> Result<DomainState> {
        match self.info() {
            Ok(info) => Ok(info.state),
            Err(Error::NoDomain { .. }) => Ok(DomainState::NoState),
            Err(e) => Err(e),
        }
    }

    /// Whether the domain is running, paused, blocked or shutting down.
    pub fn is_active(&self) -> Result<bool> {
        Ok(self.state()?.is_active())
    }

    /// Disks in the live configuration, re-read on every call.
    pub fn get_disks(&self) -> Result<Vec<AttachedDisk>> {
        self.decoded("get_disks", xml::decode_disks(&self.live_document()?))
    }

    /// The tty of the domain's pty console.
    pub fn get_console_device(&self) -> Result<String> {
        let tty = self.decoded("get_console_device", xml::console_tty(&self.live_document()?))?;
        tty.ok_or_else(|| Error::DeviceNotFound {
            domain: self.label.clone(),
            device: "pty console",
        })
    }

    /// The port of the domain's VNC server.
    pub fn get_vnc_port(&self) -> Result<u16> {
        let port = self.decoded("get_vnc_port", xml::vnc_port(&self.live_document()?))?;
        port.ok_or_else(|| Error::DeviceNotFound {
            domain: self.label.clone(),
            device: "VNC graphics port",
        })
    }

    /// Free disk slots as of the last snapshot, adjusted for this
    /// controller's own attaches and detaches.
    pub fn slots(&self) -> &DeviceSlotPool {
        &self.slots
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    #[instrument(skip(self), fields(domain = %self.label))]
    pub fn start(&self) -> Result<()> {
        info!("Starting domain");
        self.call("start", |b, d| b.domain_create(d))?;
        info!("Domain started");
        Ok(())
    }

    /// Request a graceful shutdown. The domain stops some time later.
    #[instrument(skip(self), fields(domain = %self.label))]
    pub fn shutdown(&self) -> Result<()> {
        info!("Requesting domain shutdown");
        self.call("shutdown", |b, d| b.domain_shutdown(d))
    }

    /// Stop the domain immediately (hard power-off).
    #[instrument(skip(self), fields(domain = %self.label))]
    pub fn destroy(&self) -> Result<()> {
        info!("Destroying domain");
        self.call("destroy", |b, d| b.domain_destroy(d))?;
        info!("Domain destroyed");
        Ok(())
    }

    #[instrument(skip(self), fields(domain = %self.label))]
    pub fn suspend(&self) -> Result<()> {
        info!("Suspending domain");
        self.call("suspend", |b, d| b.domain_suspend(d))
    }

    #[instrument(skip(self), fields(domain = %self.label))]
    pub fn resume(&self) -> Result<()> {
        info!("Resuming domain");
        self.call("resume", |b, d| b.domain_resume(d))
    }

    /// Stop the domain if it is running, then undefine it.
    ///
    /// A domain that is already stopped is not an error here. Any other
    /// failure, including the domain vanishing, is returned.
    #[instrument(skip(self), fields(domain = %self.label))]
    pub fn delete(self) -> Result<()> {
        info!("Deleting domain");

        match self.destroy() {
            Ok(()) => {}
            Err(Error::InvalidOperation { .. }) => {
                debug!("Domain was not running");
            }
            Err(e) => return Err(e),
        }

        self.call("undefine", |b, d| b.domain_undefine(d))?;
        info!("Domain deleted");
        Ok(())
    }

    // =========================================================================
    // Disk hot-plug
    // =========================================================================

    /// Attach a disk to the running domain's live configuration.
    ///
    /// The disk gets the lowest free virtio slot. The attachment is not
    /// persisted in the domain definition.
    #[instrument(skip(self, spec), fields(domain = %self.label))]
    pub fn attach_disk(&mut self, spec: &DiskSpec) -> Result<AttachedDisk> {
        let slot = self.slots.allocate().ok_or_else(|| Error::SlotsExhausted {
            domain: self.label.clone(),
        })?;
        let target = slot.name();

        // The returned disk is read back from the fragment actually sent.
        let encoded = xml::encode_disk(spec, &target)
            .and_then(|fragment| Ok((xml::decode_disk(&fragment)?, fragment)));

        let attached = self.decoded("attach_disk", encoded).and_then(|(disk, fragment)| {
            self.call("attach_disk", |b, d| b.attach_device_live(d, &fragment))?;
            Ok(disk)
        });

        match attached {
            Ok(disk) => {
                info!(target = %target, "Disk attached");
                Ok(disk)
            }
            Err(e) => {
                warn!(target = %target, error = %e, "Disk attach failed, returning slot");
                self.slots.release(&target);
                Err(e)
            }
        }
    }

    /// Detach a disk from the live configuration and free its slot.
    ///
    /// The slot stays allocated if the backend refuses: the disk may still
    /// be attached.
    #[instrument(skip(self, disk), fields(domain = %self.label, target = %disk.target))]
    pub fn detach_disk(&mut self, disk: &AttachedDisk) -> Result<()> {
        let fragment = self.decoded("detach_disk", xml::encode_attached_disk(disk))?;
        self.call("detach_disk", |b, d| b.detach_device_live(d, &fragment))?;

        self.slots.release(&disk.target);
        info!("Disk detached");
        Ok(())
    }
}
