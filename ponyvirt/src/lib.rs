//! # ponyvirt
//!
//! Domain and disk lifecycle control over a hypervisor connection.
//!
//! This crate wraps a hypervisor backend with two handles:
//! - [`Hypervisor`] - collection-like registry: lookup, list, count, define
//! - [`Domain`] - one guest: lifecycle requests, console/VNC queries and
//!   live disk hot-plug with automatic virtio slot assignment
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Hypervisor<B>  ──lookup/define──▶     │
//! │   Domain<'_, B>  (+ DeviceSlotPool)     │
//! └─────────────────────┬───────────────────┘
//!                       │  Backend trait
//!         ┌─────────────┴─────────────┐
//!         ▼                           ▼
//! ┌───────────────────┐     ┌───────────────────┐
//! │  LibvirtBackend   │     │    MockBackend    │
//! │   (via libvirt)   │     │    (in memory)    │
//! └───────────────────┘     └───────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use ponyvirt::{DiskFormat, DiskSpec, DomainDefinition, Hypervisor, MockBackend};
//!
//! let hypervisor = Hypervisor::new(MockBackend::new());
//!
//! let definition = DomainDefinition::new("my-vm")
//!     .with_memory(512)
//!     .with_disk(DiskSpec::file("/var/lib/libvirt/images/my-vm.img", DiskFormat::Qcow2));
//!
//! let mut domain = hypervisor.define(&definition).unwrap();
//! domain.start().unwrap();
//!
//! let data = domain
//!     .attach_disk(&DiskSpec::file("/var/lib/libvirt/images/data.img", DiskFormat::Raw))
//!     .unwrap();
//! assert_eq!(data.target, "vdb");
//! ```

pub mod backend;
pub mod domain;
pub mod error;
pub mod hypervisor;
pub mod libvirt;
pub mod mock;
pub mod slots;
pub mod template;
pub mod types;
pub mod xml;
mod document;

pub use backend::Backend;
pub use domain::Domain;
pub use error::{BackendError, BackendResult, DocumentError, DocumentResult, Error, ErrorCode, Result};
pub use hypervisor::{DomainDefinition, DomainRef, Hypervisor};
pub use mock::{MockBackend, MockDomain};
pub use slots::{DeviceSlotPool, Slot, SLOT_COUNT};
pub use template::Template;
pub use types::*;

// Re-export libvirt backend when available
#[cfg(feature = "libvirt")]
pub use libvirt::LibvirtBackend;
