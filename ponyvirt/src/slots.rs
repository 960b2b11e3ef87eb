//! Virtio disk slot allocation.
//!
//! A domain has 26 virtio disk slots, `vda` through `vdz`. The pool tracks
//! which of them are free, handing out the lexically smallest first so
//! allocation is reproducible for a given domain state.

use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, warn};

/// Number of virtio disk slots per domain.
pub const SLOT_COUNT: u8 = 26;

/// One virtio disk slot, `vda` (index 0) through `vdz` (index 25).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(u8);

impl Slot {
    /// All slots in lexical order.
    pub fn all() -> impl Iterator<Item = Slot> {
        (0..SLOT_COUNT).map(Slot)
    }

    /// Parse a target identifier; `None` for anything outside `vda..vdz`.
    pub fn parse(target: &str) -> Option<Slot> {
        match target.as_bytes() {
            [b'v', b'd', letter @ b'a'..=b'z'] => Some(Slot(letter - b'a')),
            _ => None,
        }
    }

    /// The target identifier, e.g. "vdb".
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vd{}", (b'a' + self.0) as char)
    }
}

/// Ordered set of unused slots for one domain.
///
/// The pool never contains a slot assigned to a live disk it knows about.
/// It is a snapshot: changes made to the domain by anyone else are not seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSlotPool {
    free: BTreeSet<Slot>,
}

impl DeviceSlotPool {
    /// A pool with every slot free.
    pub fn full() -> Self {
        Self {
            free: Slot::all().collect(),
        }
    }

    /// A pool with every slot free except those named in `used`.
    ///
    /// Targets outside `vda..vdz` (e.g. "hdc", "sda") are ignored.
    pub fn from_used<'a>(used: impl IntoIterator<Item = &'a str>) -> Self {
        let mut pool = Self::full();
        for slot in used.into_iter().filter_map(Slot::parse) {
            pool.free.remove(&slot);
        }
        pool
    }

    /// Take the lexically smallest free slot.
    ///
    /// `None` means all 26 slots are in use.
    pub fn allocate(&mut self) -> Option<Slot> {
        let slot = self.free.pop_first()?;
        debug!(slot = %slot, remaining = self.free.len(), "Allocated disk slot");
        Some(slot)
    }

    /// Return a slot to the pool.
    ///
    /// Must be called exactly once per successful detach. Identifiers outside
    /// `vda..vdz` are ignored.
    pub fn release(&mut self, target: &str) {
        let Some(slot) = Slot::parse(target) else {
            debug!(target = %target, "Released target is not a virtio slot, ignoring");
            return;
        };

        if !self.free.insert(slot) {
            warn!(slot = %slot, "Disk slot released twice");
        } else {
            debug!(slot = %slot, remaining = self.free.len(), "Released disk slot");
        }
    }

    /// Free slots in allocation order.
    pub fn available(&self) -> impl Iterator<Item = Slot> + '_ {
        self.free.iter().copied()
    }

    /// Whether `target` is currently free.
    pub fn is_free(&self, target: &str) -> bool {
        Slot::parse(target).is_some_and(|slot| self.free.contains(&slot))
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }
}
