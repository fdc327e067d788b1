//! Live device handles and the table translating firmware nodes into them.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, trace, warn};

use crate::io::{RegisterService, SerialMemory, TransportError};

/// Transport spoken by a registered device.
#[derive(Clone)]
pub enum Backend {
    /// CPLD-style register bank.
    Registers(Arc<dyn RegisterService>),
    /// Serial interface exposing a memory window.
    Memory(Arc<dyn SerialMemory>),
    /// Device that is only linked to, never accessed.
    Opaque,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Registers(_) => f.write_str("Registers"),
            Backend::Memory(_) => f.write_str("Memory"),
            Backend::Opaque => f.write_str("Opaque"),
        }
    }
}

struct DeviceInner {
    name: String,
    backend: Backend,
    refs: AtomicUsize,
}

/// Shared handle to a live device.
///
/// Cloning shares ownership of the device; holders that depend on the device
/// additionally take an explicit reference ([`DeviceHandle::ref_count`]) at
/// resolution and give it back at teardown.
#[derive(Clone)]
pub struct DeviceHandle {
    inner: Arc<DeviceInner>,
}

impl DeviceHandle {
    pub fn new(name: impl Into<String>, backend: Backend) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                name: name.into(),
                backend,
                refs: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn backend(&self) -> &Backend {
        &self.inner.backend
    }

    /// Number of outstanding dependency references.
    pub fn ref_count(&self) -> usize {
        self.inner.refs.load(Ordering::Acquire)
    }

    /// `true` when both handles point at the same registered device.
    pub fn same_device(&self, other: &DeviceHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn acquire(&self) -> DeviceHandle {
        let refs = self.inner.refs.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(device = %self.name(), refs, "acquire device");
        self.clone()
    }

    pub(crate) fn release(&self) {
        let previous = self
            .inner
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| {
                refs.checked_sub(1)
            });
        match previous {
            Ok(refs) => trace!(device = %self.name(), refs = refs - 1, "release device"),
            Err(_) => warn!(device = %self.name(), "release without matching acquire"),
        }
    }

    /// Register bank behind this handle.
    pub fn registers(&self) -> Result<&dyn RegisterService, TransportError> {
        match &self.inner.backend {
            Backend::Registers(bank) => Ok(bank.as_ref()),
            _ => Err(TransportError::Unsupported(self.name().to_string())),
        }
    }

    /// Memory window behind this handle.
    pub fn memory(&self) -> Result<&dyn SerialMemory, TransportError> {
        match &self.inner.backend {
            Backend::Memory(memory) => Ok(memory.as_ref()),
            _ => Err(TransportError::Unsupported(self.name().to_string())),
        }
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("name", &self.inner.name)
            .field("backend", &self.inner.backend)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Outcome of translating a firmware node into a live device.
#[derive(Debug, Clone)]
pub enum HandleLookup {
    Live(DeviceHandle),
    /// The node is described but its device has not registered yet.
    NotRegistered,
    /// The node can never back a device (disabled or malformed).
    Invalid,
}

/// Translation from firmware node names to live devices.
pub trait DeviceDirectory: Send + Sync {
    fn resolve_handle(&self, node: &str) -> HandleLookup;
}

/// Registry of live devices keyed by firmware node name.
#[derive(Debug, Default)]
pub struct DeviceTable {
    live: RwLock<HashMap<String, DeviceHandle>>,
    invalid: RwLock<HashSet<String>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the device backing `node`, replacing any previous registration.
    pub fn register(&self, node: impl Into<String>, backend: Backend) -> DeviceHandle {
        let node = node.into();
        let handle = DeviceHandle::new(node.clone(), backend);
        let previous = self
            .live
            .write()
            .expect("device table poisoned")
            .insert(node.clone(), handle.clone());
        if previous.is_some() {
            warn!(device = %node, "replacing registered device");
        } else {
            info!(device = %node, backend = ?handle.backend(), "device registered");
        }
        handle
    }

    /// Drop the registration of `node`. Holders keep their handles alive.
    pub fn unregister(&self, node: &str) -> Option<DeviceHandle> {
        let removed = self
            .live
            .write()
            .expect("device table poisoned")
            .remove(node);
        if let Some(handle) = &removed {
            info!(device = %node, refs = handle.ref_count(), "device unregistered");
        }
        removed
    }

    /// Mark `node` as permanently unable to back a device.
    pub fn mark_invalid(&self, node: impl Into<String>) {
        let node = node.into();
        debug!(device = %node, "node marked invalid");
        self.invalid
            .write()
            .expect("device table poisoned")
            .insert(node);
    }

    pub fn handle(&self, node: &str) -> Option<DeviceHandle> {
        self.live
            .read()
            .expect("device table poisoned")
            .get(node)
            .cloned()
    }

    pub fn is_registered(&self, node: &str) -> bool {
        self.live
            .read()
            .expect("device table poisoned")
            .contains_key(node)
    }
}

impl DeviceDirectory for DeviceTable {
    fn resolve_handle(&self, node: &str) -> HandleLookup {
        if self
            .invalid
            .read()
            .expect("device table poisoned")
            .contains(node)
        {
            return HandleLookup::Invalid;
        }
        match self.handle(node) {
            Some(handle) => HandleLookup::Live(handle),
            None => HandleLookup::NotRegistered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_reflects_registration_state() {
        let table = DeviceTable::new();
        table.mark_invalid("GHOST");
        assert!(matches!(table.resolve_handle("CPLD0"), HandleLookup::NotRegistered));
        assert!(matches!(table.resolve_handle("GHOST"), HandleLookup::Invalid));

        let registered = table.register("CPLD0", Backend::Opaque);
        match table.resolve_handle("CPLD0") {
            HandleLookup::Live(handle) => assert!(handle.same_device(&registered)),
            other => panic!("unexpected lookup: {other:?}"),
        }

        let removed = table.unregister("CPLD0").expect("registered");
        assert!(removed.same_device(&registered));
        assert!(!table.is_registered("CPLD0"));
    }

    #[test]
    fn release_is_paired_with_acquire() {
        let handle = DeviceHandle::new("CPLD0", Backend::Opaque);
        let held = handle.acquire();
        let again = handle.acquire();
        assert_eq!(handle.ref_count(), 2);
        held.release();
        again.release();
        assert_eq!(handle.ref_count(), 0);
        handle.release();
        assert_eq!(handle.ref_count(), 0, "unmatched release must not underflow");
    }

    #[test]
    fn opaque_devices_have_no_transport() {
        let handle = DeviceHandle::new("TWI1", Backend::Opaque);
        assert!(matches!(
            handle.registers(),
            Err(TransportError::Unsupported(_))
        ));
        assert!(matches!(handle.memory(), Err(TransportError::Unsupported(_))));
    }
}
