//! Peripheral lifecycle on top of a firmware description.

use std::collections::{BTreeMap, BTreeSet};

use swc_bus::backend_for;
use swc_core::drivers::{template_for, SERIAL_INTERFACE};
use swc_core::{
    Backend, Construction, DeviceHandle, DeviceTable, FailureKind, Link, PeripheralInstance,
    PeripheralTemplate, ProbeOutcome, TopologyResolver,
};
use swc_fwdesc::{FwError, FwGraph, FwNode};
use tracing::{debug, info, warn};

use crate::class::{ClassDevice, ClassRegistry};
use crate::PlatformError;

#[derive(Debug)]
struct Bound {
    instance: PeripheralInstance,
    class_device: Option<ClassDevice>,
}

/// Firmware description, live devices and the peripherals built from them.
///
/// Peripherals are keyed by their firmware node (the owner). A probe that
/// finds a dependency not registered yet leaves the owner deferred; every
/// later [`Platform::register_device`] probes deferred owners again.
#[derive(Debug)]
pub struct Platform {
    firmware: FwGraph,
    devices: DeviceTable,
    classes: ClassRegistry,
    bound: BTreeMap<String, Bound>,
    deferred: BTreeSet<String>,
    failed: BTreeMap<String, FailureKind>,
}

impl Platform {
    /// Wrap `firmware`. Disabled nodes are marked invalid right away.
    pub fn new(firmware: FwGraph) -> Self {
        let devices = DeviceTable::new();
        for node in firmware.nodes().iter().filter(|node| !node.enabled) {
            devices.mark_invalid(node.name.clone());
        }
        Self {
            firmware,
            devices,
            classes: ClassRegistry::new(),
            bound: BTreeMap::new(),
            deferred: BTreeSet::new(),
            failed: BTreeMap::new(),
        }
    }

    pub fn from_xml(xml: &str) -> Result<Self, PlatformError> {
        let firmware = swc_fwdesc::parse(xml)?;
        info!(
            version = firmware.version().unwrap_or("unknown"),
            nodes = firmware.nodes().len(),
            "firmware description loaded"
        );
        Ok(Self::new(firmware))
    }

    pub fn firmware(&self) -> &FwGraph {
        &self.firmware
    }

    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    /// Enabled nodes claimed by a peripheral driver, in document order.
    pub fn peripheral_nodes(&self) -> impl Iterator<Item = &FwNode> {
        self.firmware
            .nodes()
            .iter()
            .filter(|node| node.enabled && driver_of(node).is_some())
    }

    /// Register `backend` for `node` and probe deferred owners again.
    pub fn register_device(&mut self, node: &str, backend: Backend) -> Vec<(String, ProbeOutcome)> {
        self.devices.register(node, backend);
        self.retry_deferred()
    }

    /// Drop the registration of `node`. Bound peripherals keep their handles.
    pub fn unregister_device(&mut self, node: &str) -> Option<DeviceHandle> {
        self.devices.unregister(node)
    }

    /// Build the backend of `node` from its description and register it.
    pub fn bind_backend(
        &mut self,
        node: &str,
    ) -> Result<Vec<(String, ProbeOutcome)>, PlatformError> {
        let desc = self
            .firmware
            .node(node)
            .ok_or_else(|| FwError::UnknownNode(node.to_string()))?;
        let backend = backend_for(desc)?;
        Ok(self.register_device(node, backend))
    }

    /// Bind every enabled non-peripheral node except those in `skip`.
    /// Returns the names of the nodes bound.
    pub fn bind_backends(&mut self, skip: &[&str]) -> Result<Vec<String>, PlatformError> {
        let pending: Vec<String> = self
            .firmware
            .nodes()
            .iter()
            .filter(|node| node.enabled && driver_of(node).is_none())
            .filter(|node| !skip.contains(&node.name.as_str()))
            .filter(|node| !self.devices.is_registered(&node.name))
            .map(|node| node.name.clone())
            .collect();
        for node in &pending {
            self.bind_backend(node)?;
        }
        Ok(pending)
    }

    /// Probe the peripheral described by `owner`.
    ///
    /// A bound owner reports `Ready` again without probing.
    pub fn on_discovered(&mut self, owner: &str) -> Result<ProbeOutcome, PlatformError> {
        if self.bound.contains_key(owner) {
            debug!(owner, "peripheral already bound");
            return Ok(ProbeOutcome::Ready);
        }
        let node = self
            .firmware
            .node(owner)
            .ok_or_else(|| FwError::UnknownNode(owner.to_string()))?;
        if !node.enabled {
            debug!(owner, "node disabled, not probing");
            return Err(PlatformError::Disabled(owner.to_string()));
        }
        let template =
            driver_of(node).ok_or_else(|| PlatformError::NoDriver(owner.to_string()))?;

        let resolver = TopologyResolver::new(&self.firmware, &self.devices);
        let construction = PeripheralInstance::construct(owner, template, &resolver);
        let outcome = construction.outcome();
        self.deferred.remove(owner);
        self.failed.remove(owner);
        match construction {
            Construction::Ready(instance) => self.bind(instance),
            Construction::Deferred(_) => {
                self.deferred.insert(owner.to_string());
            }
            Construction::Failed(err) => {
                self.failed.insert(owner.to_string(), err.kind());
            }
        }
        Ok(outcome)
    }

    fn bind(&mut self, instance: PeripheralInstance) {
        let owner = instance.owner().to_string();
        if let Some(slot) = self.firmware.node(&owner).and_then(|node| node.address) {
            debug!(owner = %owner, slot, "slot identity");
        }
        // A class device without attributes would be empty; skip it.
        let class_device = instance
            .class()
            .filter(|_| !instance.list().is_empty())
            .map(|class| self.classes.register(class, &owner));
        self.bound.insert(
            owner,
            Bound {
                instance,
                class_device,
            },
        );
    }

    /// Tear the peripheral of `owner` down. Returns `false` if none was bound.
    pub fn on_removed(&mut self, owner: &str) -> bool {
        self.deferred.remove(owner);
        self.failed.remove(owner);
        let Some(mut bound) = self.bound.remove(owner) else {
            return false;
        };
        if let Some(device) = bound.class_device.take() {
            self.classes.release(&device);
        }
        bound.instance.teardown();
        true
    }

    /// Probe every peripheral node that is not bound yet.
    pub fn discover_all(&mut self) -> Vec<(String, ProbeOutcome)> {
        let owners: Vec<String> = self
            .peripheral_nodes()
            .map(|node| node.name.clone())
            .filter(|owner| !self.bound.contains_key(owner))
            .collect();
        self.probe_each(owners)
    }

    /// Probe every deferred owner once more.
    pub fn retry_deferred(&mut self) -> Vec<(String, ProbeOutcome)> {
        let owners: Vec<String> = self.deferred.iter().cloned().collect();
        if !owners.is_empty() {
            debug!(deferred = owners.len(), "re-probing deferred peripherals");
        }
        self.probe_each(owners)
    }

    fn probe_each(&mut self, owners: Vec<String>) -> Vec<(String, ProbeOutcome)> {
        owners
            .into_iter()
            .filter_map(|owner| match self.on_discovered(&owner) {
                Ok(outcome) => Some((owner, outcome)),
                Err(err) => {
                    warn!(owner = %owner, error = %err, "probe skipped");
                    None
                }
            })
            .collect()
    }

    /// Lifecycle state of `owner`; `None` when never probed or removed.
    pub fn outcome(&self, owner: &str) -> Option<ProbeOutcome> {
        if self.bound.contains_key(owner) {
            Some(ProbeOutcome::Ready)
        } else if self.deferred.contains(owner) {
            Some(ProbeOutcome::Deferred)
        } else {
            self.failed.get(owner).map(|kind| ProbeOutcome::Failed(*kind))
        }
    }

    /// Owners currently deferred.
    pub fn deferred(&self) -> impl Iterator<Item = &str> {
        self.deferred.iter().map(String::as_str)
    }

    /// Bound peripherals in owner order.
    pub fn instances(&self) -> impl Iterator<Item = &PeripheralInstance> {
        self.bound.values().map(|bound| &bound.instance)
    }

    /// Peripheral addressed by owner node or class device name.
    pub fn instance(&self, target: &str) -> Result<&PeripheralInstance, PlatformError> {
        let owner = self.classes.owner_of(target).unwrap_or(target);
        self.bound
            .get(owner)
            .map(|bound| &bound.instance)
            .ok_or_else(|| PlatformError::NoSuchPeripheral(target.to_string()))
    }

    /// Class device created for `owner`.
    pub fn find_class_device(&self, owner: &str) -> Option<&ClassDevice> {
        self.bound
            .get(owner)
            .and_then(|bound| bound.class_device.as_ref())
    }

    /// Slot number of `owner` from its firmware address.
    pub fn slot(&self, owner: &str) -> Result<u64, PlatformError> {
        Ok(self.firmware.address_of(owner)?)
    }

    pub fn get(&self, target: &str, attribute: &str) -> Result<bool, PlatformError> {
        Ok(self.instance(target)?.get(attribute)?)
    }

    pub fn set(&self, target: &str, attribute: &str, value: bool) -> Result<(), PlatformError> {
        Ok(self.instance(target)?.set(attribute, value)?)
    }

    pub fn links(&self, target: &str) -> Result<&[Link], PlatformError> {
        Ok(self.instance(target)?.links())
    }

    /// Read the module memory behind the serial interface of `target`.
    pub fn read_serial_memory(
        &self,
        target: &str,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, PlatformError> {
        let link = self
            .links(target)?
            .iter()
            .find(|link| link.name == SERIAL_INTERFACE)
            .ok_or_else(|| PlatformError::NoSerialInterface(target.to_string()))?;
        Ok(link.target.memory()?.read_at(offset, len)?)
    }
}

fn driver_of(node: &FwNode) -> Option<&'static PeripheralTemplate> {
    node.compatible.as_deref().and_then(template_for)
}
