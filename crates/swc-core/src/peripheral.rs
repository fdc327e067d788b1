//! Peripheral construction, runtime attribute access and teardown.
//!
//! A peripheral is declared by a [`PeripheralTemplate`]: the ordered list of
//! firmware references it depends on and, for each, the attribute or link it
//! publishes once resolved. [`PeripheralInstance::construct`] walks that list
//! once and settles on one of three outcomes:
//!
//! * `Ready`: every required dependency resolved, the attribute set is built;
//! * `Deferred`: some dependency's device has not registered yet, retry later;
//! * `Failed`: the description is permanently unusable for this peripheral.
//!
//! References acquired before a `Deferred` or `Failed` outcome are released
//! before returning, so a retry starts from a clean slate.

use swc_fwdesc::property_to_sysfs;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::attributes::{Access, AttributeDescriptor, AttributeRegistry};
use crate::bitops::{self, BitOpsError, Polarity};
use crate::device::DeviceHandle;
use crate::io::TransportError;
use crate::resolver::{
    DependencyReference, FailureKind, ResolutionError, ResolvedDependency, TopologyResolver,
};

/// Attribute published for a resolved dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSpec {
    /// Published name; defaults to the property name with `-` mapped to `_`.
    pub name: Option<&'static str>,
    pub access: Access,
    pub polarity: Polarity,
}

impl AttributeSpec {
    /// Active-low read-only signal.
    pub const fn status() -> Self {
        Self {
            name: None,
            access: Access::ReadOnly,
            polarity: Polarity::Inverted,
        }
    }

    /// Active-low writable control.
    pub const fn control() -> Self {
        Self {
            name: None,
            access: Access::ReadWrite,
            polarity: Polarity::Inverted,
        }
    }

    pub const fn named(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }
}

/// One firmware reference a peripheral depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencySpec {
    pub property: &'static str,
    pub required: bool,
    pub attribute: Option<AttributeSpec>,
    /// Name of the navigation link published to the resolved device.
    pub link: Option<&'static str>,
}

impl DependencySpec {
    pub const fn required(property: &'static str) -> Self {
        Self {
            property,
            required: true,
            attribute: None,
            link: None,
        }
    }

    pub const fn optional(property: &'static str) -> Self {
        Self {
            property,
            required: false,
            attribute: None,
            link: None,
        }
    }

    pub const fn attribute(mut self, attribute: AttributeSpec) -> Self {
        self.attribute = Some(attribute);
        self
    }

    pub const fn link(mut self, name: &'static str) -> Self {
        self.link = Some(name);
        self
    }

    pub fn reference(&self) -> DependencyReference {
        DependencyReference {
            name: self.property.to_string(),
            required: self.required,
        }
    }

    fn attribute_name(&self) -> Option<String> {
        self.attribute.map(|attr| match attr.name {
            Some(name) => name.to_string(),
            None => property_to_sysfs(self.property),
        })
    }
}

/// Declaration of a peripheral driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeripheralTemplate {
    pub driver: &'static str,
    /// Firmware `Compatible` strings this driver binds to.
    pub compatible: &'static [&'static str],
    /// Device class the peripheral registers in, if any.
    pub class: Option<&'static str>,
    /// Dependencies in resolution order.
    pub dependencies: &'static [DependencySpec],
}

impl PeripheralTemplate {
    pub fn matches(&self, compatible: &str) -> bool {
        self.compatible.iter().any(|c| *c == compatible)
    }
}

/// Named link from a peripheral to one of its resolved dependencies.
#[derive(Debug, Clone)]
pub struct Link {
    pub name: String,
    pub target: DeviceHandle,
}

/// Outcome reported to the discovery collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    Failed(FailureKind),
    Deferred,
}

/// Result of [`PeripheralInstance::construct`].
#[derive(Debug)]
pub enum Construction {
    Ready(PeripheralInstance),
    Failed(ResolutionError),
    Deferred(ResolutionError),
}

impl Construction {
    pub fn outcome(&self) -> ProbeOutcome {
        match self {
            Construction::Ready(_) => ProbeOutcome::Ready,
            Construction::Failed(err) => ProbeOutcome::Failed(err.kind()),
            Construction::Deferred(_) => ProbeOutcome::Deferred,
        }
    }
}

/// Failure of a runtime attribute access.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("attribute not found: {0}")]
    NotFound(String),
    #[error("attribute {0} is read-only")]
    NotWritable(String),
    #[error("{attribute}: {source}")]
    Transport {
        attribute: String,
        source: TransportError,
    },
    #[error("{attribute}: {source}")]
    Codec {
        attribute: String,
        source: BitOpsError,
    },
}

/// A constructed peripheral holding its resolved dependencies.
#[derive(Debug)]
pub struct PeripheralInstance {
    owner: String,
    driver: &'static str,
    class: Option<&'static str>,
    dependencies: Vec<(String, Option<ResolvedDependency>)>,
    attributes: AttributeRegistry,
    links: Vec<Link>,
    torn_down: bool,
}

impl PeripheralInstance {
    /// Resolve every dependency of `template` for `owner`.
    pub fn construct(
        owner: &str,
        template: &PeripheralTemplate,
        resolver: &TopologyResolver<'_>,
    ) -> Construction {
        info!(owner, driver = template.driver, "probe");
        let mut resolved: Vec<(String, Option<ResolvedDependency>)> =
            Vec::with_capacity(template.dependencies.len());

        for spec in template.dependencies {
            match resolver.resolve(owner, &spec.reference()) {
                Ok(dep) => resolved.push((spec.property.to_string(), dep)),
                Err(err) => {
                    for dep in resolved.iter().filter_map(|(_, dep)| dep.as_ref()) {
                        dep.release();
                    }
                    if err.is_retryable() {
                        info!(owner, driver = template.driver, reason = %err, "probe deferred");
                        return Construction::Deferred(err);
                    }
                    warn!(owner, driver = template.driver, error = %err, "probe failed");
                    return Construction::Failed(err);
                }
            }
        }

        let mut attributes = AttributeRegistry::new();
        let mut links = Vec::new();
        for (spec, (_, dep)) in template.dependencies.iter().zip(&resolved) {
            let Some(dep) = dep else {
                debug!(owner, property = spec.property, "dependency absent, skipping");
                continue;
            };
            if let Some(name) = spec.link {
                links.push(Link {
                    name: name.to_string(),
                    target: dep.handle.clone(),
                });
            }
            if let (Some(attr), Some(name)) = (spec.attribute, spec.attribute_name()) {
                // Overflow is logged by the registry; the peripheral still comes up.
                let _ = attributes.push(AttributeDescriptor {
                    name,
                    access: attr.access,
                    backing: dep.clone(),
                    polarity: attr.polarity,
                });
            }
        }

        info!(
            owner,
            driver = template.driver,
            attrs = attributes.len(),
            links = links.len(),
            "peripheral added"
        );
        Construction::Ready(PeripheralInstance {
            owner: owner.to_string(),
            driver: template.driver,
            class: template.class,
            dependencies: resolved,
            attributes,
            links,
            torn_down: false,
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn driver(&self) -> &'static str {
        self.driver
    }

    pub fn class(&self) -> Option<&'static str> {
        self.class
    }

    /// Published attributes in declaration order.
    pub fn list(&self) -> &[AttributeDescriptor] {
        self.attributes.list()
    }

    pub fn attributes(&self) -> &AttributeRegistry {
        &self.attributes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Resolved dependency for `property`; `None` when absent or unknown.
    pub fn dependency(&self, property: &str) -> Option<&ResolvedDependency> {
        self.dependencies
            .iter()
            .find(|(name, _)| name == property)
            .and_then(|(_, dep)| dep.as_ref())
    }

    /// All declared dependencies with their resolution.
    pub fn dependencies(&self) -> impl Iterator<Item = (&str, Option<&ResolvedDependency>)> {
        self.dependencies
            .iter()
            .map(|(name, dep)| (name.as_str(), dep.as_ref()))
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Read the logical value of attribute `name`.
    pub fn get(&self, name: &str) -> Result<bool, AccessError> {
        let attr = self
            .attributes
            .get(name)
            .ok_or_else(|| AccessError::NotFound(name.to_string()))?;
        let offset = attr.backing.offset;
        let result = attr
            .backing
            .handle
            .registers()
            .and_then(|bank| Ok((bank.read(offset)?, bank.read_mask(offset)?)))
            .map_err(|source| AccessError::Transport {
                attribute: name.to_string(),
                source,
            })
            .and_then(|(raw, mask)| {
                bitops::decode(raw, mask, attr.polarity).map_err(|source| AccessError::Codec {
                    attribute: name.to_string(),
                    source,
                })
            });
        if let Err(err) = &result {
            error!(owner = %self.owner, error = %err, "failed to get attribute");
        }
        result
    }

    /// Write the logical value of attribute `name`.
    pub fn set(&self, name: &str, value: bool) -> Result<(), AccessError> {
        let attr = self
            .attributes
            .get(name)
            .ok_or_else(|| AccessError::NotFound(name.to_string()))?;
        if !attr.access.is_writable() {
            return Err(AccessError::NotWritable(name.to_string()));
        }
        let offset = attr.backing.offset;
        let result = self.write_field(attr, offset, value);
        match &result {
            Ok(()) => debug!(owner = %self.owner, attribute = name, value, "attribute set"),
            Err(err) => error!(owner = %self.owner, error = %err, "failed to set attribute"),
        }
        result
    }

    fn write_field(
        &self,
        attr: &AttributeDescriptor,
        offset: u64,
        value: bool,
    ) -> Result<(), AccessError> {
        let transport = |source: TransportError| AccessError::Transport {
            attribute: attr.name.clone(),
            source,
        };
        let bank = attr.backing.handle.registers().map_err(transport)?;
        let mask = bank.read_mask(offset).map_err(transport)?;
        let raw = bitops::encode(value, mask, attr.polarity).map_err(|source| {
            AccessError::Codec {
                attribute: attr.name.clone(),
                source,
            }
        })?;
        bank.write(offset, raw).map_err(transport)
    }

    /// Release every held device reference and unpublish everything.
    /// Repeated calls are no-ops.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        let attrs = self.attributes.clear();
        self.links.clear();
        for dep in self.dependencies.drain(..).filter_map(|(_, dep)| dep) {
            dep.release();
        }
        info!(owner = %self.owner, attrs = attrs.len(), "peripheral removed");
    }
}

impl Drop for PeripheralInstance {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use swc_fwdesc::{FwGraph, FwNode};

    use super::*;
    use crate::device::{Backend, DeviceTable};
    use crate::io::RegisterService;

    #[derive(Default)]
    struct MockBank {
        regs: Mutex<HashMap<u64, (u32, u32)>>,
        fail: AtomicBool,
    }

    impl MockBank {
        fn with_registers(entries: &[(u64, u32, u32)]) -> Arc<Self> {
            let bank = MockBank::default();
            {
                let mut regs = bank.regs.lock().expect("lock");
                for (offset, value, mask) in entries {
                    regs.insert(*offset, (*value, *mask));
                }
            }
            Arc::new(bank)
        }

        fn value(&self, offset: u64) -> u32 {
            self.regs.lock().expect("lock")[&offset].0
        }

        fn entry(&self, offset: u64) -> Result<(u32, u32), TransportError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::Io("bus stuck".into()));
            }
            self.regs
                .lock()
                .expect("lock")
                .get(&offset)
                .copied()
                .ok_or(TransportError::NoRegister { offset })
        }
    }

    impl RegisterService for MockBank {
        fn read(&self, offset: u64) -> Result<u32, TransportError> {
            self.entry(offset).map(|(value, _)| value)
        }

        fn read_mask(&self, offset: u64) -> Result<u32, TransportError> {
            self.entry(offset).map(|(_, mask)| mask)
        }

        fn write(&self, offset: u64, value: u32) -> Result<(), TransportError> {
            let (old, mask) = self.entry(offset)?;
            let merged = (old & !mask) | (value & mask);
            self.regs
                .lock()
                .expect("lock")
                .insert(offset, (merged, mask));
            Ok(())
        }
    }

    const LED: PeripheralTemplate = PeripheralTemplate {
        driver: "test-led",
        compatible: &["test-led"],
        class: None,
        dependencies: &[
            DependencySpec::required("leds").link("system-led"),
            DependencySpec::required("diag-green").attribute(AttributeSpec::control()),
            DependencySpec::optional("present").attribute(AttributeSpec::status()),
            DependencySpec::optional("power-good")
                .attribute(AttributeSpec::status().named("good")),
        ],
    };

    fn graph() -> FwGraph {
        FwGraph::new()
            .with_node(FwNode::new("CPLD0"))
            .and_then(|g| g.with_node(FwNode::new("LEDCTL")))
            .and_then(|g| {
                g.with_node(
                    FwNode::new("LED1")
                        .with_reference("leds", "LEDCTL", &[])
                        .with_reference("diag-green", "CPLD0", &[0x20])
                        .with_reference("power-good", "CPLD0", &[0x21]),
                )
            })
            .expect("build graph")
    }

    fn ready(construction: Construction) -> PeripheralInstance {
        match construction {
            Construction::Ready(instance) => instance,
            other => panic!("expected ready, got {:?}", other.outcome()),
        }
    }

    fn registered_table(bank: Arc<MockBank>) -> (DeviceTable, DeviceHandle, DeviceHandle) {
        let table = DeviceTable::new();
        let cpld = table.register("CPLD0", Backend::Registers(bank));
        let leds = table.register("LEDCTL", Backend::Opaque);
        (table, cpld, leds)
    }

    #[test]
    fn ready_publishes_only_resolved_attributes() {
        let graph = graph();
        let bank = MockBank::with_registers(&[(0x20, 0x00, 0x04), (0x21, 0x02, 0x02)]);
        let (table, cpld, leds) = registered_table(bank);
        let resolver = TopologyResolver::new(&graph, &table);

        let instance = ready(PeripheralInstance::construct("LED1", &LED, &resolver));
        let names: Vec<_> = instance.list().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["diag_green", "good"]);
        assert_eq!(instance.links().len(), 1);
        assert_eq!(instance.links()[0].name, "system-led");
        assert!(instance.links()[0].target.same_device(&leds));
        assert!(instance.dependency("present").is_none());
        assert_eq!(cpld.ref_count(), 2);
        assert_eq!(leds.ref_count(), 1);

        assert!(matches!(
            instance.get("present"),
            Err(AccessError::NotFound(_))
        ));
        assert!(instance.get("diag_green").expect("read diag_green"));
        assert!(!instance.get("good").expect("read good"));
    }

    #[test]
    fn set_encodes_inverted_field() {
        let graph = graph();
        let bank = MockBank::with_registers(&[(0x20, 0xF0, 0x04), (0x21, 0x00, 0x02)]);
        let (table, _cpld, _leds) = registered_table(Arc::clone(&bank));
        let resolver = TopologyResolver::new(&graph, &table);
        let instance = ready(PeripheralInstance::construct("LED1", &LED, &resolver));

        instance.set("diag_green", false).expect("turn off");
        assert_eq!(bank.value(0x20), 0xF4);
        assert!(!instance.get("diag_green").expect("read back"));
        instance.set("diag_green", true).expect("turn on");
        assert_eq!(bank.value(0x20), 0xF0);
        assert!(instance.get("diag_green").expect("read back"));

        assert!(matches!(
            instance.set("good", true),
            Err(AccessError::NotWritable(_))
        ));
    }

    #[test]
    fn transport_and_mask_failures_surface_per_call() {
        let graph = graph();
        let bank = MockBank::with_registers(&[(0x20, 0x00, 0x04), (0x21, 0x00, 0x00)]);
        let (table, _cpld, _leds) = registered_table(Arc::clone(&bank));
        let resolver = TopologyResolver::new(&graph, &table);
        let instance = ready(PeripheralInstance::construct("LED1", &LED, &resolver));

        assert!(matches!(
            instance.get("good"),
            Err(AccessError::Codec {
                source: BitOpsError::InvalidMask { mask: 0 },
                ..
            })
        ));
        bank.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            instance.get("diag_green"),
            Err(AccessError::Transport { .. })
        ));
        assert!(matches!(
            instance.set("diag_green", true),
            Err(AccessError::Transport { .. })
        ));
        bank.fail.store(false, Ordering::SeqCst);
        assert!(instance.get("diag_green").is_ok());
    }

    #[test]
    fn deferred_releases_partial_acquisitions() {
        let graph = graph();
        let table = DeviceTable::new();
        let leds = table.register("LEDCTL", Backend::Opaque);
        let resolver = TopologyResolver::new(&graph, &table);

        let construction = PeripheralInstance::construct("LED1", &LED, &resolver);
        assert_eq!(construction.outcome(), ProbeOutcome::Deferred);
        assert_eq!(leds.ref_count(), 0);

        let cpld = table.register(
            "CPLD0",
            Backend::Registers(MockBank::with_registers(&[(0x20, 0, 0x04)])),
        );
        let instance = ready(PeripheralInstance::construct("LED1", &LED, &resolver));
        assert_eq!(cpld.ref_count(), 2);
        assert_eq!(leds.ref_count(), 1);
        drop(instance);
        assert_eq!(cpld.ref_count(), 0);
        assert_eq!(leds.ref_count(), 0);
    }

    #[test]
    fn failed_releases_partial_acquisitions() {
        let graph = FwGraph::new()
            .with_node(FwNode::new("LEDCTL"))
            .and_then(|g| g.with_node(FwNode::new("LED1").with_reference("leds", "LEDCTL", &[])))
            .expect("build graph");
        let table = DeviceTable::new();
        let leds = table.register("LEDCTL", Backend::Opaque);
        let resolver = TopologyResolver::new(&graph, &table);

        let construction = PeripheralInstance::construct("LED1", &LED, &resolver);
        assert_eq!(
            construction.outcome(),
            ProbeOutcome::Failed(FailureKind::MissingRequired)
        );
        assert_eq!(leds.ref_count(), 0);
    }

    #[test]
    fn teardown_is_idempotent() {
        let graph = graph();
        let (table, cpld, leds) = registered_table(MockBank::with_registers(&[]));
        let resolver = TopologyResolver::new(&graph, &table);
        let mut instance = ready(PeripheralInstance::construct("LED1", &LED, &resolver));

        instance.teardown();
        assert!(instance.is_torn_down());
        assert!(instance.list().is_empty());
        assert!(instance.links().is_empty());
        assert_eq!(cpld.ref_count(), 0);
        assert_eq!(leds.ref_count(), 0);
        instance.teardown();
        drop(instance);
        assert_eq!(cpld.ref_count(), 0);
    }

    #[test]
    fn shared_handle_counts_are_symmetric() {
        let graph = graph()
            .with_node(
                FwNode::new("LED2")
                    .with_reference("leds", "LEDCTL", &[])
                    .with_reference("diag-green", "CPLD0", &[0x22]),
            )
            .expect("add second led");
        let (table, cpld, leds) = registered_table(MockBank::with_registers(&[]));
        let resolver = TopologyResolver::new(&graph, &table);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for owner in ["LED1", "LED2"] {
                        let mut instance =
                            ready(PeripheralInstance::construct(owner, &LED, &resolver));
                        instance.teardown();
                    }
                });
            }
        });
        assert_eq!(cpld.ref_count(), 0);
        assert_eq!(leds.ref_count(), 0);
    }

    #[test]
    fn concurrent_reads_on_ready_instance() {
        let graph = graph();
        let bank = MockBank::with_registers(&[(0x20, 0x00, 0x04), (0x21, 0x00, 0x02)]);
        let (table, _cpld, _leds) = registered_table(bank);
        let resolver = TopologyResolver::new(&graph, &table);
        let instance = ready(PeripheralInstance::construct("LED1", &LED, &resolver));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..16 {
                        assert!(instance.get("diag_green").expect("read"));
                        assert!(instance.get("good").expect("read"));
                    }
                });
            }
        });
    }

    const WIDE: PeripheralTemplate = PeripheralTemplate {
        driver: "test-wide",
        compatible: &["test-wide"],
        class: None,
        dependencies: &[
            DependencySpec::optional("sig-00").attribute(AttributeSpec::status()),
            DependencySpec::optional("sig-01").attribute(AttributeSpec::status()),
            DependencySpec::optional("sig-02").attribute(AttributeSpec::status()),
            DependencySpec::optional("sig-03").attribute(AttributeSpec::status()),
            DependencySpec::optional("sig-04").attribute(AttributeSpec::status()),
            DependencySpec::optional("sig-05").attribute(AttributeSpec::status()),
            DependencySpec::optional("sig-06").attribute(AttributeSpec::status()),
            DependencySpec::optional("sig-07").attribute(AttributeSpec::status()),
            DependencySpec::optional("sig-08").attribute(AttributeSpec::status()),
            DependencySpec::optional("sig-09").attribute(AttributeSpec::status()),
            DependencySpec::optional("sig-10").attribute(AttributeSpec::status()),
            DependencySpec::optional("sig-11").attribute(AttributeSpec::status()),
            DependencySpec::optional("sig-12").attribute(AttributeSpec::status()),
            DependencySpec::optional("sig-13").attribute(AttributeSpec::status()),
            DependencySpec::optional("sig-14").attribute(AttributeSpec::status()),
            DependencySpec::optional("sig-15").attribute(AttributeSpec::status()),
            DependencySpec::optional("sig-16").attribute(AttributeSpec::status()),
            DependencySpec::optional("sig-17").attribute(AttributeSpec::status()),
        ],
    };

    #[test]
    fn attribute_overflow_still_reaches_ready() {
        let node = WIDE
            .dependencies
            .iter()
            .enumerate()
            .fold(FwNode::new("WIDE0"), |node, (idx, dep)| {
                node.with_reference(dep.property, "CPLD0", &[idx as u64])
            });
        let graph = graph().with_node(node).expect("add wide node");
        let (table, cpld, _leds) = registered_table(MockBank::with_registers(&[]));
        let resolver = TopologyResolver::new(&graph, &table);

        let mut instance = ready(PeripheralInstance::construct("WIDE0", &WIDE, &resolver));
        assert_eq!(instance.list().len(), crate::attributes::MAX_ATTRIBUTES);
        assert_eq!(instance.attributes().dropped(), 2);
        assert_eq!(instance.list()[15].name, "sig_15");
        assert!(matches!(
            instance.get("sig_16"),
            Err(AccessError::NotFound(_))
        ));
        assert_eq!(cpld.ref_count(), 18);

        instance.teardown();
        assert_eq!(cpld.ref_count(), 0);
    }
}
