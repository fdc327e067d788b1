//! Load and query the firmware description graph of a switch complex.
//!
//! The description is the declarative hardware topology the platform firmware
//! publishes: every device node, its named references to other nodes (with
//! optional integer arguments), and the register layout of register-bank
//! controllers. Documents are XML and parsed with quick-xml:
//!
//! ```xml
//! <FirmwareDescription Version="1">
//!     <Device Name="CPLD0" Compatible="swc-cpld">
//!         <Register Offset="0x10" Mask="0x04" Value="0x00" Access="RO" />
//!     </Device>
//!     <Device Name="PORT1" Compatible="sff-qsfpp-fw" Address="1">
//!         <Reference Property="present" Target="CPLD0" Args="0x10" />
//!     </Device>
//! </FirmwareDescription>
//! ```

pub mod names;

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;
use tracing::{debug, error};

pub use names::{property_to_sysfs, sysfs_to_property};

#[derive(Debug, Error)]
pub enum FwError {
    #[error("xml: {0}")]
    Xml(String),
    #[error("invalid description: {0}")]
    Invalid(String),
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("node {0} has no address")]
    MissingAddress(String),
}

/// A named link from one node to another, e.g. `present -> CPLD0 [0x10]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FwReference {
    pub property: String,
    pub target: String,
    pub args: Vec<u64>,
}

/// Register declaration carried by register-bank nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDecl {
    pub offset: u64,
    pub mask: u8,
    /// Power-on value of the register.
    pub value: u8,
    pub writable: bool,
}

/// One device node of the description graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FwNode {
    pub name: String,
    pub compatible: Option<String>,
    /// `_ADR` style address, used as the physical slot index.
    pub address: Option<u64>,
    /// `false` when the firmware marks the node disabled.
    pub enabled: bool,
    pub references: Vec<FwReference>,
    pub registers: Vec<RegisterDecl>,
    /// Size in bytes of the memory exposed by serial interface nodes.
    pub size: Option<usize>,
    /// Module identifier byte served by serial interface nodes.
    pub identifier: Option<u8>,
}

impl FwNode {
    pub fn new(name: impl Into<String>) -> Self {
        FwNode {
            name: name.into(),
            compatible: None,
            address: None,
            enabled: true,
            references: Vec::new(),
            registers: Vec::new(),
            size: None,
            identifier: None,
        }
    }

    pub fn with_compatible(mut self, compatible: impl Into<String>) -> Self {
        self.compatible = Some(compatible.into());
        self
    }

    pub fn with_address(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_reference(
        mut self,
        property: impl Into<String>,
        target: impl Into<String>,
        args: &[u64],
    ) -> Self {
        self.references.push(FwReference {
            property: property.into(),
            target: target.into(),
            args: args.to_vec(),
        });
        self
    }

    pub fn with_register(mut self, register: RegisterDecl) -> Self {
        self.registers.push(register);
        self
    }

    pub fn with_memory(mut self, size: usize, identifier: u8) -> Self {
        self.size = Some(size);
        self.identifier = Some(identifier);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Find the reference published under `property`.
    pub fn reference(&self, property: &str) -> Option<&FwReference> {
        self.references.iter().find(|r| r.property == property)
    }
}

/// Result of a successful reference lookup: the target node plus the
/// reference's integer arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceArgs {
    pub node: String,
    pub args: Vec<u64>,
}

/// Lookup service over a firmware description.
pub trait FirmwareStore: Send + Sync {
    /// Resolve `property` on `owner` to a target node. `None` when the owner,
    /// the property or the target node is not described.
    fn lookup_reference(&self, owner: &str, property: &str) -> Option<ReferenceArgs>;
}

/// In-memory firmware description graph.
#[derive(Debug, Clone, Default)]
pub struct FwGraph {
    version: Option<String>,
    nodes: Vec<FwNode>,
    index: HashMap<String, usize>,
}

impl FwGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version string declared on the document root.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Add a node, rejecting duplicate names.
    pub fn add_node(&mut self, node: FwNode) -> Result<(), FwError> {
        if self.index.contains_key(&node.name) {
            return Err(FwError::Invalid(format!("duplicate node {}", node.name)));
        }
        self.index.insert(node.name.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Builder-style variant of [`FwGraph::add_node`].
    pub fn with_node(mut self, node: FwNode) -> Result<Self, FwError> {
        self.add_node(node)?;
        Ok(self)
    }

    pub fn node(&self, name: &str) -> Option<&FwNode> {
        self.index.get(name).map(|&idx| &self.nodes[idx])
    }

    /// Nodes in document order.
    pub fn nodes(&self) -> &[FwNode] {
        &self.nodes
    }

    /// Return the `_ADR` style address of `name`.
    pub fn address_of(&self, name: &str) -> Result<u64, FwError> {
        let node = self
            .node(name)
            .ok_or_else(|| FwError::UnknownNode(name.to_string()))?;
        node.address.ok_or_else(|| {
            error!(node = %name, "failed to get firmware address");
            FwError::MissingAddress(name.to_string())
        })
    }
}

impl FirmwareStore for FwGraph {
    fn lookup_reference(&self, owner: &str, property: &str) -> Option<ReferenceArgs> {
        let reference = self.node(owner)?.reference(property)?;
        if self.node(&reference.target).is_none() {
            debug!(
                owner,
                property,
                target = %reference.target,
                "reference targets an undescribed node"
            );
            return None;
        }
        Some(ReferenceArgs {
            node: reference.target.clone(),
            args: reference.args.clone(),
        })
    }
}

/// Parse a firmware description document.
pub fn parse(xml: &str) -> Result<FwGraph, FwError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut graph = FwGraph::new();
    let mut current: Option<FwNode> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if let Some(node) = handle_element(&e, &mut graph, &mut current)? {
                    current = Some(node);
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(node) = handle_element(&e, &mut graph, &mut current)? {
                    graph.add_node(node)?;
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"Device" {
                    if let Some(node) = current.take() {
                        graph.add_node(node)?;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(FwError::Xml(err.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if let Some(node) = current {
        return Err(FwError::Invalid(format!("unterminated device {}", node.name)));
    }
    debug!(nodes = graph.nodes.len(), "parsed firmware description");
    Ok(graph)
}

/// Apply one element to the parser state. Returns a fresh node when the
/// element opens a `Device`.
fn handle_element(
    event: &BytesStart<'_>,
    graph: &mut FwGraph,
    current: &mut Option<FwNode>,
) -> Result<Option<FwNode>, FwError> {
    match event.name().as_ref() {
        b"FirmwareDescription" => {
            graph.version = attribute_value(event, b"Version")?;
            Ok(None)
        }
        b"Device" => {
            if let Some(open) = current {
                return Err(FwError::Invalid(format!(
                    "device nested inside {}",
                    open.name
                )));
            }
            parse_device(event).map(Some)
        }
        b"Reference" => {
            let node = current
                .as_mut()
                .ok_or_else(|| FwError::Invalid("reference outside a device".into()))?;
            let property = required_attribute(event, b"Property")?;
            let target = required_attribute(event, b"Target")?;
            let args = match attribute_value(event, b"Args")? {
                Some(list) => parse_list(&list)?,
                None => Vec::new(),
            };
            node.references.push(FwReference {
                property,
                target,
                args,
            });
            Ok(None)
        }
        b"Register" => {
            let node = current
                .as_mut()
                .ok_or_else(|| FwError::Invalid("register outside a device".into()))?;
            node.registers.push(parse_register(event)?);
            Ok(None)
        }
        other => {
            debug!(
                element = %String::from_utf8_lossy(other),
                "ignoring unknown element"
            );
            Ok(None)
        }
    }
}

fn parse_device(event: &BytesStart<'_>) -> Result<FwNode, FwError> {
    let mut node = FwNode::new(required_attribute(event, b"Name")?);
    node.compatible = attribute_value(event, b"Compatible")?;
    if let Some(address) = attribute_value(event, b"Address")? {
        node.address = Some(parse_int(&address)?);
    }
    if let Some(status) = attribute_value(event, b"Status")? {
        node.enabled = match status.as_str() {
            "okay" | "ok" => true,
            "disabled" => false,
            other => {
                return Err(FwError::Invalid(format!(
                    "unknown status '{other}' on {}",
                    node.name
                )))
            }
        };
    }
    if let Some(size) = attribute_value(event, b"Size")? {
        let size = parse_int(&size)?;
        node.size = Some(
            size.try_into()
                .map_err(|_| FwError::Invalid("size does not fit usize".into()))?,
        );
    }
    if let Some(identifier) = attribute_value(event, b"Identifier")? {
        node.identifier = Some(parse_byte(&identifier)?);
    }
    Ok(node)
}

fn parse_register(event: &BytesStart<'_>) -> Result<RegisterDecl, FwError> {
    let offset = parse_int(&required_attribute(event, b"Offset")?)?;
    let mask = parse_byte(&required_attribute(event, b"Mask")?)?;
    let value = match attribute_value(event, b"Value")? {
        Some(value) => parse_byte(&value)?,
        None => 0,
    };
    let writable = match attribute_value(event, b"Access")?.as_deref() {
        None | Some("RO") => false,
        Some("RW") => true,
        Some(other) => {
            return Err(FwError::Invalid(format!(
                "unknown register access '{other}'"
            )))
        }
    };
    Ok(RegisterDecl {
        offset,
        mask,
        value,
        writable,
    })
}

fn required_attribute(event: &BytesStart<'_>, name: &[u8]) -> Result<String, FwError> {
    attribute_value(event, name)?.ok_or_else(|| {
        FwError::Invalid(format!(
            "<{}> is missing attribute {}",
            String::from_utf8_lossy(event.name().as_ref()),
            String::from_utf8_lossy(name)
        ))
    })
}

fn attribute_value(event: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, FwError> {
    for attr in event.attributes() {
        let attr = attr.map_err(|err| FwError::Xml(err.to_string()))?;
        if attr.key.as_ref() == name {
            let value = attr
                .unescape_value()
                .map_err(|err| FwError::Xml(err.to_string()))?;
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                return Ok(None);
            }
            return Ok(Some(trimmed));
        }
    }
    Ok(None)
}

fn parse_list(value: &str) -> Result<Vec<u64>, FwError> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(parse_int)
        .collect()
}

fn parse_byte(value: &str) -> Result<u8, FwError> {
    let wide = parse_int(value)?;
    u8::try_from(wide).map_err(|_| FwError::Invalid(format!("value {value} exceeds 8 bits")))
}

fn parse_int(value: &str) -> Result<u64, FwError> {
    let trimmed = value.trim();
    if let Some(hex) = trimmed.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
            .map_err(|err| FwError::Invalid(format!("invalid hex value: {err}")))
    } else if let Some(bin) = trimmed.strip_prefix("0b") {
        u64::from_str_radix(bin, 2)
            .map_err(|err| FwError::Invalid(format!("invalid binary value: {err}")))
    } else {
        trimmed
            .parse()
            .map_err(|err| FwError::Invalid(format!("invalid integer: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
        <FirmwareDescription Version="1.2">
            <Device Name="CPLD0" Compatible="swc-cpld">
                <Register Offset="0x10" Mask="0x04" Value="0x04" />
                <Register Offset="0x20" Mask="0b00000010" Access="RW" />
            </Device>
            <Device Name="TWI1" Compatible="sff-twi" Size="256" Identifier="0x0D" />
            <Device Name="GHOST" Status="disabled" />
            <Device Name="PORT1" Compatible="sff-qsfpp-fw" Address="1">
                <Reference Property="serial-interface" Target="TWI1" />
                <Reference Property="present" Target="CPLD0" Args="0x10" />
                <Reference Property="tx-fault" Target="CPLD0" Args="0x10, 3" />
                <Reference Property="rx-los" Target="NOWHERE" />
            </Device>
        </FirmwareDescription>
    "#;

    #[test]
    fn parse_devices_and_references() {
        let graph = parse(FIXTURE).expect("parse description");
        assert_eq!(graph.version(), Some("1.2"));
        assert_eq!(graph.nodes().len(), 4);

        let cpld = graph.node("CPLD0").expect("cpld node");
        assert_eq!(cpld.compatible.as_deref(), Some("swc-cpld"));
        assert_eq!(cpld.registers.len(), 2);
        assert_eq!(cpld.registers[0].value, 0x04);
        assert!(!cpld.registers[0].writable);
        assert_eq!(cpld.registers[1].mask, 0x02);
        assert!(cpld.registers[1].writable);

        let twi = graph.node("TWI1").expect("twi node");
        assert_eq!(twi.size, Some(256));
        assert_eq!(twi.identifier, Some(0x0D));
        assert!(!graph.node("GHOST").expect("ghost").enabled);

        let port = graph.node("PORT1").expect("port node");
        assert_eq!(port.address, Some(1));
        assert_eq!(port.references.len(), 4);
        assert_eq!(port.reference("tx-fault").expect("tx-fault").args, vec![0x10, 3]);
    }

    #[test]
    fn lookup_reference_requires_described_target() {
        let graph = parse(FIXTURE).expect("parse description");
        let present = graph
            .lookup_reference("PORT1", "present")
            .expect("present reference");
        assert_eq!(present.node, "CPLD0");
        assert_eq!(present.args, vec![0x10]);

        assert!(graph.lookup_reference("PORT1", "rx-los").is_none());
        assert!(graph.lookup_reference("PORT1", "reset").is_none());
        assert!(graph.lookup_reference("PORT9", "present").is_none());
    }

    #[test]
    fn address_lookup() {
        let graph = parse(FIXTURE).expect("parse description");
        assert_eq!(graph.address_of("PORT1").expect("address"), 1);
        assert!(matches!(
            graph.address_of("CPLD0"),
            Err(FwError::MissingAddress(_))
        ));
        assert!(matches!(
            graph.address_of("PORT9"),
            Err(FwError::UnknownNode(_))
        ));
    }

    #[test]
    fn rejects_malformed_documents() {
        let duplicate = r#"<FirmwareDescription><Device Name="A"/><Device Name="A"/></FirmwareDescription>"#;
        assert!(matches!(parse(duplicate), Err(FwError::Invalid(_))));

        let orphan = r#"<FirmwareDescription><Reference Property="p" Target="A"/></FirmwareDescription>"#;
        assert!(matches!(parse(orphan), Err(FwError::Invalid(_))));

        let wide = r#"<FirmwareDescription><Device Name="A"><Register Offset="0" Mask="0x100"/></Device></FirmwareDescription>"#;
        assert!(matches!(parse(wide), Err(FwError::Invalid(_))));

        let status = r#"<FirmwareDescription><Device Name="A" Status="broken"/></FirmwareDescription>"#;
        assert!(matches!(parse(status), Err(FwError::Invalid(_))));
    }

    #[test]
    fn builder_matches_parsed_graph() {
        let graph = FwGraph::new()
            .with_node(FwNode::new("CPLD0").with_compatible("swc-cpld"))
            .and_then(|g| {
                g.with_node(
                    FwNode::new("PSU1")
                        .with_compatible("swc-psu")
                        .with_reference("psu-present", "CPLD0", &[0x30]),
                )
            })
            .expect("build graph");
        let found = graph
            .lookup_reference("PSU1", "psu-present")
            .expect("reference");
        assert_eq!(found.node, "CPLD0");
        assert!(graph
            .clone()
            .with_node(FwNode::new("CPLD0"))
            .is_err());
    }
}
