//! Register-backed peripheral model.
//!
//! Peripherals (transceiver cages, LED clusters, PSU slots) are described in
//! the platform firmware as nodes holding named references to the devices
//! they depend on. This crate turns such a node into a [`PeripheralInstance`]:
//!
//! 1. [`TopologyResolver`] maps each reference to a live [`DeviceHandle`]
//!    through a [`DeviceDirectory`], reporting devices that have not
//!    registered yet as retryable;
//! 2. [`PeripheralInstance::construct`] resolves a [`PeripheralTemplate`]
//!    in order and settles on `Ready`, `Deferred` or `Failed`;
//! 3. attributes of a ready instance decode CPLD register fields through
//!    [`bitops`] and a [`RegisterService`].

pub mod attributes;
pub mod bitops;
pub mod device;
pub mod drivers;
pub mod io;
pub mod peripheral;
pub mod resolver;

pub use attributes::{
    Access, AttributeDescriptor, AttributeRegistry, CapacityExceeded, MAX_ATTRIBUTES,
};
pub use bitops::{BitOpsError, Polarity};
pub use device::{Backend, DeviceDirectory, DeviceHandle, DeviceTable, HandleLookup};
pub use io::{RegisterService, SerialMemory, TransportError};
pub use peripheral::{
    AccessError, AttributeSpec, Construction, DependencySpec, Link, PeripheralInstance,
    PeripheralTemplate, ProbeOutcome,
};
pub use resolver::{
    DependencyReference, FailureKind, ResolutionError, ResolvedDependency, TopologyResolver,
};
