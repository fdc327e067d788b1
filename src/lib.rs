//! Switch complex platform facade.
//!
//! Re-exports the workspace crates and ties them together in [`Platform`]:
//! the firmware description, the live device table, the peripheral arena and
//! the per-class device naming.
//!
//! ```rust,no_run
//! use swc::{Platform, PlatformError, ProbeOutcome};
//!
//! # fn run() -> Result<(), PlatformError> {
//! let xml = std::fs::read_to_string("platform.xml").expect("read description");
//! let mut platform = Platform::from_xml(&xml)?;
//! platform.bind_backends(&[])?;
//! for (owner, outcome) in platform.discover_all() {
//!     println!("{owner}: {outcome:?}");
//! }
//! if platform.outcome("PORT1") == Some(ProbeOutcome::Ready) {
//!     println!("present={}", platform.get("PORT1", "present")?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod class;
pub mod platform;
pub mod retry;

pub use swc_bus as bus;
pub use swc_core as peripheral;
pub use swc_fwdesc as fwdesc;

pub use class::{ClassDevice, ClassRegistry};
pub use platform::Platform;
pub use retry::{probe_with_backoff, RetryPolicy};
pub use swc_core::{
    AccessError, Backend, DeviceHandle, FailureKind, Link, PeripheralInstance, ProbeOutcome,
    TransportError,
};

use swc_bus::BusError;
use swc_fwdesc::FwError;
use thiserror::Error;

/// Error type produced by the platform facade.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Loading or querying the firmware description failed.
    #[error(transparent)]
    Firmware(#[from] FwError),
    /// Building a bus backend failed.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// Runtime attribute access failed.
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The node is described but no driver claims its compatible string.
    #[error("no driver for node {0}")]
    NoDriver(String),
    /// The firmware marks the node disabled; it is never instantiated.
    #[error("node {0} is disabled")]
    Disabled(String),
    /// Neither a bound owner node nor a class device carries this name.
    #[error("no such peripheral: {0}")]
    NoSuchPeripheral(String),
    #[error("{0} has no serial interface")]
    NoSerialInterface(String),
}
