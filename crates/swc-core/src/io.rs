//! Transport traits implemented by register-bank and serial-interface backends.

use thiserror::Error;

/// Failure reported by a backend while moving bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The bus transaction itself failed.
    #[error("io error: {0}")]
    Io(String),
    /// No register is decoded at the requested offset.
    #[error("no register at offset {offset:#x}")]
    NoRegister { offset: u64 },
    /// The register exists but rejects writes.
    #[error("register at offset {offset:#x} is read-only")]
    ReadOnly { offset: u64 },
    /// Access beyond the end of a memory window.
    #[error("range {offset}+{len} exceeds {size} bytes")]
    OutOfRange { offset: usize, len: usize, size: usize },
    /// The device behind the handle does not speak this transport.
    #[error("device {0} does not provide this transport")]
    Unsupported(String),
}

/// Byte-level register access on a CPLD-style register bank.
///
/// Implementations own their read-modify-write discipline: [`write`] receives
/// a value already positioned inside the register's field mask.
///
/// [`write`]: RegisterService::write
pub trait RegisterService: Send + Sync {
    /// Current raw value of the register at `offset`.
    fn read(&self, offset: u64) -> Result<u32, TransportError>;
    /// Field mask describing which bits of `offset` the attribute owns.
    fn read_mask(&self, offset: u64) -> Result<u32, TransportError>;
    /// Store a field value into the register at `offset`.
    fn write(&self, offset: u64, value: u32) -> Result<(), TransportError>;
}

/// Random access memory window behind a serial interface (module EEPROM).
pub trait SerialMemory: Send + Sync {
    fn size(&self) -> usize;
    fn read_at(&self, offset: usize, len: usize) -> Result<Vec<u8>, TransportError>;
    fn write_at(&self, offset: usize, data: &[u8]) -> Result<usize, TransportError>;
}
