//! SFF serial interface (two-wire EEPROM) backend.

use bytes::{BufMut, Bytes, BytesMut};
use swc_core::{SerialMemory, TransportError};
use tracing::{debug, trace};

/// Identifier byte of an SFP/SFP+ module (SFF-8472).
pub const IDENT_SFP: u8 = 0x03;
/// Identifier byte of a QSFP+ module (SFF-8436).
pub const IDENT_QSFP_PLUS: u8 = 0x0D;
/// Size of one addressable EEPROM page set.
pub const DEFAULT_EEPROM_SIZE: usize = 256;

/// Read-only image of a module EEPROM.
///
/// Writes are accepted and discarded; the image never changes once built.
#[derive(Debug, Clone)]
pub struct TwiEeprom {
    name: String,
    image: Bytes,
}

impl TwiEeprom {
    pub fn new(name: impl Into<String>, image: Bytes) -> Self {
        Self {
            name: name.into(),
            image,
        }
    }

    /// Blank image of `size` bytes carrying `identifier` in byte 0.
    pub fn with_identifier(name: impl Into<String>, size: usize, identifier: u8) -> Self {
        let mut buf = BytesMut::with_capacity(size);
        if size > 0 {
            buf.put_u8(identifier);
            buf.put_bytes(0, size - 1);
        }
        Self::new(name, buf.freeze())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier byte, if the image is non-empty.
    pub fn identifier(&self) -> Option<u8> {
        self.image.first().copied()
    }
}

impl SerialMemory for TwiEeprom {
    fn size(&self) -> usize {
        self.image.len()
    }

    fn read_at(&self, offset: usize, len: usize) -> Result<Vec<u8>, TransportError> {
        let size = self.image.len();
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= size)
            .ok_or(TransportError::OutOfRange { offset, len, size })?;
        trace!(eeprom = %self.name, offset, len, "read");
        Ok(self.image.slice(offset..end).to_vec())
    }

    fn write_at(&self, offset: usize, data: &[u8]) -> Result<usize, TransportError> {
        debug!(eeprom = %self.name, offset, len = data.len(), "discarding eeprom write");
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_image() {
        let eeprom = TwiEeprom::with_identifier("TWI0", DEFAULT_EEPROM_SIZE, IDENT_QSFP_PLUS);
        assert_eq!(eeprom.size(), DEFAULT_EEPROM_SIZE);
        assert_eq!(eeprom.identifier(), Some(IDENT_QSFP_PLUS));
        assert_eq!(eeprom.read_at(0, 2).expect("read"), vec![0x0D, 0x00]);
        assert!(TwiEeprom::with_identifier("empty", 0, IDENT_SFP)
            .identifier()
            .is_none());
    }

    #[test]
    fn reads_are_bounds_checked() {
        let eeprom = TwiEeprom::new("TWI1", Bytes::from_static(&[1, 2, 3, 4]));
        assert_eq!(eeprom.read_at(2, 2).expect("tail"), vec![3, 4]);
        assert!(eeprom.read_at(4, 0).expect("empty at end").is_empty());
        assert!(matches!(
            eeprom.read_at(3, 2),
            Err(TransportError::OutOfRange {
                offset: 3,
                len: 2,
                size: 4
            })
        ));
        assert!(eeprom.read_at(usize::MAX, 2).is_err());
    }

    #[test]
    fn writes_are_discarded() {
        let eeprom = TwiEeprom::new("TWI2", Bytes::from_static(&[9, 9]));
        assert_eq!(eeprom.write_at(0, &[1, 1]).expect("write"), 2);
        assert_eq!(eeprom.read_at(0, 2).expect("read"), vec![9, 9]);
    }
}
