//! Bus backends of the switch complex: CPLD register banks and SFF serial
//! interfaces.

pub mod cpld;
pub mod twi;

use std::sync::Arc;

use swc_core::drivers::{CPLD_COMPATIBLE, TWI_COMPATIBLE};
use swc_core::Backend;
use swc_fwdesc::FwNode;
use thiserror::Error;

pub use cpld::{CpldBank, RegisterFlags};
pub use twi::{TwiEeprom, DEFAULT_EEPROM_SIZE, IDENT_QSFP_PLUS, IDENT_SFP};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("duplicate register at offset {0:#x}")]
    DuplicateRegister(u64),
    #[error("no register at offset {0:#x}")]
    NoRegister(u64),
    #[error("register file poisoned")]
    Poisoned,
}

/// Backend for a firmware node, chosen by its compatible string.
///
/// Nodes that are neither CPLDs nor serial interfaces get an opaque backend:
/// they can be linked to but expose no transport.
pub fn backend_for(node: &FwNode) -> Result<Backend, BusError> {
    match node.compatible.as_deref() {
        Some(CPLD_COMPATIBLE) => {
            let bank = CpldBank::from_decls(node.name.clone(), &node.registers)?;
            Ok(Backend::Registers(Arc::new(bank)))
        }
        Some(TWI_COMPATIBLE) => {
            let eeprom = TwiEeprom::with_identifier(
                node.name.clone(),
                node.size.unwrap_or(DEFAULT_EEPROM_SIZE),
                node.identifier.unwrap_or(0),
            );
            Ok(Backend::Memory(Arc::new(eeprom)))
        }
        _ => Ok(Backend::Opaque),
    }
}
