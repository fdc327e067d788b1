//! In-memory CPLD register bank.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use bitflags::bitflags;
use swc_core::{RegisterService, TransportError};
use swc_fwdesc::RegisterDecl;
use tracing::{debug, trace};

use crate::BusError;

bitflags! {
    /// Access rights of a CPLD register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegisterFlags: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
    }
}

#[derive(Debug, Clone, Copy)]
struct RegisterCell {
    value: u8,
    mask: u8,
    flags: RegisterFlags,
}

/// Byte-wide register file of a CPLD.
///
/// Each register carries the field mask of the signal it hosts. Writes merge
/// the incoming field into the current value (read-modify-write) so that
/// neighbouring fields survive.
#[derive(Debug)]
pub struct CpldBank {
    name: String,
    regs: Mutex<BTreeMap<u64, RegisterCell>>,
    faulted: AtomicBool,
    transactions: AtomicU64,
}

impl CpldBank {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            regs: Mutex::new(BTreeMap::new()),
            faulted: AtomicBool::new(false),
            transactions: AtomicU64::new(0),
        }
    }

    /// Build a bank from the register declarations of a firmware node.
    pub fn from_decls(name: impl Into<String>, decls: &[RegisterDecl]) -> Result<Self, BusError> {
        let bank = Self::new(name);
        for decl in decls {
            let mut flags = RegisterFlags::READ;
            if decl.writable {
                flags |= RegisterFlags::WRITE;
            }
            bank.insert(decl.offset, decl.value, decl.mask, flags)?;
        }
        debug!(bank = %bank.name, registers = decls.len(), "cpld bank ready");
        Ok(bank)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a register.
    pub fn insert(
        &self,
        offset: u64,
        value: u8,
        mask: u8,
        flags: RegisterFlags,
    ) -> Result<(), BusError> {
        let mut regs = self.regs.lock().map_err(|_| BusError::Poisoned)?;
        if regs.contains_key(&offset) {
            return Err(BusError::DuplicateRegister(offset));
        }
        regs.insert(offset, RegisterCell { value, mask, flags });
        Ok(())
    }

    /// Change a register behind the transport's back, as the hardware does
    /// when a module is inserted or a supply fails.
    pub fn poke(&self, offset: u64, value: u8) -> Result<(), BusError> {
        let mut regs = self.regs.lock().map_err(|_| BusError::Poisoned)?;
        let cell = regs
            .get_mut(&offset)
            .ok_or(BusError::NoRegister(offset))?;
        trace!(bank = %self.name, offset, old = cell.value, new = value, "poke");
        cell.value = value;
        Ok(())
    }

    /// Current value of a register, bypassing fault injection.
    pub fn peek(&self, offset: u64) -> Option<u8> {
        self.regs
            .lock()
            .ok()
            .and_then(|regs| regs.get(&offset).map(|cell| cell.value))
    }

    /// Make every following transaction fail until cleared.
    pub fn set_faulted(&self, faulted: bool) {
        self.faulted.store(faulted, Ordering::Release);
    }

    /// Number of transactions served so far.
    pub fn transactions(&self) -> u64 {
        self.transactions.load(Ordering::Relaxed)
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<u64, RegisterCell>>, TransportError> {
        if self.faulted.load(Ordering::Acquire) {
            return Err(TransportError::Io(format!("{}: bus fault", self.name)));
        }
        self.transactions.fetch_add(1, Ordering::Relaxed);
        self.regs
            .lock()
            .map_err(|_| TransportError::Io(format!("{}: register file poisoned", self.name)))
    }

    fn cell(&self, offset: u64) -> Result<RegisterCell, TransportError> {
        self.lock()?
            .get(&offset)
            .copied()
            .ok_or(TransportError::NoRegister { offset })
    }
}

impl RegisterService for CpldBank {
    fn read(&self, offset: u64) -> Result<u32, TransportError> {
        let cell = self.cell(offset)?;
        trace!(bank = %self.name, offset, value = cell.value, "read");
        Ok(u32::from(cell.value))
    }

    fn read_mask(&self, offset: u64) -> Result<u32, TransportError> {
        Ok(u32::from(self.cell(offset)?.mask))
    }

    fn write(&self, offset: u64, value: u32) -> Result<(), TransportError> {
        let mut regs = self.lock()?;
        let cell = regs
            .get_mut(&offset)
            .ok_or(TransportError::NoRegister { offset })?;
        if !cell.flags.contains(RegisterFlags::WRITE) {
            return Err(TransportError::ReadOnly { offset });
        }
        let mask = u32::from(cell.mask);
        if value & !mask != 0 {
            debug!(bank = %self.name, offset, value, mask, "dropping bits outside field mask");
        }
        let merged = (u32::from(cell.value) & !mask) | (value & mask);
        trace!(bank = %self.name, offset, old = cell.value, new = merged, "write");
        cell.value = (merged & 0xFF) as u8;
        Ok(())
    }
}
