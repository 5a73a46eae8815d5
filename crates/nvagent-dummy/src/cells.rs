//! Storage array shared by the emulated devices

use alloc::vec;
use alloc::vec::Vec;

use nvagent_core::error::{Error, HalOp, Result};

use crate::{Operation, Timing};

/// Cell array with fault injection and an op log
///
/// Programming moves cells away from the erased value only: NOR flash
/// (erased `0xFF`) clears bits, the EEPROM (erased `0x00`) sets them.
#[derive(Debug)]
pub(crate) struct Cells {
    pub data: Vec<u8>,
    pub erased: u8,
    pub ops: Vec<Operation>,
    pub stuck: Vec<(u32, u8)>,
    pub fault: Option<(HalOp, u32)>,
    pub timing: Timing,
    pub ticks: u64,
}

impl Cells {
    pub fn new(size: usize, erased: u8, timing: Timing) -> Self {
        Self {
            data: vec![erased; size],
            erased,
            ops: Vec::new(),
            stuck: Vec::new(),
            fault: None,
            timing,
            ticks: 0,
        }
    }

    /// Log `op`, then charge its busy time and fire any injected fault
    pub fn begin(&mut self, op: Operation, addr: u32, timeout: u32) -> Result<()> {
        self.ops.push(op);
        let hal_op = op.hal_op();

        if self.fault == Some((hal_op, addr)) {
            self.fault = None;
            log::debug!("Injected {} fault at 0x{:08X}", hal_op, addr);
            return Err(Error::Device { op: hal_op, addr });
        }

        let cost = match hal_op {
            HalOp::EraseSector | HalOp::EraseAll => self.timing.erase,
            HalOp::ProgramPage => self.timing.program,
            HalOp::ReadPage | HalOp::MapForRead => self.timing.read,
        };
        if cost > timeout {
            self.ticks += timeout as u64;
            return Err(Error::Timeout { op: hal_op, addr });
        }
        self.ticks += cost as u64;
        Ok(())
    }

    pub fn range(&self, addr: u32, len: usize) -> Result<core::ops::Range<usize>> {
        let start = addr as usize;
        let end = start.checked_add(len).ok_or(Error::AddressOutOfBounds)?;
        if end > self.data.len() {
            return Err(Error::AddressOutOfBounds);
        }
        Ok(start..end)
    }

    pub fn erase(&mut self, range: core::ops::Range<usize>) {
        self.data[range].fill(self.erased);
        self.apply_stuck();
    }

    pub fn program(&mut self, addr: usize, byte: u8) {
        if self.erased == 0 {
            self.data[addr] |= byte;
        } else {
            self.data[addr] &= byte;
        }
    }

    pub fn apply_stuck(&mut self) {
        for &(addr, value) in &self.stuck {
            if let Some(cell) = self.data.get_mut(addr as usize) {
                *cell = value;
            }
        }
    }
}
