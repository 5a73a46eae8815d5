//! Emulated on-chip EEPROM

use nvagent_core::config::{EEPROM_BUFFER_SIZE, EEPROM_PAGE_SIZE};
use nvagent_core::error::{Error, HalOp, Result};
use nvagent_core::hal::NvMemory;

use crate::cells::Cells;
use crate::{Operation, Timing};

/// Configuration for the dummy EEPROM
#[derive(Debug, Clone)]
pub struct EepromConfig {
    /// Array size in bytes
    pub size: usize,
    /// Page size in bytes
    pub page_size: usize,
    /// Busy time per operation
    pub timing: Timing,
}

impl Default for EepromConfig {
    fn default() -> Self {
        Self {
            size: EEPROM_BUFFER_SIZE as usize,
            page_size: EEPROM_PAGE_SIZE as usize,
            timing: Timing::default(),
        }
    }
}

/// Dummy EEPROM
///
/// Page-organised array of 32-bit words. Erase clears cells to `0x00` and
/// programming can only set bits. Every access must be word aligned and a
/// program must stay inside one page.
pub struct DummyEeprom {
    config: EepromConfig,
    cells: Cells,
}

impl DummyEeprom {
    /// Create a new dummy EEPROM with the given configuration
    pub fn new(config: EepromConfig) -> Self {
        let cells = Cells::new(config.size, 0x00, config.timing);
        Self { config, cells }
    }

    /// Create a new dummy EEPROM with default configuration (8 KiB)
    pub fn new_default() -> Self {
        Self::new(EepromConfig::default())
    }

    /// Get a reference to the EEPROM data
    pub fn data(&self) -> &[u8] {
        &self.cells.data
    }

    /// Get the configuration
    pub fn config(&self) -> &EepromConfig {
        &self.config
    }

    /// Every operation issued so far
    pub fn operations(&self) -> &[Operation] {
        &self.cells.ops
    }

    /// Busy ticks spent so far
    pub fn ticks(&self) -> u64 {
        self.cells.ticks
    }

    /// Make the byte at `addr` always hold `value` after erase or program
    pub fn inject_stuck_byte(&mut self, addr: u32, value: u8) {
        self.cells.stuck.push((addr, value));
        self.cells.apply_stuck();
    }

    /// Fail the next `op` at `addr` with `Error::Device`
    pub fn inject_fault(&mut self, op: HalOp, addr: u32) {
        self.cells.fault = Some((op, addr));
    }

    /// Change the busy time of future operations
    pub fn set_timing(&mut self, timing: Timing) {
        self.cells.timing = timing;
    }

    fn check_words(addr: u32, len: usize) -> Result<()> {
        if addr % 4 != 0 || len % 4 != 0 {
            return Err(Error::InvalidAlignment);
        }
        Ok(())
    }
}

#[maybe_async::maybe_async(AFIT)]
impl NvMemory for DummyEeprom {
    /// Erase the page containing `addr`
    async fn erase_sector(&mut self, addr: u32, timeout: u32) -> Result<()> {
        let page = self.config.page_size as u32;
        let aligned = addr - addr % page;
        let range = self.cells.range(aligned, page as usize)?;
        self.cells.begin(Operation::EraseSector(aligned), aligned, timeout)?;
        self.cells.erase(range);
        Ok(())
    }

    async fn erase_all(&mut self, timeout: u32) -> Result<()> {
        self.cells.begin(Operation::EraseAll, 0, timeout)?;
        let len = self.cells.data.len();
        self.cells.erase(0..len);
        Ok(())
    }

    async fn program_page(&mut self, addr: u32, data: &[u8], timeout: u32) -> Result<()> {
        Self::check_words(addr, data.len())?;
        let page = self.config.page_size;
        if addr as usize % page + data.len() > page {
            return Err(Error::AddressOutOfBounds);
        }
        let range = self.cells.range(addr, data.len())?;
        self.cells
            .begin(Operation::Program(addr, data.len()), addr, timeout)?;

        for (cell, &byte) in range.zip(data) {
            self.cells.program(cell, byte);
        }
        self.cells.apply_stuck();
        Ok(())
    }

    async fn read_page(&mut self, addr: u32, buf: &mut [u8], timeout: u32) -> Result<()> {
        Self::check_words(addr, buf.len())?;
        let range = self.cells.range(addr, buf.len())?;
        self.cells
            .begin(Operation::Read(addr, buf.len()), addr, timeout)?;
        buf.copy_from_slice(&self.cells.data[range]);
        Ok(())
    }
}

impl core::fmt::Debug for DummyEeprom {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DummyEeprom")
            .field("size", &self.config.size)
            .field("operations", &self.cells.ops.len())
            .finish()
    }
}
