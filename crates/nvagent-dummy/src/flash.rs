//! Emulated SPI NOR flash

use alloc::vec::Vec;

use nvagent_core::error::{Error, HalOp, Result};
use nvagent_core::hal::NvMemory;

use crate::cells::Cells;
use crate::{Operation, Timing};

/// Configuration for the dummy flash
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Flash size in bytes
    pub size: usize,
    /// Page size for programming
    pub page_size: usize,
    /// Sector size for the smallest erase
    pub sector_size: usize,
    /// Whether the controller offers a memory-mapped read window
    pub mapped_window: bool,
    /// Busy time per operation
    pub timing: Timing,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            size: 4 * 1024 * 1024, // W25Q32
            page_size: 256,
            sector_size: 4096,
            mapped_window: true,
            timing: Timing::default(),
        }
    }
}

/// Dummy SPI NOR flash
///
/// Emulates the parts of a W25-style flash the agent relies on: erase sets
/// bytes to `0xFF`, programming can only clear bits, and a page program
/// running past the end of its page wraps to the page start. Erasing or
/// programming drops the controller out of memory-mapped mode.
pub struct DummyFlash {
    config: DummyConfig,
    cells: Cells,
    mapped: bool,
}

impl DummyFlash {
    /// Create a new dummy flash with the given configuration
    pub fn new(config: DummyConfig) -> Self {
        let cells = Cells::new(config.size, 0xFF, config.timing);
        Self {
            config,
            cells,
            mapped: false,
        }
    }

    /// Create a new dummy flash with default configuration (W25Q32)
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Create a dummy flash with pre-filled data
    pub fn with_data(config: DummyConfig, initial_data: &[u8]) -> Self {
        let mut flash = Self::new(config);
        let len = core::cmp::min(initial_data.len(), flash.cells.data.len());
        flash.cells.data[..len].copy_from_slice(&initial_data[..len]);
        flash
    }

    /// Get a reference to the flash data
    pub fn data(&self) -> &[u8] {
        &self.cells.data
    }

    /// Get the configuration
    pub fn config(&self) -> &DummyConfig {
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

    /// Whether the controller is in memory-mapped mode
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    fn sector_start(&self, addr: u32) -> u32 {
        addr & !(self.config.sector_size as u32 - 1)
    }
}

#[maybe_async::maybe_async(AFIT)]
impl NvMemory for DummyFlash {
    async fn erase_sector(&mut self, addr: u32, timeout: u32) -> Result<()> {
        self.mapped = false;
        let aligned = self.sector_start(addr);
        let range = self.cells.range(aligned, self.config.sector_size)?;
        self.cells.begin(Operation::EraseSector(aligned), aligned, timeout)?;
        self.cells.erase(range);
        Ok(())
    }

    async fn erase_all(&mut self, timeout: u32) -> Result<()> {
        self.mapped = false;
        self.cells.begin(Operation::EraseAll, 0, timeout)?;
        let len = self.cells.data.len();
        self.cells.erase(0..len);
        Ok(())
    }

    async fn program_page(&mut self, addr: u32, data: &[u8], timeout: u32) -> Result<()> {
        self.mapped = false;
        let page = self.config.page_size;
        let page_start = addr as usize & !(page - 1);
        self.cells.range(page_start as u32, page)?;
        self.cells
            .begin(Operation::Program(addr, data.len()), addr, timeout)?;

        let mut offset = addr as usize - page_start;
        for &byte in data {
            self.cells.program(page_start + offset, byte);
            offset = (offset + 1) % page;
        }
        self.cells.apply_stuck();
        Ok(())
    }

    async fn read_page(&mut self, addr: u32, buf: &mut [u8], timeout: u32) -> Result<()> {
        let range = self.cells.range(addr, buf.len())?;
        self.cells
            .begin(Operation::Read(addr, buf.len()), addr, timeout)?;
        buf.copy_from_slice(&self.cells.data[range]);
        Ok(())
    }

    async fn enable_mapped_read(&mut self, timeout: u32) -> Result<bool> {
        self.cells.begin(Operation::MapRead, 0, timeout)?;
        self.mapped = self.config.mapped_window;
        Ok(self.mapped)
    }

    fn mapped_window(&self, addr: u32, len: usize) -> Option<&[u8]> {
        if !self.mapped {
            return None;
        }
        let range = self.cells.range(addr, len).ok()?;
        Some(&self.cells.data[range])
    }
}

impl core::fmt::Debug for DummyFlash {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DummyFlash")
            .field("size", &self.config.size)
            .field("mapped", &self.mapped)
            .field("operations", &self.cells.ops.len())
            .finish()
    }
}

/// Addresses of every sector erased, in order
pub fn erased_sectors(ops: &[Operation]) -> Vec<u32> {
    ops.iter()
        .filter_map(|op| match op {
            Operation::EraseSector(addr) => Some(*addr),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: u32 = nvagent_core::config::DEFAULT_TIMEOUT;

    #[test]
    fn test_program_clears_bits_only() {
        let mut flash = DummyFlash::new_default();
        flash.program_page(0x100, &[0xF0, 0x0F], T).unwrap();
        flash.program_page(0x100, &[0x3C, 0xFF], T).unwrap();
        assert_eq!(&flash.data()[0x100..0x102], &[0x30, 0x0F]);
    }

    #[test]
    fn test_program_wraps_within_page() {
        let mut flash = DummyFlash::new_default();
        flash.program_page(0x1FE, &[0x11, 0x22, 0x33], T).unwrap();
        assert_eq!(flash.data()[0x1FE], 0x11);
        assert_eq!(flash.data()[0x1FF], 0x22);
        assert_eq!(flash.data()[0x100], 0x33);
        assert_eq!(flash.data()[0x200], 0xFF);
    }

    #[test]
    fn test_erase_aligns_to_sector() {
        let mut flash = DummyFlash::with_data(DummyConfig::default(), &[0u8; 0x3000]);
        flash.erase_sector(0x1234, T).unwrap();

        assert_eq!(flash.operations(), &[Operation::EraseSector(0x1000)]);
        assert!(flash.data()[0x1000..0x2000].iter().all(|&b| b == 0xFF));
        assert_eq!(flash.data()[0x0FFF], 0x00);
        assert_eq!(flash.data()[0x2000], 0x00);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut flash = DummyFlash::new_default();
        let mut buf = [0u8; 256];
        assert_eq!(
            flash.read_page(0x3F_FF80, &mut buf, T),
            Err(Error::AddressOutOfBounds)
        );
        assert_eq!(flash.erase_sector(0x40_0000, T), Err(Error::AddressOutOfBounds));
        assert!(flash.operations().is_empty());
    }

    #[test]
    fn test_busy_past_budget_times_out() {
        let mut flash = DummyFlash::new_default();
        assert_eq!(
            flash.erase_sector(0x2000, 100),
            Err(Error::Timeout {
                op: HalOp::EraseSector,
                addr: 0x2000
            })
        );
        assert_eq!(flash.ticks(), 100);
        assert!(flash.erase_sector(0x2000, 400).is_ok());
    }

    #[test]
    fn test_injected_fault_fires_once() {
        let mut flash = DummyFlash::new_default();
        flash.inject_fault(HalOp::ProgramPage, 0x300);
        assert_eq!(
            flash.program_page(0x300, &[0; 4], T),
            Err(Error::Device {
                op: HalOp::ProgramPage,
                addr: 0x300
            })
        );
        assert!(flash.program_page(0x300, &[0; 4], T).is_ok());
    }

    #[test]
    fn test_stuck_byte_survives_erase() {
        let mut flash = DummyFlash::new_default();
        flash.inject_stuck_byte(0x10, 0x5A);
        flash.erase_sector(0, T).unwrap();
        assert_eq!(flash.data()[0x10], 0x5A);
        flash.program_page(0, &[0u8; 256], T).unwrap();
        assert_eq!(flash.data()[0x10], 0x5A);
    }

    #[test]
    fn test_mapped_window() {
        let mut flash = DummyFlash::new_default();
        assert!(flash.mapped_window(0, 16).is_none());
        assert!(flash.enable_mapped_read(T).unwrap());
        assert_eq!(flash.mapped_window(0, 16), Some(&[0xFFu8; 16][..]));

        flash.erase_sector(0, T).unwrap();
        assert!(!flash.is_mapped());
        assert!(flash.mapped_window(0, 16).is_none());
    }

    #[test]
    fn test_no_window_configured() {
        let mut flash = DummyFlash::new(DummyConfig {
            mapped_window: false,
            ..Default::default()
        });
        assert!(!flash.enable_mapped_read(T).unwrap());
        assert!(flash.mapped_window(0, 16).is_none());
    }

    #[test]
    fn test_erased_sectors() {
        let ops = [
            Operation::EraseSector(0x1000),
            Operation::Program(0x1000, 256),
            Operation::EraseSector(0x2000),
        ];
        assert_eq!(erased_sectors(&ops), [0x1000, 0x2000]);
    }
}
