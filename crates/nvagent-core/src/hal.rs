//! Peripheral capability consumed by the agent
//!
//! The agent never talks to SPIFI or EEPROM registers itself. Board support
//! code implements [`NvMemory`] on top of the vendor peripheral driver, and
//! `nvagent-dummy` implements it in memory.
//!
//! Uses `maybe_async` to support both sync and async modes.

use crate::error::Result;
use maybe_async::maybe_async;

/// Erase/program/read capability of a non-volatile memory
///
/// Every call receives a busy-wait budget. An implementation that polls a
/// busy flag must give up after that many polls and return
/// `Error::Timeout`; the agent treats that as fatal for the pass and does
/// not retry.
///
/// # Example
///
/// ```ignore
/// #[maybe_async::maybe_async(AFIT)]
/// impl NvMemory for Spifi {
///     async fn erase_sector(&mut self, addr: u32, timeout: u32) -> Result<()> {
///         self.write_enable()?;
///         self.command(SECTOR_ERASE, addr)?;
///         self.wait_idle(timeout).await
///     }
///     // ...
/// }
/// ```
#[maybe_async(AFIT)]
pub trait NvMemory {
    /// Erase the erase unit that starts at `addr`
    ///
    /// # Errors
    /// * `Timeout` - If the device stays busy past `timeout` polls
    async fn erase_sector(&mut self, addr: u32, timeout: u32) -> Result<()>;

    /// Erase the whole array
    ///
    /// # Errors
    /// * `Timeout` - If the device stays busy past `timeout` polls
    async fn erase_all(&mut self, timeout: u32) -> Result<()>;

    /// Program one page; `data` never crosses a page boundary
    ///
    /// # Errors
    /// * `Timeout` - If the device stays busy past `timeout` polls
    async fn program_page(&mut self, addr: u32, data: &[u8], timeout: u32) -> Result<()>;

    /// Read `buf.len()` bytes starting at `addr` through the peripheral
    ///
    /// # Errors
    /// * `Timeout` - If the device stays busy past `timeout` polls
    async fn read_page(&mut self, addr: u32, buf: &mut [u8], timeout: u32) -> Result<()>;

    /// Switch the controller into memory-mapped read mode
    ///
    /// Returns `false` if the device has no mapped window, in which case
    /// callers fall back to [`NvMemory::read_page`].
    async fn enable_mapped_read(&mut self, _timeout: u32) -> Result<bool> {
        Ok(false)
    }

    /// View of `len` bytes at device address `addr` through the mapped window
    ///
    /// Only meaningful after [`NvMemory::enable_mapped_read`] returned `true`.
    fn mapped_window(&self, _addr: u32, _len: usize) -> Option<&[u8]> {
        None
    }
}
