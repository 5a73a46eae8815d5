//! Chunk iteration and the erase/program sequence
//!
//! A pass covers `request.len` bytes of the source buffer in program-page
//! sized chunks, in ascending address order. Each chunk that opens a new
//! erase unit carries the erase that must run before it is programmed:
//!
//! - flash: one sector erase per 4 KiB sector, on the first page of it
//! - EEPROM: a single whole-array erase, on the first page of the pass

use core::iter::FusedIterator;

use log::{debug, trace};
use maybe_async::maybe_async;

use crate::config::{EraseUnit, Geometry, PassRequest, Timeouts};
use crate::error::{Error, Result};
use crate::hal::NvMemory;

/// Erase that has to happen before a chunk is programmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EraseOp {
    /// Erase the sector starting at this device address
    Sector(u32),
    /// Erase the whole array
    All,
}

/// One program page of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chunk {
    /// Page index relative to the start of the pass
    pub index: u32,
    /// Offset into the source buffer
    pub offset: u32,
    /// Device address
    pub addr: u32,
    /// Length in bytes (one page)
    pub len: u32,
    /// Erase to issue before programming this chunk
    pub erase: Option<EraseOp>,
}

impl Chunk {
    /// The slice of the source buffer this chunk programs
    ///
    /// # Errors
    /// * `AddressOutOfBounds` - If the buffer is shorter than the chunk end
    pub fn source<'a>(&self, buffer: &'a [u8]) -> Result<&'a [u8]> {
        let start = self.offset as usize;
        buffer
            .get(start..start + self.len as usize)
            .ok_or(Error::AddressOutOfBounds)
    }
}

/// Ordered, single-use sequence of the chunks of one pass
#[derive(Debug)]
pub struct Chunks {
    page_size: u32,
    erase_unit: EraseUnit,
    target: u32,
    len: u32,
    offset: u32,
}

impl Chunks {
    /// Chunks covering `request` on a device with `geometry`
    ///
    /// The request is expected to have passed [`PassRequest::check`].
    pub fn new(geometry: &Geometry, request: &PassRequest) -> Self {
        Self {
            page_size: geometry.page_size,
            erase_unit: geometry.erase_unit,
            target: request.target,
            len: request.len,
            offset: 0,
        }
    }

    fn erase_for(&self, addr: u32) -> Option<EraseOp> {
        match self.erase_unit {
            EraseUnit::Sector(size) => {
                if self.offset == 0 || addr % size == 0 {
                    Some(EraseOp::Sector(addr - addr % size))
                } else {
                    None
                }
            }
            EraseUnit::WholeArray => (self.offset == 0).then_some(EraseOp::All),
        }
    }
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.offset >= self.len {
            return None;
        }

        let addr = self.target + self.offset;
        let chunk = Chunk {
            index: self.offset / self.page_size,
            offset: self.offset,
            addr,
            len: core::cmp::min(self.page_size, self.len - self.offset),
            erase: self.erase_for(addr),
        };
        self.offset += chunk.len;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len.saturating_sub(self.offset).div_ceil(self.page_size) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks {}
impl FusedIterator for Chunks {}

/// Issue the erase attached to `chunk`, if any
#[maybe_async]
pub async fn erase_chunk<D: NvMemory + ?Sized>(
    device: &mut D,
    chunk: &Chunk,
    timeouts: &Timeouts,
) -> Result<()> {
    match chunk.erase {
        Some(EraseOp::Sector(addr)) => {
            debug!("Erasing sector 0x{:08X}", addr);
            device.erase_sector(addr, timeouts.erase).await
        }
        Some(EraseOp::All) => {
            debug!("Erasing whole array");
            device.erase_all(timeouts.erase).await
        }
        None => Ok(()),
    }
}

/// Program `chunk` from its slice of `source`
#[maybe_async]
pub async fn program_chunk<D: NvMemory + ?Sized>(
    device: &mut D,
    source: &[u8],
    chunk: &Chunk,
    timeouts: &Timeouts,
) -> Result<()> {
    let data = chunk.source(source)?;
    trace!(
        "Programming page {} at 0x{:08X} from buffer offset 0x{:04X}",
        chunk.index,
        chunk.addr,
        chunk.offset
    );
    device.program_page(chunk.addr, data, timeouts.program).await
}

/// Erase (when the chunk opens an erase unit) and program one chunk
#[maybe_async]
pub async fn write_chunk<D: NvMemory + ?Sized>(
    device: &mut D,
    source: &[u8],
    chunk: &Chunk,
    timeouts: &Timeouts,
) -> Result<()> {
    erase_chunk(device, chunk, timeouts).await?;
    program_chunk(device, source, chunk, timeouts).await
}

/// Erase a whole-array device for a pass that programs nothing
///
/// The chunk sequence of an empty pass carries no erase, but the EEPROM
/// contract erases the array before looking at the length. Sector devices
/// are left untouched.
#[maybe_async]
pub async fn erase_empty_pass<D: NvMemory + ?Sized>(
    device: &mut D,
    geometry: &Geometry,
    request: &PassRequest,
    timeouts: &Timeouts,
) -> Result<()> {
    if request.len == 0 && geometry.erase_unit == EraseUnit::WholeArray {
        debug!("Erasing whole array for an empty pass");
        device.erase_all(timeouts.erase).await?;
    }
    Ok(())
}

/// Erase and program every chunk of `request`, without reading back
///
/// Stops at the first peripheral error. Returns the number of pages written.
#[maybe_async]
pub async fn write_all<D: NvMemory + ?Sized>(
    device: &mut D,
    source: &[u8],
    geometry: &Geometry,
    request: &PassRequest,
    timeouts: &Timeouts,
) -> Result<u32> {
    erase_empty_pass(device, geometry, request, timeouts).await?;

    let mut pages = 0;
    for chunk in Chunks::new(geometry, request) {
        write_chunk(device, source, &chunk, timeouts).await?;
        pages += 1;
    }
    Ok(pages)
}
