//! Verification engine
//!
//! Written data is read back either page by page through the peripheral or
//! in one go through the memory-mapped window, and compared against the
//! source buffer in ascending address order. Comparison is exact, in native
//! byte order, with a word-at-a-time fast path.

use log::{debug, warn};
use maybe_async::maybe_async;

use crate::chunk::{Chunk, Chunks};
use crate::config::{Geometry, PassRequest, Readback, Timeouts, VerifyPolicy, MAX_PAGE_SIZE};
use crate::error::{Error, Result};
use crate::hal::NvMemory;
use crate::status::{MismatchDetail, Status};

/// How many mismatches a report keeps for diagnostics
pub const MISMATCH_HISTORY: usize = 8;

/// A byte that did not read back as written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mismatch {
    /// Page index relative to the start of the pass
    pub page: u32,
    /// Byte offset within the page
    pub byte: u32,
    /// Device address of the byte
    pub addr: u32,
    /// Value in the source buffer
    pub expected: u8,
    /// Value read back
    pub actual: u8,
}

impl Mismatch {
    /// Location as carried by the extended status word
    pub fn detail(&self) -> MismatchDetail {
        MismatchDetail {
            page: self.page as u8,
            byte: self.byte as u8,
            actual: self.actual,
        }
    }
}

/// Outcome of comparing a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerifyResult {
    /// Everything read back as written
    Match,
    /// The mismatch selected by the verify policy
    Mismatch(Mismatch),
}

impl VerifyResult {
    /// Status the controller publishes for this result
    pub fn status(&self) -> Status {
        match self {
            Self::Match => Status::Ok,
            Self::Mismatch(m) => Status::Mismatch(Some(m.detail())),
        }
    }
}

/// Result of a verify run plus diagnostics
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    reported: Option<Mismatch>,
    count: u32,
    history: heapless::Vec<Mismatch, MISMATCH_HISTORY>,
    bytes_checked: u32,
}

impl VerifyReport {
    /// The reported outcome
    pub fn result(&self) -> VerifyResult {
        match self.reported {
            Some(m) => VerifyResult::Mismatch(m),
            None => VerifyResult::Match,
        }
    }

    /// Number of mismatching bytes seen
    pub fn mismatch_count(&self) -> u32 {
        self.count
    }

    /// The first mismatches seen, in address order
    pub fn history(&self) -> &[Mismatch] {
        &self.history
    }

    /// Bytes compared before the run ended
    pub fn bytes_checked(&self) -> u32 {
        self.bytes_checked
    }
}

/// Incremental comparator for one pass
#[derive(Debug)]
pub struct Verifier {
    policy: VerifyPolicy,
    page_size: u32,
    target: u32,
    stopped: bool,
    report: VerifyReport,
}

impl Verifier {
    /// Comparator for `request` on a device with `geometry`
    pub fn new(policy: VerifyPolicy, geometry: &Geometry, request: &PassRequest) -> Self {
        Self {
            policy,
            page_size: geometry.page_size,
            target: request.target,
            stopped: false,
            report: VerifyReport::default(),
        }
    }

    /// Whether a fail-fast mismatch already ended the comparison
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Compare read-back data against the source
    ///
    /// `offset` is the source buffer offset of `expected[0]`. Returns
    /// `false` once the policy says to stop.
    pub fn compare(&mut self, offset: u32, expected: &[u8], actual: &[u8]) -> bool {
        debug_assert_eq!(expected.len(), actual.len());
        if self.stopped {
            return false;
        }

        let len = core::cmp::min(expected.len(), actual.len());
        let mut pos = 0;
        while let Some(rel) = first_difference(&expected[pos..len], &actual[pos..len]) {
            let i = pos + rel;
            self.record(offset + i as u32, expected[i], actual[i]);
            if self.policy == VerifyPolicy::FailFast {
                self.report.bytes_checked += i as u32 + 1;
                self.stopped = true;
                return false;
            }
            pos = i + 1;
        }

        self.report.bytes_checked += len as u32;
        true
    }

    fn record(&mut self, offset: u32, expected: u8, actual: u8) {
        let mismatch = Mismatch {
            page: offset / self.page_size,
            byte: offset % self.page_size,
            addr: self.target + offset,
            expected,
            actual,
        };
        warn!(
            "addr[0x{:08X}] page {} byte {}: buf:mem = 0x{:02X} != 0x{:02X}",
            mismatch.addr, mismatch.page, mismatch.byte, expected, actual
        );

        self.report.count += 1;
        let _ = self.report.history.push(mismatch);
        self.report.reported = Some(mismatch);
    }

    /// Finish the comparison and hand out the report
    pub fn finish(self) -> VerifyReport {
        self.report
    }
}

/// Index of the first differing byte, comparing a word at a time
pub fn first_difference(expected: &[u8], actual: &[u8]) -> Option<usize> {
    let len = core::cmp::min(expected.len(), actual.len());
    let words = len - len % 4;

    let start = expected[..words]
        .chunks_exact(4)
        .zip(actual[..words].chunks_exact(4))
        .position(|(e, a)| e != a)
        .map_or(words, |w| w * 4);

    expected[start..len]
        .iter()
        .zip(&actual[start..len])
        .position(|(e, a)| e != a)
        .map(|p| start + p)
}

/// Read one chunk back through the peripheral and compare it
///
/// Returns `false` once the policy says to stop.
#[maybe_async]
pub async fn verify_chunk<D: NvMemory + ?Sized>(
    device: &mut D,
    source: &[u8],
    chunk: &Chunk,
    verifier: &mut Verifier,
    timeouts: &Timeouts,
) -> Result<bool> {
    let mut scratch = [0u8; MAX_PAGE_SIZE];
    let buf = scratch
        .get_mut(..chunk.len as usize)
        .ok_or(Error::BufferTooSmall)?;
    device.read_page(chunk.addr, buf, timeouts.read).await?;

    let expected = chunk.source(source)?;
    Ok(verifier.compare(chunk.offset, expected, buf))
}

/// Compare the whole request through the memory-mapped window
///
/// Returns `Ok(false)` if the device has no window.
///
/// # Errors
/// * `BufferTooSmall` - The window does not cover the whole request
#[maybe_async]
pub async fn verify_mapped<D: NvMemory + ?Sized>(
    device: &mut D,
    source: &[u8],
    request: &PassRequest,
    verifier: &mut Verifier,
    timeouts: &Timeouts,
) -> Result<bool> {
    if !device.enable_mapped_read(timeouts.read).await? {
        return Ok(false);
    }
    let len = request.len as usize;
    let Some(window) = device.mapped_window(request.target, len) else {
        return Ok(false);
    };
    if window.len() != len {
        return Err(Error::BufferTooSmall);
    }
    let expected = source.get(..len).ok_or(Error::AddressOutOfBounds)?;

    debug!(
        "Comparing {} bytes through the mapped window at 0x{:08X}",
        len, request.target
    );
    verifier.compare(0, expected, window);
    Ok(true)
}

/// Verify a request that has already been written
///
/// Reads back through the mapped window when `readback` asks for it and
/// the device has one, page by page otherwise.
#[maybe_async]
pub async fn verify<D: NvMemory + ?Sized>(
    device: &mut D,
    source: &[u8],
    geometry: &Geometry,
    request: &PassRequest,
    policy: VerifyPolicy,
    readback: Readback,
    timeouts: &Timeouts,
) -> Result<VerifyReport> {
    let mut verifier = Verifier::new(policy, geometry, request);

    if readback == Readback::Mapped && request.len > 0 {
        if verify_mapped(device, source, request, &mut verifier, timeouts).await? {
            return Ok(verifier.finish());
        }
        warn!("Device has no mapped window, reading back page by page");
    }

    for chunk in Chunks::new(geometry, request) {
        if !verify_chunk(device, source, &chunk, &mut verifier, timeouts).await? {
            break;
        }
    }

    Ok(verifier.finish())
}
