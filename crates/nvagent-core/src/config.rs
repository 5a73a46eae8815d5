//! Agent configuration
//!
//! Device geometry, the option set selecting between the observably
//! different agent contracts (status layout, verify policy, read-back path,
//! run mode), and decoding of the host's pass request.

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::status::{Status, StatusLayout, StatusWord};
use crate::verify::VerifyResult;

/// Program page of the external SPI NOR flash
pub const FLASH_PAGE_SIZE: u32 = 256;
/// Smallest erase unit of the external SPI NOR flash
pub const FLASH_SECTOR_SIZE: u32 = 4096;
/// Source buffer size for flash passes
pub const FLASH_BUFFER_SIZE: u32 = 4096;
/// EEPROM page (32 words)
pub const EEPROM_PAGE_SIZE: u32 = 128;
/// Source buffer size for EEPROM passes (64 pages)
pub const EEPROM_BUFFER_SIZE: u32 = 8192;
/// Largest page any supported device uses; sizes the read-back scratch buffer
pub const MAX_PAGE_SIZE: usize = 256;
/// Default busy-wait budget handed to each peripheral call
pub const DEFAULT_TIMEOUT: u32 = 100_000;

/// Granularity of the erase operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EraseUnit {
    /// Fixed-size sector; one erase per sector touched
    Sector(u32),
    /// The whole array is erased once before programming starts
    WholeArray,
}

/// Page and erase layout of a device class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    /// Program (and read-back) unit in bytes
    pub page_size: u32,
    /// Erase granularity
    pub erase_unit: EraseUnit,
    /// Size of the host-populated source buffer in bytes
    pub buffer_size: u32,
}

impl Geometry {
    /// W25-style SPI NOR flash behind the SPIFI controller
    pub const FLASH: Self = Self {
        page_size: FLASH_PAGE_SIZE,
        erase_unit: EraseUnit::Sector(FLASH_SECTOR_SIZE),
        buffer_size: FLASH_BUFFER_SIZE,
    };

    /// Internal EEPROM
    pub const EEPROM: Self = Self {
        page_size: EEPROM_PAGE_SIZE,
        erase_unit: EraseUnit::WholeArray,
        buffer_size: EEPROM_BUFFER_SIZE,
    };

    /// Number of pages in a full source buffer
    pub fn pages_per_buffer(&self) -> u32 {
        self.buffer_size / self.page_size
    }

    /// Check that pages tile sectors and the buffer
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size as usize > MAX_PAGE_SIZE {
            return Err(Error::InvalidConfig);
        }
        if self.buffer_size % self.page_size != 0 {
            return Err(Error::InvalidConfig);
        }
        if let EraseUnit::Sector(size) = self.erase_unit {
            if size < self.page_size || size % self.page_size != 0 {
                return Err(Error::InvalidConfig);
            }
        }
        Ok(())
    }
}

/// What to do after the first mismatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "std", derive(serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "kebab-case"))]
pub enum VerifyPolicy {
    /// Stop at the first mismatch and report it
    #[default]
    FailFast,
    /// Compare everything, log every mismatch, report the last one
    ///
    /// Reporting the last rather than the first mismatch mirrors the
    /// flash agents this replaces and may be an accident of their missing
    /// early exit. Hosts wanting the first location should use `FailFast`.
    ScanAll,
}

/// How written data is read back for comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "std", derive(serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "kebab-case"))]
pub enum Readback {
    /// Read each page through the peripheral right after programming it
    #[default]
    PerPage,
    /// Compare the whole range through the memory-mapped window afterwards
    Mapped,
}

/// Result code published when read-back does not match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "std", derive(serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "kebab-case"))]
pub enum CompareCode {
    /// MISMATCH (2), with the location in the extended layout
    #[default]
    Mismatch,
    /// BUS_ERROR (3), the code the mapped flash agent has always used
    /// for a failed compare
    BusError,
}

/// Behaviour after a pass has been reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "std", derive(serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "kebab-case"))]
pub enum RunMode {
    /// Park in the idle state until the debugger resets the core
    #[default]
    SingleShot,
    /// Wait for the host to trigger another pass with a fresh request
    Looping,
}

/// Meaning of the value the host leaves for the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "std", derive(serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "kebab-case"))]
pub enum RequestEncoding {
    /// Request register holds the device offset; the full buffer is written
    #[default]
    TargetOffset,
    /// Request register holds the number of bytes to write from offset 0
    ByteLength,
    /// Host pre-loads a START status word whose page count selects the length
    StartPageCount,
}

/// Busy-wait budgets handed to each peripheral call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeouts {
    /// Budget for sector and full erases
    pub erase: u32,
    /// Budget for page programs
    pub program: u32,
    /// Budget for page reads and mapped-mode setup
    pub read: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            erase: DEFAULT_TIMEOUT,
            program: DEFAULT_TIMEOUT,
            read: DEFAULT_TIMEOUT,
        }
    }
}

bitflags! {
    /// Compact selector for the agent contract
    ///
    /// Lets a build or the host pick the variant with a single word.
    /// Flags left clear select the default of each option.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AgentOptions: u32 {
        /// Keep comparing after a mismatch, report the last one
        const SCAN_ALL        = 1 << 0;
        /// Use the extended status word layout
        const EXTENDED_STATUS = 1 << 1;
        /// Wait for another trigger after reporting
        const LOOPING         = 1 << 2;
        /// Verify through the memory-mapped window
        const MAPPED_READBACK = 1 << 3;
        /// Publish a failed compare as BUS_ERROR
        const COMPARE_BUS_ERROR = 1 << 4;
    }
}

impl Default for AgentOptions {
    fn default() -> Self {
        AgentOptions::empty()
    }
}

/// Complete agent configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgentConfig {
    /// Device class geometry
    pub geometry: Geometry,
    /// Status word layout
    pub layout: StatusLayout,
    /// Mismatch policy
    pub policy: VerifyPolicy,
    /// Read-back path
    pub readback: Readback,
    /// Single-shot or looping
    pub mode: RunMode,
    /// How the pass request is encoded
    pub request: RequestEncoding,
    /// Code for a failed compare
    pub compare: CompareCode,
    /// Peripheral busy-wait budgets
    pub timeouts: Timeouts,
}

impl AgentConfig {
    /// Flash agent verifying through the mapped window after programming
    pub fn flash_mapped() -> Self {
        Self {
            geometry: Geometry::FLASH,
            layout: StatusLayout::Simple,
            policy: VerifyPolicy::ScanAll,
            readback: Readback::Mapped,
            mode: RunMode::Looping,
            request: RequestEncoding::TargetOffset,
            compare: CompareCode::BusError,
            timeouts: Timeouts::default(),
        }
    }

    /// Flash agent reading every page back right after programming it
    pub fn flash_readback() -> Self {
        Self {
            readback: Readback::PerPage,
            compare: CompareCode::Mismatch,
            ..Self::flash_mapped()
        }
    }

    /// EEPROM agent, length taken from the request register
    pub fn eeprom() -> Self {
        Self {
            geometry: Geometry::EEPROM,
            layout: StatusLayout::Simple,
            policy: VerifyPolicy::FailFast,
            readback: Readback::PerPage,
            mode: RunMode::SingleShot,
            request: RequestEncoding::ByteLength,
            compare: CompareCode::Mismatch,
            timeouts: Timeouts::default(),
        }
    }

    /// EEPROM agent with the extended status word and START page count
    pub fn eeprom_extended() -> Self {
        Self {
            layout: StatusLayout::Extended,
            request: RequestEncoding::StartPageCount,
            ..Self::eeprom()
        }
    }

    /// Apply an option set on top of this configuration
    pub fn with_options(mut self, options: AgentOptions) -> Self {
        self.policy = if options.contains(AgentOptions::SCAN_ALL) {
            VerifyPolicy::ScanAll
        } else {
            VerifyPolicy::FailFast
        };
        self.layout = if options.contains(AgentOptions::EXTENDED_STATUS) {
            StatusLayout::Extended
        } else {
            StatusLayout::Simple
        };
        self.mode = if options.contains(AgentOptions::LOOPING) {
            RunMode::Looping
        } else {
            RunMode::SingleShot
        };
        self.readback = if options.contains(AgentOptions::MAPPED_READBACK) {
            Readback::Mapped
        } else {
            Readback::PerPage
        };
        self.compare = if options.contains(AgentOptions::COMPARE_BUS_ERROR) {
            CompareCode::BusError
        } else {
            CompareCode::Mismatch
        };
        self
    }

    /// The option set equivalent to this configuration
    pub fn options(&self) -> AgentOptions {
        let mut options = AgentOptions::empty();
        options.set(AgentOptions::SCAN_ALL, self.policy == VerifyPolicy::ScanAll);
        options.set(
            AgentOptions::EXTENDED_STATUS,
            self.layout == StatusLayout::Extended,
        );
        options.set(AgentOptions::LOOPING, self.mode == RunMode::Looping);
        options.set(
            AgentOptions::MAPPED_READBACK,
            self.readback == Readback::Mapped,
        );
        options.set(
            AgentOptions::COMPARE_BUS_ERROR,
            self.compare == CompareCode::BusError,
        );
        options
    }

    /// Status published for a verify result
    pub fn verify_status(&self, result: &VerifyResult) -> Status {
        match (result, self.compare) {
            (VerifyResult::Mismatch(_), CompareCode::BusError) => Status::BusError,
            _ => result.status(),
        }
    }

    /// Check the combination is one the agent can run
    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;
        // The page count only exists in the extended START word
        if self.request == RequestEncoding::StartPageCount
            && self.layout != StatusLayout::Extended
        {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }
}

/// One pass worth of work, decoded from the host's request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassRequest {
    /// Device address the first source byte goes to
    pub target: u32,
    /// Bytes of the source buffer to write, a whole number of pages
    pub len: u32,
}

impl PassRequest {
    /// Request covering the whole source buffer at `target`
    pub fn full_buffer(geometry: &Geometry, target: u32) -> Self {
        Self {
            target,
            len: geometry.buffer_size,
        }
    }

    /// Decode the raw value the host left for the agent
    ///
    /// `raw` is the request register for `TargetOffset` and `ByteLength`,
    /// and the current status word for `StartPageCount`.
    ///
    /// # Errors
    /// * `InvalidAlignment` - Target offset is not on an erase unit boundary
    /// * `AddressOutOfBounds` - Length exceeds the buffer or the range wraps
    /// * `InvalidConfig` - No START word was found for `StartPageCount`
    pub fn decode(encoding: RequestEncoding, geometry: &Geometry, raw: u32) -> Result<Self> {
        let request = match encoding {
            RequestEncoding::TargetOffset => Self::full_buffer(geometry, raw),
            RequestEncoding::ByteLength => Self {
                target: 0,
                len: round_up(raw, geometry.page_size)?,
            },
            RequestEncoding::StartPageCount => {
                match StatusWord::from_raw(raw).decode(StatusLayout::Extended) {
                    Ok(Status::Start { page_count }) => Self {
                        target: 0,
                        len: page_count as u32 * geometry.page_size,
                    },
                    _ => return Err(Error::InvalidConfig),
                }
            }
        };
        request.check(geometry)?;
        Ok(request)
    }

    /// Number of program pages in this request
    pub fn page_count(&self, geometry: &Geometry) -> u32 {
        self.len / geometry.page_size
    }

    /// Check the request against the geometry
    pub fn check(&self, geometry: &Geometry) -> Result<()> {
        if self.len > geometry.buffer_size || self.len % geometry.page_size != 0 {
            return Err(Error::AddressOutOfBounds);
        }
        self.target
            .checked_add(self.len)
            .ok_or(Error::AddressOutOfBounds)?;
        let unit = match geometry.erase_unit {
            EraseUnit::Sector(size) => size,
            EraseUnit::WholeArray => geometry.page_size,
        };
        if self.target % unit != 0 {
            return Err(Error::InvalidAlignment);
        }
        Ok(())
    }
}

fn round_up(value: u32, unit: u32) -> Result<u32> {
    value
        .div_ceil(unit)
        .checked_mul(unit)
        .ok_or(Error::AddressOutOfBounds)
}
