//! Error types for nvagent-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate. Data mismatches are not errors: they are the
//! regular outcome of a verify pass and travel in [`crate::verify::VerifyReport`].

use core::fmt;

/// Peripheral operation that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HalOp {
    /// Single erase unit (sector or page)
    EraseSector,
    /// Whole-array erase
    EraseAll,
    /// Page program
    ProgramPage,
    /// Page read-back
    ReadPage,
    /// Switching the controller into memory-mapped read mode
    MapForRead,
}

impl fmt::Display for HalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EraseSector => write!(f, "sector erase"),
            Self::EraseAll => write!(f, "full erase"),
            Self::ProgramPage => write!(f, "page program"),
            Self::ReadPage => write!(f, "page read"),
            Self::MapForRead => write!(f, "memory-mapped read setup"),
        }
    }
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Peripheral errors
    /// A peripheral operation did not finish within its busy-wait budget
    Timeout {
        /// Operation that timed out
        op: HalOp,
        /// Device address of the operation
        addr: u32,
    },
    /// The peripheral reported a failure other than a timeout
    Device {
        /// Operation that failed
        op: HalOp,
        /// Device address of the operation
        addr: u32,
    },

    // Request errors
    /// Requested range is beyond the source buffer or the device
    AddressOutOfBounds,
    /// Target address is not aligned to the erase unit
    InvalidAlignment,
    /// Provided buffer is too small for the operation
    BufferTooSmall,
    /// Geometry or options are inconsistent
    InvalidConfig,

    // Status word errors
    /// Status word carries a result code this agent never writes
    UnknownResultCode(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { op, addr } => {
                write!(f, "{} at 0x{:08X} timed out", op, addr)
            }
            Self::Device { op, addr } => {
                write!(f, "{} at 0x{:08X} failed", op, addr)
            }
            Self::AddressOutOfBounds => write!(f, "address out of bounds"),
            Self::InvalidAlignment => write!(f, "invalid alignment"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::InvalidConfig => write!(f, "invalid agent configuration"),
            Self::UnknownResultCode(code) => {
                write!(f, "unknown status result code 0x{:02X}", code)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
