//! Status word codec
//!
//! The status word is the only channel from the agent back to the host: a
//! single 32-bit location the debugger polls. Two layouts exist.
//!
//! ```text
//! Simple   | 31 ............................ 8 | 7 .. 0 |
//!          |             unused (0)           |  code  |
//!
//! Extended | 31 .. 24 | 23 .. 16 | 15 .. 8 | 7 .. 0 |
//!  MISMATCH|  value   |   byte   |  page   |  code  |
//!  START   |    0     |    0     |0|count  |  code  |
//! ```
//!
//! Encoding never fails: fields wider than their slot are masked. Callers
//! are expected to hand in values that fit.

use core::fmt;

use crate::error::{Error, Result};

/// Bit offset of the page index in an extended MISMATCH word
const PAGE_SHIFT: u32 = 8;
/// Bit offset of the byte offset in an extended MISMATCH word
const BYTE_SHIFT: u32 = 16;
/// Bit offset of the read-back value in an extended MISMATCH word
const VALUE_SHIFT: u32 = 24;
/// Bit offset of the page count in an extended START word
const PAGE_COUNT_SHIFT: u32 = 8;
/// Page count occupies bits 8..=14
const PAGE_COUNT_MASK: u32 = 0x7F;
const CODE_MASK: u32 = 0xFF;
const FIELD_MASK: u32 = 0xFF;

/// Result code stored in the low byte of the status word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultCode {
    /// Pass finished and every byte matched
    Ok = 0,
    /// Pass in progress (sentinel), or a host request in the extended layout
    Start = 1,
    /// Read-back data differs from the source buffer
    Mismatch = 2,
    /// Peripheral failure, timeout, or a request the agent cannot run
    BusError = 3,
}

impl ResultCode {
    /// Parse a raw result code
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::Start),
            2 => Some(Self::Mismatch),
            3 => Some(Self::BusError),
            _ => None,
        }
    }
}

/// Which of the two status word layouts is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "std", derive(serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "kebab-case"))]
pub enum StatusLayout {
    /// Low byte carries the result code only
    #[default]
    Simple,
    /// Mismatch location and START page count are packed in the upper bytes
    Extended,
}

/// Location of a mismatch as carried by the extended layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MismatchDetail {
    /// Page index relative to the start of the pass
    pub page: u8,
    /// Byte offset within that page
    pub byte: u8,
    /// Value read back from the device
    pub actual: u8,
}

/// Decoded status word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Pass finished without mismatches
    Ok,
    /// Pass in progress, or host request with the number of valid pages
    Start {
        /// Pages of the source buffer to write (extended layout only)
        page_count: u8,
    },
    /// Data mismatch; details are present in the extended layout only
    Mismatch(Option<MismatchDetail>),
    /// Peripheral error or timeout
    BusError,
}

impl Status {
    /// The result code this status encodes to
    pub fn code(&self) -> ResultCode {
        match self {
            Self::Ok => ResultCode::Ok,
            Self::Start { .. } => ResultCode::Start,
            Self::Mismatch(_) => ResultCode::Mismatch,
            Self::BusError => ResultCode::BusError,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Start { page_count } => write!(f, "START ({} pages)", page_count),
            Self::Mismatch(Some(d)) => write!(
                f,
                "MISMATCH at page {} byte {} (read 0x{:02X})",
                d.page, d.byte, d.actual
            ),
            Self::Mismatch(None) => write!(f, "MISMATCH"),
            Self::BusError => write!(f, "BUS ERROR"),
        }
    }
}

/// Packed 32-bit status word as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct StatusWord(u32);

impl StatusWord {
    /// Sentinel published when a pass starts (simple layout)
    pub const BUSY: Self = Self(ResultCode::Start as u32);

    /// Wrap a raw value read from the status location
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw value to store in the status location
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Low byte of the word
    pub const fn code_byte(self) -> u8 {
        (self.0 & CODE_MASK) as u8
    }

    /// Whether the word still holds the in-progress sentinel
    pub const fn is_busy(self) -> bool {
        self.code_byte() == ResultCode::Start as u8
    }

    /// Pack a status into a word using the given layout
    pub fn encode(layout: StatusLayout, status: &Status) -> Self {
        let code = status.code() as u32;
        let upper = match (layout, status) {
            (StatusLayout::Simple, _) => 0,
            (StatusLayout::Extended, Status::Start { page_count }) => {
                (*page_count as u32 & PAGE_COUNT_MASK) << PAGE_COUNT_SHIFT
            }
            (StatusLayout::Extended, Status::Mismatch(Some(d))) => {
                ((d.page as u32 & FIELD_MASK) << PAGE_SHIFT)
                    | ((d.byte as u32 & FIELD_MASK) << BYTE_SHIFT)
                    | ((d.actual as u32 & FIELD_MASK) << VALUE_SHIFT)
            }
            (StatusLayout::Extended, _) => 0,
        };
        Self(code | upper)
    }

    /// Unpack a word using the given layout
    ///
    /// # Errors
    /// * `UnknownResultCode` - If the low byte is not a known result code
    pub fn decode(self, layout: StatusLayout) -> Result<Status> {
        let code = ResultCode::from_u8(self.code_byte())
            .ok_or(Error::UnknownResultCode(self.code_byte()))?;

        let status = match (code, layout) {
            (ResultCode::Ok, _) => Status::Ok,
            (ResultCode::BusError, _) => Status::BusError,
            (ResultCode::Start, StatusLayout::Simple) => Status::Start { page_count: 0 },
            (ResultCode::Start, StatusLayout::Extended) => Status::Start {
                page_count: ((self.0 >> PAGE_COUNT_SHIFT) & PAGE_COUNT_MASK) as u8,
            },
            (ResultCode::Mismatch, StatusLayout::Simple) => Status::Mismatch(None),
            (ResultCode::Mismatch, StatusLayout::Extended) => {
                Status::Mismatch(Some(MismatchDetail {
                    page: ((self.0 >> PAGE_SHIFT) & FIELD_MASK) as u8,
                    byte: ((self.0 >> BYTE_SHIFT) & FIELD_MASK) as u8,
                    actual: ((self.0 >> VALUE_SHIFT) & FIELD_MASK) as u8,
                }))
            }
        };

        Ok(status)
    }
}

impl From<StatusWord> for u32 {
    fn from(word: StatusWord) -> Self {
        word.0
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}
