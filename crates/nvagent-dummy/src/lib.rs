//! nvagent-dummy - In-memory device emulators for the agent
//!
//! This crate provides emulated peripherals and target RAM so the agent can
//! run on the host without hardware:
//!
//! - [`DummyFlash`] - SPI NOR flash behind a SPIFI-style controller, with a
//!   memory-mapped read window
//! - [`DummyEeprom`] - page-organised EEPROM with word-aligned accesses
//! - [`TargetRam`] - source buffer plus [`Mailbox`], the region the host
//!   and the agent share
//!
//! Both devices record every call in an [`Operation`] log, charge a
//! configurable number of busy ticks per operation against the caller's
//! timeout budget, and support fault injection (stuck bytes, one-shot
//! device errors).
//!
//! [`Mailbox`]: nvagent_core::mmio::Mailbox

#![no_std]

extern crate alloc;

mod cells;
mod eeprom;
mod flash;
mod target;

pub use eeprom::{DummyEeprom, EepromConfig};
pub use flash::{erased_sectors, DummyConfig, DummyFlash};
pub use target::{TargetRam, Trigger, RAM_BASE};

use nvagent_core::error::HalOp;

/// Busy ticks an operation takes before the device reports ready
///
/// An operation whose cost exceeds the timeout budget handed in by the
/// agent fails with `Error::Timeout`, as a real busy poll would.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Ticks per erase (sector or whole array)
    pub erase: u32,
    /// Ticks per page program
    pub program: u32,
    /// Ticks per page read or mapped-mode switch
    pub read: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            erase: 400,
            program: 30,
            read: 1,
        }
    }
}

/// Call recorded by an emulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Sector (or page) erase at the aligned address
    EraseSector(u32),
    /// Whole-array erase
    EraseAll,
    /// Page program: address and length
    Program(u32, usize),
    /// Page read: address and length
    Read(u32, usize),
    /// Switch into memory-mapped read mode
    MapRead,
}

impl Operation {
    /// The HAL operation this record belongs to
    pub fn hal_op(&self) -> HalOp {
        match self {
            Self::EraseSector(_) => HalOp::EraseSector,
            Self::EraseAll => HalOp::EraseAll,
            Self::Program(..) => HalOp::ProgramPage,
            Self::Read(..) => HalOp::ReadPage,
            Self::MapRead => HalOp::MapForRead,
        }
    }
}
