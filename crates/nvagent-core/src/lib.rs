//! nvagent-core - In-target erase/program/verify agent
//!
//! This crate holds the logic of a small programming agent that runs on a
//! microcontroller under debugger control. The host pre-loads a source
//! buffer and a pass request into target RAM, releases the core, and polls
//! a single 32-bit status word until the agent reports the outcome.
//!
//! The agent is split into four layers:
//!
//! - [`status`] - packs and unpacks the status word the host polls
//! - [`chunk`] - walks the source buffer in program pages and issues the
//!   erase/program calls
//! - [`verify`] - re-reads the written data and locates mismatches
//! - [`controller`] - runs whole passes, single-shot or looping
//!
//! Peripheral access is abstracted by [`hal::NvMemory`] and the shared
//! memory region by [`mmio::MemoryMappedIo`], so the same code drives real
//! hardware and the emulators in `nvagent-dummy`.
//!
//! # Features
//!
//! - `std` - Enable standard library support and TOML board profiles
//! - `is_sync` - Compile the HAL traits and the agent as blocking code
//!
//! # Example
//!
//! ```ignore
//! use nvagent_core::config::AgentConfig;
//! use nvagent_core::controller::RunController;
//!
//! let mut agent = RunController::new(device, io, AgentConfig::flash_readback());
//! let halt = agent.run();
//! log::info!("agent parked after {} passes", halt.passes);
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
// Allow async fn in traits - we use maybe-async for dual sync/async support
#![allow(async_fn_in_trait)]

#[cfg(any(feature = "std", test))]
extern crate std;

#[cfg(feature = "std")]
pub mod board;
pub mod chunk;
pub mod config;
pub mod controller;
pub mod error;
pub mod hal;
pub mod mmio;
#[cfg(test)]
mod mock;
pub mod status;
pub mod verify;

pub use error::{Error, Result};
