//! TOML board profiles
//!
//! A board profile names the device class, the agent options and where the
//! agent's shared memory lives in target RAM:
//!
//! ```toml
//! [board]
//! name = "devboard-w25q32"
//! device = "flash"
//!
//! [agent]
//! policy = "scan-all"
//! readback = "mapped"
//! mode = "looping"
//!
//! compare = "bus-error"
//!
//! [memory]
//! buffer = 0x20000000
//! mailbox = 0x20001000
//!
//! [timeouts]
//! erase = 200000
//! ```
//!
//! Everything in `[agent]` and `[timeouts]` is optional and falls back to
//! the preset of the device class. Numbers may be written in decimal or as
//! `0x` hex strings.

use std::fs;
use std::path::Path;
use std::string::String;
use std::format;

use crate::config::{AgentConfig, CompareCode, Readback, RequestEncoding, RunMode, VerifyPolicy};
use crate::mmio::{Addresses, Mailbox};
use crate::status::StatusLayout;

/// Errors from loading a board profile
#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    /// Profile file could not be read
    #[error("failed to read board profile: {0}")]
    Io(#[from] std::io::Error),
    /// Profile is not valid TOML or has unknown fields
    #[error("failed to parse board profile: {0}")]
    Parse(#[from] toml::de::Error),
    /// The agent options do not form a runnable configuration
    #[error("invalid agent configuration: {0}")]
    Config(#[from] crate::error::Error),
    /// A shared-memory address is not word aligned
    #[error("{name} address 0x{addr:08X} is not 4-byte aligned")]
    Misaligned {
        /// Field name
        name: &'static str,
        /// Offending address
        addr: u32,
    },
    /// Source buffer and mailbox overlap
    #[error("mailbox at 0x{mailbox:08X} overlaps the source buffer")]
    Overlap {
        /// Mailbox address
        mailbox: u32,
    },
}

/// Device the agent programs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceClass {
    /// External SPI NOR flash
    Flash,
    /// Internal EEPROM
    Eeprom,
}

impl DeviceClass {
    /// Preset configuration for this device class
    pub fn preset(self) -> AgentConfig {
        match self {
            Self::Flash => AgentConfig::flash_mapped(),
            Self::Eeprom => AgentConfig::eeprom(),
        }
    }
}

/// A parsed board profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardProfile {
    /// Board name
    pub name: Option<String>,
    /// Device class
    pub device: DeviceClass,
    /// Agent configuration with the overrides applied
    pub config: AgentConfig,
    /// Shared memory placement
    pub addresses: Addresses,
}

#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlProfile {
    board: TomlBoard,
    #[serde(default)]
    agent: TomlAgent,
    memory: TomlMemory,
    #[serde(default)]
    timeouts: TomlTimeouts,
}

#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlBoard {
    name: Option<String>,
    device: DeviceClass,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlAgent {
    layout: Option<StatusLayout>,
    policy: Option<VerifyPolicy>,
    readback: Option<Readback>,
    mode: Option<RunMode>,
    request: Option<RequestEncoding>,
    compare: Option<CompareCode>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlMemory {
    #[serde(deserialize_with = "deserialize_hex_u32")]
    buffer: u32,
    #[serde(deserialize_with = "deserialize_hex_u32")]
    mailbox: u32,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlTimeouts {
    #[serde(default, deserialize_with = "deserialize_opt_hex_u32")]
    erase: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_opt_hex_u32")]
    program: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_opt_hex_u32")]
    read: Option<u32>,
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum HexOrInt {
    Int(u32),
    Str(String),
}

impl HexOrInt {
    fn value(self) -> Result<u32, String> {
        match self {
            HexOrInt::Int(n) => Ok(n),
            HexOrInt::Str(s) => parse_number(&s),
        }
    }
}

/// Deserialize a u32 that can be hex (0x...) or decimal
fn deserialize_hex_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    HexOrInt::deserialize(deserializer)?
        .value()
        .map_err(serde::de::Error::custom)
}

fn deserialize_opt_hex_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_hex_u32(deserializer).map(Some)
}

/// Parse a number that can be hex (0x...) or decimal
pub fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim().replace('_', "");
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

impl BoardProfile {
    /// Load a profile from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, BoardError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse a profile from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, BoardError> {
        let file: TomlProfile = toml::from_str(content)?;

        let mut config = file.board.device.preset();
        let agent = file.agent;
        config.layout = agent.layout.unwrap_or(config.layout);
        config.policy = agent.policy.unwrap_or(config.policy);
        config.readback = agent.readback.unwrap_or(config.readback);
        config.mode = agent.mode.unwrap_or(config.mode);
        config.request = agent.request.unwrap_or(config.request);
        config.compare = agent.compare.unwrap_or(config.compare);

        let timeouts = file.timeouts;
        config.timeouts.erase = timeouts.erase.unwrap_or(config.timeouts.erase);
        config.timeouts.program = timeouts.program.unwrap_or(config.timeouts.program);
        config.timeouts.read = timeouts.read.unwrap_or(config.timeouts.read);
        config.validate()?;

        let addresses = Addresses {
            buffer: file.memory.buffer,
            mailbox: file.memory.mailbox,
        };
        check_addresses(&addresses, config.geometry.buffer_size)?;
        log::debug!(
            "Board {}: buffer at 0x{:08X}, status word at 0x{:08X}",
            file.board.name.as_deref().unwrap_or("(unnamed)"),
            addresses.buffer,
            addresses.status()
        );

        Ok(Self {
            name: file.board.name,
            device: file.board.device,
            config,
            addresses,
        })
    }
}

fn check_addresses(addresses: &Addresses, buffer_size: u32) -> Result<(), BoardError> {
    for (name, addr) in [("buffer", addresses.buffer), ("mailbox", addresses.mailbox)] {
        if addr % 4 != 0 {
            return Err(BoardError::Misaligned { name, addr });
        }
    }

    let buffer = addresses.buffer as u64..addresses.buffer as u64 + buffer_size as u64;
    let mailbox = addresses.mailbox as u64..addresses.mailbox as u64 + Mailbox::SIZE as u64;
    if buffer.start < mailbox.end && mailbox.start < buffer.end {
        return Err(BoardError::Overlap {
            mailbox: addresses.mailbox,
        });
    }
    Ok(())
}
