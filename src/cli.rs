//! CLI argument parsing

use clap::{Parser, Subcommand, ValueEnum};
use nvagent_core::status::StatusLayout;
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
pub fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse `ADDR=VALUE`, both hex or decimal
fn parse_stuck_byte(s: &str) -> Result<(u32, u8), String> {
    let (addr, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected ADDR=VALUE, got '{}'", s))?;
    let value = parse_hex_u32(value)?;
    let value = u8::try_from(value).map_err(|_| format!("Value 0x{:X} does not fit a byte", value))?;
    Ok((parse_hex_u32(addr)?, value))
}

#[derive(Parser)]
#[command(name = "nvagent")]
#[command(author, version, about = "In-target programming agent simulator", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Status word layout
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutArg {
    /// Result code only
    Simple,
    /// Result code plus mismatch location / page count
    Extended,
}

impl From<LayoutArg> for StatusLayout {
    fn from(layout: LayoutArg) -> Self {
        match layout {
            LayoutArg::Simple => StatusLayout::Simple,
            LayoutArg::Extended => StatusLayout::Extended,
        }
    }
}

/// Emulated device class
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceArg {
    /// SPI NOR flash (256 B pages, 4 KiB sectors)
    Flash,
    /// EEPROM (128 B pages, whole-array erase)
    Eeprom,
}

/// Options of the simulate command
#[derive(clap::Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Image to write: raw binary, or Intel HEX when named `*.hex`
    #[arg(short, long)]
    pub input: PathBuf,

    /// Device to emulate (ignored with --board)
    #[arg(short, long, value_enum, default_value_t = DeviceArg::Flash)]
    pub device: DeviceArg,

    /// Board profile (TOML) selecting device and agent options
    #[arg(short, long)]
    pub board: Option<PathBuf>,

    /// Device offset of the first byte of a raw binary
    #[arg(short, long, value_parser = parse_hex_u32, default_value = "0")]
    pub address: u32,

    /// Keep comparing after a mismatch and report the last one
    #[arg(long)]
    pub scan_all: bool,

    /// Use the extended status word layout
    #[arg(long)]
    pub extended: bool,

    /// Verify through the memory-mapped window
    #[arg(long)]
    pub mapped: bool,

    /// Keep the agent running between passes instead of restarting it
    #[arg(long)]
    pub looping: bool,

    /// Report a failed compare as BUS_ERROR (3) instead of MISMATCH (2)
    #[arg(long)]
    pub compare_bus_error: bool,

    /// Make a device byte stuck at a value (ADDR=VALUE, repeatable)
    #[arg(long, value_parser = parse_stuck_byte)]
    pub stuck: Vec<(u32, u8)>,

    /// Write the device contents to this file afterwards
    #[arg(long)]
    pub dump: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decode a raw status word
    Decode {
        /// Status word (hex or decimal)
        #[arg(value_parser = parse_hex_u32)]
        word: u32,

        /// Layout to decode with
        #[arg(short, long, value_enum, default_value_t = LayoutArg::Simple)]
        layout: LayoutArg,
    },

    /// Run the agent against an emulated device, pass by pass like a host would
    Simulate(SimulateArgs),
}
