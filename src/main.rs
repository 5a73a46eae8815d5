//! nvagent - host side of the in-target programming agent
//!
//! The agent itself lives in `nvagent-core` and runs on the target. This
//! binary is what a developer uses next to it:
//!
//! - **decode** turns a status word read over the debug link into a
//!   readable verdict
//! - **simulate** runs the agent against the emulated flash or EEPROM from
//!   `nvagent-dummy`, feeding it a binary or Intel HEX image pass by pass
//!   exactly as the upload tooling does, so option combinations and board profiles can be
//!   tried without hardware

mod cli;
mod commands;
mod image;

use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Verbosity picks the default filter, RUST_LOG still overrides it
    let default_filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::Decode { word, layout } => commands::run_decode(word, layout.into()),
        Commands::Simulate(args) => commands::run_simulate(&args),
    }
}
