//! CLI command implementations
//!
//! - `decode` unpacks a status word the way a host polling the agent would
//! - `simulate` plays the host's upload flow against the emulated devices

mod decode;
mod simulate;

pub use decode::run_decode;
pub use simulate::run_simulate;
