//! Simulate command implementation
//!
//! Plays the host side of an upload. The image is cut into buffer-sized
//! passes covering only the blocks it has data in, with the gaps filled
//! with 0x00. Each pass is written to target RAM over the debug link, the
//! agent is released and the status word polled; the first failed pass
//! ends the upload.

use std::collections::VecDeque;
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use nvagent_core::board::{BoardProfile, DeviceClass};
use nvagent_core::config::{AgentConfig, AgentOptions, RequestEncoding, RunMode};
use nvagent_core::controller::RunController;
use nvagent_core::hal::NvMemory;
use nvagent_core::mmio::{Addresses, MemoryMappedIo};
use nvagent_core::status::{Status, StatusLayout, StatusWord};
use nvagent_dummy::{DummyConfig, DummyEeprom, DummyFlash, TargetRam, Trigger};

use crate::cli::{DeviceArg, SimulateArgs};
use crate::image::Image;

/// Default emulated flash size (W25Q32)
const FLASH_SIZE: usize = 4 * 1024 * 1024;

/// Errors specific to the simulated upload
#[derive(Debug, thiserror::Error)]
pub enum SimulateError {
    /// Nothing to write
    #[error("input image is empty")]
    EmptyImage,
    /// Only offset requests can be split over several passes
    #[error("image of {len} bytes does not fit the {buffer} byte buffer of a single pass")]
    ImageTooLarge {
        /// Bytes from offset 0 to the end of the image
        len: u64,
        /// Source buffer size
        buffer: u32,
    },
    /// The agent reported something other than OK
    #[error("pass {pass} at 0x{target:08X} failed: {status}")]
    PassFailed {
        /// Zero-based pass number
        pass: usize,
        /// Device address of the pass
        target: u32,
        /// Decoded final status
        status: Status,
    },
    /// The agent never wrote a final status
    #[error("agent stopped after {done} of {planned} passes")]
    Incomplete {
        /// Passes that reported
        done: usize,
        /// Passes planned
        planned: usize,
    },
}

/// One host release of the agent
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pass {
    /// Device address the data lands at
    target: u32,
    /// Value for the request register
    request: u32,
    /// START word the host pre-loads, for page-count requests
    status: Option<StatusWord>,
    /// Source buffer contents
    data: Vec<u8>,
}

/// Split `image` into passes the way the host tools do
///
/// Offset requests get one full buffer per block that holds image data, at
/// ascending addresses; blocks without data are skipped. Length and
/// page-count requests always start at offset 0 and must fit one pass.
fn plan(config: &AgentConfig, image: &Image) -> Result<Vec<Pass>, SimulateError> {
    if image.is_empty() {
        return Err(SimulateError::EmptyImage);
    }
    let geometry = config.geometry;
    let buffer = geometry.buffer_size;

    if config.request == RequestEncoding::TargetOffset {
        return Ok(image
            .blocks(buffer)
            .into_iter()
            .map(|target| {
                let mut data = vec![0x00; buffer as usize];
                image.copy_into(target, &mut data);
                Pass {
                    target,
                    request: target,
                    status: None,
                    data,
                }
            })
            .collect());
    }

    let end = image.end();
    if end > buffer as u64 {
        return Err(SimulateError::ImageTooLarge { len: end, buffer });
    }
    let mut data = vec![0x00; end as usize];
    image.copy_into(0, &mut data);

    let len = end as u32;
    let pass = match config.request {
        RequestEncoding::StartPageCount => {
            let page_count = len.div_ceil(geometry.page_size) as u8;
            Pass {
                target: 0,
                request: 0,
                status: Some(StatusWord::encode(
                    StatusLayout::Extended,
                    &Status::Start { page_count },
                )),
                data,
            }
        }
        _ => Pass {
            target: 0,
            request: len,
            status: None,
            data,
        },
    };
    Ok(vec![pass])
}

/// Write a pass into target RAM over the debug link
fn stage(ram: &mut TargetRam, pass: &Pass) -> nvagent_core::error::Result<()> {
    let addresses = ram.addresses();
    ram.write_memory(addresses.buffer, &pass.data)?;
    ram.write_word(addresses.request(), pass.request)?;
    if let Some(word) = pass.status {
        ram.write_word(addresses.status(), word.raw())?;
    }
    Ok(())
}

/// Target RAM plus the host watching it
///
/// Advances the progress bar whenever a pass reports and stops releasing a
/// looping agent once a pass failed.
struct HostIo<'a> {
    ram: TargetRam,
    layout: StatusLayout,
    bar: &'a ProgressBar,
    sizes: VecDeque<u64>,
}

impl HostIo<'_> {
    fn pass_reported(&mut self) -> bool {
        if let Some(size) = self.sizes.pop_front() {
            self.bar.inc(size);
        }
        let status = self.ram.addresses().status();
        match self.ram.read_word(status) {
            Ok(raw) => matches!(StatusWord::from_raw(raw).decode(self.layout), Ok(Status::Ok)),
            Err(e) => {
                log::warn!("Could not read the status word at 0x{:08X}: {}", status, e);
                false
            }
        }
    }
}

impl MemoryMappedIo for HostIo<'_> {
    fn source(&self) -> &[u8] {
        self.ram.source()
    }

    fn read_status(&self) -> StatusWord {
        self.ram.read_status()
    }

    fn write_status(&mut self, word: StatusWord) {
        self.ram.write_status(word)
    }

    fn read_request_register(&self) -> u32 {
        self.ram.read_request_register()
    }

    fn read_options(&self) -> Option<AgentOptions> {
        self.ram.read_options()
    }

    fn await_trigger(&mut self) -> bool {
        if !self.pass_reported() {
            log::debug!("Host saw a failed pass, not releasing the agent again");
            return false;
        }
        self.ram.await_trigger()
    }
}

fn create_progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

/// Run every pass on `device` and return the final word of each
fn drive<D: NvMemory>(
    device: D,
    config: AgentConfig,
    addresses: Option<Addresses>,
    passes: &[Pass],
    bar: &ProgressBar,
) -> Result<(D, Vec<StatusWord>), Box<dyn std::error::Error>> {
    let buffer = config.geometry.buffer_size as usize;
    let ram = match addresses {
        Some(addresses) => TargetRam::with_addresses(buffer, addresses),
        None => TargetRam::new(buffer),
    };
    let mut io = HostIo {
        ram,
        layout: config.layout,
        bar,
        sizes: passes.iter().map(|p| p.data.len() as u64).collect(),
    };

    let Some((first, rest)) = passes.split_first() else {
        return Ok((device, Vec::new()));
    };
    stage(&mut io.ram, first)?;

    let mut agent = RunController::new(device, io, config);
    match config.mode {
        RunMode::Looping => {
            for pass in rest {
                agent.io_mut().ram.queue_trigger(Trigger {
                    status: pass.status,
                    ..Trigger::with_data(pass.request, pass.data.clone())
                });
            }
            let halt = agent.run();
            log::debug!("Looping agent parked after {} passes", halt.passes);
        }
        RunMode::SingleShot => {
            for (i, pass) in passes.iter().enumerate() {
                if i > 0 {
                    // Debugger resets the core and reloads RAM
                    agent.reset();
                    stage(&mut agent.io_mut().ram, pass)?;
                }
                agent.run();
                if !agent.io_mut().pass_reported() {
                    break;
                }
            }
        }
    }

    let finals = agent
        .io()
        .ram
        .status_history()
        .iter()
        .copied()
        .filter(|word| !word.is_busy())
        .collect();
    let (device, _) = agent.into_parts();
    Ok((device, finals))
}

/// Check the final word of every pass
fn check_passes(
    layout: StatusLayout,
    passes: &[Pass],
    finals: &[StatusWord],
) -> Result<(), Box<dyn std::error::Error>> {
    for (i, (pass, word)) in passes.iter().zip(finals).enumerate() {
        let status = word.decode(layout)?;
        log::debug!("Pass {} at 0x{:08X}: {} ({})", i, pass.target, word, status);
        if status != Status::Ok {
            return Err(SimulateError::PassFailed {
                pass: i,
                target: pass.target,
                status,
            }
            .into());
        }
    }
    if finals.len() < passes.len() {
        return Err(SimulateError::Incomplete {
            done: finals.len(),
            planned: passes.len(),
        }
        .into());
    }
    Ok(())
}

fn dump(path: &Path, data: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::write(path, data)?;
    println!("Wrote {} bytes of device contents to {:?}", data.len(), path);
    Ok(())
}

/// Agent setup for one simulated upload
struct Setup {
    device: DeviceClass,
    config: AgentConfig,
    /// Board placement of the buffer and control block, if a profile gave one
    addresses: Option<Addresses>,
}

/// Build the agent configuration from the board profile or the flags
fn build_config(args: &SimulateArgs) -> Result<Setup, Box<dyn std::error::Error>> {
    let mut flags = AgentOptions::empty();
    flags.set(AgentOptions::SCAN_ALL, args.scan_all);
    flags.set(AgentOptions::EXTENDED_STATUS, args.extended);
    flags.set(AgentOptions::MAPPED_READBACK, args.mapped);
    flags.set(AgentOptions::LOOPING, args.looping);
    flags.set(AgentOptions::COMPARE_BUS_ERROR, args.compare_bus_error);

    match &args.board {
        Some(path) => {
            let profile = BoardProfile::from_toml_file(path)?;
            log::info!(
                "Using board profile {}",
                profile.name.as_deref().unwrap_or("(unnamed)")
            );
            Ok(Setup {
                device: profile.device,
                config: profile.config.with_options(profile.config.options() | flags),
                addresses: Some(profile.addresses),
            })
        }
        None => {
            let device = match args.device {
                DeviceArg::Flash => DeviceClass::Flash,
                DeviceArg::Eeprom => DeviceClass::Eeprom,
            };
            Ok(Setup {
                device,
                config: device.preset().with_options(flags),
                addresses: None,
            })
        }
    }
}

/// Write an image through the agent running on an emulated device
pub fn run_simulate(args: &SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let image = Image::load(&args.input, args.address)?;
    println!(
        "Read {} bytes in {} segment(s) from {:?}",
        image.len(),
        image.segment_count(),
        args.input
    );

    let Setup {
        device,
        config,
        addresses,
    } = build_config(args)?;
    log::info!(
        "Agent options: {:?} {:?} {:?} {:?}",
        config.layout,
        config.policy,
        config.readback,
        config.mode
    );

    let passes = plan(&config, &image)?;
    let total: u64 = passes.iter().map(|p| p.data.len() as u64).sum();
    let bar = create_progress_bar(total);
    bar.set_message(format!("{} pass(es)", passes.len()));

    let finals = match device {
        DeviceClass::Flash => {
            let end = passes
                .last()
                .map_or(0, |p| p.target as usize + p.data.len());
            let mut flash = DummyFlash::new(DummyConfig {
                size: FLASH_SIZE.max(end.next_power_of_two()),
                ..Default::default()
            });
            for &(addr, value) in &args.stuck {
                flash.inject_stuck_byte(addr, value);
            }
            let (flash, finals) = drive(flash, config, addresses, &passes, &bar)?;
            log::info!("Flash busy for {} ticks", flash.ticks());
            if let Some(path) = &args.dump {
                dump(path, flash.data())?;
            }
            finals
        }
        DeviceClass::Eeprom => {
            let mut eeprom = DummyEeprom::new_default();
            for &(addr, value) in &args.stuck {
                eeprom.inject_stuck_byte(addr, value);
            }
            let (eeprom, finals) = drive(eeprom, config, addresses, &passes, &bar)?;
            log::info!("EEPROM busy for {} ticks", eeprom.ticks());
            if let Some(path) = &args.dump {
                dump(path, eeprom.data())?;
            }
            finals
        }
    };

    match check_passes(config.layout, &passes, &finals) {
        Ok(()) => {
            bar.finish_with_message("done");
            println!(
                "Wrote and verified {} bytes in {} pass(es)",
                total,
                passes.len()
            );
            Ok(())
        }
        Err(e) => {
            bar.abandon_with_message("failed");
            Err(e)
        }
    }
}
