//! End-to-end passes of the agent against the emulated devices

use nvagent_core::config::{AgentConfig, AgentOptions, RunMode, VerifyPolicy, DEFAULT_TIMEOUT};
use nvagent_core::controller::{RunController, State};
use nvagent_core::error::{Error, HalOp};
use nvagent_core::hal::NvMemory;
use nvagent_core::status::{MismatchDetail, Status, StatusLayout, StatusWord};
use nvagent_dummy::{
    erased_sectors, DummyConfig, DummyEeprom, DummyFlash, Operation, TargetRam, Timing, Trigger,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn single_shot(mut config: AgentConfig) -> AgentConfig {
    config.mode = RunMode::SingleShot;
    config
}

#[test]
fn test_flash_sector_at_0x1000() {
    init_logging();
    let mut ram = TargetRam::new(4096);
    ram.load(&[0xAA; 4096]).unwrap();
    ram.set_request(0x1000);

    let config = single_shot(AgentConfig::flash_readback());
    let mut agent = RunController::new(DummyFlash::new_default(), ram, config);
    let halt = agent.run();

    assert_eq!(halt.last, StatusWord::from_raw(0));
    assert_eq!(agent.state(), State::Idle);

    let flash = agent.device();
    assert_eq!(erased_sectors(flash.operations()), [0x1000]);
    let programs: Vec<u32> = flash
        .operations()
        .iter()
        .filter_map(|op| match op {
            Operation::Program(addr, 256) => Some(*addr),
            _ => None,
        })
        .collect();
    assert_eq!(programs, (0..16u32).map(|i| 0x1000 + i * 256).collect::<Vec<_>>());
    assert!(flash.data()[0x1000..0x2000].iter().all(|&b| b == 0xAA));
    assert!(flash.data()[..0x1000].iter().all(|&b| b == 0xFF));

    assert_eq!(
        agent.io().status_history(),
        &[StatusWord::BUSY, StatusWord::from_raw(0)]
    );
}

#[test]
fn test_flash_mapped_readback() {
    init_logging();
    let mut ram = TargetRam::new(4096);
    let image: Vec<u8> = (0..4096u32).map(|i| (i * 7) as u8).collect();
    ram.load(&image).unwrap();
    ram.set_request(0x8000);

    let config = single_shot(AgentConfig::flash_mapped());
    let mut agent = RunController::new(DummyFlash::new_default(), ram, config);
    assert_eq!(agent.run().last.raw(), 0);

    let flash = agent.device();
    assert_eq!(flash.operations().last(), Some(&Operation::MapRead));
    assert!(flash.is_mapped());
    assert_eq!(&flash.data()[0x8000..0x9000], &image[..]);
}

#[test]
fn test_flash_without_window_falls_back() {
    init_logging();
    let mut ram = TargetRam::new(4096);
    ram.load(&[0x42; 4096]).unwrap();

    let flash = DummyFlash::new(DummyConfig {
        mapped_window: false,
        ..Default::default()
    });
    let mut agent = RunController::new(flash, ram, single_shot(AgentConfig::flash_mapped()));
    assert_eq!(agent.run().last.raw(), 0);

    let reads = agent
        .device()
        .operations()
        .iter()
        .filter(|op| matches!(op, Operation::Read(..)))
        .count();
    assert_eq!(reads, 16);
}

#[test]
fn test_eeprom_mismatch_at_offset_130() {
    init_logging();
    let mut ram = TargetRam::new(8192);
    ram.load(&[0x7F; 8192]).unwrap();
    ram.set_status(StatusWord::encode(
        StatusLayout::Extended,
        &Status::Start { page_count: 64 },
    ));

    let mut eeprom = DummyEeprom::new_default();
    eeprom.inject_stuck_byte(130, 0x00);

    let mut agent = RunController::new(eeprom, ram, AgentConfig::eeprom_extended());
    let halt = agent.run();

    assert_eq!(
        halt.last.decode(StatusLayout::Extended).unwrap(),
        Status::Mismatch(Some(MismatchDetail {
            page: 1,
            byte: 2,
            actual: 0x00
        }))
    );
    assert_eq!(halt.last.raw(), 0x0002_0102);
    assert_eq!(agent.device().operations()[0], Operation::EraseAll);
}

#[test]
fn test_eeprom_byte_length_request() {
    init_logging();
    let mut ram = TargetRam::new(8192);
    let image: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
    ram.load(&image).unwrap();
    ram.set_request(image.len() as u32);

    let mut agent = RunController::new(DummyEeprom::new_default(), ram, AgentConfig::eeprom());
    assert_eq!(agent.run().last.raw(), 0);

    let eeprom = agent.device();
    assert_eq!(&eeprom.data()[..1000], &image[..]);
    // Rounded up to whole pages, padding comes from the buffer
    assert!(eeprom.data()[1000..1024].iter().all(|&b| b == 0x00));
    let programs = eeprom
        .operations()
        .iter()
        .filter(|op| matches!(op, Operation::Program(..)))
        .count();
    assert_eq!(programs, 8);
}

#[test]
fn test_single_byte_difference_reports_location() {
    init_logging();
    for k in [0u32, 1, 255, 256, 257, 2048, 4095] {
        let mut ram = TargetRam::new(4096);
        ram.load(&[0x3C; 4096]).unwrap();
        ram.set_request(0x10000);

        let mut flash = DummyFlash::new_default();
        flash.inject_stuck_byte(0x10000 + k, 0x0C);

        let mut config = single_shot(AgentConfig::flash_readback());
        config.layout = StatusLayout::Extended;
        config.policy = VerifyPolicy::FailFast;
        let mut agent = RunController::new(flash, ram, config);

        let status = agent.run().last.decode(StatusLayout::Extended).unwrap();
        assert_eq!(
            status,
            Status::Mismatch(Some(MismatchDetail {
                page: (k / 256) as u8,
                byte: (k % 256) as u8,
                actual: 0x0C
            })),
            "corrupted offset {k}"
        );
    }
}

#[test]
fn test_scan_all_reports_last_mismatch() {
    init_logging();
    let mut ram = TargetRam::new(4096);
    ram.load(&[0x00; 4096]).unwrap();

    let mut flash = DummyFlash::new_default();
    flash.inject_stuck_byte(0x004, 0x01);
    flash.inject_stuck_byte(0x9F0, 0x02);

    let mut config = single_shot(AgentConfig::flash_readback());
    config.layout = StatusLayout::Extended;
    let mut agent = RunController::new(flash, ram, config);
    let outcome = agent.run_pass();

    let report = outcome.result.unwrap();
    assert_eq!(report.mismatch_count(), 2);
    assert_eq!(report.history()[0].addr, 0x004);
    assert_eq!(
        outcome.word.decode(StatusLayout::Extended).unwrap(),
        Status::Mismatch(Some(MismatchDetail {
            page: 9,
            byte: 0xF0,
            actual: 0x02
        }))
    );
}

#[test]
fn test_looping_agent_is_idempotent() {
    init_logging();
    let mut ram = TargetRam::new(4096);
    ram.load(&[0x96; 4096]).unwrap();
    ram.set_request(0x2000);
    ram.queue_trigger(Trigger::request(0x2000));
    ram.queue_trigger(Trigger::request(0x2000));

    let mut agent = RunController::new(
        DummyFlash::new_default(),
        ram,
        AgentConfig::flash_readback(),
    );
    let halt = agent.run();
    assert_eq!(halt.passes, 3);

    let history = agent.io().status_history();
    assert_eq!(history.len(), 6);
    for pass in history.chunks(2) {
        assert_eq!(pass, &[StatusWord::BUSY, StatusWord::from_raw(0)]);
    }
}

#[test]
fn test_looping_agent_writes_image_sector_by_sector() {
    init_logging();
    let image: Vec<u8> = (0..3 * 4096u32).map(|i| (i >> 4) as u8).collect();
    let mut sectors = image.chunks(4096).enumerate();

    let mut ram = TargetRam::new(4096);
    if let Some((_, first)) = sectors.next() {
        ram.load(first).unwrap();
    }
    ram.set_request(0x20000);
    for (i, data) in sectors {
        ram.queue_trigger(Trigger::with_data(0x20000 + i as u32 * 4096, data.to_vec()));
    }

    let mut agent = RunController::new(
        DummyFlash::new_default(),
        ram,
        AgentConfig::flash_mapped(),
    );
    let halt = agent.run();

    assert_eq!(halt.passes, 3);
    assert_eq!(halt.last.raw(), 0);
    assert_eq!(
        erased_sectors(agent.device().operations()),
        [0x20000, 0x21000, 0x22000]
    );
    assert_eq!(&agent.device().data()[0x20000..0x23000], &image[..]);
}

#[test]
fn test_slow_erase_reports_bus_error() {
    init_logging();
    let mut ram = TargetRam::new(4096);
    ram.load(&[0x11; 4096]).unwrap();

    let mut flash = DummyFlash::new_default();
    flash.set_timing(Timing {
        erase: 250_000,
        ..Timing::default()
    });

    let mut agent = RunController::new(flash, ram, single_shot(AgentConfig::flash_readback()));
    let outcome = agent.run_pass();

    assert_eq!(
        outcome.result.unwrap_err(),
        Error::Timeout {
            op: HalOp::EraseSector,
            addr: 0
        }
    );
    assert_eq!(outcome.word.raw(), 3);
    assert_eq!(agent.device().operations(), &[Operation::EraseSector(0)]);
}

#[test]
fn test_device_fault_mid_pass_reports_bus_error() {
    init_logging();
    let mut ram = TargetRam::new(8192);
    ram.load(&[0x5A; 8192]).unwrap();
    ram.set_request(8192);

    let mut eeprom = DummyEeprom::new_default();
    eeprom.inject_fault(HalOp::ProgramPage, 0x180);

    let mut config = AgentConfig::eeprom();
    config.layout = StatusLayout::Extended;
    let mut agent = RunController::new(eeprom, ram, config);
    let halt = agent.run();

    assert_eq!(halt.last.decode(StatusLayout::Extended).unwrap(), Status::BusError);
    // Pages 0..=2 went through, page 3 failed, nothing after it
    let programs = agent
        .device()
        .operations()
        .iter()
        .filter(|op| matches!(op, Operation::Program(..)))
        .count();
    assert_eq!(programs, 4);
}

#[test]
fn test_unaligned_target_touches_nothing() {
    init_logging();
    let mut ram = TargetRam::new(4096);
    ram.set_request(0x1800);

    let mut agent = RunController::new(
        DummyFlash::new_default(),
        ram,
        single_shot(AgentConfig::flash_readback()),
    );
    assert_eq!(agent.run().last.raw(), 3);
    assert!(agent.device().operations().is_empty());
}

#[test]
fn test_empty_request_still_erases_eeprom() {
    init_logging();
    let mut ram = TargetRam::new(8192);
    ram.set_request(0);

    let mut eeprom = DummyEeprom::new_default();
    eeprom.program_page(0, &[0xA5; 128], DEFAULT_TIMEOUT).unwrap();

    let mut agent = RunController::new(eeprom, ram, AgentConfig::eeprom());
    assert_eq!(agent.run().last.raw(), 0);
    assert_eq!(
        agent.device().operations(),
        &[Operation::Program(0, 128), Operation::EraseAll]
    );
    assert_eq!(agent.device().data()[0], 0x00);
}

#[test]
fn test_mapped_compare_failure_reports_three() {
    init_logging();
    let mut ram = TargetRam::new(4096);
    ram.load(&[0xAA; 4096]).unwrap();
    ram.set_request(0x1000);

    let mut flash = DummyFlash::new_default();
    flash.inject_stuck_byte(0x1010, 0x00);

    let config = single_shot(AgentConfig::flash_mapped());
    let mut agent = RunController::new(flash, ram, config);
    let halt = agent.run();

    assert_eq!(halt.last.raw(), 3);
    assert_eq!(agent.device().operations().last(), Some(&Operation::MapRead));
}

#[test]
fn test_host_options_in_mailbox() {
    init_logging();
    let mut ram = TargetRam::new(4096);
    ram.load(&[0x0F; 4096]).unwrap();
    let addresses = ram.addresses();
    ram.write_word(addresses.request(), 0x3000).unwrap();
    ram.write_word(
        addresses.options(),
        (AgentOptions::EXTENDED_STATUS | AgentOptions::MAPPED_READBACK).bits(),
    )
    .unwrap();

    let mut flash = DummyFlash::new_default();
    flash.inject_stuck_byte(0x3105, 0x0E);

    // Built as a looping scan-all agent, the host asks for fail-fast single-shot
    let mut agent = RunController::new(flash, ram, AgentConfig::flash_readback());
    let halt = agent.run();

    assert_eq!(halt.passes, 1);
    assert_eq!(
        halt.last.decode(StatusLayout::Extended).unwrap(),
        Status::Mismatch(Some(MismatchDetail {
            page: 1,
            byte: 5,
            actual: 0x0E
        }))
    );
    assert_eq!(
        agent.io().read_word(addresses.status()),
        Ok(halt.last.raw())
    );
}
