//! End-to-end scenarios against the simulated coprocessor

use im401_bridge::{
    loader, regdump, regs, BinarySegmentInfo, BusCall, BusRecord, Command, ControllerError,
    DeviceConfig, FirmwareBundle, FirmwareContainer, Mode, SimulatedTransport, SmartMic,
};
use std::time::Duration;

const SYNC: u32 = 0x2379_5888;

fn container(segments: &[(u32, u32, u32)], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&SYNC.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&(segments.len() as u32).to_le_bytes());
    for (offset, size, target) in segments {
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&target.to_le_bytes());
    }
    out.extend_from_slice(payload);
    out
}

fn test_config() -> DeviceConfig {
    DeviceConfig {
        debounce_ms: 1,
        ..Default::default()
    }
}

#[test]
fn test_single_segment_load_writes_once() {
    let buffer = [0xAA, 0xBB, 0xCC, 0xDD];
    let segment = BinarySegmentInfo {
        offset: 0,
        size: 4,
        target_address: 0x1000,
    };
    let container = FirmwareContainer::from_parts(&buffer, vec![segment], None).unwrap();
    let mut sim = SimulatedTransport::new();

    loader::load(&container, &mut sim).unwrap();

    assert_eq!(sim.writes(), vec![(0x1000, vec![0xAA, 0xBB, 0xCC, 0xDD])]);
    assert_eq!(sim.records().len(), 1);
}

#[test]
fn test_parsed_single_segment_loads_payload() {
    // header (12) + one entry (12): payload starts at 24
    let buf = container(&[(24, 4, 0x1000)], &[0xAA, 0xBB, 0xCC, 0xDD]);
    let parsed = im401_bridge::image::parse(&buf).unwrap();
    let mut sim = SimulatedTransport::new();

    loader::load(&parsed, &mut sim).unwrap();

    assert_eq!(sim.writes(), vec![(0x1000, vec![0xAA, 0xBB, 0xCC, 0xDD])]);
}

#[tokio::test]
async fn test_oneshot_detection_returns_to_loaded() {
    let sim = SimulatedTransport::new();
    let mic = SmartMic::attach(sim.clone(), test_config()).unwrap();
    let bundle = FirmwareBundle::new(container(&[(24, 4, 0x1000)], &[1, 2, 3, 4]));

    mic.apply(Command::LoadFirmware(&bundle)).await.unwrap();
    mic.apply(Command::StartOneShot).await.unwrap();
    assert_eq!(mic.mode().await, Mode::DspArmed);

    sim.raise_trigger();
    assert!(mic.signal_interrupt());

    let event = tokio::time::timeout(Duration::from_secs(2), mic.recv_event())
        .await
        .expect("detection event")
        .expect("channel open");
    assert!(event.timestamp > 0);

    // let any stray work run before checking for duplicates
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(mic.try_recv_event().await.is_none());
    assert_eq!(mic.mode().await, Mode::DspLoaded);

    let stats = mic.stats().await;
    assert_eq!(stats.detections, 1);
    assert!(!stats.irq_enabled);

    mic.detach().await;
}

#[tokio::test]
async fn test_oneshot_from_normal_is_rejected() {
    let sim = SimulatedTransport::new();
    let mic = SmartMic::attach(sim.clone(), test_config()).unwrap();

    let err = mic.apply(Command::StartOneShot).await.unwrap_err();

    assert!(matches!(
        err,
        ControllerError::InvalidTransition {
            mode: Mode::Normal,
            ..
        }
    ));
    assert_eq!(mic.mode().await, Mode::Normal);
    assert!(sim.records().is_empty());
}

#[tokio::test]
async fn test_second_segment_failure_faults() {
    let sim = SimulatedTransport::new();
    let mic = SmartMic::attach(sim.clone(), test_config()).unwrap();
    // header (12) + two entries (24): payload starts at 36
    let bundle = FirmwareBundle::new(container(
        &[(36, 2, 0x1000), (38, 2, 0x2000)],
        &[1, 2, 3, 4],
    ));
    sim.fail_nth_write(2);

    let err = mic.apply(Command::LoadFirmware(&bundle)).await.unwrap_err();

    assert!(err.is_fault());
    assert_eq!(mic.mode().await, Mode::Fault);
    assert_eq!(
        sim.records(),
        vec![
            BusRecord {
                call: BusCall::Write {
                    address: 0x1000,
                    bytes: vec![1, 2]
                },
                ok: true
            },
            BusRecord {
                call: BusCall::Write {
                    address: 0x2000,
                    bytes: vec![3, 4]
                },
                ok: false
            },
        ]
    );

    // only a boost reset leaves fault
    assert!(mic.apply(Command::LoadFirmware(&bundle)).await.is_err());
    sim.heal();
    mic.apply(Command::BoostReset).await.unwrap();
    assert_eq!(mic.mode().await, Mode::Normal);
}

#[test]
fn test_dump_failure_returns_prefix() {
    let addresses = &regs::DUMP_REGISTERS[..8];
    let mut sim = SimulatedTransport::new();
    for (i, &address) in addresses.iter().enumerate() {
        sim.set_register(address, i as u8 + 1);
    }
    sim.fail_nth_read(5);

    let err = regdump::dump_addresses(addresses, &mut sim).unwrap_err();

    assert_eq!(err.address, addresses[4]);
    let partial: Vec<(u32, u8)> = err.partial.iter().map(|r| (r.address, r.value)).collect();
    assert_eq!(
        partial,
        vec![
            (addresses[0], 1),
            (addresses[1], 2),
            (addresses[2], 3),
            (addresses[3], 4)
        ]
    );
}

#[tokio::test]
async fn test_listening_keeps_detecting() {
    let sim = SimulatedTransport::new();
    let mic = SmartMic::attach(sim.clone(), test_config()).unwrap();
    let bundle = FirmwareBundle::new(container(&[(24, 4, 0x1000)], &[1, 2, 3, 4]));

    mic.apply(Command::LoadFirmware(&bundle)).await.unwrap();
    mic.apply(Command::StartListening).await.unwrap();

    for _ in 0..3 {
        sim.raise_trigger();
        mic.service_interrupt().await.unwrap();
        assert!(mic.recv_event().await.is_some());
    }

    assert_eq!(mic.mode().await, Mode::DspListening);
    assert!(mic.irq_enabled());
    assert_eq!(mic.stats().await.detections, 3);
}

#[tokio::test]
async fn test_grammar_swap_without_reload() {
    let sim = SimulatedTransport::new();
    let mic = SmartMic::attach(sim.clone(), test_config()).unwrap();

    // header 12 + segment 12 + training count 4 + one entry 8 = 36
    let mut buf = container(&[(36, 2, 0x1000)], &[]);
    buf.extend_from_slice(&1u32.to_le_bytes());
    buf.extend_from_slice(&9u32.to_le_bytes());
    buf.extend_from_slice(&0x0fff_0000u32.to_le_bytes());
    buf.extend_from_slice(&[1, 2]);
    let bundle = FirmwareBundle::new(buf);

    let mut grammar = Vec::new();
    grammar.extend_from_slice(&0x2379u16.to_le_bytes());
    grammar.extend_from_slice(&9u16.to_le_bytes());
    grammar.extend_from_slice(&12i32.to_le_bytes());
    grammar.extend_from_slice(&16i32.to_le_bytes());
    grammar.extend_from_slice(&[0xC0, 0xFF, 0xEE, 0x00]);

    mic.apply(Command::LoadFirmware(&bundle)).await.unwrap();
    sim.clear_log();

    let t = mic.apply(Command::LoadGrammar(&grammar)).await.unwrap();

    assert_eq!(t.to, Mode::DspLoaded);
    assert_eq!(sim.writes(), vec![(0x0fff_0000, vec![0xC0, 0xFF, 0xEE, 0x00])]);

    mic.apply(Command::StartOneShot).await.unwrap();
    assert!(mic.apply(Command::LoadGrammar(&grammar)).await.is_err());
    assert_eq!(mic.mode().await, Mode::DspArmed);
}
