#![allow(dead_code)]

use std::time::{Duration, Instant};

use synaptics_fp::fake::FakeSensor;
use synaptics_fp::{ActionEvent, Finger, Print, PrintData, Synaptics, SynapticsConfig};

pub const ALICE: &[u8] = b"FP1-20240309-7-000000AB-alice";
pub const BOB: &[u8] = b"FP1-20231201-2-0000BEEF-bob";

pub fn device() -> (Synaptics<FakeSensor>, FakeSensor) {
    device_with(SynapticsConfig::default())
}

pub fn device_with(config: SynapticsConfig) -> (Synaptics<FakeSensor>, FakeSensor) {
    let fake = FakeSensor::new();
    (Synaptics::new(fake.clone(), config), fake)
}

/// Dispatches until idle, checking that transfers never overlap.
pub fn run(dev: &mut Synaptics<FakeSensor>) -> Vec<ActionEvent> {
    while dev.dispatch() {
        assert!(dev.transfers_in_flight() <= 1, "more than one transfer in flight");
    }
    dev.take_events()
}

/// Dispatches until the run ends or `limit` passes. Only the detached cancel
/// write may be in flight next to the run's own transfer.
pub fn settle(dev: &mut Synaptics<FakeSensor>, limit: Duration) -> Vec<ActionEvent> {
    let start = Instant::now();
    while dev.has_active_run() && start.elapsed() < limit {
        dev.dispatch();
        assert!(dev.transfers_in_flight() <= 2, "more than one transfer next to the cancel write");
    }
    dev.run_until_idle();
    dev.take_events()
}

pub fn device_print(user_id: &[u8]) -> Print {
    let mut print = Print::new(Finger::Unknown);
    print.device_stored = true;
    print.data = Some(PrintData::new(1, user_id).unwrap());
    print
}

/// Big-endian result code as carried in `*_FAIL` payloads.
pub fn code(result: u16) -> [u8; 2] {
    result.to_be_bytes()
}

pub fn match_payload(user_id: &[u8]) -> Vec<u8> {
    let mut payload = 100u32.to_le_bytes().to_vec();
    payload.push(1);
    payload.push(user_id.len() as u8);
    payload.extend_from_slice(user_id);
    payload
}

pub fn records_payload(total: u8, index: u8, records: &[(&[u8], u8)]) -> Vec<u8> {
    let mut payload = vec![total, index];
    for (user_id, finger) in records {
        payload.push(0x01);
        payload.push(user_id.len() as u8);
        payload.extend_from_slice(user_id);
        payload.push(*finger);
    }
    payload
}

pub fn version_reply(major: u8, minor: u8, build: u32) -> Vec<u8> {
    let mut reply = vec![0, 0];
    reply.extend_from_slice(&0x5F00_0000u32.to_le_bytes());
    reply.extend_from_slice(&build.to_le_bytes());
    reply.extend_from_slice(&[major, minor, 8, 65, 0, 1, 0, 0]);
    reply.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]);
    reply.extend_from_slice(&[0x05, 0x00, 0, 1]);
    reply.resize(40, 0);
    reply
}
