mod common;

use std::time::Duration;

use common::{code, device, device_print, device_with, match_payload, run, settle, ALICE};
use synaptics_fp::responses::*;
use synaptics_fp::{ActionEvent, Error, MatchResult, SynapticsConfig, TransferError};

const LIMIT: Duration = Duration::from_secs(2);

fn short_replies() -> SynapticsConfig {
    SynapticsConfig {
        reply_timeout_ms: 20,
        ..SynapticsConfig::default()
    }
}

#[test]
fn cancel_aborts_a_waiting_verify() {
    let (mut dev, fake) = device();
    fake.queue_response(1, RSP_VERIFY_READY, &[]);

    dev.begin_verify(&device_print(ALICE)).unwrap();
    assert!(run(&mut dev).is_empty());

    dev.cancel();
    fake.queue_response(1, RSP_CANCEL_OP_OK, &[]);

    assert_eq!(settle(&mut dev, LIMIT), vec![ActionEvent::Verified(Err(Error::Cancelled))]);
    let sent = fake.sent_commands();
    assert_eq!(sent.len(), 2);
    assert_eq!((sent[0].msg_id, sent[0].seq_num), (0x65, 1));
    assert_eq!((sent[1].msg_id, sent[1].seq_num), (0x41, 1));
    assert_eq!(dev.last_seq_num(), 1);
    assert_eq!(fake.cancelled_transfers(), 1);
    assert!(!dev.has_active_run());
    assert_eq!(dev.transfers_in_flight(), 0);
}

#[test]
fn refused_cancellation_fails_the_action() {
    let (mut dev, fake) = device();
    fake.queue_response(1, RSP_VERIFY_READY, &[]);

    dev.begin_verify(&device_print(ALICE)).unwrap();
    run(&mut dev);
    dev.cancel();
    fake.queue_response(1, RSP_CANCEL_OP_FAIL, &code(1));

    let events = settle(&mut dev, LIMIT);
    assert!(matches!(events[..], [ActionEvent::Verified(Err(Error::Protocol(_)))]));
}

#[test]
fn unanswered_cancel_ends_on_reply_timeout() {
    let (mut dev, fake) = device_with(short_replies());
    fake.queue_response(1, RSP_VERIFY_READY, &[]);

    dev.begin_verify(&device_print(ALICE)).unwrap();
    assert!(run(&mut dev).is_empty());
    dev.cancel();

    assert_eq!(
        settle(&mut dev, LIMIT),
        vec![ActionEvent::Verified(Err(Error::Transfer(TransferError::Timeout)))]
    );
    assert!(!dev.has_active_run());
    assert_eq!(dev.transfers_in_flight(), 0);

    // the next run waits on interrupts again
    fake.queue_response(2, RSP_VERIFY_READY, &[]);
    fake.queue_async_response(2, RSP_VERIFY_OK, &match_payload(ALICE));
    dev.begin_verify(&device_print(ALICE)).unwrap();
    assert_eq!(run(&mut dev), vec![ActionEvent::Verified(Ok(MatchResult::Match))]);
}

#[test]
fn cancel_before_first_reply_skips_the_interrupt_wait() {
    let (mut dev, fake) = device_with(short_replies());

    dev.begin_verify(&device_print(ALICE)).unwrap();
    dev.cancel();
    fake.queue_response(1, RSP_VERIFY_READY, &[]);

    assert_eq!(
        settle(&mut dev, LIMIT),
        vec![ActionEvent::Verified(Err(Error::Transfer(TransferError::Timeout)))]
    );
    assert!(!dev.has_active_run());
    assert_eq!(fake.sent_msg_ids(), vec![0x65, 0x41]);
}

#[test]
fn cancel_before_first_reply_is_acknowledged() {
    let (mut dev, fake) = device();

    dev.begin_verify(&device_print(ALICE)).unwrap();
    dev.cancel();
    fake.queue_response(1, RSP_VERIFY_READY, &[]);
    fake.queue_response(1, RSP_CANCEL_OP_OK, &[]);

    assert_eq!(settle(&mut dev, LIMIT), vec![ActionEvent::Verified(Err(Error::Cancelled))]);
    assert_eq!(fake.pending_replies(), 0);
}

#[test]
fn cancel_when_idle_sends_nothing() {
    let (mut dev, fake) = device();
    dev.cancel();
    assert!(!dev.dispatch());
    assert!(fake.writes().is_empty());
}

#[test]
fn general_error_fails_the_command() {
    let (mut dev, fake) = device();
    fake.queue_response(0, RSP_GENERAL_ERROR, &[0x01, 0x02]);

    dev.begin_list().unwrap();
    assert_eq!(
        run(&mut dev),
        vec![ActionEvent::Listed(Err(Error::DeviceReported { code: 0x0102 }))]
    );
}

#[test]
fn unsolicited_messages_are_skipped() {
    let (mut dev, fake) = device();
    fake.queue_response(0, 0x30, &[9, 9]);

    dev.begin_list().unwrap();
    assert!(run(&mut dev).is_empty());
    assert!(dev.has_active_run());

    fake.queue_async_response(1, RSP_QUERY_RESPONSE_COMPLETE, &[]);
    assert_eq!(run(&mut dev), vec![ActionEvent::Listed(Ok(Vec::new()))]);
}

#[test]
fn mismatched_sequence_number_is_tolerated() {
    let (mut dev, fake) = device();
    fake.queue_response(9, RSP_QUERY_RESPONSE_COMPLETE, &[]);

    dev.begin_list().unwrap();
    assert_eq!(run(&mut dev), vec![ActionEvent::Listed(Ok(Vec::new()))]);
}

#[test]
fn corrupted_header_is_a_protocol_error() {
    let (mut dev, fake) = device();
    fake.queue_reply(vec![0x00, 0x00, 0xAB, 1, RSP_QUERY_RESPONSE_COMPLETE, 0]);

    dev.begin_list().unwrap();
    let events = run(&mut dev);
    assert!(matches!(events[..], [ActionEvent::Listed(Err(Error::Protocol(_)))]));
    assert!(!dev.has_active_run());
}

#[test]
fn corrupted_finger_report_is_a_protocol_error() {
    let (mut dev, fake) = device();
    fake.queue_response(1, RSP_VERIFY_READY, &[]);
    fake.queue_async_response(0, EVT_FINGER_REPORT, &[1, 0]);

    dev.begin_verify(&device_print(ALICE)).unwrap();
    let events = run(&mut dev);
    assert!(matches!(events[..], [ActionEvent::Verified(Err(Error::Protocol(_)))]));
}

#[test]
fn sequence_numbers_advance_per_command() {
    let (mut dev, fake) = device();
    for seq in 1..=3u8 {
        fake.queue_response(seq, RSP_QUERY_RESPONSE_COMPLETE, &[]);
        dev.begin_list().unwrap();
        assert_eq!(run(&mut dev), vec![ActionEvent::Listed(Ok(Vec::new()))]);
        assert_eq!(dev.cmd_seq_num(), seq);
    }
    let seqs: Vec<u8> = fake.sent_commands().iter().map(|c| c.seq_num).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
}
