mod common;

use common::{code, device, device_print, records_payload, run, ALICE};
use synaptics_fp::responses::*;
use synaptics_fp::{ActionEvent, EnrollDate, Error, Finger, Print};

#[test]
fn list_collects_every_page() {
    let (mut dev, fake) = device();
    let first = records_payload(2, 1, &[(ALICE, 1), (&b""[..], 0)]);
    let second = records_payload(2, 2, &[(&b"legacy-print"[..], 1)]);
    fake.queue_response(1, RSP_TEMPLATE_RECORDS_REPORT, &first);
    fake.queue_response(1, RSP_TEMPLATE_RECORDS_REPORT, &second);
    fake.queue_response(1, RSP_QUERY_RESPONSE_COMPLETE, &[]);

    dev.begin_list().unwrap();
    let events = run(&mut dev);
    let prints = match &events[..] {
        [ActionEvent::Listed(Ok(prints))] => prints,
        other => panic!("unexpected events {:?}", other),
    };
    assert_eq!(prints.len(), 2);

    assert_eq!(prints[0].finger, Finger::RightIndex);
    assert_eq!(prints[0].username.as_deref(), Some("alice"));
    assert_eq!(prints[0].enroll_date, EnrollDate::new(2024, 3, 9));
    assert_eq!(prints[0].user_id(), Some(ALICE));

    assert_eq!(prints[1].finger, Finger::Unknown);
    assert_eq!(prints[1].username, None);
    assert_eq!(prints[1].description.as_deref(), Some("legacy-print"));
    assert!(prints.iter().all(|p| p.device_stored));

    assert_eq!(fake.sent_msg_ids(), vec![0x71, 0x72, 0x72]);
    assert!(fake.sent_commands().iter().all(|c| c.seq_num == 1));
    assert!(!dev.has_active_run());
}

#[test]
fn list_of_empty_database() {
    let (mut dev, fake) = device();
    fake.queue_response(1, RSP_QUERY_FAIL, &code(RESULT_FP_DATABASE_EMPTY));

    dev.begin_list().unwrap();
    assert_eq!(run(&mut dev), vec![ActionEvent::Listed(Ok(Vec::new()))]);
}

#[test]
fn list_failure_carries_device_code() {
    let (mut dev, fake) = device();
    fake.queue_response(1, RSP_QUERY_FAIL, &code(1));

    dev.begin_list().unwrap();
    assert_eq!(
        run(&mut dev),
        vec![ActionEvent::Listed(Err(Error::DeviceReported { code: 1 }))]
    );
}

#[test]
fn delete_removes_template() {
    let (mut dev, fake) = device();
    fake.queue_response(1, RSP_DELETE_PROGRESS, &[50]);
    fake.queue_async_response(1, RSP_DEL_USER_FP_OK, &[]);

    dev.begin_delete(&device_print(ALICE)).unwrap();
    assert_eq!(run(&mut dev), vec![ActionEvent::Deleted(Ok(()))]);

    let sent = fake.sent_commands();
    assert_eq!(sent[0].msg_id, 0x81);
    assert_eq!(sent[0].payload[0], 1);
    assert_eq!(&sent[0].payload[1..], ALICE);
}

#[test]
fn delete_of_missing_template() {
    let (mut dev, fake) = device();
    fake.queue_response(1, RSP_DEL_USER_FP_FAIL, &code(RESULT_FP_DATABASE_NO_RECORD_EXISTS));

    dev.begin_delete(&device_print(ALICE)).unwrap();
    assert_eq!(run(&mut dev), vec![ActionEvent::Deleted(Err(Error::DataNotFound))]);
}

#[test]
fn delete_needs_record_data() {
    let (mut dev, fake) = device();

    dev.begin_delete(&Print::new(Finger::LeftIndex)).unwrap();
    assert_eq!(dev.take_events(), vec![ActionEvent::Deleted(Err(Error::DataInvalid))]);
    assert!(fake.writes().is_empty());
}

#[test]
fn clear_storage_reports_progress_then_done() {
    let (mut dev, fake) = device();
    fake.queue_response(1, RSP_DELETE_PROGRESS, &[10]);
    fake.queue_async_response(1, RSP_DELETE_PROGRESS, &[80]);
    fake.queue_async_response(1, RSP_DEL_FULL_DB_OK, &[]);

    dev.begin_clear_storage().unwrap();
    assert_eq!(run(&mut dev), vec![ActionEvent::StorageCleared(Ok(()))]);
    assert_eq!(fake.sent_msg_ids(), vec![0x84]);
    assert_eq!(fake.pending_replies(), 0);
}

#[test]
fn clear_storage_failure() {
    let (mut dev, fake) = device();
    fake.queue_response(1, RSP_DEL_FULL_DB_FAIL, &code(3));

    dev.begin_clear_storage().unwrap();
    assert_eq!(
        run(&mut dev),
        vec![ActionEvent::StorageCleared(Err(Error::DeviceReported { code: 3 }))]
    );
}
