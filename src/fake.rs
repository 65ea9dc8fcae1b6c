//! A scripted in-process sensor.
//!
//! Replies and interrupt wake-ups are queued up front and handed out in order,
//! whatever was written. Writes always succeed and are recorded. Clones share
//! the same script, so a test can keep one handle while the device owns another.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::commands::{MESSAGE_HEADER_ID, SENSOR_CMD_ACE_COMMAND};
use crate::driver::{EP_INTERRUPT, EP_REPLY, INTERRUPT_DATA_SIZE};
use crate::error::TransferError;
use crate::responses::{EVT_FINGER_REPORT, USB_ASYNC_MESSAGE_PENDING};
use crate::usb::{Direction, Transfer, TransferId, UsbBackend};

/// A message the host sent, decoded from an ACE command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    pub seq_num: u8,
    pub msg_id: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct Script {
    writes: Vec<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,
    interrupts: VecDeque<Vec<u8>>,
    claimed: bool,
    cancelled: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FakeSensor {
    script: Rc<RefCell<Script>>,
}

/// Builds a frame as read from the reply endpoint.
pub fn reply_frame(seq_num: u8, msg_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x00, 0x00, MESSAGE_HEADER_ID, seq_num, msg_id, payload.len() as u8];
    frame.extend_from_slice(payload);
    frame
}

impl FakeSensor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues raw bytes for the next read of the reply endpoint.
    pub fn queue_reply(&self, frame: Vec<u8>) {
        self.script.borrow_mut().replies.push_back(frame);
    }

    pub fn queue_response(&self, seq_num: u8, msg_id: u8, payload: &[u8]) {
        self.queue_reply(reply_frame(seq_num, msg_id, payload));
    }

    /// Queues a response that the sensor announces with an interrupt first.
    pub fn queue_async_response(&self, seq_num: u8, msg_id: u8, payload: &[u8]) {
        self.queue_interrupt(USB_ASYNC_MESSAGE_PENDING);
        self.queue_response(seq_num, msg_id, payload);
    }

    /// Queues an unsolicited finger report, announced with an interrupt.
    pub fn queue_finger(&self, present: bool) {
        self.queue_async_response(0, EVT_FINGER_REPORT, &[u8::from(present)]);
    }

    pub fn queue_interrupt(&self, status: u8) {
        let mut data = vec![0; INTERRUPT_DATA_SIZE];
        data[0] = status;
        self.script.borrow_mut().interrupts.push_back(data);
    }

    /// Every bulk write so far, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.script.borrow().writes.clone()
    }

    /// The ACE command frames among the writes.
    pub fn sent_commands(&self) -> Vec<SentCommand> {
        self.script
            .borrow()
            .writes
            .iter()
            .filter_map(|frame| match frame.as_slice() {
                [SENSOR_CMD_ACE_COMMAND, MESSAGE_HEADER_ID, seq, id, _, payload @ ..] => {
                    Some(SentCommand {
                        seq_num: *seq,
                        msg_id: *id,
                        payload: payload.to_vec(),
                    })
                }
                _ => None,
            })
            .collect()
    }

    pub fn sent_msg_ids(&self) -> Vec<u8> {
        self.sent_commands().iter().map(|c| c.msg_id).collect()
    }

    pub fn pending_replies(&self) -> usize {
        self.script.borrow().replies.len()
    }

    pub fn pending_interrupts(&self) -> usize {
        self.script.borrow().interrupts.len()
    }

    pub fn is_claimed(&self) -> bool {
        self.script.borrow().claimed
    }

    /// Transfers abandoned through cancellation or timeout.
    pub fn cancelled_transfers(&self) -> usize {
        self.script.borrow().cancelled
    }
}

impl UsbBackend for FakeSensor {
    fn claim_interface(&mut self) -> Result<(), TransferError> {
        self.script.borrow_mut().claimed = true;
        Ok(())
    }

    fn release_interface(&mut self) -> Result<(), TransferError> {
        self.script.borrow_mut().claimed = false;
        Ok(())
    }

    fn poll_transfer(
        &mut self,
        _id: TransferId,
        transfer: &mut Transfer,
    ) -> nb::Result<usize, TransferError> {
        let mut script = self.script.borrow_mut();
        if transfer.direction() == Direction::Out {
            script.writes.push(transfer.buffer().to_vec());
            return Ok(transfer.buffer().len());
        }

        let queue = match transfer.endpoint() {
            EP_REPLY => &mut script.replies,
            EP_INTERRUPT => &mut script.interrupts,
            other => {
                let error = TransferError::Io(format!("no such endpoint {:#04x}", other));
                return Err(nb::Error::Other(error));
            }
        };
        let data = queue.pop_front().ok_or(nb::Error::WouldBlock)?;
        let n = data.len().min(transfer.buffer().len());
        transfer.buffer_mut()[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn cancel_transfer(&mut self, _id: TransferId) {
        self.script.borrow_mut().cancelled += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{command_frame, Request};
    use crate::usb::UsbScheduler;

    #[test]
    fn decodes_sent_commands() {
        let fake = FakeSensor::new();
        let mut usb: UsbScheduler<FakeSensor, ()> = UsbScheduler::new(fake.clone());
        let frame = command_frame(7, &Request::IdUser).unwrap();
        usb.submit(Transfer::bulk_out(0x01, frame), 0, None, ());
        usb.submit(Transfer::bulk_out(0x01, vec![0x01]), 0, None, ());
        while usb.poll().is_some() {}

        assert_eq!(fake.writes().len(), 2);
        assert_eq!(
            fake.sent_commands(),
            vec![SentCommand {
                seq_num: 7,
                msg_id: 0x61,
                payload: vec![]
            }]
        );
    }

    #[test]
    fn reads_wait_for_script() {
        let fake = FakeSensor::new();
        let mut usb: UsbScheduler<FakeSensor, ()> = UsbScheduler::new(fake.clone());
        usb.submit(Transfer::bulk_in(EP_REPLY, 263), 0, None, ());
        assert!(usb.poll().is_none());

        fake.queue_response(1, 0x12, &[]);
        let done = usb.poll().unwrap();
        assert_eq!(done.result, Ok(()));
        assert_eq!(done.transfer.data(), &[0, 0, 0xFE, 1, 0x12, 0]);
        assert_eq!(fake.pending_replies(), 0);
    }

    #[test]
    fn interface_claim_is_tracked() {
        let mut fake = FakeSensor::new();
        fake.claim_interface().unwrap();
        assert!(fake.is_claimed());
        fake.release_interface().unwrap();
        assert!(!fake.is_claimed());
    }
}
