use std::num::NonZeroU8;

use arrayvec::ArrayVec;

use crate::error::{Error, Result};
use crate::utils::{CommandWriter, ToPayload};

/// Largest frame the sensor moves in one bulk transfer.
pub const MAX_TRANSFER_LEN: usize = 263;
pub const MAX_PAYLOAD_LEN: usize = 255;
pub const MAX_USER_ID_LEN: usize = 100;

pub const FW_CMD_HEADER_LEN: usize = 1;
pub const FW_REPLY_HEADER_LEN: usize = 2;
pub const MESSAGE_HEADER_LEN: usize = 4;
pub const MESSAGE_HEADER_ID: u8 = 0xFE;

// Firmware commands, sent as the first byte of a bulk write.
pub const SENSOR_CMD_GET_VERSION: u8 = 0x01;
pub const SENSOR_CMD_ACE_COMMAND: u8 = 0xA7;
pub const SENSOR_CMD_ASYNC_MSG_READ: u8 = 0xA8;

pub const CMD_FPS_INIT: u8 = 0x11;
pub const CMD_CANCEL_OP: u8 = 0x41;
pub const CMD_ENROLL_USER: u8 = 0x51;
pub const CMD_ID_USER: u8 = 0x61;
pub const CMD_VERIFY_USER: u8 = 0x65;
pub const CMD_GET_TEMPLATE_RECORDS: u8 = 0x71;
pub const CMD_GET_NEXT_QUERY_RESPONSE: u8 = 0x72;
pub const CMD_DEL_USER_FP: u8 = 0x81;
pub const CMD_DEL_FULL_DB: u8 = 0x84;
pub const CMD_POWER_DOWN_NOTIFY: u8 = 0xA1;

/// A user id as stored on the sensor.
pub type UserId = ArrayVec<u8, MAX_USER_ID_LEN>;

/// How a correlated command picks its sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqNum {
    /// Take the next value from the session counter and expect it in the replies.
    Next,
    /// Use this value verbatim; it becomes the session's last assigned number.
    Fixed(NonZeroU8),
}

/// Commands understood by the sensor's message layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Initialises the sensor. Answered with `OPERATION_DENIED` if it already is.
    FpsInit,

    /// Prepares the sensor for power down.
    PowerDownNotify,

    /// Aborts the operation in progress.
    CancelOp,

    EnrollUser {
        /// Finger slot from the sensor's point of view.
        finger: u8,
        user_id: UserId,
    },

    VerifyUser { user_id: UserId },

    /// Matches against every template on the sensor.
    IdUser,

    /// Starts a template query; results arrive over several reports.
    GetTemplateRecords,

    /// Asks for the next report of a running template query.
    GetNextQueryResponse,

    DelUserFp { finger: u8, user_id: UserId },

    /// Wipes every template on the sensor.
    DelFullDb,
}

impl Request {
    pub fn msg_id(&self) -> u8 {
        match self {
            Self::FpsInit => CMD_FPS_INIT,
            Self::PowerDownNotify => CMD_POWER_DOWN_NOTIFY,
            Self::CancelOp => CMD_CANCEL_OP,
            Self::EnrollUser { .. } => CMD_ENROLL_USER,
            Self::VerifyUser { .. } => CMD_VERIFY_USER,
            Self::IdUser => CMD_ID_USER,
            Self::GetTemplateRecords => CMD_GET_TEMPLATE_RECORDS,
            Self::GetNextQueryResponse => CMD_GET_NEXT_QUERY_RESPONSE,
            Self::DelUserFp { .. } => CMD_DEL_USER_FP,
            Self::DelFullDb => CMD_DEL_FULL_DB,
        }
    }
}

impl ToPayload for Request {
    fn to_payload(&self, writer: &mut dyn CommandWriter) -> Result<()> {
        match self {
            // backup | 0x00 [1]
            // finger | finger [1]
            // uid    | user_id [n]
            Self::EnrollUser { finger, user_id } => {
                writer.write_cmd_bytes(&[0x00])?;
                writer.write_cmd_bytes(&[*finger])?;
                writer.write_cmd_bytes(user_id)
            }

            Self::VerifyUser { user_id } => writer.write_cmd_bytes(user_id),

            // finger | finger [1]
            // uid    | user_id [n]
            Self::DelUserFp { finger, user_id } => {
                writer.write_cmd_bytes(&[*finger])?;
                writer.write_cmd_bytes(user_id)
            }

            Self::FpsInit
            | Self::PowerDownNotify
            | Self::CancelOp
            | Self::IdUser
            | Self::GetTemplateRecords
            | Self::GetNextQueryResponse
            | Self::DelFullDb => Ok(()),
        }
    }
}

/// Writes one message: `[0xFE] [seq] [msg_id] [payload_len] [payload]`.
pub fn compose_message(
    writer: &mut dyn CommandWriter,
    seq_num: u8,
    msg_id: u8,
    payload: &[u8],
) -> Result<()> {
    let len = u8::try_from(payload.len()).map_err(|_| {
        Error::protocol(format!(
            "payload of {} bytes does not fit a message",
            payload.len()
        ))
    })?;
    writer.write_cmd_bytes(&[MESSAGE_HEADER_ID, seq_num, msg_id, len])?;
    writer.write_cmd_bytes(payload)
}

/// Builds the bulk write for a request: the ACE firmware command wrapping one message.
pub fn command_frame(seq_num: u8, request: &Request) -> Result<Vec<u8>> {
    let mut payload = ArrayVec::<u8, MAX_PAYLOAD_LEN>::new();
    request.to_payload(&mut payload)?;

    let mut frame = ArrayVec::<u8, MAX_TRANSFER_LEN>::new();
    frame.write_cmd_bytes(&[SENSOR_CMD_ACE_COMMAND])?;
    compose_message(&mut frame, seq_num, request.msg_id(), &payload)?;
    Ok(frame.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responses::MessageHeader;

    fn uid(bytes: &[u8]) -> UserId {
        let mut user_id = UserId::new();
        user_id.try_extend_from_slice(bytes).unwrap();
        user_id
    }

    #[test]
    fn empty_command_frame() {
        let frame = command_frame(3, &Request::FpsInit).unwrap();
        assert_eq!(frame, vec![0xA7, 0xFE, 3, 0x11, 0]);
    }

    #[test]
    fn enroll_payload_layout() {
        let request = Request::EnrollUser {
            finger: 1,
            user_id: uid(b"FP1"),
        };
        let frame = command_frame(9, &request).unwrap();
        assert_eq!(frame, vec![0xA7, 0xFE, 9, 0x51, 5, 0x00, 0x01, b'F', b'P', b'1']);
    }

    #[test]
    fn delete_payload_layout() {
        let request = Request::DelUserFp {
            finger: 1,
            user_id: uid(b"ab"),
        };
        let frame = command_frame(2, &request).unwrap();
        assert_eq!(&frame[4..], &[3, 0x01, b'a', b'b']);
    }

    #[test]
    fn composed_message_parses_back() {
        let cases: &[(u8, u8, &[u8])] = &[
            (1, CMD_VERIFY_USER, b"user"),
            (255, CMD_CANCEL_OP, &[]),
            (0, 0x91, &[1]),
        ];
        for (seq, msg_id, payload) in cases {
            let mut buf = Vec::new();
            compose_message(&mut buf, *seq, *msg_id, payload).unwrap();
            let header = MessageHeader::parse(&buf).unwrap();
            assert_eq!(header.seq_num, *seq);
            assert_eq!(header.msg_id, *msg_id);
            assert_eq!(header.payload, *payload);
        }
    }

    #[test]
    fn oversized_payload_is_refused() {
        let mut buf = Vec::new();
        assert!(compose_message(&mut buf, 1, CMD_ENROLL_USER, &[0; 256]).is_err());
    }
}
