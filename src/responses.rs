use std::io::Read;

use arrayvec::ArrayVec;
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use tracing::debug;

use crate::commands::{
    UserId, FW_REPLY_HEADER_LEN, MAX_USER_ID_LEN, MESSAGE_HEADER_ID, MESSAGE_HEADER_LEN,
};
use crate::error::{Error, Result};
use crate::utils::FromPayload;

pub const RSP_FPS_INIT_OK: u8 = 0x12;
pub const RSP_FPS_INIT_FAIL: u8 = 0x13;
pub const RSP_CANCEL_OP_OK: u8 = 0x42;
pub const RSP_CANCEL_OP_FAIL: u8 = 0x43;
pub const RSP_ENROLL_READY: u8 = 0x54;
pub const RSP_CAPTURE_COMPLETE: u8 = 0x55;
pub const RSP_ENROLL_REPORT: u8 = 0x56;
pub const RSP_ENROLL_PAUSED: u8 = 0x57;
pub const RSP_ENROLL_RESUMED: u8 = 0x58;
pub const RSP_ENROLL_FAIL: u8 = 0x59;
pub const RSP_ENROLL_OK: u8 = 0x5A;
pub const RSP_ID_READY: u8 = 0x62;
pub const RSP_ID_FAIL: u8 = 0x63;
pub const RSP_ID_OK: u8 = 0x64;
pub const RSP_VERIFY_READY: u8 = 0x66;
pub const RSP_VERIFY_FAIL: u8 = 0x67;
pub const RSP_VERIFY_OK: u8 = 0x68;
pub const RSP_TEMPLATE_RECORDS_REPORT: u8 = 0x75;
pub const RSP_QUERY_RESPONSE_COMPLETE: u8 = 0x76;
pub const RSP_QUERY_FAIL: u8 = 0x78;
pub const RSP_DEL_USER_FP_OK: u8 = 0x82;
pub const RSP_DEL_USER_FP_FAIL: u8 = 0x83;
pub const RSP_DEL_FULL_DB_OK: u8 = 0x85;
pub const RSP_DEL_FULL_DB_FAIL: u8 = 0x86;
pub const RSP_DELETE_PROGRESS: u8 = 0x87;
pub const EVT_FINGER_REPORT: u8 = 0x91;
pub const RSP_POWER_DOWN_READY: u8 = 0xA2;
pub const RSP_POWER_DOWN_FAIL: u8 = 0xA3;
pub const RSP_GENERAL_ERROR: u8 = 0xFF;

pub const RESULT_SUCCESS: u16 = 0;
/// Returned by `FPS_INIT` when the sensor is already initialised.
pub const RESULT_OPERATION_DENIED: u16 = 8;
pub const RESULT_FP_NO_MATCH: u16 = 202;
pub const RESULT_FP_DATABASE_FULL: u16 = 203;
pub const RESULT_FP_DATABASE_EMPTY: u16 = 204;
pub const RESULT_FP_DATABASE_NO_RECORD_EXISTS: u16 = 205;
pub const RESULT_FP_DUPLICATE: u16 = 206;
pub const RESULT_SENSOR_STIMULUS_ERROR: u16 = 213;

/// Template slots in one records report.
pub const MAX_TEMPLATES_PER_REPORT: usize = 15;

/// Interrupt status bit: a message is waiting on the reply endpoint.
pub const USB_ASYNC_MESSAGE_PENDING: u8 = 0x04;

fn too_short(_: std::io::Error) -> Error {
    Error::protocol("payload too short")
}

/// The inner message header of a frame, borrowing its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader<'a> {
    pub seq_num: u8,
    pub msg_id: u8,
    pub payload: &'a [u8],
}

impl<'a> MessageHeader<'a> {
    /// Parses `[0xFE] [seq] [msg_id] [payload_len] [payload]`. Trailing bytes are ignored.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < MESSAGE_HEADER_LEN {
            return Err(Error::protocol(format!(
                "message header too short ({} bytes)",
                bytes.len()
            )));
        }
        if bytes[0] != MESSAGE_HEADER_ID {
            return Err(Error::protocol(format!("bad message header id {:#04x}", bytes[0])));
        }
        let len = usize::from(bytes[3]);
        let payload = bytes[MESSAGE_HEADER_LEN..]
            .get(..len)
            .ok_or_else(|| Error::protocol(format!("payload length {} exceeds frame", len)))?;
        Ok(Self {
            seq_num: bytes[1],
            msg_id: bytes[2],
            payload,
        })
    }

    /// Parses a frame read from the reply endpoint, which carries a firmware status word first.
    pub fn parse_reply(frame: &'a [u8]) -> Result<Self> {
        let mut status = frame
            .get(..FW_REPLY_HEADER_LEN)
            .ok_or_else(|| Error::protocol("reply too short"))?;
        let status = status.read_u16::<LittleEndian>().map_err(too_short)?;
        if status != 0 {
            debug!("firmware status {:#06x} on reply", status);
        }
        Self::parse(&frame[FW_REPLY_HEADER_LEN..])
    }
}

/// Score and identity carried by `ENROLL_OK`, `VERIFY_OK` and `ID_OK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchReport {
    pub score: u32,
    pub finger_id: u8,
    pub user_id: UserId,
}

fn read_user_id(reader: &mut &[u8]) -> Result<UserId> {
    let len = usize::from(reader.read_u8().map_err(too_short)?);
    if len > MAX_USER_ID_LEN {
        return Err(Error::protocol(format!("user id of {} bytes", len)));
    }
    let mut buf = [0u8; MAX_USER_ID_LEN];
    reader.read_exact(&mut buf[..len]).map_err(too_short)?;
    let mut user_id = UserId::new();
    user_id.try_extend_from_slice(&buf[..len]).map_err(|_| Error::protocol("user id overflow"))?;
    Ok(user_id)
}

impl FromPayload for MatchReport {
    fn from_payload(payload: &[u8]) -> Result<Self> {
        let mut reader = payload;
        let score = reader.read_u32::<LittleEndian>().map_err(too_short)?;
        let finger_id = reader.read_u8().map_err(too_short)?;
        let user_id = read_user_id(&mut reader)?;
        Ok(Self {
            score,
            finger_id,
            user_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRecord {
    pub status: u8,
    pub user_id: UserId,
    pub finger_id: u8,
}

/// One page of a template query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRecordsReport {
    pub total_query_messages: u8,
    pub query_sequence: u8,
    pub templates: ArrayVec<TemplateRecord, MAX_TEMPLATES_PER_REPORT>,
}

impl FromPayload for TemplateRecordsReport {
    fn from_payload(payload: &[u8]) -> Result<Self> {
        let mut reader = payload;
        let total_query_messages = reader.read_u8().map_err(too_short)?;
        let query_sequence = reader.read_u8().map_err(too_short)?;
        let mut templates = ArrayVec::new();
        while !reader.is_empty() {
            let status = reader.read_u8().map_err(too_short)?;
            let user_id = read_user_id(&mut reader)?;
            let finger_id = reader.read_u8().map_err(too_short)?;
            templates
                .try_push(TemplateRecord {
                    status,
                    user_id,
                    finger_id,
                })
                .map_err(|_| Error::protocol("too many templates in report"))?;
        }
        Ok(Self {
            total_query_messages,
            query_sequence,
            templates,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    Empty,
    /// Enrollment or deletion progress in percent.
    Progress(u8),
    FingerReport { present: bool },
    Match(MatchReport),
    TemplateRecords(TemplateRecordsReport),
    /// Payload of a message id this crate does not know.
    Raw(Vec<u8>),
}

/// A parsed message from the sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub response_id: u8,
    /// Result code of `*_FAIL` responses and general errors, `RESULT_SUCCESS` otherwise.
    pub result: u16,
    /// False when more messages belong to the same command.
    pub complete: bool,
    pub body: ResponseBody,
}

impl Response {
    pub fn parse(header: &MessageHeader<'_>) -> Result<Self> {
        let id = header.msg_id;
        let mut reader = header.payload;
        let mut result = RESULT_SUCCESS;

        let body = match id {
            RSP_FPS_INIT_FAIL | RSP_CANCEL_OP_FAIL | RSP_ENROLL_FAIL | RSP_ID_FAIL | RSP_VERIFY_FAIL
            | RSP_QUERY_FAIL | RSP_DEL_USER_FP_FAIL | RSP_DEL_FULL_DB_FAIL | RSP_POWER_DOWN_FAIL
            | RSP_GENERAL_ERROR => {
                result = reader.read_u16::<BigEndian>().map_err(too_short)?;
                ResponseBody::Empty
            }
            RSP_ENROLL_REPORT | RSP_DELETE_PROGRESS => {
                ResponseBody::Progress(reader.read_u8().map_err(too_short)?)
            }
            EVT_FINGER_REPORT => ResponseBody::FingerReport {
                present: reader.read_u8().map_err(too_short)? == 0x01,
            },
            RSP_ENROLL_OK | RSP_VERIFY_OK | RSP_ID_OK if !reader.is_empty() => {
                ResponseBody::Match(MatchReport::from_payload(reader)?)
            }
            RSP_TEMPLATE_RECORDS_REPORT => {
                ResponseBody::TemplateRecords(TemplateRecordsReport::from_payload(reader)?)
            }
            RSP_FPS_INIT_OK
            | RSP_CANCEL_OP_OK
            | RSP_ENROLL_READY
            | RSP_CAPTURE_COMPLETE
            | RSP_ENROLL_PAUSED
            | RSP_ENROLL_RESUMED
            | RSP_ENROLL_OK
            | RSP_ID_READY
            | RSP_ID_OK
            | RSP_VERIFY_READY
            | RSP_VERIFY_OK
            | RSP_QUERY_RESPONSE_COMPLETE
            | RSP_DEL_USER_FP_OK
            | RSP_DEL_FULL_DB_OK
            | RSP_POWER_DOWN_READY => {
                ResponseBody::Empty
            }
            _ => {
                debug!("unknown message id {:#04x}", id);
                ResponseBody::Raw(header.payload.to_vec())
            }
        };

        let complete = !matches!(
            id,
            RSP_ENROLL_READY
                | RSP_CAPTURE_COMPLETE
                | RSP_ENROLL_REPORT
                | RSP_ENROLL_PAUSED
                | RSP_ENROLL_RESUMED
                | RSP_ID_READY
                | RSP_VERIFY_READY
                | RSP_DELETE_PROGRESS
                | EVT_FINGER_REPORT
        );

        Ok(Self {
            response_id: id,
            result,
            complete,
            body,
        })
    }

    pub fn progress(&self) -> Option<u8> {
        match self.body {
            ResponseBody::Progress(p) => Some(p),
            _ => None,
        }
    }
}

/// Firmware identification returned by the get-version command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MisVersion {
    pub build_time: u32,
    pub build_num: u32,
    pub version_major: u8,
    pub version_minor: u8,
    pub target: u8,
    pub product: u8,
    pub silicon_rev: u8,
    pub formal_release: u8,
    pub platform: u8,
    pub patch: u8,
    pub serial_number: [u8; 6],
    pub security: u16,
    pub iface: u8,
    pub device_type: u8,
}

impl FromPayload for MisVersion {
    fn from_payload(payload: &[u8]) -> Result<Self> {
        let mut reader = payload;
        let status = reader.read_u16::<LittleEndian>().map_err(|_| {
            Error::protocol("reply to version query too short")
        })?;
        if status != 0 {
            return Err(Error::protocol(format!("device responded with error {}", status)));
        }
        let short = |_| Error::protocol("reply to version query too short");
        let build_time = reader.read_u32::<LittleEndian>().map_err(short)?;
        let build_num = reader.read_u32::<LittleEndian>().map_err(short)?;
        let version_major = reader.read_u8().map_err(short)?;
        let version_minor = reader.read_u8().map_err(short)?;
        let target = reader.read_u8().map_err(short)?;
        let product = reader.read_u8().map_err(short)?;
        let silicon_rev = reader.read_u8().map_err(short)?;
        let formal_release = reader.read_u8().map_err(short)?;
        let platform = reader.read_u8().map_err(short)?;
        let patch = reader.read_u8().map_err(short)?;
        let mut serial_number = [0u8; 6];
        reader.read_exact(&mut serial_number).map_err(short)?;
        let security = reader.read_u16::<LittleEndian>().map_err(short)?;
        let iface = reader.read_u8().map_err(short)?;
        let device_type = reader.read_u8().map_err(short)?;

        Ok(Self {
            build_time,
            build_num,
            version_major,
            version_minor,
            target,
            product,
            silicon_rev,
            formal_release,
            platform,
            patch,
            serial_number,
            security,
            iface,
            device_type,
        })
    }
}

impl MisVersion {
    /// Oldest firmware the message protocol works with: 10.1, build 2989158.
    pub const MIN_VERSION: (u8, u8, u32) = (10, 1, 2_989_158);

    pub fn is_supported(&self) -> bool {
        let (major, minor, build) = Self::MIN_VERSION;
        (self.version_major, self.version_minor, self.build_num) >= (major, minor, build)
    }

    pub fn serial_hex(&self) -> String {
        self.serial_number.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
