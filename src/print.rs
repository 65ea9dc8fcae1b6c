use crate::commands::{UserId, MAX_USER_ID_LEN};
use crate::error::{Error, Result};

const USER_ID_PREFIX: &[u8] = b"FP1-";
const NO_USERNAME: &str = "nobody";

/// Which finger a print belongs to, numbered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Finger {
    Unknown = 0,
    LeftThumb = 1,
    LeftIndex = 2,
    LeftMiddle = 3,
    LeftRing = 4,
    LeftLittle = 5,
    RightThumb = 6,
    RightIndex = 7,
    RightMiddle = 8,
    RightRing = 9,
    RightLittle = 10,
}

impl Finger {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Finger {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Unknown,
            1 => Self::LeftThumb,
            2 => Self::LeftIndex,
            3 => Self::LeftMiddle,
            4 => Self::LeftRing,
            5 => Self::LeftLittle,
            6 => Self::RightThumb,
            7 => Self::RightIndex,
            8 => Self::RightMiddle,
            9 => Self::RightRing,
            10 => Self::RightLittle,
            _ => return Err(Error::DataInvalid),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EnrollDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl EnrollDate {
    pub fn new(year: u16, month: u8, day: u8) -> Option<Self> {
        if year == 0 || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return None;
        }
        Some(Self { year, month, day })
    }

    /// Decodes `YYYYMMDD`.
    pub fn from_ymd(ymd: u32) -> Option<Self> {
        let year = u16::try_from(ymd / 10_000).ok()?;
        Self::new(year, ((ymd / 100) % 100) as u8, (ymd % 100) as u8)
    }
}

/// What the sensor needs to address a stored template: its finger slot and user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintData {
    pub finger_id: u8,
    pub user_id: UserId,
}

fn validate_user_id(user_id: &[u8]) -> Result<()> {
    match user_id.first() {
        None | Some(b' ') => Err(Error::DataInvalid),
        Some(_) if user_id.len() > MAX_USER_ID_LEN => Err(Error::DataInvalid),
        Some(_) => Ok(()),
    }
}

impl PrintData {
    pub fn new(finger_id: u8, user_id: &[u8]) -> Result<Self> {
        validate_user_id(user_id)?;
        let mut id = UserId::new();
        id.try_extend_from_slice(user_id).map_err(|_| Error::DataInvalid)?;
        Ok(Self {
            finger_id,
            user_id: id,
        })
    }

    /// Frames the data as an opaque storage record: `[finger] [uid_len] [uid]`.
    pub fn to_record(&self) -> Vec<u8> {
        let mut record = Vec::with_capacity(2 + self.user_id.len());
        record.push(self.finger_id);
        // user ids never exceed 100 bytes
        record.push(self.user_id.len() as u8);
        record.extend_from_slice(&self.user_id);
        record
    }

    pub fn from_record(record: &[u8]) -> Result<Self> {
        match record {
            [finger_id, len, user_id @ ..] if usize::from(*len) == user_id.len() => {
                Self::new(*finger_id, user_id)
            }
            _ => Err(Error::DataInvalid),
        }
    }
}

/// A fingerprint template known to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Print {
    pub finger: Finger,
    pub username: Option<String>,
    pub enroll_date: Option<EnrollDate>,
    pub description: Option<String>,
    /// The template itself lives on the sensor.
    pub device_stored: bool,
    pub data: Option<PrintData>,
}

impl Print {
    pub fn new(finger: Finger) -> Self {
        Self {
            finger,
            username: None,
            enroll_date: None,
            description: None,
            device_stored: false,
            data: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_enroll_date(mut self, date: EnrollDate) -> Self {
        self.enroll_date = Some(date);
        self
    }

    /// Builds a print from a template record reported by the sensor, recovering
    /// finger, username and enroll date from the user id when it carries them.
    pub fn from_template(finger_id: u8, user_id: &UserId) -> Self {
        let mut print = Print::new(Finger::Unknown);
        if let Some(info) = parse_user_id(user_id) {
            print.finger = info.finger;
            print.username = info.username;
            print.enroll_date = info.enroll_date;
        }
        print.description = Some(String::from_utf8_lossy(user_id).into_owned());
        print.device_stored = true;
        print.data = Some(PrintData {
            finger_id,
            user_id: user_id.clone(),
        });
        print
    }

    pub fn user_id(&self) -> Option<&[u8]> {
        self.data.as_ref().map(|d| &d.user_id[..])
    }
}

/// Metadata recovered from a user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdInfo {
    pub enroll_date: Option<EnrollDate>,
    pub finger: Finger,
    pub username: Option<String>,
}

/// Formats `FP1-YYYYMMDD-F-RRRRRRRR-username`, truncated to the sensor's limit.
pub fn build_user_id(
    date: Option<EnrollDate>,
    finger: Finger,
    rand_id: u32,
    username: Option<&str>,
) -> UserId {
    let (y, m, d) = date.map_or((0, 0, 0), |d| (d.year, d.month, d.day));
    let text = format!(
        "FP1-{:04}{:02}{:02}-{:X}-{:08X}-{}",
        y,
        m,
        d,
        finger.as_u8(),
        rand_id,
        username.unwrap_or(NO_USERNAME)
    );
    text.bytes().take(MAX_USER_ID_LEN).collect()
}

/// Recovers metadata from a user id written by [`build_user_id`]. Ids in any
/// other format yield `None`.
pub fn parse_user_id(user_id: &[u8]) -> Option<UserIdInfo> {
    if !user_id.starts_with(USER_ID_PREFIX)
        || user_id.len() < 24
        || user_id[12] != b'-'
        || user_id[14] != b'-'
        || user_id[23] != b'-'
    {
        return None;
    }

    let enroll_date = std::str::from_utf8(&user_id[4..12])
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|ymd| *ymd > 0)
        .and_then(EnrollDate::from_ymd);

    let finger = char::from(user_id[13])
        .to_digit(16)
        .and_then(|f| Finger::try_from(f as u8).ok())
        .unwrap_or(Finger::Unknown);

    let username = String::from_utf8_lossy(&user_id[24..]).into_owned();
    let username = if username.is_empty() || username == NO_USERNAME {
        None
    } else {
        Some(username)
    };

    Some(UserIdInfo {
        enroll_date,
        finger,
        username,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_format() {
        let date = EnrollDate::new(2024, 3, 9);
        let id = build_user_id(date, Finger::RightIndex, 0xAB, Some("alice"));
        assert_eq!(&id[..], b"FP1-20240309-7-000000AB-alice");

        let info = parse_user_id(&id).unwrap();
        assert_eq!(info.enroll_date, date);
        assert_eq!(info.finger, Finger::RightIndex);
        assert_eq!(info.username.as_deref(), Some("alice"));
    }

    #[test]
    fn missing_metadata_uses_defaults() {
        let id = build_user_id(None, Finger::Unknown, 0, None);
        assert_eq!(&id[..], b"FP1-00000000-0-00000000-nobody");
        let info = parse_user_id(&id).unwrap();
        assert_eq!(info.enroll_date, None);
        assert_eq!(info.username, None);
    }

    #[test]
    fn long_usernames_are_truncated() {
        let name = "x".repeat(200);
        let id = build_user_id(None, Finger::LeftThumb, 1, Some(&name));
        assert_eq!(id.len(), MAX_USER_ID_LEN);
    }

    #[test]
    fn foreign_user_ids_carry_no_metadata() {
        assert_eq!(parse_user_id(b"some-other-id"), None);
        assert_eq!(parse_user_id(b"FP1-20240309x7-000000AB-alice"), None);

        let print = Print::from_template(1, &UserId::try_from(&b"legacy"[..]).unwrap());
        assert_eq!(print.finger, Finger::Unknown);
        assert_eq!(print.description.as_deref(), Some("legacy"));
        assert!(print.device_stored);
        assert_eq!(print.user_id(), Some(&b"legacy"[..]));
    }

    #[test]
    fn record_framing() {
        let data = PrintData::new(1, b"FP1-x").unwrap();
        let record = data.to_record();
        assert_eq!(record, vec![1, 5, b'F', b'P', b'1', b'-', b'x']);
        assert_eq!(PrintData::from_record(&record).unwrap(), data);
    }

    #[test]
    fn invalid_records_are_refused() {
        assert_eq!(PrintData::from_record(&[1]), Err(Error::DataInvalid));
        assert_eq!(PrintData::from_record(&[1, 0]), Err(Error::DataInvalid));
        assert_eq!(PrintData::from_record(&[1, 2, b' ', b'a']), Err(Error::DataInvalid));
        assert_eq!(PrintData::from_record(&[1, 3, b'a']), Err(Error::DataInvalid));
        assert_eq!(PrintData::new(1, &[b'a'; 101]), Err(Error::DataInvalid));
    }
}
