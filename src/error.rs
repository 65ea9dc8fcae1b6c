use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a transfer did not complete successfully.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("transfer timed out")]
    Timeout,

    /// The transfer's cancellable was triggered while it was in flight.
    #[error("transfer was cancelled")]
    Cancelled,

    /// Fewer bytes than requested were moved on a transfer flagged `short_is_error`.
    #[error("short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("transport I/O error: {0}")]
    Io(String),
}

/// Hints attached to [`Error::Retry`]; the user is expected to try again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    General,
    TooShort,
    CenterFinger,
    RemoveFinger,
}

impl std::fmt::Display for RetryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryReason::General => write!(f, "please try again"),
            RetryReason::TooShort => write!(f, "swipe was too short"),
            RetryReason::CenterFinger => write!(f, "finger was not centered"),
            RetryReason::RemoveFinger => write!(f, "remove finger and try again"),
        }
    }
}

/// Errors reported by the driver and its actions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed header or payload, or a frame that makes no sense at this point.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// A numeric error code returned in-band by the sensor.
    #[error("device reported error {code}")]
    DeviceReported { code: u16 },

    /// The sensor acknowledged a cancellation request.
    #[error("device reported cancellation of operation")]
    Cancelled,

    #[error("retry: {0}")]
    Retry(RetryReason),

    #[error("print was not found on the device")]
    DataNotFound,

    #[error("print already exists on the device")]
    DataExists,

    #[error("device storage is full")]
    DataFull,

    #[error("print data is invalid")]
    DataInvalid,

    #[error("unsupported firmware version ({major}.{minor} with build number {build})")]
    UnsupportedFirmware { major: u8, minor: u8, build: u32 },

    /// Another action or correlated command is already in progress.
    #[error("device is busy")]
    Busy,

    #[error("{0}")]
    General(String),
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// True for outcomes the caller should surface as "try again" rather than a fault.
    pub fn is_retry(&self) -> bool {
        matches!(self, Error::Retry(_))
    }
}
