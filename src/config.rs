/// Number of touches the sensor needs for one enrollment.
pub const ENROLL_SAMPLES: u32 = 12;

const EMULATION_ENV: &str = "FP_DEVICE_EMULATION";

/// Tunables for a [`Synaptics`](crate::Synaptics) device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynapticsConfig {
    /// Timeout for outgoing bulk writes, in milliseconds.
    pub cmd_timeout_ms: u32,

    /// Timeout for reading one reply frame, in milliseconds.
    pub reply_timeout_ms: u32,

    /// Per-attempt timeout of the interrupt poll loop that runs after a wake-up
    /// without the "message pending" bit. The first interrupt wait has no timeout.
    pub interrupt_poll_timeout_ms: u32,

    /// Enrollment stages reported to the caller.
    pub enroll_samples: u32,

    /// Deterministic ids and serial numbers, for recorded-traffic replay.
    pub emulation: bool,

    /// Send the firmware "async message read" command after an interrupt wake-up
    /// before reading the reply, instead of reading the reply directly.
    pub request_async_read: bool,
}

impl Default for SynapticsConfig {
    fn default() -> Self {
        Self {
            cmd_timeout_ms: 1000,
            reply_timeout_ms: 5000,
            interrupt_poll_timeout_ms: 1000,
            enroll_samples: ENROLL_SAMPLES,
            emulation: false,
            request_async_read: false,
        }
    }
}

impl SynapticsConfig {
    /// Defaults, with emulation switched on when `FP_DEVICE_EMULATION=1`.
    pub fn from_env() -> Self {
        let emulation = std::env::var(EMULATION_ENV)
            .map(|v| v == "1")
            .unwrap_or(false);
        Self {
            emulation,
            ..Self::default()
        }
    }

    pub fn with_emulation(mut self, emulation: bool) -> Self {
        self.emulation = emulation;
        self
    }

    pub fn with_async_read(mut self, request_async_read: bool) -> Self {
        self.request_async_read = request_async_read;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_firmware_expectations() {
        let cfg = SynapticsConfig::default();
        assert_eq!(cfg.cmd_timeout_ms, 1000);
        assert_eq!(cfg.reply_timeout_ms, 5000);
        assert_eq!(cfg.enroll_samples, 12);
        assert!(!cfg.emulation);
        assert!(!cfg.request_async_read);
    }

    #[test]
    fn builders_override_flags() {
        let cfg = SynapticsConfig::default()
            .with_emulation(true)
            .with_async_read(true);
        assert!(cfg.emulation);
        assert!(cfg.request_async_read);
    }
}
