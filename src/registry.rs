use crate::actions::ActionEvent;
use crate::config::{SynapticsConfig, ENROLL_SAMPLES};
use crate::driver::Synaptics;
use crate::error::Result;
use crate::print::Print;
use crate::usb::UsbBackend;

pub const SYNAPTICS_VENDOR_ID: u16 = 0x06CB;

/// Operations every driver offers to the layer above.
pub trait FpDriver {
    fn info(&self) -> &'static DriverInfo;

    fn begin_open(&mut self) -> Result<()>;
    fn begin_close(&mut self) -> Result<()>;
    fn begin_probe(&mut self) -> Result<()>;
    fn begin_enroll(&mut self, print: Print) -> Result<()>;
    fn begin_verify(&mut self, target: &Print) -> Result<()>;
    fn begin_identify(&mut self, gallery: Vec<Print>) -> Result<()>;
    fn begin_list(&mut self) -> Result<()>;
    fn begin_delete(&mut self, target: &Print) -> Result<()>;
    fn begin_clear_storage(&mut self) -> Result<()>;
    fn cancel(&mut self);

    /// Makes progress on pending I/O; false when nothing could move.
    fn dispatch(&mut self) -> bool;
    fn poll_event(&mut self) -> Option<ActionEvent>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

/// The driver implementations this crate ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Synaptics,
}

impl DriverKind {
    pub fn instantiate<B: UsbBackend + 'static>(
        self,
        backend: B,
        config: SynapticsConfig,
    ) -> Box<dyn FpDriver> {
        match self {
            DriverKind::Synaptics => Box::new(Synaptics::new(backend, config)),
        }
    }
}

#[derive(Debug)]
pub struct DriverInfo {
    pub id: &'static str,
    pub full_name: &'static str,
    pub kind: DriverKind,
    pub id_table: &'static [UsbId],
    pub nr_enroll_stages: u32,
}

pub static SYNAPTICS_DRIVER: DriverInfo = DriverInfo {
    id: "synaptics",
    full_name: "Synaptics Sensors",
    kind: DriverKind::Synaptics,
    id_table: &[UsbId {
        vid: SYNAPTICS_VENDOR_ID,
        pid: 0x00BD,
    }],
    nr_enroll_stages: ENROLL_SAMPLES,
};

pub static DRIVERS: &[&DriverInfo] = &[&SYNAPTICS_DRIVER];

/// Finds the driver whose id table lists `vid:pid`.
pub fn find_driver(vid: u16, pid: u16) -> Option<&'static DriverInfo> {
    DRIVERS
        .iter()
        .copied()
        .find(|driver| driver.id_table.iter().any(|id| id.vid == vid && id.pid == pid))
}

impl<B: UsbBackend> FpDriver for Synaptics<B> {
    fn info(&self) -> &'static DriverInfo {
        &SYNAPTICS_DRIVER
    }

    fn begin_open(&mut self) -> Result<()> {
        Synaptics::begin_open(self)
    }

    fn begin_close(&mut self) -> Result<()> {
        Synaptics::begin_close(self)
    }

    fn begin_probe(&mut self) -> Result<()> {
        Synaptics::begin_probe(self)
    }

    fn begin_enroll(&mut self, print: Print) -> Result<()> {
        Synaptics::begin_enroll(self, print)
    }

    fn begin_verify(&mut self, target: &Print) -> Result<()> {
        Synaptics::begin_verify(self, target)
    }

    fn begin_identify(&mut self, gallery: Vec<Print>) -> Result<()> {
        Synaptics::begin_identify(self, gallery)
    }

    fn begin_list(&mut self) -> Result<()> {
        Synaptics::begin_list(self)
    }

    fn begin_delete(&mut self, target: &Print) -> Result<()> {
        Synaptics::begin_delete(self, target)
    }

    fn begin_clear_storage(&mut self) -> Result<()> {
        Synaptics::begin_clear_storage(self)
    }

    fn cancel(&mut self) {
        Synaptics::cancel(self)
    }

    fn dispatch(&mut self) -> bool {
        Synaptics::dispatch(self)
    }

    fn poll_event(&mut self) -> Option<ActionEvent> {
        Synaptics::poll_event(self)
    }
}
