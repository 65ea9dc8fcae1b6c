//! **synaptics-fp** is a driver core for Synaptics match-in-sensor USB fingerprint readers.
//!
//! The sensor keeps its templates on-chip and is driven through a framed
//! command/response protocol on two bulk endpoints, with an interrupt endpoint
//! announcing pending messages. This crate sequences that conversation on top of
//! any non-blocking [`UsbBackend`]: a small state machine engine ([`Ssm`]) composes
//! the transfers of one command, and the device ([`Synaptics`]) maps enroll,
//! verify, identify, list and delete onto it.
//!
//! Nothing blocks. Start an action, then call [`Synaptics::dispatch`] whenever the
//! backend may have made progress and collect [`ActionEvent`]s as they appear.
//!
//! ## Example
//!
//! Listing the prints stored on a (scripted) sensor:
//! ```
//! use synaptics_fp::fake::FakeSensor;
//! use synaptics_fp::{ActionEvent, Synaptics, SynapticsConfig};
//! # use synaptics_fp::responses::{RSP_TEMPLATE_RECORDS_REPORT, RSP_QUERY_RESPONSE_COMPLETE};
//!
//! let sensor = FakeSensor::new();
//! # let record = [1, 1, 0, 4, b'a', b'l', b'i', b'x', 1];
//! # sensor.queue_response(1, RSP_TEMPLATE_RECORDS_REPORT, &record);
//! # sensor.queue_response(1, RSP_QUERY_RESPONSE_COMPLETE, &[]);
//! let mut dev = Synaptics::new(sensor, SynapticsConfig::default());
//!
//! dev.begin_list().unwrap();
//! dev.run_until_idle();
//!
//! match dev.poll_event() {
//!     Some(ActionEvent::Listed(Ok(prints))) => println!("{} prints on the sensor", prints.len()),
//!     other => panic!("unexpected: {:?}", other),
//! }
//! ```
#![warn(missing_debug_implementations, rust_2018_idioms)]

mod actions;
mod config;
mod driver;
mod error;
mod print;
mod registry;
mod ssm;
mod store;
mod usb;
mod utils;

pub mod commands;
pub mod fake;
pub mod responses;

pub use crate::actions::{credited_stages, ActionEvent, MatchResult, ProbeInfo};
pub use crate::config::{SynapticsConfig, ENROLL_SAMPLES};
pub use crate::driver::{
    CmdEvent, CmdState, DeferredOutcome, MsgCallback, RunData, Synaptics, EP_INTERRUPT, EP_REPLY,
    EP_REQUEST,
};
pub use crate::error::{Error, Result, RetryReason, TransferError};
pub use crate::print::{
    build_user_id, parse_user_id, EnrollDate, Finger, Print, PrintData, UserIdInfo,
};
pub use crate::registry::{
    find_driver, DriverInfo, DriverKind, FpDriver, UsbId, DRIVERS, SYNAPTICS_DRIVER,
};
pub use crate::ssm::{CompletionHandler, Ssm, StateHandler};
pub use crate::store::{load_print, save_print, MemoryStore, PrintStore};
pub use crate::usb::{
    ssm_transfer_cb, Cancellable, Completed, Direction, OnComplete, Transfer, TransferId,
    TransferType, UsbBackend, UsbScheduler,
};
pub use crate::utils::{CommandWriter, FromPayload, ToPayload};
