use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::actions::{Action, ActionEvent, ProbeInfo};
use crate::commands::{
    command_frame, Request, SeqNum, SENSOR_CMD_ASYNC_MSG_READ, SENSOR_CMD_GET_VERSION,
};
use crate::config::SynapticsConfig;
use crate::error::{Error, Result, TransferError};
use crate::responses::{
    MessageHeader, MisVersion, Response, EVT_FINGER_REPORT, RSP_CANCEL_OP_FAIL, RSP_CANCEL_OP_OK,
    RSP_GENERAL_ERROR, USB_ASYNC_MESSAGE_PENDING,
};
use crate::ssm::{CompletionHandler, Ssm};
use crate::usb::{ssm_transfer_cb, Cancellable, OnComplete, Transfer, UsbBackend, UsbScheduler};
use crate::utils::FromPayload;

pub const EP_REQUEST: u8 = 0x01;
pub const EP_REPLY: u8 = 0x81;
pub const EP_INTERRUPT: u8 = 0x83;

pub const INTERRUPT_DATA_SIZE: usize = 7;
const VERSION_REPLY_LEN: usize = 40;
const EMULATED_SERIAL: &str = "emulated-device";

/// States of the command state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdState {
    SendPending = 0,
    GetResp,
    WaitInterrupt,
    SendAsync,
    Restart,
}

const CMD_NUM_STATES: usize = 5;

impl CmdState {
    fn from_index(index: usize) -> Option<Self> {
        Some(match index {
            0 => Self::SendPending,
            1 => Self::GetResp,
            2 => Self::WaitInterrupt,
            3 => Self::SendAsync,
            4 => Self::Restart,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeState {
    SendVersion = 0,
    ReadVersion,
}

const PROBE_NUM_STATES: usize = 2;

/// Result held back until the finger leaves the sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredOutcome {
    NoMatch,
    Error(Error),
}

/// What a command's response handler is told.
#[derive(Debug)]
pub enum CmdEvent<'a> {
    /// A parsed response that belongs to the command.
    Response(&'a Response),
    /// The run finished on finger removal with a deferred outcome armed.
    Deferred(DeferredOutcome),
    /// The run finished.
    Done(Result<()>),
}

/// Response handler bound to a command run.
pub type MsgCallback<B> = fn(&mut Synaptics<B>, CmdEvent<'_>);

/// Per-run data of the device's state machine.
pub enum RunData<B: UsbBackend> {
    Command(MsgCallback<B>),
    Probe,
}

impl<B: UsbBackend> std::fmt::Debug for RunData<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunData::Command(_) => write!(f, "RunData::Command"),
            RunData::Probe => write!(f, "RunData::Probe"),
        }
    }
}

type Handler<B> = OnComplete<Synaptics<B>, RunData<B>>;
type DeviceSsm<B> = Ssm<Synaptics<B>, RunData<B>>;

/// Sequencing and correlation state of one device.
#[derive(Debug, Default)]
pub(crate) struct Session {
    pub(crate) last_seq_num: u8,
    pub(crate) cmd_seq_num: u8,
    pending: Option<Transfer>,
    pub(crate) finger_on_sensor: bool,
    pub(crate) deferred: Option<DeferredOutcome>,
    /// Set by `cancel()` until the run ends; the run no longer waits on interrupts.
    cancel_requested: bool,
}

/// A Synaptics match-in-sensor device.
///
/// All work is driven from [`Synaptics::dispatch`]: each call resolves at most one
/// USB transfer and runs every state transition that follows from it. Results of
/// the actions started with the `begin_*` methods are collected as
/// [`ActionEvent`]s and drained with [`Synaptics::poll_event`].
pub struct Synaptics<B: UsbBackend> {
    usb: UsbScheduler<B, Handler<B>>,
    config: SynapticsConfig,
    pub(crate) session: Session,
    ssm: Option<DeviceSsm<B>>,
    /// Set while a run is alive, including while `ssm` is taken out to be driven.
    ssm_running: bool,
    interrupt_cancellable: Cancellable,
    pub(crate) action: Option<Action>,
    events: VecDeque<ActionEvent>,
    version: Option<MisVersion>,
}

impl<B: UsbBackend> std::fmt::Debug for Synaptics<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synaptics")
            .field("config", &self.config)
            .field("session", &self.session)
            .field("ssm", &self.ssm)
            .field("ssm_running", &self.ssm_running)
            .field("action", &self.action)
            .field("events", &self.events)
            .finish()
    }
}

impl<B: UsbBackend> Synaptics<B> {
    pub fn new(backend: B, config: SynapticsConfig) -> Self {
        Self {
            usb: UsbScheduler::new(backend),
            config,
            session: Session::default(),
            ssm: None,
            ssm_running: false,
            interrupt_cancellable: Cancellable::new(),
            action: None,
            events: VecDeque::new(),
            version: None,
        }
    }

    pub fn config(&self) -> &SynapticsConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        self.usb.backend()
    }

    pub fn backend_mut(&mut self) -> &mut B {
        self.usb.backend_mut()
    }

    /// Transfers submitted and not yet resolved.
    pub fn transfers_in_flight(&self) -> usize {
        self.usb.in_flight()
    }

    pub fn last_seq_num(&self) -> u8 {
        self.session.last_seq_num
    }

    /// Sequence number expected in replies to the current command.
    pub fn cmd_seq_num(&self) -> u8 {
        self.session.cmd_seq_num
    }

    pub fn finger_on_sensor(&self) -> bool {
        self.session.finger_on_sensor
    }

    pub fn has_active_run(&self) -> bool {
        self.ssm_running
    }

    /// Firmware information from the last successful probe.
    pub fn version(&self) -> Option<&MisVersion> {
        self.version.as_ref()
    }

    pub fn poll_event(&mut self) -> Option<ActionEvent> {
        self.events.pop_front()
    }

    pub fn take_events(&mut self) -> Vec<ActionEvent> {
        self.events.drain(..).collect()
    }

    pub(crate) fn push_event(&mut self, event: ActionEvent) {
        self.events.push_back(event);
    }

    pub(crate) fn interrupt_cancellable_reset(&mut self) {
        self.interrupt_cancellable = Cancellable::new();
    }

    /// Resolves one transfer and runs what follows from it. Returns false when
    /// nothing could make progress.
    pub fn dispatch(&mut self) -> bool {
        let Some(done) = self.usb.poll() else {
            return false;
        };
        match done.handler {
            OnComplete::Detached(callback) => callback(self, done.transfer, done.result),
            OnComplete::Ssm(callback) => match self.ssm.take() {
                Some(mut ssm) => {
                    callback(&mut ssm, self, done.transfer, done.result);
                    if let Some(ssm) = ssm.drive(self) {
                        self.ssm = Some(ssm);
                    }
                }
                None => warn!("transfer completed without a state machine to drive"),
            },
        }
        true
    }

    /// Dispatches until no transfer can make progress. Returns the number of transfers resolved.
    pub fn run_until_idle(&mut self) -> usize {
        let mut resolved = 0;
        while self.dispatch() {
            resolved += 1;
        }
        resolved
    }

    fn start_ssm(&mut self, ssm: DeviceSsm<B>, done: CompletionHandler<Self, RunData<B>>) {
        self.ssm_running = true;
        if let Some(ssm) = ssm.start(self, done) {
            self.ssm = Some(ssm);
        }
    }

    /// Issues a correlated command.
    ///
    /// Without a running state machine a new run is started with `callback` as its
    /// response handler. With one running, the command is queued and the run sends
    /// it at its next Send-Pending state; the run keeps its original handler.
    pub fn sensor_cmd(
        &mut self,
        seq: SeqNum,
        request: &Request,
        callback: Option<MsgCallback<B>>,
    ) -> Result<()> {
        if self.session.pending.is_some() {
            return Err(Error::Busy);
        }
        if !self.ssm_running && callback.is_none() {
            return Err(Error::General("a new command needs a response handler".into()));
        }

        let seq_num = match seq {
            SeqNum::Next => self.session.last_seq_num.wrapping_add(1).max(1),
            SeqNum::Fixed(n) => n.get(),
        };
        let mut transfer = Transfer::bulk_out(EP_REQUEST, command_frame(seq_num, request)?);
        transfer.short_is_error = true;

        self.session.last_seq_num = seq_num;
        if seq == SeqNum::Next {
            self.session.cmd_seq_num = seq_num;
        }
        debug!("sequence number is {}", seq_num);
        self.session.pending = Some(transfer);

        match callback {
            Some(callback) if !self.ssm_running => {
                let ssm = Ssm::new(
                    "synaptics-cmd",
                    CMD_NUM_STATES,
                    cmd_run_state,
                    RunData::Command(callback),
                );
                self.start_ssm(ssm, cmd_ssm_done);
            }
            Some(_) => debug!("continued command keeps the running response handler"),
            None => {}
        }
        Ok(())
    }

    /// Sends a command outside any state machine, reusing the last sequence number.
    /// Only used for cancellation.
    pub fn sensor_cmd_detached(&mut self, request: &Request) -> Result<()> {
        let seq_num = self.session.last_seq_num.max(1);
        debug!("sequence number is {} (detached)", seq_num);
        let mut transfer = Transfer::bulk_out(EP_REQUEST, command_frame(seq_num, request)?);
        transfer.short_is_error = true;
        self.usb.submit(
            transfer,
            self.config.cmd_timeout_ms,
            None,
            OnComplete::Detached(cmd_forget_cb),
        );
        Ok(())
    }

    /// Asks the sensor to abort the running action.
    ///
    /// Sends `CANCEL_OP` and wakes the interrupt wait, so the run goes back to
    /// reading replies and finishes when the sensor acknowledges.
    pub fn cancel(&mut self) {
        if self.action.is_none() && !self.ssm_running {
            debug!("nothing to cancel");
            return;
        }
        if let Err(e) = self.sensor_cmd_detached(&Request::CancelOp) {
            warn!("could not send cancellation: {}", e);
        }
        if self.ssm_running {
            self.session.cancel_requested = true;
        }
        self.interrupt_cancellable.cancel();
        self.interrupt_cancellable_reset();
    }

    /// Reads the firmware version on its own state machine.
    pub(crate) fn start_probe(&mut self) -> Result<()> {
        if self.ssm_running {
            return Err(Error::Busy);
        }
        self.usb.backend_mut().claim_interface()?;
        let ssm = Ssm::new("synaptics-probe", PROBE_NUM_STATES, probe_run_state, RunData::Probe);
        self.start_ssm(ssm, probe_ssm_done);
        Ok(())
    }
}

fn cmd_run_state<B: UsbBackend>(ssm: &mut DeviceSsm<B>, dev: &mut Synaptics<B>) {
    let Some(state) = CmdState::from_index(ssm.cur_state()) else {
        ssm.mark_failed(Error::General(format!("unknown command state {}", ssm.cur_state())));
        return;
    };
    match state {
        CmdState::SendPending => match dev.session.pending.take() {
            Some(transfer) => {
                dev.usb.submit(
                    transfer,
                    dev.config.cmd_timeout_ms,
                    None,
                    OnComplete::Ssm(ssm_transfer_cb),
                );
            }
            None => ssm.next_state(),
        },

        CmdState::GetResp => {
            let transfer = Transfer::bulk_in(EP_REPLY, crate::commands::MAX_TRANSFER_LEN);
            dev.usb.submit(
                transfer,
                dev.config.reply_timeout_ms,
                None,
                OnComplete::Ssm(cmd_receive_cb),
            );
        }

        CmdState::WaitInterrupt if dev.session.cancel_requested => {
            debug!("cancellation requested, reading the acknowledgement");
            ssm.jump_to_state(CmdState::GetResp as usize);
        }

        CmdState::WaitInterrupt => {
            let transfer = Transfer::interrupt_in(EP_INTERRUPT, INTERRUPT_DATA_SIZE);
            dev.usb.submit(
                transfer,
                0,
                Some(dev.interrupt_cancellable.clone()),
                OnComplete::Ssm(cmd_interrupt_cb),
            );
        }

        CmdState::SendAsync => {
            let mut transfer = Transfer::bulk_out(EP_REQUEST, vec![SENSOR_CMD_ASYNC_MSG_READ]);
            transfer.short_is_error = true;
            dev.usb.submit(
                transfer,
                dev.config.cmd_timeout_ms,
                None,
                OnComplete::Ssm(ssm_transfer_cb),
            );
        }

        CmdState::Restart => ssm.jump_to_state(CmdState::SendPending as usize),
    }
}

fn cmd_receive_cb<B: UsbBackend>(
    ssm: &mut DeviceSsm<B>,
    dev: &mut Synaptics<B>,
    transfer: Transfer,
    result: std::result::Result<(), TransferError>,
) {
    if let Err(e) = result {
        ssm.mark_failed(e.into());
        return;
    }

    let header = match MessageHeader::parse_reply(transfer.data()) {
        Ok(header) => header,
        Err(e) => {
            warn!("corrupted message received: {}", e);
            ssm.mark_failed(e);
            return;
        }
    };

    if header.msg_id == EVT_FINGER_REPORT {
        if header.payload.len() != 1 {
            warn!("corrupted finger report received");
            ssm.mark_failed(Error::protocol("corrupted finger report"));
            return;
        }
        dev.session.finger_on_sensor = header.payload[0] == 0x01;
        if !dev.session.finger_on_sensor && dev.session.deferred.is_some() {
            debug!("finger removed, completing deferred command");
            ssm.mark_completed();
            return;
        }
        debug!(
            "finger is now {} the sensor",
            if dev.session.finger_on_sensor { "on" } else { "off" }
        );
    }

    let response = match Response::parse(&header) {
        Ok(response) => response,
        Err(e) => {
            warn!("could not parse message payload: {}", e);
            ssm.mark_failed(e);
            return;
        }
    };

    match response.response_id {
        RSP_CANCEL_OP_OK => {
            debug!("received cancellation success response");
            ssm.mark_failed(Error::Cancelled);
            return;
        }
        RSP_CANCEL_OP_FAIL => {
            debug!("cancellation failed");
            ssm.mark_failed(Error::protocol(format!(
                "cancellation failed with {}",
                response.result
            )));
            return;
        }
        _ => {}
    }

    if header.seq_num == 0 {
        if header.msg_id == RSP_GENERAL_ERROR {
            warn!("received general error {} from the sensor", response.result);
            ssm.mark_failed(Error::DeviceReported { code: response.result });
        } else {
            debug!("ignoring message {:#04x} with sequence number 0", header.msg_id);
            ssm.next_state();
        }
        return;
    }

    if header.seq_num != dev.session.cmd_seq_num {
        warn!(
            "unexpected sequence number from device, {} instead of {}",
            header.seq_num, dev.session.cmd_seq_num
        );
    }

    if let RunData::Command(callback) = ssm.data() {
        let callback = *callback;
        callback(dev, CmdEvent::Response(&response));
    }

    // the handler may have queued a follow-up command
    if dev.session.pending.is_some() {
        ssm.jump_to_state(CmdState::SendPending as usize);
    } else if !response.complete || dev.session.deferred.is_some() {
        ssm.next_state();
    } else {
        ssm.mark_completed();
    }
}

fn cmd_interrupt_cb<B: UsbBackend>(
    ssm: &mut DeviceSsm<B>,
    dev: &mut Synaptics<B>,
    transfer: Transfer,
    result: std::result::Result<(), TransferError>,
) {
    debug!("interrupt transfer done");
    match result {
        Err(TransferError::Cancelled) => ssm.jump_to_state(CmdState::GetResp as usize),
        Err(TransferError::Timeout) => resubmit_interrupt(dev, transfer),
        Err(e) => ssm.mark_failed(e.into()),
        Ok(()) => {
            let pending = transfer
                .data()
                .first()
                .map_or(false, |status| status & USB_ASYNC_MESSAGE_PENDING != 0);
            if !pending {
                resubmit_interrupt(dev, transfer);
            } else if dev.config.request_async_read {
                ssm.jump_to_state(CmdState::SendAsync as usize);
            } else {
                ssm.jump_to_state(CmdState::GetResp as usize);
            }
        }
    }
}

fn resubmit_interrupt<B: UsbBackend>(dev: &mut Synaptics<B>, transfer: Transfer) {
    dev.usb.submit(
        transfer,
        dev.config.interrupt_poll_timeout_ms,
        Some(dev.interrupt_cancellable.clone()),
        OnComplete::Ssm(cmd_interrupt_cb),
    );
}

fn cmd_ssm_done<B: UsbBackend>(dev: &mut Synaptics<B>, data: RunData<B>, result: Result<()>) {
    dev.ssm_running = false;
    dev.session.cancel_requested = false;
    if dev.session.pending.take().is_some() {
        warn!("dropping queued command of a finished run");
    }
    let deferred = dev.session.deferred.take();
    let RunData::Command(callback) = data else {
        return;
    };
    let event = match (result, deferred) {
        (Err(e), _) => CmdEvent::Done(Err(e)),
        (Ok(()), Some(outcome)) => CmdEvent::Deferred(outcome),
        (Ok(()), None) => CmdEvent::Done(Ok(())),
    };
    callback(dev, event);
}

fn cmd_forget_cb<B: UsbBackend>(
    _dev: &mut Synaptics<B>,
    _transfer: Transfer,
    result: std::result::Result<(), TransferError>,
) {
    match result {
        Ok(()) => debug!("async command sent successfully"),
        Err(e) => warn!("async command sending failed: {}", e),
    }
}

fn probe_run_state<B: UsbBackend>(ssm: &mut DeviceSsm<B>, dev: &mut Synaptics<B>) {
    if ssm.cur_state() == ProbeState::SendVersion as usize {
        let mut transfer = Transfer::bulk_out(EP_REQUEST, vec![SENSOR_CMD_GET_VERSION]);
        transfer.short_is_error = true;
        dev.usb.submit(
            transfer,
            dev.config.cmd_timeout_ms,
            None,
            OnComplete::Ssm(ssm_transfer_cb),
        );
    } else if ssm.cur_state() == ProbeState::ReadVersion as usize {
        dev.usb.submit(
            Transfer::bulk_in(EP_REPLY, VERSION_REPLY_LEN),
            dev.config.cmd_timeout_ms,
            None,
            OnComplete::Ssm(probe_version_cb),
        );
    }
}

fn probe_version_cb<B: UsbBackend>(
    ssm: &mut DeviceSsm<B>,
    dev: &mut Synaptics<B>,
    transfer: Transfer,
    result: std::result::Result<(), TransferError>,
) {
    if let Err(e) = result {
        ssm.mark_failed(e.into());
        return;
    }
    let version = match MisVersion::from_payload(transfer.data()) {
        Ok(version) => version,
        Err(e) => {
            warn!("bad reply to version query: {}", e);
            ssm.mark_failed(e);
            return;
        }
    };

    debug!("build time: {}", version.build_time);
    debug!("build num: {}", version.build_num);
    debug!("version: {}.{}", version.version_major, version.version_minor);
    debug!("target: {}", version.target);
    debug!("product: {}", version.product);

    if !version.is_supported() {
        warn!(
            "firmware version {}.{} with build number {} is unsupported",
            version.version_major, version.version_minor, version.build_num
        );
        ssm.mark_failed(Error::UnsupportedFirmware {
            major: version.version_major,
            minor: version.version_minor,
            build: version.build_num,
        });
        return;
    }
    dev.version = Some(version);
    ssm.next_state();
}

fn probe_ssm_done<B: UsbBackend>(dev: &mut Synaptics<B>, _data: RunData<B>, result: Result<()>) {
    dev.ssm_running = false;
    dev.session.cancel_requested = false;
    if let Err(e) = dev.usb.backend_mut().release_interface() {
        warn!("could not release interface after probe: {}", e);
    }
    let outcome = result.and_then(|()| {
        let version = dev
            .version
            .clone()
            .ok_or_else(|| Error::protocol("probe finished without a version"))?;
        let serial = if dev.config.emulation {
            EMULATED_SERIAL.to_string()
        } else {
            version.serial_hex()
        };
        Ok(ProbeInfo { serial, version })
    });
    dev.resolve(ActionEvent::Probed(outcome));
}
