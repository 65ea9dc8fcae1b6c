//! High-level actions on top of the command layer.
//!
//! Every `begin_*` method issues one command with a response interpreter. The
//! interpreter turns responses into progress events and exactly one terminal
//! [`ActionEvent`] per accepted action. `begin_*` itself only fails with
//! [`Error::Busy`] (or a transport error while claiming the interface), in which
//! case no event follows.

use tracing::{debug, info, warn};

use crate::commands::{Request, SeqNum};
use crate::driver::{CmdEvent, DeferredOutcome, Synaptics};
use crate::error::{Error, Result, RetryReason};
use crate::print::{build_user_id, Print, PrintData};
use crate::responses::*;
use crate::usb::UsbBackend;

/// Finger slot used for every enrollment, from the sensor's point of view.
const DEVICE_FINGER: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Match,
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeInfo {
    pub serial: String,
    pub version: MisVersion,
}

/// Progress and results of actions, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionEvent {
    Opened(Result<()>),
    Closed(Result<()>),
    Probed(Result<ProbeInfo>),
    /// One credited enrollment stage, or a retry hint when a touch brought no progress.
    EnrollProgress { stage: u32, error: Option<Error> },
    Enrolled(Result<Print>),
    Verified(Result<MatchResult>),
    /// The matching gallery print, or `None` for no match.
    Identified(Result<Option<Print>>),
    Listed(Result<Vec<Print>>),
    Deleted(Result<()>),
    StorageCleared(Result<()>),
}

/// The action in progress on a device.
#[derive(Debug)]
pub(crate) enum Action {
    Open,
    Close,
    Probe,
    Enroll { print: Print, stage: u32 },
    Verify,
    Identify { gallery: Vec<Print> },
    List { prints: Vec<Print> },
    Delete,
    ClearStorage,
}

impl Action {
    fn failed(self, error: Error) -> ActionEvent {
        match self {
            Action::Open => ActionEvent::Opened(Err(error)),
            Action::Close => ActionEvent::Closed(Err(error)),
            Action::Probe => ActionEvent::Probed(Err(error)),
            Action::Enroll { .. } => ActionEvent::Enrolled(Err(error)),
            Action::Verify => ActionEvent::Verified(Err(error)),
            Action::Identify { .. } => ActionEvent::Identified(Err(error)),
            Action::List { .. } => ActionEvent::Listed(Err(error)),
            Action::Delete => ActionEvent::Deleted(Err(error)),
            Action::ClearStorage => ActionEvent::StorageCleared(Err(error)),
        }
    }
}

/// Enrollment stages credited for a progress report of `progress` percent.
///
/// Rounds up, but never reports the last stage before the sensor says 100%.
pub fn credited_stages(progress: u8, samples: u32) -> u32 {
    let progress = progress.min(100);
    let done = (u32::from(progress) * samples + 99) / 100;
    if progress < 100 {
        done.min(samples.saturating_sub(1))
    } else {
        done
    }
}

impl<B: UsbBackend> Synaptics<B> {
    /// Ends the current action with `event`. Later results for the same action are dropped.
    pub(crate) fn resolve(&mut self, event: ActionEvent) {
        if self.action.take().is_none() {
            debug!("dropping result of an already finished action: {:?}", event);
            return;
        }
        self.push_event(event);
    }

    fn begin(&mut self, action: Action) -> Result<()> {
        if self.action.is_some() || self.has_active_run() {
            return Err(Error::Busy);
        }
        self.action = Some(action);
        Ok(())
    }

    fn issue(&mut self, request: &Request, callback: crate::driver::MsgCallback<B>) {
        if let Err(e) = self.sensor_cmd(SeqNum::Next, request, Some(callback)) {
            self.fail_action(e);
        }
    }

    fn fail_action(&mut self, error: Error) {
        if let Some(action) = self.action.take() {
            self.push_event(action.failed(error));
        }
    }

    /// Claims the interface and initialises the sensor.
    pub fn begin_open(&mut self) -> Result<()> {
        self.begin(Action::Open)?;
        if let Err(e) = self.backend_mut().claim_interface() {
            self.action = None;
            return Err(e.into());
        }
        self.interrupt_cancellable_reset();
        self.issue(&Request::FpsInit, fps_init_msg_cb);
        Ok(())
    }

    /// Puts the sensor into power-down and releases the interface.
    pub fn begin_close(&mut self) -> Result<()> {
        self.begin(Action::Close)?;
        self.issue(&Request::PowerDownNotify, fps_deinit_cb);
        Ok(())
    }

    /// Checks the firmware version and reports the serial number.
    pub fn begin_probe(&mut self) -> Result<()> {
        self.begin(Action::Probe)?;
        if let Err(e) = self.start_probe() {
            self.action = None;
            return Err(e);
        }
        Ok(())
    }

    /// Enrolls a new print on the sensor. The resulting print carries the
    /// record data needed to verify or delete it later.
    pub fn begin_enroll(&mut self, mut print: Print) -> Result<()> {
        if self.action.is_some() || self.has_active_run() {
            return Err(Error::Busy);
        }
        let rand_id = if self.config().emulation { 0 } else { rand::random::<u32>() };
        let user_id = build_user_id(
            print.enroll_date,
            print.finger,
            rand_id,
            print.username.as_deref(),
        );
        debug!("user_id: {}, finger: {}", String::from_utf8_lossy(&user_id), DEVICE_FINGER);

        print.description = Some(String::from_utf8_lossy(&user_id).into_owned());
        print.device_stored = true;
        print.data = Some(PrintData {
            finger_id: DEVICE_FINGER,
            user_id: user_id.clone(),
        });

        self.begin(Action::Enroll { print, stage: 0 })?;
        self.issue(
            &Request::EnrollUser {
                finger: DEVICE_FINGER,
                user_id,
            },
            enroll_msg_cb,
        );
        Ok(())
    }

    pub fn begin_verify(&mut self, target: &Print) -> Result<()> {
        self.begin(Action::Verify)?;
        match stored_data(target) {
            Ok(data) => self.issue(&Request::VerifyUser { user_id: data.user_id }, verify_msg_cb),
            Err(e) => self.fail_action(e),
        }
        Ok(())
    }

    /// Matches the finger against every template on the sensor and reports
    /// the print from `gallery` with the same user id.
    pub fn begin_identify(&mut self, gallery: Vec<Print>) -> Result<()> {
        self.begin(Action::Identify { gallery })?;
        self.issue(&Request::IdUser, identify_msg_cb);
        Ok(())
    }

    pub fn begin_list(&mut self) -> Result<()> {
        self.begin(Action::List { prints: Vec::new() })?;
        self.issue(&Request::GetTemplateRecords, list_msg_cb);
        Ok(())
    }

    pub fn begin_delete(&mut self, target: &Print) -> Result<()> {
        self.begin(Action::Delete)?;
        match stored_data(target) {
            Ok(data) => self.issue(
                &Request::DelUserFp {
                    finger: data.finger_id,
                    user_id: data.user_id,
                },
                delete_msg_cb,
            ),
            Err(e) => self.fail_action(e),
        }
        Ok(())
    }

    /// Deletes every template stored on the sensor.
    pub fn begin_clear_storage(&mut self) -> Result<()> {
        self.begin(Action::ClearStorage)?;
        self.issue(&Request::DelFullDb, clear_storage_msg_cb);
        Ok(())
    }
}

fn stored_data(print: &Print) -> Result<PrintData> {
    let data = print.data.as_ref().ok_or(Error::DataInvalid)?;
    PrintData::new(data.finger_id, &data.user_id)
}

/// Handles the end of a run for interpreters without special completion needs.
fn finish_run<B: UsbBackend>(dev: &mut Synaptics<B>, result: Result<()>) {
    match result {
        Err(e) => dev.fail_action(e),
        Ok(()) if dev.action.is_some() => {
            warn!("command finished without a result");
            dev.fail_action(Error::protocol("command finished without a result"));
        }
        Ok(()) => {}
    }
}

fn device_error(code: u16) -> Error {
    Error::DeviceReported { code }
}

fn fps_init_msg_cb<B: UsbBackend>(dev: &mut Synaptics<B>, event: CmdEvent<'_>) {
    let rsp = match event {
        CmdEvent::Response(rsp) => rsp,
        CmdEvent::Deferred(_) => return finish_run(dev, Ok(())),
        CmdEvent::Done(result) => return finish_run(dev, result),
    };
    match rsp.response_id {
        // OPERATION_DENIED means the sensor was already initialised
        RSP_FPS_INIT_OK | RSP_FPS_INIT_FAIL
            if matches!(rsp.result, RESULT_SUCCESS | RESULT_OPERATION_DENIED) =>
        {
            dev.resolve(ActionEvent::Opened(Ok(())));
        }
        RSP_FPS_INIT_FAIL => {
            warn!("initializing fingerprint sensor failed with {}", rsp.result);
            dev.resolve(ActionEvent::Opened(Err(device_error(rsp.result))));
        }
        other => debug!("unexpected response {:#04x} while opening", other),
    }
}

fn fps_deinit_cb<B: UsbBackend>(dev: &mut Synaptics<B>, event: CmdEvent<'_>) {
    let outcome = match event {
        CmdEvent::Response(rsp) => match rsp.response_id {
            RSP_POWER_DOWN_READY => {
                info!("fingerprint sensor ready to be powered down");
                Ok(())
            }
            RSP_POWER_DOWN_FAIL => {
                info!("failed to go to power down mode: {}", rsp.result);
                Err(device_error(rsp.result))
            }
            other => {
                debug!("unexpected response {:#04x} while closing", other);
                return;
            }
        },
        CmdEvent::Deferred(_) | CmdEvent::Done(_) if dev.action.is_none() => return,
        CmdEvent::Deferred(_) | CmdEvent::Done(Ok(())) => {
            warn!("command finished without a result");
            Err(Error::protocol("command finished without a result"))
        }
        CmdEvent::Done(Err(e)) => Err(e),
    };

    if let Err(e) = dev.backend_mut().release_interface() {
        warn!("could not release interface: {}", e);
    }
    dev.resolve(ActionEvent::Closed(outcome));
}

fn enroll_msg_cb<B: UsbBackend>(dev: &mut Synaptics<B>, event: CmdEvent<'_>) {
    let rsp = match event {
        CmdEvent::Response(rsp) => rsp,
        CmdEvent::Deferred(_) => return finish_run(dev, Ok(())),
        CmdEvent::Done(result) => return finish_run(dev, result),
    };
    let samples = dev.config().enroll_samples;

    match rsp.response_id {
        RSP_ENROLL_READY => {
            if let Some(Action::Enroll { stage, .. }) = dev.action.as_mut() {
                *stage = 0;
            }
            info!("place finger on the sensor");
        }
        RSP_CAPTURE_COMPLETE => info!("fingerprint image capture complete"),
        RSP_ENROLL_REPORT => {
            let Some(progress) = rsp.progress() else {
                return;
            };
            info!("enrollment is {}% done", progress);
            let done = credited_stages(progress, samples);
            let Some(Action::Enroll { stage, .. }) = dev.action.as_mut() else {
                return;
            };
            let mut events = Vec::new();
            // some firmware revisions need more touches than configured
            if *stage == done {
                events.push(ActionEvent::EnrollProgress {
                    stage: done,
                    error: Some(Error::Retry(RetryReason::General)),
                });
            }
            while *stage < done {
                *stage += 1;
                events.push(ActionEvent::EnrollProgress {
                    stage: *stage,
                    error: None,
                });
            }
            for event in events {
                dev.push_event(event);
            }
        }
        RSP_ENROLL_PAUSED => info!("enrollment has been paused"),
        RSP_ENROLL_RESUMED => info!("enrollment has been resumed"),
        RSP_ENROLL_FAIL => {
            info!("enrollment has failed: {}", rsp.result);
            let error = match rsp.result {
                RESULT_FP_DATABASE_FULL => Error::DataFull,
                RESULT_FP_DUPLICATE => Error::DataExists,
                code => device_error(code),
            };
            dev.resolve(ActionEvent::Enrolled(Err(error)));
        }
        RSP_ENROLL_OK => {
            info!("enrollment was successful");
            if let Some(Action::Enroll { print, .. }) = dev.action.take() {
                dev.push_event(ActionEvent::Enrolled(Ok(print)));
            }
        }
        other => debug!("unexpected response {:#04x} during enrollment", other),
    }
}

fn verify_msg_cb<B: UsbBackend>(dev: &mut Synaptics<B>, event: CmdEvent<'_>) {
    let rsp = match event {
        CmdEvent::Response(rsp) => rsp,
        CmdEvent::Deferred(DeferredOutcome::NoMatch) => {
            return dev.resolve(ActionEvent::Verified(Ok(MatchResult::NoMatch)))
        }
        CmdEvent::Deferred(DeferredOutcome::Error(e)) => {
            return dev.resolve(ActionEvent::Verified(Err(e)))
        }
        CmdEvent::Done(result) => return finish_run(dev, result),
    };

    match rsp.response_id {
        RSP_VERIFY_READY => info!("place finger on the sensor"),
        RSP_CAPTURE_COMPLETE => info!("fingerprint image capture complete"),
        RSP_VERIFY_FAIL => match rsp.result {
            RESULT_SENSOR_STIMULUS_ERROR => {
                debug!("delaying retry error until after finger removal");
                dev.session.deferred =
                    Some(DeferredOutcome::Error(Error::Retry(RetryReason::General)));
            }
            RESULT_FP_NO_MATCH => {
                debug!("delaying match failure until after finger removal");
                dev.session.deferred = Some(DeferredOutcome::NoMatch);
            }
            RESULT_FP_DATABASE_NO_RECORD_EXISTS => {
                info!("print is not in database");
                dev.resolve(ActionEvent::Verified(Err(Error::DataNotFound)));
            }
            code => {
                warn!("verify has failed: {}", code);
                dev.resolve(ActionEvent::Verified(Ok(MatchResult::NoMatch)));
            }
        },
        RSP_VERIFY_OK => {
            if let ResponseBody::Match(report) = &rsp.body {
                info!(
                    "verify was successful for user {} finger {} score {}",
                    String::from_utf8_lossy(&report.user_id),
                    report.finger_id,
                    report.score
                );
            }
            dev.resolve(ActionEvent::Verified(Ok(MatchResult::Match)));
        }
        other => debug!("unexpected response {:#04x} during verification", other),
    }
}

fn identify_msg_cb<B: UsbBackend>(dev: &mut Synaptics<B>, event: CmdEvent<'_>) {
    let rsp = match event {
        CmdEvent::Response(rsp) => rsp,
        CmdEvent::Deferred(DeferredOutcome::NoMatch) => {
            return dev.resolve(ActionEvent::Identified(Ok(None)))
        }
        CmdEvent::Deferred(DeferredOutcome::Error(e)) => {
            return dev.resolve(ActionEvent::Identified(Err(e)))
        }
        CmdEvent::Done(result) => return finish_run(dev, result),
    };

    match rsp.response_id {
        RSP_ID_READY => info!("place finger on the sensor"),
        RSP_CAPTURE_COMPLETE => info!("fingerprint image capture complete"),
        RSP_ID_FAIL => match rsp.result {
            RESULT_SENSOR_STIMULUS_ERROR => {
                debug!("delaying retry error until after finger removal");
                dev.session.deferred =
                    Some(DeferredOutcome::Error(Error::Retry(RetryReason::General)));
            }
            RESULT_FP_NO_MATCH => {
                debug!("delaying match failure until after finger removal");
                dev.session.deferred = Some(DeferredOutcome::NoMatch);
            }
            RESULT_FP_DATABASE_EMPTY | RESULT_FP_DATABASE_NO_RECORD_EXISTS => {
                info!("no prints on the sensor to identify against");
                dev.resolve(ActionEvent::Identified(Ok(None)));
            }
            code => {
                warn!("identify has failed: {}", code);
                dev.resolve(ActionEvent::Identified(Err(device_error(code))));
            }
        },
        RSP_ID_OK => {
            let ResponseBody::Match(report) = &rsp.body else {
                let error = Error::protocol("identify result without user id");
                dev.resolve(ActionEvent::Identified(Err(error)));
                return;
            };
            info!(
                "identify was successful for user {} finger {} score {}",
                String::from_utf8_lossy(&report.user_id),
                report.finger_id,
                report.score
            );
            let found = match dev.action.as_ref() {
                Some(Action::Identify { gallery }) => gallery
                    .iter()
                    .find(|print| print.user_id() == Some(&report.user_id[..]))
                    .cloned(),
                _ => None,
            };
            if found.is_none() {
                info!("matched print is not in the gallery");
            }
            dev.resolve(ActionEvent::Identified(Ok(found)));
        }
        other => debug!("unexpected response {:#04x} during identification", other),
    }
}

fn list_msg_cb<B: UsbBackend>(dev: &mut Synaptics<B>, event: CmdEvent<'_>) {
    let rsp = match event {
        CmdEvent::Response(rsp) => rsp,
        CmdEvent::Deferred(_) => return finish_run(dev, Ok(())),
        CmdEvent::Done(result) => return finish_run(dev, result),
    };

    match rsp.response_id {
        RSP_QUERY_FAIL if rsp.result == RESULT_FP_DATABASE_EMPTY => {
            info!("database is empty");
            finish_list(dev);
        }
        RSP_QUERY_FAIL => {
            info!("failed to query enrolled users: {}", rsp.result);
            dev.resolve(ActionEvent::Listed(Err(device_error(rsp.result))));
        }
        RSP_QUERY_RESPONSE_COMPLETE => {
            info!("query complete");
            finish_list(dev);
        }
        RSP_TEMPLATE_RECORDS_REPORT => {
            let ResponseBody::TemplateRecords(report) = &rsp.body else {
                return;
            };
            let Some(Action::List { prints }) = dev.action.as_mut() else {
                return;
            };
            for (n, template) in report.templates.iter().enumerate() {
                if template.user_id.is_empty() {
                    continue;
                }
                debug!(
                    "[query {} of {}] template {}: status={:#x}, user_id={}, finger_id={}",
                    report.query_sequence,
                    report.total_query_messages,
                    n,
                    template.status,
                    String::from_utf8_lossy(&template.user_id),
                    template.finger_id
                );
                prints.push(Print::from_template(template.finger_id, &template.user_id));
            }

            let seq = std::num::NonZeroU8::new(dev.cmd_seq_num())
                .map_or(SeqNum::Next, SeqNum::Fixed);
            if let Err(e) = dev.sensor_cmd(seq, &Request::GetNextQueryResponse, None) {
                dev.resolve(ActionEvent::Listed(Err(e)));
            }
        }
        other => debug!("unexpected response {:#04x} while listing", other),
    }
}

fn finish_list<B: UsbBackend>(dev: &mut Synaptics<B>) {
    if let Some(Action::List { prints }) = dev.action.take() {
        dev.push_event(ActionEvent::Listed(Ok(prints)));
    }
}

fn delete_msg_cb<B: UsbBackend>(dev: &mut Synaptics<B>, event: CmdEvent<'_>) {
    let rsp = match event {
        CmdEvent::Response(rsp) => rsp,
        CmdEvent::Deferred(_) => return finish_run(dev, Ok(())),
        CmdEvent::Done(result) => return finish_run(dev, result),
    };

    match rsp.response_id {
        RSP_DELETE_PROGRESS => info!(
            "deleting enrolled user is {}% complete",
            rsp.progress().unwrap_or(0)
        ),
        RSP_DEL_USER_FP_FAIL => {
            info!("failed to delete enrolled user: {}", rsp.result);
            let error = match rsp.result {
                RESULT_FP_DATABASE_NO_RECORD_EXISTS => Error::DataNotFound,
                code => device_error(code),
            };
            dev.resolve(ActionEvent::Deleted(Err(error)));
        }
        RSP_DEL_USER_FP_OK => {
            info!("successfully deleted enrolled user");
            dev.resolve(ActionEvent::Deleted(Ok(())));
        }
        other => debug!("unexpected response {:#04x} while deleting", other),
    }
}

fn clear_storage_msg_cb<B: UsbBackend>(dev: &mut Synaptics<B>, event: CmdEvent<'_>) {
    let rsp = match event {
        CmdEvent::Response(rsp) => rsp,
        CmdEvent::Deferred(_) => return finish_run(dev, Ok(())),
        CmdEvent::Done(result) => return finish_run(dev, result),
    };

    match rsp.response_id {
        RSP_DELETE_PROGRESS => info!(
            "deleting all users is {}% complete",
            rsp.progress().unwrap_or(0)
        ),
        RSP_DEL_FULL_DB_FAIL => {
            info!("failed to clear storage: {}", rsp.result);
            dev.resolve(ActionEvent::StorageCleared(Err(device_error(rsp.result))));
        }
        RSP_DEL_FULL_DB_OK => {
            info!("storage cleared");
            dev.resolve(ActionEvent::StorageCleared(Ok(())));
        }
        other => debug!("unexpected response {:#04x} while clearing storage", other),
    }
}
