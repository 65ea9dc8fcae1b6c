//! Asynchronous USB transfers on top of a non-blocking backend.
//!
//! A [`UsbBackend`] moves bytes for one endpoint at a time and reports progress
//! the `nb` way: `Err(nb::Error::WouldBlock)` while a transfer is still in flight.
//! [`UsbScheduler`] layers the submit/complete/cancel contract on top of it:
//! timeouts, cooperative cancellation, the short-transfer check and a completion
//! handler that is handed back exactly once per submitted transfer.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::TransferError;
use crate::ssm::Ssm;

const DIRECTION_IN: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Bulk,
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device to host.
    In,
    /// Host to device.
    Out,
}

impl Direction {
    pub fn of_endpoint(endpoint: u8) -> Self {
        if endpoint & DIRECTION_IN != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// One read or write on a single endpoint. Owns its buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    endpoint: u8,
    kind: TransferType,
    buffer: Vec<u8>,
    actual_length: usize,
    /// Turn a successful but incomplete transfer into [`TransferError::ShortTransfer`].
    pub short_is_error: bool,
}

impl Transfer {
    pub fn bulk_out(endpoint: u8, data: Vec<u8>) -> Self {
        Self::new(endpoint, TransferType::Bulk, data)
    }

    pub fn bulk_in(endpoint: u8, length: usize) -> Self {
        Self::new(endpoint, TransferType::Bulk, vec![0; length])
    }

    pub fn interrupt_in(endpoint: u8, length: usize) -> Self {
        Self::new(endpoint, TransferType::Interrupt, vec![0; length])
    }

    fn new(endpoint: u8, kind: TransferType, buffer: Vec<u8>) -> Self {
        Self {
            endpoint,
            kind,
            buffer,
            actual_length: 0,
            short_is_error: false,
        }
    }

    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    pub fn kind(&self) -> TransferType {
        self.kind
    }

    pub fn direction(&self) -> Direction {
        Direction::of_endpoint(self.endpoint)
    }

    /// The full buffer: data to send, or room for data to receive.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Bytes actually moved by the last completion.
    pub fn actual_length(&self) -> usize {
        self.actual_length
    }

    /// The transferred part of the buffer.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.actual_length]
    }

    /// Prepares the transfer for resubmission.
    pub fn reset(&mut self) {
        self.actual_length = 0;
    }
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct Cancellable(Rc<Cell<bool>>);

impl Cancellable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(u64);

/// The device side of the scheduler.
pub trait UsbBackend {
    fn claim_interface(&mut self) -> Result<(), TransferError> {
        Ok(())
    }

    fn release_interface(&mut self) -> Result<(), TransferError> {
        Ok(())
    }

    /// Advances a transfer. Returns the number of bytes moved once it is done,
    /// or `WouldBlock` while it is still in flight. For IN transfers the backend
    /// fills `transfer.buffer_mut()` before returning.
    fn poll_transfer(
        &mut self,
        id: TransferId,
        transfer: &mut Transfer,
    ) -> nb::Result<usize, TransferError>;

    /// Called when a transfer is abandoned because of its cancellable or its timeout.
    fn cancel_transfer(&mut self, id: TransferId) {
        let _ = id;
    }
}

struct InFlight<H> {
    id: TransferId,
    transfer: Transfer,
    deadline: Option<Instant>,
    cancellable: Option<Cancellable>,
    handler: H,
}

/// A resolved transfer together with the handler it was submitted with.
#[derive(Debug)]
pub struct Completed<H> {
    pub id: TransferId,
    pub transfer: Transfer,
    pub result: Result<(), TransferError>,
    pub handler: H,
}

pub struct UsbScheduler<B, H> {
    backend: B,
    next_id: u64,
    in_flight: VecDeque<InFlight<H>>,
}

impl<B: UsbBackend, H> UsbScheduler<B, H> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            next_id: 0,
            in_flight: VecDeque::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Enqueues one transfer. A `timeout_ms` of 0 means no timeout.
    pub fn submit(
        &mut self,
        mut transfer: Transfer,
        timeout_ms: u32,
        cancellable: Option<Cancellable>,
        handler: H,
    ) -> TransferId {
        let id = TransferId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        transfer.reset();
        debug!(
            "submitting {:?} {:?} transfer on endpoint {:#04x}, {} bytes, timeout {} ms",
            transfer.kind(),
            transfer.direction(),
            transfer.endpoint(),
            transfer.buffer().len(),
            timeout_ms
        );
        let deadline = match timeout_ms {
            0 => None,
            ms => Some(Instant::now() + Duration::from_millis(u64::from(ms))),
        };
        self.in_flight.push_back(InFlight {
            id,
            transfer,
            deadline,
            cancellable,
            handler,
        });
        id
    }

    /// Resolves at most one transfer, oldest first.
    pub fn poll(&mut self) -> Option<Completed<H>> {
        let now = Instant::now();
        for index in 0..self.in_flight.len() {
            let entry = &mut self.in_flight[index];
            let result = if entry.cancellable.as_ref().map_or(false, Cancellable::is_cancelled) {
                self.backend.cancel_transfer(entry.id);
                Err(TransferError::Cancelled)
            } else {
                match self.backend.poll_transfer(entry.id, &mut entry.transfer) {
                    Ok(moved) => {
                        let expected = entry.transfer.buffer().len();
                        entry.transfer.actual_length = moved.min(expected);
                        if entry.transfer.short_is_error && moved < expected {
                            Err(TransferError::ShortTransfer {
                                expected,
                                actual: moved,
                            })
                        } else {
                            Ok(())
                        }
                    }
                    Err(nb::Error::Other(e)) => Err(e),
                    Err(nb::Error::WouldBlock) => match entry.deadline {
                        Some(deadline) if deadline <= now => {
                            self.backend.cancel_transfer(entry.id);
                            Err(TransferError::Timeout)
                        }
                        _ => continue,
                    },
                }
            };

            let entry = self.in_flight.remove(index)?;
            if let Err(e) = &result {
                debug!("transfer on endpoint {:#04x} failed: {}", entry.transfer.endpoint(), e);
            }
            return Some(Completed {
                id: entry.id,
                transfer: entry.transfer,
                result,
                handler: entry.handler,
            });
        }
        None
    }
}

impl<B: std::fmt::Debug, H> std::fmt::Debug for UsbScheduler<B, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbScheduler")
            .field("backend", &self.backend)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

/// What to do with a completed transfer.
pub enum OnComplete<C, D> {
    /// Not tied to any state machine.
    Detached(fn(&mut C, Transfer, Result<(), TransferError>)),
    /// Routed to the state machine currently owned by `C`.
    Ssm(fn(&mut Ssm<C, D>, &mut C, Transfer, Result<(), TransferError>)),
}

impl<C, D> std::fmt::Debug for OnComplete<C, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OnComplete::Detached(_) => write!(f, "OnComplete::Detached"),
            OnComplete::Ssm(_) => write!(f, "OnComplete::Ssm"),
        }
    }
}

/// Default state machine completion: advance on success, fail on error.
pub fn ssm_transfer_cb<C, D>(
    ssm: &mut Ssm<C, D>,
    _ctx: &mut C,
    _transfer: Transfer,
    result: Result<(), TransferError>,
) {
    match result {
        Ok(()) => ssm.next_state(),
        Err(e) => ssm.mark_failed(e.into()),
    }
}
