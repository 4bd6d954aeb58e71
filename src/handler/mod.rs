// SPDX-License-Identifier: Unlicense

//! Register vectored exception handlers and dispatch exceptions to them.
//!
//! The table is consulted in order, front first. `register` inserts at the
//! front, so the most recently registered handler is asked first.
//! Dispatch stops at the first handler that continues or aborts; if every
//! handler passes, the default disposition is to abort.
//!
//! Handlers run on the faulting thread with `&mut DomainThread`, so they
//! can change the descriptor, make out-calls and execute instructions that
//! fault again. The table lock is released before any handler runs.

use crate::domain::DomainThread;
use crate::util::locked::Locked;
use crate::{Error, Result};

use crate::archs::ExceptionContext;

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Exception classes reported to handlers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    /// Integer divide fault (#DE).
    DivideByZero,
    /// Breakpoint (#BP).
    Breakpoint,
    /// Bound range exceeded (#BR).
    BoundOutOfRange,
    /// Invalid opcode (#UD), not resolved by emulation.
    IllegalInstruction,
    /// General protection (#GP).
    AccessViolation,
    /// Page fault (#PF).
    PageFault,
    /// x87 floating point error (#MF).
    X87FloatPoint,
    /// Alignment check (#AC).
    Misalignment,
    /// SIMD floating point exception (#XM).
    SimdFloatPoint,
    /// Anything else, including interrupts requested by the host.
    Unknown,
}

/// Where an exception came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExceptionSource {
    /// Raised by an instruction the thread executed.
    Hardware,
    /// Delivered asynchronously by the host.
    Interrupt,
}

/// What the handler asks the runtime to do next.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Resume at the record's context.
    ContinueExecution,
    /// Not mine; ask the next handler.
    ContinueSearch,
    /// Terminate.
    AbortExecution,
}

/// Description of a trapped exception, handed to each handler.
#[derive(Clone, Debug)]
pub struct ExceptionRecord {
    /// Exception class.
    pub code: ExceptionCode,
    /// Fault or interrupt.
    pub source: ExceptionSource,
    /// Instruction pointer at the trap.
    pub address: u64,
    /// Saved registers; execution resumes from these on `ContinueExecution`.
    pub context: ExceptionContext,
}

impl ExceptionRecord {
    /// Record for a trap taken with `context` live.
    pub fn new(code: ExceptionCode, source: ExceptionSource, context: ExceptionContext) -> Self {
        Self {
            code,
            source,
            address: context.rip,
            context,
        }
    }

    /// True for host-delivered interrupts.
    pub fn is_interrupt(&self) -> bool {
        self.source == ExceptionSource::Interrupt
    }
}

/// A vectored exception handler.
pub type Handler =
    Arc<dyn Fn(&mut DomainThread, &mut ExceptionRecord) -> Disposition + Send + Sync>;

/// Identifies a registered handler for removal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Ordered table of vectored handlers.
pub struct VectoredHandlers {
    table: Locked<Vec<(HandlerId, Handler)>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl VectoredHandlers {
    /// Empty table holding at most `capacity` handlers.
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Locked::new(Vec::new()),
            next_id: AtomicU64::new(1),
            capacity,
        }
    }

    /// Add `handler` ahead of all registered handlers.
    pub fn register(&self, handler: Handler) -> Result<HandlerId> {
        self.add(true, handler)
    }

    /// Add `handler` at the front (`first`) or the back of the table.
    pub fn add(&self, first: bool, handler: Handler) -> Result<HandlerId> {
        let mut table = self.table.lock();
        if table.len() >= self.capacity {
            return Err(Error::TooManyHandlers);
        }
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if first {
            table.insert(0, (id, handler));
        } else {
            table.push((id, handler));
        }
        debug!("added handler {:?} (first: {}), {} registered", id, first, table.len());
        Ok(id)
    }

    /// Remove a registered handler.
    pub fn remove(&self, id: HandlerId) -> Result<()> {
        let mut table = self.table.lock();
        let index = table
            .iter()
            .position(|(registered, _)| *registered == id)
            .ok_or(Error::HandlerNotFound)?;
        table.remove(index);
        Ok(())
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// True if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer `record` to each handler in turn.
    pub fn dispatch(&self, thread: &mut DomainThread, record: &mut ExceptionRecord) -> Disposition {
        // snapshot, so handlers may register, remove or fault again
        let handlers: Vec<(HandlerId, Handler)> = self.table.lock().clone();

        for (id, handler) in handlers.iter() {
            match handler(thread, record) {
                Disposition::ContinueSearch => {
                    trace!("{:?} passed on {:?}", id, record.code);
                }
                disposition => {
                    debug!("{:?} answered {:?} with {:?}", id, record.code, disposition);
                    return disposition;
                }
            }
        }

        error!(
            "unhandled {:?} at {:#x} after {} handlers",
            record.code,
            record.address,
            handlers.len()
        );
        Disposition::AbortExecution
    }
}

impl fmt::Debug for VectoredHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectoredHandlers")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
