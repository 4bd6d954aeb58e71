// SPDX-License-Identifier: Unlicense

//! Uniform structure for errors and results.

use crate::host::Tid;

use std::fmt;

/// Specified errors.
///
/// These are the non-fatal outcomes of host and registry calls. Broken
/// invariants never surface here; they abort through `panic::abort_domain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The host could not spawn an OS thread.
    ThreadCreation,
    /// Every thread slot of the domain is occupied.
    OutOfThreadSlots,
    /// No entry point is bound for the requested kind of thread.
    NoEntryPoint,
    /// `join_thread` without an outstanding created thread.
    NoThreadToJoin,
    /// The joined thread unwound instead of returning.
    ThreadPanicked(Tid),
    /// Interrupt addressed to a thread the host does not know.
    NoSuchThread(Tid),
    /// The vectored handler table is full.
    TooManyHandlers,
    /// Removal of a handler that is not registered.
    HandlerNotFound,
    /// The target never accepted an interrupt.
    InterruptUndelivered {
        /// Target thread.
        tid: Tid,
        /// Number of interrupts sent.
        attempts: u32,
    },
    /// A host-side wait exceeded the configured timeout.
    Timeout(&'static str),
    /// A configuration value could not be parsed.
    InvalidConfig(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ThreadCreation => write!(f, "host failed to create a thread"),
            Error::OutOfThreadSlots => write!(f, "no free thread slot in the domain"),
            Error::NoEntryPoint => write!(f, "no entry point bound"),
            Error::NoThreadToJoin => write!(f, "no thread to join"),
            Error::ThreadPanicked(tid) => write!(f, "thread {} panicked", tid),
            Error::NoSuchThread(tid) => write!(f, "no such thread {}", tid),
            Error::TooManyHandlers => write!(f, "vectored handler table is full"),
            Error::HandlerNotFound => write!(f, "handler not registered"),
            Error::InterruptUndelivered { tid, attempts } => write!(
                f,
                "unable to interrupt thread {} after {} attempts",
                tid, attempts
            ),
            Error::Timeout(what) => write!(f, "timed out waiting for {}", what),
            Error::InvalidConfig(key) => write!(f, "invalid value for {}", key),
        }
    }
}

impl std::error::Error for Error {}

/// Default error type for domain and host functions.
pub type Result<T> = core::result::Result<T, Error>;
