// SPDX-License-Identifier: Unlicense

//! Single-word rendezvous between host and domain threads.
//!
//! Exactly one side writes at each protocol step; the other polls. Stores
//! are release, loads acquire, so anything the writer did before signalling
//! is visible to the poller once it sees the code. Waiting never blocks in
//! the OS: the domain side relaxes with its own spin hint (which is also
//! where it can take interrupts), the host side with [`Backoff`].

use crate::util::backoff::Backoff;
use crate::{Error, Result};

use core::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Protocol step codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Code {
    /// Nothing happened yet.
    Idle = 0,
    /// Domain thread is running and interruptible.
    Ready = 1,
    /// Interrupt handler finished.
    Handled = 2,
    /// Domain thread proceeds to its next phase.
    Proceeding = 3,
    /// Domain thread is out in the host.
    Exited = 4,
    /// Out-call released; scenario complete.
    Complete = 5,
}

impl Code {
    fn from_raw(raw: u32) -> Option<Code> {
        match raw {
            0 => Some(Code::Idle),
            1 => Some(Code::Ready),
            2 => Some(Code::Handled),
            3 => Some(Code::Proceeding),
            4 => Some(Code::Exited),
            5 => Some(Code::Complete),
            _ => None,
        }
    }
}

/// Shared, atomically accessed protocol word.
#[derive(Debug)]
pub struct HandshakeWord {
    word: AtomicU32,
    spin_limit: u32,
}

impl HandshakeWord {
    /// Word holding `Idle`.
    pub fn new() -> Self {
        Self::with_spin_limit(6)
    }

    /// Word whose host-side waits escalate to yielding after `spin_limit`
    /// backoff steps.
    pub fn with_spin_limit(spin_limit: u32) -> Self {
        Self {
            word: AtomicU32::new(Code::Idle as u32),
            spin_limit,
        }
    }

    /// Publish `code`.
    pub fn signal(&self, code: Code) {
        trace!("handshake <- {:?}", code);
        self.word.store(code as u32, Ordering::Release);
    }

    /// Current code.
    pub fn load(&self) -> Code {
        let raw = self.word.load(Ordering::Acquire);
        match Code::from_raw(raw) {
            Some(code) => code,
            None => fatal!("corrupt handshake word {}", raw),
        }
    }

    /// Publish `to` only if the word still holds `from`.
    pub fn advance(&self, from: Code, to: Code) -> bool {
        let advanced = self
            .word
            .compare_exchange(from as u32, to as u32, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if advanced {
            trace!("handshake {:?} <- {:?}", from, to);
        }
        advanced
    }

    /// Back to `Idle` before the next scenario.
    pub fn reset(&self) {
        self.signal(Code::Idle);
    }

    /// Poll until `done` holds, calling `relax` between polls. Returns the
    /// code that satisfied it.
    pub fn wait_until(&self, done: impl Fn(Code) -> bool, mut relax: impl FnMut()) -> Code {
        loop {
            let code = self.load();
            if done(code) {
                return code;
            }
            relax();
        }
    }

    /// Host-side poll until `done` holds, giving up after `timeout`.
    pub fn wait_until_timeout(
        &self,
        what: &'static str,
        done: impl Fn(Code) -> bool,
        timeout: Option<Duration>,
    ) -> Result<Code> {
        let start = Instant::now();
        let mut backoff = Backoff::new(self.spin_limit);
        loop {
            let code = self.load();
            if done(code) {
                return Ok(code);
            }
            if let Some(timeout) = timeout {
                if backoff.is_yielding() && start.elapsed() > timeout {
                    return Err(Error::Timeout(what));
                }
            }
            backoff.snooze();
        }
    }

    /// Host-side poll for exactly `code`.
    pub fn wait_for(&self, code: Code, timeout: Option<Duration>) -> Result<()> {
        self.wait_until_timeout(code_name(code), |c| c == code, timeout)
            .map(|_| ())
    }
}

impl Default for HandshakeWord {
    fn default() -> Self {
        Self::new()
    }
}

fn code_name(code: Code) -> &'static str {
    match code {
        Code::Idle => "handshake Idle",
        Code::Ready => "handshake Ready",
        Code::Handled => "handshake Handled",
        Code::Proceeding => "handshake Proceeding",
        Code::Exited => "handshake Exited",
        Code::Complete => "handshake Complete",
    }
}
