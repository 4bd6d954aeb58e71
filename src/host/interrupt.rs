// SPDX-License-Identifier: Unlicense

//! Per-thread interrupt request line.
//!
//! The host raises the line from any thread. The target polls it at its
//! safe points: inside the domain it is taken by the first-level entry
//! (accepted only while the thread is non-blocking, dropped otherwise);
//! during an out-call it may be taken by the host side of the call.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Counters of what became of raised interrupts.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct InterruptStats {
    /// Requests raised by the host.
    pub raised: u32,
    /// Requests that entered second-level handling.
    pub accepted: u32,
    /// Requests taken while the thread was not interruptible.
    pub dropped: u32,
    /// Requests taken by the host side of an out-call.
    pub consumed_by_host: u32,
}

/// Pending-interrupt flag with statistics.
#[derive(Debug, Default)]
pub struct InterruptLine {
    pending: AtomicBool,
    raised: AtomicU32,
    accepted: AtomicU32,
    dropped: AtomicU32,
    consumed_by_host: AtomicU32,
}

impl InterruptLine {
    /// Quiet line.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an interrupt. Requests do not queue: raising a line that is
    /// already pending is one request.
    pub fn raise(&self) {
        self.raised.fetch_add(1, Ordering::Relaxed);
        self.pending.store(true, Ordering::Release);
    }

    /// True if a request is pending.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Consume a pending request.
    pub fn take(&self) -> bool {
        self.is_pending() && self.pending.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn note_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_consumed_by_host(&self) {
        self.consumed_by_host.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> InterruptStats {
        InterruptStats {
            raised: self.raised.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            consumed_by_host: self.consumed_by_host.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_do_not_queue() {
        let line = InterruptLine::new();
        assert!(!line.take());
        line.raise();
        line.raise();
        assert!(line.is_pending());
        assert!(line.take());
        assert!(!line.take());
        assert_eq!(line.stats().raised, 2);
    }

    #[test]
    fn outcome_counters() {
        let line = InterruptLine::new();
        line.note_accepted();
        line.note_dropped();
        line.note_dropped();
        line.note_consumed_by_host();
        assert_eq!(
            line.stats(),
            InterruptStats {
                raised: 0,
                accepted: 1,
                dropped: 2,
                consumed_by_host: 1,
            }
        );
    }
}
