// SPDX-License-Identifier: Unlicense

//! Thread descriptors: the per-thread record of execution state.
//!
//! A descriptor belongs to exactly one domain thread. Only that thread and
//! the first-level entry running on it write `state` and `is_interrupted`;
//! the host holds a shared reference for read-only assertions. Both fields
//! are atomics with acquire/release ordering because the host observes them
//! from another core.
//!
//! Second-level handling nests. Every trap pushes a [`HandlingFrame`]
//! holding the pair that was current before the trap; resuming pops it. If
//! an outer frame remains, the thread is still inside the outer handling and
//! returns to `SecondLevelExceptionHandling` with the outer frame's cause,
//! whatever the handler set transiently before faulting again.

mod state;

pub use state::{TdState, Transition};

use crate::util::locked::Locked;

use enum_map::{enum_map, EnumMap};

use core::convert::TryFrom;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// State saved on entry to second-level handling.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HandlingFrame {
    /// State current when the trap was taken.
    pub saved_state: TdState,
    /// Interrupted flag current when the trap was taken.
    pub saved_interrupted: bool,
    /// The trap was an asynchronous interrupt rather than a CPU fault.
    pub is_interrupt: bool,
}

/// Per-thread execution record.
pub struct ThreadDescriptor {
    state: AtomicU32,
    is_interrupted: AtomicBool,
    frames: Locked<Vec<HandlingFrame>>,
    visits: EnumMap<TdState, AtomicU32>,
    retired: AtomicBool,
}

impl ThreadDescriptor {
    /// Descriptor of a thread about to be dispatched: `Entered`, not
    /// interrupted.
    pub fn new() -> Self {
        let td = Self {
            state: AtomicU32::new(TdState::Entered.into()),
            is_interrupted: AtomicBool::new(false),
            frames: Locked::new(Vec::new()),
            visits: enum_map! { _ => AtomicU32::new(0) },
            retired: AtomicBool::new(false),
        };
        td.visits[TdState::Entered].fetch_add(1, Ordering::Relaxed);
        td
    }

    /// Current state.
    pub fn state(&self) -> TdState {
        let raw = self.state.load(Ordering::Acquire);
        match TdState::try_from(raw) {
            Ok(state) => state,
            Err(raw) => fatal!("corrupt thread state {}", raw),
        }
    }

    /// Application-requested state change.
    ///
    /// Illegal changes are the caller's bug; they are logged, not refused.
    pub fn set_state(&self, state: TdState) {
        self.write(state, Transition::Caller);
    }

    /// True while handling an asynchronous interrupt.
    pub fn is_interrupted(&self) -> bool {
        self.is_interrupted.load(Ordering::Acquire)
    }

    /// Application-requested change of the interrupted flag.
    pub fn set_interrupted(&self, interrupted: bool) {
        self.is_interrupted.store(interrupted, Ordering::Release);
    }

    /// Nesting depth of second-level handling.
    pub fn handling_depth(&self) -> usize {
        self.frames.lock().len()
    }

    /// Number of times the descriptor has been put into `state`.
    pub fn visits(&self, state: TdState) -> u32 {
        self.visits[state].load(Ordering::Acquire)
    }

    /// True once the thread has returned from its entry function.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Runtime entry into the domain.
    pub(crate) fn enter(&self) {
        self.write(TdState::Entered, Transition::Enter);
        self.set_interrupted(false);
    }

    /// Runtime exit to the host for an out-call.
    pub(crate) fn exit(&self) {
        self.write(TdState::Exited, Transition::Exit);
    }

    /// Final exit; `Exited` is never overwritten afterwards.
    pub(crate) fn retire(&self) {
        self.write(TdState::Exited, Transition::Exit);
        self.set_interrupted(false);
        self.retired.store(true, Ordering::Release);
    }

    /// Save the current pair and force second-level handling.
    pub(crate) fn push_frame(&self, is_interrupt: bool) -> usize {
        let frame = HandlingFrame {
            saved_state: self.state(),
            saved_interrupted: self.is_interrupted(),
            is_interrupt,
        };
        let depth = {
            let mut frames = self.frames.lock();
            frames.push(frame);
            frames.len()
        };
        self.set_interrupted(is_interrupt);
        self.write(TdState::SecondLevelExceptionHandling, Transition::Trap);
        depth
    }

    /// Leave the innermost handling frame and reinstate the state it
    /// interrupted.
    pub(crate) fn pop_frame(&self) -> HandlingFrame {
        let (frame, outer) = {
            let mut frames = self.frames.lock();
            match frames.pop() {
                Some(frame) => (frame, frames.last().copied()),
                None => fatal!("resume without a handling frame"),
            }
        };
        let (state, interrupted) = match outer {
            Some(outer) => (TdState::SecondLevelExceptionHandling, outer.is_interrupt),
            None => (frame.saved_state, frame.saved_interrupted),
        };
        self.write(state, Transition::Resume);
        self.set_interrupted(interrupted);
        frame
    }

    fn write(&self, to: TdState, transition: Transition) {
        if self.is_retired() {
            fatal!("{} written to a retired descriptor", to);
        }
        let from = self.state();
        if !from.can_become(to, transition) {
            warn!("unusual transition {} -> {} ({:?})", from, to, transition);
        }
        trace!("{} -> {} ({:?})", from, to, transition);
        self.state.store(to.into(), Ordering::Release);
        self.visits[to].fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for ThreadDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ThreadDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadDescriptor")
            .field("state", &self.state())
            .field("is_interrupted", &self.is_interrupted())
            .field("depth", &self.handling_depth())
            .field("retired", &self.is_retired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_macros::unit_test;
    use TdState::*;

    #[unit_test]
    fn fresh_descriptor() {
        let td = ThreadDescriptor::new();
        assert_eq!(td.state(), Entered);
        assert!(!td.is_interrupted());
        assert_eq!(td.handling_depth(), 0);
        assert_eq!(td.visits(Entered), 1);
    }

    #[unit_test]
    fn interrupt_frame_restores_running_state() {
        let td = ThreadDescriptor::new();
        td.set_state(RunningNonblocking);

        assert_eq!(td.push_frame(true), 1);
        assert_eq!(td.state(), SecondLevelExceptionHandling);
        assert!(td.is_interrupted());

        let frame = td.pop_frame();
        assert!(frame.is_interrupt);
        assert_eq!(td.state(), RunningNonblocking);
        assert!(!td.is_interrupted());
    }

    #[unit_test]
    fn nested_fault_returns_to_outer_handling() {
        let td = ThreadDescriptor::new();
        td.set_state(RunningNonblocking);
        td.push_frame(true);

        // handler drops to blocking, then faults
        td.set_state(RunningBlocking);
        assert!(td.is_interrupted());
        assert_eq!(td.push_frame(false), 2);
        assert_eq!(td.state(), SecondLevelExceptionHandling);
        assert!(!td.is_interrupted());

        let inner = td.pop_frame();
        assert_eq!(inner.saved_state, RunningBlocking);
        assert_eq!(td.state(), SecondLevelExceptionHandling);
        assert!(td.is_interrupted());

        td.pop_frame();
        assert_eq!(td.state(), RunningNonblocking);
        assert!(!td.is_interrupted());
        assert_eq!(td.visits(SecondLevelExceptionHandling), 3);
    }

    #[unit_test]
    fn fault_outside_handling_keeps_blocking() {
        let td = ThreadDescriptor::new();
        td.set_state(RunningBlocking);
        td.push_frame(false);
        assert!(!td.is_interrupted());
        td.pop_frame();
        assert_eq!(td.state(), RunningBlocking);
    }

    #[unit_test]
    fn out_call_round_trip() {
        let td = ThreadDescriptor::new();
        td.set_state(RunningBlocking);
        td.exit();
        assert_eq!(td.state(), Exited);
        td.enter();
        assert_eq!(td.state(), Entered);
    }

    #[unit_test]
    #[should_panic(expected = "retired")]
    fn retired_descriptor_stays_exited() {
        let td = ThreadDescriptor::new();
        td.retire();
        assert_eq!(td.state(), Exited);
        td.set_state(RunningBlocking);
    }

    #[unit_test]
    #[should_panic(expected = "without a handling frame")]
    fn unbalanced_resume_is_fatal() {
        ThreadDescriptor::new().pop_frame();
    }
}
