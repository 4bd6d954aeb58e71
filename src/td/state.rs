// SPDX-License-Identifier: Unlicense

//! States of a domain thread and the transitions between them.
//!
//! ```text
//!            ecall / ocall return
//!                   |
//!                   v
//!   +----------> Entered -------------------------+
//!   |            |     |                          |
//!   |            v     v                          |
//!   |   RunningBlocking <--> RunningNonblocking   |
//!   |            |  ^            |  ^             |
//!   |       trap |  | resume     |  | resume      |
//!   |            v  |            v  |             |
//!   |     SecondLevelExceptionHandling (nests)    |
//!   |                                             |
//!   +------ Exited <------- ocall / return -------+
//! ```
//!
//! `Exited` is left again only by re-entry after an out-call. Once the
//! entry function has returned the descriptor is retired and `Exited` is
//! final.

use enum_map::Enum;

use core::convert::TryFrom;
use core::fmt;

/// Execution state of a domain thread.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Enum)]
#[repr(u32)]
pub enum TdState {
    /// Dispatched into the domain, or re-entered after an out-call.
    Entered = 0,
    /// Running a section that must not take interrupts.
    RunningBlocking = 1,
    /// Running and willing to take an interrupt.
    RunningNonblocking = 2,
    /// Forced by the first-level entry while vectored handlers run.
    SecondLevelExceptionHandling = 3,
    /// Out of the domain.
    Exited = 4,
}

/// Why a state value is being written.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Application code chose the new state.
    Caller,
    /// First-level entry forced handling.
    Trap,
    /// Handling finished; saved state reinstated.
    Resume,
    /// Runtime left the domain for the host.
    Exit,
    /// Runtime came back into the domain.
    Enter,
}

impl TdState {
    /// Every state, in declaration order.
    pub const ALL: [TdState; 5] = [
        TdState::Entered,
        TdState::RunningBlocking,
        TdState::RunningNonblocking,
        TdState::SecondLevelExceptionHandling,
        TdState::Exited,
    ];

    /// True if the thread accepts an asynchronous interrupt in this state.
    pub fn is_interruptible(self) -> bool {
        self == TdState::RunningNonblocking
    }

    /// True if a synchronous fault can trap in this state.
    pub fn can_fault(self) -> bool {
        self != TdState::Exited
    }

    /// True if `to` is a legitimate successor of `self` for this kind of
    /// transition.
    ///
    /// Nothing enforces this at runtime; writes that fail it are logged.
    pub fn can_become(self, to: TdState, transition: Transition) -> bool {
        use TdState::*;

        match transition {
            Transition::Caller => matches!(
                (self, to),
                (Entered, RunningBlocking)
                    | (Entered, RunningNonblocking)
                    | (RunningBlocking, RunningNonblocking)
                    | (RunningNonblocking, RunningBlocking)
                    | (SecondLevelExceptionHandling, RunningBlocking)
                    | (SecondLevelExceptionHandling, RunningNonblocking)
            ) || self == to,
            Transition::Trap => self.can_fault() && to == SecondLevelExceptionHandling,
            Transition::Resume => to != Exited,
            Transition::Exit => {
                self != Exited && self != SecondLevelExceptionHandling && to == Exited
            }
            Transition::Enter => (self == Exited || self == Entered) && to == Entered,
        }
    }
}

impl From<TdState> for u32 {
    fn from(state: TdState) -> u32 {
        state as u32
    }
}

impl TryFrom<u32> for TdState {
    type Error = u32;

    fn try_from(raw: u32) -> Result<Self, u32> {
        TdState::ALL
            .iter()
            .copied()
            .find(|state| *state as u32 == raw)
            .ok_or(raw)
    }
}

impl fmt::Display for TdState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TdState::Entered => "ENTERED",
            TdState::RunningBlocking => "RUNNING_BLOCKING",
            TdState::RunningNonblocking => "RUNNING_NONBLOCKING",
            TdState::SecondLevelExceptionHandling => "SECOND_LEVEL_EXCEPTION_HANDLING",
            TdState::Exited => "EXITED",
        };
        f.write_str(name)
    }
}
