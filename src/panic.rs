// SPDX-License-Identifier: Unlicense

//! Fatal abort on broken invariants.
//!
//! A checkpoint that fails means the isolation or exception machinery
//! itself is broken, so there is no recovery path. The release binary
//! aborts the process. Tests switch to [`AbortAction::Panic`] so the
//! failure unwinds the offending thread and the harness reports it.

use core::fmt::Arguments;
use core::sync::atomic::{AtomicU8, Ordering};

/// What `abort_domain` does after logging.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AbortAction {
    /// Terminate the whole process.
    Abort = 0,
    /// Panic the calling thread.
    Panic = 1,
}

static ABORT_ACTION: AtomicU8 = AtomicU8::new(AbortAction::Abort as u8);

/// Choose the behaviour of fatal aborts for the whole process.
pub fn set_abort_action(action: AbortAction) {
    ABORT_ACTION.store(action as u8, Ordering::Release);
}

/// Current behaviour of fatal aborts.
pub fn abort_action() -> AbortAction {
    match ABORT_ACTION.load(Ordering::Acquire) {
        1 => AbortAction::Panic,
        _ => AbortAction::Abort,
    }
}

/// Log and terminate.
#[cold]
pub fn abort_domain(args: Arguments) -> ! {
    error!("{}", args);
    match abort_action() {
        AbortAction::Abort => {
            log::logger().flush();
            std::process::abort()
        }
        AbortAction::Panic => panic!("{}", args),
    }
}

/// Abort with a formatted reason.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {
        $crate::panic::abort_domain(format_args!($($arg)*))
    };
}

/// Abort unless the condition holds.
#[macro_export]
macro_rules! checkpoint {
    ($cond:expr) => {
        if !$cond {
            $crate::fatal!(
                "Test failed: {}({}): {}",
                file!(),
                line!(),
                stringify!($cond)
            );
        }
    };
}

/// Abort unless the observed value equals the expected one.
#[macro_export]
macro_rules! checkpoint_eq {
    ($value:expr, $expected:expr) => {
        match (&$value, &$expected) {
            (value, expected) => {
                if *value != *expected {
                    $crate::fatal!(
                        "Test failed: {}({}): {} expected: {:?}, got: {:?}",
                        file!(),
                        line!(),
                        stringify!($value),
                        expected,
                        value
                    );
                }
            }
        }
    };
}
