// SPDX-License-Identifier: Unlicense

//! End-to-end scenarios driving domain threads from an orchestrator.
//!
//! Each scenario binds its worker entry on the host, then runs the
//! orchestrator inside the domain with an ecall, as an in-domain test
//! driver would. Host call failures come back as `Err`; broken invariants
//! are fatal.

pub mod td_state;
pub mod thread_interrupt;

use crate::handshake::{Code, HandshakeWord};
use crate::host::SimHost;
use crate::{Config, DomainThread, Result};

use core::time::Duration;

/// A runnable scenario.
pub type Scenario = fn(&SimHost) -> Result<()>;

/// Scenarios by name, in the order the binary runs them by default.
pub const SCENARIOS: [(&str, Scenario); 3] = [
    ("td-state", td_state::run),
    ("interrupt-nonblocking", thread_interrupt::nonblocking),
    ("interrupt-blocking", thread_interrupt::blocking),
];

/// Scenarios run when none is named. Retry exhaustion aborts the process,
/// so it only runs on request.
pub const DEFAULT_SCENARIOS: [&str; 2] = ["td-state", "interrupt-nonblocking"];

/// Look up a scenario.
pub fn by_name(name: &str) -> Option<Scenario> {
    SCENARIOS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, scenario)| *scenario)
}

/// Host-side sleep as an out-call.
fn sleep(thread: &mut DomainThread, delay: Duration) {
    let ms = delay.as_millis() as u64;
    thread.ocall(|host| host.host().sleep_msec(ms));
}

/// Orchestrator wait for the worker to move the word off `Idle`.
fn await_ready(word: &HandshakeWord, config: &Config) -> Result<Code> {
    word.wait_until_timeout("worker ready", |code| code != Code::Idle, config.handshake_timeout)
}

/// Worker-side wait; interrupts are taken while spinning.
fn spin_until(
    thread: &mut DomainThread,
    word: &HandshakeWord,
    done: impl Fn(Code) -> bool,
) -> Code {
    word.wait_until(done, || thread.pause())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve() {
        for name in DEFAULT_SCENARIOS.iter() {
            assert_some!(by_name(name));
        }
        assert_some!(by_name("interrupt-blocking"));
        assert!(by_name("td_state").is_none());
    }
}
