// SPDX-License-Identifier: Unlicense

//! Spin-with-backoff for busy-wait polling of shared words.
//!
//! Each `snooze` issues an exponentially growing run of spin-loop hints
//! (the `pause` instruction on x86) until the step reaches the limit, then
//! yields the OS thread instead. No blocking primitive is involved, so
//! the timing of the polled protocol is unchanged.

use core::hint::spin_loop;

/// Largest step; `2^MAX_STEP` hints still fit the counter.
const MAX_STEP: u32 = 31;

/// Exponential spin backoff.
#[derive(Debug)]
pub struct Backoff {
    step: u32,
    limit: u32,
}

impl Backoff {
    /// Backoff that yields once `2^limit` hints per snooze are reached.
    /// Limits above 31 are treated as 31.
    pub const fn new(limit: u32) -> Self {
        let limit = if limit > MAX_STEP { MAX_STEP } else { limit };
        Self { step: 0, limit }
    }

    /// Wait a little, longer on each call.
    pub fn snooze(&mut self) {
        if self.step <= self.limit {
            for _ in 0..(1u32 << self.step) {
                spin_loop();
            }
            self.step += 1;
        } else {
            std::thread::yield_now();
        }
    }

    /// True once snoozing has escalated to yielding.
    pub fn is_yielding(&self) -> bool {
        self.step > self.limit
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(6)
    }
}
