// SPDX-License-Identifier: Unlicense

//! Tunables of the domain runtime and the scenario drivers.

use crate::{Error, Result};

use std::time::Duration;

/// Runtime configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Pause between a thread signalling ready and the first interrupt.
    pub grace_delay: Duration,
    /// Interrupts sent to a thread before delivery is declared failed.
    pub interrupt_retries: u32,
    /// Pause between interrupt attempts.
    pub retry_interval: Duration,
    /// Bound on host-side handshake waits; `None` spins forever.
    pub handshake_timeout: Option<Duration>,
    /// Thread control slots in the domain.
    pub thread_slots: usize,
    /// Capacity of the vectored handler table.
    pub max_handlers: usize,
    /// Consecutive re-faults of one instruction tolerated before aborting.
    pub max_refaults: u32,
    /// Backoff steps of spin hints before polling yields the OS thread.
    pub spin_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grace_delay: Duration::from_millis(30),
            interrupt_retries: 10,
            retry_interval: Duration::from_millis(30),
            handshake_timeout: None,
            thread_slots: 2,
            max_handlers: 64,
            max_refaults: 16,
            spin_limit: 6,
        }
    }
}

impl Config {
    /// Defaults overridden by `TDSTATE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = parse(&lookup, "TDSTATE_GRACE_MS")? {
            config.grace_delay = Duration::from_millis(ms);
        }
        if let Some(retries) = parse(&lookup, "TDSTATE_RETRIES")? {
            config.interrupt_retries = retries as u32;
        }
        if let Some(ms) = parse(&lookup, "TDSTATE_RETRY_MS")? {
            config.retry_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "TDSTATE_TIMEOUT_MS")? {
            config.handshake_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(slots) = parse(&lookup, "TDSTATE_SLOTS")? {
            config.thread_slots = slots as usize;
        }
        Ok(config)
    }

    /// Same configuration with every host-side wait bounded by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Same configuration with a different thread slot count.
    pub fn with_thread_slots(mut self, slots: usize) -> Self {
        self.thread_slots = slots;
        self
    }
}

fn parse(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<u64>> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| Error::InvalidConfig(key)),
    }
}
