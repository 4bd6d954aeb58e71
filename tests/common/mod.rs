// SPDX-License-Identifier: Unlicense

use libtdstate::{Config, Domain, SimHost};

use std::time::Duration;

/// Short delays, few retries and bounded host-side waits.
pub fn config() -> Config {
    Config {
        grace_delay: Duration::from_millis(5),
        interrupt_retries: 3,
        retry_interval: Duration::from_millis(5),
        ..Config::default()
    }
    .with_timeout(Duration::from_secs(10))
}

#[allow(dead_code)]
pub fn host() -> SimHost {
    SimHost::new(Domain::new(config()))
}
