// SPDX-License-Identifier: Unlicense

#[macro_use]
extern crate log;

use libtdstate::debug::{self, logger};
use libtdstate::scenario::{self, DEFAULT_SCENARIOS};
use libtdstate::{Config, Domain, SimHost};

use log::LevelFilter;
use std::process::exit;

/// Run the named scenarios, each in a fresh domain.
fn main() {
    let level = std::env::var("TDSTATE_LOG")
        .ok()
        .and_then(|name| debug::parse_level(&name))
        .unwrap_or(LevelFilter::Info);
    logger::init(level);

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            exit(2);
        }
    };

    let mut names: Vec<String> = std::env::args().skip(1).collect();
    if names.is_empty() {
        names = DEFAULT_SCENARIOS.iter().map(|name| name.to_string()).collect();
    }

    for name in names.iter() {
        let run = match scenario::by_name(name) {
            Some(run) => run,
            None => {
                error!("unknown scenario {}", name);
                exit(2);
            }
        };

        info!("running {}", name);
        let host = SimHost::new(Domain::new(config.clone()));
        if let Err(e) = run(&host) {
            error!("{} failed: {}", name, e);
            exit(1);
        }
        info!("{} passed", name);
    }
}
