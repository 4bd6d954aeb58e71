// SPDX-License-Identifier: Unlicense

//! Debug logging to stdout.

use log::{LevelFilter, Metadata, Record};
use std::sync::Once;

static START: Once = Once::new();
static LOGGER: PrintLogger = PrintLogger;

struct PrintLogger;

impl log::Log for PrintLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!(
                "{:5} [{:>30}:{:3}] {}",
                record.level(),
                record
                    .target()
                    .trim_start_matches("libtdstate::")
                    .chars()
                    .take(30)
                    .collect::<String>(),
                record.line().unwrap_or(0),
                record.args()
            );
        }
    }

    fn flush(&self) {
        use std::io::Write;
        std::io::stdout().flush().ok();
    }
}

/// Install the logger at `level`. Later calls only change the level.
pub fn init(level: LevelFilter) {
    START.call_once(|| {
        // another logger may already be installed by an embedding program
        if log::set_logger(&LOGGER).is_err() {
            eprintln!("logger already installed");
        }
    });
    log::set_max_level(level);
}

/// Install the logger at full verbosity for tests.
pub fn setup() {
    init(LevelFilter::Trace);
}
