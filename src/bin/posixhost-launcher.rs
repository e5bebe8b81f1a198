//! Entry point of an installation: detaches if asked to, then executes
//! the bundled interpreter on the application's entry point.

use log::{error, Level, LevelFilter, Log, Metadata, Record};
use posixhost::launcher::Launcher;
use std::env;
use std::process;

/// Environment variable holding the log level
const LOG_ENV: &str = "POSIXHOST_LOG";

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[posixhost][{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

fn level_from_env() -> LevelFilter {
    env::var(LOG_ENV)
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or_else(|| Level::Warn.to_level_filter())
}

fn main() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level_from_env());
    }
    let args: Vec<_> = env::args_os().collect();
    let e = Launcher::default().run(&args);
    error!("{}", e);
    process::exit(e.exit_code());
}
