//! Stderr backend for the `log` facade, installed by the `chowpack` binary.
//!
//! Lines look like `[2024-05-01 12:00:00.000] [repack] [info] wrote 1000/10545 payloads`.
//! The library only logs through `log::*!` macros and never installs a logger
//! itself.

use std::io::Write;

use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

pub struct StderrLogger {
    level: LevelFilter,
}

impl StderrLogger {
    fn level_name(level: Level) -> &'static str {
        match level {
            Level::Error => "error",
            Level::Warn  => "warning",
            Level::Info  => "info",
            Level::Debug => "debug",
            Level::Trace => "trace",
        }
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level && metadata.target().starts_with("chowpack")
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let module = record
            .module_path()
            .and_then(|path| path.split("::").last())
            .unwrap_or("chowpack");

        let stderr = std::io::stderr();
        let mut out = stderr.lock();
        let _ = writeln!(
            out,
            "[{}] [{}] [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            module,
            Self::level_name(record.level()),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Map `-v`/`-q` counts to a level filter.  The default is `Info`.
pub fn level_from_flags(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Warn;
    }
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the logger.  Fails if another logger is already set.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_boxed_logger(Box::new(StderrLogger { level }))?;
    log::set_max_level(level);
    Ok(())
}
