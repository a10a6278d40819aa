// Intel Data Streaming Accelerator (DSA) Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! A small `log::Log` sink matching the original shim's own logging: a
//! per-process file named `<prefix>.<progname>.<pid>` when `DTO_LOG_FILE`
//! is set, falling back to stderr, gated by `DTO_LOG_LEVEL`.
//!
//! Installed once from the lifecycle constructor; call sites elsewhere in
//! the crate use the ordinary `log::error!`/`log::warn!`/`log::trace!`
//! macros, matching the teacher crate's own usage.

use crate::config::LogLevel;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

/// Translate our three-level scheme to the `log` crate's `LevelFilter`.
/// `Error` maps to `Warn` as well, since the shim's own `LOG_ERROR` lines
/// are non-fatal diagnostics, not hard failures.
fn level_filter(level: LogLevel) -> log::LevelFilter {
    match level {
        LogLevel::Fatal => log::LevelFilter::Error,
        LogLevel::Error => log::LevelFilter::Warn,
        LogLevel::Trace => log::LevelFilter::Trace,
    }
}

enum Sink {
    File(Mutex<std::fs::File>),
    Stderr,
}

struct DtoLogger {
    sink: Sink,
}

impl log::Log for DtoLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!("[{}] {}\n", record.level(), record.args());
        match &self.sink {
            Sink::File(file) => {
                if let Ok(mut file) = file.lock() {
                    let _ = file.write_all(line.as_bytes());
                }
            }
            Sink::Stderr => {
                eprint!("{}", line);
            }
        }
    }

    fn flush(&self) {
        if let Sink::File(file) = &self.sink {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
    }
}

/// Build the per-process log file path `<prefix>.<progname>.<pid>`.
fn log_file_path(prefix: &str) -> String {
    let progname = std::env::args()
        .next()
        .and_then(|p| std::path::Path::new(&p).file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    let pid = std::process::id();
    format!("{}.{}.{}", prefix, progname, pid)
}

/// Install the process-wide logger. Called once from the lifecycle
/// constructor (§4.H); subsequent calls are no-ops (the `log` facade only
/// accepts one logger per process).
pub fn install(log_file_prefix: Option<&str>, level: LogLevel) {
    let sink = match log_file_prefix {
        Some(prefix) => {
            let path = log_file_path(prefix);
            match OpenOptions::new().create(true).truncate(true).write(true).open(&path) {
                Ok(file) => Sink::File(Mutex::new(file)),
                Err(_) => Sink::Stderr,
            }
        }
        None => Sink::Stderr,
    };

    log::set_max_level(level_filter(level));
    let _ = log::set_boxed_logger(Box::new(DtoLogger { sink }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path_format() {
        let path = log_file_path("/tmp/dto");
        assert!(path.starts_with("/tmp/dto."));
        assert!(path.ends_with(&std::process::id().to_string()));
    }

    #[test]
    fn test_level_filter_mapping() {
        assert_eq!(level_filter(LogLevel::Fatal), log::LevelFilter::Error);
        assert_eq!(level_filter(LogLevel::Error), log::LevelFilter::Warn);
        assert_eq!(level_filter(LogLevel::Trace), log::LevelFilter::Trace);
    }
}
