// Intel Data Streaming Accelerator (DSA) Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! One-time environment configuration (§6), read exactly once during
//! lifecycle setup.

use crate::wait::WaitMethod;
use std::env;

/// How the probe enumerates work queues (§4.A).
#[derive(Debug, Clone)]
pub enum WqDiscovery {
    /// `DTO_WQ_LIST`: an explicit `dsaN.M;dsaX.Y;...` list.
    Explicit(Vec<String>),
    /// No `DTO_WQ_LIST`: full sysfs enumeration.
    FullEnumeration,
}

/// NUMA-aware WQ selection strategy (`DTO_IS_NUMA_AWARE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumaAwareness {
    None,
    BufferCentric,
    CpuCentric,
}

/// Log verbosity (`DTO_LOG_LEVEL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Fatal = 0,
    Error = 1,
    Trace = 2,
}

/// Default minimum request size eligible for offload (§6).
pub const DEFAULT_MIN_SIZE: usize = 8192;

/// Parsed, validated process configuration, read once at init.
#[derive(Debug, Clone)]
pub struct Config {
    pub wq_discovery: WqDiscovery,
    pub dsa_min_size: usize,
    pub cpu_size_fraction: f64,
    pub wait_method: WaitMethod,
    pub auto_adjust_knobs: bool,
    pub numa_awareness: NumaAwareness,
    pub use_std_lib_calls: bool,
    pub collect_stats: bool,
    pub log_file_prefix: Option<String>,
    pub log_level: LogLevel,
}

impl Config {
    /// Read and validate every `DTO_*` environment variable, applying the
    /// same parse-failure fallbacks as the original C shim (§6, §7).
    pub fn from_env() -> Self {
        let log_file_prefix = env::var("DTO_LOG_FILE").ok();

        let mut log_level = match env::var("DTO_LOG_LEVEL").ok().and_then(|s| s.parse::<u32>().ok())
        {
            Some(0) => LogLevel::Fatal,
            Some(1) => LogLevel::Error,
            Some(n) if n >= 2 => LogLevel::Trace,
            _ => LogLevel::Fatal,
        };

        let use_std_lib_calls = env::var("DTO_USESTDC_CALLS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(|v| v != 0)
            .unwrap_or(false);

        let wq_discovery = match env::var("DTO_WQ_LIST") {
            Ok(s) if !s.is_empty() => {
                WqDiscovery::Explicit(s.split(';').map(|s| s.to_string()).collect())
            }
            _ => WqDiscovery::FullEnumeration,
        };

        let dsa_min_size = env::var("DTO_MIN_BYTES")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_MIN_SIZE);

        let cpu_size_fraction = match env::var("DTO_CPU_SIZE_FRACTION").ok().and_then(|s| s.parse::<f64>().ok())
        {
            Some(f) if (0.0..1.0).contains(&f) => crate::splitter::quantize_fraction(f),
            Some(_) => {
                log::error!("Invalid DTO_CPU_SIZE_FRACTION: must be in [0, 1). Falling back to 0.0");
                0.0
            }
            None => 0.0,
        };

        let auto_adjust_knobs = env::var("DTO_AUTO_ADJUST_KNOBS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(|v| v != 0)
            .unwrap_or(true);

        let wait_method = env::var("DTO_WAIT_METHOD")
            .ok()
            .map(|s| WaitMethod::from_env_str(&s))
            .unwrap_or(WaitMethod::Yield);

        let numa_awareness = match env::var("DTO_IS_NUMA_AWARE").ok().and_then(|s| s.parse::<u32>().ok())
        {
            Some(1) => NumaAwareness::BufferCentric,
            Some(2) => NumaAwareness::CpuCentric,
            _ => NumaAwareness::None,
        };

        let collect_stats = env::var("DTO_COLLECT_STATS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(|v| v != 0)
            .unwrap_or(false);

        if collect_stats {
            // So the histogram print at teardown actually reaches the log.
            log_level = LogLevel::Trace;
        }

        Self {
            wq_discovery,
            dsa_min_size,
            cpu_size_fraction,
            wait_method,
            auto_adjust_knobs,
            numa_awareness,
            use_std_lib_calls,
            collect_stats,
            log_file_prefix,
            log_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_min_size() {
        assert_eq!(DEFAULT_MIN_SIZE, 8192);
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Fatal < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Trace);
    }
}
