// Intel Data Streaming Accelerator (DSA) Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Optional per-bucket statistics histogram (§3, §6 `DTO_COLLECT_STATS`).
//!
//! 512 buckets, 4096 bytes wide, indexed by request size. Each bucket
//! tracks per-memory-op-kind counts for three outcome groups (CPU path,
//! accelerator success, accelerator failure), a latency accumulator, and
//! a failure-reason breakdown. Disabled by default: the shim never pays
//! for this bookkeeping unless `DTO_COLLECT_STATS=1`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

pub const NUM_BUCKETS: usize = 512;
pub const BUCKET_SIZE: usize = 4096;

/// The four memory primitives this shim shadows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOp {
    Set = 0,
    Copy = 1,
    Move = 2,
    Cmp = 3,
}
const NUM_MEMOPS: usize = 4;

/// Which path completed the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatGroup {
    StdcCall = 0,
    DsaSuccess = 1,
    DsaFailed = 2,
}
const NUM_STAT_GROUPS: usize = 3;

/// Accelerator failure reasons, mirrored from §7's error taxonomy plus
/// `Success` as index 0 (matching the original shim's `return_code` enum,
/// which uses the same array to count both outcomes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Success = 0,
    Retries = 1,
    PageFault = 2,
    FailOther = 3,
}
const NUM_FAILURE_REASONS: usize = 4;

fn bucket_of(n: usize) -> usize {
    (n / BUCKET_SIZE).min(NUM_BUCKETS - 1)
}

struct Bucket {
    op_counter: [[AtomicU32; NUM_MEMOPS]; NUM_STAT_GROUPS],
    bytes_counter: [AtomicU64; NUM_STAT_GROUPS],
    lat_counter: [[AtomicU64; NUM_MEMOPS]; NUM_STAT_GROUPS],
    fail_counter: [AtomicU32; NUM_FAILURE_REASONS],
}

impl Bucket {
    fn new() -> Self {
        Self {
            op_counter: std::array::from_fn(|_| std::array::from_fn(|_| AtomicU32::new(0))),
            bytes_counter: std::array::from_fn(|_| AtomicU64::new(0)),
            lat_counter: std::array::from_fn(|_| std::array::from_fn(|_| AtomicU64::new(0))),
            fail_counter: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    fn reset(&self) {
        for group in &self.op_counter {
            for c in group {
                c.store(0, Ordering::Relaxed);
            }
        }
        for c in &self.bytes_counter {
            c.store(0, Ordering::Relaxed);
        }
        for group in &self.lat_counter {
            for c in group {
                c.store(0, Ordering::Relaxed);
            }
        }
        for c in &self.fail_counter {
            c.store(0, Ordering::Relaxed);
        }
    }
}

/// The process-wide histogram. Allocated once, regardless of whether
/// `DTO_COLLECT_STATS` is set, and simply left at zero when it isn't —
/// the atomics are cheap to allocate and this avoids an `Option` check
/// on every hot-path increment.
pub struct Stats {
    buckets: Vec<Bucket>,
    enabled: bool,
}

impl Stats {
    pub fn new(enabled: bool) -> Self {
        let buckets = (0..NUM_BUCKETS).map(|_| Bucket::new()).collect();
        Self { buckets, enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Record one completed request. `n` is the size that determines the
    /// bucket; `bytes` is the amount actually retired by `group`'s path.
    pub fn update(&self, op: MemOp, n: usize, bytes: usize, latency_ns: u64, group: StatGroup, failure: FailureReason) {
        if !self.enabled {
            return;
        }
        let bucket = &self.buckets[bucket_of(n)];
        bucket.op_counter[group as usize][op as usize].fetch_add(1, Ordering::Relaxed);
        bucket.bytes_counter[group as usize].fetch_add(bytes as u64, Ordering::Relaxed);
        bucket.lat_counter[group as usize][op as usize].fetch_add(latency_ns, Ordering::Relaxed);
        if group == StatGroup::DsaFailed {
            bucket.fail_counter[failure as usize].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Reset every counter. Called in the post-fork child (§4.H).
    pub fn reset(&self) {
        for bucket in &self.buckets {
            bucket.reset();
        }
    }

    /// Emit the histogram via the `trace` log level, one line per
    /// non-empty bucket/op combination.
    pub fn print(&self) {
        if !self.enabled {
            return;
        }
        for (i, bucket) in self.buckets.iter().enumerate() {
            let total: u32 = bucket
                .op_counter
                .iter()
                .flat_map(|g| g.iter())
                .map(|c| c.load(Ordering::Relaxed))
                .sum();
            if total == 0 {
                continue;
            }
            let lo = i * BUCKET_SIZE;
            let hi = lo + BUCKET_SIZE - 1;
            log::trace!("bucket [{}..{}]: {} requests", lo, hi, total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_of_clamps_to_last_bucket() {
        assert_eq!(bucket_of(0), 0);
        assert_eq!(bucket_of(4095), 0);
        assert_eq!(bucket_of(4096), 1);
        assert_eq!(bucket_of(usize::MAX), NUM_BUCKETS - 1);
    }

    #[test]
    fn test_disabled_stats_are_noop() {
        let stats = Stats::new(false);
        stats.update(MemOp::Copy, 128_000, 128_000, 500, StatGroup::DsaSuccess, FailureReason::Success);
        // No direct way to observe internal state without enabling, but
        // this must not panic and print() must do nothing.
        stats.print();
    }

    #[test]
    fn test_enabled_stats_record_and_reset() {
        let stats = Stats::new(true);
        stats.update(MemOp::Set, 5000, 5000, 1000, StatGroup::DsaSuccess, FailureReason::Success);
        let bucket = &stats.buckets[bucket_of(5000)];
        assert_eq!(
            bucket.op_counter[StatGroup::DsaSuccess as usize][MemOp::Set as usize].load(Ordering::Relaxed),
            1
        );
        stats.reset();
        assert_eq!(
            bucket.op_counter[StatGroup::DsaSuccess as usize][MemOp::Set as usize].load(Ordering::Relaxed),
            0
        );
    }

    #[test]
    fn test_scenario_1_single_descriptor_buckets_under_its_own_size() {
        // Copy 128 KiB via one accelerator descriptor (§8 scenario 1): the
        // completed request buckets by its own size, not by chunk count.
        let stats = Stats::new(true);
        stats.update(MemOp::Copy, 131_072, 131_072, 0, StatGroup::DsaSuccess, FailureReason::Success);
        let bucket = &stats.buckets[bucket_of(131_072)];
        assert_eq!(
            bucket.op_counter[StatGroup::DsaSuccess as usize][MemOp::Copy as usize].load(Ordering::Relaxed),
            1
        );
        assert_eq!(bucket.bytes_counter[StatGroup::DsaSuccess as usize].load(Ordering::Relaxed), 131_072);
    }

    #[test]
    fn test_failure_reason_only_recorded_for_dsa_failed() {
        let stats = Stats::new(true);
        stats.update(MemOp::Cmp, 9000, 0, 10, StatGroup::DsaFailed, FailureReason::PageFault);
        let bucket = &stats.buckets[bucket_of(9000)];
        assert_eq!(bucket.fail_counter[FailureReason::PageFault as usize].load(Ordering::Relaxed), 1);
    }
}
