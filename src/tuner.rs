// Intel Data Streaming Accelerator (DSA) Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Online auto-tuner (§4.G): samples wait counts and adjusts the CPU
//! fraction and minimum-offload size to keep accelerator utilization high
//! and thread wait time low.

use crate::wait::WaitMethod;
use std::sync::atomic::{AtomicU64, Ordering};

/// Every `DESCS_PER_RUN`-th descriptor triggers a 16-descriptor sampling
/// window (§4.G). Matches the original shim's bitmask check
/// `(++num_descs & DESCS_PER_RUN) == DESCS_PER_RUN`.
const DESCS_PER_RUN: u64 = 0xF0;
const NUM_DESCS: u64 = 16;

const CSF_STEP: f64 = 0.01;
const MAX_CPU_SIZE_FRACTION: f64 = 0.9;
const MIN_CPU_SIZE_FRACTION: f64 = 0.0;

const DMS_STEP: usize = 1024;
const MAX_DSA_MIN_SIZE: usize = 65536;
const MIN_DSA_MIN_SIZE: usize = 6144;

/// Bounds on average waits-per-descriptor, selected by waiting discipline.
fn bounds_for(method: WaitMethod) -> (f64, f64) {
    match method {
        WaitMethod::Yield => (1.0, 2.0),
        WaitMethod::BusyPoll | WaitMethod::Umwait => (5.0, 20.0),
    }
}

/// Process-wide tunable knobs (§3 "Process-wide state").
pub struct Knobs {
    pub cpu_size_fraction: AtomicU64, // f64 bits
    pub dsa_min_size: AtomicU64,
}

impl Knobs {
    pub fn new(initial_fraction: f64, initial_min_size: usize) -> Self {
        Self {
            cpu_size_fraction: AtomicU64::new(initial_fraction.to_bits()),
            dsa_min_size: AtomicU64::new(initial_min_size as u64),
        }
    }

    pub fn fraction(&self) -> f64 {
        f64::from_bits(self.cpu_size_fraction.load(Ordering::Relaxed))
    }

    pub fn min_size(&self) -> usize {
        self.dsa_min_size.load(Ordering::Relaxed) as usize
    }
}

/// The two running accumulators the tuner samples into, plus the
/// free-running descriptor counter that decides when a sampling window
/// starts (§3, §4.G).
pub struct Tuner {
    num_descs: AtomicU64,
    adjust_num_descs: AtomicU64,
    adjust_num_waits: AtomicU64,
    wait_method: WaitMethod,
}

impl Tuner {
    pub fn new(wait_method: WaitMethod) -> Self {
        Self {
            num_descs: AtomicU64::new(0),
            adjust_num_descs: AtomicU64::new(0),
            adjust_num_waits: AtomicU64::new(0),
            wait_method,
        }
    }

    /// Record one descriptor's wait-poll count, and adjust `knobs` if a
    /// sampling window just closed. Called once per descriptor from the
    /// splitter after `run_chunk` completes (§4.G runs "inside the waiter").
    pub fn observe(&self, waits: u64, knobs: &Knobs) {
        let n = self.num_descs.fetch_add(1, Ordering::Relaxed) + 1;
        if (n & DESCS_PER_RUN) != DESCS_PER_RUN {
            return;
        }

        self.adjust_num_waits.fetch_add(waits, Ordering::Relaxed);
        let sampled = self.adjust_num_descs.fetch_add(1, Ordering::Relaxed) + 1;

        if sampled >= NUM_DESCS {
            // Compare-and-swap reset so concurrent threads don't double-count
            // a window that's already been consumed (§4.G).
            if self
                .adjust_num_descs
                .compare_exchange(sampled, 0, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                let total_waits = self.adjust_num_waits.swap(0, Ordering::Relaxed);
                let avg = total_waits as f64 / sampled as f64;
                self.apply_adjustment(avg, knobs);
            }
        }
    }

    fn apply_adjustment(&self, avg_num_waits: f64, knobs: &Knobs) {
        let (min_avg_waits, max_avg_waits) = bounds_for(self.wait_method);

        if avg_num_waits > max_avg_waits {
            let f = knobs.fraction();
            if f < MAX_CPU_SIZE_FRACTION {
                knobs
                    .cpu_size_fraction
                    .store((f + CSF_STEP).min(MAX_CPU_SIZE_FRACTION).to_bits(), Ordering::Relaxed);
            } else {
                let size = knobs.min_size();
                if size < MAX_DSA_MIN_SIZE {
                    knobs.dsa_min_size.store(
                        (size + DMS_STEP).min(MAX_DSA_MIN_SIZE) as u64,
                        Ordering::Relaxed,
                    );
                }
            }
        } else if avg_num_waits < min_avg_waits {
            let f = knobs.fraction();
            if f >= CSF_STEP {
                knobs.cpu_size_fraction.store(
                    (f - CSF_STEP).max(MIN_CPU_SIZE_FRACTION).to_bits(),
                    Ordering::Relaxed,
                );
            } else {
                let size = knobs.min_size();
                if size > MIN_DSA_MIN_SIZE {
                    knobs.dsa_min_size.store(
                        size.saturating_sub(DMS_STEP).max(MIN_DSA_MIN_SIZE) as u64,
                        Ordering::Relaxed,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_for_disciplines() {
        assert_eq!(bounds_for(WaitMethod::Yield), (1.0, 2.0));
        assert_eq!(bounds_for(WaitMethod::BusyPoll), (5.0, 20.0));
        assert_eq!(bounds_for(WaitMethod::Umwait), (5.0, 20.0));
    }

    #[test]
    fn test_high_avg_waits_increases_cpu_fraction() {
        let tuner = Tuner::new(WaitMethod::Yield);
        let knobs = Knobs::new(0.1, 8192);
        // Drive exactly one sampling window: descriptor #(DESCS_PER_RUN)
        // opens it, then NUM_DESCS-1 more close it.
        for i in 0..DESCS_PER_RUN {
            tuner.observe(0, &knobs);
            let _ = i;
        }
        for _ in 0..(NUM_DESCS - 1) {
            // well above max_avg_waits (2.0 for Yield) on every sampled descriptor
            tuner.observe(10, &knobs);
        }
        assert!((knobs.fraction() - 0.11).abs() < 1e-9);
    }

    #[test]
    fn test_low_avg_waits_decreases_cpu_fraction() {
        let tuner = Tuner::new(WaitMethod::Yield);
        let knobs = Knobs::new(0.5, 8192);
        for _ in 0..DESCS_PER_RUN {
            tuner.observe(0, &knobs);
        }
        for _ in 0..(NUM_DESCS - 1) {
            tuner.observe(0, &knobs);
        }
        assert!((knobs.fraction() - 0.49).abs() < 1e-9);
    }

    #[test]
    fn test_cpu_fraction_never_exceeds_cap() {
        let knobs = Knobs::new(0.9, 8192);
        let tuner = Tuner::new(WaitMethod::Yield);
        for _ in 0..DESCS_PER_RUN {
            tuner.observe(0, &knobs);
        }
        for _ in 0..(NUM_DESCS - 1) {
            tuner.observe(100, &knobs);
        }
        assert!(knobs.fraction() <= MAX_CPU_SIZE_FRACTION);
    }

    #[test]
    fn test_min_size_floor_is_respected() {
        let knobs = Knobs::new(0.0, MIN_DSA_MIN_SIZE);
        let tuner = Tuner::new(WaitMethod::Yield);
        for _ in 0..DESCS_PER_RUN {
            tuner.observe(0, &knobs);
        }
        for _ in 0..(NUM_DESCS - 1) {
            tuner.observe(0, &knobs);
        }
        assert_eq!(knobs.min_size(), MIN_DSA_MIN_SIZE);
    }
}
