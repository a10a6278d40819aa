// Intel Data Streaming Accelerator (DSA) Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Partitions a bulk memory request between a CPU-executed prefix and an
//! accelerator-executed suffix, chunks the accelerator portion across the
//! work queue's maximum single-descriptor transfer size, and resolves
//! overlap and partial completions (§4.F). This is the structural heart of
//! the offload shim: every other component exists to feed a WQ and a
//! waiting discipline to the functions in this module.

use crate::descriptor::{DsaCompletionRecord, DsaHwDesc};
use crate::submit::{submit, SubmitMode, SubmitResult, ENQCMD_MAX_RETRIES};
use crate::wait::{wait_for_completion_counted, WaitMethod, WaitOutcome};

/// Everything the splitter needs to drive descriptors for one call: a
/// portal to submit to, the submission mode for that portal, and the
/// calling thread's scratch descriptor/completion record (§3, §9
/// "per-thread scratch" — never shared across threads or calls).
pub struct Channel<'a> {
    pub portal: *mut u8,
    pub mode: SubmitMode,
    pub desc: &'a mut DsaHwDesc,
    pub record: &'a mut DsaCompletionRecord,
    pub wait_method: WaitMethod,
}

/// Result of driving one chunk's accelerator descriptor to completion.
enum ChunkOutcome {
    /// The accelerator retired the entire chunk.
    Full,
    /// The accelerator retired only `bytes` of the chunk (page fault or
    /// other failure); the remainder of the whole call falls through to
    /// the CPU tail.
    Partial { bytes: u32 },
}

/// Submit `desc` on `channel`, wait for completion, and report how many
/// bytes of the chunk's accelerator portion were actually retired. Also
/// returns the number of wait-poll iterations observed, for the tuner.
fn run_chunk(channel: &mut Channel, accel_len: usize) -> (ChunkOutcome, u64) {
    channel.record.reset();
    match unsafe { submit(channel.portal, channel.desc, channel.mode) } {
        SubmitResult::Success => {}
        SubmitResult::QueueFull => {
            // Bounded retry already exhausted inside `submit` for shared
            // queues only via enqcmd_retry; `submit` itself does a single
            // attempt, so retry here up to the submitter's bound (§4.D).
            let mut attempts = 1;
            let mut result = SubmitResult::QueueFull;
            while attempts < ENQCMD_MAX_RETRIES && result == SubmitResult::QueueFull {
                result = unsafe { submit(channel.portal, channel.desc, channel.mode) };
                attempts += 1;
            }
            if result == SubmitResult::QueueFull {
                return (ChunkOutcome::Partial { bytes: 0 }, 0);
            }
        }
    }

    let (outcome, polls) = wait_for_completion_counted(channel.record, channel.wait_method);
    let chunk_outcome = match outcome {
        WaitOutcome::Success => ChunkOutcome::Full,
        WaitOutcome::PageFault { bytes_completed, .. } => {
            ChunkOutcome::Partial { bytes: bytes_completed.min(accel_len as u32) }
        }
        WaitOutcome::FailOther { .. } => ChunkOutcome::Partial { bytes: 0 },
    };
    (chunk_outcome, polls)
}

/// Detect whether `[dest, dest+n)` and `[src, src+n)` overlap.
///
/// Per the open question in §9, this relies on the platform guarantee that
/// user-space addresses sit well below `usize::MAX - n`, so the comparison
/// additions below cannot wrap; `n` bounded by a `usize` byte count from a
/// real allocation makes that guarantee practically unconditional on
/// 64-bit Linux.
pub fn is_overlapping(dest: *const u8, src: *const u8, n: usize) -> bool {
    let dest = dest as usize;
    let src = src as usize;
    !(dest + n <= src || src + n <= dest)
}

/// Quantize a CPU fraction to two decimal digits, matching the original
/// shim's `(uint64_t)(100*f) / 100.0` truncation (not rounding).
pub fn quantize_fraction(f: f64) -> f64 {
    ((100.0 * f) as u64) as f64 / 100.0
}

/// Result of splitting one call across CPU and accelerator.
pub struct SplitResult {
    /// Total bytes retired (CPU prefixes + accelerator suffixes summed
    /// across every chunk). The caller finishes `n - bytes_completed` on
    /// the CPU (§4.F "Partial-completion resolution").
    pub bytes_completed: usize,
    /// Total tuner wait-poll samples observed across every chunk.
    pub wait_polls: u64,
    /// Number of chunks for which the accelerator descriptor was submitted.
    pub descriptors_submitted: u64,
}

/// Split and drive a `memmove`/`memcpy`-style operation.
///
/// `cpu_prefix` is invoked with `(dst, src, len)` to run the CPU-executed
/// prefix of a chunk; it must use the saved original routine, never the
/// interposed name (§9 "forced use of CPU path on re-entry").
pub fn split_move(
    channel: &mut Channel,
    dst: *mut u8,
    src: *const u8,
    n: usize,
    cpu_fraction: f64,
    max_transfer_size: usize,
    dsa_min_size: usize,
    cache_ctrl: bool,
    mut cpu_prefix: impl FnMut(*mut u8, *const u8, usize),
) -> SplitResult {
    let overlapping = is_overlapping(dst, src, n);
    let mut remaining = n;
    let mut bytes_completed: usize = 0;
    let mut wait_polls = 0u64;
    let mut descriptors_submitted = 0u64;

    while remaining >= dsa_min_size {
        let f = if overlapping { 0.0 } else { cpu_fraction };
        let chunk_len = chunk_length(remaining, max_transfer_size, f);
        let cpu_len = ((chunk_len as f64) * f) as usize;
        let accel_len = chunk_len - cpu_len;

        let chunk_base = bytes_completed;
        let cpu_dst = unsafe { dst.add(chunk_base) };
        let cpu_src = unsafe { src.add(chunk_base) };
        let accel_dst = unsafe { dst.add(chunk_base + cpu_len) };
        let accel_src = unsafe { src.add(chunk_base + cpu_len) };

        *channel.desc = DsaHwDesc::mem_move(accel_dst, accel_src, accel_len, cache_ctrl);
        channel.desc.set_completion(channel.record as *mut DsaCompletionRecord);

        if cpu_len > 0 {
            cpu_prefix(cpu_dst, cpu_src, cpu_len);
        }

        descriptors_submitted += 1;
        let (outcome, polls) = run_chunk(channel, accel_len);
        wait_polls += polls;

        match outcome {
            ChunkOutcome::Full => {
                bytes_completed += chunk_len;
                remaining -= chunk_len;
            }
            ChunkOutcome::Partial { bytes } => {
                bytes_completed += cpu_len + bytes as usize;
                break;
            }
        }
    }

    SplitResult { bytes_completed, wait_polls, descriptors_submitted }
}

/// Split and drive a `memset`-style fill operation.
pub fn split_fill(
    channel: &mut Channel,
    dst: *mut u8,
    n: usize,
    pattern: u64,
    cpu_fraction: f64,
    max_transfer_size: usize,
    dsa_min_size: usize,
    cache_ctrl: bool,
    mut cpu_prefix: impl FnMut(*mut u8, usize),
) -> SplitResult {
    let mut remaining = n;
    let mut bytes_completed: usize = 0;
    let mut wait_polls = 0u64;
    let mut descriptors_submitted = 0u64;

    while remaining >= dsa_min_size {
        let chunk_len = chunk_length(remaining, max_transfer_size, cpu_fraction);
        let cpu_len = ((chunk_len as f64) * cpu_fraction) as usize;
        let accel_len = chunk_len - cpu_len;

        let chunk_base = bytes_completed;
        let cpu_dst = unsafe { dst.add(chunk_base) };
        let accel_dst = unsafe { dst.add(chunk_base + cpu_len) };

        *channel.desc = DsaHwDesc::mem_fill(accel_dst, accel_len, pattern, cache_ctrl);
        channel.desc.set_completion(channel.record as *mut DsaCompletionRecord);

        if cpu_len > 0 {
            cpu_prefix(cpu_dst, cpu_len);
        }

        descriptors_submitted += 1;
        let (outcome, polls) = run_chunk(channel, accel_len);
        wait_polls += polls;

        match outcome {
            ChunkOutcome::Full => {
                bytes_completed += chunk_len;
                remaining -= chunk_len;
            }
            ChunkOutcome::Partial { bytes } => {
                bytes_completed += cpu_len + bytes as usize;
                break;
            }
        }
    }

    SplitResult { bytes_completed, wait_polls, descriptors_submitted }
}

/// Outcome of a split compare, carrying the standard-mandated return value
/// once a mismatch is located.
pub struct CompareResult {
    pub bytes_completed: usize,
    pub mismatch: Option<i32>,
    pub wait_polls: u64,
    pub descriptors_submitted: u64,
}

/// Split and drive a `memcmp`-style compare. No CPU prefix is used (§4.F);
/// each chunk is exactly `max_transfer_size` and the loop stops at the
/// first chunk hardware reports as unequal.
pub fn split_compare(
    channel: &mut Channel,
    a: *const u8,
    b: *const u8,
    n: usize,
    max_transfer_size: usize,
    dsa_min_size: usize,
) -> CompareResult {
    let mut remaining = n;
    let mut bytes_completed: usize = 0;
    let mut wait_polls = 0u64;
    let mut descriptors_submitted = 0u64;

    while remaining >= dsa_min_size {
        let chunk_len = remaining.min(max_transfer_size);
        let chunk_base = bytes_completed;
        let chunk_a = unsafe { a.add(chunk_base) };
        let chunk_b = unsafe { b.add(chunk_base) };

        *channel.desc = DsaHwDesc::compare(chunk_a, chunk_b, chunk_len);
        channel.desc.set_completion(channel.record as *mut DsaCompletionRecord);

        descriptors_submitted += 1;
        let (outcome, polls) = run_chunk(channel, chunk_len);
        wait_polls += polls;

        match outcome {
            ChunkOutcome::Full => {
                if !channel.record.compare_result() {
                    // Hardware flagged a mismatch somewhere in this chunk.
                    // Per §4.F, resolve the exact differing byte on the CPU
                    // and report bytes_completed as the full original `n`
                    // so the caller does no further CPU work.
                    let mismatch = locate_mismatch(chunk_a, chunk_b, chunk_len);
                    return CompareResult {
                        bytes_completed: n,
                        mismatch: Some(mismatch),
                        wait_polls,
                        descriptors_submitted,
                    };
                }
                bytes_completed += chunk_len;
                remaining -= chunk_len;
            }
            ChunkOutcome::Partial { bytes } => {
                bytes_completed += bytes as usize;
                return CompareResult { bytes_completed, mismatch: None, wait_polls, descriptors_submitted };
            }
        }
    }

    CompareResult { bytes_completed, mismatch: None, wait_polls, descriptors_submitted }
}

/// Scan `[a, a+len)` vs `[b, b+len)` for the first differing byte and
/// return `a[i] - b[i]` as the standard `memcmp` contract requires.
fn locate_mismatch(a: *const u8, b: *const u8, len: usize) -> i32 {
    let a = unsafe { std::slice::from_raw_parts(a, len) };
    let b = unsafe { std::slice::from_raw_parts(b, len) };
    for i in 0..len {
        if a[i] != b[i] {
            return a[i] as i32 - b[i] as i32;
        }
    }
    0
}

/// Compute the length of the next chunk so that its accelerator portion
/// fits within `max_transfer_size` (§4.F "Chunking"): `L = min(n, M/(1-f))`.
fn chunk_length(n: usize, max_transfer_size: usize, f: f64) -> usize {
    if f >= 1.0 {
        return n.min(max_transfer_size);
    }
    let accel_capacity = (max_transfer_size as f64 / (1.0 - f)) as usize;
    n.min(accel_capacity)
}
