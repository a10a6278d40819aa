// Intel Data Streaming Accelerator (DSA) Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Waiting disciplines for a submitted descriptor's completion record.
//!
//! Three disciplines are available (§4.E), selected once at init time via
//! `DTO_WAIT_METHOD` and shared by every thread for the life of the process:
//!
//! - [`WaitMethod::Yield`]: call `sched_yield()` between checks.
//! - [`WaitMethod::BusyPoll`]: spin with `pause` for the whole wait.
//! - [`WaitMethod::Umwait`]: arm `UMONITOR` on the completion byte and block
//!   in `UMWAIT` with a relative timeout, falling back to a `pause` spin
//!   loop on CPUs that don't advertise the `WAITPKG` feature.

use crate::descriptor::{CompletionStatus, DsaCompletionRecord};
use crate::error::DtoError;

/// Relative UMWAIT deadline, expressed in TSC ticks. Matches `UMWAIT_DELAY`
/// in the original C shim.
pub const UMWAIT_DELAY: u64 = 100_000;

/// Waiting discipline (§4.E), chosen once at init time and shared globally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMethod {
    /// `sched_yield()` between polls.
    Yield,
    /// Spin with `pause` for the duration of the wait.
    BusyPoll,
    /// `UMONITOR`/`UMWAIT` on the completion byte; requires `WAITPKG`.
    Umwait,
}

impl WaitMethod {
    /// Parse a `DTO_WAIT_METHOD` value (§6). Unrecognized values, and
    /// `umwait` on CPUs lacking `WAITPKG`, fall back to `Yield`, the
    /// documented default.
    pub fn from_env_str(s: &str) -> Self {
        match s {
            "busypoll" => Self::BusyPoll,
            "umwait" if cpu_supports_umwait() => Self::Umwait,
            _ => Self::Yield,
        }
    }
}

/// Returns true if the CPU advertises the `WAITPKG` feature (CPUID.7.0:ECX[5]),
/// required for `UMONITOR`/`UMWAIT`.
#[cfg(target_arch = "x86_64")]
pub fn cpu_supports_umwait() -> bool {
    // SAFETY: CPUID leaf 7, subleaf 0 is always valid to query.
    let result = unsafe { core::arch::x86_64::__cpuid_count(7, 0) };
    (result.ecx & (1 << 5)) != 0
}

#[cfg(not(target_arch = "x86_64"))]
pub fn cpu_supports_umwait() -> bool {
    false
}

/// Arm `UMONITOR` on `addr`.
///
/// # Safety
/// `addr` must remain valid until the matching `umwait` call returns.
#[inline]
#[cfg(target_arch = "x86_64")]
unsafe fn umonitor(addr: *const u8) {
    // F3 0F AE /6 - UMONITOR r64
    core::arch::asm!(
        ".byte 0xf3, 0x0f, 0xae, 0xf0",
        in("rax") addr,
        options(nostack, preserves_flags)
    );
}

/// Block in `UMWAIT` until the monitored line is written or `deadline_tsc`
/// (absolute TSC value) passes. Returns true if woken by a write.
///
/// # Safety
/// Must be preceded by a matching [`umonitor`] call on the same address.
#[inline]
#[cfg(target_arch = "x86_64")]
unsafe fn umwait(deadline_tsc: u64) -> bool {
    // F2 0F AE /6 - UMWAIT r32, EDX:EAX
    // C0.1 state: ECX bit 0 = 1 selects the lower-power substate.
    let edx = (deadline_tsc >> 32) as u32;
    let eax = deadline_tsc as u32;
    let woken_by_c_state: u8;
    core::arch::asm!(
        ".byte 0xf2, 0x0f, 0xae, 0xf1",
        "setc {woken}",
        in("eax") eax,
        in("edx") edx,
        in("ecx") 1u32,
        woken = out(reg_byte) woken_by_c_state,
        options(nostack, preserves_flags)
    );
    // CF=1 means the deadline elapsed before a wakeup; CF=0 means a store
    // to the monitored range (or an interrupt) woke us early.
    woken_by_c_state == 0
}

/// Outcome of waiting for a completion record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Hardware reported success.
    Success,
    /// Hardware reported a partial completion (page fault, no block-on-fault).
    PageFault { bytes_completed: u32, fault_addr: u64 },
    /// Hardware reported any other failure status.
    FailOther { status: u8, result: u8 },
}

impl From<WaitOutcome> for DtoError {
    fn from(outcome: WaitOutcome) -> Self {
        match outcome {
            WaitOutcome::Success => unreachable!("Success is not an error"),
            WaitOutcome::PageFault { bytes_completed, fault_addr } => {
                DtoError::PageFault { fault_addr, bytes_completed }
            }
            WaitOutcome::FailOther { status, result } => DtoError::FailOther { status, result },
        }
    }
}

/// Poll `record` to completion using `method`, returning the classified
/// outcome. The elapsed wall-clock time of this call feeds the tuner's
/// running average (§4.G); callers time it externally with `Instant`.
pub fn wait_for_completion(record: &DsaCompletionRecord, method: WaitMethod) -> WaitOutcome {
    let (outcome, _polls) = wait_for_completion_counted(record, method);
    outcome
}

/// As [`wait_for_completion`], but also returns the number of poll
/// iterations spent waiting. The tuner (§4.G) samples this count as its
/// "waits observed" signal.
pub fn wait_for_completion_counted(
    record: &DsaCompletionRecord,
    method: WaitMethod,
) -> (WaitOutcome, u64) {
    let polls = match method {
        WaitMethod::Yield => wait_yield(record),
        WaitMethod::BusyPoll => wait_busy_poll(record),
        WaitMethod::Umwait => wait_umwait(record),
    };
    (classify(record), polls)
}

fn wait_yield(record: &DsaCompletionRecord) -> u64 {
    let mut polls = 0u64;
    while !record.is_complete() {
        polls += 1;
        #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
        unsafe {
            libc::sched_yield();
        }
        #[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
        std::thread::yield_now();
    }
    polls
}

fn wait_busy_poll(record: &DsaCompletionRecord) -> u64 {
    let mut polls = 0u64;
    while !record.is_complete() {
        polls += 1;
        core::hint::spin_loop();
    }
    polls
}

#[cfg(target_arch = "x86_64")]
fn wait_umwait(record: &DsaCompletionRecord) -> u64 {
    if !cpu_supports_umwait() {
        return wait_busy_poll(record);
    }
    let status_addr = &record.status as *const u8;
    let mut polls = 0u64;
    while !record.is_complete() {
        polls += 1;
        let tsc = unsafe { core::arch::x86_64::_rdtsc() };
        unsafe {
            umonitor(status_addr);
            // Re-check after arming the monitor: a write could have landed
            // between the is_complete() check above and umonitor().
            if record.is_complete() {
                break;
            }
            umwait(tsc + UMWAIT_DELAY);
        }
    }
    polls
}

#[cfg(not(target_arch = "x86_64"))]
fn wait_umwait(record: &DsaCompletionRecord) -> u64 {
    wait_busy_poll(record)
}

fn classify(record: &DsaCompletionRecord) -> WaitOutcome {
    match record.get_status() {
        CompletionStatus::Success => WaitOutcome::Success,
        CompletionStatus::PageFault => WaitOutcome::PageFault {
            bytes_completed: record.bytes_completed,
            fault_addr: record.fault_addr,
        },
        CompletionStatus::Other(_) | CompletionStatus::Pending => WaitOutcome::FailOther {
            status: record.status,
            result: record.result,
        },
    }
}
