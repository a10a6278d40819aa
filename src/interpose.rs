// Intel Data Streaming Accelerator (DSA) Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! The four interposed libc entry points (§4.I), built only when the
//! `interpose` feature is enabled (this crate's `cdylib` output is then
//! meant to be loaded via `LD_PRELOAD`).
//!
//! Each entry point follows the same shape: fall back to the saved
//! original routine whenever the shim isn't `Ready` or the request is too
//! small to be worth offloading, otherwise split the call across CPU and
//! accelerator and finish any remaining tail on the CPU.

#![cfg(all(feature = "interpose", target_os = "linux", target_arch = "x86_64"))]

use crate::config::NumaAwareness;
use crate::descriptor::{DsaCompletionRecord, DsaHwDesc};
use crate::lifecycle::global;
use crate::registry::Selection;
use crate::splitter::{split_compare, split_fill, split_move, Channel};
use crate::stats::{FailureReason, MemOp, StatGroup};
use std::cell::RefCell;
use std::os::raw::{c_int, c_void};
use std::sync::OnceLock;

type MemsetFn = unsafe extern "C" fn(*mut c_void, c_int, usize) -> *mut c_void;
type MemcpyFn = unsafe extern "C" fn(*mut c_void, *const c_void, usize) -> *mut c_void;
type MemmoveFn = unsafe extern "C" fn(*mut c_void, *const c_void, usize) -> *mut c_void;
type MemcmpFn = unsafe extern "C" fn(*const c_void, *const c_void, usize) -> c_int;

struct OriginalFns {
    memset: MemsetFn,
    memcpy: MemcpyFn,
    memmove: MemmoveFn,
    memcmp: MemcmpFn,
}

static ORIGINALS: OnceLock<OriginalFns> = OnceLock::new();

/// Resolve the next `name` in the dynamic symbol chain past this shared
/// object, i.e. the libc implementation `LD_PRELOAD` would otherwise
/// shadow. Resolved once, lazily, on first use (§4.I, §9 "never resolve
/// symbols from inside a signal-unsafe context" is not a concern here:
/// this only ever runs off the hot path, on the very first interposed call).
unsafe fn dlsym_next(name: &[u8]) -> *mut c_void {
    let sym = libc::dlsym(libc::RTLD_NEXT, name.as_ptr() as *const libc::c_char);
    if sym.is_null() {
        // Nothing rational to fall back to: the process's own libc is missing
        // a symbol we were loaded to shadow.
        libc::abort();
    }
    sym
}

fn originals() -> &'static OriginalFns {
    ORIGINALS.get_or_init(|| unsafe {
        OriginalFns {
            memset: std::mem::transmute::<*mut c_void, MemsetFn>(dlsym_next(b"memset\0")),
            memcpy: std::mem::transmute::<*mut c_void, MemcpyFn>(dlsym_next(b"memcpy\0")),
            memmove: std::mem::transmute::<*mut c_void, MemmoveFn>(dlsym_next(b"memmove\0")),
            memcmp: std::mem::transmute::<*mut c_void, MemcmpFn>(dlsym_next(b"memcmp\0")),
        }
    })
}

thread_local! {
    /// Per-thread scratch descriptor and completion record (§3, §9): never
    /// shared across threads or calls, reused for every descriptor a given
    /// thread submits.
    static SCRATCH: RefCell<(DsaHwDesc, DsaCompletionRecord)> =
        RefCell::new((DsaHwDesc::new(), DsaCompletionRecord::new()));
}

fn numa_selection(awareness: NumaAwareness, addr: &*const u8) -> Selection<'_> {
    match awareness {
        NumaAwareness::None => Selection::RoundRobin,
        NumaAwareness::BufferCentric => Selection::BufferCentric(addr),
        NumaAwareness::CpuCentric => Selection::CpuCentric,
    }
}

#[no_mangle]
pub unsafe extern "C" fn memset(dst: *mut c_void, value: c_int, n: usize) -> *mut c_void {
    let orig = originals();

    let result = global().with_ready(|config, registry, tuner, knobs, stats| {
        let registry = registry?;
        if n < knobs.min_size() {
            return None;
        }

        let byte = value as u8;
        let pattern = u64::from_ne_bytes([byte; 8]);
        let addr = dst as *const u8;
        let wq = registry.select(numa_selection(config.numa_awareness, &addr));

        let bytes_completed = SCRATCH.with(|scratch| {
            let mut scratch = scratch.borrow_mut();
            let (desc, record) = &mut *scratch;
            let mut channel =
                Channel { portal: wq.portal(), mode: wq.mode, desc, record, wait_method: config.wait_method };

            let split = split_fill(
                &mut channel,
                dst as *mut u8,
                n,
                pattern,
                knobs.fraction(),
                wq.max_transfer_size,
                knobs.min_size(),
                wq.cache_ctrl,
                |d, l| {
                    (orig.memset)(d as *mut c_void, value, l);
                },
            );

            if config.auto_adjust_knobs {
                tuner.observe(split.wait_polls, knobs);
            }
            split.bytes_completed
        });

        if bytes_completed < n {
            (orig.memset)((dst as *mut u8).add(bytes_completed) as *mut c_void, value, n - bytes_completed);
        }

        if stats.enabled() {
            let group = if bytes_completed == n { StatGroup::DsaSuccess } else { StatGroup::DsaFailed };
            let failure = if group == StatGroup::DsaFailed { FailureReason::FailOther } else { FailureReason::Success };
            stats.update(MemOp::Set, n, n, 0, group, failure);
        }

        Some(())
    }).flatten();

    if result.is_none() {
        (orig.memset)(dst, value, n);
        global().with_ready(|_, _, _, _, stats| {
            if stats.enabled() {
                stats.update(MemOp::Set, n, n, 0, StatGroup::StdcCall, FailureReason::Success);
            }
        });
    }

    dst
}

#[no_mangle]
pub unsafe extern "C" fn memcpy(dst: *mut c_void, src: *const c_void, n: usize) -> *mut c_void {
    copy_or_move(dst, src, n, false);
    dst
}

#[no_mangle]
pub unsafe extern "C" fn memmove(dst: *mut c_void, src: *const c_void, n: usize) -> *mut c_void {
    copy_or_move(dst, src, n, true);
    dst
}

/// Shared implementation for `memcpy`/`memmove`: the only behavioral
/// difference between the two is overlap handling, which `split_move`
/// already resolves internally via [`crate::splitter::is_overlapping`], so both
/// entry points drive the same splitter call.
unsafe fn copy_or_move(dst: *mut c_void, src: *const c_void, n: usize, is_move: bool) {
    let orig = originals();
    let op = if is_move { MemOp::Move } else { MemOp::Copy };

    let result = global().with_ready(|config, registry, tuner, knobs, stats| {
        let registry = registry?;
        if n < knobs.min_size() {
            return None;
        }

        let addr = dst as *const u8;
        let wq = registry.select(numa_selection(config.numa_awareness, &addr));

        let bytes_completed = SCRATCH.with(|scratch| {
            let mut scratch = scratch.borrow_mut();
            let (desc, record) = &mut *scratch;
            let mut channel =
                Channel { portal: wq.portal(), mode: wq.mode, desc, record, wait_method: config.wait_method };

            let split = split_move(
                &mut channel,
                dst as *mut u8,
                src as *const u8,
                n,
                knobs.fraction(),
                wq.max_transfer_size,
                knobs.min_size(),
                wq.cache_ctrl,
                |d, s, l| {
                    if is_move {
                        (orig.memmove)(d as *mut c_void, s as *const c_void, l);
                    } else {
                        (orig.memcpy)(d as *mut c_void, s as *const c_void, l);
                    }
                },
            );

            if config.auto_adjust_knobs {
                tuner.observe(split.wait_polls, knobs);
            }
            split.bytes_completed
        });

        if bytes_completed < n {
            let tail_dst = (dst as *mut u8).add(bytes_completed) as *mut c_void;
            let tail_src = (src as *const u8).add(bytes_completed) as *const c_void;
            if is_move {
                (orig.memmove)(tail_dst, tail_src, n - bytes_completed);
            } else {
                (orig.memcpy)(tail_dst, tail_src, n - bytes_completed);
            }
        }

        if stats.enabled() {
            let group = if bytes_completed == n { StatGroup::DsaSuccess } else { StatGroup::DsaFailed };
            let failure = if group == StatGroup::DsaFailed { FailureReason::FailOther } else { FailureReason::Success };
            stats.update(op, n, n, 0, group, failure);
        }

        Some(())
    }).flatten();

    if result.is_none() {
        if is_move {
            (orig.memmove)(dst, src, n);
        } else {
            (orig.memcpy)(dst, src, n);
        }
        global().with_ready(|_, _, _, _, stats| {
            if stats.enabled() {
                stats.update(op, n, n, 0, StatGroup::StdcCall, FailureReason::Success);
            }
        });
    }
}

#[no_mangle]
pub unsafe extern "C" fn memcmp(a: *const c_void, b: *const c_void, n: usize) -> c_int {
    let orig = originals();

    let result: Option<c_int> = global().with_ready(|config, registry, tuner, knobs, stats| -> Option<c_int> {
        let registry = registry?;
        if n < knobs.min_size() {
            return None;
        }

        let addr = a as *const u8;
        let wq = registry.select(numa_selection(config.numa_awareness, &addr));

        let (bytes_completed, mismatch) = SCRATCH.with(|scratch| {
            let mut scratch = scratch.borrow_mut();
            let (desc, record) = &mut *scratch;
            let mut channel =
                Channel { portal: wq.portal(), mode: wq.mode, desc, record, wait_method: config.wait_method };

            let result =
                split_compare(&mut channel, a as *const u8, b as *const u8, n, wq.max_transfer_size, knobs.min_size());

            if config.auto_adjust_knobs {
                tuner.observe(result.wait_polls, knobs);
            }
            (result.bytes_completed, result.mismatch)
        });

        let value = if let Some(diff) = mismatch {
            diff
        } else if bytes_completed < n {
            (orig.memcmp)(
                (a as *const u8).add(bytes_completed) as *const c_void,
                (b as *const u8).add(bytes_completed) as *const c_void,
                n - bytes_completed,
            )
        } else {
            0
        };

        if stats.enabled() {
            let group = if mismatch.is_some() || bytes_completed == n { StatGroup::DsaSuccess } else { StatGroup::DsaFailed };
            let failure = if group == StatGroup::DsaFailed { FailureReason::FailOther } else { FailureReason::Success };
            stats.update(MemOp::Cmp, n, n, 0, group, failure);
        }

        Some(value)
    }).flatten();

    match result {
        Some(value) => value,
        None => {
            let value = (orig.memcmp)(a, b, n);
            global().with_ready(|_, _, _, _, stats| {
                if stats.enabled() {
                    stats.update(MemOp::Cmp, n, n, 0, StatGroup::StdcCall, FailureReason::Success);
                }
            });
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numa_selection_maps_awareness() {
        let addr: *const u8 = std::ptr::null();
        assert!(matches!(numa_selection(NumaAwareness::None, &addr), Selection::RoundRobin));
        assert!(matches!(numa_selection(NumaAwareness::BufferCentric, &addr), Selection::BufferCentric(_)));
        assert!(matches!(numa_selection(NumaAwareness::CpuCentric, &addr), Selection::CpuCentric));
    }

    #[test]
    fn test_memset_falls_back_to_original_before_ready() {
        // The global shim is not started in this test binary, so this call
        // must resolve through `originals()` without panicking.
        let mut buf = [0xAAu8; 64];
        unsafe {
            memset(buf.as_mut_ptr() as *mut c_void, 0, buf.len());
        }
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_memcpy_falls_back_to_original_before_ready() {
        let src = [7u8; 32];
        let mut dst = [0u8; 32];
        unsafe {
            memcpy(dst.as_mut_ptr() as *mut c_void, src.as_ptr() as *const c_void, src.len());
        }
        assert_eq!(dst, src);
    }

    #[test]
    fn test_memcmp_falls_back_to_original_before_ready() {
        let a = [1u8, 2, 3];
        let b = [1u8, 2, 4];
        let result = unsafe { memcmp(a.as_ptr() as *const c_void, b.as_ptr() as *const c_void, 3) };
        assert_ne!(result, 0);
    }
}
