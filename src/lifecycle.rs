// Intel Data Streaming Accelerator (DSA) Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Process-wide lifecycle (§4.H): a three-state machine
//! (`NotStarted` → `InProgress` → `Ready`) guarding one-time setup of the
//! config, registry, tuner knobs and stats histogram, plus a `fork(2)`
//! hook that throws all of that away and rebuilds it in the child.
//!
//! The shim never blocks an interposed call on initialization: a call
//! observing anything other than `Ready` takes the CPU-only fallback path
//! immediately (§9 "never block the caller on init"), the same posture as
//! the original C constructor, which always has a narrow window between
//! `main()` and its own `__attribute__((constructor))` running.

use crate::config::Config;
use crate::numa::MAX_NUMA_NODES;
use crate::registry::Registry;
use crate::stats::Stats;
use crate::tuner::{Knobs, Tuner};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InitState {
    NotStarted = 0,
    InProgress = 1,
    Ready = 2,
}

impl From<u8> for InitState {
    fn from(v: u8) -> Self {
        match v {
            1 => InitState::InProgress,
            2 => InitState::Ready,
            _ => InitState::NotStarted,
        }
    }
}

/// Everything built once at init and torn down/rebuilt across `fork(2)`.
struct Ready {
    config: Config,
    registry: Option<Registry>,
    tuner: Tuner,
    knobs: Knobs,
    stats: Stats,
}

/// The process-wide singleton. Interior mutability lives behind a
/// `RwLock` so the post-fork child hook can replace every field in place;
/// readers on the hot path take the read lock, which is uncontended
/// outside of init and fork.
pub struct Shim {
    state: AtomicU8,
    use_cpu_only: AtomicBool,
    inner: RwLock<Option<Ready>>,
}

static SHIM: Shim = Shim::new();

impl Shim {
    const fn new() -> Self {
        Self {
            state: AtomicU8::new(InitState::NotStarted as u8),
            use_cpu_only: AtomicBool::new(false),
            inner: RwLock::new(None),
        }
    }

    pub fn state(&self) -> InitState {
        InitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn use_cpu_only(&self) -> bool {
        self.use_cpu_only.load(Ordering::Relaxed)
    }

    /// Run setup if nobody else has started it yet. Only the thread that
    /// wins the `NotStarted -> InProgress` transition performs the work;
    /// every other caller (there should be none under the `ctor`-driven
    /// startup path, but concurrent lazy callers are handled safely too)
    /// just observes the in-flight state and falls through to the CPU path.
    fn ensure_started(&self) {
        if self
            .state
            .compare_exchange(
                InitState::NotStarted as u8,
                InitState::InProgress as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        let config = Config::from_env();
        crate::log::install(config.log_file_prefix.as_deref(), config.log_level);

        let registry = match crate::probe::probe(&config) {
            Ok(r) => Some(r),
            Err(e) => {
                log::error!("probe failed, falling back to CPU-only: {}", e);
                self.use_cpu_only.store(true, Ordering::Relaxed);
                None
            }
        };

        let knobs = Knobs::new(config.cpu_size_fraction, config.dsa_min_size);
        let tuner = Tuner::new(config.wait_method);
        let stats = Stats::new(config.collect_stats);

        *self.inner.write().expect("shim lock poisoned") =
            Some(Ready { config, registry, tuner, knobs, stats });

        if !self.use_cpu_only.load(Ordering::Relaxed) {
            register_fork_hooks(self);
        }

        self.state.store(InitState::Ready as u8, Ordering::Release);
    }

    /// Access the initialized state, or `None` if not yet `Ready`. Callers
    /// (§4.I) must treat `None` identically to a probe failure: fall back
    /// to the saved CPU routine.
    pub fn with_ready<R>(&self, f: impl FnOnce(&Config, Option<&Registry>, &Tuner, &Knobs, &Stats) -> R) -> Option<R> {
        if self.state() != InitState::Ready {
            return None;
        }
        let guard = self.inner.read().expect("shim lock poisoned");
        guard.as_ref().map(|r| f(&r.config, r.registry.as_ref(), &r.tuner, &r.knobs, &r.stats))
    }

    /// Reinitialize after `fork(2)` (§4.H): drop the inherited registry
    /// (its file descriptors and portal mapping belong to the parent's
    /// PASID binding, not the child's) and every accumulator, then run
    /// setup again synchronously so the child never observes a stale
    /// `Ready` state pointing at unusable work queues.
    fn reinit_after_fork(&self) {
        {
            let mut guard = self.inner.write().expect("shim lock poisoned");
            if let Some(ready) = guard.take() {
                ready.stats.reset();
            }
        }
        self.state.store(InitState::NotStarted as u8, Ordering::Release);
        self.ensure_started();
    }
}

/// Register the `pthread_atfork` child hook. Matches `dto.c`'s posture:
/// if registration itself fails, the shim can no longer trust that a
/// forked child will reinitialize its WQ state, so it disables
/// accelerator use outright rather than risk submitting to a portal the
/// child doesn't actually own (§4.H).
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
fn register_fork_hooks(shim: &Shim) {
    let rc = unsafe { libc::pthread_atfork(None, None, Some(after_fork_child)) };
    if rc != 0 {
        log::error!("pthread_atfork registration failed (rc={}), disabling accelerator use", rc);
        shim.use_cpu_only.store(true, Ordering::Relaxed);
    }
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
fn register_fork_hooks(shim: &Shim) {
    shim.use_cpu_only.store(true, Ordering::Relaxed);
}

extern "C" fn after_fork_child() {
    SHIM.reinit_after_fork();
}

/// Entry point for the `ctor`-driven process constructor (installed in
/// `lib.rs`). Runs setup eagerly, before `main()`, so the narrow
/// CPU-fallback window only exists for calls that somehow race the
/// dynamic loader itself.
pub fn on_process_start() {
    SHIM.ensure_started();
}

/// Entry point for the `ctor`-driven process destructor: print the stats
/// histogram one last time if collection was enabled (§4.H, §6).
pub fn on_process_exit() {
    SHIM.with_ready(|_, _, _, _, stats| stats.print());
}

/// Access the process-wide singleton. Exposed for `interpose.rs`.
pub fn global() -> &'static Shim {
    &SHIM
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_state_roundtrip() {
        assert_eq!(InitState::from(0), InitState::NotStarted);
        assert_eq!(InitState::from(1), InitState::InProgress);
        assert_eq!(InitState::from(2), InitState::Ready);
        assert_eq!(InitState::from(99), InitState::NotStarted);
    }

    #[test]
    fn test_shim_starts_not_started() {
        let shim = Shim::new();
        assert_eq!(shim.state(), InitState::NotStarted);
        assert!(!shim.use_cpu_only());
    }

    #[test]
    fn test_with_ready_returns_none_before_init() {
        let shim = Shim::new();
        let result = shim.with_ready(|_, _, _, _, _| 1);
        assert!(result.is_none());
    }

    #[test]
    fn test_ready_without_registry_still_serves_cpu_only_calls() {
        // Init with no usable WQ (§8 scenario 6): probe failure leaves
        // `registry: None` in `Ready` rather than blocking startup, so
        // `with_ready` still hands callers a `Config`/`Knobs`/`Stats` to
        // record the CPU-only path against, with no portal ever touched.
        let shim = Shim::new();
        *shim.inner.write().unwrap() = Some(Ready {
            config: Config::from_env(),
            registry: None,
            tuner: Tuner::new(crate::wait::WaitMethod::BusyPoll),
            knobs: Knobs::new(0.0, 8192),
            stats: Stats::new(false),
        });
        shim.state.store(InitState::Ready as u8, Ordering::Release);

        let saw_no_registry = shim.with_ready(|_, registry, _, _, _| registry.is_none());
        assert_eq!(saw_no_registry, Some(true));
    }

    #[test]
    fn test_max_numa_nodes_matches_registry_bound() {
        // lifecycle doesn't size anything off this directly, but the
        // registry it owns does; keep the constant import exercised so a
        // future refactor that drops the shared bound doesn't go unnoticed.
        assert_eq!(MAX_NUMA_NODES, 32);
    }
}
