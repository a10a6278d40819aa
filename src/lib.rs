// Intel Data Streaming Accelerator (DSA) Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! # DTO — Data-streaming Transparent Offload
//!
//! A transparent shim that offloads bulk `memset`/`memcpy`/`memmove`/
//! `memcmp` calls to an Intel Data Streaming Accelerator (DSA) work queue,
//! falling back to the platform's own libc implementation for anything
//! too small to be worth offloading, or when no DSA hardware is usable.
//!
//! ## Two ways to use this crate
//!
//! - **As a library**: call [`splitter::split_move`], [`splitter::split_fill`]
//!   and [`splitter::split_compare`] directly against a [`registry::Registry`]
//!   built by [`probe::probe`], driving your own completion channel.
//! - **As an `LD_PRELOAD` shim**: build with `--features interpose` to get a
//!   `cdylib` exporting `memset`/`memcpy`/`memmove`/`memcmp`, transparently
//!   shadowing the host process's own libc calls (§4.I). This is the mode
//!   the original C implementation this crate is modeled on runs in.
//!
//! ## Platform support
//!
//! Requires Linux on x86_64 with kernel IDXD support and at least one DSA
//! work queue configured via `accel-config` — the hardware ENQCMD/MOVDIR64B
//! submission path and the `/dev/dsa` character devices this crate opens do
//! not exist anywhere else.
//!
//! ## Tuning
//!
//! Every behavior beyond "offload if the buffer is big enough" is
//! controlled by `DTO_*` environment variables read once at process start;
//! see [`config::Config`] for the full list.

#![cfg(all(target_os = "linux", target_arch = "x86_64"))]
#![allow(dead_code)] // During development

// Module declarations
pub mod config;
pub mod descriptor;
pub mod error;
pub mod interpose;
pub mod lifecycle;
pub mod log;
pub mod numa;
pub mod opcode;
pub mod probe;
pub mod registry;
pub mod splitter;
pub mod stats;
pub mod submit;
pub mod tuner;
pub mod wait;

// Re-exports for convenient access
pub use config::{Config, NumaAwareness, WqDiscovery};
pub use descriptor::{CompletionStatus, DsaCompletionRecord, DsaHwDesc};
pub use error::{DtoError, DtoResult};
pub use lifecycle::{global, InitState};
pub use opcode::DsaOpcode;
pub use registry::{Registry, Selection, Wq};
pub use splitter::{split_compare, split_fill, split_move, Channel};
pub use wait::WaitMethod;

/// Run the process constructor (§4.H) outside of the `ctor`-driven
/// automatic path — useful for library consumers who embed this crate
/// without the `interpose` feature and want explicit control over when
/// setup runs.
pub fn init() {
    lifecycle::on_process_start();
}

#[ctor::ctor]
fn __dto_ctor() {
    lifecycle::on_process_start();
}

#[ctor::dtor]
fn __dto_dtor() {
    lifecycle::on_process_exit();
}
