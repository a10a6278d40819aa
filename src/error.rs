// Intel Data Streaming Accelerator (DSA) Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Error types for the offload shim.
//!
//! None of these ever escape the four interposed entry points (§7 of the
//! design): a splitter failure always degrades to a CPU completion of the
//! remaining bytes. The enum exists so internal call sites can use `?` and
//! so unit tests can assert on specific failure modes.

use thiserror::Error;

/// Errors that can occur during offload setup or a single descriptor's
/// submit/wait cycle.
#[derive(Debug, Error)]
pub enum DtoError {
    /// Platform probe found zero usable work queues (§4.A).
    #[error("no usable work queue found")]
    NoUsableWq,

    /// A work queue could not be parsed from `DTO_WQ_LIST` or sysfs.
    #[error("invalid work queue descriptor: {0}")]
    InvalidWq(String),

    /// ENQCMD reported "not accepted" `ENQCMD_MAX_RETRIES` times in a row (§4.D).
    #[error("work queue portal saturated after retries")]
    Retries,

    /// Hardware reported a partial completion due to a page fault (§4.E).
    #[error("page fault at offset {bytes_completed}, fault address {fault_addr:#018x}")]
    PageFault {
        fault_addr: u64,
        bytes_completed: u32,
    },

    /// Hardware reported any other non-success status (§4.E).
    #[error("descriptor failed: status={status:#04x}, result={result:#04x}")]
    FailOther { status: u8, result: u8 },

    /// Buffer size mismatch (compare operands, or copy dest shorter than src).
    #[error("buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// I/O error from sysfs reads or portal mmap/open.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Platform not supported (non-Linux, or non-x86_64).
    #[error("platform not supported: DTO requires Linux/x86_64 with an IDXD-capable DSA device")]
    PlatformNotSupported,

    /// Permission denied opening a work-queue character device.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Memory mapping a portal failed.
    #[error("mmap failed: {0}")]
    MmapFailed(String),

    /// The post-fork reinitialization hook could not be registered.
    #[error("fork handler registration failed")]
    ForkHandlerFailed,
}

/// Result type alias used throughout the offload shim.
pub type DtoResult<T> = Result<T, DtoError>;
