// Intel Data Streaming Accelerator (DSA) Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! DSA hardware descriptor and completion record structures.
//!
//! These structures match the hardware layout defined in the Intel DSA
//! Architecture Specification and Linux kernel's `include/uapi/linux/idxd.h`.
//! One descriptor and one completion record are kept per thread (§3, §9) and
//! reused across calls; they are never shared between threads.

use crate::opcode::DsaOpcode;
use bitflags::bitflags;

bitflags! {
    /// Descriptor flags (bits 0-23 of the flags/opcode field).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescriptorFlags: u32 {
        /// Request completion record.
        const REQUEST_COMPLETION = 1 << 0;
        /// Fence - wait for previous descriptors on this queue.
        const FENCE = 1 << 2;
        /// Block on fault - don't return partial completion on page fault.
        /// Never set by this shim: §4.E relies on no-block-on-fault partials.
        const BLOCK_ON_FAULT = 1 << 3;
        /// Completion record address is valid.
        const CR_ADDR_VALID = 1 << 6;
        /// Cache control - device writes destination directly into cache
        /// hierarchy. Only set when the work queue's capability bitmask
        /// advertises support (§4.A).
        const CACHE_CTRL = 1 << 9;
    }
}

/// 64-byte DSA hardware descriptor.
///
/// This structure is submitted to the DSA hardware via the ENQCMD
/// instruction. It must be 64-byte aligned.
#[derive(Debug, Clone, Copy)]
#[repr(C, align(64))]
pub struct DsaHwDesc {
    /// PASID (Process Address Space ID) and privilege level.
    pub pasid: u32,

    /// Flags (bits [23:0]) and opcode (bits [31:24]).
    pub flags_opcode: u32,

    /// Address of completion record (must be 32-byte aligned).
    pub completion_addr: u64,

    /// Source address.
    /// - MemMove: source data address.
    /// - MemFill: the 64-bit fill pattern, not an address.
    /// - Compare: first operand address.
    pub src_addr: u64,

    /// Destination address.
    /// - MemMove/MemFill: destination data address.
    /// - Compare: unused; see `src2_addr`.
    pub dst_addr: u64,

    /// Transfer size in bytes. 32-bit field; operations exceeding it must
    /// be chunked by the splitter (§4.F).
    pub xfer_size: u32,

    /// Reserved field.
    reserved1: u16,
    reserved2: u16,

    /// Second source address, used only by Compare.
    pub src2_addr: u64,

    reserved3: u64,
    reserved4: u64,
}

impl DsaHwDesc {
    /// Create a new zeroed descriptor.
    #[inline]
    pub const fn new() -> Self {
        Self {
            pasid: 0,
            flags_opcode: 0,
            completion_addr: 0,
            src_addr: 0,
            dst_addr: 0,
            xfer_size: 0,
            reserved1: 0,
            reserved2: 0,
            src2_addr: 0,
            reserved3: 0,
            reserved4: 0,
        }
    }

    /// Set the opcode for this descriptor.
    #[inline]
    pub fn set_opcode(&mut self, opcode: DsaOpcode) {
        self.flags_opcode = (self.flags_opcode & 0x00FFFFFF) | ((opcode.as_u8() as u32) << 24);
    }

    /// Get the opcode from this descriptor.
    #[inline]
    pub fn opcode(&self) -> u8 {
        (self.flags_opcode >> 24) as u8
    }

    /// Set descriptor flags, replacing any previously set flags.
    #[inline]
    pub fn set_flags(&mut self, flags: DescriptorFlags) {
        self.flags_opcode = (self.flags_opcode & 0xFF000000) | (flags.bits() & 0x00FFFFFF);
    }

    /// Add descriptor flags (OR with existing).
    #[inline]
    pub fn add_flags(&mut self, flags: DescriptorFlags) {
        self.flags_opcode |= flags.bits() & 0x00FFFFFF;
    }

    /// Point the descriptor at a completion record and mark it valid.
    ///
    /// Per §3's invariant, the caller must zero the record's status byte
    /// before submission; this method does not do so itself, since the
    /// descriptor is reused across calls and the zeroing happens once per
    /// submission in the submitter, not once per descriptor construction.
    #[inline]
    pub fn set_completion(&mut self, record: *mut DsaCompletionRecord) {
        self.completion_addr = record as u64;
        self.add_flags(DescriptorFlags::REQUEST_COMPLETION | DescriptorFlags::CR_ADDR_VALID);
    }

    /// Build a memory-move (copy or move) descriptor.
    pub fn mem_move(dst: *mut u8, src: *const u8, len: usize, cache_ctrl: bool) -> Self {
        let mut desc = Self::new();
        desc.set_opcode(DsaOpcode::MemMove);
        desc.src_addr = src as u64;
        desc.dst_addr = dst as u64;
        desc.xfer_size = len as u32;
        if cache_ctrl {
            desc.add_flags(DescriptorFlags::CACHE_CTRL);
        }
        desc
    }

    /// Build a memory-fill descriptor. `pattern` repeats across the
    /// destination range.
    pub fn mem_fill(dst: *mut u8, len: usize, pattern: u64, cache_ctrl: bool) -> Self {
        let mut desc = Self::new();
        desc.set_opcode(DsaOpcode::MemFill);
        desc.src_addr = pattern;
        desc.dst_addr = dst as u64;
        desc.xfer_size = len as u32;
        if cache_ctrl {
            desc.add_flags(DescriptorFlags::CACHE_CTRL);
        }
        desc
    }

    /// Build a memory-compare descriptor.
    pub fn compare(src1: *const u8, src2: *const u8, len: usize) -> Self {
        let mut desc = Self::new();
        desc.set_opcode(DsaOpcode::Compare);
        desc.src_addr = src1 as u64;
        desc.src2_addr = src2 as u64;
        desc.xfer_size = len as u32;
        desc
    }

    /// Build a no-op descriptor, used only by internal submit/wait
    /// self-tests.
    pub fn noop() -> Self {
        let mut desc = Self::new();
        desc.set_opcode(DsaOpcode::Noop);
        desc
    }
}

impl Default for DsaHwDesc {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache-line-aligned completion record written by the accelerator and
/// polled by the submitting thread (§3).
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0 | 1 | status |
/// | 1 | 1 | result |
/// | 2 | 1 | fault_info |
/// | 3 | 1 | reserved |
/// | 4 | 4 | bytes_completed |
/// | 8 | 8 | fault_addr |
/// | 16..64 | 48 | reserved |
#[derive(Debug, Clone, Copy)]
#[repr(C, align(32))]
pub struct DsaCompletionRecord {
    /// Completion status. Hardware never writes zero; the field must be
    /// zeroed by software before each submission (§3 invariant) and is
    /// read with volatile semantics thereafter.
    pub status: u8,

    /// Result code. For Compare: 0 = equal, 1 = not equal.
    pub result: u8,

    fault_info: u8,
    reserved1: u8,

    /// Bytes completed, meaningful only on a partial (page-fault) completion.
    pub bytes_completed: u32,

    /// Fault address, meaningful only on a partial completion.
    pub fault_addr: u64,

    reserved_tail: [u8; 48],
}

impl DsaCompletionRecord {
    /// Create a new zeroed completion record.
    #[inline]
    pub const fn new() -> Self {
        Self {
            status: 0,
            result: 0,
            fault_info: 0,
            reserved1: 0,
            bytes_completed: 0,
            fault_addr: 0,
            reserved_tail: [0; 48],
        }
    }

    /// Zero the status byte, preparing the record for reuse. Must be
    /// called before every submission that targets this record (§3, §8
    /// invariant 4).
    #[inline]
    pub fn reset(&mut self) {
        unsafe { std::ptr::write_volatile(&mut self.status, 0) };
    }

    /// Check if the operation has completed (volatile read).
    #[inline]
    pub fn is_complete(&self) -> bool {
        unsafe { std::ptr::read_volatile(&self.status) != 0 }
    }

    /// Get the completion status (volatile read).
    #[inline]
    pub fn get_status(&self) -> CompletionStatus {
        let status = unsafe { std::ptr::read_volatile(&self.status) };
        CompletionStatus::from(status)
    }

    /// Get the comparison result (for Compare operations).
    /// Returns true if the two operands are equal.
    #[inline]
    pub fn compare_result(&self) -> bool {
        self.result == 0
    }
}

impl Default for DsaCompletionRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Completion status codes, per the IDXD completion-record status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Operation not yet complete.
    Pending,
    /// Operation completed successfully.
    Success,
    /// Page fault, no-block-on-fault: partial completion.
    PageFault,
    /// Any other non-zero status.
    Other(u8),
}

impl From<u8> for CompletionStatus {
    fn from(status: u8) -> Self {
        match status {
            0x00 => Self::Pending,
            0x01 => Self::Success,
            0x03 => Self::PageFault,
            other => Self::Other(other),
        }
    }
}

impl CompletionStatus {
    /// Returns true if this status indicates success.
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if this status indicates the operation is still pending.
    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

// Compile-time size and alignment checks per Intel DSA Architecture Specification.
const _: () = assert!(std::mem::size_of::<DsaHwDesc>() == 64);
const _: () = assert!(std::mem::align_of::<DsaHwDesc>() == 64);
const _: () = assert!(std::mem::size_of::<DsaCompletionRecord>() == 64);
const _: () = assert!(std::mem::align_of::<DsaCompletionRecord>() == 32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_size_and_alignment() {
        assert_eq!(std::mem::size_of::<DsaHwDesc>(), 64);
        assert_eq!(std::mem::align_of::<DsaHwDesc>(), 64);
    }

    #[test]
    fn test_completion_record_size_and_alignment() {
        assert_eq!(std::mem::size_of::<DsaCompletionRecord>(), 64);
        assert_eq!(std::mem::align_of::<DsaCompletionRecord>(), 32);
    }

    #[test]
    fn test_set_opcode_preserves_flags() {
        let mut desc = DsaHwDesc::new();
        desc.set_flags(DescriptorFlags::REQUEST_COMPLETION | DescriptorFlags::FENCE);
        desc.set_opcode(DsaOpcode::MemMove);
        assert_eq!(desc.opcode(), 0x04);
        assert!(desc.flags_opcode & DescriptorFlags::REQUEST_COMPLETION.bits() != 0);
        assert!(desc.flags_opcode & DescriptorFlags::FENCE.bits() != 0);
    }

    #[test]
    fn test_mem_move_descriptor() {
        let mut dst = [0u8; 8];
        let src = [1u8; 8];
        let desc = DsaHwDesc::mem_move(dst.as_mut_ptr(), src.as_ptr(), 8, false);
        assert_eq!(desc.opcode(), DsaOpcode::MemMove.as_u8());
        assert_eq!(desc.xfer_size, 8);
        assert_eq!(desc.flags_opcode & DescriptorFlags::CACHE_CTRL.bits(), 0);
    }

    #[test]
    fn test_mem_fill_descriptor_cache_ctrl() {
        let mut dst = [0u8; 8];
        let desc = DsaHwDesc::mem_fill(dst.as_mut_ptr(), 8, 0x61, true);
        assert_eq!(desc.opcode(), DsaOpcode::MemFill.as_u8());
        assert_ne!(desc.flags_opcode & DescriptorFlags::CACHE_CTRL.bits(), 0);
    }

    #[test]
    fn test_compare_descriptor_uses_src2() {
        let a = [1u8; 4];
        let b = [2u8; 4];
        let desc = DsaHwDesc::compare(a.as_ptr(), b.as_ptr(), 4);
        assert_eq!(desc.src_addr, a.as_ptr() as u64);
        assert_eq!(desc.src2_addr, b.as_ptr() as u64);
    }

    #[test]
    fn test_completion_status() {
        assert!(CompletionStatus::Success.is_success());
        assert!(CompletionStatus::Pending.is_pending());
        assert!(matches!(CompletionStatus::from(0x1f), CompletionStatus::Other(0x1f)));
    }

    #[test]
    fn test_completion_record_reset_and_volatile_read() {
        let mut record = DsaCompletionRecord::new();
        assert!(!record.is_complete());

        record.status = 0x01;
        assert!(record.is_complete());
        assert!(record.get_status().is_success());

        record.reset();
        assert!(!record.is_complete());
    }
}
