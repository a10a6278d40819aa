// Intel Data Streaming Accelerator (DSA) Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! WQ registry and selector (§4.B, §4.C).
//!
//! Holds up to 32 registered work queues and a parallel array of up to 32
//! device groups keyed by NUMA node. After probing, a forward-fill pass
//! (§3 "Device group" invariant) ensures every populated NUMA slot up to
//! the highest index points at a non-empty group, so selection never hits
//! a gap.

use crate::error::{DtoError, DtoResult};
use crate::numa::{self, MAX_NUMA_NODES};
use crate::submit::SubmitMode;
use std::fs::File;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Maximum number of work queues tracked by one process (§3).
pub const MAX_WQS: usize = 32;

/// A registered, portal-mapped work queue.
pub struct Wq {
    /// Kept open for the process lifetime; the portal mapping borrows its fd.
    #[allow(dead_code)]
    file: File,
    portal: *mut u8,
    portal_size: usize,
    pub mode: SubmitMode,
    pub numa_node: Option<i32>,
    pub max_transfer_size: usize,
    pub cache_ctrl: bool,
}

// SAFETY: the portal is a process-wide MMIO page; hardware arbitrates
// concurrent enqueues, so sharing `&Wq` across threads is sound (§5).
unsafe impl Send for Wq {}
unsafe impl Sync for Wq {}

impl Wq {
    pub fn new(
        file: File,
        portal: *mut u8,
        portal_size: usize,
        mode: SubmitMode,
        numa_node: Option<i32>,
        max_transfer_size: usize,
        cache_ctrl: bool,
    ) -> Self {
        Self { file, portal, portal_size, mode, numa_node, max_transfer_size, cache_ctrl }
    }

    #[inline]
    pub fn portal(&self) -> *mut u8 {
        self.portal
    }
}

impl Drop for Wq {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.portal as *mut libc::c_void, self.portal_size);
        }
    }
}

/// A group of WQ indices local to one NUMA node, with its own round-robin
/// cursor (§3 "Device group").
struct DeviceGroup {
    wq_indices: Vec<usize>,
    cursor: AtomicUsize,
}

impl DeviceGroup {
    fn next(&self) -> usize {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.wq_indices[i % self.wq_indices.len()]
    }
}

/// How the caller wants the next WQ selected (§4.C).
pub enum Selection<'a> {
    /// NUMA awareness off: process-wide round robin.
    RoundRobin,
    /// NUMA awareness on, buffer-centric: node backing `*addr`.
    BufferCentric(&'a *const u8),
    /// NUMA awareness on, cpu-centric: node of the calling CPU.
    CpuCentric,
}

pub struct Registry {
    wqs: Vec<Wq>,
    groups: Vec<Option<DeviceGroup>>,
    global_cursor: AtomicUsize,
}

impl Registry {
    /// Build a registry from probed WQs, then forward-fill empty NUMA
    /// slots. Fails with `NoUsableWq` if `wqs` is empty.
    pub fn new(wqs: Vec<Wq>) -> DtoResult<Self> {
        if wqs.is_empty() {
            return Err(DtoError::NoUsableWq);
        }

        let mut groups: Vec<Option<DeviceGroup>> = (0..MAX_NUMA_NODES).map(|_| None).collect();
        for (idx, wq) in wqs.iter().enumerate() {
            if let Some(node) = wq.numa_node {
                let node = node as usize;
                if node < MAX_NUMA_NODES {
                    match &mut groups[node] {
                        Some(group) => group.wq_indices.push(idx),
                        None => {
                            groups[node] = Some(DeviceGroup {
                                wq_indices: vec![idx],
                                cursor: AtomicUsize::new(0),
                            })
                        }
                    }
                }
            }
        }

        let mut registry = Self { wqs, groups, global_cursor: AtomicUsize::new(0) };
        registry.forward_fill();
        Ok(registry)
    }

    /// Every NUMA node without a local device group inherits the previous
    /// populated node's WQ list (§3 invariant; ported from `dto.c`'s
    /// `correct_devices_list`). Nodes before the first populated one stay
    /// empty — there is nothing earlier to inherit from.
    fn forward_fill(&mut self) {
        let mut last_populated: Option<Vec<usize>> = None;
        for slot in self.groups.iter_mut() {
            match slot {
                Some(group) => last_populated = Some(group.wq_indices.clone()),
                None => {
                    if let Some(indices) = &last_populated {
                        *slot = Some(DeviceGroup {
                            wq_indices: indices.clone(),
                            cursor: AtomicUsize::new(0),
                        });
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.wqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wqs.is_empty()
    }

    pub fn get(&self, idx: usize) -> &Wq {
        &self.wqs[idx]
    }

    /// Select the next WQ for a call (§4.C).
    pub fn select(&self, selection: Selection) -> &Wq {
        let target_node = match selection {
            Selection::RoundRobin => None,
            Selection::BufferCentric(addr) => numa::node_of_page(*addr),
            Selection::CpuCentric => numa::node_of_current_cpu(),
        };

        if let Some(node) = target_node {
            let node = node as usize;
            if node < MAX_NUMA_NODES {
                if let Some(group) = &self.groups[node] {
                    return &self.wqs[group.next()];
                }
            }
        }

        let i = self.global_cursor.fetch_add(1, Ordering::Relaxed);
        &self.wqs[i % self.wqs.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    fn dummy_file() -> File {
        OpenOptions::new().read(true).open("/dev/null").expect("/dev/null should exist")
    }

    fn dummy_wq(numa_node: Option<i32>) -> Wq {
        Wq::new(
            dummy_file(),
            std::ptr::null_mut(),
            0,
            SubmitMode::Shared,
            numa_node,
            131_072,
            false,
        )
    }

    #[test]
    fn test_empty_registry_fails() {
        let result = Registry::new(Vec::new());
        assert!(matches!(result, Err(DtoError::NoUsableWq)));
    }

    #[test]
    fn test_round_robin_cycles_through_all_wqs() {
        let wqs = vec![dummy_wq(None), dummy_wq(None), dummy_wq(None)];
        let registry = Registry::new(wqs).unwrap();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            let wq = registry.select(Selection::RoundRobin);
            seen.insert(wq as *const Wq);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_forward_fill_gap_inherits_previous_node() {
        // node 0 populated, node 1 empty, node 2 populated -> node 1 inherits node 0.
        let wqs = vec![dummy_wq(Some(0)), dummy_wq(Some(2))];
        let registry = Registry::new(wqs).unwrap();
        assert!(registry.groups[0].is_some());
        assert!(registry.groups[1].is_some());
        assert!(registry.groups[2].is_some());
        assert_eq!(registry.groups[1].as_ref().unwrap().wq_indices, vec![0]);
    }

    #[test]
    fn test_forward_fill_leaves_leading_gap_empty() {
        let wqs = vec![dummy_wq(Some(2))];
        let registry = Registry::new(wqs).unwrap();
        assert!(registry.groups[0].is_none());
        assert!(registry.groups[1].is_none());
        assert!(registry.groups[2].is_some());
    }

    #[test]
    fn test_buffer_centric_falls_back_to_global_cursor_without_numa_data() {
        let wqs = vec![dummy_wq(None), dummy_wq(None)];
        let registry = Registry::new(wqs).unwrap();
        let addr: *const u8 = std::ptr::null();
        // node_of_page on a null pointer will fail to resolve; selection
        // must still return a WQ via the global cursor rather than panic.
        let _ = registry.select(Selection::BufferCentric(&addr));
    }
}
