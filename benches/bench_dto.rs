// Intel Data Streaming Accelerator (DSA) Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Benchmarks comparing the CPU-only path against accelerator offload for
//! the three splitter operations. The accelerator benchmarks are skipped
//! (not failed) on hosts without a usable DSA work queue, matching the
//! teacher crate's own "only if available" benchmark posture.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dto::descriptor::{DsaCompletionRecord, DsaHwDesc};
use dto::registry::Selection;
use dto::splitter::{split_compare, split_fill, split_move, Channel};
use dto::{Config, WaitMethod};

const SIZES: &[usize] = &[4 * 1024, 64 * 1024, 1024 * 1024, 4 * 1024 * 1024];

fn bench_memcpy(c: &mut Criterion) {
    let registry = dto::probe::probe(&Config::from_env()).ok();
    let mut group = c.benchmark_group("memcpy");

    for &size in SIZES {
        let src: Vec<u8> = (0..size).map(|i| (i & 0xFF) as u8).collect();
        let mut dst = vec![0u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("std_copy", size), &src, |b, src| {
            b.iter(|| unsafe {
                std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_mut_ptr(), src.len());
            });
        });

        if let Some(registry) = &registry {
            let wq = registry.select(Selection::RoundRobin);
            let mut desc = DsaHwDesc::new();
            let mut record = DsaCompletionRecord::new();
            group.bench_with_input(BenchmarkId::new("dsa", size), &src, |b, src| {
                b.iter(|| {
                    let mut channel = Channel {
                        portal: wq.portal(),
                        mode: wq.mode,
                        desc: &mut desc,
                        record: &mut record,
                        wait_method: WaitMethod::BusyPoll,
                    };
                    split_move(
                        &mut channel,
                        dst.as_mut_ptr(),
                        src.as_ptr(),
                        src.len(),
                        0.0,
                        wq.max_transfer_size,
                        4096,
                        wq.cache_ctrl,
                        |d, s, l| unsafe { std::ptr::copy_nonoverlapping(s, d, l) },
                    )
                });
            });
        }
    }

    group.finish();
}

fn bench_memset(c: &mut Criterion) {
    let registry = dto::probe::probe(&Config::from_env()).ok();
    let mut group = c.benchmark_group("memset");

    for &size in SIZES {
        let mut buf = vec![0u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("std_fill", size), &size, |b, &size| {
            b.iter(|| unsafe {
                std::ptr::write_bytes(buf.as_mut_ptr(), 0xAB, size);
            });
        });

        if let Some(registry) = &registry {
            let wq = registry.select(Selection::RoundRobin);
            let mut desc = DsaHwDesc::new();
            let mut record = DsaCompletionRecord::new();
            group.bench_with_input(BenchmarkId::new("dsa", size), &size, |b, &size| {
                b.iter(|| {
                    let mut channel = Channel {
                        portal: wq.portal(),
                        mode: wq.mode,
                        desc: &mut desc,
                        record: &mut record,
                        wait_method: WaitMethod::BusyPoll,
                    };
                    split_fill(
                        &mut channel,
                        buf.as_mut_ptr(),
                        size,
                        0xABAB_ABAB_ABAB_ABAB,
                        0.0,
                        wq.max_transfer_size,
                        4096,
                        wq.cache_ctrl,
                        |d, l| unsafe { std::ptr::write_bytes(d, 0xAB, l) },
                    )
                });
            });
        }
    }

    group.finish();
}

fn bench_memcmp(c: &mut Criterion) {
    let registry = dto::probe::probe(&Config::from_env()).ok();
    let mut group = c.benchmark_group("memcmp");

    for &size in SIZES {
        let a: Vec<u8> = (0..size).map(|i| (i & 0xFF) as u8).collect();
        let b = a.clone();

        group.throughput(Throughput::Bytes(size as u64 * 2));
        group.bench_with_input(BenchmarkId::new("slice_eq", size), &(&a, &b), |bench, (a, b)| {
            bench.iter(|| a == b);
        });

        if let Some(registry) = &registry {
            let wq = registry.select(Selection::RoundRobin);
            let mut desc = DsaHwDesc::new();
            let mut record = DsaCompletionRecord::new();
            group.bench_with_input(BenchmarkId::new("dsa", size), &(&a, &b), |bench, (a, b)| {
                bench.iter(|| {
                    let mut channel = Channel {
                        portal: wq.portal(),
                        mode: wq.mode,
                        desc: &mut desc,
                        record: &mut record,
                        wait_method: WaitMethod::BusyPoll,
                    };
                    split_compare(&mut channel, a.as_ptr(), b.as_ptr(), a.len(), wq.max_transfer_size, 4096)
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_memcpy, bench_memset, bench_memcmp);
criterion_main!(benches);
