// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Benchmarks for the dispatch path.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Idempotency claims, single-threaded and contended
//! - Round-robin routing
//! - Parallel intake (claim, route, enqueue)
//! - End-to-end submit against the in-memory ledger

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use faucet_dispatch::{
    AssetId, DisbursementQueue, Dispatcher, FaucetConfig, IdempotencyGuard, MemoryLedger,
    QueueIndex, Recipient, Request, Router,
};
use rayon::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

// =============================================================================
// Helper Functions
// =============================================================================

fn recipient(n: u32) -> Recipient {
    format!("0x{:040x}", n).parse().unwrap()
}

fn recipients(count: u32) -> Vec<Recipient> {
    (0..count).map(recipient).collect()
}

// =============================================================================
// Single-Threaded Benchmarks
// =============================================================================

fn bench_guard_claims(c: &mut Criterion) {
    let mut group = c.benchmark_group("guard_claims");

    for count in [1_000u32, 10_000, 100_000].iter() {
        let ids = recipients(*count);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &ids, |b, ids| {
            b.iter(|| {
                let guard = IdempotencyGuard::new();
                for id in ids {
                    black_box(guard.try_claim(id));
                }
                black_box(&guard);
            })
        });
    }
    group.finish();
}

fn bench_route(c: &mut Criterion) {
    let mut group = c.benchmark_group("route");

    for queues in [1usize, 8, 64].iter() {
        let router = Router::new((0..*queues).map(QueueIndex));
        group.bench_with_input(BenchmarkId::from_parameter(queues), &router, |b, router| {
            b.iter(|| black_box(router.route()))
        });
    }
    group.finish();
}

// =============================================================================
// Multi-Threaded Benchmarks
// =============================================================================

fn bench_parallel_duplicate_claims(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_duplicate_claims");

    for count in [1_000u32, 10_000, 100_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let hot = recipient(1);
            b.iter(|| {
                let guard = IdempotencyGuard::new();
                let accepted = AtomicU32::new(0);

                (0..count).into_par_iter().for_each(|_| {
                    if guard.try_claim(&hot) {
                        accepted.fetch_add(1, Ordering::Relaxed);
                    }
                });

                assert_eq!(accepted.load(Ordering::Relaxed), 1);
            })
        });
    }
    group.finish();
}

fn bench_parallel_intake(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_intake");

    for count in [1_000u32, 10_000, 100_000].iter() {
        let ids = recipients(*count);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &ids, |b, ids| {
            b.iter(|| {
                let guard = IdempotencyGuard::new();
                let router = Router::new((0..8).map(QueueIndex));
                let queues: Vec<_> = (0..8).map(|i| DisbursementQueue::new(QueueIndex(i))).collect();

                ids.par_iter().for_each(|id| {
                    if guard.try_claim(id) {
                        let queue = router.route().unwrap();
                        let (request, _rx) = Request::new(id.clone());
                        queues[queue.0].push(request);
                    }
                });

                black_box(&queues);
            })
        });
    }
    group.finish();
}

// =============================================================================
// End-to-End Benchmarks
// =============================================================================

fn bench_submit(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let config = FaucetConfig::from_toml_str(
        r#"
        [dispatch]
        poll_interval_ms = 1

        [[assets]]
        asset_id = "ETH"
        amount = "0.0001"

        [[identities]]
        address = "0x6c10d9c1744f149d4b17660e14faa247964749c7"

        [[identities]]
        address = "0x2b5ad5c4795c026514f8317c7a215e218dccd6cf"
        "#,
    )
    .unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    for identity in &config.identities {
        ledger.set_balance(identity, &AssetId::new("ETH"), Decimal::MAX);
    }
    let dispatcher = runtime.block_on(async {
        let dispatcher = Dispatcher::new(&config, ledger).unwrap();
        dispatcher.start();
        dispatcher
    });
    let next = AtomicU32::new(0);

    c.bench_function("submit", |b| {
        b.to_async(&runtime).iter(|| {
            let id = recipient(next.fetch_add(1, Ordering::Relaxed));
            let dispatcher = &dispatcher;
            async move { black_box(dispatcher.submit(id).await.unwrap()) }
        })
    });

    runtime.block_on(dispatcher.shutdown());
}

criterion_group!(
    benches,
    bench_guard_claims,
    bench_route,
    bench_parallel_duplicate_claims,
    bench_parallel_intake,
    bench_submit,
);
criterion_main!(benches);
