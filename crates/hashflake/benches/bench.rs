use core::{hint::black_box, time::Duration};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::future::try_join_all;
use hashflake::{
    BitLayout, Bootstrap, Coordinator, IdCoordinator, LockPolicy, MemoryStore, Mode, Result,
    Scripts, TimeSource,
};
use std::{sync::Arc, time::Instant};
use tokio::runtime::Builder;

struct FixedMockTime {
    millis: i64,
}

impl TimeSource for FixedMockTime {
    fn current_millis(&self) -> i64 {
        self.millis
    }
}

// Number of IDs generated per benchmark iteration (split across tasks for
// the contended benches).
const TOTAL_IDS: usize = 4096;

fn contended_policy() -> LockPolicy {
    LockPolicy {
        lease: Duration::from_millis(500),
        initial_backoff: Duration::from_micros(50),
        max_backoff: Duration::from_micros(400),
        max_attempts: u32::MAX,
    }
}

fn locked() -> Mode {
    Mode::Locked {
        lock_key: "bench:lock".to_owned(),
    }
}

fn lock_free() -> Mode {
    Mode::LockFree {
        scripts: Scripts::bundled(),
    }
}

async fn fresh_coordinator(mode: Mode) -> Coordinator<MemoryStore> {
    Bootstrap::new(
        Arc::new(MemoryStore::new()),
        "bench",
        BitLayout::new(41, 10, 12).with_start_millis(0),
        1,
    )
    .clock(FixedMockTime { millis: 1 })
    .lock_policy(contended_policy())
    .coordinator(mode)
    .await
    .unwrap()
}

/// Benchmarks one coordinator called back to back from a single task.
fn bench_sequential(c: &mut Criterion, group_name: &str, mode: fn() -> Mode) {
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{}", TOTAL_IDS), |b| {
        let rt = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(1)
            .build()
            .unwrap();

        b.to_async(&rt).iter_custom(|iters| async move {
            let mut elapsed = Duration::ZERO;

            for _ in 0..iters {
                let coordinator = fresh_coordinator(mode()).await;
                let start = Instant::now();
                for _ in 0..TOTAL_IDS {
                    black_box(coordinator.generate_id().await.unwrap());
                }
                elapsed += start.elapsed();
            }

            elapsed
        });
    });

    group.finish();
}

/// Benchmarks many tasks sharing one coordination key, each through its own
/// coordinator handle.
fn bench_contended(c: &mut Criterion, group_name: &str, mode: fn() -> Mode) {
    let mut group = c.benchmark_group(group_name);
    group.sample_size(10);
    group.sampling_mode(criterion::SamplingMode::Flat);

    for num_tasks in [1, 2, 4, 8, 16] {
        let ids_per_task = TOTAL_IDS / num_tasks;

        group.throughput(Throughput::Elements(TOTAL_IDS as u64));
        group.bench_function(format!("elems/{}/tasks/{}", TOTAL_IDS, num_tasks), |b| {
            let rt = Builder::new_multi_thread().enable_all().build().unwrap();

            b.to_async(&rt).iter_custom(move |iters| async move {
                let mut elapsed = Duration::ZERO;

                for _ in 0..iters {
                    let coordinator = fresh_coordinator(mode()).await;
                    let start = Instant::now();
                    let mut tasks: Vec<tokio::task::JoinHandle<Result<()>>> =
                        Vec::with_capacity(num_tasks);

                    for _ in 0..num_tasks {
                        let coordinator = coordinator.clone();
                        tasks.push(tokio::spawn(async move {
                            for _ in 0..ids_per_task {
                                black_box(coordinator.generate_id().await?);
                            }
                            Ok(())
                        }));
                    }

                    for result in try_join_all(tasks).await.unwrap() {
                        result.unwrap();
                    }
                    elapsed += start.elapsed();
                }

                elapsed
            });
        });
    }

    group.finish();
}

fn benchmark_sequential_locked(c: &mut Criterion) {
    bench_sequential(c, "memory/sequential/locked", locked);
}

fn benchmark_sequential_lock_free(c: &mut Criterion) {
    bench_sequential(c, "memory/sequential/lock_free", lock_free);
}

fn benchmark_contended_locked(c: &mut Criterion) {
    bench_contended(c, "memory/contended/locked", locked);
}

fn benchmark_contended_lock_free(c: &mut Criterion) {
    bench_contended(c, "memory/contended/lock_free", lock_free);
}

criterion_group!(
    benches,
    benchmark_sequential_locked,
    benchmark_sequential_lock_free,
    // Locked backs off on contention, lock-free never waits
    benchmark_contended_locked,
    benchmark_contended_lock_free,
);
criterion_main!(benches);
