use contract_kernel::contract_pool::{ContractPool, ExecType};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::thread;

fn bench_create_schedule_select_complete(c: &mut Criterion) {
    let mut group = c.benchmark_group("contract_pool_lifecycle");
    for capacity in [64usize, 1024, 8192] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            let pool = ContractPool::new(capacity).unwrap();
            b.iter(|| {
                let handles: Vec<_> = (0..capacity)
                    .map(|_| pool.create(Box::new(|| {}), ExecType::AnyThread))
                    .collect();
                for &h in &handles {
                    pool.schedule(h);
                }
                let mut bias = 0u64;
                for _ in 0..capacity {
                    let selected = black_box(pool.select_for_execution(&mut bias));
                    pool.execute(selected);
                    pool.complete(selected);
                }
            });
        });
    }
    group.finish();
}

fn bench_concurrent_producers_consumers(c: &mut Criterion) {
    let mut group = c.benchmark_group("contract_pool_concurrent");
    for worker_count in [2usize, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(worker_count), &worker_count, |b, &worker_count| {
            b.iter(|| {
                let pool = Arc::new(ContractPool::new(4096).unwrap());
                for _ in 0..4096 {
                    let h = pool.create(Box::new(|| {}), ExecType::AnyThread);
                    pool.schedule(h);
                }
                let handles: Vec<_> = (0..worker_count)
                    .map(|t| {
                        let pool = pool.clone();
                        thread::spawn(move || {
                            let mut bias = t as u64;
                            loop {
                                let h = pool.select_for_execution(&mut bias);
                                if !h.is_valid() {
                                    break;
                                }
                                pool.execute(h);
                                pool.complete(h);
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_create_schedule_select_complete, bench_concurrent_producers_consumers);
criterion_main!(benches);
