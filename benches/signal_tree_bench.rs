use contract_kernel::signal_tree::SignalTree;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::thread;

fn bench_single_threaded_set_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("signal_tree_single_thread");
    for leaf_capacity in [2usize, 16, 128] {
        group.bench_with_input(
            BenchmarkId::from_parameter(leaf_capacity),
            &leaf_capacity,
            |b, &leaf_capacity| {
                let tree = SignalTree::new(leaf_capacity);
                b.iter(|| {
                    let n = tree.capacity() as u32;
                    for i in 0..n {
                        tree.set(black_box(i));
                    }
                    let mut bias = 0u64;
                    while tree.select(&mut bias).index.is_some() {}
                });
            },
        );
    }
    group.finish();
}

fn bench_contended_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("signal_tree_contended");
    for thread_count in [2usize, 4, 8] {
        group.bench_with_input(
            BenchmarkId::from_parameter(thread_count),
            &thread_count,
            |b, &thread_count| {
                b.iter(|| {
                    let tree = Arc::new(SignalTree::new(16));
                    for i in 0..tree.capacity() as u32 {
                        tree.set(i);
                    }
                    let handles: Vec<_> = (0..thread_count)
                        .map(|t| {
                            let tree = tree.clone();
                            thread::spawn(move || {
                                let mut bias = t as u64;
                                while tree.select(&mut bias).index.is_some() {}
                            })
                        })
                        .collect();
                    for h in handles {
                        h.join().unwrap();
                    }
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_single_threaded_set_select, bench_contended_select);
criterion_main!(benches);
