use contract_kernel::contract_pool::{ContractPool, ExecType};
use contract_kernel::scheduler::{AdaptiveRankingStrategy, DirectStrategy, RoundRobinStrategy};
use contract_kernel::work_graph::{WorkGraphBuilder, YieldOutcome};
use contract_kernel::worker_service::WorkerService;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !predicate() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    true
}

#[test]
fn worker_service_drains_a_pool_registered_after_start() {
    let service = WorkerService::new(4, Box::new(RoundRobinStrategy::new()));
    service.start();

    let pool = Arc::new(ContractPool::new(64).unwrap());
    service.register_pool(pool.clone());

    let executed = Arc::new(AtomicUsize::new(0));
    for _ in 0..500 {
        let executed = executed.clone();
        let h = pool.create(Box::new(move || { executed.fetch_add(1, Ordering::SeqCst); }), ExecType::AnyThread);
        pool.schedule(h);
    }

    assert!(wait_until(|| executed.load(Ordering::SeqCst) == 500, Duration::from_secs(10)));
    service.stop();
}

#[test]
fn two_pools_share_a_worker_pool_without_starving_each_other() {
    let service = WorkerService::new(4, Box::new(AdaptiveRankingStrategy::new(4)));
    service.start();

    let pool_a = Arc::new(ContractPool::new(32).unwrap());
    let pool_b = Arc::new(ContractPool::new(32).unwrap());
    service.register_pool(pool_a.clone());
    service.register_pool(pool_b.clone());

    let count_a = Arc::new(AtomicUsize::new(0));
    let count_b = Arc::new(AtomicUsize::new(0));
    for _ in 0..200 {
        let count_a = count_a.clone();
        let h = pool_a.create(Box::new(move || { count_a.fetch_add(1, Ordering::SeqCst); }), ExecType::AnyThread);
        pool_a.schedule(h);
        let count_b = count_b.clone();
        let h = pool_b.create(Box::new(move || { count_b.fetch_add(1, Ordering::SeqCst); }), ExecType::AnyThread);
        pool_b.schedule(h);
    }

    assert!(wait_until(
        || count_a.load(Ordering::SeqCst) == 200 && count_b.load(Ordering::SeqCst) == 200,
        Duration::from_secs(10),
    ));
    service.stop();
}

#[test]
fn work_graph_end_to_end_linear_chain_on_real_worker_threads() {
    let pool = Arc::new(ContractPool::new(16).unwrap());
    let service = WorkerService::new(3, Box::new(DirectStrategy));
    service.register_pool(pool.clone());
    service.start();

    let graph = WorkGraphBuilder::new().build(pool);
    let order = Arc::new(Mutex::new(Vec::new()));

    let o1 = order.clone();
    let a = graph.add_node(Some("A".to_string()), Box::new(move || o1.lock().unwrap().push('A')));
    let o2 = order.clone();
    let b = graph.add_node(Some("B".to_string()), Box::new(move || o2.lock().unwrap().push('B')));
    let o3 = order.clone();
    let c = graph.add_node(Some("C".to_string()), Box::new(move || o3.lock().unwrap().push('C')));

    graph.add_dependency(a, b).unwrap();
    graph.add_dependency(b, c).unwrap();

    graph.execute().unwrap();
    let summary = graph.wait();

    assert_eq!(summary.completed, 3);
    assert!(summary.all_completed);
    assert_eq!(*order.lock().unwrap(), vec!['A', 'B', 'C']);

    service.stop();
}

#[test]
fn work_graph_capacity_backpressure_defers_and_drains_as_slots_free() {
    let pool = Arc::new(ContractPool::new(2).unwrap());
    let service = WorkerService::new(2, Box::new(DirectStrategy));
    service.register_pool(pool.clone());
    service.start();

    let graph = WorkGraphBuilder::new().max_deferred_nodes(8).build(pool);
    let executed = Arc::new(AtomicUsize::new(0));
    for i in 0..5 {
        let executed = executed.clone();
        graph.add_node(Some(format!("root-{i}")), Box::new(move || {
            std::thread::sleep(Duration::from_millis(20));
            executed.fetch_add(1, Ordering::SeqCst);
        }));
    }

    graph.execute().unwrap();
    let summary = graph.wait();

    assert_eq!(summary.completed, 5);
    assert_eq!(executed.load(Ordering::SeqCst), 5);

    service.stop();
}

#[test]
fn work_graph_deferred_queue_overflow_drops_excess_node_without_double_counting() {
    let pool = Arc::new(ContractPool::new(2).unwrap());
    let service = WorkerService::new(2, Box::new(DirectStrategy));
    service.register_pool(pool.clone());
    service.start();

    // capacity=2 admits the first two roots immediately; the 2-deep
    // deferred queue holds the next two; the fifth overflows it and is
    // dropped rather than queued. The sleep keeps the first two slots
    // occupied long enough for all five submissions to be attempted
    // before either one frees up.
    let graph = WorkGraphBuilder::new().max_deferred_nodes(2).build(pool);
    let executed = Arc::new(AtomicUsize::new(0));
    for i in 0..5 {
        let executed = executed.clone();
        graph.add_node(Some(format!("root-{i}")), Box::new(move || {
            std::thread::sleep(Duration::from_millis(50));
            executed.fetch_add(1, Ordering::SeqCst);
        }));
    }

    graph.execute().unwrap();
    let summary = graph.wait();

    assert_eq!(summary.dropped, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.completed, 4);
    assert_eq!(executed.load(Ordering::SeqCst), 4);

    let snapshot = graph.stats_snapshot();
    assert_eq!(
        snapshot.completed + snapshot.failed + snapshot.cancelled + snapshot.dropped + snapshot.in_progress(),
        5
    );

    service.stop();
}

#[test]
fn work_graph_yield_exhaustion_fails_after_exactly_max_reschedules() {
    let pool = Arc::new(ContractPool::new(4).unwrap());
    let service = WorkerService::new(2, Box::new(DirectStrategy));
    service.register_pool(pool.clone());
    service.start();

    let graph = WorkGraphBuilder::new().build(pool);
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts2 = attempts.clone();
    graph.add_yieldable_node(
        Some("Y".to_string()),
        Box::new(move || {
            attempts2.fetch_add(1, Ordering::SeqCst);
            YieldOutcome::Yield
        }),
        Some(3),
    );

    graph.execute().unwrap();
    let summary = graph.wait();

    assert_eq!(summary.failed, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    service.stop();
}
