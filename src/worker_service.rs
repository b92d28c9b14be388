// contract-kernel: fixed-size thread pool that drains one or more
// `ContractPool`s using a pluggable `SchedulerStrategy`. Workers sleep on a
// condvar when every registered pool reports no scheduled work, and are
// woken by `ConcurrencyProvider::notify_work_available` the moment a pool
// schedules something.

use crate::contract_pool::{ConcurrencyProvider, ContractPool};
use crate::scheduler::{SchedulerStrategy, SchedulingContext};
use parking_lot::{Condvar, Mutex, RwLock};
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

thread_local! {
    static CURRENT_THREAD_ID: Cell<Option<usize>> = Cell::new(None);
}

/// The worker-local index (`0..thread_count`) of the calling thread, if it
/// is currently running inside a [`WorkerService`] worker loop.
pub fn current_thread_id() -> Option<usize> {
    CURRENT_THREAD_ID.with(|c| c.get())
}

const IDLE_SLEEP: Duration = Duration::from_millis(50);
/// Soft-failure backoff: a worker that repeatedly picks a pool with nothing
/// actually selectable (a race with another worker) yields briefly instead
/// of busy-spinning.
const SOFT_FAILURE_THRESHOLD: u32 = 8;

struct Inner {
    pools: RwLock<Vec<Arc<ContractPool>>>,
    strategy: Box<dyn SchedulerStrategy>,
    pools_generation: AtomicU64,
    stopping: AtomicBool,
    wake_lock: Mutex<()>,
    wake_cond: Condvar,
    active_workers: AtomicUsize,
}

/// Owns a fixed set of OS threads that pull work from registered pools.
///
/// Not `Clone`; share via `Arc<WorkerService>`. Must be started with
/// [`WorkerService::start`] before any registered pool can make progress.
pub struct WorkerService {
    inner: Arc<Inner>,
    thread_count: usize,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerService {
    pub fn new(thread_count: usize, strategy: Box<dyn SchedulerStrategy>) -> Arc<Self> {
        let thread_count = thread_count.max(1);
        Arc::new(Self {
            inner: Arc::new(Inner {
                pools: RwLock::new(Vec::new()),
                strategy,
                pools_generation: AtomicU64::new(0),
                stopping: AtomicBool::new(false),
                wake_lock: Mutex::new(()),
                wake_cond: Condvar::new(),
                active_workers: AtomicUsize::new(0),
            }),
            thread_count,
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Convenience for `new(num_cpus::get(), strategy)` — a reasonable
    /// default when the caller has no more specific sizing requirement.
    pub fn new_with_available_parallelism(strategy: Box<dyn SchedulerStrategy>) -> Arc<Self> {
        Self::new(num_cpus::get(), strategy)
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Adds a pool to the rotation and wires this service as its
    /// concurrency provider. The pool is not required to already have work;
    /// registering an empty pool is fine.
    pub fn register_pool(self: &Arc<Self>, pool: Arc<ContractPool>) {
        let provider: Weak<dyn ConcurrencyProvider> = Arc::downgrade(self) as Weak<dyn ConcurrencyProvider>;
        pool.set_concurrency_provider(Some(provider));
        self.inner.pools.write().push(pool);
        self.inner.pools_generation.fetch_add(1, Ordering::Release);
        self.inner.strategy.notify_groups_changed();
        self.wake_all();
    }

    /// Removes a pool from the rotation. Does not stop or drain the pool
    /// itself — callers should `pool.stop()` and `pool.wait()` first if a
    /// clean drain matters.
    pub fn notify_group_destroyed(&self, pool: &Arc<ContractPool>) {
        let mut pools = self.inner.pools.write();
        pools.retain(|p| !Arc::ptr_eq(p, pool));
        drop(pools);
        self.inner.pools_generation.fetch_add(1, Ordering::Release);
        self.inner.strategy.notify_groups_changed();
    }

    /// Spawns `thread_count` OS threads and begins draining registered
    /// pools. Idempotent only in the sense that calling it twice spawns a
    /// second set of workers racing the first; callers should call once.
    pub fn start(self: &Arc<Self>) {
        let mut threads = self.threads.lock();
        for thread_id in 0..self.thread_count {
            let service = self.clone();
            let handle = std::thread::Builder::new()
                .name(format!("contract-kernel-worker-{thread_id}"))
                .spawn(move || service.run_worker(thread_id))
                .expect("failed to spawn worker thread");
            threads.push(handle);
        }
    }

    fn run_worker(self: Arc<Self>, thread_id: usize) {
        CURRENT_THREAD_ID.with(|c| c.set(Some(thread_id)));
        self.inner.active_workers.fetch_add(1, Ordering::AcqRel);
        let mut ctx = SchedulingContext::new(thread_id);
        let mut soft_failures: u32 = 0;

        while !self.inner.stopping.load(Ordering::Acquire) {
            ctx.pools_generation = self.inner.pools_generation.load(Ordering::Acquire);
            let pools_snapshot = self.inner.pools.read().clone();

            let (picked, should_sleep) = self.inner.strategy.select_next_group(&pools_snapshot, &mut ctx);
            let Some(pool) = picked else {
                if should_sleep {
                    self.sleep_until_woken();
                } else {
                    std::thread::yield_now();
                }
                continue;
            };

            let mut bias = thread_id as u64;
            let handle = pool.select_for_execution(&mut bias);
            if !handle.is_valid() {
                soft_failures += 1;
                ctx.consecutive_failures = soft_failures;
                if soft_failures >= SOFT_FAILURE_THRESHOLD {
                    debug!(thread_id, "repeated empty selections, backing off");
                    std::thread::yield_now();
                    soft_failures = 0;
                }
                continue;
            }

            soft_failures = 0;
            ctx.consecutive_failures = 0;
            let result = catch_unwind(AssertUnwindSafe(|| pool.execute(handle)));
            if let Err(payload) = result {
                let message = panic_message(&payload);
                warn!(thread_id, error = %message, "contract work panicked; contained by worker loop");
            }
            pool.complete(handle);
            self.inner.strategy.notify_work_executed(&ctx);
        }

        self.inner.active_workers.fetch_sub(1, Ordering::AcqRel);
    }

    fn sleep_until_woken(&self) {
        let mut guard = self.inner.wake_lock.lock();
        self.inner.wake_cond.wait_for(&mut guard, IDLE_SLEEP);
    }

    fn wake_all(&self) {
        let _guard = self.inner.wake_lock.lock();
        self.inner.wake_cond.notify_all();
    }

    /// Signals all workers to exit their loop after finishing their current
    /// iteration. Does not block; pair with [`Self::wait_for_stop`].
    pub fn request_stop(&self) {
        self.inner.stopping.store(true, Ordering::Release);
        self.wake_all();
    }

    /// Joins every worker thread. Safe to call once `request_stop` has been
    /// issued; blocks indefinitely otherwise.
    pub fn wait_for_stop(&self) {
        let mut threads = self.threads.lock();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }

    /// Convenience for `request_stop` followed by `wait_for_stop`.
    pub fn stop(&self) {
        self.request_stop();
        self.wait_for_stop();
    }

    pub fn active_worker_count(&self) -> usize {
        self.inner.active_workers.load(Ordering::Acquire)
    }
}

impl ConcurrencyProvider for WorkerService {
    fn notify_work_available(&self) {
        self.wake_all();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract_pool::ExecType;
    use crate::scheduler::DirectStrategy;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::time::Duration as StdDuration;

    #[test]
    fn worker_service_drains_scheduled_work() {
        let service = WorkerService::new(2, Box::new(DirectStrategy));
        let pool = Arc::new(ContractPool::new(8).unwrap());
        service.register_pool(pool.clone());
        service.start();

        let executed = Arc::new(StdAtomicUsize::new(0));
        for _ in 0..20 {
            let executed = executed.clone();
            let h = pool.create(
                Box::new(move || {
                    executed.fetch_add(1, Ordering::SeqCst);
                }),
                ExecType::AnyThread,
            );
            pool.schedule(h);
        }

        let deadline = std::time::Instant::now() + StdDuration::from_secs(5);
        while executed.load(Ordering::SeqCst) < 20 && std::time::Instant::now() < deadline {
            std::thread::sleep(StdDuration::from_millis(10));
        }
        assert_eq!(executed.load(Ordering::SeqCst), 20);

        service.stop();
    }

    #[test]
    fn contained_panic_does_not_kill_the_worker() {
        let service = WorkerService::new(1, Box::new(DirectStrategy));
        let pool = Arc::new(ContractPool::new(4).unwrap());
        service.register_pool(pool.clone());
        service.start();

        let h = pool.create(Box::new(|| panic!("boom")), ExecType::AnyThread);
        pool.schedule(h);

        let ran_after = Arc::new(StdAtomicUsize::new(0));
        let ran_after2 = ran_after.clone();
        let h2 = pool.create(
            Box::new(move || {
                ran_after2.fetch_add(1, Ordering::SeqCst);
            }),
            ExecType::AnyThread,
        );
        pool.schedule(h2);

        let deadline = std::time::Instant::now() + StdDuration::from_secs(5);
        while ran_after.load(Ordering::SeqCst) < 1 && std::time::Instant::now() < deadline {
            std::thread::sleep(StdDuration::from_millis(10));
        }
        assert_eq!(ran_after.load(Ordering::SeqCst), 1);

        service.stop();
    }
}
