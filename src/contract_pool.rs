// contract-kernel: fixed-capacity factory of callable work units with
// deterministic lifecycle, generation-validated handles, and lock-free
// scheduling via two SignalTrees (AnyThread, MainThread).

use crate::error::PoolConfigError;
use crate::signal_tree::SignalTree;
use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// A unit of work stored in a pool slot. Pool-level work is always a plain
/// `FnOnce`; the notion of "yieldable" work in the specification belongs to
/// [`crate::work_graph::WorkGraph`], which resubmits a fresh contract each
/// time a node yields rather than asking the pool to retain mutable state
/// across executions.
pub type ContractWork = Box<dyn FnOnce() + Send + 'static>;

/// Which signal tree (and counters) a contract is scheduled through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecType {
    AnyThread = 0,
    MainThread = 1,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContractState {
    Free = 0,
    Allocated = 1,
    Scheduled = 2,
    Executing = 3,
}

impl ContractState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ContractState::Free,
            1 => ContractState::Allocated,
            2 => ContractState::Scheduled,
            _ => ContractState::Executing,
        }
    }
}

/// Generation-validated handle into a [`ContractPool`].
///
/// Packed as `(generation: u32) << 32 | index: u32`. A slot's generation
/// starts at 1 and is bumped every time it returns to the free list, so the
/// all-zero value can never be produced by a successful `create` and is
/// reserved as the "invalid" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContractHandle {
    packed: u64,
}

impl ContractHandle {
    pub const INVALID: ContractHandle = ContractHandle { packed: 0 };

    fn new(generation: u32, index: u32) -> Self {
        Self { packed: (u64::from(generation) << 32) | u64::from(index) }
    }

    pub fn is_valid(&self) -> bool {
        self.packed != 0
    }

    pub fn generation(&self) -> u32 {
        (self.packed >> 32) as u32
    }

    pub fn index(&self) -> u32 {
        (self.packed & 0xFFFF_FFFF) as u32
    }

    pub(crate) fn to_bits(self) -> u64 {
        self.packed
    }

    pub(crate) fn from_bits(bits: u64) -> Self {
        Self { packed: bits }
    }
}

impl Default for ContractHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled,
    AlreadyScheduled,
    Executing,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnscheduleOutcome {
    Unscheduled,
    NotScheduled,
    Executing,
    Invalid,
}

/// Weak back-reference the pool uses to wake a worker service. The pool
/// never owns the provider; its lifetime must outlive every pool it serves.
pub trait ConcurrencyProvider: Send + Sync {
    fn notify_work_available(&self);
}

struct ContractSlot {
    generation: AtomicU32,
    state: AtomicU8,
    exec_type: AtomicU8,
    work: Mutex<Option<ContractWork>>,
}

impl ContractSlot {
    fn new() -> Self {
        Self {
            generation: AtomicU32::new(1),
            state: AtomicU8::new(ContractState::Free as u8),
            exec_type: AtomicU8::new(ExecType::AnyThread as u8),
            work: Mutex::new(None),
        }
    }
}

/// RAII guard for the pool's `selecting`/`main_selecting` counters: wakes
/// quiescence waiters if this was the last concurrent selection.
struct SelectGuard<'a> {
    pool: &'a ContractPool,
    main_thread: bool,
}

impl<'a> Drop for SelectGuard<'a> {
    fn drop(&mut self) {
        let counter = if self.main_thread { &self.pool.main_selecting } else { &self.pool.selecting };
        if counter.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.pool.wake_waiters();
        }
    }
}

type CapacityCallback = Box<dyn Fn() + Send + Sync>;

/// Fixed-capacity pool of work contracts with two ready-sets: one for
/// anywhere-runnable work, one for work pinned to the caller's main thread.
pub struct ContractPool {
    slots: Box<[ContractSlot]>,
    capacity: usize,
    free_list: ArrayQueue<u32>,

    general_tree: SignalTree,
    main_tree: SignalTree,

    active_count: AtomicUsize,
    scheduled_count: AtomicUsize,
    executing_count: AtomicUsize,
    main_scheduled_count: AtomicUsize,
    main_executing_count: AtomicUsize,
    selecting: AtomicUsize,
    main_selecting: AtomicUsize,

    stopping: AtomicBool,
    wait_lock: Mutex<()>,
    wait_cond: Condvar,

    provider: parking_lot::RwLock<Option<Weak<dyn ConcurrencyProvider>>>,
    capacity_callbacks: Mutex<Vec<(u64, CapacityCallback)>>,
    next_callback_id: AtomicU64,
}

/// Opaque token returned by [`ContractPool::on_capacity_available`], used to
/// unregister the callback later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityCallbackToken(u64);

impl ContractPool {
    pub fn new(capacity: usize) -> Result<Self, PoolConfigError> {
        if capacity == 0 {
            return Err(PoolConfigError::ZeroCapacity);
        }
        let slots = (0..capacity).map(|_| ContractSlot::new()).collect::<Vec<_>>().into_boxed_slice();
        let free_list = ArrayQueue::new(capacity);
        for i in 0..capacity {
            // index i is always accepted: queue capacity == slot count.
            let _ = free_list.push(i as u32);
        }
        let leaf_capacity = ((capacity + 63) / 64).next_power_of_two().max(2);

        Ok(Self {
            slots,
            capacity,
            free_list,
            general_tree: SignalTree::new(leaf_capacity),
            main_tree: SignalTree::new(leaf_capacity),
            active_count: AtomicUsize::new(0),
            scheduled_count: AtomicUsize::new(0),
            executing_count: AtomicUsize::new(0),
            main_scheduled_count: AtomicUsize::new(0),
            main_executing_count: AtomicUsize::new(0),
            selecting: AtomicUsize::new(0),
            main_selecting: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            wait_lock: Mutex::new(()),
            wait_cond: Condvar::new(),
            provider: parking_lot::RwLock::new(None),
            capacity_callbacks: Mutex::new(Vec::new()),
            next_callback_id: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled_count.load(Ordering::Relaxed)
    }

    pub fn executing_count(&self) -> usize {
        self.executing_count.load(Ordering::Relaxed)
    }

    pub fn main_scheduled_count(&self) -> usize {
        self.main_scheduled_count.load(Ordering::Relaxed)
    }

    pub fn main_executing_count(&self) -> usize {
        self.main_executing_count.load(Ordering::Relaxed)
    }

    pub fn set_concurrency_provider(&self, provider: Option<Weak<dyn ConcurrencyProvider>>) {
        *self.provider.write() = provider;
    }

    fn notify_provider(&self) {
        if let Some(weak) = self.provider.read().as_ref() {
            if let Some(provider) = weak.upgrade() {
                provider.notify_work_available();
            }
        }
    }

    fn wake_waiters(&self) {
        let _guard = self.wait_lock.lock();
        self.wait_cond.notify_all();
    }

    fn slot_for(&self, handle: ContractHandle) -> Option<&ContractSlot> {
        if !handle.is_valid() {
            return None;
        }
        let idx = handle.index() as usize;
        let slot = self.slots.get(idx)?;
        if slot.generation.load(Ordering::Acquire) != handle.generation() {
            return None;
        }
        Some(slot)
    }

    /// Allocates a contract. Returns an invalid handle if the pool is full.
    pub fn create(&self, work: ContractWork, exec_type: ExecType) -> ContractHandle {
        let Some(index) = self.free_list.pop() else {
            return ContractHandle::INVALID;
        };
        let slot = &self.slots[index as usize];
        let generation = slot.generation.load(Ordering::Acquire);
        *slot.work.lock() = Some(work);
        slot.exec_type.store(exec_type as u8, Ordering::Relaxed);
        slot.state.store(ContractState::Allocated as u8, Ordering::Release);
        self.active_count.fetch_add(1, Ordering::AcqRel);
        ContractHandle::new(generation, index)
    }

    fn tree_for(&self, exec_type: ExecType) -> &SignalTree {
        match exec_type {
            ExecType::AnyThread => &self.general_tree,
            ExecType::MainThread => &self.main_tree,
        }
    }

    /// Marks a contract ready for selection.
    pub fn schedule(&self, handle: ContractHandle) -> ScheduleOutcome {
        let Some(slot) = self.slot_for(handle) else {
            return ScheduleOutcome::Invalid;
        };
        match slot.state.compare_exchange(
            ContractState::Allocated as u8,
            ContractState::Scheduled as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                let exec_type = exec_type_of(slot);
                self.tree_for(exec_type).set(handle.index());
                match exec_type {
                    ExecType::AnyThread => self.scheduled_count.fetch_add(1, Ordering::AcqRel),
                    ExecType::MainThread => self.main_scheduled_count.fetch_add(1, Ordering::AcqRel),
                };
                self.notify_provider();
                ScheduleOutcome::Scheduled
            }
            Err(observed) => match ContractState::from_u8(observed) {
                ContractState::Scheduled => ScheduleOutcome::AlreadyScheduled,
                ContractState::Executing => ScheduleOutcome::Executing,
                _ => ScheduleOutcome::Invalid,
            },
        }
    }

    /// Reverts a scheduled-but-not-yet-selected contract back to Allocated.
    pub fn unschedule(&self, handle: ContractHandle) -> UnscheduleOutcome {
        let Some(slot) = self.slot_for(handle) else {
            return UnscheduleOutcome::Invalid;
        };
        match slot.state.compare_exchange(
            ContractState::Scheduled as u8,
            ContractState::Allocated as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                let exec_type = exec_type_of(slot);
                self.tree_for(exec_type).clear(handle.index());
                let remaining = match exec_type {
                    ExecType::AnyThread => self.scheduled_count.fetch_sub(1, Ordering::AcqRel) - 1,
                    ExecType::MainThread => self.main_scheduled_count.fetch_sub(1, Ordering::AcqRel) - 1,
                };
                if remaining == 0 {
                    self.wake_waiters();
                }
                UnscheduleOutcome::Unscheduled
            }
            Err(observed) => match ContractState::from_u8(observed) {
                ContractState::Executing => UnscheduleOutcome::Executing,
                ContractState::Allocated => UnscheduleOutcome::NotScheduled,
                _ => UnscheduleOutcome::Invalid,
            },
        }
    }

    /// Cancels a contract that has not yet started executing. Idempotent;
    /// a contract already `Executing` is left alone (natural completion
    /// handles it).
    pub fn release(&self, handle: ContractHandle) {
        let Some(slot) = self.slot_for(handle) else {
            return;
        };
        let observed = slot.state.load(Ordering::Acquire);
        match ContractState::from_u8(observed) {
            ContractState::Allocated => {
                if slot
                    .state
                    .compare_exchange(
                        ContractState::Allocated as u8,
                        ContractState::Free as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.free_slot(handle.index(), slot);
                }
            }
            ContractState::Scheduled => {
                if slot
                    .state
                    .compare_exchange(
                        ContractState::Scheduled as u8,
                        ContractState::Free as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    let exec_type = exec_type_of(slot);
                    self.tree_for(exec_type).clear(handle.index());
                    match exec_type {
                        ExecType::AnyThread => self.scheduled_count.fetch_sub(1, Ordering::AcqRel),
                        ExecType::MainThread => self.main_scheduled_count.fetch_sub(1, Ordering::AcqRel),
                    };
                    self.free_slot(handle.index(), slot);
                }
            }
            _ => {} // Free or Executing: nothing to do.
        }
    }

    fn select_for(&self, exec_type: ExecType, bias: &mut u64) -> ContractHandle {
        let counter = match exec_type {
            ExecType::AnyThread => &self.selecting,
            ExecType::MainThread => &self.main_selecting,
        };
        counter.fetch_add(1, Ordering::AcqRel);
        let _guard = SelectGuard { pool: self, main_thread: matches!(exec_type, ExecType::MainThread) };

        if self.stopping.load(Ordering::SeqCst) {
            return ContractHandle::INVALID;
        }

        let selection = self.tree_for(exec_type).select(bias);
        let Some(index) = selection.index else {
            return ContractHandle::INVALID;
        };

        let slot = &self.slots[index as usize];
        match slot.state.compare_exchange(
            ContractState::Scheduled as u8,
            ContractState::Executing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                match exec_type {
                    ExecType::AnyThread => {
                        self.scheduled_count.fetch_sub(1, Ordering::AcqRel);
                        self.executing_count.fetch_add(1, Ordering::AcqRel);
                    }
                    ExecType::MainThread => {
                        self.main_scheduled_count.fetch_sub(1, Ordering::AcqRel);
                        self.main_executing_count.fetch_add(1, Ordering::AcqRel);
                    }
                }
                ContractHandle::new(slot.generation.load(Ordering::Acquire), index)
            }
            Err(_) => ContractHandle::INVALID,
        }
    }

    /// Selects one ready AnyThread contract for execution, biasing the
    /// underlying tree traversal with `bias` (updated in place).
    pub fn select_for_execution(&self, bias: &mut u64) -> ContractHandle {
        self.select_for(ExecType::AnyThread, bias)
    }

    /// Selects one ready MainThread contract for execution.
    pub fn select_for_main_thread(&self, bias: &mut u64) -> ContractHandle {
        self.select_for(ExecType::MainThread, bias)
    }

    /// Invokes the contract's work callable. Panics from the callable
    /// propagate to the caller; wrap with `catch_unwind` if containment is
    /// required (as [`crate::worker_service::WorkerService`] does).
    pub fn execute(&self, handle: ContractHandle) {
        let Some(slot) = self.slot_for(handle) else { return };
        let work = slot.work.lock().take();
        if let Some(work) = work {
            work();
        }
    }

    fn complete_for(&self, handle: ContractHandle, exec_type: ExecType) {
        let Some(slot) = self.slot_for(handle) else { return };
        let previous = slot.state.swap(ContractState::Free as u8, Ordering::AcqRel);
        if ContractState::from_u8(previous) == ContractState::Executing {
            match exec_type {
                ExecType::AnyThread => self.executing_count.fetch_sub(1, Ordering::AcqRel),
                ExecType::MainThread => self.main_executing_count.fetch_sub(1, Ordering::AcqRel),
            };
            self.free_slot(handle.index(), slot);
        }
    }

    /// Returns a completed AnyThread contract's slot to the free list.
    pub fn complete(&self, handle: ContractHandle) {
        self.complete_for(handle, ExecType::AnyThread);
    }

    /// Returns a completed MainThread contract's slot to the free list.
    pub fn complete_main(&self, handle: ContractHandle) {
        self.complete_for(handle, ExecType::MainThread);
    }

    fn free_slot(&self, index: u32, slot: &ContractSlot) {
        slot.generation.fetch_add(1, Ordering::AcqRel);
        *slot.work.lock() = None;
        let was_full = self.active_count.fetch_sub(1, Ordering::AcqRel) == self.capacity;
        // `free_list` has exactly `capacity` slots; this push can never fail
        // because every index is pushed exactly once between `create` and
        // the matching `free_slot`.
        let _ = self.free_list.push(index);
        if was_full {
            self.run_capacity_callbacks();
        }
        self.wake_waiters();
    }

    fn run_capacity_callbacks(&self) {
        for (_, callback) in self.capacity_callbacks.lock().iter() {
            callback();
        }
    }

    /// Registers a callback invoked (under a lock; not on the hot path)
    /// whenever a slot returns to Free after the pool had been full.
    pub fn on_capacity_available(&self, callback: CapacityCallback) -> CapacityCallbackToken {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        self.capacity_callbacks.lock().push((id, callback));
        CapacityCallbackToken(id)
    }

    pub fn remove_capacity_callback(&self, token: CapacityCallbackToken) {
        self.capacity_callbacks.lock().retain(|(id, _)| *id != token.0);
    }

    /// Drains up to `n` ready MainThread contracts on the calling thread,
    /// rotating a local bias between executions to spread selection.
    pub fn execute_main_thread_work(&self, n: usize) -> usize {
        let mut bias = 0u64;
        let mut executed = 0;
        for _ in 0..n {
            let handle = self.select_for_main_thread(&mut bias);
            if !handle.is_valid() {
                break;
            }
            let _ = catch_unwind(AssertUnwindSafe(|| self.execute(handle)));
            self.complete_main(handle);
            executed += 1;
            bias = bias.rotate_left(1);
        }
        executed
    }

    /// Stops accepting new selections and wakes anyone in [`Self::wait`].
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.wake_waiters();
    }

    /// Resumes selection. Passive: does not itself wake workers; callers
    /// relying on a concurrency provider should re-notify it if needed.
    pub fn resume(&self) {
        self.stopping.store(false, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn is_quiescent(&self) -> bool {
        if self.stopping.load(Ordering::SeqCst) {
            self.executing_count.load(Ordering::Acquire) == 0
                && self.selecting.load(Ordering::Acquire) == 0
                && self.main_executing_count.load(Ordering::Acquire) == 0
                && self.main_selecting.load(Ordering::Acquire) == 0
        } else {
            self.scheduled_count.load(Ordering::Acquire) == 0
                && self.executing_count.load(Ordering::Acquire) == 0
                && self.main_scheduled_count.load(Ordering::Acquire) == 0
                && self.main_executing_count.load(Ordering::Acquire) == 0
        }
    }

    /// Blocks until the pool reaches the quiescence predicate appropriate
    /// to whether it is currently stopping.
    pub fn wait(&self) {
        let mut guard = self.wait_lock.lock();
        while !self.is_quiescent() {
            self.wait_cond.wait(&mut guard);
        }
    }
}

fn exec_type_of(slot: &ContractSlot) -> ExecType {
    match slot.exec_type.load(Ordering::Relaxed) {
        0 => ExecType::AnyThread,
        _ => ExecType::MainThread,
    }
}

impl Drop for ContractPool {
    fn drop(&mut self) {
        self.stop();
        self.wait();

        for index in 0..self.slots.len() {
            let slot = &self.slots[index as usize];
            let state = ContractState::from_u8(slot.state.load(Ordering::Acquire));
            if state == ContractState::Scheduled {
                let exec_type = exec_type_of(slot);
                self.tree_for(exec_type).clear(index as u32);
                slot.state.store(ContractState::Allocated as u8, Ordering::Release);
            }
        }
        for index in 0..self.slots.len() {
            let slot = &self.slots[index as usize];
            let state = ContractState::from_u8(slot.state.load(Ordering::Acquire));
            debug_assert_ne!(state, ContractState::Executing, "slot still executing at pool drop");
            if state != ContractState::Free {
                slot.state.store(ContractState::Free as u8, Ordering::Release);
                slot.generation.fetch_add(1, Ordering::AcqRel);
                *slot.work.lock() = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::sync::Arc as StdArc;

    #[test]
    fn capacity_plus_one_creates_yields_exactly_one_invalid_handle() {
        let pool = ContractPool::new(4).unwrap();
        let mut handles = Vec::new();
        for _ in 0..4 {
            handles.push(pool.create(Box::new(|| {}), ExecType::AnyThread));
        }
        assert!(handles.iter().all(|h| h.is_valid()));
        let overflow = pool.create(Box::new(|| {}), ExecType::AnyThread);
        assert!(!overflow.is_valid());
    }

    #[test]
    fn schedule_then_unschedule_is_a_noop_on_population() {
        let pool = ContractPool::new(4).unwrap();
        let h = pool.create(Box::new(|| {}), ExecType::AnyThread);
        assert_eq!(pool.schedule(h), ScheduleOutcome::Scheduled);
        assert_eq!(pool.scheduled_count(), 1);
        assert_eq!(pool.unschedule(h), UnscheduleOutcome::Unscheduled);
        assert_eq!(pool.scheduled_count(), 0);
    }

    #[test]
    fn release_is_idempotent() {
        let pool = ContractPool::new(4).unwrap();
        let h = pool.create(Box::new(|| {}), ExecType::AnyThread);
        pool.release(h);
        assert_eq!(pool.active_count(), 0);
        pool.release(h); // stale generation now; must not panic or double-free
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn scenario_s2_pool_lifecycle() {
        let pool = ContractPool::new(4).unwrap();
        let handles: Vec<_> = (0..4).map(|_| pool.create(Box::new(|| {}), ExecType::AnyThread)).collect();
        assert_eq!(pool.schedule(handles[0]), ScheduleOutcome::Scheduled);
        assert_eq!(pool.schedule(handles[1]), ScheduleOutcome::Scheduled);

        let mut bias = 0u64;
        let e0 = pool.select_for_execution(&mut bias);
        let e1 = pool.select_for_execution(&mut bias);
        assert!(e0.is_valid() && e1.is_valid());
        assert_eq!(pool.executing_count(), 2);
        assert_eq!(pool.scheduled_count(), 0);

        pool.complete(e0);
        pool.complete(e1);
        assert_eq!(pool.active_count(), 2);

        let gen2_before = handles[2].generation();
        let gen3_before = handles[3].generation();
        pool.release(handles[2]);
        pool.release(handles[3]);
        assert_eq!(pool.active_count(), 0);

        // Re-creating reuses the freed slots with bumped generations.
        let new_a = pool.create(Box::new(|| {}), ExecType::AnyThread);
        let new_b = pool.create(Box::new(|| {}), ExecType::AnyThread);
        let gens_after: Vec<u32> = [new_a, new_b].iter().map(|h| h.generation()).collect();
        assert!(gens_after.contains(&(gen2_before + 1)) || gens_after.contains(&(gen3_before + 1)));
    }

    #[test]
    fn execute_runs_the_stored_callable_exactly_once() {
        let pool = ContractPool::new(1).unwrap();
        let ran = StdArc::new(StdAtomicUsize::new(0));
        let ran2 = ran.clone();
        let h = pool.create(
            Box::new(move || {
                ran2.fetch_add(1, Ordering::SeqCst);
            }),
            ExecType::AnyThread,
        );
        pool.schedule(h);
        let mut bias = 0u64;
        let selected = pool.select_for_execution(&mut bias);
        pool.execute(selected);
        pool.complete(selected);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_then_resume_with_no_intervening_ops_is_a_noop() {
        let pool = ContractPool::new(2).unwrap();
        assert!(!pool.is_stopping());
        pool.stop();
        assert!(pool.is_stopping());
        pool.resume();
        assert!(!pool.is_stopping());
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn capacity_callback_fires_when_a_full_pool_frees_a_slot() {
        let pool = ContractPool::new(1).unwrap();
        let fired = StdArc::new(StdAtomicUsize::new(0));
        let fired2 = fired.clone();
        pool.on_capacity_available(Box::new(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        }));
        let h = pool.create(Box::new(|| {}), ExecType::AnyThread);
        assert!(pool.create(Box::new(|| {}), ExecType::AnyThread).is_valid() == false);
        pool.release(h);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
