// contract-kernel: pluggable strategy for picking which registered pool a
// worker drains next. Four reference strategies ship alongside the trait;
// each keeps its own per-thread state to avoid synchronizing workers
// against each other on the selection path.

use crate::contract_pool::ContractPool;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-call, per-worker context threaded through `select_next_group`. Kept
/// on the worker's stack rather than in a `thread_local!` so the strategy
/// logic stays ordinary, testable code (see spec note on thread-local
/// scheduler state: "pass a per-worker context by reference through the
/// loop").
pub struct SchedulingContext {
    pub thread_id: usize,
    pub consecutive_failures: u32,
    pub last_executed_group: Option<usize>,
    pub pools_generation: u64,
}

impl SchedulingContext {
    pub fn new(thread_id: usize) -> Self {
        Self { thread_id, consecutive_failures: 0, last_executed_group: None, pools_generation: 0 }
    }
}

/// Pluggable policy for choosing which pool a worker should drain next.
pub trait SchedulerStrategy: Send + Sync {
    /// Picks a pool to drain. The bool indicates whether the worker should
    /// sleep (no pool anywhere had work) rather than spin.
    fn select_next_group(
        &self,
        pools: &[Arc<ContractPool>],
        ctx: &mut SchedulingContext,
    ) -> (Option<Arc<ContractPool>>, bool);

    /// Called by the worker after successfully executing one contract.
    fn notify_work_executed(&self, _ctx: &SchedulingContext) {}

    /// Called by the owning service whenever the pool registry changes.
    fn notify_groups_changed(&self) {}

    fn reset(&self) {}

    fn name(&self) -> &'static str;
}

fn first_with_work(pools: &[Arc<ContractPool>], start: usize) -> Option<usize> {
    let n = pools.len();
    if n == 0 {
        return None;
    }
    (0..n)
        .map(|offset| (start + offset) % n)
        .find(|&i| pools[i].scheduled_count() > 0)
}

/// Linear scan; first pool with scheduled work. Sleeps when nothing found.
pub struct DirectStrategy;

impl SchedulerStrategy for DirectStrategy {
    fn select_next_group(
        &self,
        pools: &[Arc<ContractPool>],
        _ctx: &mut SchedulingContext,
    ) -> (Option<Arc<ContractPool>>, bool) {
        match first_with_work(pools, 0) {
            Some(i) => (Some(pools[i].clone()), false),
            None => (None, true),
        }
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}

/// Identical scan to [`DirectStrategy`] but never signals sleep. Diagnostic
/// only — keeps workers spinning even when the caller would rather back off.
pub struct SpinningDirectStrategy;

impl SchedulerStrategy for SpinningDirectStrategy {
    fn select_next_group(
        &self,
        pools: &[Arc<ContractPool>],
        _ctx: &mut SchedulingContext,
    ) -> (Option<Arc<ContractPool>>, bool) {
        match first_with_work(pools, 0) {
            Some(i) => (Some(pools[i].clone()), false),
            None => (None, false),
        }
    }

    fn name(&self) -> &'static str {
        "spinning-direct"
    }
}

/// Each worker keeps its own rotating start position, advanced past the
/// pool it returned last time. Position lives in `ctx` so it survives
/// across calls within the same worker thread.
pub struct RoundRobinStrategy;

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerStrategy for RoundRobinStrategy {
    fn select_next_group(
        &self,
        pools: &[Arc<ContractPool>],
        ctx: &mut SchedulingContext,
    ) -> (Option<Arc<ContractPool>>, bool) {
        if pools.is_empty() {
            return (None, true);
        }
        let start = ctx.last_executed_group.map(|i| i + 1).unwrap_or(0) % pools.len();
        match first_with_work(pools, start) {
            Some(i) => {
                ctx.last_executed_group = Some(i);
                (Some(pools[i].clone()), false)
            }
            None => (None, true),
        }
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}

/// Reservoir-samples uniformly among pools with scheduled work, so every
/// eligible pool has equal probability of selection regardless of position.
///
/// Each worker gets its own `StdRng`, keyed by `ctx.thread_id` the same way
/// [`AdaptiveRankingStrategy`] keys its ranking cache — a single shared RNG
/// behind one mutex would turn every worker's selection call into a point of
/// contention, defeating the point of a per-worker context.
pub struct RandomStrategy {
    base_seed: u64,
    rngs: Mutex<rustc_hash::FxHashMap<usize, StdRng>>,
}

impl RandomStrategy {
    pub fn new(seed_hint: usize) -> Self {
        let base_seed = seed_hint as u64
            ^ SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0);
        Self { base_seed, rngs: Mutex::new(rustc_hash::FxHashMap::default()) }
    }
}

impl SchedulerStrategy for RandomStrategy {
    fn select_next_group(
        &self,
        pools: &[Arc<ContractPool>],
        ctx: &mut SchedulingContext,
    ) -> (Option<Arc<ContractPool>>, bool) {
        let base_seed = self.base_seed;
        let mut rngs = self.rngs.lock();
        let rng = rngs
            .entry(ctx.thread_id)
            .or_insert_with(|| StdRng::seed_from_u64(base_seed ^ ctx.thread_id as u64));

        let mut chosen: Option<usize> = None;
        let mut eligible = 0u32;
        for (i, pool) in pools.iter().enumerate() {
            if pool.scheduled_count() > 0 {
                eligible += 1;
                if rng.gen_range(0..eligible) == 0 {
                    chosen = Some(i);
                }
            }
        }
        match chosen {
            Some(i) => (Some(pools[i].clone()), false),
            None => (None, true),
        }
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

struct RankedEntry {
    pool_index: usize,
    rank: f64,
}

struct RankingCache {
    ranked_pool_indices: Vec<usize>,
    affinity_position: usize,
    consecutive_executions: u32,
    calls_since_update: u32,
    generation_seen: u64,
}

impl RankingCache {
    fn empty() -> Self {
        Self {
            ranked_pool_indices: Vec::new(),
            affinity_position: 0,
            consecutive_executions: 0,
            calls_since_update: 0,
            generation_seen: u64::MAX,
        }
    }
}

/// Default strategy. Each worker ranks pools by pressure and sticks to a
/// high-pressure pool for a while (its "affinity") before rotating, so
/// threads diverge onto different pools and contend less with each other.
pub struct AdaptiveRankingStrategy {
    total_threads: usize,
    max_consecutive_executions: u32,
    update_interval_calls: u32,
    cache: ThreadLocalCache,
}

/// `RankingCache` per worker thread, keyed by `SchedulingContext::thread_id`
/// rather than a real `thread_local!` so the strategy can be exercised
/// deterministically from tests without spawning OS threads.
struct ThreadLocalCache {
    by_thread: Mutex<rustc_hash::FxHashMap<usize, RankingCache>>,
}

impl ThreadLocalCache {
    fn new() -> Self {
        Self { by_thread: Mutex::new(rustc_hash::FxHashMap::default()) }
    }
}

impl AdaptiveRankingStrategy {
    pub fn new(total_threads: usize) -> Self {
        Self {
            total_threads: total_threads.max(1),
            max_consecutive_executions: 16,
            update_interval_calls: 64,
            cache: ThreadLocalCache::new(),
        }
    }

    fn rank(&self, pool: &ContractPool) -> f64 {
        let scheduled = pool.scheduled_count() as f64;
        let executing = pool.executing_count() as f64;
        (scheduled / (executing + 1.0)) * (1.0 - executing / self.total_threads as f64)
    }

    fn recompute(&self, pools: &[Arc<ContractPool>], cache: &mut RankingCache, generation: u64) {
        let mut ranked: Vec<RankedEntry> = pools
            .iter()
            .enumerate()
            .filter(|(_, p)| p.scheduled_count() > 0)
            .map(|(i, p)| RankedEntry { pool_index: i, rank: self.rank(p) })
            .collect();
        ranked.sort_by(|a, b| b.rank.partial_cmp(&a.rank).unwrap_or(std::cmp::Ordering::Equal));
        cache.ranked_pool_indices = ranked.into_iter().map(|e| e.pool_index).collect();
        cache.affinity_position = 0;
        cache.calls_since_update = 0;
        cache.generation_seen = generation;
    }
}

impl SchedulerStrategy for AdaptiveRankingStrategy {
    fn select_next_group(
        &self,
        pools: &[Arc<ContractPool>],
        ctx: &mut SchedulingContext,
    ) -> (Option<Arc<ContractPool>>, bool) {
        if pools.is_empty() {
            return (None, true);
        }

        let mut by_thread = self.cache.by_thread.lock();
        let cache = by_thread.entry(ctx.thread_id).or_insert_with(RankingCache::empty);

        let affinity_has_work = cache
            .ranked_pool_indices
            .get(cache.affinity_position)
            .and_then(|&i| pools.get(i))
            .map(|p| p.scheduled_count() > 0)
            .unwrap_or(false);

        let needs_recompute = cache.ranked_pool_indices.is_empty()
            || cache.generation_seen != ctx.pools_generation
            || cache.calls_since_update >= self.update_interval_calls
            || !affinity_has_work;

        if needs_recompute {
            self.recompute(pools, cache, ctx.pools_generation);
        } else {
            cache.calls_since_update += 1;
        }

        if cache.ranked_pool_indices.is_empty() {
            return (None, true);
        }

        if let Some(&idx) = cache.ranked_pool_indices.get(cache.affinity_position) {
            if let Some(pool) = pools.get(idx) {
                if pool.scheduled_count() > 0 {
                    cache.consecutive_executions += 1;
                    if cache.consecutive_executions >= self.max_consecutive_executions {
                        cache.consecutive_executions = 0;
                        cache.affinity_position = (cache.affinity_position + 1) % cache.ranked_pool_indices.len();
                    }
                    return (Some(pool.clone()), false);
                }
            }
        }

        // Affinity pool is dry; scan the rest of the ranking.
        for (pos, &idx) in cache.ranked_pool_indices.iter().enumerate() {
            if let Some(pool) = pools.get(idx) {
                if pool.scheduled_count() > 0 {
                    cache.affinity_position = pos;
                    cache.consecutive_executions = 0;
                    return (Some(pool.clone()), false);
                }
            }
        }

        (None, true)
    }

    fn notify_groups_changed(&self) {
        self.cache.by_thread.lock().clear();
    }

    fn reset(&self) {
        self.cache.by_thread.lock().clear();
    }

    fn name(&self) -> &'static str {
        "adaptive-ranking"
    }
}
