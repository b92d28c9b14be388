// contract-kernel: lock-free indexed bitmap for ready-slot tracking
// Complete binary tree over atomic u64 words: leaves are bitmaps, internal
// nodes hold a population count of their subtree.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sentinel returned by callers that want the all-ones "no signal" marker
/// instead of `Option::None`. The tree itself always returns `Option<u32>`;
/// this constant exists for code that needs to interoperate with a plain
/// `u32` representation of "invalid".
pub const SIGNAL_NONE: u32 = u32::MAX;

const BITS_PER_LEAF: u32 = 64;

/// Outcome of a [`SignalTree::select`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// The signal index that was claimed, or `None` if no bit was set.
    pub index: Option<u32>,
    /// Whether the whole tree was empty (root population == 0) after this call.
    pub tree_empty: bool,
}

/// Lock-free indexed bitmap over `leaf_capacity * 64` signal slots.
///
/// `leaf_capacity` must be a power of two, minimum 2 (a single leaf would
/// make the root simultaneously the population counter and the bitmap,
/// which the layout below can't represent).
pub struct SignalTree {
    nodes: Box<[CachePadded<AtomicU64>]>,
    leaf_start: usize,
    leaf_capacity: usize,
}

impl SignalTree {
    /// Builds a tree with room for `leaf_capacity * 64` signals.
    ///
    /// `leaf_capacity` is rounded up to the next power of two with a floor
    /// of 2, matching the pool's "ceil(capacity/64) rounded to next power of
    /// two (>= 2)" sizing rule.
    pub fn new(leaf_capacity: usize) -> Self {
        let leaf_capacity = leaf_capacity.next_power_of_two().max(2);
        let total_nodes = 2 * leaf_capacity - 1;
        let nodes = (0..total_nodes)
            .map(|_| CachePadded::new(AtomicU64::new(0)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            nodes,
            leaf_start: leaf_capacity - 1,
            leaf_capacity,
        }
    }

    /// Total addressable signal slots (`leaf_capacity * 64`).
    pub fn capacity(&self) -> usize {
        self.leaf_capacity * BITS_PER_LEAF as usize
    }

    #[inline]
    fn leaf_index(&self, signal: u32) -> usize {
        self.leaf_start + (signal as usize / BITS_PER_LEAF as usize)
    }

    #[inline]
    fn bit_mask(signal: u32) -> u64 {
        1u64 << (signal % BITS_PER_LEAF)
    }

    /// Sets bit `signal`. No-op if already set.
    pub fn set(&self, signal: u32) {
        debug_assert!((signal as usize) < self.capacity(), "signal out of range");
        let leaf = self.leaf_index(signal);
        let mask = Self::bit_mask(signal);
        let prev = self.nodes[leaf].fetch_or(mask, Ordering::Release);
        if prev & mask == 0 {
            self.propagate(leaf, 1);
        }
    }

    /// Clears bit `signal`. No-op if already clear.
    pub fn clear(&self, signal: u32) {
        debug_assert!((signal as usize) < self.capacity(), "signal out of range");
        let leaf = self.leaf_index(signal);
        let mask = Self::bit_mask(signal);
        let prev = self.nodes[leaf].fetch_and(!mask, Ordering::Release);
        if prev & mask != 0 {
            self.propagate(leaf, -1);
        }
    }

    fn propagate(&self, mut idx: usize, delta: i64) {
        while idx != 0 {
            idx = (idx - 1) / 2;
            if delta >= 0 {
                self.nodes[idx].fetch_add(delta as u64, Ordering::Relaxed);
            } else {
                self.nodes[idx].fetch_sub((-delta) as u64, Ordering::Relaxed);
            }
        }
    }

    /// Whether the tree currently has no set bits (best-effort, relaxed read).
    pub fn is_empty(&self) -> bool {
        self.nodes[0].load(Ordering::Acquire) == 0
    }

    /// Population of the whole tree (best-effort, relaxed read).
    pub fn population(&self) -> u64 {
        self.nodes[0].load(Ordering::Acquire)
    }

    /// Selects and clears one set bit, steering the descent with `bias` and
    /// updating it to reflect the path actually taken (so the next call,
    /// starting from the updated bias, tends to explore a different branch).
    ///
    /// Returns `Selection { index: None, tree_empty: true }` only when the
    /// root is observed empty; a race that empties a subtree mid-descent is
    /// retried internally from the root rather than surfaced to the caller.
    pub fn select(&self, bias: &mut u64) -> Selection {
        loop {
            if self.nodes[0].load(Ordering::Acquire) == 0 {
                return Selection { index: None, tree_empty: true };
            }

            let mut idx = 0usize;
            let mut depth = 0u32;
            let mut new_bias: u64 = 0;
            let mut empty_descent = false;

            while idx < self.leaf_start {
                let left = 2 * idx + 1;
                let right = 2 * idx + 2;
                let left_count = self.nodes[left].load(Ordering::Acquire);
                let right_count = self.nodes[right].load(Ordering::Acquire);

                if left_count == 0 && right_count == 0 {
                    empty_descent = true;
                    break;
                }

                let bias_prefers_right = (*bias >> depth) & 1 == 1;
                let go_right = if left_count != 0 && right_count != 0 {
                    bias_prefers_right
                } else {
                    right_count != 0
                };

                if go_right {
                    new_bias |= 1 << depth;
                }
                idx = if go_right { right } else { left };
                depth += 1;
            }

            if empty_descent {
                continue;
            }

            // idx now names a leaf; try to claim its lowest set bit.
            loop {
                let bitmap = self.nodes[idx].load(Ordering::Acquire);
                if bitmap == 0 {
                    break; // raced with another selector/clear; restart from root
                }
                let bit = bitmap.trailing_zeros();
                let mask = 1u64 << bit;
                if self.nodes[idx]
                    .compare_exchange_weak(bitmap, bitmap & !mask, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.propagate(idx, -1);
                    *bias = new_bias;
                    let signal = ((idx - self.leaf_start) * BITS_PER_LEAF as usize) as u32 + bit;
                    let tree_empty = self.nodes[0].load(Ordering::Acquire) == 0;
                    return Selection { index: Some(signal), tree_empty };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rounds_leaf_capacity_up_to_power_of_two_minimum_two() {
        let tree = SignalTree::new(1);
        assert_eq!(tree.capacity(), 128);
        let tree = SignalTree::new(3);
        assert_eq!(tree.capacity(), 256);
    }

    #[test]
    fn set_then_clear_on_empty_tree_is_a_noop() {
        let tree = SignalTree::new(2);
        tree.set(5);
        tree.clear(5);
        assert!(tree.is_empty());
        assert_eq!(tree.population(), 0);
    }

    #[test]
    fn scenario_s1_signal_tree_concurrent_select() {
        // leafCapacity=2 => 128 signals; set {0,1,65,127}.
        let tree = SignalTree::new(2);
        for &i in &[0u32, 1, 65, 127] {
            tree.set(i);
        }
        assert_eq!(tree.population(), 4);

        let mut bias = 0u64;
        let mut seen = HashSet::new();
        let mut populations = Vec::new();
        for _ in 0..4 {
            let sel = tree.select(&mut bias);
            let idx = sel.index.expect("expected a signal");
            seen.insert(idx);
            populations.push(tree.population());
        }
        assert_eq!(seen, HashSet::from([0, 1, 65, 127]));
        assert_eq!(populations, vec![3, 2, 1, 0]);

        let fifth = tree.select(&mut bias);
        assert_eq!(fifth.index, None);
        assert!(fifth.tree_empty);
    }

    #[test]
    fn select_returns_every_set_bit_exactly_once_under_contention() {
        let tree = Arc::new(SignalTree::new(4)); // 256 signals
        for i in 0..200u32 {
            tree.set(i);
        }

        let collected: Arc<parking_lot::Mutex<Vec<u32>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for t in 0..8 {
            let tree = tree.clone();
            let collected = collected.clone();
            handles.push(thread::spawn(move || {
                let mut bias = t as u64;
                let mut local = Vec::new();
                loop {
                    let sel = tree.select(&mut bias);
                    match sel.index {
                        Some(i) => local.push(i),
                        None => break,
                    }
                }
                collected.lock().extend(local);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let mut all = collected.lock().clone();
        all.sort_unstable();
        let expected: Vec<u32> = (0..200).collect();
        assert_eq!(all, expected);
        assert!(tree.is_empty());
    }

    #[test]
    fn invariant_holds_after_random_set_clear_sequence() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let tree = SignalTree::new(8); // 512 signals
        let mut rng = StdRng::seed_from_u64(42);
        let mut reference = vec![false; tree.capacity()];

        for _ in 0..5000 {
            let i = rng.gen_range(0..tree.capacity() as u32);
            if rng.gen_bool(0.5) {
                tree.set(i);
                reference[i as usize] = true;
            } else {
                tree.clear(i);
                reference[i as usize] = false;
            }
        }

        assert_eq!(tree.population(), reference.iter().filter(|&&b| b).count() as u64);
    }
}
