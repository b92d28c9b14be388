// contract-kernel: generic slab-backed directed acyclic graph. Holds the
// topology (nodes + bidirectional adjacency) that `WorkGraph` layers
// scheduling semantics on top of. Node storage reuses freed slots the way
// `ContractPool` reuses contract slots, so a long-running graph that adds
// and removes nodes doesn't grow unbounded.

use crate::error::GraphError;
use smallvec::SmallVec;

/// Generation-validated handle into a [`Dag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

impl NodeHandle {
    pub fn index(&self) -> u32 {
        self.index
    }
}

struct Entry<T> {
    generation: u32,
    occupied: bool,
    value: Option<T>,
    children: SmallVec<[u32; 4]>,
    parents: SmallVec<[u32; 4]>,
}

/// A directed acyclic graph over payload type `T`. Rejects edges that would
/// introduce a cycle or a self-loop; all other structure is unconstrained.
pub struct Dag<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
}

impl<T> Dag<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new(), free: Vec::new() }
    }

    /// Like [`Dag::new`] but pre-reserves storage for `capacity` nodes,
    /// avoiding reallocation during the initial burst of `add_node` calls
    /// when the caller knows roughly how large the graph will grow.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity), free: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.occupied).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add_node(&mut self, value: T) -> NodeHandle {
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.occupied = true;
            entry.value = Some(value);
            entry.children.clear();
            entry.parents.clear();
            NodeHandle { index, generation: entry.generation }
        } else {
            let index = self.entries.len() as u32;
            self.entries.push(Entry {
                generation: 1,
                occupied: true,
                value: Some(value),
                children: SmallVec::new(),
                parents: SmallVec::new(),
            });
            NodeHandle { index, generation: 1 }
        }
    }

    fn entry(&self, handle: NodeHandle) -> Result<&Entry<T>, GraphError> {
        let entry = self.entries.get(handle.index as usize).ok_or(GraphError::NodeNotFound)?;
        if !entry.occupied || entry.generation != handle.generation {
            return Err(GraphError::NodeNotFound);
        }
        Ok(entry)
    }

    fn entry_mut(&mut self, handle: NodeHandle) -> Result<&mut Entry<T>, GraphError> {
        let entry = self.entries.get_mut(handle.index as usize).ok_or(GraphError::NodeNotFound)?;
        if !entry.occupied || entry.generation != handle.generation {
            return Err(GraphError::NodeNotFound);
        }
        Ok(entry)
    }

    pub fn get(&self, handle: NodeHandle) -> Result<&T, GraphError> {
        Ok(self.entry(handle)?.value.as_ref().expect("occupied entry always has a value"))
    }

    pub fn children(&self, handle: NodeHandle) -> Result<&[u32], GraphError> {
        Ok(&self.entry(handle)?.children)
    }

    pub fn parents(&self, handle: NodeHandle) -> Result<&[u32], GraphError> {
        Ok(&self.entry(handle)?.parents)
    }

    pub fn parent_count(&self, handle: NodeHandle) -> Result<usize, GraphError> {
        Ok(self.entry(handle)?.parents.len())
    }

    /// Adds a `from -> to` edge (from must complete before to may run).
    /// Rejects the edge, leaving the graph unchanged, if it is a self-loop
    /// or would close a cycle.
    pub fn add_dependency(&mut self, from: NodeHandle, to: NodeHandle) -> Result<(), GraphError> {
        self.entry(from)?;
        self.entry(to)?;
        if from.index == to.index {
            return Err(GraphError::CycleOrSelfLoop);
        }
        if self.reaches(to.index, from.index) {
            return Err(GraphError::CycleOrSelfLoop);
        }
        self.entries[from.index as usize].children.push(to.index);
        self.entries[to.index as usize].parents.push(from.index);
        Ok(())
    }

    /// Bounded DFS: does `start` reach `target` following child edges?
    fn reaches(&self, start: u32, target: u32) -> bool {
        let mut stack = vec![start];
        let mut visited = vec![false; self.entries.len()];
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if visited[node as usize] {
                continue;
            }
            visited[node as usize] = true;
            for &child in &self.entries[node as usize].children {
                if !visited[child as usize] {
                    stack.push(child);
                }
            }
        }
        false
    }

    /// Removes a node and its incident edges. The slot's generation is
    /// bumped so stale handles fail validation on next use.
    pub fn remove_node(&mut self, handle: NodeHandle) -> Result<T, GraphError> {
        self.entry(handle)?;
        let entry = &mut self.entries[handle.index as usize];
        let value = entry.value.take().expect("occupied entry always has a value");
        let children: Vec<u32> = entry.children.drain(..).collect();
        let parents: Vec<u32> = entry.parents.drain(..).collect();
        entry.occupied = false;
        entry.generation = entry.generation.wrapping_add(1);
        for child in children {
            self.entries[child as usize].parents.retain(|&p| p != handle.index);
        }
        for parent in parents {
            self.entries[parent as usize].children.retain(|&c| c != handle.index);
        }
        self.free.push(handle.index);
        Ok(value)
    }

    /// Nodes with no parents — legal starting points for a traversal.
    pub fn roots(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.entries.iter().enumerate().filter_map(|(i, e)| {
            if e.occupied && e.parents.is_empty() {
                Some(NodeHandle { index: i as u32, generation: e.generation })
            } else {
                None
            }
        })
    }

    pub fn handles(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.entries.iter().enumerate().filter_map(|(i, e)| {
            if e.occupied {
                Some(NodeHandle { index: i as u32, generation: e.generation })
            } else {
                None
            }
        })
    }
}

impl<T> Default for Dag<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_chain_has_single_root() {
        let mut dag: Dag<&'static str> = Dag::new();
        let a = dag.add_node("a");
        let b = dag.add_node("b");
        let c = dag.add_node("c");
        dag.add_dependency(a, b).unwrap();
        dag.add_dependency(b, c).unwrap();
        let roots: Vec<_> = dag.roots().collect();
        assert_eq!(roots, vec![a]);
        assert_eq!(dag.parent_count(c).unwrap(), 1);
    }

    #[test]
    fn self_loop_is_rejected() {
        let mut dag: Dag<&'static str> = Dag::new();
        let a = dag.add_node("a");
        assert!(matches!(dag.add_dependency(a, a), Err(GraphError::CycleOrSelfLoop)));
    }

    #[test]
    fn indirect_cycle_is_rejected() {
        let mut dag: Dag<&'static str> = Dag::new();
        let a = dag.add_node("a");
        let b = dag.add_node("b");
        let c = dag.add_node("c");
        dag.add_dependency(a, b).unwrap();
        dag.add_dependency(b, c).unwrap();
        assert!(matches!(dag.add_dependency(c, a), Err(GraphError::CycleOrSelfLoop)));
    }

    #[test]
    fn removed_node_invalidates_its_handle_and_its_edges() {
        let mut dag: Dag<&'static str> = Dag::new();
        let a = dag.add_node("a");
        let b = dag.add_node("b");
        dag.add_dependency(a, b).unwrap();
        dag.remove_node(a).unwrap();
        assert!(matches!(dag.get(a), Err(GraphError::NodeNotFound)));
        assert_eq!(dag.parent_count(b).unwrap(), 0);
    }

    #[test]
    fn diamond_shape_is_not_mistaken_for_a_cycle() {
        let mut dag: Dag<&'static str> = Dag::new();
        let a = dag.add_node("a");
        let b = dag.add_node("b");
        let c = dag.add_node("c");
        let d = dag.add_node("d");
        dag.add_dependency(a, b).unwrap();
        dag.add_dependency(a, c).unwrap();
        dag.add_dependency(b, d).unwrap();
        dag.add_dependency(c, d).unwrap();
        assert_eq!(dag.parent_count(d).unwrap(), 2);
    }
}
