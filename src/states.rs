//! The HMM hidden state space over a local tree (`spec.md §3`, "HMM State
//! Space").
//!
//! A state `(v, t)` names the branch `v` a new lineage could coalesce onto
//! and the discretized time `t` at which it does so. Every branch
//! contributes one state per time index it spans; the virtual branch above
//! the root extends to the top of the grid, standing in for "older than
//! every existing coalescence."

use std::collections::HashMap;

use crate::newtypes::{NodeIndex, TimeIdx};
use crate::tree::LocalTree;

/// One hidden state: attach above `node` at `time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct State {
    pub node: NodeIndex,
    pub time: TimeIdx,
}

/// The enumerated state space `S(T)` for a local tree `T` over a grid with
/// `ntimes` points (`spec.md §3`). States are ordered by node index, then by
/// time, which the transition-matrix builders rely on for compressed,
/// same-branch-adjacent layout.
#[derive(Debug, Clone)]
pub struct States {
    states: Vec<State>,
    index: HashMap<State, usize>,
}

impl States {
    pub fn for_tree(tree: &LocalTree, ntimes: usize) -> Self {
        // `spec.md §4.2`: i ranges over [age(v), ntimes-2] for every branch,
        // including the virtual branch above the root (no internal node
        // ever sits at ntimes-1, so a non-root branch's parent age is
        // already within this bound).
        let top_time = ntimes - 2;
        let mut states = Vec::new();
        for i in 0..tree.num_nodes() {
            let v = NodeIndex::from(i);
            let a = tree.age(v).index();
            let top = if v == tree.root() {
                top_time
            } else {
                tree.age(tree.parent(v)).index()
            };
            for t in a..=top {
                states.push(State { node: v, time: TimeIdx::from(t as u32) });
            }
        }
        let index = states
            .iter()
            .enumerate()
            .map(|(i, &s)| (s, i))
            .collect();
        States { states, index }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, i: usize) -> State {
        self.states[i]
    }

    pub fn all(&self) -> &[State] {
        &self.states
    }

    pub fn index_of(&self, state: State) -> Option<usize> {
        self.index.get(&state).copied()
    }

    /// States attached to a specific branch, in increasing time order; the
    /// transition matrix's same-branch formula iterates exactly this slice.
    pub fn on_branch(&self, node: NodeIndex) -> impl Iterator<Item = (usize, State)> + '_ {
        self.states
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.node == node)
            .map(|(i, &s)| (i, s))
    }
}

/// Per-grid-interval lineage counts for a tree, a thin wrapper over
/// [`LocalTree::count_lineages`] used throughout the transition-matrix math
/// (`spec.md §3`, §4.2-3).
#[derive(Debug, Clone)]
pub struct LineageCounts {
    pub nbranches: Vec<u32>,
    pub nrecombs: Vec<u32>,
    pub ncoals: Vec<u32>,
}

impl LineageCounts {
    pub fn for_tree(tree: &LocalTree, ntimes: usize) -> Self {
        let (nbranches, nrecombs, ncoals) = tree.count_lineages(ntimes);
        LineageCounts { nbranches, nrecombs, ncoals }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newtypes::SeqId;
    use crate::tree::LocalNode;

    fn three_leaf_tree() -> LocalTree {
        let nodes = vec![
            LocalNode { parent: NodeIndex(3), child: [NodeIndex::NULL; 2], age: TimeIdx(0) },
            LocalNode { parent: NodeIndex(3), child: [NodeIndex::NULL; 2], age: TimeIdx(0) },
            LocalNode { parent: NodeIndex(4), child: [NodeIndex::NULL; 2], age: TimeIdx(0) },
            LocalNode { parent: NodeIndex(4), child: [NodeIndex(0), NodeIndex(1)], age: TimeIdx(2) },
            LocalNode { parent: NodeIndex::NULL, child: [NodeIndex(3), NodeIndex(2)], age: TimeIdx(5) },
        ];
        LocalTree::from_nodes(nodes, 3, 20).unwrap()
    }

    #[test]
    fn root_branch_extends_to_top_of_grid() {
        let tree = three_leaf_tree();
        let states = States::for_tree(&tree, 10);
        let root_states: Vec<_> = states.on_branch(tree.root()).collect();
        let max_time = root_states.iter().map(|(_, s)| s.time.index()).max().unwrap();
        assert_eq!(max_time, 8);
    }

    #[test]
    fn every_state_round_trips_through_index_of() {
        let tree = three_leaf_tree();
        let states = States::for_tree(&tree, 10);
        for i in 0..states.len() {
            let s = states.get(i);
            assert_eq!(states.index_of(s), Some(i));
        }
        let _ = SeqId(0);
    }
}
