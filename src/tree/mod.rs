//! `LocalTree`/`LocalNode`: a single binary coalescent tree over a fixed
//! number of leaves (`spec.md §3`, `§4.1`).
//!
//! `spec.md §9` directs re-expressing the source's raw-array, in-place
//! mutation style as an index-based arena: a tree is a fixed-length array of
//! node records, parent/child fields are `Option`-like (`NodeIndex`, with
//! `NodeIndex::NULL` standing in for `None` so the array stays a flat,
//! non-generic `Vec`), and the tree owns its records exclusively. No node
//! aliases another tree's storage; cloning is `O(n)`.

pub mod spr;

use std::collections::HashMap;

use crate::error::{ArgweaverError, Result};
use crate::newtypes::{NodeIndex, SeqId, TimeIdx};

pub use spr::Spr;

/// One node in a [`LocalTree`]'s arena. Leaves have `child == [NULL, NULL]`;
/// the root has `parent == NULL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocalNode {
    pub parent: NodeIndex,
    pub child: [NodeIndex; 2],
    pub age: TimeIdx,
}

impl LocalNode {
    fn leaf(age: TimeIdx) -> Self {
        LocalNode {
            parent: NodeIndex::NULL,
            child: [NodeIndex::NULL, NodeIndex::NULL],
            age,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.child[0].is_null()
    }
}

/// A binary coalescent tree with `n` leaves (indices `0..n-1`) and `2n-1`
/// total nodes, no unary nodes (`spec.md §3`).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocalTree {
    nodes: Vec<LocalNode>,
    nleaves: usize,
    root: NodeIndex,
}

impl LocalTree {
    /// Construct from a complete node array, validating every invariant in
    /// `spec.md §8.1`: single root, parent/child consistency, leaf indices
    /// `0..n-1`, strictly increasing ages up each edge, and no internal node
    /// at the top grid index `k_minus_1`.
    pub fn from_nodes(nodes: Vec<LocalNode>, nleaves: usize, k_minus_1: u32) -> Result<Self> {
        if nodes.len() != 2 * nleaves - 1 {
            return Err(ArgweaverError::invariant(format!(
                "expected {} nodes for {} leaves, got {}",
                2 * nleaves - 1,
                nleaves,
                nodes.len()
            )));
        }
        for (i, node) in nodes.iter().enumerate() {
            let is_leaf_slot = i < nleaves;
            if is_leaf_slot != node.is_leaf() {
                return Err(ArgweaverError::invariant(format!(
                    "node {i} leaf-ness does not match its slot"
                )));
            }
        }

        let mut root = NodeIndex::NULL;
        for (i, node) in nodes.iter().enumerate() {
            let v = NodeIndex::from(i);
            if node.parent.is_null() {
                if !root.is_null() {
                    return Err(ArgweaverError::invariant("tree has more than one root"));
                }
                root = v;
            } else {
                let p = &nodes[node.parent.index()];
                if p.child[0] != v && p.child[1] != v {
                    return Err(ArgweaverError::invariant(format!(
                        "node {i}'s parent does not list it as a child"
                    )));
                }
                if p.age <= node.age {
                    return Err(ArgweaverError::invariant(format!(
                        "node {i}'s parent age must exceed its own age"
                    )));
                }
            }
            if node.age.0 == k_minus_1 && !node.is_leaf() {
                return Err(ArgweaverError::invariant(format!(
                    "internal node {i} sits at the top grid index"
                )));
            }
        }
        if root.is_null() {
            return Err(ArgweaverError::invariant("tree has no root"));
        }

        Ok(LocalTree {
            nodes,
            nleaves,
            root,
        })
    }

    pub fn num_leaves(&self) -> usize {
        self.nleaves
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub fn is_leaf(&self, v: NodeIndex) -> bool {
        self.nodes[v.index()].is_leaf()
    }

    pub fn parent(&self, v: NodeIndex) -> NodeIndex {
        self.nodes[v.index()].parent
    }

    pub fn children(&self, v: NodeIndex) -> [NodeIndex; 2] {
        self.nodes[v.index()].child
    }

    pub fn age(&self, v: NodeIndex) -> TimeIdx {
        self.nodes[v.index()].age
    }

    /// The other child of `v`'s parent, i.e. `v`'s sibling under its parent.
    /// Undefined (panics in debug) for the root.
    pub fn sibling(&self, v: NodeIndex) -> NodeIndex {
        let p = self.parent(v);
        let [c0, c1] = self.children(p);
        if c0 == v {
            c1
        } else {
            debug_assert_eq!(c1, v);
            c0
        }
    }

    /// A postorder traversal (children before parents), used by
    /// `map_congruent_trees` and the emission likelihood's pruning
    /// recursion.
    pub fn postorder(&self) -> Vec<NodeIndex> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root, false)];
        while let Some((v, visited)) = stack.pop() {
            if visited {
                order.push(v);
                continue;
            }
            stack.push((v, true));
            if !self.is_leaf(v) {
                let [c0, c1] = self.children(v);
                stack.push((c1, false));
                stack.push((c0, false));
            }
        }
        order
    }

    fn replace_child(&mut self, parent: NodeIndex, old: NodeIndex, new: NodeIndex) {
        let child = &mut self.nodes[parent.index()].child;
        if child[0] == old {
            child[0] = new;
        } else {
            debug_assert_eq!(child[1], old);
            child[1] = new;
        }
    }

    fn recompute_root(&mut self) {
        let mut cur = NodeIndex(0);
        loop {
            let p = self.parent(cur);
            if p.is_null() {
                break;
            }
            cur = p;
        }
        self.root = cur;
    }

    /// Perform the regraft described by `spr` in place (`spec.md §4.1`).
    ///
    /// `r = spr.recomb_node`, `rp = parent(r)` is reused as the "recoal"
    /// node: `rp` is detached from its current position (its other child
    /// `s` is linked directly to `rp`'s old parent `bp`), then spliced back
    /// in above `spr.coal_node`, with `age(rp)` set to `spr.coal_time`. When
    /// `spr.coal_node == rp` itself, the just-detached sibling `s` is reused
    /// as the coal branch (the regraft point can't still be the node that
    /// was just removed from the tree).
    pub fn apply_spr(&mut self, spr: &Spr) -> Result<()> {
        if spr.is_null() {
            return Ok(());
        }
        if !spr.is_valid(self) {
            return Err(ArgweaverError::invariant(
                "SPR is not legal on the tree it is being applied to",
            ));
        }

        let r = spr.recomb_node;
        let rp = self.parent(r);
        let s = self.sibling(r);
        let bp = self.parent(rp);

        if !bp.is_null() {
            self.replace_child(bp, rp, s);
        }
        self.nodes[s.index()].parent = bp;

        let coal_node = if spr.coal_node == rp { s } else { spr.coal_node };
        let coal_parent = self.parent(coal_node);

        if !coal_parent.is_null() {
            self.replace_child(coal_parent, coal_node, rp);
        }
        self.nodes[rp.index()].parent = coal_parent;
        self.nodes[rp.index()].child = [coal_node, r];
        self.nodes[coal_node.index()].parent = rp;
        self.nodes[r.index()].parent = rp;
        self.nodes[rp.index()].age = spr.coal_time;

        self.recompute_root();
        Ok(())
    }

    /// Insert a brand-new leaf above branch `attach`, splicing a fresh
    /// "recoal" internal node between `attach` and its former parent
    /// (`spec.md §4.6`, item 4: the sampler's path-to-SPR conversion
    /// inserts the thread as a new leaf at the start of a sampled path,
    /// then moves it with ordinary [`apply_spr`] calls thereafter).
    ///
    /// Leaves must occupy a contiguous prefix of the arena, so insertion
    /// renumbers every existing internal node up by one slot rather than
    /// appending at the end; the new leaf takes the first free leaf slot
    /// and the new recoal node takes the last arena slot.
    pub fn insert_leaf(
        &self,
        attach: NodeIndex,
        attach_time: TimeIdx,
        leaf_age: TimeIdx,
        k_minus_1: u32,
    ) -> Result<LocalTree> {
        if attach.index() >= self.num_nodes() {
            return Err(ArgweaverError::invariant("attach node out of range"));
        }
        let n = self.nleaves;
        let new_n = n + 1;
        let new_leaf_idx = NodeIndex::from(n);
        let recoal_idx = NodeIndex::from(2 * n);

        let remap = |v: NodeIndex| -> NodeIndex {
            if v.is_null() {
                NodeIndex::NULL
            } else if v.index() < n {
                v
            } else {
                NodeIndex::from(v.index() + 1)
            }
        };

        let mut nodes = vec![LocalNode::leaf(TimeIdx::NULL); 2 * new_n - 1];
        for i in 0..self.num_nodes() {
            let old = NodeIndex::from(i);
            let new_idx = remap(old);
            let mut parent = remap(self.parent(old));
            let mut child = self.children(old);
            child[0] = remap(child[0]);
            child[1] = remap(child[1]);
            if old == attach {
                parent = recoal_idx;
            }
            nodes[new_idx.index()] = LocalNode { parent, child, age: self.age(old) };
        }
        if let Some(old_parent) = self.parent(attach).some() {
            let new_parent = remap(old_parent);
            nodes[new_parent.index()].child = {
                let mut c = nodes[new_parent.index()].child;
                if c[0] == remap(attach) {
                    c[0] = recoal_idx;
                } else {
                    debug_assert_eq!(c[1], remap(attach));
                    c[1] = recoal_idx;
                }
                c
            };
        }
        nodes[new_leaf_idx.index()] = LocalNode::leaf(leaf_age);
        nodes[new_leaf_idx.index()].parent = recoal_idx;
        nodes[recoal_idx.index()] = LocalNode {
            parent: remap(self.parent(attach)),
            child: [remap(attach), new_leaf_idx],
            age: attach_time,
        };

        LocalTree::from_nodes(nodes, new_n, k_minus_1)
    }

    /// Sweep each branch across the grid intervals it spans, returning
    /// `(nbranches, nrecombs, ncoals)` arrays of length `ntimes - 1`
    /// (`spec.md §4.1`). `nbranches[i]` counts branches strictly spanning
    /// interval `i`; `nrecombs`/`ncoals` additionally count the instant at
    /// the top of a branch, where an event can occur right as the branch
    /// reaches its parent's age. The (virtual) branch above the root is
    /// included and extends to the top finite interval, `ntimes - 2`.
    pub fn count_lineages(&self, ntimes: usize) -> (Vec<u32>, Vec<u32>, Vec<u32>) {
        let n_intervals = ntimes - 1;
        let mut nbranches = vec![0u32; n_intervals];
        let mut nrecombs = vec![0u32; n_intervals];
        let mut ncoals = vec![0u32; n_intervals];

        for i in 0..self.nodes.len() {
            let v = NodeIndex::from(i);
            let a = self.age(v).index();
            if v == self.root {
                let top = n_intervals - 1;
                for t in a..=top {
                    nbranches[t] += 1;
                    nrecombs[t] += 1;
                    ncoals[t] += 1;
                }
                continue;
            }
            let b = self.age(self.parent(v)).index();
            for t in a..b {
                nbranches[t] += 1;
            }
            let top = b.min(n_intervals - 1);
            for t in a..=top {
                nrecombs[t] += 1;
                ncoals[t] += 1;
            }
        }
        (nbranches, nrecombs, ncoals)
    }
}

/// Compute a node-to-node correspondence between two topologies that share
/// the same leaf id set (`spec.md §4.1`, `map_congruent_trees`).
///
/// Leaves are matched on `seqid`. Internal nodes are reconciled in
/// postorder: a node maps to the parent shared by its two mapped children
/// when one exists; otherwise it inherits the image of whichever single
/// child is mapped, or `NodeIndex::NULL` if neither is.
pub fn map_congruent_trees(
    t1: &LocalTree,
    ids1: &[SeqId],
    t2: &LocalTree,
    ids2: &[SeqId],
) -> Vec<NodeIndex> {
    let mut id_to_node2: HashMap<SeqId, NodeIndex> = HashMap::with_capacity(t2.num_leaves());
    for i in 0..t2.num_leaves() {
        id_to_node2.insert(ids2[i], NodeIndex::from(i));
    }

    let mut mapping = vec![NodeIndex::NULL; t1.num_nodes()];
    for i in 0..t1.num_leaves() {
        if let Some(&n2) = id_to_node2.get(&ids1[i]) {
            mapping[i] = n2;
        }
    }

    for v in t1.postorder() {
        if t1.is_leaf(v) {
            continue;
        }
        let [c0, c1] = t1.children(v);
        let m0 = mapping[c0.index()].some();
        let m1 = mapping[c1.index()].some();
        mapping[v.index()] = match (m0, m1) {
            (Some(a), Some(b)) => {
                let pa = t2.parent(a);
                let pb = t2.parent(b);
                if !pa.is_null() && pa == pb {
                    pa
                } else {
                    NodeIndex::NULL
                }
            }
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => NodeIndex::NULL,
        };
    }
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 3-leaf caterpillar with unit-spaced ages: (0,1) coalesce at age 1
    /// under node 3, then (3,2) coalesce at age 2 under node 4 (the root).
    /// Used only where the tight spacing doesn't matter (topmost-interval
    /// and the branch-interval sum invariant); `apply_spr` needs more room
    /// between grid points, so it uses [`three_leaf_tree`] instead.
    fn unit_height_tree() -> LocalTree {
        let nodes = vec![
            LocalNode { parent: NodeIndex(3), child: [NodeIndex::NULL; 2], age: TimeIdx(0) }, // 0
            LocalNode { parent: NodeIndex(3), child: [NodeIndex::NULL; 2], age: TimeIdx(0) }, // 1
            LocalNode { parent: NodeIndex(4), child: [NodeIndex::NULL; 2], age: TimeIdx(0) }, // 2
            LocalNode { parent: NodeIndex(4), child: [NodeIndex(0), NodeIndex(1)], age: TimeIdx(1) }, // 3
            LocalNode { parent: NodeIndex::NULL, child: [NodeIndex(3), NodeIndex(2)], age: TimeIdx(2) }, // 4
        ];
        LocalTree::from_nodes(nodes, 3, 10).unwrap()
    }

    /// A 3-leaf caterpillar with ages spaced out enough to leave room for a
    /// regraft strictly between existing node ages.
    fn three_leaf_tree() -> LocalTree {
        let nodes = vec![
            LocalNode { parent: NodeIndex(3), child: [NodeIndex::NULL; 2], age: TimeIdx(0) }, // 0
            LocalNode { parent: NodeIndex(3), child: [NodeIndex::NULL; 2], age: TimeIdx(0) }, // 1
            LocalNode { parent: NodeIndex(4), child: [NodeIndex::NULL; 2], age: TimeIdx(0) }, // 2
            LocalNode { parent: NodeIndex(4), child: [NodeIndex(0), NodeIndex(1)], age: TimeIdx(2) }, // 3
            LocalNode { parent: NodeIndex::NULL, child: [NodeIndex(3), NodeIndex(2)], age: TimeIdx(5) }, // 4
        ];
        LocalTree::from_nodes(nodes, 3, 10).unwrap()
    }

    #[test]
    fn postorder_visits_children_before_parent() {
        let tree = three_leaf_tree();
        let order = tree.postorder();
        let pos = |n: u32| order.iter().position(|&x| x == NodeIndex(n)).unwrap();
        assert!(pos(0) < pos(3));
        assert!(pos(1) < pos(3));
        assert!(pos(3) < pos(4));
        assert!(pos(2) < pos(4));
        assert_eq!(*order.last().unwrap(), NodeIndex(4));
    }

    #[test]
    fn rejects_two_roots() {
        // Both leaves claim a null parent instead of being joined under the
        // internal node.
        let nodes = vec![
            LocalNode { parent: NodeIndex::NULL, child: [NodeIndex::NULL; 2], age: TimeIdx(0) },
            LocalNode { parent: NodeIndex::NULL, child: [NodeIndex::NULL; 2], age: TimeIdx(0) },
            LocalNode { parent: NodeIndex::NULL, child: [NodeIndex(0), NodeIndex(1)], age: TimeIdx(1) },
        ];
        let err = LocalTree::from_nodes(nodes, 2, 10).unwrap_err();
        assert!(matches!(err, ArgweaverError::InvariantViolation(_)));
    }

    #[test]
    fn count_lineages_topmost_interval_is_one() {
        let tree = unit_height_tree();
        let (nbranches, _, _) = tree.count_lineages(12);
        assert_eq!(*nbranches.last().unwrap(), 1);
    }

    #[test]
    fn count_lineages_sums_as_expected_for_unit_height_tree() {
        // n=3, coalescent events at ages 1 and 2: total "branch-intervals"
        // (sum of nbranches across the finite grid) is 2*(n-1) = 4 when
        // every branch spans exactly the unit steps between successive
        // coalescent ages, matching `spec.md §8`, invariant 4.
        let tree = unit_height_tree();
        let (nbranches, _, _) = tree.count_lineages(3);
        let total: u32 = nbranches.iter().sum();
        assert_eq!(total, 2 * (3 - 1));
    }

    #[test]
    fn apply_spr_is_identity_for_null_spr() {
        let mut tree = three_leaf_tree();
        let before = tree.clone();
        tree.apply_spr(&Spr::NULL).unwrap();
        assert_eq!(tree, before);
    }

    #[test]
    fn apply_spr_regrafts_leaf() {
        // Move leaf 2 (age 0, parent 4 at age 5) to coalesce onto the
        // (0,1) branch (node 0, parent 3 at age 2) at time 1 instead of at
        // the root.
        let mut tree = three_leaf_tree();
        let spr = Spr {
            recomb_node: NodeIndex(2),
            recomb_time: TimeIdx(3),
            coal_node: NodeIndex(0),
            coal_time: TimeIdx(1),
        };
        assert!(spr.is_valid(&tree));
        tree.apply_spr(&spr).unwrap();
        // Node 4 (the reused recoal node) now sits between 0 and its old
        // parent (node 3), at age 1, and is 2's new parent.
        assert_eq!(tree.parent(NodeIndex(2)), NodeIndex(4));
        assert_eq!(tree.age(NodeIndex(4)), TimeIdx(1));
        assert_eq!(tree.parent(NodeIndex(4)), NodeIndex(3));
        assert_eq!(tree.root(), NodeIndex(3));
    }

    #[test]
    fn map_congruent_trees_identity_when_ids_match() {
        let tree = three_leaf_tree();
        let ids = [SeqId(0), SeqId(1), SeqId(2)];
        let mapping = map_congruent_trees(&tree, &ids, &tree, &ids);
        for (i, &m) in mapping.iter().enumerate() {
            assert_eq!(m, NodeIndex::from(i));
        }
    }
}
