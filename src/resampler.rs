//! Gibbs resampling of one lineage's thread within a window of the ARG
//! (`spec.md §4.7`).
//!
//! [`choose_leaf_and_window`] picks the lineage and the `[a, b)` window to
//! resample; a pass then removes that leaf from every block in the window,
//! producing a `LocalTrees` missing that lineage (the "residual"), then
//! re-threads it with [`crate::sampler::Sampler`] and splices the result
//! back in. `spec.md §9`'s redesign of the source's `partition` /
//! `remove_arg_thread` pair into the explicit `partition_local_trees`
//! free function, rather than an ARG-mutating method, is what lets this
//! module stay a thin driver over `local_trees.rs` and `sampler.rs`.

use rand::Rng;

use crate::error::{ArgweaverError, Result};
use crate::local_trees::{append_local_trees, partition_local_trees, LocalTrees};
use crate::model::Model;
use crate::newtypes::{NodeIndex, SeqId};
use crate::sampler::{SiteRecord, Sampler};
use crate::tree::{LocalNode, LocalTree, Spr};

/// Drives repeated resampling of one or more lineages across a `LocalTrees`.
pub struct Resampler<'a> {
    model: &'a Model,
}

impl<'a> Resampler<'a> {
    pub fn new(model: &'a Model) -> Self {
        Resampler { model }
    }

    /// Pick a lineage and a window, then resample it (`spec.md §4.7`,
    /// "chooses a leaf id and a half-open interval"). Combines
    /// [`choose_leaf_and_window`] with [`Resampler::resample_leaf`] for
    /// callers that don't need to drive the selection themselves.
    pub fn resample_random(
        &self,
        trees: &LocalTrees,
        sites: &[SiteRecord],
        rng: &mut impl Rng,
    ) -> Result<LocalTrees> {
        let (seqid, window_start, window_end) = choose_leaf_and_window(trees, rng);
        self.resample_leaf(trees, seqid, window_start, window_end, sites, rng)
    }

    /// Resample `seqid`'s thread within `[window_start, window_end)`,
    /// returning the updated `LocalTrees`. Positions outside the window are
    /// left untouched; `sites` must cover the full original span (only the
    /// entries within the window are used).
    #[tracing::instrument(level = "debug", skip(self, trees, sites, rng), fields(seqid = seqid.0, window_start, window_end))]
    pub fn resample_leaf(
        &self,
        trees: &LocalTrees,
        seqid: SeqId,
        window_start: u64,
        window_end: u64,
        sites: &[SiteRecord],
        rng: &mut impl rand::Rng,
    ) -> Result<LocalTrees> {
        tracing::debug!("resampling window");
        let leaf_pos = trees
            .seqids()
            .iter()
            .position(|&id| id == seqid)
            .ok_or_else(|| ArgweaverError::invariant("seqid not present in LocalTrees"))?;

        let (before, middle, after) = partition_local_trees(trees, window_start, window_end)?;
        let middle = middle.ok_or_else(|| ArgweaverError::invariant("resample window is empty"))?;

        let residual = remove_leaf(&middle, leaf_pos)?;

        let window_sites: Vec<SiteRecord> = sites
            .iter()
            .filter(|s| s.pos >= window_start && s.pos < window_end)
            .cloned()
            .collect();
        if window_sites.is_empty() {
            return Err(ArgweaverError::invariant(
                "resample window has no observed sites to thread against",
            ));
        }

        let sampler = Sampler::new(self.model);
        let rethreaded = sampler.sample_thread(&residual, &window_sites, seqid, rng)?;

        let mut result = before;
        result = match result {
            Some(r) => Some(append_local_trees(r, rethreaded)?),
            None => Some(rethreaded),
        };
        let result = match (result, after) {
            (Some(r), Some(a)) => append_local_trees(r, a)?,
            (Some(r), None) => r,
            (None, Some(a)) => a,
            (None, None) => return Err(ArgweaverError::invariant("resampling produced an empty LocalTrees")),
        };
        Ok(result)
    }
}

/// Choose a leaf uniformly at random and either the full chromosome span
/// or a bounded sub-window within it (`spec.md §4.7`: "the algorithm
/// selects either a full chromosome or a bounded window"). Windows shorter
/// than 2 coordinates have no room for a proper sub-window and always use
/// the full span.
pub fn choose_leaf_and_window(trees: &LocalTrees, rng: &mut impl Rng) -> (SeqId, u64, u64) {
    let seqids = trees.seqids();
    let seqid = seqids[rng.gen_range(0..seqids.len())];

    let start = trees.start_coord();
    let end = trees.end_coord();
    if end.saturating_sub(start) < 2 || rng.gen_bool(0.5) {
        return (seqid, start, end);
    }
    let a = rng.gen_range(start..end - 1);
    let b = rng.gen_range(a + 1..=end);
    (seqid, a, b)
}

/// Remove the leaf at `leaf_pos` from every block of `trees`, producing a
/// `LocalTrees` over the remaining `n - 1` leaves with that lineage's
/// `seqid` dropped (`spec.md §4.7`). Each block's tree shrinks by
/// collapsing the leaf's parent (the "recoal" node, symmetric to
/// [`LocalTree::insert_leaf`]) and renumbering everything above the
/// removed leaf's old slot down by one.
fn remove_leaf(trees: &LocalTrees, leaf_pos: usize) -> Result<LocalTrees> {
    let mut seqids = trees.seqids().to_vec();
    seqids.remove(leaf_pos);

    let mut result: Option<LocalTrees> = None;
    for block in trees.blocks() {
        let pruned = prune_leaf(&block.tree, leaf_pos)?;
        match result.as_mut() {
            None => {
                result = Some(LocalTrees::new(seqids.clone(), trees.start_coord(), pruned, block.blocklen)?);
            }
            Some(existing) => {
                let mapping = crate::tree::map_congruent_trees(
                    &existing.last_block().tree,
                    &seqids,
                    &pruned,
                    &seqids,
                );
                existing.push_block(pruned, Spr::NULL, mapping, block.blocklen)?;
            }
        }
    }
    let mut result = result.ok_or_else(|| ArgweaverError::invariant("LocalTrees has no blocks"))?;
    result.remove_null_sprs();
    Ok(result)
}

/// Remove leaf `leaf_pos` from `tree`, collapsing its parent and
/// renumbering the arena to stay contiguous (inverse of
/// [`LocalTree::insert_leaf`]).
fn prune_leaf(tree: &LocalTree, leaf_pos: usize) -> Result<LocalTree> {
    let n = tree.num_leaves();
    if n < 2 {
        return Err(ArgweaverError::invariant("cannot remove a leaf from a tree with fewer than 2 leaves"));
    }
    let leaf = NodeIndex::from(leaf_pos);
    let parent = tree.parent(leaf);
    let sibling = tree.sibling(leaf);
    let grandparent = tree.parent(parent);

    // Every surviving node's age (by old index), and a placeholder for the
    // two removed slots (`leaf` and `parent`).
    let mut survivors: Vec<(NodeIndex, LocalNode)> = Vec::with_capacity(2 * n - 3);
    for i in 0..tree.num_nodes() {
        let v = NodeIndex::from(i);
        if v == leaf || v == parent {
            continue;
        }
        let mut node = LocalNode {
            parent: tree.parent(v),
            child: tree.children(v),
            age: tree.age(v),
        };
        // `sibling`'s parent becomes `grandparent` directly; anyone who had
        // `parent` as a child (only `grandparent`, if it survives) now
        // points at `sibling` instead.
        if node.parent == parent {
            node.parent = grandparent;
        }
        if node.child[0] == parent {
            node.child[0] = sibling;
        }
        if node.child[1] == parent {
            node.child[1] = sibling;
        }
        survivors.push((v, node));
    }

    // New leaf indices must be the old leaf indices minus the removed one,
    // in order, occupying `0..n-2`; new internal indices follow, also in
    // their old relative order.
    let new_n = n - 1;
    let old_leaves: Vec<NodeIndex> = (0..n).map(NodeIndex::from).filter(|&v| v != leaf).collect();
    let old_internals: Vec<NodeIndex> = (n..tree.num_nodes())
        .map(NodeIndex::from)
        .filter(|&v| v != parent)
        .collect();

    let mut remap = vec![NodeIndex::NULL; tree.num_nodes()];
    for (new_idx, &old) in old_leaves.iter().enumerate() {
        remap[old.index()] = NodeIndex::from(new_idx);
    }
    for (new_idx, &old) in old_internals.iter().enumerate() {
        remap[old.index()] = NodeIndex::from(new_n + new_idx);
    }

    let placeholder = LocalNode {
        parent: NodeIndex::NULL,
        child: [NodeIndex::NULL; 2],
        age: crate::newtypes::TimeIdx::NULL,
    };
    let mut nodes = vec![placeholder; 2 * new_n - 1];
    for (old, mut node) in survivors {
        let new_idx = remap[old.index()];
        if !node.parent.is_null() {
            node.parent = remap[node.parent.index()];
        }
        if !node.child[0].is_null() {
            node.child[0] = remap[node.child[0].index()];
        }
        if !node.child[1].is_null() {
            node.child[1] = remap[node.child[1].index()];
        }
        nodes[new_idx.index()] = node;
    }

    LocalTree::from_nodes(nodes, new_n, tree_k_minus_1(tree))
}

/// Recovers the `k_minus_1` grid bound used to originally validate `tree`,
/// by finding the highest age any node sits at. `LocalTree` does not store
/// this value directly, so pruning must pass a bound at least as high as
/// every remaining node's age; the tree's own maximum age always qualifies
/// since no internal node can already sit at `k_minus_1`.
fn tree_k_minus_1(tree: &LocalTree) -> u32 {
    (0..tree.num_nodes())
        .map(|i| tree.age(NodeIndex::from(i)).0)
        .max()
        .unwrap_or(0)
        + 1
}
