//! `LocalTrees`: the ordered sequence of local trees spanning a chromosome
//! (`spec.md §3`, "LocalTrees").
//!
//! Adjacent blocks are connected either by a null SPR (the tree is
//! unchanged; `mapping` must be a bijection) or by a concrete SPR (the next
//! block's tree is the result of applying that SPR to the previous block's
//! tree). Because this crate re-expresses trees as index-preserving arenas
//! (`spec.md §9`), a Sampler-driven SPR transition keeps every node at the
//! same [`NodeIndex`] it had before the regraft — the arena mutates in
//! place, it does not relabel. The general, possibly-partial mapping
//! (`map_congruent_trees`, which can leave a node unmapped) is reserved for
//! splices performed by [`append_local_trees`], where two independently
//! built trees are glued together and node indices do not already align.

use crate::error::{ArgweaverError, Result};
use crate::newtypes::{BlockIndex, NodeIndex, SeqId};
use crate::tree::{map_congruent_trees, LocalTree, Spr};

/// One maximal genomic interval over which the local tree is constant
/// (`spec.md §3`, "Block").
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Block {
    pub tree: LocalTree,
    /// The SPR connecting this block to its predecessor; null for the
    /// first block in a `LocalTrees`.
    pub spr: Spr,
    /// Node mapping from the *previous* block's tree into this one. Empty
    /// for the first block.
    pub mapping: Vec<NodeIndex>,
    pub blocklen: u32,
}

impl Block {
    fn first(tree: LocalTree, blocklen: u32) -> Self {
        Block {
            tree,
            spr: Spr::NULL,
            mapping: Vec::new(),
            blocklen,
        }
    }
}

/// The ordered sequence of local trees spanning `[start_coord, end_coord)`
/// on one chromosome, plus the leaf-to-sequence-id permutation shared by
/// every block (`spec.md §3`).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocalTrees {
    blocks: Vec<Block>,
    start_coord: u64,
    seqids: Vec<SeqId>,
}

impl LocalTrees {
    pub fn new(seqids: Vec<SeqId>, start_coord: u64, first_tree: LocalTree, first_blocklen: u32) -> Result<Self> {
        if first_tree.num_leaves() != seqids.len() {
            return Err(ArgweaverError::invariant(
                "tree leaf count does not match seqids length",
            ));
        }
        if first_blocklen == 0 {
            return Err(ArgweaverError::invariant("block length must be positive"));
        }
        Ok(LocalTrees {
            blocks: vec![Block::first(first_tree, first_blocklen)],
            start_coord,
            seqids,
        })
    }

    pub fn num_leaves(&self) -> usize {
        self.seqids.len()
    }

    pub fn seqids(&self) -> &[SeqId] {
        &self.seqids
    }

    pub fn start_coord(&self) -> u64 {
        self.start_coord
    }

    pub fn end_coord(&self) -> u64 {
        self.start_coord + self.blocks.iter().map(|b| b.blocklen as u64).sum::<u64>()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, i: BlockIndex) -> &Block {
        &self.blocks[i.index()]
    }

    pub fn last_block(&self) -> &Block {
        self.blocks.last().expect("LocalTrees is never empty")
    }

    /// Append a new block transitioning from the current last block via
    /// `spr` (non-null) or extending it via a null SPR with an explicit
    /// bijection `mapping`.
    pub fn push_block(&mut self, tree: LocalTree, spr: Spr, mapping: Vec<NodeIndex>, blocklen: u32) -> Result<()> {
        if blocklen == 0 {
            return Err(ArgweaverError::invariant("block length must be positive"));
        }
        if tree.num_leaves() != self.num_leaves() {
            return Err(ArgweaverError::invariant(
                "pushed tree's leaf count does not match LocalTrees",
            ));
        }
        self.blocks.push(Block {
            tree,
            spr,
            mapping,
            blocklen,
        });
        Ok(())
    }

    /// Start coordinate of each block, for locating the block containing a
    /// given chromosome position.
    fn block_start_coords(&self) -> Vec<u64> {
        let mut starts = Vec::with_capacity(self.blocks.len());
        let mut cur = self.start_coord;
        for b in &self.blocks {
            starts.push(cur);
            cur += b.blocklen as u64;
        }
        starts
    }

    /// The index of the block containing `pos` (`start_coord <= pos <
    /// end_coord`).
    pub fn block_at(&self, pos: u64) -> Result<BlockIndex> {
        if pos < self.start_coord || pos >= self.end_coord() {
            return Err(ArgweaverError::invariant(format!(
                "position {pos} outside [{}, {})",
                self.start_coord,
                self.end_coord()
            )));
        }
        let mut cur = self.start_coord;
        for (i, b) in self.blocks.iter().enumerate() {
            let next = cur + b.blocklen as u64;
            if pos < next {
                return Ok(BlockIndex::from(i));
            }
            cur = next;
        }
        unreachable!("pos checked to be within range above")
    }

    /// Validate every structural invariant in `spec.md §8.1-3`: block
    /// lengths sum to the coordinate span, and each adjacent block pair is
    /// either a null-SPR bijection or a legal SPR transition.
    pub fn validate(&self) -> Result<()> {
        if self.blocks.is_empty() {
            return Err(ArgweaverError::invariant("LocalTrees has no blocks"));
        }
        let first = &self.blocks[0];
        if !first.spr.is_null() || !first.mapping.is_empty() {
            return Err(ArgweaverError::invariant(
                "first block must have a null SPR and empty mapping",
            ));
        }
        for w in self.blocks.windows(2) {
            let (prev, cur) = (&w[0], &w[1]);
            if cur.spr.is_null() {
                if !is_bijection(&cur.mapping, prev.tree.num_nodes(), cur.tree.num_nodes()) {
                    return Err(ArgweaverError::invariant(
                        "null-SPR transition requires a bijective mapping",
                    ));
                }
                if !mapping_preserves_topology(&prev.tree, &cur.mapping, &cur.tree) {
                    return Err(ArgweaverError::invariant(
                        "null-SPR transition's mapping does not preserve topology",
                    ));
                }
            } else {
                if !cur.spr.is_valid(&prev.tree) {
                    return Err(ArgweaverError::invariant(
                        "SPR is not valid on the preceding block's tree",
                    ));
                }
                let mut expected = prev.tree.clone();
                expected.apply_spr(&cur.spr)?;
                if expected != cur.tree {
                    return Err(ArgweaverError::invariant(
                        "block's tree is not the result of applying its SPR to the predecessor",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Merge adjacent blocks whose connecting SPR is null into a single
    /// block, per `spec.md §3` ("trees with null SPR may be coalesced with
    /// their predecessor") and the round-trip property in `spec.md §8.6`.
    pub fn remove_null_sprs(&mut self) {
        let mut merged: Vec<Block> = Vec::with_capacity(self.blocks.len());
        for block in self.blocks.drain(..) {
            let should_merge = !merged.is_empty() && block.spr.is_null();
            if should_merge {
                let last = merged.last_mut().unwrap();
                last.blocklen += block.blocklen;
            } else {
                merged.push(block);
            }
        }
        self.blocks = merged;
    }
}

fn is_bijection(mapping: &[NodeIndex], prev_len: usize, cur_len: usize) -> bool {
    if mapping.len() != prev_len || prev_len != cur_len {
        return false;
    }
    let mut seen = vec![false; cur_len];
    for &m in mapping {
        if m.is_null() || m.index() >= cur_len || seen[m.index()] {
            return false;
        }
        seen[m.index()] = true;
    }
    true
}

fn mapping_preserves_topology(prev: &LocalTree, mapping: &[NodeIndex], cur: &LocalTree) -> bool {
    for i in 0..prev.num_nodes() {
        let v = NodeIndex::from(i);
        let u = mapping[i];
        if u.is_null() {
            continue;
        }
        if prev.age(v) != cur.age(u) {
            return false;
        }
        if prev.is_leaf(v) != cur.is_leaf(u) {
            return false;
        }
        let pv = prev.parent(v);
        let pu = cur.parent(u);
        if pv.is_null() != pu.is_null() {
            return false;
        }
        if !pv.is_null() {
            let mapped_parent = mapping[pv.index()];
            if mapped_parent != pu {
                return false;
            }
        }
    }
    true
}

/// Split `trees` at the two coordinates `a <= b`, both within
/// `[trees.start_coord(), trees.end_coord()]`, into three contiguous pieces
/// covering `[start, a)`, `[a, b)`, `[b, end)` (`spec.md §4.7`). A piece may
/// be empty (zero blocks) when its span is empty; an interior block is
/// cloned and split when `a` or `b` falls strictly inside it, connected by a
/// null SPR since the tree itself does not change at a clean split.
pub fn partition_local_trees(
    trees: &LocalTrees,
    a: u64,
    b: u64,
) -> Result<(Option<LocalTrees>, Option<LocalTrees>, Option<LocalTrees>)> {
    if a > b || a < trees.start_coord() || b > trees.end_coord() {
        return Err(ArgweaverError::invariant(format!(
            "partition bounds [{a}, {b}) outside [{}, {})",
            trees.start_coord(),
            trees.end_coord()
        )));
    }
    let (before, rest) = split_at(trees, a)?;
    let (middle, after) = match rest {
        Some(rest) => split_at(&rest, b)?,
        None => (None, None),
    };
    Ok((before, middle, after))
}

/// Split `trees` into `([start, pos), [pos, end))`. Either half may be
/// `None` if it would be empty.
fn split_at(trees: &LocalTrees, pos: u64) -> Result<(Option<LocalTrees>, Option<LocalTrees>)> {
    if pos <= trees.start_coord() {
        return Ok((None, Some(trees.clone())));
    }
    if pos >= trees.end_coord() {
        return Ok((Some(trees.clone()), None));
    }

    let starts = trees.block_start_coords();
    let idx = trees.block_at(pos)?.index();
    let block_start = starts[idx];
    let block = &trees.blocks[idx];

    let mut left_blocks = trees.blocks[..idx].to_vec();
    let mut right_blocks = trees.blocks[idx + 1..].to_vec();

    if pos == block_start {
        // Clean boundary: the whole block goes to the right half, becoming
        // its first block (so it starts with a null SPR and empty mapping).
        let mut right_first = block.clone();
        right_first.spr = Spr::NULL;
        right_first.mapping = Vec::new();
        right_blocks.insert(0, right_first);
    } else {
        // Split the block itself: same tree on both sides of `pos`.
        let left_len = (pos - block_start) as u32;
        let right_len = block.blocklen - left_len;
        let mut left_part = block.clone();
        left_part.blocklen = left_len;
        left_blocks.push(left_part);

        let mut right_part = Block::first(block.tree.clone(), right_len);
        right_part.spr = Spr::NULL;
        right_blocks.insert(0, right_part);
    }

    let left = if left_blocks.is_empty() {
        None
    } else {
        Some(LocalTrees {
            blocks: left_blocks,
            start_coord: trees.start_coord,
            seqids: trees.seqids.clone(),
        })
    };
    let right = if right_blocks.is_empty() {
        None
    } else {
        Some(LocalTrees {
            blocks: right_blocks,
            start_coord: pos,
            seqids: trees.seqids.clone(),
        })
    };
    Ok((left, right))
}

/// Concatenate `next` onto the end of `base` (`spec.md §4.7`).
/// `base.end_coord()` must equal `next.start_coord()`. The suture's mapping
/// is recomputed via [`map_congruent_trees`] (node indices across the two
/// independently built pieces need not already align), and a now-redundant
/// null SPR at the join is dropped by [`LocalTrees::remove_null_sprs`].
pub fn append_local_trees(mut base: LocalTrees, next: LocalTrees) -> Result<LocalTrees> {
    if base.end_coord() != next.start_coord() {
        return Err(ArgweaverError::invariant(format!(
            "cannot append LocalTrees spanning [{}, {}) onto one ending at {}",
            next.start_coord(),
            next.end_coord(),
            base.end_coord()
        )));
    }
    if base.seqids() != next.seqids() {
        return Err(ArgweaverError::invariant(
            "cannot append LocalTrees with a different leaf set",
        ));
    }

    let join_mapping = map_congruent_trees(
        &base.last_block().tree,
        base.seqids(),
        &next.blocks[0].tree,
        next.seqids(),
    );

    let mut next_blocks = next.blocks;
    next_blocks[0].spr = Spr::NULL;
    next_blocks[0].mapping = join_mapping;
    base.blocks.extend(next_blocks);

    base.remove_null_sprs();
    Ok(base)
}
