//! `spec.md §8`: invariant 3 (`Σ blocklen == end - start`) and S6 (split at
//! an interior point, reconcatenate through an empty middle, and recover
//! the original `LocalTrees` after `remove_null_sprs`).

use argweaver::{LocalNode, LocalTree, LocalTrees, NodeIndex, SeqId, TimeIdx};

fn cherry(blocklen: u32) -> LocalTree {
    let nodes = vec![
        LocalNode { parent: NodeIndex(2), child: [NodeIndex::NULL; 2], age: TimeIdx(0) },
        LocalNode { parent: NodeIndex(2), child: [NodeIndex::NULL; 2], age: TimeIdx(0) },
        LocalNode { parent: NodeIndex::NULL, child: [NodeIndex(0), NodeIndex(1)], age: TimeIdx(3) },
    ];
    let _ = blocklen;
    LocalTree::from_nodes(nodes, 2, 10).unwrap()
}

fn two_leaf_trees(start: u64, blocklen: u32) -> LocalTrees {
    let seqids = vec![SeqId::from(0usize), SeqId::from(1usize)];
    LocalTrees::new(seqids, start, cherry(blocklen), blocklen).unwrap()
}

#[test]
fn blocklen_sums_to_the_coordinate_span() {
    let trees = two_leaf_trees(0, 200);
    let total: u64 = trees.blocks().iter().map(|b| b.blocklen as u64).sum();
    assert_eq!(total, trees.end_coord() - trees.start_coord());
}

#[test]
fn split_then_reconcatenate_through_an_empty_middle_recovers_the_original() {
    let trees = two_leaf_trees(0, 100);

    let (before, middle, after) = argweaver::local_trees::partition_local_trees(&trees, 40, 40).unwrap();
    assert!(middle.is_none());
    let before = before.unwrap();
    let after = after.unwrap();

    let mut rejoined = argweaver::local_trees::append_local_trees(before, after).unwrap();
    rejoined.remove_null_sprs();

    assert_eq!(rejoined.start_coord(), trees.start_coord());
    assert_eq!(rejoined.end_coord(), trees.end_coord());
    assert_eq!(rejoined.num_blocks(), 1);
    assert_eq!(rejoined.block(0.into()).blocklen, trees.block(argweaver::BlockIndex::from(0usize)).blocklen);
}

#[test]
fn validate_accepts_a_freshly_built_local_trees() {
    let trees = two_leaf_trees(10, 50);
    trees.validate().unwrap();
}
