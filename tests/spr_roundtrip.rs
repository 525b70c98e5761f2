//! `spec.md §8`, invariant 7: applying an `Spr` then its inverse restores
//! the starting tree. Since the arena mutates in place, a correctly built
//! inverse restores every node's parent/child/age fields exactly; child
//! order within a node can differ (both orderings are the same topology),
//! so comparison is done structurally rather than by raw `Vec` equality.

use argweaver::{LocalNode, LocalTree, NodeIndex, Spr, TimeIdx};

fn four_leaf_tree() -> LocalTree {
    // ((0,1)4, (2,3)5)6
    let nodes = vec![
        LocalNode { parent: NodeIndex(4), child: [NodeIndex::NULL; 2], age: TimeIdx(0) },
        LocalNode { parent: NodeIndex(4), child: [NodeIndex::NULL; 2], age: TimeIdx(0) },
        LocalNode { parent: NodeIndex(5), child: [NodeIndex::NULL; 2], age: TimeIdx(0) },
        LocalNode { parent: NodeIndex(5), child: [NodeIndex::NULL; 2], age: TimeIdx(0) },
        LocalNode { parent: NodeIndex(6), child: [NodeIndex(0), NodeIndex(1)], age: TimeIdx(2) },
        LocalNode { parent: NodeIndex(6), child: [NodeIndex(2), NodeIndex(3)], age: TimeIdx(3) },
        LocalNode { parent: NodeIndex::NULL, child: [NodeIndex(4), NodeIndex(5)], age: TimeIdx(6) },
    ];
    LocalTree::from_nodes(nodes, 4, 10).unwrap()
}

fn structurally_equal(a: &LocalTree, b: &LocalTree) -> bool {
    fn go(a: &LocalTree, va: NodeIndex, b: &LocalTree, vb: NodeIndex) -> bool {
        if a.is_leaf(va) != b.is_leaf(vb) {
            return false;
        }
        if a.age(va) != b.age(vb) {
            return false;
        }
        if a.is_leaf(va) {
            return va == vb;
        }
        let [a0, a1] = a.children(va);
        let [b0, b1] = b.children(vb);
        (go(a, a0, b, b0) && go(a, a1, b, b1)) || (go(a, a0, b, b1) && go(a, a1, b, b0))
    }
    a.num_leaves() == b.num_leaves() && go(a, a.root(), b, b.root())
}

#[test]
fn spr_then_its_inverse_restores_the_original_tree() {
    let original = four_leaf_tree();
    let mut tree = original.clone();

    // Move leaf 0 off of its cherry (sibling 1) and regraft it onto the
    // branch above leaf 2.
    let forward = Spr {
        recomb_node: NodeIndex(0),
        recomb_time: TimeIdx(1),
        coal_node: NodeIndex(2),
        coal_time: TimeIdx(1),
    };
    assert!(forward.is_valid(&tree));
    tree.apply_spr(&forward).unwrap();
    assert!(!structurally_equal(&tree, &original));

    // Invert: move leaf 0 back, regrafting onto its original sibling (1)
    // at the original cherry height (2).
    let inverse = Spr {
        recomb_node: NodeIndex(0),
        recomb_time: TimeIdx(1),
        coal_node: NodeIndex(1),
        coal_time: TimeIdx(2),
    };
    assert!(inverse.is_valid(&tree));
    tree.apply_spr(&inverse).unwrap();

    assert!(structurally_equal(&tree, &original));
}

#[test]
fn null_spr_is_a_no_op() {
    let original = four_leaf_tree();
    let mut tree = original.clone();
    tree.apply_spr(&Spr::NULL).unwrap();
    assert!(structurally_equal(&tree, &original));
}
