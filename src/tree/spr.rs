//! A single Subtree-Prune-Regraft operation (`spec.md §3`, "Spr").

use crate::newtypes::{NodeIndex, TimeIdx};
use crate::tree::LocalTree;

/// `(recomb_node, recomb_time, coal_node, coal_time)`.
///
/// The null SPR (all four fields sentinel) denotes the identity operation
/// between two adjacent blocks whose local tree does not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Spr {
    pub recomb_node: NodeIndex,
    pub recomb_time: TimeIdx,
    pub coal_node: NodeIndex,
    pub coal_time: TimeIdx,
}

impl Spr {
    pub const NULL: Spr = Spr {
        recomb_node: NodeIndex::NULL,
        recomb_time: TimeIdx::NULL,
        coal_node: NodeIndex::NULL,
        coal_time: TimeIdx::NULL,
    };

    pub fn is_null(&self) -> bool {
        self.recomb_node.is_null()
    }

    /// Validity on tree `tree`, per `spec.md §3`:
    /// `age(recomb_node) <= recomb_time <= age(parent(recomb_node))`,
    /// `age(coal_node) <= coal_time <= age(parent(coal_node))` (no upper
    /// check when `coal_node` is root), and `recomb_time <= coal_time`.
    pub fn is_valid(&self, tree: &LocalTree) -> bool {
        if self.is_null() {
            return true;
        }
        let r = self.recomb_node;
        let c = self.coal_node;
        if r.index() >= tree.num_nodes() || c.index() >= tree.num_nodes() {
            return false;
        }
        if r == tree.root() {
            // The root has no parent to prune from.
            return false;
        }
        let r_age = tree.age(r);
        let r_parent_age = tree.age(tree.parent(r));
        if !(r_age <= self.recomb_time && self.recomb_time <= r_parent_age) {
            return false;
        }
        let c_age = tree.age(c);
        if !(c_age <= self.coal_time) {
            return false;
        }
        if tree.parent(c) != NodeIndex::NULL {
            let c_parent_age = tree.age(tree.parent(c));
            if !(self.coal_time <= c_parent_age) {
                return false;
            }
        }
        self.recomb_time <= self.coal_time
    }
}

impl Default for Spr {
    fn default() -> Self {
        Spr::NULL
    }
}
