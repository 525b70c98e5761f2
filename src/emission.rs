//! Per-site likelihood of a sequence column given a (branch, time) state
//! (`spec.md §4.5`).
//!
//! Emission is the standard Felsenstein pruning likelihood under a
//! Jukes-Cantor-like symmetric substitution model, evaluated at an arbitrary
//! point along a branch rather than only at existing nodes: an "inside"
//! likelihood vector (the column restricted to the attachment branch's
//! subtree) and an "outside" vector (everything else, propagated down from
//! the root) are combined at the candidate attachment point.

use crate::error::{ArgweaverError, Result};
use crate::model::Model;
use crate::newtypes::{NodeIndex, TimeIdx};
use crate::states::{State, States};
use crate::tree::LocalTree;

/// `N`, a masked position, or any IUPAC ambiguity code collapses to this:
/// the column contributes a neutral `1.0` likelihood regardless of state.
pub const AMBIGUOUS: u8 = u8::MAX;

/// A single sequence column, one base (or [`AMBIGUOUS`]) per leaf, indexed
/// `0..alphabet_size` (`4` for phased `ACGT`, `2` for unphased `{0,1}`).
pub type Column = [u8];

/// Evaluates emission probabilities for one model/tree/column combination.
pub struct Emission<'a> {
    model: &'a Model,
    alphabet: usize,
}

impl<'a> Emission<'a> {
    pub fn new(model: &'a Model) -> Self {
        let alphabet = if model.unphased() { 2 } else { 4 };
        Emission { model, alphabet }
    }

    /// Emission probability of `column` (the existing tree's leaves) and
    /// `query_base` (the thread's own base at this site) for every state in
    /// `states`, linear (not log) space. `spec.md §4.5`'s infinite-sites
    /// penalty is folded in as a log-space subtraction when
    /// `model.infsites()` is set and the column requires more than one
    /// mutation against `tree`.
    pub fn column(&self, tree: &LocalTree, states: &States, column: &Column, query_base: u8) -> Result<Vec<f64>> {
        if column.len() != tree.num_leaves() {
            return Err(ArgweaverError::invariant(format!(
                "column has {} entries for a tree with {} leaves",
                column.len(),
                tree.num_leaves()
            )));
        }

        let inside = self.inside_likelihoods(tree, column);
        let outside = self.outside_likelihoods(tree, &inside);

        let infsites_penalty = if self.model.infsites() && fitch_min_mutations(tree, column) > 1 {
            self.model.infsites_penalty
        } else {
            0.0
        };

        let mut out = Vec::with_capacity(states.len());
        for state in states.all() {
            let mut p = self.state_likelihood(tree, &inside, &outside, *state, query_base);
            if infsites_penalty != 0.0 {
                p = (p.max(f64::MIN_POSITIVE).ln() - infsites_penalty).exp();
            }
            out.push(p);
        }
        Ok(out)
    }

    /// Bottom-up Felsenstein partial likelihoods: `inside[v][x]` is the
    /// probability of everything below `v` given `v`'s state is `x`.
    fn inside_likelihoods(&self, tree: &LocalTree, column: &Column) -> Vec<Vec<f64>> {
        let mut inside = vec![vec![1.0; self.alphabet]; tree.num_nodes()];
        for v in tree.postorder() {
            if tree.is_leaf(v) {
                let base = column[v.index()];
                inside[v.index()] = self.leaf_vector(base);
                continue;
            }
            let [c0, c1] = tree.children(v);
            let dt0 = self.branch_dt(tree, c0, v);
            let dt1 = self.branch_dt(tree, c1, v);
            let l0 = propagate(&inside[c0.index()], self.model.mu, dt0, self.alphabet);
            let l1 = propagate(&inside[c1.index()], self.model.mu, dt1, self.alphabet);
            inside[v.index()] = (0..self.alphabet).map(|x| l0[x] * l1[x]).collect();
        }
        inside
    }

    /// Top-down "outside" likelihoods: `outside[v][x]` is the probability
    /// of everything *not* below `v`, given `v`'s state is `x`. The root has
    /// no outside constraint (uniform).
    fn outside_likelihoods(&self, tree: &LocalTree, inside: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let mut outside = vec![vec![1.0; self.alphabet]; tree.num_nodes()];
        let mut stack = vec![tree.root()];
        while let Some(v) = stack.pop() {
            if tree.is_leaf(v) {
                continue;
            }
            let [c0, c1] = tree.children(v);
            for (child, sibling) in [(c0, c1), (c1, c0)] {
                let dt_sib = self.branch_dt(tree, sibling, v);
                let sib_up = propagate(&inside[sibling.index()], self.model.mu, dt_sib, self.alphabet);
                let combined_at_v: Vec<f64> = (0..self.alphabet)
                    .map(|x| outside[v.index()][x] * sib_up[x])
                    .collect();
                let dt_child = self.branch_dt(tree, child, v);
                outside[child.index()] = propagate(&combined_at_v, self.model.mu, dt_child, self.alphabet);
                stack.push(child);
            }
        }
        outside
    }

    /// Likelihood of the column given the new lineage attaches above branch
    /// `state.node` at time `state.time`: combine the subtree-below
    /// likelihood and the outside likelihood, both propagated up to the
    /// attachment point, with the query leaf's own pendant branch back to
    /// the present.
    fn state_likelihood(
        &self,
        tree: &LocalTree,
        inside: &[Vec<f64>],
        outside: &[Vec<f64>],
        state: State,
        query_base: u8,
    ) -> f64 {
        let v = state.node;
        let dt_below = self.model.grid().get(state.time) - self.model.grid().get(tree.age(v));
        let inside_at_i = propagate(&inside[v.index()], self.model.mu, dt_below.max(0.0), self.alphabet);

        let outside_at_i = if v == tree.root() {
            vec![1.0; self.alphabet]
        } else {
            let parent_age = self.model.grid().get(tree.age(tree.parent(v)));
            let dt_above = (parent_age - self.model.grid().get(state.time)).max(0.0);
            propagate(&outside[v.index()], self.model.mu, dt_above, self.alphabet)
        };

        // The query leaf's own age is 0; its pendant branch spans from the
        // present up to the attachment time.
        let query_vector = self.leaf_vector(query_base);
        let query_up = propagate(&query_vector, self.model.mu, self.model.grid().get(state.time), self.alphabet);

        let sum: f64 = (0..self.alphabet)
            .map(|x| inside_at_i[x] * outside_at_i[x] * query_up[x])
            .sum();
        sum / self.alphabet as f64
    }

    fn leaf_vector(&self, base: u8) -> Vec<f64> {
        if base == AMBIGUOUS || base as usize >= self.alphabet {
            vec![1.0; self.alphabet]
        } else {
            (0..self.alphabet).map(|x| if x == base as usize { 1.0 } else { 0.0 }).collect()
        }
    }

    fn branch_dt(&self, tree: &LocalTree, child: NodeIndex, parent: NodeIndex) -> f64 {
        self.model.grid().get(tree.age(parent)) - self.model.grid().get(tree.age(child))
    }
}

/// Propagate a likelihood vector across a branch of length `dt` under the
/// `k`-state Jukes-Cantor-like symmetric model with mutation rate `mu`.
fn propagate(v: &[f64], mu: f64, dt: f64, k: usize) -> Vec<f64> {
    let kf = k as f64;
    let (p_same, p_diff) = jc_probs(mu, dt, kf);
    (0..k)
        .map(|x| {
            (0..k)
                .map(|y| if x == y { p_same } else { p_diff } * v[y])
                .sum()
        })
        .collect()
}

/// `(P(stay), P(change to a specific other state))` under the symmetric
/// `k`-state model: `P(stay) = 1/k + (k-1)/k * exp(-k*mu*dt/(k-1))`.
fn jc_probs(mu: f64, dt: f64, k: f64) -> (f64, f64) {
    if !dt.is_finite() {
        return (1.0 / k, 1.0 / k);
    }
    let exp_term = (-k * mu * dt / (k - 1.0)).exp();
    let p_same = 1.0 / k + (k - 1.0) / k * exp_term;
    let p_diff = 1.0 / k - exp_term / k;
    (p_same, p_diff)
}

/// Minimum number of mutations required by `column` on `tree`'s topology,
/// by the Fitch small-parsimony algorithm, used for the infinite-sites
/// penalty (`spec.md §4.5`).
fn fitch_min_mutations(tree: &LocalTree, column: &Column) -> u32 {
    let mut sets: Vec<Option<u32>> = vec![None; tree.num_nodes()]; // bitmask over bases
    let mut mutations = 0u32;
    for v in tree.postorder() {
        if tree.is_leaf(v) {
            let base = column[v.index()];
            sets[v.index()] = if base == AMBIGUOUS { None } else { Some(1 << base) };
            continue;
        }
        let [c0, c1] = tree.children(v);
        let (s0, s1) = (sets[c0.index()], sets[c1.index()]);
        sets[v.index()] = match (s0, s1) {
            (Some(a), Some(b)) => {
                let inter = a & b;
                if inter != 0 {
                    Some(inter)
                } else {
                    mutations += 1;
                    Some(a | b)
                }
            }
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
    }
    mutations
}
