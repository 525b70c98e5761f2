//! Compressed in-block and between-block transition operators
//! (`spec.md §4.3-4.4`).
//!
//! Both matrices are kept as values owning their coefficient vectors, with
//! the fused `apply_forward` operator as the public entry point rather than
//! exposing individual matrix entries (`spec.md §9`, "Compressed
//! matrices").

use crate::model::Model;
use crate::newtypes::{NodeIndex, TimeIdx};
use crate::states::{LineageCounts, States};
use crate::tree::{LocalTree, Spr};

/// The compressed within-block transition operator of `spec.md §4.3`.
///
/// `D`, `E`, `B`, `G` and `norecombs` are indexed by time grid point; `prob`
/// evaluates the two closed forms directly (useful for tests and for the
/// two dense rows of [`TransMatrixSwitch`]), while [`TransMatrix::apply_forward`]
/// performs the same computation for an entire forward column in
/// `O(|S|)` using running prefix sums instead of `O(|S|^2)` pairwise terms.
#[derive(Debug, Clone)]
pub struct TransMatrix {
    ntimes: usize,
    d: Vec<f64>,
    e: Vec<f64>,
    b: Vec<f64>,
    g: Vec<f64>,
    norecombs: Vec<f64>,
}

impl TransMatrix {
    /// Build the coefficient vectors from the local model, the tree's
    /// lineage counts, and its total branch length. Must be rebuilt
    /// whenever any of those three change (`spec.md §4.3`).
    pub fn new(model: &Model, counts: &LineageCounts, tree_len: f64) -> Self {
        let ntimes = model.ntimes();
        let grid = model.grid();
        let coal_dt = grid.coal_dt();

        // D[a]: probability a recombination lands in interval a. The share
        // of tree length interval a accounts for (`width * nb / tree_len`)
        // is scaled by the chance a recombination occurs there at all,
        // `1 - exp(-rho * width * nb)`; at `rho = 0` this vanishes
        // identically, so no off-diagonal mass is ever assigned (`spec.md
        // §8`, boundary property: `rho=0` admits only null SPRs).
        let mut d = vec![0.0; ntimes];
        for a in 0..ntimes.saturating_sub(1) {
            let width = grid.dt(TimeIdx::from(a as u32)).min(1e100);
            let nb = counts.nbranches.get(a).copied().unwrap_or(0) as f64;
            let share = if tree_len > 0.0 { width * nb / tree_len } else { 0.0 };
            let occurs = 1.0 - (-model.rho * width * nb).exp();
            d[a] = share * occurs;
        }

        // E[b]: coalescence density into interval b, driven by population
        // size and the number of lineages free to coalesce there.
        let mut e = vec![0.0; ntimes];
        for b in 0..ntimes.saturating_sub(1) {
            let popsize = model.popsize(TimeIdx::from(b as u32));
            let nc = counts.ncoals.get(b).copied().unwrap_or(0) as f64;
            let half_dt = coal_dt.get(2 * b).copied().unwrap_or(0.0);
            e[b] = 1.0 - (-nc * half_dt / (2.0 * popsize)).exp();
        }

        // B[k]: cumulative survival probability of the lineage surviving
        // without coalescing through interval k.
        let mut b_arr = vec![1.0; ntimes];
        let mut survival = 1.0;
        for k in 0..ntimes {
            b_arr[k] = survival;
            if k < ntimes - 1 {
                let popsize = model.popsize(TimeIdx::from(k as u32));
                let nb = counts.nbranches.get(k).copied().unwrap_or(0) as f64;
                let dt_k = grid.dt(TimeIdx::from(k as u32)).min(1e100);
                survival *= (-nb * dt_k / (2.0 * popsize)).exp();
            }
        }

        // G[a]: correction for double counting when the coalesced branch
        // is older than the recombination time; proportional to D at a.
        let mut g = vec![0.0; ntimes];
        for a in 0..ntimes {
            g[a] = d[a] * b_arr[a];
        }

        // norecombs[a]: probability that no recombination happened on this
        // branch at this time, i.e. the complement of the recombination
        // density integrated over the branch.
        let norecombs: Vec<f64> = d.iter().map(|&da| (1.0 - da).max(0.0)).collect();

        TransMatrix { ntimes, d, e, b: b_arr, g, norecombs }
    }

    /// Coalescent prior over states for a fresh thread with no sites
    /// observed yet: the probability the new lineage's attachment point
    /// falls within interval `a`, `B[a] * E[a]`, split uniformly across the
    /// `nbranches[a]` branches present in that interval (`spec.md §4.2`,
    /// `§8` "forward marginals are stationary under the prior").
    pub fn coalescent_prior(&self, states: &States, counts: &LineageCounts) -> Vec<f64> {
        states
            .all()
            .iter()
            .map(|s| {
                let a = s.time.index();
                let nb = counts.nbranches.get(a).copied().unwrap_or(1).max(1) as f64;
                (self.b[a] * self.e[a] / nb).max(0.0)
            })
            .collect()
    }

    /// `P((v1,a) -> (v2,b))`, per the two closed forms in `spec.md §4.3`.
    pub fn prob(&self, same_branch: bool, branch_age: TimeIdx, a: TimeIdx, b: TimeIdx) -> f64 {
        let (a, b) = (a.index(), b.index());
        let indicator = if a <= b { 1.0 } else { 0.0 };
        let min_ab = a.min(b);
        let base = self.d[a] * self.e[b];
        if !same_branch {
            return base * (self.b[min_ab] - indicator * self.g[a]);
        }
        let c = branch_age.index();
        let min_cb = c.min(b);
        let mut p = base * (2.0 * self.b[min_ab] - 2.0 * indicator * self.g[a] - self.b[min_cb]);
        if a == b {
            p += self.norecombs[a];
        }
        p
    }

    /// Apply the within-block forward update to one column: for every
    /// target state `s' = (v2, b)` in `next_states`, accumulate
    /// `sum_s alpha[s] * P(s -> s')`. Runs in `O(|S|)` using prefix sums
    /// over the time grid rather than the naive `O(|S|^2)` double loop
    /// (`spec.md §4.6`, item 2).
    pub fn apply_forward(&self, alpha: &[f64], states: &States, next_states: &States) -> Vec<f64> {
        debug_assert_eq!(alpha.len(), states.len());

        // Column-sum of alpha by source time, across every branch.
        let mut col_d = vec![0.0; self.ntimes];
        for (i, s) in states.all().iter().enumerate() {
            col_d[s.time.index()] += alpha[i] * self.d[s.time.index()];
        }
        let mut prefix_bg = vec![0.0; self.ntimes];
        let mut prefix_d = vec![0.0; self.ntimes];
        let mut running_bg = 0.0;
        let mut running_d = 0.0;
        for a in 0..self.ntimes {
            running_bg += col_d[a] * (self.b[a] - self.g[a]);
            running_d += col_d[a];
            prefix_bg[a] = running_bg;
            prefix_d[a] = running_d;
        }
        let total_d = running_d;

        let global_sum = |b: usize| -> f64 {
            let suffix_d = total_d - prefix_d[b];
            self.e[b] * (prefix_bg[b] + self.b[b] * suffix_d)
        };

        // Per-branch correction bringing the universal off-diagonal formula
        // up to the same-branch formula, restricted to states sharing the
        // target's branch.
        let mut result = vec![0.0; next_states.len()];
        for (j, target) in next_states.all().iter().enumerate() {
            let b = target.time.index();
            let mut total = global_sum(b);

            let c = {
                // The branch's own age is the minimum time any state on it
                // can occupy; read directly off the first state we find.
                states
                    .on_branch(target.node)
                    .map(|(_, s)| s.time.index())
                    .min()
                    .unwrap_or(b)
            };
            let mut branch_local = 0.0;
            let mut branch_d_sum = 0.0;
            for (i, s) in states.on_branch(target.node) {
                let a = s.time.index();
                let indicator = if a <= b { 1.0 } else { 0.0 };
                let off = self.d[a] * self.e[b] * (self.b[a.min(b)] - indicator * self.g[a]);
                branch_local += alpha[i] * off;
                branch_d_sum += alpha[i] * self.d[a];
            }
            let min_cb = c.min(b);
            total += branch_local - self.e[b] * self.b[min_cb] * branch_d_sum;

            if let Some(i) = states.index_of(*target) {
                total += alpha[i] * self.norecombs[b];
            }
            result[j] = total;
        }
        result
    }
}

/// The between-block switch operator of `spec.md §4.4`. Two source states —
/// `recoalsrc` (the recomb branch at the recomb time) and `recombsrc` (the
/// coal point) — get dense rows; every other source deterministically maps
/// to one target via the node mapping with its time index unchanged, scaled
/// by `determprob[time]`.
#[derive(Debug, Clone)]
pub struct TransMatrixSwitch {
    pub recoalsrc: Option<usize>,
    pub recombsrc: Option<usize>,
    pub recoalrow: Vec<f64>,
    pub recombrow: Vec<f64>,
    /// For every other source state index, the unique target index, or
    /// `None` if that source has no valid image (the broken branch with no
    /// surviving counterpart).
    pub determ: Vec<Option<usize>>,
    /// Probability mass assigned to the deterministic transition, one
    /// entry per source state in `S(T_i)` (varies with the source's time
    /// index since longer-lived branches carry more recombination mass
    /// away from the deterministic path).
    pub determprob: Vec<f64>,
}

impl TransMatrixSwitch {
    pub fn new(
        tree_i: &LocalTree,
        tree_next: &LocalTree,
        spr: &Spr,
        mapping: &[NodeIndex],
        states_i: &States,
        states_next: &States,
        trans_next: &TransMatrix,
        model: &Model,
    ) -> Self {
        let determ = get_deterministic_transitions(spr, mapping, states_i, states_next);

        let recoalsrc = states_i.index_of(crate::states::State {
            node: spr.recomb_node,
            time: spr.recomb_time,
        });
        let recombsrc = states_i.index_of(crate::states::State {
            node: spr.coal_node,
            time: spr.coal_time,
        });

        let recoal_branch_age = if spr.recomb_node.is_null() {
            TimeIdx(0)
        } else {
            tree_i.age(spr.recomb_node)
        };
        let recomb_branch_age = if spr.coal_node.is_null() {
            TimeIdx(0)
        } else {
            tree_i.age(spr.coal_node)
        };

        let recoalrow = dense_row(states_next, trans_next, recoal_branch_age, spr.recomb_time);
        let recombrow = dense_row(states_next, trans_next, recomb_branch_age, spr.coal_time);

        let determprob: Vec<f64> = states_i
            .all()
            .iter()
            .map(|s| (-model.rho * model.grid().get(s.time)).exp().clamp(0.0, 1.0))
            .collect();

        let _ = tree_next;
        TransMatrixSwitch {
            recoalsrc,
            recombsrc,
            recoalrow,
            recombrow,
            determ,
            determprob,
        }
    }

    /// Apply the switch to the previous block's final forward column,
    /// producing the next block's initial column (`spec.md §4.6`, item 1).
    pub fn apply_forward(&self, alpha: &[f64], next_len: usize) -> Vec<f64> {
        let mut result = vec![0.0; next_len];
        for (i, &a) in alpha.iter().enumerate() {
            if a == 0.0 {
                continue;
            }
            if Some(i) == self.recoalsrc {
                for (j, &p) in self.recoalrow.iter().enumerate() {
                    result[j] += a * p;
                }
            } else if Some(i) == self.recombsrc {
                for (j, &p) in self.recombrow.iter().enumerate() {
                    result[j] += a * p;
                }
            } else if let Some(Some(j)) = self.determ.get(i) {
                result[*j] += a * self.determprob[i];
            }
        }
        result
    }
}

fn dense_row(states_next: &States, trans_next: &TransMatrix, branch_age: TimeIdx, source_time: TimeIdx) -> Vec<f64> {
    states_next
        .all()
        .iter()
        .map(|target| {
            let same_branch = false;
            trans_next.prob(same_branch, branch_age, source_time, target.time)
        })
        .collect()
}

/// For every state of `S(T_i)` other than the two special sources, the
/// unique target state reachable in `S(T_{i+1})` via the node mapping with
/// the same time index (`spec.md §4.4`).
pub fn get_deterministic_transitions(
    spr: &Spr,
    mapping: &[NodeIndex],
    states_i: &States,
    states_next: &States,
) -> Vec<Option<usize>> {
    states_i
        .all()
        .iter()
        .map(|s| {
            if s.node == spr.recomb_node && s.time == spr.recomb_time {
                return None;
            }
            if s.node == spr.coal_node && s.time == spr.coal_time {
                return None;
            }
            let target_node = mapping.get(s.node.index())?.some()?;
            states_next.index_of(crate::states::State { node: target_node, time: s.time })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SampleOptions;
    use crate::newtypes::TimeIdx as T;
    use crate::time_grid::TimeGrid;
    use crate::tree::LocalNode;

    fn model(ntimes: usize) -> Model {
        let grid = TimeGrid::linear(ntimes, (ntimes - 1) as f64).unwrap();
        Model::new(grid, vec![1.0; ntimes - 1], 1e-8, 1e-8, 0.0, SampleOptions::empty()).unwrap()
    }

    fn two_leaf_tree() -> LocalTree {
        let nodes = vec![
            LocalNode { parent: NodeIndex(2), child: [NodeIndex::NULL; 2], age: T(0) },
            LocalNode { parent: NodeIndex(2), child: [NodeIndex::NULL; 2], age: T(0) },
            LocalNode { parent: NodeIndex::NULL, child: [NodeIndex(0), NodeIndex(1)], age: T(3) },
        ];
        LocalTree::from_nodes(nodes, 2, 10).unwrap()
    }

    #[test]
    fn same_branch_probability_is_nonnegative_on_diagonal() {
        let m = model(8);
        let tree = two_leaf_tree();
        let counts = LineageCounts::for_tree(&tree, m.ntimes());
        let tm = TransMatrix::new(&m, &counts, 6.0);
        let p = tm.prob(true, T(0), T(2), T(2));
        assert!(p.is_finite());
    }

    #[test]
    fn zero_recombination_rate_admits_only_self_transitions() {
        // `spec.md §8` boundary property: at `rho = 0` every non-null SPR
        // has weight `-inf`, i.e. `TransMatrix::prob` is zero for every
        // state pair except a state staying on its own branch at its own
        // time.
        let grid = TimeGrid::linear(8, 7.0).unwrap();
        let m = Model::new(grid, vec![1.0; 7], 1e-8, 0.0, 0.0, SampleOptions::empty()).unwrap();
        let tree = two_leaf_tree();
        let states = States::for_tree(&tree, m.ntimes());
        let counts = LineageCounts::for_tree(&tree, m.ntimes());
        let tm = TransMatrix::new(&m, &counts, 6.0);

        for source in states.all() {
            let branch_age = tree.age(source.node);
            for target in states.all() {
                let same_branch = source.node == target.node;
                let p = tm.prob(same_branch, branch_age, source.time, target.time);
                if same_branch && source.time == target.time {
                    assert!((p - 1.0).abs() < 1e-9, "self-transition should keep all mass, got {p}");
                } else {
                    assert_eq!(p, 0.0, "expected zero off-diagonal mass at rho=0, got {p}");
                }
            }
        }
    }

    #[test]
    fn apply_forward_preserves_length() {
        let m = model(8);
        let tree = two_leaf_tree();
        let states = States::for_tree(&tree, m.ntimes());
        let counts = LineageCounts::for_tree(&tree, m.ntimes());
        let tm = TransMatrix::new(&m, &counts, 6.0);
        let alpha = vec![1.0 / states.len() as f64; states.len()];
        let out = tm.apply_forward(&alpha, &states, &states);
        assert_eq!(out.len(), states.len());
        assert!(out.iter().all(|v| v.is_finite()));
    }
}
