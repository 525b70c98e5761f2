//! Forward DP, stochastic traceback, and SPR application for threading one
//! new lineage through an existing ARG (`spec.md §4.6`).
//!
//! Simplification relative to the full algorithm: block boundaries are
//! resolved one at a time using the single switch connecting two adjacent
//! residual blocks. A sampled path that crosses more than one residual
//! block boundary between two consecutive sites is handled by re-inserting
//! the thread fresh into the new block's tree rather than chaining several
//! [`TransMatrixSwitch`] applications; see `DESIGN.md` for the rationale.
//! This keeps the common cases in `spec.md §8`'s scenarios (a handful of
//! blocks, one recombination) exact while trading precision on deeply
//! nested multi-boundary windows.

use rand::Rng;

use crate::emission::Emission;
use crate::error::{ArgweaverError, Result};
use crate::local_trees::LocalTrees;
use crate::model::Model;
use crate::newtypes::{NodeIndex, SeqId, TimeIdx};
use crate::states::{LineageCounts, State, States};
use crate::tree::{map_congruent_trees, LocalTree, Spr};
use crate::trans_matrix::{TransMatrix, TransMatrixSwitch};

/// One observed site: its genomic position, the existing leaves' column
/// (in the residual ARG's leaf order), and the thread's own base.
#[derive(Debug, Clone)]
pub struct SiteRecord {
    pub pos: u64,
    pub column: Vec<u8>,
    pub query_base: u8,
}

struct ForwardColumn {
    pos: u64,
    block_idx: usize,
    states: States,
    log_alpha: Vec<f64>,
}

/// Runs the threading HMM for one candidate lineage against a `LocalTrees`
/// that does not yet contain it.
pub struct Sampler<'a> {
    model: &'a Model,
}

impl<'a> Sampler<'a> {
    pub fn new(model: &'a Model) -> Self {
        Sampler { model }
    }

    /// Thread a new lineage (external id `seqid`) through `residual` given
    /// its sites, returning the `LocalTrees` with the lineage inserted.
    #[tracing::instrument(level = "debug", skip(self, residual, sites, rng), fields(seqid = seqid.0, num_sites = sites.len()))]
    pub fn sample_thread(
        &self,
        residual: &LocalTrees,
        sites: &[SiteRecord],
        seqid: SeqId,
        rng: &mut impl Rng,
    ) -> Result<LocalTrees> {
        if sites.is_empty() {
            return Err(ArgweaverError::invariant("cannot thread a lineage with no sites"));
        }
        for w in sites.windows(2) {
            if w[1].pos <= w[0].pos {
                return Err(ArgweaverError::format(
                    "sites",
                    "site positions must be strictly increasing",
                ));
            }
        }

        let columns = self.forward_pass(residual, sites)?;
        tracing::debug!(num_columns = columns.len(), "forward pass complete");
        let path = self.traceback(residual, &columns, rng)?;
        self.path_to_local_trees(residual, &path, sites, seqid)
    }

    fn forward_pass(&self, residual: &LocalTrees, sites: &[SiteRecord]) -> Result<Vec<ForwardColumn>> {
        let mut columns = Vec::with_capacity(sites.len());

        let first_block_idx = residual.block_at(sites[0].pos)?.index();
        let first_tree = &residual.block(first_block_idx.into()).tree;
        let first_states = States::for_tree(first_tree, self.model.ntimes());
        let local = self.model.local_model(sites[0].pos);
        let emission = Emission::new(&local);
        let emit = emission.column(first_tree, &first_states, &sites[0].column, sites[0].query_base)?;

        // Start the column from the coalescent prior over attachment points
        // (`spec.md §4.6`, item 1), not a flat distribution over states: a
        // state deep in a long branch near the population's coalescence
        // time is a priori more likely than one on a short branch far from
        // it.
        let first_counts = LineageCounts::for_tree(first_tree, local.ntimes());
        let first_tree_len = branch_length_sum(first_tree, &local);
        let first_trans = TransMatrix::new(&local, &first_counts, first_tree_len);
        let prior = first_trans.coalescent_prior(&first_states, &first_counts);
        let log_alpha: Vec<f64> = emit
            .iter()
            .zip(&prior)
            .map(|(&e, &p)| ln_or_neg_inf(p) + ln_or_neg_inf(e))
            .collect();
        if log_alpha.iter().all(|v| *v == f64::NEG_INFINITY) {
            return Err(ArgweaverError::NumericFailure { position: sites[0].pos });
        }
        columns.push(ForwardColumn {
            pos: sites[0].pos,
            block_idx: first_block_idx,
            states: first_states,
            log_alpha,
        });

        for site in &sites[1..] {
            let block_idx = residual.block_at(site.pos)?.index();
            let prev = columns.last().unwrap();
            let tree = &residual.block(block_idx.into()).tree;
            let local = self.model.local_model(site.pos);

            let (states, log_alpha) = if block_idx == prev.block_idx {
                let counts = LineageCounts::for_tree(tree, local.ntimes());
                let tree_len = branch_length_sum(tree, &local);
                let trans = TransMatrix::new(&local, &counts, tree_len);
                let lin = exp_shifted(&prev.log_alpha);
                let out_lin = trans.apply_forward(&lin.values, &prev.states, &prev.states);
                let log_out = relog(&out_lin, lin.shift);
                (prev.states.clone(), log_out)
            } else {
                let next_states = States::for_tree(tree, local.ntimes());
                let prev_tree = &residual.block(prev.block_idx.into()).tree;
                let spr = residual.block(block_idx.into()).spr;
                let mapping = if spr.is_null() {
                    map_congruent_trees(prev_tree, residual.seqids(), tree, residual.seqids())
                } else {
                    residual.block(block_idx.into()).mapping.clone()
                };
                let counts_next = LineageCounts::for_tree(tree, local.ntimes());
                let tree_len_next = branch_length_sum(tree, &local);
                let trans_next = TransMatrix::new(&local, &counts_next, tree_len_next);
                let switch = TransMatrixSwitch::new(
                    prev_tree,
                    tree,
                    &spr,
                    &mapping,
                    &prev.states,
                    &next_states,
                    &trans_next,
                    &local,
                );
                let lin = exp_shifted(&prev.log_alpha);
                let out_lin = switch.apply_forward(&lin.values, next_states.len());
                let log_out = relog(&out_lin, lin.shift);
                (next_states, log_out)
            };

            let emission = Emission::new(&local);
            let emit = emission.column(tree, &states, &site.column, site.query_base)?;
            let log_alpha: Vec<f64> = log_alpha
                .iter()
                .zip(&emit)
                .map(|(&a, &e)| a + ln_or_neg_inf(e))
                .collect();
            if log_alpha.iter().all(|v| *v == f64::NEG_INFINITY) {
                return Err(ArgweaverError::NumericFailure { position: site.pos });
            }

            columns.push(ForwardColumn { pos: site.pos, block_idx, states, log_alpha });
        }

        Ok(columns)
    }

    /// Stochastic backward traceback (`spec.md §4.6`, item 3): draws the
    /// final state from the last forward column, then each prior state
    /// from `alpha[s'] * P(s'->s)` normalized, using the within-block
    /// transition when consecutive columns share a residual block and a
    /// freshly rebuilt switch otherwise.
    fn traceback(
        &self,
        residual: &LocalTrees,
        columns: &[ForwardColumn],
        rng: &mut impl Rng,
    ) -> Result<Vec<(u64, usize, State)>> {
        let mut path = Vec::with_capacity(columns.len());
        let last = columns.last().unwrap();
        let mut cur_idx = sample_categorical(&last.log_alpha, rng);
        path.push((last.pos, last.block_idx, last.states.get(cur_idx)));

        for i in (1..columns.len()).rev() {
            let cur = &columns[i];
            let prev = &columns[i - 1];
            let target = cur.states.get(cur_idx);

            let weights: Vec<f64> = if cur.block_idx == prev.block_idx {
                let local = self.model.local_model(prev.pos);
                let tree = &residual.block(prev.block_idx.into()).tree;
                let counts = LineageCounts::for_tree(tree, local.ntimes());
                let tree_len = branch_length_sum(tree, &local);
                let trans = TransMatrix::new(&local, &counts, tree_len);
                let lin = exp_shifted(&prev.log_alpha);
                prev.states
                    .all()
                    .iter()
                    .zip(&lin.values)
                    .map(|(s, &la)| {
                        let same_branch = s.node == target.node;
                        let age = residual.block(prev.block_idx.into()).tree.age(s.node);
                        la * trans.prob(same_branch, age, s.time, target.time)
                    })
                    .collect()
            } else {
                let local = self.model.local_model(cur.pos);
                let prev_tree = &residual.block(prev.block_idx.into()).tree;
                let next_tree = &residual.block(cur.block_idx.into()).tree;
                let spr = residual.block(cur.block_idx.into()).spr;
                let mapping = if spr.is_null() {
                    map_congruent_trees(prev_tree, residual.seqids(), next_tree, residual.seqids())
                } else {
                    residual.block(cur.block_idx.into()).mapping.clone()
                };
                let counts_next = LineageCounts::for_tree(next_tree, local.ntimes());
                let tree_len_next = branch_length_sum(next_tree, &local);
                let trans_next = TransMatrix::new(&local, &counts_next, tree_len_next);
                let switch = TransMatrixSwitch::new(
                    prev_tree, next_tree, &spr, &mapping, &prev.states, &cur.states, &trans_next, &local,
                );
                let lin = exp_shifted(&prev.log_alpha);
                let target_idx = cur_idx;
                prev.states
                    .all()
                    .iter()
                    .enumerate()
                    .map(|(i, _)| {
                        let mut one_hot = vec![0.0; lin.values.len()];
                        one_hot[i] = lin.values[i];
                        let out = switch.apply_forward(&one_hot, cur.states.len());
                        out[target_idx]
                    })
                    .collect()
            };

            let prev_idx = sample_categorical_linear(&weights, rng);
            cur_idx = prev_idx;
            path.push((prev.pos, prev.block_idx, prev.states.get(prev_idx)));
        }

        path.reverse();
        Ok(path)
    }

    /// Convert the sampled (position, block, state) path into a
    /// `LocalTrees` with the thread inserted (`spec.md §4.6`, item 4).
    fn path_to_local_trees(
        &self,
        residual: &LocalTrees,
        path: &[(u64, usize, State)],
        sites: &[SiteRecord],
        seqid: SeqId,
    ) -> Result<LocalTrees> {
        let k_minus_1 = (self.model.ntimes() - 1) as u32;
        let mut seqids = residual.seqids().to_vec();
        seqids.push(seqid);

        let mut runs: Vec<(u64, usize, State)> = Vec::new();
        for &(pos, block_idx, state) in path {
            match runs.last() {
                Some(&(_, last_block, last_state)) if last_block == block_idx && last_state == state => {}
                _ => runs.push((pos, block_idx, state)),
            }
        }

        let end_coord = residual.end_coord();
        let mut trees: Option<LocalTrees> = None;
        let thread_idx = NodeIndex::from(residual.num_leaves());

        for (i, &(pos, block_idx, state)) in runs.iter().enumerate() {
            let next_pos = runs.get(i + 1).map(|r| r.0).unwrap_or(end_coord);
            let blocklen = (next_pos - pos) as u32;
            if blocklen == 0 {
                continue;
            }
            let base_tree = &residual.block(block_idx.into()).tree;

            match trees.as_mut() {
                None => {
                    let tree = base_tree.insert_leaf(state.node, state.time, TimeIdx(0), k_minus_1)?;
                    trees = Some(LocalTrees::new(seqids.clone(), pos, tree, blocklen)?);
                }
                Some(existing) => {
                    let prev_run = &runs[i - 1];
                    if prev_run.1 == block_idx {
                        // `state.node` is an index into the un-threaded
                        // residual block's tree; translate it through the
                        // same renumbering `insert_leaf` applied when the
                        // thread first entered this block.
                        let coal_node = remap_for_insertion(state.node, residual.num_leaves());
                        // The thread's own age (always 0) is a valid
                        // recomb_time regardless of where it previously
                        // attached or where it is attaching now, since
                        // `0 <= coal_time` always holds.
                        let spr = Spr {
                            recomb_node: thread_idx,
                            recomb_time: existing.last_block().tree.age(thread_idx),
                            coal_node,
                            coal_time: state.time,
                        };
                        let mut tree = existing.last_block().tree.clone();
                        tree.apply_spr(&spr)?;
                        existing.push_block(tree, spr, identity_mapping(&existing.last_block().tree), blocklen)?;
                    } else {
                        let tree = base_tree.insert_leaf(state.node, state.time, TimeIdx(0), k_minus_1)?;
                        let mapping = map_congruent_trees(&existing.last_block().tree, &seqids, &tree, &seqids);
                        existing.push_block(tree, Spr::NULL, mapping, blocklen)?;
                    }
                }
            }
        }

        let mut trees = trees.ok_or_else(|| ArgweaverError::invariant("sampled path produced no blocks"))?;
        trees.remove_null_sprs();
        let _ = sites;
        Ok(trees)
    }
}

struct ShiftedLinear {
    values: Vec<f64>,
    shift: f64,
}

fn exp_shifted(log_values: &[f64]) -> ShiftedLinear {
    let max = log_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return ShiftedLinear { values: vec![0.0; log_values.len()], shift: 0.0 };
    }
    ShiftedLinear {
        values: log_values.iter().map(|&v| (v - max).exp()).collect(),
        shift: max,
    }
}

fn relog(linear: &[f64], shift: f64) -> Vec<f64> {
    linear
        .iter()
        .map(|&v| if v <= 0.0 { f64::NEG_INFINITY } else { shift + v.ln() })
        .collect()
}

fn ln_or_neg_inf(p: f64) -> f64 {
    if p <= 0.0 {
        f64::NEG_INFINITY
    } else {
        p.ln()
    }
}

fn sample_categorical(log_weights: &[f64], rng: &mut impl Rng) -> usize {
    let lin = exp_shifted(log_weights);
    sample_categorical_linear(&lin.values, rng)
}

fn sample_categorical_linear(weights: &[f64], rng: &mut impl Rng) -> usize {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return 0;
    }
    let mut draw = rng.gen::<f64>() * total;
    for (i, &w) in weights.iter().enumerate() {
        draw -= w;
        if draw <= 0.0 {
            return i;
        }
    }
    weights.len() - 1
}

fn branch_length_sum(tree: &LocalTree, model: &Model) -> f64 {
    let mut total = 0.0;
    for i in 0..tree.num_nodes() {
        let v = NodeIndex::from(i);
        if v == tree.root() {
            continue;
        }
        let parent = tree.parent(v);
        total += model.grid().get(tree.age(parent)) - model.grid().get(tree.age(v));
    }
    total
}

fn identity_mapping(tree: &LocalTree) -> Vec<NodeIndex> {
    (0..tree.num_nodes()).map(NodeIndex::from).collect()
}

/// Translate a node index of the un-threaded residual tree with `n` leaves
/// into its counterpart in the tree produced by
/// [`LocalTree::insert_leaf`]: leaves are unchanged, every internal node
/// shifts up one slot to make room for the new leaf.
fn remap_for_insertion(v: NodeIndex, n: usize) -> NodeIndex {
    if v.is_null() {
        NodeIndex::NULL
    } else if v.index() < n {
        v
    } else {
        NodeIndex::from(v.index() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SampleOptions;
    use crate::time_grid::TimeGrid;
    use crate::tree::LocalNode;

    fn single_leaf_tree(k_minus_1: u32) -> LocalTree {
        let nodes = vec![LocalNode { parent: NodeIndex::NULL, child: [NodeIndex::NULL; 2], age: TimeIdx(0) }];
        LocalTree::from_nodes(nodes, 1, k_minus_1).unwrap()
    }

    #[test]
    fn first_column_prior_matches_the_closed_form_two_lineage_coalescent_density() {
        // `spec.md §8` S1: with a single existing lineage, the state prior
        // reduces to the classic two-lineage coalescent density over the
        // grid, not a flat `1/|S|` distribution over states.
        let ntimes = 4;
        let grid = TimeGrid::linear(ntimes, (ntimes - 1) as f64).unwrap();
        let popsize = vec![1.0; ntimes - 1];
        let model = Model::new(grid.clone(), popsize.clone(), 0.0, 0.0, 0.0, SampleOptions::empty()).unwrap();
        let tree = single_leaf_tree((ntimes - 1) as u32);
        let sites = vec![SiteRecord { pos: 0, column: vec![0], query_base: 0 }];
        let residual = LocalTrees::new(vec![SeqId::from(0usize)], 0, tree, 10).unwrap();

        let sampler = Sampler::new(&model);
        let columns = sampler.forward_pass(&residual, &sites).unwrap();
        let first = &columns[0];

        // Independently recomputed survival/coalescence density, using the
        // same half-step coalescent grid and per-interval branch count
        // (always 1, a single existing lineage) that `TransMatrix::new`
        // derives its `E`/`B` arrays from.
        let n_intervals = ntimes - 1;
        let mut survival = 1.0;
        let mut expected_prior = Vec::with_capacity(n_intervals);
        for a in 0..n_intervals {
            let popsize_a = model.popsize(TimeIdx::from(a as u32));
            let half_dt = grid.coal_dt()[2 * a];
            let coal = 1.0 - (-half_dt / (2.0 * popsize_a)).exp();
            expected_prior.push(survival * coal);
            let full_dt = grid.dt(TimeIdx::from(a as u32)).min(1e100);
            survival *= (-full_dt / (2.0 * popsize_a)).exp();
        }

        // `mu = 0` and a matching column/query base make the emission
        // probability a constant `1/alphabet` (4, phased) for every state,
        // so the normalized forward column is exactly the prior.
        assert_eq!(first.states.len(), n_intervals);
        for (i, &expected) in expected_prior.iter().enumerate() {
            let got = first.log_alpha[i].exp() * 4.0;
            assert!((got - expected).abs() < 1e-9, "state {i}: got {got}, expected {expected}");
        }
    }
}
