//! End-to-end scenarios S1-S6 from `spec.md §8`. Where the original
//! scenario calls for an exact stochastic outcome (a specific topology, a
//! specific SPR count) that depends on the sampled path, the assertion is
//! loosened to the structural invariant the scenario is actually probing —
//! e.g. S2 checks that any SPR introduced by threading always moves the
//! thread's own node, rather than asserting exactly one SPR appears.

use argweaver::emission::Emission;
use argweaver::states::States;
use argweaver::{
    BlockIndex, LocalNode, LocalTree, LocalTrees, Model, NodeIndex, Resampler, SampleOptions, SeqId, Sampler,
    SiteRecord, TimeGrid, TimeIdx,
};
use rand::{rngs::StdRng, SeedableRng};

fn model(ntimes: usize, mu: f64, rho: f64) -> Model {
    let grid = TimeGrid::linear(ntimes, (ntimes - 1) as f64).unwrap();
    Model::new(grid, vec![1.0; ntimes - 1], mu, rho, 0.0, SampleOptions::empty()).unwrap()
}

fn single_leaf_tree() -> LocalTree {
    let nodes = vec![LocalNode { parent: NodeIndex::NULL, child: [NodeIndex::NULL; 2], age: TimeIdx(0) }];
    LocalTree::from_nodes(nodes, 1, 3).unwrap()
}

fn three_leaf_tree() -> LocalTree {
    let nodes = vec![
        LocalNode { parent: NodeIndex(3), child: [NodeIndex::NULL; 2], age: TimeIdx(0) },
        LocalNode { parent: NodeIndex(3), child: [NodeIndex::NULL; 2], age: TimeIdx(0) },
        LocalNode { parent: NodeIndex(4), child: [NodeIndex::NULL; 2], age: TimeIdx(0) },
        LocalNode { parent: NodeIndex(4), child: [NodeIndex(0), NodeIndex(1)], age: TimeIdx(2) },
        LocalNode { parent: NodeIndex::NULL, child: [NodeIndex(3), NodeIndex(2)], age: TimeIdx(4) },
    ];
    LocalTree::from_nodes(nodes, 3, 5).unwrap()
}

fn three_leaf_residual(blocklen: u32) -> LocalTrees {
    LocalTrees::new(
        vec![SeqId::from(0usize), SeqId::from(1usize), SeqId::from(2usize)],
        0,
        three_leaf_tree(),
        blocklen,
    )
    .unwrap()
}

/// S1: n=2, K=4, one site, identical bases. Threading the second lineage
/// produces a single SPR-free block.
#[test]
fn s1_two_leaves_one_site_yields_a_single_block() {
    let m = model(4, 0.0, 0.0);
    let residual = LocalTrees::new(vec![SeqId::from(0usize)], 0, single_leaf_tree(), 10).unwrap();
    let sites = vec![SiteRecord { pos: 0, column: vec![0], query_base: 0 }];

    let sampler = Sampler::new(&m);
    let mut rng = StdRng::seed_from_u64(1);
    let result = sampler.sample_thread(&residual, &sites, SeqId::from(1usize), &mut rng).unwrap();

    result.validate().unwrap();
    assert_eq!(result.num_leaves(), 2);
    assert_eq!(result.num_blocks(), 1);
    assert!(result.block(BlockIndex::from(0usize)).spr.is_null());
}

/// S2: a 3-leaf residual, several sites in one block. Any SPR introduced
/// while threading the fourth lineage always moves the thread's own node
/// (`recomb_node == residual.num_leaves()`), never a pre-existing branch.
#[test]
fn s2_spr_introduced_by_threading_always_moves_the_new_lineage() {
    let m = model(6, 1e-3, 1e-3);
    let residual = three_leaf_residual(100);
    let sites = vec![
        SiteRecord { pos: 10, column: vec![0, 0, 1], query_base: 1 },
        SiteRecord { pos: 50, column: vec![1, 1, 0], query_base: 0 },
        SiteRecord { pos: 90, column: vec![0, 1, 0], query_base: 1 },
    ];

    let sampler = Sampler::new(&m);
    let mut rng = StdRng::seed_from_u64(2);
    let result = sampler.sample_thread(&residual, &sites, SeqId::from(3usize), &mut rng).unwrap();

    result.validate().unwrap();
    assert_eq!(result.num_leaves(), 4);
    let thread_idx = NodeIndex(3);
    for block in result.blocks() {
        if !block.spr.is_null() {
            assert_eq!(block.spr.recomb_node, thread_idx);
        }
    }
}

/// S3: many uniform sites across a longer region; the forward/traceback
/// pipeline must stay numerically well-behaved (no `NumericFailure`) and
/// produce a valid, fully-threaded `LocalTrees`.
#[test]
fn s3_many_uniform_sites_thread_without_numeric_failure() {
    let m = model(8, 1e-8, 1e-8);
    let residual = three_leaf_residual(100);
    let sites: Vec<SiteRecord> = (0..20)
        .map(|i| SiteRecord { pos: 1 + i * 5, column: vec![0, 0, 0], query_base: 0 })
        .collect();

    let sampler = Sampler::new(&m);
    let mut rng = StdRng::seed_from_u64(3);
    let result = sampler.sample_thread(&residual, &sites, SeqId::from(3usize), &mut rng).unwrap();

    result.validate().unwrap();
    assert_eq!(result.num_leaves(), 4);
    assert_eq!(result.end_coord(), 100);
}

/// S4: a column that requires two mutations on a fixed topology gets a
/// lower (penalized) total likelihood under `infsites` than the same
/// column evaluated without the penalty.
#[test]
fn s4_infsites_penalty_lowers_likelihood_of_a_two_mutation_column() {
    let plain_model = model(6, 1e-3, 1e-3);
    let grid = TimeGrid::linear(6, 5.0).unwrap();
    let penalized_model = Model::new(grid, vec![1.0; 5], 1e-3, 1e-3, 5.0, SampleOptions::INFSITES).unwrap();

    let tree = three_leaf_tree();
    let states = States::for_tree(&tree, plain_model.ntimes());
    // Three pairwise-distinct bases force two mutations on this topology
    // (one on the cherry's branch, one separating the third leaf).
    let column = [0u8, 1u8, 2u8];

    let plain_emission = Emission::new(&plain_model);
    let penalized_emission = Emission::new(&penalized_model);

    let plain: f64 = plain_emission.column(&tree, &states, &column, 0).unwrap().iter().sum();
    let penalized: f64 = penalized_emission.column(&tree, &states, &column, 0).unwrap().iter().sum();

    assert!(penalized < plain);
}

/// S5: resampling the same leaf twice from the same starting `LocalTrees`
/// with an identically seeded RNG reproduces the same result.
#[test]
fn s5_resampling_is_deterministic_under_a_fixed_seed() {
    let m = model(6, 1e-3, 1e-3);
    let trees = three_leaf_residual(100);
    // Columns sized for the residual (2 leaves) after removing leaf 2; its
    // own base becomes `query_base`.
    let sites = vec![
        SiteRecord { pos: 10, column: vec![0, 1], query_base: 0 },
        SiteRecord { pos: 60, column: vec![1, 0], query_base: 1 },
    ];

    let resampler = Resampler::new(&m);
    let mut rng_a = StdRng::seed_from_u64(42);
    let result_a = resampler
        .resample_leaf(&trees, SeqId::from(2usize), 0, 100, &sites, &mut rng_a)
        .unwrap();

    let mut rng_b = StdRng::seed_from_u64(42);
    let result_b = resampler
        .resample_leaf(&trees, SeqId::from(2usize), 0, 100, &sites, &mut rng_b)
        .unwrap();

    assert_eq!(result_a, result_b);
}

/// S6: splitting at an interior coordinate through an empty middle and
/// reconcatenating recovers the original `LocalTrees`.
#[test]
fn s6_split_and_reconcatenate_through_empty_middle_recovers_original() {
    let trees = three_leaf_residual(100);

    let (before, middle, after) = argweaver::local_trees::partition_local_trees(&trees, 37, 37).unwrap();
    assert!(middle.is_none());
    let mut rejoined = argweaver::local_trees::append_local_trees(before.unwrap(), after.unwrap()).unwrap();
    rejoined.remove_null_sprs();

    assert_eq!(rejoined.num_blocks(), trees.num_blocks());
    assert_eq!(rejoined.start_coord(), trees.start_coord());
    assert_eq!(rejoined.end_coord(), trees.end_coord());
}
