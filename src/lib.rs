//! `argweaver`: a threading-HMM engine for inferring ancestral
//! recombination graphs from aligned sequences under the sequentially
//! Markov coalescent.
//!
//! The crate is organized bottom-up: [`newtypes`] and [`time_grid`] give
//! the index and time-discretization primitives; [`tree`] and
//! [`local_trees`] represent a single ARG as a sequence of local trees
//! connected by SPR operations; [`states`], [`trans_matrix`], and
//! [`emission`] supply the HMM's state space, transition model, and
//! likelihood; [`sampler`] and [`resampler`] drive the Gibbs sampler that
//! threads and re-threads lineages through an ARG. [`io`] and [`stats`]
//! are thin text-format adapters for driving the core from files.

pub mod emission;
pub mod error;
pub mod io;
pub mod local_trees;
pub mod logging;
pub mod model;
pub mod newtypes;
pub mod resampler;
pub mod sampler;
pub mod stats;
pub mod states;
pub mod time_grid;
pub mod trans_matrix;
pub mod tree;

pub use error::{ArgweaverError, Result};
pub use local_trees::{Block, LocalTrees};
pub use model::{Model, RateInterval, RateMap, SampleOptions};
pub use newtypes::{BlockIndex, NodeIndex, SeqId, TimeIdx};
pub use resampler::Resampler;
pub use sampler::{SiteRecord, Sampler};
pub use time_grid::{CoalescentSpacing, TimeGrid};
pub use tree::{LocalNode, LocalTree, Spr};
