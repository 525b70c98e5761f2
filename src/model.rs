//! The demographic/mutation/recombination model (`spec.md §3`, "Model").
//!
//! The source ArgWeaver shares a grid and popsize vector between an
//! `ArgModel` and its per-position `local_model` views via raw pointers with
//! an owned/borrowed flag. `spec.md §9` calls for re-expressing that as an
//! immutable, reference-counted handle instead: [`Model`] holds `Rc<TimeGrid>`
//! and `Rc<[f64]>`, and [`Model::local_model`] clones those handles (cheap,
//! no heap copy of the underlying data) while overriding `mu`/`rho` from the
//! rate maps.

use std::rc::Rc;

use crate::error::{ArgweaverError, Result};
use crate::newtypes::TimeIdx;
use crate::time_grid::TimeGrid;

bitflags::bitflags! {
    /// Small option bitfield for sampling behavior not captured by the
    /// scalar model parameters.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SampleOptions: u32 {
        /// Input data is unphased (diploid genotypes encoded as `{0,1}`);
        /// see the sites file format in `spec.md §6`.
        const UNPHASED = 1 << 0;
        /// Resample phase alongside topology during Gibbs sampling.
        const SAMPLE_PHASE = 1 << 1;
        /// Enforce the infinite-sites penalty in emission scoring.
        const INFSITES = 1 << 2;
    }
}

/// A single half-open interval `[start, end) -> value`, the unit record of
/// both the mutation-rate and recombination-rate maps (`spec.md §6`).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateInterval {
    pub start: u64,
    pub end: u64,
    pub value: f64,
}

/// An ordered, non-overlapping sequence of rate intervals on one chromosome
/// (`spec.md §3`, `§6`). `find` is `O(log n)` by binary search, per the
/// external-interface contract.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateMap {
    intervals: Vec<RateInterval>,
}

impl RateMap {
    /// Build a rate map from intervals that must already be sorted by
    /// `start` and non-overlapping; returns `ConfigError` otherwise.
    pub fn new(intervals: Vec<RateInterval>) -> Result<Self> {
        for w in intervals.windows(2) {
            if w[0].end > w[1].start {
                return Err(ArgweaverError::config(format!(
                    "rate map intervals overlap: [{}, {}) and [{}, {})",
                    w[0].start, w[0].end, w[1].start, w[1].end
                )));
            }
            if w[1].start < w[0].start {
                return Err(ArgweaverError::config("rate map intervals not sorted"));
            }
        }
        for iv in &intervals {
            if iv.start >= iv.end {
                return Err(ArgweaverError::config(format!(
                    "degenerate rate interval [{}, {})",
                    iv.start, iv.end
                )));
            }
        }
        Ok(RateMap { intervals })
    }

    /// The value covering `pos`, or `default` if `pos` is not covered by any
    /// interval.
    pub fn find(&self, pos: u64, default: f64) -> f64 {
        match self
            .intervals
            .binary_search_by(|iv| {
                if pos < iv.start {
                    std::cmp::Ordering::Greater
                } else if pos >= iv.end {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            }) {
            Ok(idx) => self.intervals[idx].value,
            Err(_) => default,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn intervals(&self) -> &[RateInterval] {
        &self.intervals
    }
}

/// The demographic/mutation/recombination model shared across a whole
/// `LocalTrees` (`spec.md §3`, "Model").
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Model {
    #[cfg_attr(feature = "serde", serde(with = "grid_rc"))]
    grid: Rc<TimeGrid>,
    #[cfg_attr(feature = "serde", serde(with = "popsize_rc"))]
    popsize: Rc<[f64]>,
    pub mu: f64,
    pub rho: f64,
    pub infsites_penalty: f64,
    pub options: SampleOptions,
    pub mutmap: Option<RateMap>,
    pub recombmap: Option<RateMap>,
}

impl Model {
    pub fn new(
        grid: TimeGrid,
        popsize: Vec<f64>,
        mu: f64,
        rho: f64,
        infsites_penalty: f64,
        options: SampleOptions,
    ) -> Result<Self> {
        if popsize.len() != grid.ntimes() - 1 {
            return Err(ArgweaverError::config(format!(
                "popsize vector has {} entries, expected {} (ntimes - 1)",
                popsize.len(),
                grid.ntimes() - 1
            )));
        }
        if popsize.iter().any(|&p| !(p > 0.0)) {
            return Err(ArgweaverError::config("popsize entries must be positive"));
        }
        Ok(Model {
            grid: Rc::new(grid),
            popsize: popsize.into(),
            mu,
            rho,
            infsites_penalty,
            options,
            mutmap: None,
            recombmap: None,
        })
    }

    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    pub fn ntimes(&self) -> usize {
        self.grid.ntimes()
    }

    pub fn popsize(&self, interval: TimeIdx) -> f64 {
        self.popsize[interval.index()]
    }

    pub fn popsizes(&self) -> &[f64] {
        &self.popsize
    }

    pub fn with_mutmap(mut self, map: RateMap) -> Self {
        self.mutmap = Some(map);
        self
    }

    pub fn with_recombmap(mut self, map: RateMap) -> Self {
        self.recombmap = Some(map);
        self
    }

    pub fn unphased(&self) -> bool {
        self.options.contains(SampleOptions::UNPHASED)
    }

    pub fn sample_phase(&self) -> bool {
        self.options.contains(SampleOptions::SAMPLE_PHASE)
    }

    pub fn infsites(&self) -> bool {
        self.options.contains(SampleOptions::INFSITES)
    }

    /// A view sharing the grid/popsize storage of `self` with `mu`/`rho`
    /// overridden by the rate maps at `pos`, as specified in `spec.md §3`.
    /// No heap data is copied; only the `Rc` handles and two `f64`s.
    pub fn local_model(&self, pos: u64) -> Model {
        let mu = self
            .mutmap
            .as_ref()
            .map(|m| m.find(pos, self.mu))
            .unwrap_or(self.mu);
        let rho = self
            .recombmap
            .as_ref()
            .map(|m| m.find(pos, self.rho))
            .unwrap_or(self.rho);
        Model {
            grid: Rc::clone(&self.grid),
            popsize: Rc::clone(&self.popsize),
            mu,
            rho,
            infsites_penalty: self.infsites_penalty,
            options: self.options,
            mutmap: None,
            recombmap: None,
        }
    }
}

#[cfg(feature = "serde")]
mod grid_rc {
    use super::*;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(grid: &Rc<TimeGrid>, s: S) -> std::result::Result<S::Ok, S::Error> {
        (**grid).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Rc<TimeGrid>, D::Error> {
        Ok(Rc::new(TimeGrid::deserialize(d)?))
    }
}

#[cfg(feature = "serde")]
mod popsize_rc {
    use super::*;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(popsize: &Rc<[f64]>, s: S) -> std::result::Result<S::Ok, S::Error> {
        popsize.to_vec().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Rc<[f64]>, D::Error> {
        Ok(Vec::<f64>::deserialize(d)?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_grid::CoalescentSpacing;

    fn grid(k: usize) -> TimeGrid {
        TimeGrid::linear(k, (k - 1) as f64).unwrap()
    }

    #[test]
    fn popsize_length_checked() {
        let err = Model::new(grid(4), vec![1.0, 1.0], 1e-8, 1e-8, 0.0, SampleOptions::empty())
            .unwrap_err();
        assert!(matches!(err, ArgweaverError::Config(_)));
    }

    #[test]
    fn local_model_overrides_rates() {
        let map = RateMap::new(vec![RateInterval {
            start: 0,
            end: 100,
            value: 5e-8,
        }])
        .unwrap();
        let model = Model::new(grid(4), vec![1.0, 1.0, 1.0], 1e-8, 1e-8, 0.0, SampleOptions::empty())
            .unwrap()
            .with_mutmap(map);
        let local = model.local_model(50);
        assert_eq!(local.mu, 5e-8);
        assert_eq!(local.rho, 1e-8);
        // Grid/popsize storage is shared, not copied.
        assert!(Rc::ptr_eq(&model.grid, &local.grid));
        let _ = CoalescentSpacing::Linear;
    }

    #[test]
    fn rate_map_rejects_overlap() {
        let err = RateMap::new(vec![
            RateInterval { start: 0, end: 10, value: 1.0 },
            RateInterval { start: 5, end: 15, value: 2.0 },
        ])
        .unwrap_err();
        assert!(matches!(err, ArgweaverError::Config(_)));
    }
}
