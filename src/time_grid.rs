//! The discretized coalescent time grid (`spec.md §3`, "Time grid").
//!
//! `t[0..K-1]` is a strictly increasing sequence of generations with
//! `t[0] == 0`. `dt[i] = t[i+1] - t[i]`, with the top step `dt[K-1]` defined
//! as `+inf` since no upper bound is placed on the age of the grand root.
//! `coal_dt` is a half-step grid used by the transition-matrix calculators to
//! place coalescent midpoints between adjacent grid points.

use crate::error::{ArgweaverError, Result};
use crate::newtypes::TimeIdx;

/// How midpoints between adjacent time points are placed when building
/// `coal_dt`. ARGweaver model files typically use exponential grids so that
/// resolution concentrates near the present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalescentSpacing {
    Linear,
    Exponential,
}

/// The shared, read-only time grid. Cloning is cheap only via `Rc`/`Arc` at
/// the `Model` layer (see `local_model` in `model.rs`); `TimeGrid` itself
/// owns its vectors outright.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeGrid {
    t: Vec<f64>,
    dt: Vec<f64>,
    coal_dt: Vec<f64>,
}

impl TimeGrid {
    /// Build a grid from explicit time points. `t` must have at least two
    /// entries, start at zero, and be strictly increasing.
    pub fn from_points(t: Vec<f64>, spacing: CoalescentSpacing) -> Result<Self> {
        if t.len() < 2 {
            return Err(ArgweaverError::config(
                "time grid must have at least two points",
            ));
        }
        if t[0] != 0.0 {
            return Err(ArgweaverError::config("time grid must start at t[0] = 0"));
        }
        for w in t.windows(2) {
            if !(w[1] > w[0]) {
                return Err(ArgweaverError::config(
                    "time grid must be strictly increasing",
                ));
            }
        }

        let k = t.len();
        let mut dt = Vec::with_capacity(k);
        for i in 0..k - 1 {
            dt.push(t[i + 1] - t[i]);
        }
        dt.push(f64::INFINITY);

        let coal_dt = build_coal_dt(&t, spacing);

        Ok(TimeGrid { t, dt, coal_dt })
    }

    /// Convenience constructor matching `arg-sim`/`arg-sample`'s
    /// `--ntimes K --maxtime T` CLI surface (`spec.md §6`): `ntimes` evenly
    /// spaced points on `[0, maxtime]`.
    pub fn linear(ntimes: usize, maxtime: f64) -> Result<Self> {
        if ntimes < 2 {
            return Err(ArgweaverError::config("ntimes must be at least 2"));
        }
        let step = maxtime / (ntimes - 1) as f64;
        let t: Vec<f64> = (0..ntimes).map(|i| i as f64 * step).collect();
        Self::from_points(t, CoalescentSpacing::Linear)
    }

    /// Exponentially spaced points on `[0, maxtime]`, concentrating
    /// resolution near the present the way ARGweaver's default grid does.
    pub fn exponential(ntimes: usize, maxtime: f64) -> Result<Self> {
        if ntimes < 2 {
            return Err(ArgweaverError::config("ntimes must be at least 2"));
        }
        let k = ntimes - 1;
        let mut t = Vec::with_capacity(ntimes);
        t.push(0.0);
        for i in 1..ntimes {
            let frac = (i as f64 / k as f64).powi(2);
            t.push(frac * maxtime);
        }
        Self::from_points(t, CoalescentSpacing::Exponential)
    }

    pub fn ntimes(&self) -> usize {
        self.t.len()
    }

    pub fn get(&self, i: TimeIdx) -> f64 {
        self.t[i.index()]
    }

    pub fn dt(&self, i: TimeIdx) -> f64 {
        self.dt[i.index()]
    }

    pub fn all_times(&self) -> &[f64] {
        &self.t
    }

    pub fn all_dt(&self) -> &[f64] {
        &self.dt
    }

    /// `coal_dt[0..2K-1]`, the half-step grid described in `spec.md §3`.
    pub fn coal_dt(&self) -> &[f64] {
        &self.coal_dt
    }
}

fn build_coal_dt(t: &[f64], spacing: CoalescentSpacing) -> Vec<f64> {
    let k = t.len();
    let mut coal_dt = vec![0.0; 2 * k - 1];
    for i in 0..k - 1 {
        let midpoint = match spacing {
            CoalescentSpacing::Linear => (t[i] + t[i + 1]) / 2.0,
            CoalescentSpacing::Exponential => {
                if t[i] <= 0.0 {
                    (t[i] + t[i + 1]) / 2.0
                } else {
                    (t[i] * t[i + 1]).sqrt()
                }
            }
        };
        coal_dt[2 * i] = midpoint - t[i];
        coal_dt[2 * i + 1] = t[i + 1] - midpoint;
    }
    // The final entry covers the open-ended top interval; there is no
    // midpoint to a next, finite grid point.
    coal_dt[2 * k - 2] = f64::INFINITY;
    coal_dt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nonzero_start() {
        let err = TimeGrid::from_points(vec![1.0, 2.0], CoalescentSpacing::Linear).unwrap_err();
        assert!(matches!(err, ArgweaverError::Config(_)));
    }

    #[test]
    fn rejects_nonmonotone() {
        let err =
            TimeGrid::from_points(vec![0.0, 2.0, 1.0], CoalescentSpacing::Linear).unwrap_err();
        assert!(matches!(err, ArgweaverError::Config(_)));
    }

    #[test]
    fn top_step_is_infinite() {
        let grid = TimeGrid::linear(4, 3.0).unwrap();
        assert_eq!(grid.ntimes(), 4);
        assert!(grid.dt(TimeIdx(3)).is_infinite());
        for i in 0..3 {
            assert!(grid.dt(TimeIdx(i)).is_finite());
        }
    }

    #[test]
    fn coal_dt_has_expected_length() {
        let grid = TimeGrid::linear(5, 4.0).unwrap();
        assert_eq!(grid.coal_dt().len(), 2 * 5 - 1);
        assert!(grid.coal_dt()[2 * 5 - 2].is_infinite());
    }
}
