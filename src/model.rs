/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Model instance, parameter containers and observation data.
//!
//! A [`SubspaceRnn`] owns the two immutable pieces of a model — the weight
//! [`WeightTopology`] and the latent [`Subspace`] — and exposes the pure
//! [`SubspaceRnn::build`] that turns a weight vector into `(W, A)`. All
//! mutable fitting state lives in [`ModelState`], which the EM loop replaces
//! wholesale after every M-step.

use nalgebra::{DMatrix, DVector};

use crate::error::{FitError, Result};
use crate::linalg::{ensure_len, ensure_shape};
use crate::subspace::Subspace;
use crate::topology::WeightTopology;

/// Index of the time step at which the input switches: `t_s = ⌊T/2⌋`.
#[inline]
pub fn switch_step(n_steps: usize) -> usize {
    n_steps / 2
}

/// Input segment used for the transition *out of* step `t`:
/// `0` while `t < t_s`, `1` from `t_s` on.
#[inline]
pub fn input_segment(t: usize, switch: usize) -> usize {
    usize::from(t >= switch)
}

// ─── SubspaceRnn ─────────────────────────────────────────────────────────────

/// Sparse excitatory/inhibitory network whose dynamics factor through `J`.
#[derive(Clone, Debug, PartialEq)]
pub struct SubspaceRnn {
    topology: WeightTopology,
    subspace: Subspace,
}

impl SubspaceRnn {
    /// Build a model from `(N_e, N_i, sparsity, J, seed)`.
    ///
    /// Deterministic in its inputs. `J` must be `K×N` with `N = N_e + N_i`.
    pub fn new(n_e: usize, n_i: usize, sparsity: f64, j: DMatrix<f64>, seed: u64) -> Result<Self> {
        let topology = WeightTopology::new(n_e, n_i, sparsity, seed)?;
        if j.ncols() != topology.n_units() {
            return Err(FitError::ShapeMismatch {
                what: "J",
                expected: (j.nrows(), topology.n_units()),
                actual: j.shape(),
            });
        }
        let subspace = Subspace::new(j)?;
        Ok(Self { topology, subspace })
    }

    /// The fixed weight topology.
    pub fn topology(&self) -> &WeightTopology {
        &self.topology
    }

    /// The latent subspace.
    pub fn subspace(&self) -> &Subspace {
        &self.subspace
    }

    /// Unit count `N`.
    pub fn n_units(&self) -> usize {
        self.topology.n_units()
    }

    /// Latent dimension `K`.
    pub fn latent_dim(&self) -> usize {
        self.subspace.latent_dim()
    }

    /// Length of every weight vector.
    pub fn n_weights(&self) -> usize {
        self.topology.n_weights()
    }

    /// Rebuild `(W, A)` from the weight vector.
    pub fn build(&self, w: &DVector<f64>) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
        let full = self.topology.decode(w)?;
        let a = self.subspace.reduce(&full)?;
        Ok((full, a))
    }

    /// Latent process-noise covariance `Q = s·J·Jᵀ`.
    pub fn dynamics_covariance(&self, s: f64) -> DMatrix<f64> {
        self.subspace.dynamics_covariance(s)
    }
}

// ─── LdsParams ───────────────────────────────────────────────────────────────

/// Every LDS parameter except the recurrent weights.
#[derive(Clone, Debug, PartialEq)]
pub struct LdsParams {
    /// Piecewise-constant latent input, `b[0]` before the switch, `b[1]` after.
    pub b: [DVector<f64>; 2],
    /// Process-noise scale; `Q = s·J·Jᵀ`.
    pub s: f64,
    /// Mean of the first latent state.
    pub mu0: DVector<f64>,
    /// Covariance of the first latent state.
    pub q0: DMatrix<f64>,
    /// Observation matrix (`D×K`).
    pub c: DMatrix<f64>,
    /// Observation offset.
    pub d: DVector<f64>,
    /// Observation-noise covariance (`D×D`).
    pub r: DMatrix<f64>,
}

impl LdsParams {
    /// Observation dimension `D`.
    pub fn obs_dim(&self) -> usize {
        self.c.nrows()
    }

    /// Latent dimension `K`.
    pub fn latent_dim(&self) -> usize {
        self.c.ncols()
    }

    /// Check every field against latent dimension `k` and observation
    /// dimension `d`.
    pub fn validate(&self, k: usize, d: usize) -> Result<()> {
        ensure_len(&self.b[0], k, "b[0]")?;
        ensure_len(&self.b[1], k, "b[1]")?;
        ensure_len(&self.mu0, k, "mu0")?;
        ensure_shape(&self.q0, k, k, "Q0")?;
        ensure_shape(&self.c, d, k, "C")?;
        ensure_len(&self.d, d, "d")?;
        ensure_shape(&self.r, d, d, "R")?;
        if !self.s.is_finite() || self.s < 0.0 {
            return Err(FitError::InvalidConfig(format!(
                "noise scale s must be finite and non-negative, got {}",
                self.s
            )));
        }
        Ok(())
    }
}

/// Complete fitting state: weights plus the remaining parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelState {
    /// Non-negative weight vector.
    pub w: DVector<f64>,
    /// Remaining LDS parameters.
    pub params: LdsParams,
}

// ─── Observations ────────────────────────────────────────────────────────────

/// `U` trials of `T` observation vectors of length `D`.
#[derive(Clone, Debug, PartialEq)]
pub struct Observations {
    trials: Vec<Vec<DVector<f64>>>,
    n_steps: usize,
    dim: usize,
}

impl Observations {
    /// Wrap trial data, checking every trial has the same length and every
    /// vector the same dimension.
    pub fn new(trials: Vec<Vec<DVector<f64>>>) -> Result<Self> {
        let first = trials
            .first()
            .ok_or_else(|| FitError::InvalidConfig("at least one trial is required".into()))?;
        let n_steps = first.len();
        if n_steps == 0 {
            return Err(FitError::InvalidConfig("trials must have at least one step".into()));
        }
        let dim = first[0].len();
        for trial in &trials {
            if trial.len() != n_steps {
                return Err(FitError::ShapeMismatch {
                    what: "trial length",
                    expected: (n_steps, 1),
                    actual: (trial.len(), 1),
                });
            }
            for y in trial {
                ensure_len(y, dim, "observation")?;
            }
        }
        Ok(Self { trials, n_steps, dim })
    }

    /// Trial data.
    pub fn trials(&self) -> &[Vec<DVector<f64>>] {
        &self.trials
    }

    /// Trial count `U`.
    pub fn n_trials(&self) -> usize {
        self.trials.len()
    }

    /// Steps per trial `T`.
    pub fn n_steps(&self) -> usize {
        self.n_steps
    }

    /// Observation dimension `D`.
    pub fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> SubspaceRnn {
        let j = DMatrix::from_row_slice(2, 4, &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        SubspaceRnn::new(2, 2, 1.0, j, 0).unwrap()
    }

    #[test]
    fn build_returns_matching_shapes() {
        let m = model();
        let w = DVector::from_element(m.n_weights(), 0.1);
        let (full, a) = m.build(&w).unwrap();
        assert_eq!(full.shape(), (4, 4));
        assert_eq!(a.shape(), (2, 2));
        // both latent columns are excitatory
        assert!((a - DMatrix::from_element(2, 2, 0.1)).norm() < 1e-12);
    }

    #[test]
    fn rejects_mismatched_j() {
        let j = DMatrix::<f64>::zeros(2, 5);
        assert!(matches!(
            SubspaceRnn::new(2, 2, 1.0, j, 0),
            Err(FitError::ShapeMismatch { what: "J", .. })
        ));
    }

    #[test]
    fn switch_and_segments() {
        assert_eq!(switch_step(5), 2);
        assert_eq!(input_segment(1, 2), 0);
        assert_eq!(input_segment(2, 2), 1);
    }

    #[test]
    fn observations_reject_ragged_trials() {
        let y = DVector::zeros(3);
        let trials = vec![vec![y.clone(), y.clone()], vec![y.clone()]];
        assert!(matches!(Observations::new(trials), Err(FitError::ShapeMismatch { .. })));
        assert!(Observations::new(vec![]).is_err());
    }

    #[test]
    fn params_validate_shapes() {
        let p = LdsParams {
            b: [DVector::zeros(2), DVector::zeros(2)],
            s: 1.0,
            mu0: DVector::zeros(2),
            q0: DMatrix::identity(2, 2),
            c: DMatrix::zeros(3, 2),
            d: DVector::zeros(3),
            r: DMatrix::identity(3, 3),
        };
        assert!(p.validate(2, 3).is_ok());
        assert!(matches!(p.validate(2, 4), Err(FitError::ShapeMismatch { what: "C", .. })));
    }
}
