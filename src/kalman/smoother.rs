/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Rauch-Tung-Striebel backward pass.
//!
//! ```text
//! m[T-1] = mu[T-1],  cov[T-1] = V[T-1]
//! L_t         = V[t]·Aᵀ·V_prior[t+1]⁻¹
//! m[t]        = mu[t] + L_t·(m[t+1] - mu_prior[t+1])
//! cov[t]      = V[t] + L_t·(cov[t+1] - V_prior[t+1])·L_tᵀ
//! cov_next[t] = L_t·cov[t+1]          = Cov(x_t, x_{t+1} | y)
//! ```

use nalgebra::{DMatrix, DVector};

use crate::error::{FitError, Result};
use crate::linalg::{ensure_shape, invert, symmetrize};
use crate::kalman::filter::FilterOutput;

/// Smoothed moments of one trial.
#[derive(Clone, Debug, PartialEq)]
pub struct SmoothedTrajectory {
    /// `E[x_t | y]`, `t = 0..T-1`.
    pub m: Vec<DVector<f64>>,
    /// `Cov(x_t | y)`, `t = 0..T-1`.
    pub cov: Vec<DMatrix<f64>>,
    /// `Cov(x_t, x_{t+1} | y)`, `t = 0..T-2`.
    pub cov_next: Vec<DMatrix<f64>>,
}

impl SmoothedTrajectory {
    /// Number of time steps.
    pub fn len(&self) -> usize {
        self.m.len()
    }

    /// `true` when the trajectory has no steps.
    pub fn is_empty(&self) -> bool {
        self.m.is_empty()
    }
}

/// Run the backward pass over a filtered trial.
pub fn rts_smoother(a: &DMatrix<f64>, filtered: &FilterOutput) -> Result<SmoothedTrajectory> {
    let n_steps = filtered.len();
    if n_steps == 0 {
        return Err(FitError::InvalidConfig("cannot smooth an empty trial".into()));
    }
    let k = a.nrows();
    ensure_shape(a, k, k, "A")?;

    let mut m = filtered.mu.clone();
    let mut cov = filtered.v.clone();
    let mut cov_next = vec![DMatrix::zeros(k, k); n_steps - 1];
    let a_t = a.transpose();

    for t in (0..n_steps - 1).rev() {
        let prior_precision = invert(&filtered.v_prior[t + 1], "V_prior")?;
        let gain = &filtered.v[t] * &a_t * prior_precision;

        m[t] = &filtered.mu[t] + &gain * (&m[t + 1] - &filtered.mu_prior[t + 1]);
        cov[t] = symmetrize(
            &(&filtered.v[t] + &gain * (&cov[t + 1] - &filtered.v_prior[t + 1]) * gain.transpose()),
        );
        cov_next[t] = &gain * &cov[t + 1];
    }

    Ok(SmoothedTrajectory { m, cov, cov_next })
}
