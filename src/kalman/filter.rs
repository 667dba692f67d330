/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Forward pass in information form.
//!
//! ```text
//! t = 0:   mu_prior = mu0,                 V_prior = Q0
//! t > 0:   mu_prior = A·mu[t-1] + b[τ(t)], V_prior = A·V[t-1]·Aᵀ + Q
//! update:  V  = (Cᵀ R⁻¹ C + V_prior⁻¹)⁻¹
//!          mu = V·(Cᵀ R⁻¹ (y - d) + V_prior⁻¹ mu_prior)
//! ```
//!
//! `R` and every `V_prior` must be invertible; a singular one aborts the pass
//! with [`crate::FitError::SingularMatrix`].

use nalgebra::{DMatrix, DVector};

use crate::error::{FitError, Result};
use crate::linalg::{ensure_len, ensure_shape, invert, symmetrize};
use crate::model::{input_segment, switch_step, LdsParams};

/// Per-step output of the forward pass.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterOutput {
    /// Filtered means `E[x_t | y_0..y_t]`.
    pub mu: Vec<DVector<f64>>,
    /// One-step-ahead predicted means `E[x_t | y_0..y_{t-1}]`.
    pub mu_prior: Vec<DVector<f64>>,
    /// Filtered covariances.
    pub v: Vec<DMatrix<f64>>,
    /// Predicted covariances.
    pub v_prior: Vec<DMatrix<f64>>,
}

impl FilterOutput {
    /// Number of time steps.
    pub fn len(&self) -> usize {
        self.mu.len()
    }

    /// `true` for an empty pass (never produced by [`kalman_filter`]).
    pub fn is_empty(&self) -> bool {
        self.mu.is_empty()
    }
}

/// Run the forward pass over one trial.
///
/// `a` is the reduced `K×K` dynamics, `q` the `K×K` process-noise covariance.
pub fn kalman_filter(
    y: &[DVector<f64>],
    a: &DMatrix<f64>,
    q: &DMatrix<f64>,
    params: &LdsParams,
) -> Result<FilterOutput> {
    let n_steps = y.len();
    if n_steps == 0 {
        return Err(FitError::InvalidConfig("cannot filter an empty trial".into()));
    }
    let k = a.nrows();
    let dim = y[0].len();
    ensure_shape(a, k, k, "A")?;
    ensure_shape(q, k, k, "Q")?;
    params.validate(k, dim)?;
    for obs in y {
        ensure_len(obs, dim, "observation")?;
    }

    let switch = switch_step(n_steps);
    let r_inv = invert(&params.r, "R")?;
    let ct_rinv = params.c.transpose() * &r_inv;
    let info = &ct_rinv * &params.c;
    let a_t = a.transpose();

    let mut out = FilterOutput {
        mu: Vec::with_capacity(n_steps),
        mu_prior: Vec::with_capacity(n_steps),
        v: Vec::with_capacity(n_steps),
        v_prior: Vec::with_capacity(n_steps),
    };

    for (t, obs) in y.iter().enumerate() {
        let (mean_prior, cov_prior) = match t {
            0 => (params.mu0.clone(), params.q0.clone()),
            _ => {
                let b = &params.b[input_segment(t - 1, switch)];
                (
                    a * &out.mu[t - 1] + b,
                    symmetrize(&(a * &out.v[t - 1] * &a_t + q)),
                )
            }
        };

        let prior_precision = invert(&cov_prior, "V_prior")?;
        let cov = symmetrize(&invert(&(&info + &prior_precision), "posterior precision")?);
        let mean = &cov * (&ct_rinv * (obs - &params.d) + &prior_precision * &mean_prior);

        out.mu.push(mean);
        out.mu_prior.push(mean_prior);
        out.v.push(cov);
        out.v_prior.push(cov_prior);
    }

    Ok(out)
}
