/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Exact E-step inference for one trial of the linear-Gaussian model
//!
//! ```text
//! x_0 ~ N(mu0, Q0)
//! x_t = A·x_{t-1} + b[τ(t)] + ε,   ε ~ N(0, Q),  τ(t) = [t-1 ≥ ⌊T/2⌋]
//! y_t = C·x_t + d + η,             η ~ N(0, R)
//! ```
//!
//! [`filter::kalman_filter`] runs the forward pass and keeps the one-step
//! predictions the backward pass needs; [`smoother::rts_smoother`] turns them
//! into smoothed moments. [`posterior`] chains the two. Trials are independent
//! given the parameters, so the EM loop calls [`posterior`] once per trial,
//! in parallel when the `parallel` feature is on.

pub mod filter;
pub mod smoother;

pub use filter::{kalman_filter, FilterOutput};
pub use smoother::{rts_smoother, SmoothedTrajectory};

use nalgebra::{DMatrix, DVector};

use crate::error::Result;
use crate::model::LdsParams;

/// Filter then smooth one trial.
pub fn posterior(
    y: &[DVector<f64>],
    a: &DMatrix<f64>,
    q: &DMatrix<f64>,
    params: &LdsParams,
) -> Result<SmoothedTrajectory> {
    let filtered = kalman_filter(y, a, q, params)?;
    rts_smoother(a, &filtered)
}
