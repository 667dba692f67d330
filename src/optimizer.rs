/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Projected L-BFGS over the non-negative orthant.
//!
//! Minimises a [`WeightObjective`] subject to `w ≥ 0`. Each iteration:
//!
//! 1. stop if the projected gradient `‖w - P(w - ∇f)‖∞` is below `pgtol`;
//! 2. build a quasi-Newton direction from the last `memory` curvature pairs,
//!    zeroing coordinates that sit on the bound with an outward gradient;
//! 3. backtrack along the projected path `P(w + t·d)` until a sufficient
//!    decrease holds (at most `max_line_search` halvings);
//! 4. stop if the relative reduction `(f_k - f_{k+1}) / max(|f_k|, |f_{k+1}|, 1)`
//!    is below `ftol`.
//!
//! Accepted steps never increase the objective. Hitting `max_iterations` or a
//! failed line search is not an error: the best iterate is returned with
//! `converged = false`.

use std::collections::VecDeque;

use nalgebra::DVector;

use crate::error::{FitError, Result};
use crate::objective::WeightObjective;

/// Sufficient-decrease constant for the backtracking search.
const ARMIJO_C1: f64 = 1e-4;

/// Tuning for [`ProjectedLbfgs`].
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerConfig {
    /// Number of curvature pairs kept. Default: 10.
    pub memory: usize,
    /// Projected-gradient infinity-norm tolerance. Default: 1e-5.
    pub pgtol: f64,
    /// Relative objective-reduction tolerance. Default: ≈ 2.2e-9.
    pub ftol: f64,
    /// Iteration cap. Default: 15 000.
    pub max_iterations: usize,
    /// Backtracking steps per line search. Default: 20.
    pub max_line_search: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            memory: 10,
            pgtol: 1e-5,
            ftol: 1e7 * f64::EPSILON,
            max_iterations: 15_000,
            max_line_search: 20,
        }
    }
}

/// Outcome of one [`ProjectedLbfgs::minimize`] call.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizeResult {
    /// Best iterate found (`w ≥ 0`).
    pub w: DVector<f64>,
    /// Objective value at `w`.
    pub loss: f64,
    /// Iterations taken.
    pub iterations: usize,
    /// `true` when a tolerance test stopped the run.
    pub converged: bool,
}

/// Bound-constrained quasi-Newton minimiser.
#[derive(Clone, Debug, Default)]
pub struct ProjectedLbfgs {
    config: OptimizerConfig,
}

struct CurvaturePair {
    s: DVector<f64>,
    y: DVector<f64>,
    rho: f64,
}

impl ProjectedLbfgs {
    /// Optimizer with the given tuning.
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Active tuning.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Minimise `objective` from `w0`, projected onto `w ≥ 0` first.
    pub fn minimize<O: WeightObjective + ?Sized>(
        &self,
        objective: &O,
        w0: &DVector<f64>,
    ) -> Result<OptimizeResult> {
        let cfg = &self.config;
        let mut x = w0.map(|v| v.max(0.0));
        let (mut f, mut g) = objective.loss_and_gradient(&x)?;
        if !f.is_finite() {
            return Err(FitError::InvalidConfig(
                "objective is not finite at the starting point".into(),
            ));
        }

        let mut history: VecDeque<CurvaturePair> = VecDeque::with_capacity(cfg.memory);
        let mut iterations = 0;
        let mut converged = false;

        while iterations < cfg.max_iterations {
            if projected_gradient_norm(&x, &g) <= cfg.pgtol {
                converged = true;
                break;
            }

            let active = active_set(&x, &g);
            let mut d = direction(&g, &active, &history);
            let mut slope = g.dot(&d);
            if !(slope < 0.0) {
                history.clear();
                d = steepest(&g, &active);
                slope = g.dot(&d);
            }
            if slope >= 0.0 {
                converged = true;
                break;
            }

            let mut step = if history.is_empty() {
                (1.0 / d.norm()).min(1.0)
            } else {
                1.0
            };
            let mut accepted = None;
            for _ in 0..=cfg.max_line_search {
                let trial = (&x + &d * step).map(|v| v.max(0.0));
                let moved = &trial - &x;
                let f_trial = objective.loss(&trial)?;
                if f_trial.is_finite()
                    && f_trial <= f
                    && f_trial <= f + ARMIJO_C1 * g.dot(&moved)
                {
                    accepted = Some((trial, f_trial, moved));
                    break;
                }
                step *= 0.5;
            }
            let Some((x_next, f_next, s)) = accepted else {
                break;
            };

            let g_next = objective.gradient(&x_next)?;
            let y = &g_next - &g;
            let sy = s.dot(&y);
            if sy > f64::EPSILON * y.norm_squared() {
                if history.len() == cfg.memory {
                    history.pop_front();
                }
                if cfg.memory > 0 {
                    history.push_back(CurvaturePair { s, y, rho: 1.0 / sy });
                }
            }

            iterations += 1;
            let reduction = (f - f_next) / f.abs().max(f_next.abs()).max(1.0);
            x = x_next;
            f = f_next;
            g = g_next;
            if reduction <= cfg.ftol {
                converged = true;
                break;
            }
        }

        tracing::debug!(iterations, converged, loss = f, "projected L-BFGS finished");
        Ok(OptimizeResult { w: x, loss: f, iterations, converged })
    }
}

fn projected_gradient_norm(x: &DVector<f64>, g: &DVector<f64>) -> f64 {
    x.iter()
        .zip(g.iter())
        .map(|(&xi, &gi)| (xi - (xi - gi).max(0.0)).abs())
        .fold(0.0, f64::max)
}

/// Coordinates pinned at the bound with the gradient pushing outward.
fn active_set(x: &DVector<f64>, g: &DVector<f64>) -> Vec<bool> {
    x.iter().zip(g.iter()).map(|(&xi, &gi)| xi <= 0.0 && gi > 0.0).collect()
}

fn steepest(g: &DVector<f64>, active: &[bool]) -> DVector<f64> {
    DVector::from_fn(g.len(), |i, _| if active[i] { 0.0 } else { -g[i] })
}

/// Two-loop recursion restricted to the free coordinates.
fn direction(g: &DVector<f64>, active: &[bool], history: &VecDeque<CurvaturePair>) -> DVector<f64> {
    let mut q = -steepest(g, active);
    let Some(last) = history.back() else {
        return -q;
    };

    let mut alphas = Vec::with_capacity(history.len());
    for pair in history.iter().rev() {
        let a = pair.rho * pair.s.dot(&q);
        q.axpy(-a, &pair.y, 1.0);
        alphas.push(a);
    }
    q *= last.s.dot(&last.y) / last.y.norm_squared();
    for (pair, a) in history.iter().zip(alphas.iter().rev()) {
        let beta = pair.rho * pair.y.dot(&q);
        q.axpy(a - beta, &pair.s, 1.0);
    }

    for (qi, &pinned) in q.iter_mut().zip(active) {
        if pinned {
            *qi = 0.0;
        }
    }
    -q
}
