/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Expectation-Maximization over `(w, b, s, mu0, Q0, C, d, R)`.
//!
//! ```text
//! Init ──► E-step ──► closed-form M-step ──► weight M-step ──► record loss
//!             ▲                                                    │
//!             └─────────────── until the stopping policy ──────────┘
//! ```
//!
//! Each stage is a pure function of immutable inputs: [`e_step`] smooths
//! every trial (in parallel with the `parallel` feature), [`m_step_closed_form`]
//! returns fresh [`LdsParams`], [`m_step_weights`] returns a fresh weight
//! vector. [`fit_em`] replaces the whole [`ModelState`] after each iteration.
//!
//! The loss trace holds the unweighted `(likelihood, leakage, balance)` terms
//! once before any update and once after every M-step.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use nalgebra::DVector;

use crate::error::{FitError, Result};
use crate::kalman::{posterior, SmoothedTrajectory};
use crate::linalg::ensure_len;
use crate::model::{LdsParams, ModelState, Observations, SubspaceRnn};
use crate::mstep::{closed_form_m_step, SufficientStats};
use crate::objective::{EmWeightObjective, LossTerms};
use crate::optimizer::{OptimizeResult, OptimizerConfig, ProjectedLbfgs};

/// When to stop iterating.
#[derive(Clone, Debug, PartialEq)]
pub struct StoppingPolicy {
    /// Iteration budget. Default: 300.
    pub max_iterations: usize,
    /// Stop early once the likelihood term changes by at most this much
    /// between iterations. Default: `None` (always use the full budget).
    pub tolerance: Option<f64>,
}

impl Default for StoppingPolicy {
    fn default() -> Self {
        Self { max_iterations: 300, tolerance: None }
    }
}

/// EM tuning.
#[derive(Clone, Debug, PartialEq)]
pub struct EmConfig {
    /// Weight of the subspace-leakage penalty. Default: 1.
    pub alpha: f64,
    /// Weight of the row-sum energy penalty. Default: 1.
    pub beta: f64,
    /// Iteration budget and optional early exit.
    pub stopping: StoppingPolicy,
    /// Optimizer for the weight M-step.
    pub optimizer: OptimizerConfig,
}

impl Default for EmConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            stopping: StoppingPolicy::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

/// Result of [`fit_em`].
#[derive(Clone, Debug, PartialEq)]
pub struct EmFit {
    /// Final weights and parameters.
    pub state: ModelState,
    /// `iterations + 1` decomposed losses.
    pub loss_trace: Vec<LossTerms>,
    /// EM iterations run.
    pub iterations: usize,
    /// `true` when the tolerance ended the run before the budget.
    pub stopped_early: bool,
}

// ─── stages ──────────────────────────────────────────────────────────────────

/// Smooth every trial under the current state.
pub fn e_step(model: &SubspaceRnn, y: &Observations, state: &ModelState) -> Result<Vec<SmoothedTrajectory>> {
    let (_, a) = model.build(&state.w)?;
    let q = model.dynamics_covariance(state.params.s);
    let params = &state.params;

    #[cfg(feature = "parallel")]
    let smoothed = y.trials().par_iter().map(|trial| posterior(trial, &a, &q, params)).collect();
    #[cfg(not(feature = "parallel"))]
    let smoothed = y.trials().iter().map(|trial| posterior(trial, &a, &q, params)).collect();

    smoothed
}

/// Analytic update of every parameter except the weights, using the reduced
/// dynamics of `state.w`.
pub fn m_step_closed_form(
    model: &SubspaceRnn,
    stats: &SufficientStats,
    state: &ModelState,
) -> Result<LdsParams> {
    let (_, a) = model.build(&state.w)?;
    closed_form_m_step(stats, model.subspace(), &a, &state.params)
}

/// Minimise the penalised expected transition likelihood over `w ≥ 0`,
/// warm-started from `w`.
///
/// Fails with [`FitError::SingularMatrix`] when `params.s` is not positive:
/// the transition covariance `s·J·Jᵀ` has no inverse.
pub fn m_step_weights(
    model: &SubspaceRnn,
    stats: &SufficientStats,
    params: &LdsParams,
    w: &DVector<f64>,
    config: &EmConfig,
) -> Result<OptimizeResult> {
    if !(params.s > 0.0) {
        return Err(FitError::SingularMatrix { what: "s·J·Jᵀ" });
    }
    let moments = stats.transition_moments(&params.b);
    let objective = EmWeightObjective::new(model, &moments, params.s, config.alpha, config.beta)?;
    ProjectedLbfgs::new(config.optimizer.clone()).minimize(&objective, w)
}

/// Unweighted `(likelihood, leakage, balance)` for `state` under `stats`.
pub fn check_loss(model: &SubspaceRnn, stats: &SufficientStats, state: &ModelState) -> Result<LossTerms> {
    let moments = stats.transition_moments(&state.params.b);
    EmWeightObjective::new(model, &moments, state.params.s, 1.0, 1.0)?.terms(&state.w)
}

// ─── loop ────────────────────────────────────────────────────────────────────

/// Fit `(w, b, s, mu0, Q0, C, d, R)` to `y` starting from `init`.
///
/// The initial `s` must be positive. A closed-form step that drives `s` to
/// zero (noiseless data) ends the fit with [`FitError::SingularMatrix`].
pub fn fit_em(
    model: &SubspaceRnn,
    y: &Observations,
    init: ModelState,
    config: &EmConfig,
) -> Result<EmFit> {
    ensure_len(&init.w, model.n_weights(), "weight vector")?;
    init.params.validate(model.latent_dim(), y.dim())?;
    if !(init.params.s > 0.0) {
        return Err(FitError::InvalidConfig(format!(
            "EM needs a positive initial noise scale, got {}",
            init.params.s
        )));
    }

    let budget = config.stopping.max_iterations;
    let mut state = init;
    let mut stats = SufficientStats::accumulate(y, &e_step(model, y, &state)?)?;
    let mut loss_trace = Vec::with_capacity(budget + 1);
    loss_trace.push(check_loss(model, &stats, &state)?);

    let mut iterations = 0;
    let mut stopped_early = false;
    while iterations < budget {
        // the first E-step already ran with the initial parameters
        if iterations > 0 {
            stats = SufficientStats::accumulate(y, &e_step(model, y, &state)?)?;
        }
        let params = m_step_closed_form(model, &stats, &state)?;
        let weights = m_step_weights(model, &stats, &params, &state.w, config)?;
        state = ModelState { w: weights.w, params };

        let terms = check_loss(model, &stats, &state)?;
        iterations += 1;
        tracing::debug!(
            iteration = iterations,
            likelihood = terms.data,
            leakage = terms.leakage,
            balance = terms.balance,
            s = state.params.s,
            optimizer_converged = weights.converged,
            "EM iteration"
        );

        let previous = loss_trace.last().map_or(f64::INFINITY, |t: &LossTerms| t.data);
        loss_trace.push(terms);
        if let Some(tol) = config.stopping.tolerance {
            if (terms.data - previous).abs() <= tol {
                stopped_early = iterations < budget;
                break;
            }
        }
    }

    Ok(EmFit { state, loss_trace, iterations, stopped_early })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::{generate_latents_and_observations, generate_parameters};
    use nalgebra::DMatrix;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model() -> SubspaceRnn {
        let j = DMatrix::from_row_slice(2, 4, &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        SubspaceRnn::new(2, 2, 1.0, j, 3).unwrap()
    }

    fn dataset(m: &SubspaceRnn) -> (Observations, ModelState) {
        let mut rng = StdRng::seed_from_u64(21);
        let params = generate_parameters(&mut rng, 2, 3);
        let w = DVector::from_element(m.n_weights(), 0.1);
        let (_, a) = m.build(&w).unwrap();
        let sim = generate_latents_and_observations(&mut rng, m, 8, 10, &a, &params).unwrap();
        (sim.observations, ModelState { w, params })
    }

    #[test]
    fn trace_has_budget_plus_one_finite_entries() {
        let m = model();
        let (y, init) = dataset(&m);
        let config = EmConfig {
            stopping: StoppingPolicy { max_iterations: 3, tolerance: None },
            ..EmConfig::default()
        };
        let fit = fit_em(&m, &y, init, &config).unwrap();
        assert_eq!(fit.iterations, 3);
        assert_eq!(fit.loss_trace.len(), 4);
        assert!(!fit.stopped_early);
        assert!(fit.loss_trace.iter().all(LossTerms::is_finite));
        assert!(fit.state.w.iter().all(|&v| v >= 0.0));
        assert!(fit.state.params.s > 0.0);
    }

    #[test]
    fn loose_tolerance_stops_after_one_iteration() {
        let m = model();
        let (y, init) = dataset(&m);
        let config = EmConfig {
            stopping: StoppingPolicy { max_iterations: 50, tolerance: Some(f64::INFINITY) },
            ..EmConfig::default()
        };
        let fit = fit_em(&m, &y, init, &config).unwrap();
        assert_eq!(fit.iterations, 1);
        assert_eq!(fit.loss_trace.len(), 2);
        assert!(fit.stopped_early);
    }

    #[test]
    fn zero_budget_only_records_the_initial_loss() {
        let m = model();
        let (y, init) = dataset(&m);
        let config = EmConfig {
            stopping: StoppingPolicy { max_iterations: 0, tolerance: None },
            ..EmConfig::default()
        };
        let fit = fit_em(&m, &y, init.clone(), &config).unwrap();
        assert_eq!(fit.loss_trace.len(), 1);
        assert_eq!(fit.state, init);
    }

    #[test]
    fn weight_step_never_increases_its_objective() {
        let m = model();
        let (y, state) = dataset(&m);
        let stats = SufficientStats::accumulate(&y, &e_step(&m, &y, &state).unwrap()).unwrap();
        let params = m_step_closed_form(&m, &stats, &state).unwrap();
        let config = EmConfig::default();
        let moments = stats.transition_moments(&params.b);
        let objective = EmWeightObjective::new(&m, &moments, params.s, 1.0, 1.0).unwrap();
        let before = crate::objective::WeightObjective::loss(&objective, &state.w).unwrap();
        let out = m_step_weights(&m, &stats, &params, &state.w, &config).unwrap();
        assert!(out.loss <= before);
    }

    #[test]
    fn zero_noise_scale_makes_the_weight_step_singular() {
        let m = model();
        let (y, state) = dataset(&m);
        let stats = SufficientStats::accumulate(&y, &e_step(&m, &y, &state).unwrap()).unwrap();
        let mut params = m_step_closed_form(&m, &stats, &state).unwrap();
        params.s = 0.0;
        assert_eq!(
            m_step_weights(&m, &stats, &params, &state.w, &EmConfig::default()),
            Err(FitError::SingularMatrix { what: "s·J·Jᵀ" })
        );
    }

    #[test]
    fn rejects_wrong_weight_length() {
        let m = model();
        let (y, mut init) = dataset(&m);
        init.w = DVector::zeros(3);
        assert!(matches!(
            fit_em(&m, &y, init, &EmConfig::default()),
            Err(FitError::ShapeMismatch { .. })
        ));
    }
}
