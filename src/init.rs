/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Constrained weight initialization.
//!
//! Three stages, each feeding the next:
//!
//! ```text
//! 1. stable fill      w0 = R / (√N · √(p(1-p)))        (constant magnitude)
//! 2. projection       W ← PWP + (I-P)W(I-P)             (subspace)
//!                     W ← W - W·1·1ᵀ/N                  (row balance)
//!                     w ← |extract(W)|,  W ← decode(w)  (topology + Dale)
//! 3. refinement       for each (ζ, α, β, γ): minimise the target objective,
//!                     warm-started from the previous stage
//! ```

use nalgebra::{DMatrix, DVector};

use crate::error::{FitError, Result};
use crate::linalg::{ensure_shape, ones, spectral_radius};
use crate::model::SubspaceRnn;
use crate::objective::{LossTerms, PenaltyWeights, TargetObjective};
use crate::optimizer::{OptimizerConfig, ProjectedLbfgs};

/// Initializer tuning.
#[derive(Clone, Debug, PartialEq)]
pub struct InitConfig {
    /// Target spectral radius of the stage-1 fill. Default: 0.85.
    pub spectral_radius: f64,
    /// Maximum projection sweeps in stage 2. Default: 50.
    pub projection_iterations: usize,
    /// Stop projecting once `max |Δw|` falls below this. Default: `None`
    /// (always run every sweep).
    pub projection_tolerance: Option<f64>,
    /// Ordered refinement schedule. Default: `[(1, 1, 1, 0)]`.
    pub schedule: Vec<PenaltyWeights>,
    /// Optimizer used by every refinement stage.
    pub optimizer: OptimizerConfig,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            spectral_radius: 0.85,
            projection_iterations: 50,
            projection_tolerance: None,
            schedule: vec![PenaltyWeights::default()],
            optimizer: OptimizerConfig::default(),
        }
    }
}

/// Everything the initializer produces.
#[derive(Clone, Debug, PartialEq)]
pub struct Initialization {
    /// `decode(w)` after stage 2, before refinement.
    pub projected: DMatrix<f64>,
    /// `decode(w)` after the last refinement stage.
    pub refined: DMatrix<f64>,
    /// Decomposed target losses before each stage, then once after the last
    /// (`schedule.len() + 1` entries).
    pub loss_trace: Vec<LossTerms>,
    /// Weight vector at the end of each refinement stage.
    pub stage_weights: Vec<DVector<f64>>,
    /// Final weight vector.
    pub weights: DVector<f64>,
    /// Spectral radius of [`Self::projected`].
    pub projected_spectral_radius: f64,
    /// Spectral radius of [`Self::refined`].
    pub refined_spectral_radius: f64,
}

/// Stage 1: constant-magnitude fill scaled for spectral radius `radius`.
///
/// For a fully dense topology (`p = 1`) the `p(1-p)` variance vanishes and
/// the fill falls back to `radius / √(N·p)`.
pub fn stable_weights(model: &SubspaceRnn, radius: f64) -> DVector<f64> {
    let n = model.n_units() as f64;
    let p = model.topology().sparsity();
    let variance = p * (1.0 - p);
    let w0 = if variance > 0.0 {
        radius / (n.sqrt() * variance.sqrt())
    } else {
        radius / (n * p).sqrt()
    };
    DVector::from_element(model.n_weights(), w0)
}

/// Stage 2: alternating projection onto the subspace, balance and
/// topology/sign constraints. Returns the projected weight vector.
pub fn project_constraints(
    model: &SubspaceRnn,
    w: &DVector<f64>,
    iterations: usize,
    tolerance: Option<f64>,
) -> Result<DVector<f64>> {
    let n = model.n_units();
    let balance = ones(n, n) / n as f64;
    let mut w = w.clone();
    let mut full = model.topology().decode(&w)?;

    for sweep in 0..iterations {
        full = model.subspace().block_diagonalize(&full);
        full = &full - &full * &balance;
        let next = model.topology().extract(&full)?.abs();
        full = model.topology().decode(&next)?;

        let change = (&next - &w).amax();
        w = next;
        tracing::trace!(sweep, change, "projection sweep");
        if tolerance.is_some_and(|tol| change <= tol) {
            break;
        }
    }
    Ok(w)
}

/// Build a stable, subspace-consistent, sign-respecting weight vector whose
/// reduced dynamics approach `a_target`.
pub fn initialize_from_dynamics(
    model: &SubspaceRnn,
    a_target: &DMatrix<f64>,
    config: &InitConfig,
) -> Result<Initialization> {
    let k = model.latent_dim();
    ensure_shape(a_target, k, k, "A_target")?;
    if !(config.spectral_radius > 0.0 && config.spectral_radius.is_finite()) {
        return Err(FitError::InvalidConfig(format!(
            "spectral radius must be positive, got {}",
            config.spectral_radius
        )));
    }

    let seed = stable_weights(model, config.spectral_radius);
    let mut w = project_constraints(
        model,
        &seed,
        config.projection_iterations,
        config.projection_tolerance,
    )?;
    let projected = model.topology().decode(&w)?;

    let optimizer = ProjectedLbfgs::new(config.optimizer.clone());
    let mut loss_trace = Vec::with_capacity(config.schedule.len() + 1);
    let mut stage_weights = Vec::with_capacity(config.schedule.len());

    for (stage, &weights) in config.schedule.iter().enumerate() {
        let objective = TargetObjective::new(model, a_target, weights)?;
        loss_trace.push(objective.terms(&w)?);
        let out = optimizer.minimize(&objective, &w)?;
        tracing::debug!(
            stage,
            loss = out.loss,
            iterations = out.iterations,
            converged = out.converged,
            "refinement stage finished"
        );
        w = out.w;
        stage_weights.push(w.clone());
    }
    loss_trace.push(TargetObjective::new(model, a_target, PenaltyWeights::default())?.terms(&w)?);

    let refined = model.topology().decode(&w)?;
    Ok(Initialization {
        projected_spectral_radius: spectral_radius(&projected),
        refined_spectral_radius: spectral_radius(&refined),
        projected,
        refined,
        loss_trace,
        stage_weights,
        weights: w,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::SignClass;

    fn model(sparsity: f64) -> SubspaceRnn {
        let j = DMatrix::from_row_slice(2, 6, &[
            1.0, 0.0, 0.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, 0.0, 0.0,
        ]);
        SubspaceRnn::new(4, 2, sparsity, j, 11).unwrap()
    }

    #[test]
    fn stable_fill_follows_variance_scaling() {
        let m = model(0.5);
        let w = stable_weights(&m, 0.85);
        let expected = 0.85 / (6f64.sqrt() * 0.5);
        assert!(w.iter().all(|&v| (v - expected).abs() < 1e-12));
    }

    #[test]
    fn stable_fill_is_finite_when_dense() {
        let m = model(1.0);
        let w = stable_weights(&m, 0.85);
        assert!(w.iter().all(|v| v.is_finite() && *v > 0.0));
    }

    #[test]
    fn projection_keeps_signs_and_non_negativity() {
        let m = model(0.6);
        let w = project_constraints(&m, &stable_weights(&m, 0.85), 50, None).unwrap();
        assert!(w.iter().all(|&v| v >= 0.0));
        let full = m.topology().decode(&w).unwrap();
        for (r, c, class) in m.topology().entries() {
            match class {
                SignClass::Excitatory => assert!(full[(r, c)] >= 0.0),
                SignClass::Inhibitory => assert!(full[(r, c)] <= 0.0),
            }
        }
    }

    #[test]
    fn projection_tolerance_stops_early() {
        let m = model(0.6);
        let seed = stable_weights(&m, 0.85);
        let once = project_constraints(&m, &seed, 1, None).unwrap();
        // a huge tolerance accepts the first sweep
        let early = project_constraints(&m, &seed, 50, Some(f64::INFINITY)).unwrap();
        assert_eq!(once, early);
    }

    #[test]
    fn trace_has_one_entry_per_stage_plus_final() {
        let m = model(0.6);
        let a_target = DMatrix::from_row_slice(2, 2, &[0.5, 0.1, 0.1, 0.5]);
        let config = InitConfig {
            schedule: vec![PenaltyWeights::new(1.0, 0.0, 0.0, 0.0), PenaltyWeights::default()],
            ..InitConfig::default()
        };
        let init = initialize_from_dynamics(&m, &a_target, &config).unwrap();
        assert_eq!(init.loss_trace.len(), 3);
        assert_eq!(init.stage_weights.len(), 2);
        assert_eq!(init.weights, init.stage_weights[1]);
        assert!(init.loss_trace.iter().all(LossTerms::is_finite));
        assert!(init.weights.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn empty_schedule_returns_the_projection() {
        let m = model(0.6);
        let a_target = DMatrix::identity(2, 2) * 0.5;
        let config = InitConfig { schedule: Vec::new(), ..InitConfig::default() };
        let init = initialize_from_dynamics(&m, &a_target, &config).unwrap();
        assert_eq!(init.projected, init.refined);
        assert_eq!(init.loss_trace.len(), 1);
        assert!(init.stage_weights.is_empty());
    }

    #[test]
    fn rejects_wrong_target_shape() {
        let m = model(0.6);
        let a_target = DMatrix::identity(3, 3);
        assert!(matches!(
            initialize_from_dynamics(&m, &a_target, &InitConfig::default()),
            Err(FitError::ShapeMismatch { what: "A_target", .. })
        ));
    }
}
