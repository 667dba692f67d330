/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Loss/gradient pairs over the non-negative weight vector.
//!
//! Two objectives share the same weight-matrix construction and penalty
//! machinery:
//!
//! ```text
//! target (initializer):
//!   ζ/2‖JWJ⁺ - A*‖² + α/2‖JW(I-P)‖² + β/2·1ᵀWᵀW1 + γ/2·tr(WWᵀ)
//!
//! EM (M-step):
//!   (1/s)[tr(AᵀJ_aux·aux) + ½tr(AᵀJ_aux·A·M1_T1) - tr(J_aux·A·M_next)]
//!     + α/2‖JW(I-P)‖² + β/2·1ᵀWᵀW1
//! ```
//!
//! The EM form carries no `γ` term; the two are kept separate rather than
//! unified. Gradients are formed in matrix space and mapped back to `w`
//! through the sign-aware [`WeightTopology::extract`], so the chain rule
//! through `W = decode(w)` is exact.
//!
//! [`WeightTopology::extract`]: crate::topology::WeightTopology::extract

use nalgebra::{DMatrix, DVector};

use crate::error::{FitError, Result};
use crate::linalg::{ensure_shape, ones};
use crate::mstep::TransitionMoments;
use crate::model::SubspaceRnn;

// ─── shared pieces ───────────────────────────────────────────────────────────

/// Unweighted decomposition of an objective, recorded in loss traces.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LossTerms {
    /// Data term: target fit `½‖A - A*‖²`, or the likelihood term of the EM
    /// objective.
    pub data: f64,
    /// Subspace leakage `½‖JW(I-P)‖²`.
    pub leakage: f64,
    /// Row-sum energy `½·1ᵀWᵀW1`.
    pub balance: f64,
}

impl LossTerms {
    /// `true` when every term is finite.
    pub fn is_finite(&self) -> bool {
        self.data.is_finite() && self.leakage.is_finite() && self.balance.is_finite()
    }
}

/// One `(ζ, α, β, γ)` weighting of the target objective.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PenaltyWeights {
    /// Fit to the target reduced dynamics.
    pub zeta: f64,
    /// Subspace leakage.
    pub alpha: f64,
    /// Row-sum energy (relaxed E-I balance).
    pub beta: f64,
    /// L2 weight magnitude.
    pub gamma: f64,
}

impl PenaltyWeights {
    /// Build from a `(ζ, α, β, γ)` tuple.
    pub const fn new(zeta: f64, alpha: f64, beta: f64, gamma: f64) -> Self {
        Self { zeta, alpha, beta, gamma }
    }
}

impl Default for PenaltyWeights {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0, 0.0)
    }
}

/// Anything the bound-constrained optimizer can minimise.
pub trait WeightObjective {
    /// Objective value at `w`.
    fn loss(&self, w: &DVector<f64>) -> Result<f64>;

    /// Gradient with respect to `w`.
    fn gradient(&self, w: &DVector<f64>) -> Result<DVector<f64>>;

    /// Value and gradient together.
    fn loss_and_gradient(&self, w: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
        Ok((self.loss(w)?, self.gradient(w)?))
    }
}

fn leakage_term(model: &SubspaceRnn, full: &DMatrix<f64>) -> (DMatrix<f64>, f64) {
    let leak = model.subspace().leakage(full);
    let value = 0.5 * leak.norm_squared();
    (leak, value)
}

fn balance_term(full: &DMatrix<f64>) -> f64 {
    let row_sums = full.column_sum();
    0.5 * row_sums.norm_squared()
}

/// `α·JᵀJW(I-P) + β·W11ᵀ`, the gradient of the shared penalties in matrix
/// space.
fn penalty_gradient(
    model: &SubspaceRnn,
    full: &DMatrix<f64>,
    leak: &DMatrix<f64>,
    alpha: f64,
    beta: f64,
) -> DMatrix<f64> {
    let n = model.n_units();
    model.subspace().j().transpose() * leak * alpha + full * ones(n, n) * beta
}

// ─── target objective ────────────────────────────────────────────────────────

/// Match the reduced dynamics to a target `A*` (initializer refinement).
#[derive(Clone, Debug)]
pub struct TargetObjective<'a> {
    model: &'a SubspaceRnn,
    a_target: &'a DMatrix<f64>,
    weights: PenaltyWeights,
}

impl<'a> TargetObjective<'a> {
    /// Objective against `a_target` under one penalty weighting.
    pub fn new(model: &'a SubspaceRnn, a_target: &'a DMatrix<f64>, weights: PenaltyWeights) -> Result<Self> {
        let k = model.latent_dim();
        ensure_shape(a_target, k, k, "A_target")?;
        Ok(Self { model, a_target, weights })
    }

    /// Unweighted `(fit, leakage, balance)` at `w`.
    pub fn terms(&self, w: &DVector<f64>) -> Result<LossTerms> {
        let (full, a) = self.model.build(w)?;
        let res = a - self.a_target;
        let (_, leakage) = leakage_term(self.model, &full);
        Ok(LossTerms { data: 0.5 * res.norm_squared(), leakage, balance: balance_term(&full) })
    }
}

impl WeightObjective for TargetObjective<'_> {
    fn loss(&self, w: &DVector<f64>) -> Result<f64> {
        let (full, a) = self.model.build(w)?;
        let p = &self.weights;
        let res = a - self.a_target;
        let (_, leakage) = leakage_term(self.model, &full);
        Ok(0.5 * p.zeta * res.norm_squared()
            + p.alpha * leakage
            + p.beta * balance_term(&full)
            + 0.5 * p.gamma * full.norm_squared())
    }

    fn gradient(&self, w: &DVector<f64>) -> Result<DVector<f64>> {
        let (full, a) = self.model.build(w)?;
        let p = &self.weights;
        let sub = self.model.subspace();
        let res = a - self.a_target;
        let (leak, _) = leakage_term(self.model, &full);
        let grad = sub.j().transpose() * res * sub.j_pinv().transpose() * p.zeta
            + penalty_gradient(self.model, &full, &leak, p.alpha, p.beta)
            + &full * p.gamma;
        self.model.topology().extract(&grad)
    }
}

// ─── EM objective ────────────────────────────────────────────────────────────

/// Expected negative transition log-likelihood plus penalties (M-step).
#[derive(Clone, Debug)]
pub struct EmWeightObjective<'a> {
    model: &'a SubspaceRnn,
    moments: &'a TransitionMoments,
    s: f64,
    alpha: f64,
    beta: f64,
}

impl<'a> EmWeightObjective<'a> {
    /// Objective for noise scale `s` and penalty weights `alpha`, `beta`.
    ///
    /// Fails with [`FitError::InvalidConfig`] unless `s > 0`.
    pub fn new(
        model: &'a SubspaceRnn,
        moments: &'a TransitionMoments,
        s: f64,
        alpha: f64,
        beta: f64,
    ) -> Result<Self> {
        if !(s > 0.0 && s.is_finite()) {
            return Err(FitError::InvalidConfig(format!(
                "weight objective needs a positive noise scale, got {s}"
            )));
        }
        let k = model.latent_dim();
        ensure_shape(&moments.m1_t1, k, k, "M1_T1")?;
        ensure_shape(&moments.m_next, k, k, "M_next")?;
        ensure_shape(&moments.aux, k, k, "aux")?;
        Ok(Self { model, moments, s, alpha, beta })
    }

    fn likelihood(&self, a: &DMatrix<f64>) -> f64 {
        let j_aux = self.model.subspace().j_aux();
        let at_jaux = a.transpose() * j_aux;
        let drive = (&at_jaux * &self.moments.aux).trace();
        let quad = 0.5 * (&at_jaux * a * &self.moments.m1_t1).trace();
        let cross = (j_aux * a * &self.moments.m_next).trace();
        (drive + quad - cross) / self.s
    }

    /// Unweighted `(likelihood, leakage, balance)` at `w`.
    pub fn terms(&self, w: &DVector<f64>) -> Result<LossTerms> {
        let (full, a) = self.model.build(w)?;
        let (_, leakage) = leakage_term(self.model, &full);
        Ok(LossTerms { data: self.likelihood(&a), leakage, balance: balance_term(&full) })
    }
}

impl WeightObjective for EmWeightObjective<'_> {
    fn loss(&self, w: &DVector<f64>) -> Result<f64> {
        let (full, a) = self.model.build(w)?;
        let (_, leakage) = leakage_term(self.model, &full);
        Ok(self.likelihood(&a) + self.alpha * leakage + self.beta * balance_term(&full))
    }

    fn gradient(&self, w: &DVector<f64>) -> Result<DVector<f64>> {
        let (full, a) = self.model.build(w)?;
        let sub = self.model.subspace();
        let mo = self.moments;
        let d_a = sub.j_aux() * (&mo.aux + &a * &mo.m1_t1 - mo.m_next.transpose()) / self.s;
        let (leak, _) = leakage_term(self.model, &full);
        let grad = sub.j().transpose() * d_a * sub.j_pinv().transpose()
            + penalty_gradient(self.model, &full, &leak, self.alpha, self.beta);
        self.model.topology().extract(&grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> SubspaceRnn {
        let j = DMatrix::from_row_slice(2, 5, &[
            0.6, 0.0, 0.8, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.5, -0.5,
        ]);
        SubspaceRnn::new(3, 2, 0.7, j, 5).unwrap()
    }

    fn weights(model: &SubspaceRnn) -> DVector<f64> {
        DVector::from_fn(model.n_weights(), |k, _| 0.05 + 0.03 * ((k * 7) % 5) as f64)
    }

    fn finite_difference<O: WeightObjective>(obj: &O, w: &DVector<f64>) -> DVector<f64> {
        let h = 1e-6;
        DVector::from_fn(w.len(), |k, _| {
            let mut up = w.clone();
            let mut down = w.clone();
            up[k] += h;
            down[k] -= h;
            (obj.loss(&up).unwrap() - obj.loss(&down).unwrap()) / (2.0 * h)
        })
    }

    fn moments() -> TransitionMoments {
        TransitionMoments {
            m1_t1: DMatrix::from_row_slice(2, 2, &[3.0, 0.4, 0.4, 2.0]),
            m_next: DMatrix::from_row_slice(2, 2, &[1.5, 0.3, -0.2, 1.1]),
            aux: DMatrix::from_row_slice(2, 2, &[0.2, -0.1, 0.05, 0.3]),
        }
    }

    #[test]
    fn target_gradient_matches_finite_difference() {
        let m = model();
        let a_target = DMatrix::from_row_slice(2, 2, &[0.5, 0.1, -0.2, 0.4]);
        let obj = TargetObjective::new(&m, &a_target, PenaltyWeights::new(1.0, 0.7, 0.3, 0.2)).unwrap();
        let w = weights(&m);
        let analytic = obj.gradient(&w).unwrap();
        let numeric = finite_difference(&obj, &w);
        assert!((analytic - numeric).amax() < 1e-6);
    }

    #[test]
    fn em_gradient_matches_finite_difference() {
        let m = model();
        let mo = moments();
        let obj = EmWeightObjective::new(&m, &mo, 0.4, 0.8, 0.6).unwrap();
        let w = weights(&m);
        let analytic = obj.gradient(&w).unwrap();
        let numeric = finite_difference(&obj, &w);
        assert!((analytic - numeric).amax() < 1e-6);
    }

    #[test]
    fn target_terms_recombine_into_loss() {
        let m = model();
        let a_target = DMatrix::identity(2, 2) * 0.3;
        let p = PenaltyWeights::new(2.0, 0.5, 0.25, 0.0);
        let obj = TargetObjective::new(&m, &a_target, p).unwrap();
        let w = weights(&m);
        let t = obj.terms(&w).unwrap();
        let combined = p.zeta * t.data + p.alpha * t.leakage + p.beta * t.balance;
        assert!((obj.loss(&w).unwrap() - combined).abs() < 1e-12);
    }

    #[test]
    fn em_objective_has_no_l2_term() {
        // only the gamma-free form: terms recombine exactly with alpha and beta
        let m = model();
        let mo = moments();
        let obj = EmWeightObjective::new(&m, &mo, 0.4, 0.8, 0.6).unwrap();
        let w = weights(&m);
        let t = obj.terms(&w).unwrap();
        let combined = t.data + 0.8 * t.leakage + 0.6 * t.balance;
        assert!((obj.loss(&w).unwrap() - combined).abs() < 1e-12);
    }

    #[test]
    fn em_objective_requires_positive_noise() {
        let m = model();
        let mo = moments();
        assert!(EmWeightObjective::new(&m, &mo, 0.0, 1.0, 1.0).is_err());
    }
}
