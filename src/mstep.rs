/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Closed-form M-step for every parameter except the recurrent weights.
//!
//! # Sufficient statistics
//!
//! Accumulated over all trials `u` and steps `t` of the smoothed posterior:
//!
//! ```text
//! M1     = Σ m_t                       Y1 = Σ y_t
//! M1_T   = Σ (cov_t + m_t m_tᵀ)        Y2 = Σ y_t y_tᵀ
//! M_next = Σ (cov_next_t + m_t m_{t+1}ᵀ)   Ỹ = Σ y_t m_tᵀ
//! ```
//!
//! plus first/last-step sums and, per input segment `g`, the sums of
//! `m_t` ("prev") and `m_{t+1}` ("next") over the transitions `t → t+1`
//! driven by `b[g]`.
//!
//! # Updates
//!
//! ```text
//! mu0 = mean_u m[u,0]
//! Q0  = mean_u cov[u,0] + M_first/U - mu0·mu0ᵀ
//! C   = (Y1·M1ᵀ - TU·Ỹ)(M1·M1ᵀ - TU·M1_T)⁻¹
//! d   = (Y1 - C·M1)/TU
//! R   = (Y2 + TU·ddᵀ - dY1ᵀ - Y1dᵀ - ỸCᵀ - CỸᵀ + dM1ᵀCᵀ + CM1dᵀ + C·M1_T·Cᵀ)/TU
//! b_g = next_g/n_g - A·prev_g/n_g
//! s   = tr(J_aux·[E_next + A·E_prev·Aᵀ - 2A·M_next
//!              + Σ_g (n_g b_g b_gᵀ - 2 b_g (next_g - A prev_g)ᵀ)]) / (K(T-1)U)
//! ```
//!
//! where `E_next` / `E_prev` are the second moments summed over `t ≥ 1` /
//! `t ≤ T-2`. The weight vector is never touched here.

use nalgebra::{DMatrix, DVector};

use crate::error::{FitError, Result};
use crate::kalman::SmoothedTrajectory;
use crate::linalg::{ensure_len, invert, symmetrize};
use crate::model::{input_segment, switch_step, LdsParams, Observations};
use crate::subspace::Subspace;

/// Per-segment transition sums.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentSums {
    /// `Σ m_t` over transitions in the segment.
    pub prev: DVector<f64>,
    /// `Σ m_{t+1}` over the same transitions.
    pub next: DVector<f64>,
    /// Number of transitions summed (`U ×` steps in the segment).
    pub count: usize,
}

impl SegmentSums {
    fn zeros(k: usize) -> Self {
        Self { prev: DVector::zeros(k), next: DVector::zeros(k), count: 0 }
    }
}

/// Second-moment statistics of the smoothed latents and the observations.
#[derive(Clone, Debug, PartialEq)]
pub struct SufficientStats {
    /// Trial count `U`.
    pub n_trials: usize,
    /// Steps per trial `T`.
    pub n_steps: usize,
    /// `Σ m_t`.
    pub m1: DVector<f64>,
    /// `Σ (cov_t + m_t m_tᵀ)`.
    pub m1_t: DMatrix<f64>,
    /// `Σ (cov_next_t + m_t m_{t+1}ᵀ)`.
    pub m_next: DMatrix<f64>,
    /// `Σ y_t`.
    pub y1: DVector<f64>,
    /// `Σ y_t y_tᵀ`.
    pub y2: DMatrix<f64>,
    /// `Σ y_t m_tᵀ`.
    pub y_tilde: DMatrix<f64>,
    /// `Σ_u m[u,0]`.
    pub first_mean: DVector<f64>,
    /// `Σ_u cov[u,0]`.
    pub first_cov: DMatrix<f64>,
    /// `Σ_u m[u,0] m[u,0]ᵀ`.
    pub m_first: DMatrix<f64>,
    /// `Σ_u cov[u,T-1]`.
    pub last_cov: DMatrix<f64>,
    /// `Σ_u m[u,T-1] m[u,T-1]ᵀ`.
    pub m_last: DMatrix<f64>,
    /// Transition sums for `b[0]` and `b[1]`.
    pub segments: [SegmentSums; 2],
}

impl SufficientStats {
    /// Accumulate statistics from the observations and their smoothed
    /// posteriors (one per trial, same order).
    pub fn accumulate(y: &Observations, smoothed: &[SmoothedTrajectory]) -> Result<Self> {
        if smoothed.len() != y.n_trials() {
            return Err(FitError::ShapeMismatch {
                what: "smoothed trials",
                expected: (y.n_trials(), 1),
                actual: (smoothed.len(), 1),
            });
        }
        let n_steps = y.n_steps();
        let dim = y.dim();
        let k = smoothed.first().map_or(0, |s| s.m.first().map_or(0, |m| m.len()));
        let switch = switch_step(n_steps);

        let mut stats = Self {
            n_trials: y.n_trials(),
            n_steps,
            m1: DVector::zeros(k),
            m1_t: DMatrix::zeros(k, k),
            m_next: DMatrix::zeros(k, k),
            y1: DVector::zeros(dim),
            y2: DMatrix::zeros(dim, dim),
            y_tilde: DMatrix::zeros(dim, k),
            first_mean: DVector::zeros(k),
            first_cov: DMatrix::zeros(k, k),
            m_first: DMatrix::zeros(k, k),
            last_cov: DMatrix::zeros(k, k),
            m_last: DMatrix::zeros(k, k),
            segments: [SegmentSums::zeros(k), SegmentSums::zeros(k)],
        };

        for (trial, post) in y.trials().iter().zip(smoothed) {
            if post.len() != n_steps || post.cov_next.len() + 1 != n_steps {
                return Err(FitError::ShapeMismatch {
                    what: "smoothed trajectory",
                    expected: (n_steps, 1),
                    actual: (post.len(), 1),
                });
            }
            for t in 0..n_steps {
                let m = &post.m[t];
                ensure_len(m, k, "smoothed mean")?;
                let yt = &trial[t];
                stats.m1 += m;
                stats.m1_t += &post.cov[t] + m * m.transpose();
                stats.y1 += yt;
                stats.y2 += yt * yt.transpose();
                stats.y_tilde += yt * m.transpose();
                if t + 1 < n_steps {
                    let m_next = &post.m[t + 1];
                    stats.m_next += &post.cov_next[t] + m * m_next.transpose();
                    let seg = &mut stats.segments[input_segment(t, switch)];
                    seg.prev += m;
                    seg.next += m_next;
                    seg.count += 1;
                }
            }
            let first = &post.m[0];
            let last = &post.m[n_steps - 1];
            stats.first_mean += first;
            stats.first_cov += &post.cov[0];
            stats.m_first += first * first.transpose();
            stats.last_cov += &post.cov[n_steps - 1];
            stats.m_last += last * last.transpose();
        }

        Ok(stats)
    }

    /// Latent dimension `K`.
    pub fn latent_dim(&self) -> usize {
        self.m1.len()
    }

    /// `Σ_{t<T-1} (cov_t + m_t m_tᵀ)`.
    pub fn m1_t1(&self) -> DMatrix<f64> {
        &self.m1_t - &self.last_cov - &self.m_last
    }

    /// `Σ_{t≥1} (cov_t + m_t m_tᵀ)`.
    pub fn m2_t(&self) -> DMatrix<f64> {
        &self.m1_t - &self.first_cov - &self.m_first
    }

    /// Transition moments for the weight objective under input `b`.
    pub fn transition_moments(&self, b: &[DVector<f64>; 2]) -> TransitionMoments {
        let aux = self
            .segments
            .iter()
            .zip(b)
            .fold(DMatrix::zeros(self.latent_dim(), self.latent_dim()), |acc, (seg, bg)| {
                acc + bg * seg.prev.transpose()
            });
        TransitionMoments { m1_t1: self.m1_t1(), m_next: self.m_next.clone(), aux }
    }
}

/// Statistics entering the weight part of the expected log-likelihood.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionMoments {
    /// `Σ_{t<T-1} E[x_t x_tᵀ]`.
    pub m1_t1: DMatrix<f64>,
    /// `Σ E[x_t x_{t+1}ᵀ]`.
    pub m_next: DMatrix<f64>,
    /// `Σ b[τ] m_tᵀ` over transitions.
    pub aux: DMatrix<f64>,
}

/// Analytic update of `(b, s, mu0, Q0, C, d, R)`.
///
/// `a` is the reduced dynamics of the current weights. Segments without any
/// transition (e.g. segment 1 when `T = 2`) keep `previous.b[g]`; with
/// `T = 1` the noise scale keeps `previous.s`.
pub fn closed_form_m_step(
    stats: &SufficientStats,
    subspace: &Subspace,
    a: &DMatrix<f64>,
    previous: &LdsParams,
) -> Result<LdsParams> {
    let k = stats.latent_dim();
    let u = stats.n_trials as f64;
    let tu = (stats.n_trials * stats.n_steps) as f64;

    // first latent
    let mu0 = &stats.first_mean / u;
    let q0 = symmetrize(&(&stats.first_cov / u + &stats.m_first / u - &mu0 * mu0.transpose()));

    // observation model
    let lhs = &stats.y1 * stats.m1.transpose() - &stats.y_tilde * tu;
    let gram = &stats.m1 * stats.m1.transpose() - &stats.m1_t * tu;
    let c = lhs * invert(&gram, "M1·M1ᵀ - TU·M1_T")?;
    let d = (&stats.y1 - &c * &stats.m1) / tu;
    let ct = c.transpose();
    let r = (&stats.y2 + &d * d.transpose() * tu
        - &d * stats.y1.transpose()
        - &stats.y1 * d.transpose()
        - &stats.y_tilde * &ct
        - &c * stats.y_tilde.transpose()
        + &d * stats.m1.transpose() * &ct
        + &c * &stats.m1 * d.transpose()
        + &c * &stats.m1_t * &ct)
        / tu;
    let r = symmetrize(&r);

    // latent input, one mean difference per segment
    let mut b = previous.b.clone();
    for (bg, seg) in b.iter_mut().zip(&stats.segments) {
        if seg.count > 0 {
            let n = seg.count as f64;
            *bg = &seg.next / n - a * (&seg.prev / n);
        }
    }

    // noise scale, measured in the J metric
    let transitions: usize = stats.segments.iter().map(|seg| seg.count).sum();
    let s = if transitions == 0 {
        previous.s
    } else {
        let core = stats.m2_t() + a * stats.m1_t1() * a.transpose() - a * &stats.m_next * 2.0;
        let drive = stats.segments.iter().zip(&b).fold(DMatrix::zeros(k, k), |acc, (seg, bg)| {
            acc + bg * bg.transpose() * seg.count as f64
                - bg * (&seg.next - a * &seg.prev).transpose() * 2.0
        });
        let j_aux = subspace.j_aux();
        let dof = (k * (stats.n_steps - 1) * stats.n_trials) as f64;
        ((j_aux * core).trace() + (j_aux * drive).trace()) / dof
    };

    Ok(LdsParams { b, s, mu0, q0, c, d, r })
}
