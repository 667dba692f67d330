/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! The fixed latent subspace spanned by the rows of the `K×N` projection `J`.
//!
//! ```text
//! J⁺      Moore-Penrose pseudo-inverse (N×K)
//! P       = J⁺J        orthogonal projector onto the row space of J
//! I - P                projector onto its complement
//! J_aux   = (J·Jᵀ)⁻¹   metric of the latent noise, Q = s·J·Jᵀ
//! A       = J·W·J⁺     reduced K×K dynamics
//! ```
//!
//! All of these are computed once when the subspace is built; `J` is
//! immutable for the lifetime of a model.

use nalgebra::DMatrix;

use crate::error::{FitError, Result};
use crate::linalg::{ensure_shape, invert};

const PINV_EPS: f64 = 1e-12;

/// Reduce a full weight matrix to latent dynamics: `A = J·W·J⁺`.
///
/// Stand-alone form that computes `J⁺` on every call; models go through
/// [`Subspace::reduce`] instead.
pub fn reduce_to_latent_dynamics(w: &DMatrix<f64>, j: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    ensure_shape(w, j.ncols(), j.ncols(), "weight matrix")?;
    let j_pinv = pseudo_inverse(j)?;
    Ok(j * w * j_pinv)
}

fn pseudo_inverse(j: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    j.clone()
        .pseudo_inverse(PINV_EPS)
        .map_err(|e| FitError::InvalidConfig(format!("pseudo-inverse of J failed: {e}")))
}

/// Precomputed algebra of the projection `J`.
#[derive(Clone, Debug, PartialEq)]
pub struct Subspace {
    j: DMatrix<f64>,
    j_pinv: DMatrix<f64>,
    projector: DMatrix<f64>,
    complement: DMatrix<f64>,
    j_aux: DMatrix<f64>,
}

impl Subspace {
    /// Build from a `K×N` projection with `0 < K ≤ N`.
    ///
    /// Fails with [`FitError::SingularMatrix`] if `J·Jᵀ` is not invertible
    /// (rows of `J` linearly dependent).
    pub fn new(j: DMatrix<f64>) -> Result<Self> {
        let (k, n) = j.shape();
        if k == 0 || k > n {
            return Err(FitError::InvalidConfig(format!(
                "J must be K×N with 0 < K ≤ N, got {k}×{n}"
            )));
        }
        let j_aux = invert(&(&j * j.transpose()), "J·Jᵀ")?;
        let j_pinv = pseudo_inverse(&j)?;
        let projector = &j_pinv * &j;
        let complement = DMatrix::identity(n, n) - &projector;
        Ok(Self { j, j_pinv, projector, complement, j_aux })
    }

    /// Latent dimension `K`.
    pub fn latent_dim(&self) -> usize {
        self.j.nrows()
    }

    /// Network dimension `N`.
    pub fn n_units(&self) -> usize {
        self.j.ncols()
    }

    /// The projection `J`.
    pub fn j(&self) -> &DMatrix<f64> {
        &self.j
    }

    /// `J⁺`.
    pub fn j_pinv(&self) -> &DMatrix<f64> {
        &self.j_pinv
    }

    /// `P = J⁺J`.
    pub fn projector(&self) -> &DMatrix<f64> {
        &self.projector
    }

    /// `I - P`.
    pub fn complement(&self) -> &DMatrix<f64> {
        &self.complement
    }

    /// `(J·Jᵀ)⁻¹`.
    pub fn j_aux(&self) -> &DMatrix<f64> {
        &self.j_aux
    }

    /// `A = J·W·J⁺`.
    pub fn reduce(&self, w: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        ensure_shape(w, self.n_units(), self.n_units(), "weight matrix")?;
        Ok(&self.j * w * &self.j_pinv)
    }

    /// `J·W·(I - P)`: the part of the dynamics that leaks out of the subspace.
    pub fn leakage(&self, w: &DMatrix<f64>) -> DMatrix<f64> {
        &self.j * w * &self.complement
    }

    /// `P·W·P + (I-P)·W·(I-P)`: block-diagonalise `W` with respect to the
    /// subspace and its complement.
    pub fn block_diagonalize(&self, w: &DMatrix<f64>) -> DMatrix<f64> {
        &self.projector * w * &self.projector + &self.complement * w * &self.complement
    }

    /// Latent process-noise covariance `Q = s·J·Jᵀ`.
    pub fn dynamics_covariance(&self, s: f64) -> DMatrix<f64> {
        &self.j * self.j.transpose() * s
    }

    /// Network-level noise covariance `s·I_N`.
    pub fn network_covariance(&self, s: f64) -> DMatrix<f64> {
        DMatrix::identity(self.n_units(), self.n_units()) * s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinate_j() -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 4, &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0])
    }

    #[test]
    fn projector_is_idempotent() {
        let j = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 0.0, 0.0, 1.0, 1.0]);
        let s = Subspace::new(j).unwrap();
        let p = s.projector();
        assert!((p * p - p).norm() < 1e-10);
        assert!((s.j() * s.complement()).norm() < 1e-10);
    }

    #[test]
    fn coordinate_projection_reduces_to_top_left_block() {
        let s = Subspace::new(coordinate_j()).unwrap();
        let w = DMatrix::from_fn(4, 4, |r, c| (r * 4 + c) as f64);
        let a = s.reduce(&w).unwrap();
        assert_eq!(a.shape(), (2, 2));
        assert!((a - w.view((0, 0), (2, 2)).clone_owned()).norm() < 1e-12);
    }

    #[test]
    fn free_function_matches_method() {
        let j = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 0.0, 0.0, 1.0, 1.0]);
        let s = Subspace::new(j.clone()).unwrap();
        let w = DMatrix::from_fn(3, 3, |r, c| 0.1 * (r as f64) - 0.2 * (c as f64));
        let a1 = reduce_to_latent_dynamics(&w, &j).unwrap();
        let a2 = s.reduce(&w).unwrap();
        assert!((a1 - a2).norm() < 1e-12);
    }

    #[test]
    fn block_diagonal_matrix_has_no_leakage() {
        let s = Subspace::new(coordinate_j()).unwrap();
        let w = DMatrix::from_fn(4, 4, |r, c| 1.0 + (r + 2 * c) as f64);
        let b = s.block_diagonalize(&w);
        assert!(s.leakage(&b).norm() < 1e-12);
        assert!(s.leakage(&w).norm() > 0.0);
    }

    #[test]
    fn dependent_rows_are_singular() {
        let j = DMatrix::from_row_slice(2, 3, &[1.0, 1.0, 0.0, 2.0, 2.0, 0.0]);
        assert_eq!(Subspace::new(j), Err(FitError::SingularMatrix { what: "J·Jᵀ" }));
    }

    #[test]
    fn rejects_wide_latent() {
        let j = DMatrix::<f64>::identity(3, 2);
        assert!(matches!(Subspace::new(j), Err(FitError::InvalidConfig(_))));
    }

    #[test]
    fn dynamics_covariance_scales() {
        let s = Subspace::new(coordinate_j()).unwrap();
        assert_eq!(s.dynamics_covariance(0.5), DMatrix::identity(2, 2) * 0.5);
    }
}
