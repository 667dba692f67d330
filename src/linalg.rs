/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Small dense linear-algebra helpers shared by the E-step and M-step.
//!
//! Every inverse in the crate goes through [`invert`], so a singular matrix
//! always surfaces as [`FitError::SingularMatrix`] naming the matrix.

use nalgebra::{DMatrix, DVector};

use crate::error::{FitError, Result};

/// Invert a square matrix, failing with `SingularMatrix { what }` if the
/// inverse does not exist or is not finite.
pub fn invert(m: &DMatrix<f64>, what: &'static str) -> Result<DMatrix<f64>> {
    ensure_shape(m, m.nrows(), m.nrows(), what)?;
    let inv = m
        .clone()
        .try_inverse()
        .ok_or(FitError::SingularMatrix { what })?;
    if inv.iter().all(|x| x.is_finite()) {
        Ok(inv)
    } else {
        Err(FitError::SingularMatrix { what })
    }
}

/// `(M + Mᵀ) / 2`.
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

/// Check a matrix is `rows × cols`.
pub fn ensure_shape(m: &DMatrix<f64>, rows: usize, cols: usize, what: &'static str) -> Result<()> {
    if m.nrows() == rows && m.ncols() == cols {
        Ok(())
    } else {
        Err(FitError::ShapeMismatch {
            what,
            expected: (rows, cols),
            actual: (m.nrows(), m.ncols()),
        })
    }
}

/// Check a vector has `len` entries.
pub fn ensure_len(v: &DVector<f64>, len: usize, what: &'static str) -> Result<()> {
    if v.len() == len {
        Ok(())
    } else {
        Err(FitError::ShapeMismatch { what, expected: (len, 1), actual: (v.len(), 1) })
    }
}

/// Largest eigenvalue modulus of a square matrix.
pub fn spectral_radius(m: &DMatrix<f64>) -> f64 {
    if m.is_empty() {
        return 0.0;
    }
    m.complex_eigenvalues()
        .iter()
        .map(|z| z.norm())
        .fold(0.0, f64::max)
}

/// Matrix of ones, `rows × cols`.
pub fn ones(rows: usize, cols: usize) -> DMatrix<f64> {
    DMatrix::from_element(rows, cols, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invert_round_trips() {
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 2.0, 3.0]);
        let inv = invert(&m, "m").unwrap();
        let eye = &m * inv;
        assert!((eye - DMatrix::identity(2, 2)).norm() < 1e-12);
    }

    #[test]
    fn invert_reports_singular() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        assert_eq!(invert(&m, "R"), Err(FitError::SingularMatrix { what: "R" }));
    }

    #[test]
    fn invert_rejects_rectangular() {
        let m = DMatrix::<f64>::zeros(2, 3);
        assert!(matches!(invert(&m, "m"), Err(FitError::ShapeMismatch { .. })));
    }

    #[test]
    fn spectral_radius_of_rotation_is_one() {
        let m = DMatrix::from_row_slice(2, 2, &[0.0, -1.0, 1.0, 0.0]);
        assert!((spectral_radius(&m) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn symmetrize_is_symmetric() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 0.0, 1.0]);
        let s = symmetrize(&m);
        assert_eq!(s, s.transpose());
        assert_eq!(s[(0, 1)], 1.0);
    }
}
