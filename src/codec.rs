/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Mapping between the non-negative weight vector `w` and the signed `N×N`
//! weight matrix `W`.
//!
//! ```text
//! decode:  W[r, c] = sign(class_k) · w[k]   for (r, c) = position(k), 0 elsewhere
//! encode:  w[k]    = sign(class_k) · W[r, c]
//! ```
//!
//! Two extraction flavours exist:
//!
//! - [`WeightTopology::encode`] is strict: it refuses matrices with non-zero
//!   mass outside the topology.
//! - [`WeightTopology::extract`] reads only the topology entries and ignores
//!   everything else. Gradients and the initializer's projection step go
//!   through this one, since both routinely produce off-topology mass that
//!   must be discarded.
//!
//! `w` is the single source of truth; `W` is rebuilt on demand and never
//! cached.

use nalgebra::{DMatrix, DVector};

use crate::error::{FitError, Result};
use crate::linalg::{ensure_len, ensure_shape};
use crate::topology::WeightTopology;

impl WeightTopology {
    /// Build the signed full matrix from a weight vector.
    ///
    /// Fails with [`FitError::ShapeMismatch`] when `w.len() != n_weights()`.
    pub fn decode(&self, w: &DVector<f64>) -> Result<DMatrix<f64>> {
        ensure_len(w, self.n_weights(), "weight vector")?;
        let n = self.n_units();
        let mut m = DMatrix::zeros(n, n);
        for (k, (r, c, class)) in self.entries().enumerate() {
            m[(r, c)] = class.sign() * w[k];
        }
        Ok(m)
    }

    /// Sign-aware read of the topology entries; off-topology mass is ignored.
    ///
    /// Entries carrying the wrong sign come back negative.
    pub fn extract(&self, m: &DMatrix<f64>) -> Result<DVector<f64>> {
        let n = self.n_units();
        ensure_shape(m, n, n, "weight matrix")?;
        Ok(DVector::from_iterator(
            self.n_weights(),
            self.entries().map(|(r, c, class)| class.sign() * m[(r, c)]),
        ))
    }

    /// Strict inverse of [`Self::decode`].
    ///
    /// Fails with [`FitError::OutOfTopology`] at the first non-zero entry that
    /// is not part of the topology (row-major scan).
    pub fn encode(&self, m: &DMatrix<f64>) -> Result<DVector<f64>> {
        let n = self.n_units();
        ensure_shape(m, n, n, "weight matrix")?;
        let mut on_topology = vec![false; n * n];
        for &flat in self.indices() {
            on_topology[flat] = true;
        }
        for row in 0..n {
            for col in 0..n {
                let value = m[(row, col)];
                if value != 0.0 && !on_topology[row * n + col] {
                    return Err(FitError::OutOfTopology { row, col, value });
                }
            }
        }
        self.extract(m)
    }
}
