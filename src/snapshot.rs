/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Portable snapshot of a fitted model for persistence and transport.
//!
//! # Layout
//!
//! ```text
//! version      u16 = 1
//! topology     N_e, N_i, sparsity, seed   (enough to rebuild the index set)
//! j            K×N projection
//! w            non-negative weight vector
//! params       b[0], b[1], s, mu0, Q0, C, d, R
//! ```
//!
//! Matrices are stored row-major as [`MatrixRecord`]s. The topology itself is
//! not stored: it is a pure function of `(N_e, N_i, sparsity, seed)` and is
//! rebuilt on [`ModelSnapshot::restore`].
//!
//! This module requires the `serde` feature.

use nalgebra::{DMatrix, DVector};

use crate::error::{FitError, Result};
use crate::model::{LdsParams, ModelState, SubspaceRnn};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u16 = 1;

/// Dense row-major matrix.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct MatrixRecord {
    /// Row count.
    pub rows: usize,
    /// Column count.
    pub cols: usize,
    /// `rows × cols` values, row-major.
    pub data: Vec<f64>,
}

impl From<&DMatrix<f64>> for MatrixRecord {
    fn from(m: &DMatrix<f64>) -> Self {
        Self {
            rows: m.nrows(),
            cols: m.ncols(),
            data: m.transpose().iter().copied().collect(),
        }
    }
}

impl MatrixRecord {
    fn to_matrix(&self, what: &'static str) -> Result<DMatrix<f64>> {
        if self.data.len() != self.rows * self.cols {
            return Err(FitError::ShapeMismatch {
                what,
                expected: (self.rows, self.cols),
                actual: (self.data.len(), 1),
            });
        }
        Ok(DMatrix::from_row_slice(self.rows, self.cols, &self.data))
    }
}

/// Serializable [`LdsParams`].
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct ParamsRecord {
    /// Input before and after the switch.
    pub b: [Vec<f64>; 2],
    /// Process-noise scale.
    pub s: f64,
    /// First-latent mean.
    pub mu0: Vec<f64>,
    /// First-latent covariance.
    pub q0: MatrixRecord,
    /// Observation matrix.
    pub c: MatrixRecord,
    /// Observation offset.
    pub d: Vec<f64>,
    /// Observation-noise covariance.
    pub r: MatrixRecord,
}

impl From<&LdsParams> for ParamsRecord {
    fn from(p: &LdsParams) -> Self {
        Self {
            b: [p.b[0].as_slice().to_vec(), p.b[1].as_slice().to_vec()],
            s: p.s,
            mu0: p.mu0.as_slice().to_vec(),
            q0: MatrixRecord::from(&p.q0),
            c: MatrixRecord::from(&p.c),
            d: p.d.as_slice().to_vec(),
            r: MatrixRecord::from(&p.r),
        }
    }
}

impl ParamsRecord {
    fn to_params(&self) -> Result<LdsParams> {
        Ok(LdsParams {
            b: [DVector::from_column_slice(&self.b[0]), DVector::from_column_slice(&self.b[1])],
            s: self.s,
            mu0: DVector::from_column_slice(&self.mu0),
            q0: self.q0.to_matrix("Q0")?,
            c: self.c.to_matrix("C")?,
            d: DVector::from_column_slice(&self.d),
            r: self.r.to_matrix("R")?,
        })
    }
}

/// Everything needed to rebuild a model and its fitted state.
///
/// # Example
///
/// ```rust,ignore
/// let snapshot = ModelSnapshot::capture(&model, &fit.state);
/// let json = serde_json::to_string(&snapshot)?;
/// let (model, state) = serde_json::from_str::<ModelSnapshot>(&json)?.restore()?;
/// ```
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct ModelSnapshot {
    /// Format version, [`SNAPSHOT_VERSION`] for new snapshots.
    pub version: u16,
    /// Excitatory unit count.
    pub n_excitatory: usize,
    /// Inhibitory unit count.
    pub n_inhibitory: usize,
    /// Fraction of populated entries.
    pub sparsity: f64,
    /// Topology seed.
    pub seed: u64,
    /// Latent projection `J`.
    pub j: MatrixRecord,
    /// Weight vector.
    pub w: Vec<f64>,
    /// Remaining parameters.
    pub params: ParamsRecord,
}

impl ModelSnapshot {
    /// Snapshot `state` fitted on `model`.
    pub fn capture(model: &SubspaceRnn, state: &ModelState) -> Self {
        let topology = model.topology();
        Self {
            version: SNAPSHOT_VERSION,
            n_excitatory: topology.n_excitatory(),
            n_inhibitory: topology.n_inhibitory(),
            sparsity: topology.sparsity(),
            seed: topology.seed(),
            j: MatrixRecord::from(model.subspace().j()),
            w: state.w.as_slice().to_vec(),
            params: ParamsRecord::from(&state.params),
        }
    }

    /// Rebuild the model and state, validating every shape and the sign of
    /// every weight.
    pub fn restore(&self) -> Result<(SubspaceRnn, ModelState)> {
        if self.version != SNAPSHOT_VERSION {
            return Err(FitError::InvalidConfig(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }
        let model = SubspaceRnn::new(
            self.n_excitatory,
            self.n_inhibitory,
            self.sparsity,
            self.j.to_matrix("J")?,
            self.seed,
        )?;
        let w = DVector::from_column_slice(&self.w);
        crate::linalg::ensure_len(&w, model.n_weights(), "weight vector")?;
        if let Some(k) = w.iter().position(|v| !(*v >= 0.0)) {
            return Err(FitError::InvalidConfig(format!(
                "weight {k} is {}, weights must be non-negative",
                w[k]
            )));
        }
        let params = self.params.to_params()?;
        params.validate(model.latent_dim(), params.obs_dim())?;
        Ok((model, ModelState { w, params }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_record_is_row_major() {
        let m = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let rec = MatrixRecord::from(&m);
        assert_eq!(rec.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(rec.to_matrix("m").unwrap(), m);
    }

    #[test]
    fn truncated_matrix_is_rejected() {
        let rec = MatrixRecord { rows: 2, cols: 2, data: vec![1.0, 2.0, 3.0] };
        assert!(matches!(rec.to_matrix("m"), Err(FitError::ShapeMismatch { what: "m", .. })));
    }
}
