/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Python FFI bindings via PyO3.
//!
//! Matrices cross the boundary as lists of rows (`list[list[float]]`), vectors
//! as `list[float]` and observations as `list[list[list[float]]]` indexed
//! `[trial][step][dim]`.
//!
//! # Building the Python extension
//!
//! ```bash
//! pip install maturin
//! maturin develop --features python-ffi
//! ```
//!
//! # Usage
//!
//! ```python
//! from ei_subspace import SubspaceRnn, LdsParams
//!
//! model = SubspaceRnn(4, 2, 0.5, [[1, 0, 0, 0, 0, 0], [0, 1, 0, 0, 0, 0]], seed=7)
//! projected, refined, trace, stages, w = model.initialize_from_dynamics([[0.5, 0.1], [0.1, 0.5]])
//! params = LdsParams.random(k=2, d=3, seed=1)
//! y = model.simulate(w, params, trials=20, steps=30, seed=2)
//! losses, w_fit, params_fit = model.fit_em(y, w, params, max_iter=50)
//! ```

#![allow(non_snake_case)]

use nalgebra::{DMatrix, DVector};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::em::{fit_em, EmConfig, StoppingPolicy};
use crate::error::FitError;
use crate::init::{initialize_from_dynamics, stable_weights, InitConfig};
use crate::model::{LdsParams as RustParams, ModelState, Observations, SubspaceRnn as RustModel};
use crate::objective::{LossTerms, PenaltyWeights};
use crate::simulate::{generate_latents_and_observations, generate_parameters};

impl From<FitError> for PyErr {
    fn from(e: FitError) -> Self {
        PyValueError::new_err(e.to_string())
    }
}

// ── Conversions ──────────────────────────────────────────────────────────────

fn to_matrix(rows: &[Vec<f64>], what: &str) -> PyResult<DMatrix<f64>> {
    let n_rows = rows.len();
    let n_cols = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|r| r.len() != n_cols) {
        return Err(PyValueError::new_err(format!("{what} must be rectangular")));
    }
    Ok(DMatrix::from_fn(n_rows, n_cols, |r, c| rows[r][c]))
}

fn to_rows(m: &DMatrix<f64>) -> Vec<Vec<f64>> {
    m.row_iter().map(|r| r.iter().copied().collect()).collect()
}

fn to_vector(v: &[f64]) -> DVector<f64> {
    DVector::from_column_slice(v)
}

fn trace_tuples(trace: &[LossTerms]) -> Vec<(f64, f64, f64)> {
    trace.iter().map(|t| (t.data, t.leakage, t.balance)).collect()
}

// ── LdsParams ────────────────────────────────────────────────────────────────

/// Every LDS parameter except the recurrent weights.
#[pyclass(name = "LdsParams")]
#[derive(Clone)]
pub struct PyParams {
    inner: RustParams,
}

#[pymethods]
impl PyParams {
    /// Create a parameter set.
    ///
    /// Args:
    ///     b0, b1: latent input before / after the trial midpoint (length K)
    ///     s:      process-noise scale
    ///     mu0:    first-latent mean (length K)
    ///     q0:     first-latent covariance (K×K)
    ///     c:      observation matrix (D×K)
    ///     d:      observation offset (length D)
    ///     r:      observation-noise covariance (D×D)
    #[new]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        b0: Vec<f64>,
        b1: Vec<f64>,
        s: f64,
        mu0: Vec<f64>,
        q0: Vec<Vec<f64>>,
        c: Vec<Vec<f64>>,
        d: Vec<f64>,
        r: Vec<Vec<f64>>,
    ) -> PyResult<Self> {
        let inner = RustParams {
            b: [to_vector(&b0), to_vector(&b1)],
            s,
            mu0: to_vector(&mu0),
            q0: to_matrix(&q0, "q0")?,
            c: to_matrix(&c, "c")?,
            d: to_vector(&d),
            r: to_matrix(&r, "r")?,
        };
        inner.validate(inner.latent_dim(), inner.obs_dim())?;
        Ok(Self { inner })
    }

    /// Draw random parameters for latent dimension `k` and observation
    /// dimension `d`.
    #[staticmethod]
    #[pyo3(signature = (k, d, seed=0))]
    pub fn random(k: usize, d: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self { inner: generate_parameters(&mut rng, k, d) }
    }

    /// Inputs `[b0, b1]`.
    #[getter]
    pub fn b(&self) -> Vec<Vec<f64>> {
        self.inner.b.iter().map(|v| v.as_slice().to_vec()).collect()
    }
    /// Process-noise scale.
    #[getter]
    pub fn s(&self) -> f64 {
        self.inner.s
    }
    /// First-latent mean.
    #[getter]
    pub fn mu0(&self) -> Vec<f64> {
        self.inner.mu0.as_slice().to_vec()
    }
    /// First-latent covariance.
    #[getter]
    pub fn q0(&self) -> Vec<Vec<f64>> {
        to_rows(&self.inner.q0)
    }
    /// Observation matrix.
    #[getter]
    pub fn c(&self) -> Vec<Vec<f64>> {
        to_rows(&self.inner.c)
    }
    /// Observation offset.
    #[getter]
    pub fn d(&self) -> Vec<f64> {
        self.inner.d.as_slice().to_vec()
    }
    /// Observation-noise covariance.
    #[getter]
    pub fn r(&self) -> Vec<Vec<f64>> {
        to_rows(&self.inner.r)
    }

    /// Python repr string.
    pub fn __repr__(&self) -> String {
        format!(
            "LdsParams(K={}, D={}, s={:.4})",
            self.inner.latent_dim(),
            self.inner.obs_dim(),
            self.inner.s
        )
    }
}

// ── SubspaceRnn ──────────────────────────────────────────────────────────────

/// Sparse excitatory/inhibitory network with low-dimensional dynamics.
#[pyclass(name = "SubspaceRnn")]
pub struct PyModel {
    inner: RustModel,
}

#[pymethods]
impl PyModel {
    /// Build the model.
    ///
    /// Args:
    ///     n_excitatory: excitatory unit count (> 0)
    ///     n_inhibitory: inhibitory unit count (> 0)
    ///     sparsity:     fraction of populated entries in (0, 1]
    ///     j:            K×N latent projection
    ///     seed:         topology seed
    #[new]
    #[pyo3(signature = (n_excitatory, n_inhibitory, sparsity, j, seed=0))]
    pub fn new(
        n_excitatory: usize,
        n_inhibitory: usize,
        sparsity: f64,
        j: Vec<Vec<f64>>,
        seed: u64,
    ) -> PyResult<Self> {
        let j = to_matrix(&j, "j")?;
        Ok(Self { inner: RustModel::new(n_excitatory, n_inhibitory, sparsity, j, seed)? })
    }

    /// Unit count N.
    #[getter]
    pub fn n_units(&self) -> usize {
        self.inner.n_units()
    }
    /// Latent dimension K.
    #[getter]
    pub fn latent_dim(&self) -> usize {
        self.inner.latent_dim()
    }
    /// Length of every weight vector.
    #[getter]
    pub fn n_weights(&self) -> usize {
        self.inner.n_weights()
    }

    /// Signed N×N matrix for weight vector `w`.
    pub fn decode(&self, w: Vec<f64>) -> PyResult<Vec<Vec<f64>>> {
        Ok(to_rows(&self.inner.topology().decode(&to_vector(&w))?))
    }

    /// Weight vector for a correctly signed, on-topology matrix.
    pub fn encode(&self, W: Vec<Vec<f64>>) -> PyResult<Vec<f64>> {
        let full = to_matrix(&W, "W")?;
        Ok(self.inner.topology().encode(&full)?.as_slice().to_vec())
    }

    /// Reduced K×K dynamics `J·W·J⁺` for weight vector `w`.
    pub fn reduce(&self, w: Vec<f64>) -> PyResult<Vec<Vec<f64>>> {
        let (_, a) = self.inner.build(&to_vector(&w))?;
        Ok(to_rows(&a))
    }

    /// Constant-magnitude fill for spectral radius `radius`.
    #[pyo3(signature = (radius=0.85))]
    pub fn stable_weights(&self, radius: f64) -> Vec<f64> {
        stable_weights(&self.inner, radius).as_slice().to_vec()
    }

    /// Constrained initialization toward `a_target`.
    ///
    /// Returns:
    ///     (projected W, refined W, loss trace [(fit, leakage, balance)],
    ///      per-stage weight vectors, final weight vector)
    #[pyo3(signature = (a_target, spectral_radius=0.85, schedule=None))]
    #[allow(clippy::type_complexity)]
    pub fn initialize_from_dynamics(
        &self,
        a_target: Vec<Vec<f64>>,
        spectral_radius: f64,
        schedule: Option<Vec<(f64, f64, f64, f64)>>,
    ) -> PyResult<(Vec<Vec<f64>>, Vec<Vec<f64>>, Vec<(f64, f64, f64)>, Vec<Vec<f64>>, Vec<f64>)> {
        let a_target = to_matrix(&a_target, "a_target")?;
        let mut config = InitConfig { spectral_radius, ..InitConfig::default() };
        if let Some(schedule) = schedule {
            config.schedule = schedule
                .into_iter()
                .map(|(z, a, b, g)| PenaltyWeights::new(z, a, b, g))
                .collect();
        }
        let init = initialize_from_dynamics(&self.inner, &a_target, &config)?;
        Ok((
            to_rows(&init.projected),
            to_rows(&init.refined),
            trace_tuples(&init.loss_trace),
            init.stage_weights.iter().map(|w| w.as_slice().to_vec()).collect(),
            init.weights.as_slice().to_vec(),
        ))
    }

    /// Sample observations `[trial][step][dim]` under weight vector `w`.
    #[pyo3(signature = (w, params, trials, steps, seed=0))]
    pub fn simulate(
        &self,
        w: Vec<f64>,
        params: &PyParams,
        trials: usize,
        steps: usize,
        seed: u64,
    ) -> PyResult<Vec<Vec<Vec<f64>>>> {
        let (_, a) = self.inner.build(&to_vector(&w))?;
        let mut rng = StdRng::seed_from_u64(seed);
        let sim = generate_latents_and_observations(&mut rng, &self.inner, trials, steps, &a, &params.inner)?;
        Ok(sim
            .observations
            .trials()
            .iter()
            .map(|trial| trial.iter().map(|y| y.as_slice().to_vec()).collect())
            .collect())
    }

    /// Run EM from `(w, params)` on observations `y[trial][step][dim]`.
    ///
    /// Returns:
    ///     (loss trace [(likelihood, leakage, balance)], fitted w, fitted LdsParams)
    #[pyo3(signature = (y, w, params, alpha=1.0, beta=1.0, max_iter=300, tolerance=None))]
    #[allow(clippy::too_many_arguments)]
    pub fn fit_em(
        &self,
        py: Python<'_>,
        y: Vec<Vec<Vec<f64>>>,
        w: Vec<f64>,
        params: &PyParams,
        alpha: f64,
        beta: f64,
        max_iter: usize,
        tolerance: Option<f64>,
    ) -> PyResult<(Vec<(f64, f64, f64)>, Vec<f64>, PyParams)> {
        let trials = y
            .iter()
            .map(|trial| trial.iter().map(|obs| to_vector(obs)).collect())
            .collect();
        let y = Observations::new(trials)?;
        let init = ModelState { w: to_vector(&w), params: params.inner.clone() };
        let config = EmConfig {
            alpha,
            beta,
            stopping: StoppingPolicy { max_iterations: max_iter, tolerance },
            ..EmConfig::default()
        };
        let fit = py.allow_threads(|| fit_em(&self.inner, &y, init, &config))?;
        Ok((
            trace_tuples(&fit.loss_trace),
            fit.state.w.as_slice().to_vec(),
            PyParams { inner: fit.state.params },
        ))
    }

    /// Python repr string.
    pub fn __repr__(&self) -> String {
        let t = self.inner.topology();
        format!(
            "SubspaceRnn(n_excitatory={}, n_inhibitory={}, sparsity={}, K={}, n_weights={})",
            t.n_excitatory(),
            t.n_inhibitory(),
            t.sparsity(),
            self.inner.latent_dim(),
            t.n_weights()
        )
    }
}

// ── Module entry point ───────────────────────────────────────────────────────

/// Excitatory/inhibitory subspace RNN fitting.
#[pymodule]
pub fn ei_subspace(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyModel>()?;
    m.add_class::<PyParams>()?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
