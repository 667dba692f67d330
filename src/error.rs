/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Error kinds surfaced by the fitting pipeline.
//!
//! Every failure is fatal for the call that raised it: nothing in the crate
//! retries, and no inverse falls back to a pseudo-inverse. An optimizer that
//! stops at its iteration cap is *not* an error (see
//! [`crate::optimizer::OptimizeResult::converged`]).

/// Failure raised by any stage of the pipeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitError {
    /// A vector or matrix does not match the dimensions `(N, K, D, N_weights)`
    /// the model was built with.
    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Name of the offending quantity.
        what: &'static str,
        /// Expected `(rows, cols)`; vectors use `cols = 1`.
        expected: (usize, usize),
        /// Actual `(rows, cols)`.
        actual: (usize, usize),
    },

    /// A matrix that must be inverted is singular.
    #[error("matrix {what} is not invertible")]
    SingularMatrix {
        /// Name of the matrix, e.g. `"R"` or `"V_prior"`.
        what: &'static str,
    },

    /// A dense weight matrix carries mass outside the fixed topology.
    #[error("entry ({row}, {col}) = {value} lies outside the weight topology")]
    OutOfTopology {
        /// Row of the offending entry.
        row: usize,
        /// Column of the offending entry.
        col: usize,
        /// Value found there.
        value: f64,
    },

    /// Constructor or configuration arguments are out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, FitError>;
