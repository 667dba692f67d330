/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Fixed sparsity pattern and sign partition of the recurrent weight matrix.
//!
//! A [`WeightTopology`] is an ordered list of flat row-major indices into the
//! `N×N` weight matrix together with the [`SignClass`] of each one. It is
//! built once per model from `(N_e, N_i, sparsity, seed)` and never changes.
//!
//! # Construction
//!
//! ```text
//! N_weights = round(sparsity · N²)
//! indices   = [0·N+0, 1·N+1, …, (N-1)·N+(N-1)]          (every diagonal)
//!           ++ distinct non-diagonal draws from PCG-64 MCG(seed) over [0, N²)
//! ```
//!
//! Duplicate and diagonal draws are skipped without being counted.
//!
//! # Invariants
//!
//! - Same inputs, same index list and same sign partition.
//! - Every diagonal index is present.
//! - The sign class of an entry depends only on its column: `col < N_e` is
//!   excitatory, anything else is inhibitory (Dale's law).

use hashbrown::HashSet;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

use crate::error::{FitError, Result};

// ─── SignClass ───────────────────────────────────────────────────────────────

/// Sign a non-zero weight carries in the full matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignClass {
    /// Outgoing weight of an excitatory unit; written as `+w`.
    Excitatory,
    /// Outgoing weight of an inhibitory unit; written as `-w`.
    Inhibitory,
}

impl SignClass {
    /// Sign class for a presynaptic column given the excitatory count.
    #[inline]
    pub fn for_column(col: usize, n_e: usize) -> Self {
        if col < n_e {
            Self::Excitatory
        } else {
            Self::Inhibitory
        }
    }

    /// `+1.0` or `-1.0`.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Self::Excitatory => 1.0,
            Self::Inhibitory => -1.0,
        }
    }
}

// ─── WeightTopology ──────────────────────────────────────────────────────────

/// Immutable sparsity pattern plus per-entry sign class.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightTopology {
    n_e: usize,
    n_i: usize,
    sparsity: f64,
    seed: u64,
    /// Flat row-major indices, diagonals first.
    indices: Vec<usize>,
    /// `classes[k]` is the sign class of `indices[k]`.
    classes: Vec<SignClass>,
}

impl WeightTopology {
    /// Build the topology for `n_e` excitatory and `n_i` inhibitory units.
    ///
    /// Fails with [`FitError::InvalidConfig`] when either population is
    /// empty, `sparsity` is outside `(0, 1]`, or the requested weight count
    /// cannot hold the `N` diagonal entries.
    pub fn new(n_e: usize, n_i: usize, sparsity: f64, seed: u64) -> Result<Self> {
        if n_e == 0 || n_i == 0 {
            return Err(FitError::InvalidConfig(format!(
                "both populations must be non-empty (N_e = {n_e}, N_i = {n_i})"
            )));
        }
        if !(sparsity > 0.0 && sparsity <= 1.0) {
            return Err(FitError::InvalidConfig(format!(
                "sparsity must lie in (0, 1], got {sparsity}"
            )));
        }
        let n = n_e + n_i;
        let total = n * n;
        let n_weights = ((sparsity * total as f64).round() as usize).min(total);
        if n_weights < n {
            return Err(FitError::InvalidConfig(format!(
                "sparsity {sparsity} gives {n_weights} weights, fewer than the {n} diagonal entries"
            )));
        }

        let mut indices: Vec<usize> = (0..n).map(|i| i * n + i).collect();
        let mut seen: HashSet<usize> = indices.iter().copied().collect();
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        while indices.len() < n_weights {
            let candidate = rng.gen_range(0..total);
            if seen.insert(candidate) {
                indices.push(candidate);
            }
        }

        let classes = indices
            .iter()
            .map(|&flat| SignClass::for_column(flat % n, n_e))
            .collect();

        Ok(Self { n_e, n_i, sparsity, seed, indices, classes })
    }

    /// Number of excitatory units.
    pub fn n_excitatory(&self) -> usize {
        self.n_e
    }

    /// Number of inhibitory units.
    pub fn n_inhibitory(&self) -> usize {
        self.n_i
    }

    /// Total unit count `N`.
    pub fn n_units(&self) -> usize {
        self.n_e + self.n_i
    }

    /// Number of non-zero weights, i.e. the length of every weight vector.
    pub fn n_weights(&self) -> usize {
        self.indices.len()
    }

    /// Requested sparsity.
    pub fn sparsity(&self) -> f64 {
        self.sparsity
    }

    /// Seed the random part of the pattern was drawn from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Flat row-major indices, diagonals first.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Sign class per position.
    pub fn classes(&self) -> &[SignClass] {
        &self.classes
    }

    /// `(row, col)` of the `k`-th weight.
    #[inline]
    pub fn position(&self, k: usize) -> (usize, usize) {
        let n = self.n_units();
        let flat = self.indices[k];
        (flat / n, flat % n)
    }

    /// Iterate `(row, col, class)` in weight-vector order.
    pub fn entries(&self) -> impl Iterator<Item = (usize, usize, SignClass)> + '_ {
        (0..self.indices.len()).map(move |k| {
            let (r, c) = self.position(k);
            (r, c, self.classes[k])
        })
    }

    /// Number of excitatory entries.
    pub fn excitatory_count(&self) -> usize {
        self.classes.iter().filter(|c| **c == SignClass::Excitatory).count()
    }

    /// Number of inhibitory entries.
    pub fn inhibitory_count(&self) -> usize {
        self.classes.len() - self.excitatory_count()
    }
}
