/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! # ei-subspace
//!
//! Low-dimensional linear dynamics realised by a sparse excitatory/inhibitory
//! recurrent network, fitted with Expectation-Maximization.
//!
//! ---
//!
//! ## The model
//!
//! An `N`-unit network with `N_e` excitatory and `N_i` inhibitory units has a
//! sparse weight matrix `W` that obeys Dale's law: every populated entry in an
//! excitatory column is positive, every entry in an inhibitory column is
//! negative. A fixed `K×N` projection `J` defines the latent subspace, and the
//! observed activity follows the reduced linear dynamical system
//!
//! ```text
//! x_t = A·x_{t-1} + b[τ(t)] + ε,   A = J·W·J⁺,  ε ~ N(0, s·J·Jᵀ)
//! y_t = C·x_t + d + η,             η ~ N(0, R)
//! ```
//!
//! where the input `b` switches once at the trial midpoint. The only free
//! representation of `W` is a non-negative weight vector `w`; `W` and `A` are
//! rebuilt from it on demand.
//!
//! ## The pipeline
//!
//! ```text
//! (N_e, N_i, sparsity, seed) → WeightTopology ─ decode/encode ─┐
//!                                                              ▼
//!  A_target ─────────────────────────────────────────► initialize_from_dynamics
//!                                                              │ w0
//!                                                              ▼
//!  y ──► fit_em: ┌ e_step (Kalman filter + RTS smoother per trial, parallel)
//!                ├ m_step_closed_form (b, s, mu0, Q0, C, d, R)
//!                └ m_step_weights     (projected L-BFGS, w ≥ 0)
//! ```
//!
//! ## Module overview
//!
//! | Module | Key types | What it does |
//! |--------|-----------|--------------|
//! | [`topology`] | [`WeightTopology`], [`SignClass`] | Seeded sparsity pattern with per-entry sign class |
//! | [`codec`] | [`WeightTopology::decode`], [`WeightTopology::encode`] | `w ↔ W` |
//! | [`subspace`] | [`Subspace`] | `J⁺`, projectors, `A = J·W·J⁺` |
//! | [`model`] | [`SubspaceRnn`], [`LdsParams`], [`Observations`] | Model instance and parameter containers |
//! | [`init`] | [`InitConfig`], [`Initialization`] | Stable fill, alternating projection, staged refinement |
//! | [`kalman`] | [`FilterOutput`], [`SmoothedTrajectory`] | Information-form filter and RTS smoother |
//! | [`mstep`] | [`SufficientStats`] | Closed-form parameter updates |
//! | [`objective`] | [`TargetObjective`], [`EmWeightObjective`] | Weight losses and analytic gradients |
//! | [`optimizer`] | [`ProjectedLbfgs`] | Bound-constrained quasi-Newton minimiser |
//! | [`em`] | [`EmConfig`], [`EmFit`] | E/M loop with loss trace |
//! | [`simulate`] | [`Simulation`] | Synthetic parameters and trajectories |
//! | `snapshot` | `ModelSnapshot` | Serialisable fitted state (requires `serde` feature) |
//!
//! ## Features
//!
//! - `parallel` (default): smooth trials concurrently with `rayon`.
//! - `serde`: enables `snapshot::ModelSnapshot`.
//! - `python-ffi`: PyO3 bindings, module `ei_subspace`.
//!
//! ## License
//!
//! Business Source License 1.1.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod codec;
pub mod em;
pub mod error;
pub mod init;
pub mod kalman;
mod linalg;
pub mod model;
pub mod mstep;
pub mod objective;
pub mod optimizer;
pub mod simulate;
pub mod subspace;
pub mod topology;

#[cfg(feature = "serde")]
pub mod snapshot;

#[cfg(feature = "python-ffi")]
pub mod ffi;

pub use em::{e_step, fit_em, m_step_closed_form, m_step_weights, EmConfig, EmFit, StoppingPolicy};
pub use error::{FitError, Result};
pub use init::{initialize_from_dynamics, project_constraints, stable_weights, InitConfig, Initialization};
pub use kalman::{kalman_filter, posterior, rts_smoother, FilterOutput, SmoothedTrajectory};
pub use model::{LdsParams, ModelState, Observations, SubspaceRnn};
pub use mstep::{closed_form_m_step, SufficientStats, TransitionMoments};
pub use objective::{EmWeightObjective, LossTerms, PenaltyWeights, TargetObjective, WeightObjective};
pub use optimizer::{OptimizeResult, OptimizerConfig, ProjectedLbfgs};
pub use simulate::Simulation;
pub use subspace::{reduce_to_latent_dynamics, Subspace};
pub use topology::{SignClass, WeightTopology};

#[cfg(feature = "serde")]
pub use snapshot::ModelSnapshot;
