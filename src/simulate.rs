/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Synthetic parameters and trajectories drawn from the generative model.
//!
//! The fitting core never calls into this module; it exists so tests, demos
//! and bindings can produce data that satisfies the model's own assumptions.
//! Every generator takes the caller's RNG, so a seeded `StdRng` reproduces a
//! dataset exactly.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{FitError, Result};
use crate::linalg::{ensure_shape, symmetrize};
use crate::model::{input_segment, switch_step, LdsParams, Observations, SubspaceRnn};

/// Latent trajectories together with the observations they produced.
#[derive(Clone, Debug, PartialEq)]
pub struct Simulation {
    /// `latents[u][t]`, length `K`.
    pub latents: Vec<Vec<DVector<f64>>>,
    /// `y[u][t]`, length `D`.
    pub observations: Observations,
}

fn normal<R: Rng + ?Sized>(rng: &mut R, mean: f64, std: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    mean + std * z
}

fn normal_matrix<R: Rng + ?Sized>(rng: &mut R, rows: usize, cols: usize, mean: f64, std: f64) -> DMatrix<f64> {
    DMatrix::from_fn(rows, cols, |_, _| normal(rng, mean, std))
}

fn normal_vector<R: Rng + ?Sized>(rng: &mut R, len: usize, mean: f64, std: f64) -> DVector<f64> {
    DVector::from_fn(len, |_, _| normal(rng, mean, std))
}

/// Draw from `N(mean, cov)`.
///
/// `cov` only needs to be symmetric positive semi-definite; a zero matrix
/// returns `mean` exactly.
pub fn sample_gaussian<R: Rng + ?Sized>(
    rng: &mut R,
    mean: &DVector<f64>,
    cov: &DMatrix<f64>,
) -> Result<DVector<f64>> {
    let n = mean.len();
    ensure_shape(cov, n, n, "covariance")?;
    if cov.iter().all(|&v| v == 0.0) {
        return Ok(mean.clone());
    }
    let eig = SymmetricEigen::new(symmetrize(cov));
    if eig.eigenvalues.iter().any(|&l| l < -1e-9 * eig.eigenvalues.amax().max(1.0)) {
        return Err(FitError::InvalidConfig("covariance is not positive semi-definite".into()));
    }
    let scale = eig.eigenvalues.map(|l| l.max(0.0).sqrt());
    let z = normal_vector(rng, n, 0.0, 1.0).component_mul(&scale);
    Ok(mean + eig.eigenvectors * z)
}

/// Random `(b, s, mu0, Q0, C, d, R)` for latent dimension `k` and observation
/// dimension `d`.
///
/// `s = 1`; each `b[g]` is a standard-normal draw divided by its squared
/// norm; `C ~ N(2, 1)`, `d ~ N(3, 1)`, `mu0 ~ N(0, 0.1)`; `Q0 = GGᵀ` with
/// `G ~ N(0.5, 0.1)` and `R = HHᵀ` with `H ~ N(1, 0.25)`.
pub fn generate_parameters<R: Rng + ?Sized>(rng: &mut R, k: usize, d: usize) -> LdsParams {
    let mut input = || {
        let b = normal_vector(rng, k, 0.0, 1.0);
        let energy = b.norm_squared();
        if energy > 0.0 {
            b / energy
        } else {
            b
        }
    };
    let b = [input(), input()];
    let c = normal_matrix(rng, d, k, 2.0, 1.0);
    let offset = normal_vector(rng, d, 3.0, 1.0);
    let mu0 = normal_vector(rng, k, 0.0, 0.1);
    let g = normal_matrix(rng, k, k, 0.5, 0.1);
    let h = normal_matrix(rng, d, d, 1.0, 0.25);
    LdsParams {
        b,
        s: 1.0,
        mu0,
        q0: symmetrize(&(&g * g.transpose())),
        c,
        d: offset,
        r: symmetrize(&(&h * h.transpose())),
    }
}

/// Sample `n_trials` latent trajectories of `n_steps` under dynamics `a` and
/// observe every step through `(C, d, R)`.
pub fn generate_latents_and_observations<R: Rng + ?Sized>(
    rng: &mut R,
    model: &SubspaceRnn,
    n_trials: usize,
    n_steps: usize,
    a: &DMatrix<f64>,
    params: &LdsParams,
) -> Result<Simulation> {
    let k = model.latent_dim();
    ensure_shape(a, k, k, "A")?;
    params.validate(k, params.obs_dim())?;
    let q = model.dynamics_covariance(params.s);
    let switch = switch_step(n_steps);

    let mut latents = Vec::with_capacity(n_trials);
    let mut trials = Vec::with_capacity(n_trials);
    for _ in 0..n_trials {
        let mut x = Vec::with_capacity(n_steps);
        let mut y = Vec::with_capacity(n_steps);
        for t in 0..n_steps {
            let state = match t {
                0 => sample_gaussian(rng, &params.mu0, &params.q0)?,
                _ => {
                    let drive = &params.b[input_segment(t - 1, switch)];
                    sample_gaussian(rng, &(a * &x[t - 1] + drive), &q)?
                }
            };
            let obs_mean = &params.c * &state + &params.d;
            y.push(sample_gaussian(rng, &obs_mean, &params.r)?);
            x.push(state);
        }
        latents.push(x);
        trials.push(y);
    }

    Ok(Simulation { latents, observations: Observations::new(trials)? })
}

/// Sample full network activity `v[u][t]` (length `N`) under weights `w_full`.
///
/// `v_0 ~ N(Jᵀmu0, JᵀQ0J)`, `v_t ~ N(W·v_{t-1} + Jᵀb[τ(t)], s·I)`.
pub fn generate_network_activity<R: Rng + ?Sized>(
    rng: &mut R,
    model: &SubspaceRnn,
    n_trials: usize,
    n_steps: usize,
    w_full: &DMatrix<f64>,
    params: &LdsParams,
) -> Result<Vec<Vec<DVector<f64>>>> {
    let n = model.n_units();
    ensure_shape(w_full, n, n, "weight matrix")?;
    let jt = model.subspace().j().transpose();
    let start_mean = &jt * &params.mu0;
    let start_cov = symmetrize(&(&jt * &params.q0 * model.subspace().j()));
    let noise = model.subspace().network_covariance(params.s);
    let switch = switch_step(n_steps);

    let mut activity = Vec::with_capacity(n_trials);
    for _ in 0..n_trials {
        let mut v: Vec<DVector<f64>> = Vec::with_capacity(n_steps);
        for t in 0..n_steps {
            let next = match t {
                0 => sample_gaussian(rng, &start_mean, &start_cov)?,
                _ => {
                    let drive = &jt * &params.b[input_segment(t - 1, switch)];
                    sample_gaussian(rng, &(w_full * &v[t - 1] + drive), &noise)?
                }
            };
            v.push(next);
        }
        activity.push(v);
    }
    Ok(activity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model() -> SubspaceRnn {
        let j = DMatrix::from_row_slice(2, 4, &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        SubspaceRnn::new(2, 2, 1.0, j, 0).unwrap()
    }

    #[test]
    fn zero_covariance_returns_the_mean() {
        let mut rng = StdRng::seed_from_u64(1);
        let mean = DVector::from_vec(vec![1.0, -2.0]);
        let out = sample_gaussian(&mut rng, &mean, &DMatrix::zeros(2, 2)).unwrap();
        assert_eq!(out, mean);
    }

    #[test]
    fn sample_moments_match() {
        let mut rng = StdRng::seed_from_u64(2);
        let mean = DVector::from_vec(vec![0.5, -1.0]);
        let cov = DMatrix::from_row_slice(2, 2, &[1.0, 0.6, 0.6, 2.0]);
        let n = 20_000;
        let draws: Vec<_> = (0..n).map(|_| sample_gaussian(&mut rng, &mean, &cov).unwrap()).collect();
        let avg = draws.iter().fold(DVector::zeros(2), |acc, x| acc + x) / n as f64;
        let emp = draws
            .iter()
            .fold(DMatrix::zeros(2, 2), |acc, x| acc + (x - &avg) * (x - &avg).transpose())
            / n as f64;
        assert!((avg - mean).amax() < 0.05);
        assert!((emp - cov).amax() < 0.1);
    }

    #[test]
    fn parameters_have_requested_shapes() {
        let mut rng = StdRng::seed_from_u64(3);
        let p = generate_parameters(&mut rng, 2, 5);
        assert!(p.validate(2, 5).is_ok());
        assert_eq!(p.s, 1.0);
        assert_eq!(p.r, p.r.transpose());
    }

    #[test]
    fn noiseless_generation_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(4);
        let m = model();
        let a = DMatrix::from_row_slice(2, 2, &[0.5, 0.1, 0.1, 0.5]);
        let p = LdsParams {
            b: [DVector::from_vec(vec![1.0, 0.0]), DVector::from_vec(vec![0.0, 1.0])],
            s: 0.0,
            mu0: DVector::from_vec(vec![1.0, 1.0]),
            q0: DMatrix::zeros(2, 2),
            c: DMatrix::identity(2, 2),
            d: DVector::zeros(2),
            r: DMatrix::zeros(2, 2),
        };
        let sim = generate_latents_and_observations(&mut rng, &m, 1, 4, &a, &p).unwrap();
        // t_s = 2: x1 = A x0 + b0, x2 = A x1 + b0, x3 = A x2 + b1
        let x1 = &a * &p.mu0 + &p.b[0];
        let x2 = &a * &x1 + &p.b[0];
        let x3 = &a * &x2 + &p.b[1];
        assert_eq!(sim.latents[0], vec![p.mu0.clone(), x1, x2, x3.clone()]);
        assert_eq!(sim.observations.trials()[0][3], x3);
    }

    #[test]
    fn network_activity_has_unit_dimension() {
        let mut rng = StdRng::seed_from_u64(5);
        let m = model();
        let p = generate_parameters(&mut rng, 2, 3);
        let w_full = DMatrix::identity(4, 4) * 0.3;
        let v = generate_network_activity(&mut rng, &m, 2, 5, &w_full, &p).unwrap();
        assert_eq!(v.len(), 2);
        assert!(v.iter().all(|trial| trial.len() == 5 && trial.iter().all(|x| x.len() == 4)));
    }
}
