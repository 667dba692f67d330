//! Integration tests for the E-step: filter, smoother and their agreement
//! with noiseless trajectories.

use ei_subspace::simulate::generate_latents_and_observations;
use ei_subspace::{kalman_filter, posterior, rts_smoother, FitError, LdsParams, SubspaceRnn};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;

// ─── helpers ─────────────────────────────────────────────────────────────────

fn model() -> SubspaceRnn {
    let j = DMatrix::from_row_slice(2, 4, &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    SubspaceRnn::new(2, 2, 1.0, j, 0).unwrap()
}

fn dynamics() -> DMatrix<f64> {
    DMatrix::from_row_slice(2, 2, &[0.5, 0.1, 0.1, 0.5])
}

/// Parameters with isotropic observation noise `r·I`.
fn params(r: f64, s: f64, q0: f64) -> LdsParams {
    LdsParams {
        b: [DVector::from_vec(vec![0.3, -0.2]), DVector::from_vec(vec![-0.1, 0.4])],
        s,
        mu0: DVector::from_vec(vec![1.0, -0.5]),
        q0: DMatrix::identity(2, 2) * q0,
        c: DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]),
        d: DVector::from_vec(vec![0.5, 0.0, -0.5]),
        r: DMatrix::identity(3, 3) * r,
    }
}

// ─── tests ───────────────────────────────────────────────────────────────────

#[test]
fn single_step_smoother_equals_filter() {
    let m = model();
    let p = params(0.5, 1.0, 1.0);
    let q = m.dynamics_covariance(p.s);
    let y = vec![DVector::from_vec(vec![1.2, -0.3, 0.8])];
    let filtered = kalman_filter(&y, &dynamics(), &q, &p).unwrap();
    let smoothed = rts_smoother(&dynamics(), &filtered).unwrap();
    assert_eq!(smoothed.m, filtered.mu);
    assert_eq!(smoothed.cov, filtered.v);
    assert!(smoothed.cov_next.is_empty());
}

#[test]
fn noiseless_two_step_trial_is_recovered() {
    // generate without any noise; filter with zero process noise and only
    // the inverted covariances relaxed
    let m = model();
    let a = dynamics();
    let exact = params(0.0, 0.0, 0.0);
    let mut rng = StdRng::seed_from_u64(0);
    let sim = generate_latents_and_observations(&mut rng, &m, 1, 2, &a, &exact).unwrap();
    let truth = &sim.latents[0];
    assert_eq!(truth[1], &a * &exact.mu0 + &exact.b[0]);

    let observer = params(1e-12, 0.0, 1.0);
    let q = m.dynamics_covariance(observer.s);
    assert_eq!(q, DMatrix::zeros(2, 2));
    let post = posterior(&sim.observations.trials()[0], &a, &q, &observer).unwrap();
    for t in 0..2 {
        assert!((&post.m[t] - &truth[t]).amax() < 1e-6, "step {t}");
    }
}

#[test]
fn posterior_mean_converges_as_observation_noise_vanishes() {
    let m = model();
    let a = dynamics();
    let truth = DVector::from_vec(vec![0.7, -1.3]);
    let clean = params(0.0, 0.0, 0.0);
    let y = vec![&clean.c * &truth + &clean.d];

    let mut last_error = f64::INFINITY;
    for &r in &[1.0, 1e-2, 1e-4, 1e-6, 1e-8] {
        let p = params(r, 1.0, 1.0);
        let q = m.dynamics_covariance(p.s);
        let out = kalman_filter(&y, &a, &q, &p).unwrap();
        let error = (&out.mu[0] - &truth).amax();
        assert!(error < last_error, "error {error} at r = {r} did not shrink");
        last_error = error;
    }
    assert!(last_error < 1e-6);
}

#[test]
fn smoothing_reduces_variance() {
    let m = model();
    let a = dynamics();
    let p = params(0.4, 0.3, 1.0);
    let q = m.dynamics_covariance(p.s);
    let mut rng = StdRng::seed_from_u64(5);
    let sim = generate_latents_and_observations(&mut rng, &m, 1, 12, &a, &p).unwrap();
    let y = &sim.observations.trials()[0];
    let filtered = kalman_filter(y, &a, &q, &p).unwrap();
    let smoothed = rts_smoother(&a, &filtered).unwrap();
    for t in 0..y.len() {
        assert!(smoothed.cov[t].trace() <= filtered.v[t].trace() + 1e-12);
        assert!(smoothed.cov[t].iter().all(|v| v.is_finite()));
    }
    assert_eq!(smoothed.cov_next.len(), y.len() - 1);
}

#[test]
fn singular_initial_covariance_is_fatal() {
    let m = model();
    let p = params(1.0, 1.0, 0.0);
    let q = m.dynamics_covariance(p.s);
    let y = vec![DVector::zeros(3)];
    assert_eq!(
        kalman_filter(&y, &dynamics(), &q, &p),
        Err(FitError::SingularMatrix { what: "V_prior" })
    );
}
