//! # Synthetic fit
//!
//! Builds a 40-unit excitatory/inhibitory network with 2-dimensional latent
//! dynamics, initializes its weights toward a target dynamics matrix, draws
//! observations from random parameters and fits everything back with EM.
//!
//! ```bash
//! cargo run --release --example fit_synthetic
//! ```

use ei_subspace::simulate::{generate_latents_and_observations, generate_parameters};
use ei_subspace::{
    fit_em, initialize_from_dynamics, EmConfig, InitConfig, ModelState, PenaltyWeights,
    StoppingPolicy, SubspaceRnn,
};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;

const N_E: usize = 32;
const N_I: usize = 8;
const K: usize = 2;
const D: usize = 10;

fn main() -> ei_subspace::Result<()> {
    // latent subspace: the first two (excitatory) units
    let mut j = DMatrix::zeros(K, N_E + N_I);
    j[(0, 0)] = 1.0;
    j[(1, 1)] = 1.0;
    let model = SubspaceRnn::new(N_E, N_I, 0.3, j, 7)?;
    println!(
        "network: {} units, {} weights ({} excitatory, {} inhibitory)",
        model.n_units(),
        model.n_weights(),
        model.topology().excitatory_count(),
        model.topology().inhibitory_count(),
    );

    // ── Initialization ───────────────────────────────────────────────────────

    let a_target = DMatrix::from_row_slice(K, K, &[0.6, 0.2, 0.1, 0.5]);
    let config = InitConfig {
        schedule: vec![PenaltyWeights::new(1.0, 0.0, 0.0, 0.0), PenaltyWeights::new(1.0, 1.0, 1.0, 0.01)],
        ..InitConfig::default()
    };
    let init = initialize_from_dynamics(&model, &a_target, &config)?;
    println!(
        "spectral radius: projected {:.3}, refined {:.3}",
        init.projected_spectral_radius, init.refined_spectral_radius
    );
    for (stage, terms) in init.loss_trace.iter().enumerate() {
        println!(
            "  stage {stage}: fit {:.5}  leakage {:.5}  balance {:.5}",
            terms.data, terms.leakage, terms.balance
        );
    }

    // ── Data ─────────────────────────────────────────────────────────────────

    let mut rng = StdRng::seed_from_u64(2024);
    let truth = generate_parameters(&mut rng, K, D);
    let (_, a_true) = model.build(&init.weights)?;
    let sim = generate_latents_and_observations(&mut rng, &model, 100, 40, &a_true, &truth)?;
    println!("data: {} trials × {} steps × {} dims", sim.observations.n_trials(), sim.observations.n_steps(), D);

    // ── EM ───────────────────────────────────────────────────────────────────

    let mut start = generate_parameters(&mut rng, K, D);
    start.s = 0.5;
    let config = EmConfig {
        stopping: StoppingPolicy { max_iterations: 50, tolerance: Some(1e-6) },
        ..EmConfig::default()
    };
    let fit = fit_em(
        &model,
        &sim.observations,
        ModelState { w: init.weights.clone(), params: start },
        &config,
    )?;

    for (iter, terms) in fit.loss_trace.iter().enumerate().step_by(10) {
        println!(
            "  iter {iter:>3}: likelihood {:>12.4}  leakage {:.5}  balance {:.5}",
            terms.data, terms.leakage, terms.balance
        );
    }
    let (_, a_fit) = model.build(&fit.state.w)?;
    println!("iterations: {} (stopped early: {})", fit.iterations, fit.stopped_early);
    println!("s: true {:.4}, fitted {:.4}", truth.s, fit.state.params.s);
    println!("A true:{a_true}A fitted:{a_fit}");
    Ok(())
}
