//! End-to-end checks of the physics encoding and the training loop.

use std::cell::Cell;
use std::sync::{Arc, Mutex};

use approx::assert_abs_diff_eq;
use autograd::{ops, Differentiable, Var};
use ndarray::{array, Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

use pinn::dataset::Dataset;
use pinn::network::{Network, NetworkConfig};
use pinn::residual::ProjectileResidual;
use pinn::training::{
    FitStatus, Objective, PinnObjective, QuasiNewtonTrainer, TrainOptions,
};
use pinn::PinnError;

/// The closed-form solution `x = v0x t, z = v0z t - g t²/2`, built from
/// engine operations so it can be differentiated like a network.
struct ExactMotion {
    g: f64,
}

impl Differentiable for ExactMotion {
    fn evaluate(&self, x: &Var) -> Var {
        let t = ops::cols(x, 0, 1);
        let v0x = ops::cols(x, 1, 2);
        let v0z = ops::cols(x, 2, 3);

        let horizontal = ops::mul(&v0x, &t);
        let fall = ops::affine(&ops::square(&t), 0.5 * self.g, 0.0);
        let vertical = ops::sub(&ops::mul(&v0z, &t), &fall);

        ops::hstack(&[horizontal, vertical])
    }
}

#[test]
fn the_exact_solution_zeroes_every_residual() {
    let residual = ProjectileResidual::new(ExactMotion { g: 1.0 }, 1.0, 3).unwrap();
    let batch = Dataset::new(3).sample(64, &mut StdRng::seed_from_u64(17));

    let terms = residual.residuals(&Var::new(batch)).unwrap();

    assert_abs_diff_eq!(terms.pde.item(), 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(terms.position.item(), 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(terms.velocity.item(), 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(terms.total.item(), 0.0, epsilon = 1e-6);
}

/// `r(x) = (v0x, v0z)`: ignores time entirely.
struct TimeBlind;

impl Differentiable for TimeBlind {
    fn evaluate(&self, x: &Var) -> Var {
        ops::cols(x, 1, 3)
    }
}

#[test]
fn a_time_independent_model_is_penalized_at_the_initial_position() {
    let residual = ProjectileResidual::new(TimeBlind, 1.0, 3).unwrap();
    let terms = residual
        .residuals(&Var::new(array![[0.0, 0.5, 0.5]]))
        .unwrap();

    // r(t=0) = (0.5, 0.5) against the origin.
    assert_abs_diff_eq!(terms.position.item(), 0.25, epsilon = 1e-12);
    assert!(terms.total.item() > 0.0);
}

#[test]
fn a_seeded_fit_decreases_the_loss_and_terminates_cleanly() {
    let mut rng = StdRng::seed_from_u64(42);
    let config = NetworkConfig {
        hidden: vec![8],
        ..NetworkConfig::default()
    };
    let network = Network::build(&config, &mut rng);
    let residual = ProjectileResidual::new(network, 1.0, config.num_inputs).unwrap();
    let batch = Dataset::new(config.num_inputs).sample(16, &mut rng);
    let objective = PinnObjective::new(residual, batch);

    let theta0 = objective.initial_params();
    let initial_loss = objective.eval(&theta0).unwrap();

    let losses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&losses);
    let opts = TrainOptions {
        max_iters: 100,
        ..TrainOptions::default()
    };
    let mut trainer = QuasiNewtonTrainer::new(opts)
        .with_progress(move |_, loss| sink.lock().unwrap().push(loss));

    let outcome = trainer.fit(&objective, theta0).unwrap();

    assert!(matches!(
        outcome.status,
        FitStatus::Converged | FitStatus::MaxIterReached
    ));
    assert!(outcome.loss.is_finite());
    assert!(outcome.loss < initial_loss);

    let losses = losses.lock().unwrap();
    assert!(!losses.is_empty());
    assert!(losses.iter().all(|l| l.is_finite()));
    for pair in losses.windows(2) {
        // The line search guarantees non-increase.
        assert!(pair[1] <= pair[0] + 1e-9, "loss increased: {pair:?}");
    }
}

/// Succeeds once, then reports NaN forever after.
struct NanOnSecondCall {
    evals: Cell<u64>,
}

impl Objective for NanOnSecondCall {
    fn dim(&self) -> usize {
        2
    }

    fn eval(&self, _theta: &Array1<f64>) -> pinn::Result<f64> {
        self.evals.set(self.evals.get() + 1);
        if self.evals.get() >= 2 {
            Ok(f64::NAN)
        } else {
            Ok(1.0)
        }
    }

    fn grad(&self, _theta: &Array1<f64>) -> pinn::Result<Array1<f64>> {
        Ok(array![1.0, 1.0])
    }
}

#[test]
fn a_nan_loss_fails_fast_after_one_successful_evaluation() {
    let objective = NanOnSecondCall {
        evals: Cell::new(0),
    };

    let err = QuasiNewtonTrainer::new(TrainOptions::default())
        .fit(&objective, Array1::zeros(2))
        .unwrap_err();

    assert!(matches!(err, PinnError::NumericalDivergence { value } if value.is_nan()));
    assert_eq!(objective.evals.get(), 2);
}

#[test]
fn training_the_default_network_beats_its_initialization_on_a_test_grid() {
    let mut rng = StdRng::seed_from_u64(7);
    let config = NetworkConfig {
        hidden: vec![8, 8],
        ..NetworkConfig::default()
    };
    let network = Network::build(&config, &mut rng);
    let residual = ProjectileResidual::new(network, 1.0, config.num_inputs).unwrap();
    let batch = Dataset::new(config.num_inputs).sample(32, &mut rng);
    let objective = PinnObjective::new(residual, batch);

    let theta0 = objective.initial_params();
    let opts = TrainOptions {
        max_iters: 150,
        ..TrainOptions::default()
    };
    let outcome = QuasiNewtonTrainer::new(opts)
        .fit(&objective, theta0)
        .unwrap();
    objective.apply(&outcome.theta).unwrap();

    // The trained network should track the closed form at a few probe
    // points far better than random initialization would.
    let exact = ExactMotion { g: 1.0 };
    let probes = Array2::from_shape_vec(
        (3, 3),
        vec![0.1, 0.5, 0.5, 0.5, 0.5, 0.5, 0.9, 0.5, 0.5],
    )
    .unwrap();

    let predicted = objective
        .residual()
        .model()
        .evaluate(&Var::new(probes.clone()))
        .value();
    let expected = exact.evaluate(&Var::new(probes)).value();

    let max_error = (&predicted - &expected)
        .mapv(f64::abs)
        .iter()
        .cloned()
        .fold(0.0, f64::max);
    assert!(max_error < 0.2, "max |error| = {max_error}");
}
