use autograd::{Differentiable, Var};
use log::info;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

use pinn::dataset::Dataset;
use pinn::network::{Network, NetworkConfig};
use pinn::residual::ProjectileResidual;
use pinn::training::{PinnObjective, QuasiNewtonTrainer, TrainOptions};

const GRAVITY: f64 = 1.0;
const NUM_TRAIN_SAMPLES: usize = 1000;
const NUM_TEST_SAMPLES: usize = 100;
const SEED: u64 = 0;

/// Closed-form projectile motion for a `(t, v0_x, v0_z)` batch.
fn theoretical_motion(input: &Array2<f64>, g: f64) -> Array2<f64> {
    let mut motion = Array2::zeros((input.nrows(), 2));
    for (row, mut out) in input.outer_iter().zip(motion.outer_iter_mut()) {
        let (t, v0_x, v0_z) = (row[0], row[1], row[2]);
        out[0] = v0_x * t;
        out[1] = v0_z * t - 0.5 * g * t * t;
    }
    motion
}

fn main() -> pinn::Result<()> {
    env_logger::init();

    let mut rng = StdRng::seed_from_u64(SEED);
    let config = NetworkConfig::default();
    let network = Network::build(&config, &mut rng);
    info!(
        "network {:?} -> {} parameters",
        config.hidden,
        network.size()
    );

    let samples = Dataset::new(config.num_inputs).sample(NUM_TRAIN_SAMPLES, &mut rng);
    let residual = ProjectileResidual::new(network, GRAVITY, config.num_inputs)?;
    let objective = PinnObjective::new(residual, samples);

    let theta0 = objective.initial_params();
    let mut trainer = QuasiNewtonTrainer::new(TrainOptions::default());
    let outcome = trainer.fit(&objective, theta0)?;
    info!(
        "training ended after {} iterations ({:?}), loss {:.6e}",
        outcome.iterations, outcome.status, outcome.loss
    );

    // Compare the trained network against the closed form on a test grid
    // with v0 = (0.5, 0.5) and t swept over [0, 1].
    objective.apply(&outcome.theta)?;
    let mut grid = Array2::from_elem((NUM_TEST_SAMPLES, 3), 0.5);
    for (i, mut row) in grid.axis_iter_mut(Axis(0)).enumerate() {
        row[0] = i as f64 / (NUM_TEST_SAMPLES - 1) as f64;
    }

    let predicted = objective
        .residual()
        .model()
        .evaluate(&Var::new(grid.clone()))
        .value();
    let expected = theoretical_motion(&grid, GRAVITY);

    let errors = (&predicted - &expected).mapv(f64::abs);
    let max_error = errors.iter().cloned().fold(0.0, f64::max);
    let mean_error = errors.mean().unwrap_or(0.0);
    info!("test grid: max |error| {max_error:.4e}, mean |error| {mean_error:.4e}");

    Ok(())
}
