use ndarray::Array2;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;

/// Generates collocation samples for the projectile problem.
///
/// Each sample is a `(t, v0_x, v0_z)` vector drawn uniformly from `[0, 1)`.
/// The dimension is fixed for the lifetime of a training run.
pub struct Dataset {
    dims: usize,
}

impl Dataset {
    /// Returns a new `Dataset`.
    ///
    /// # Arguments
    /// * `dims` - The number of input coordinates per sample.
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    /// Samples a `[num_samples, dims]` batch using the caller's generator,
    /// so runs are reproducible from a seed.
    pub fn sample<R: Rng + ?Sized>(&self, num_samples: usize, rng: &mut R) -> Array2<f64> {
        Array2::random_using((num_samples, self.dims), Uniform::new(0.0, 1.0), rng)
    }
}
