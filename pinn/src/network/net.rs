use autograd::{Differentiable, Var};
use ndarray::Array2;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;

use super::{Activation, Dense};

/// Architecture configuration: input/output widths, the hidden widths in
/// order, and the hidden nonlinearity.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    pub num_inputs: usize,
    pub num_outputs: usize,
    pub hidden: Vec<usize>,
    pub activation: Activation,
}

impl Default for NetworkConfig {
    /// Maps `(t, v0_x, v0_z)` to `(x, z)` through four softplus layers.
    fn default() -> Self {
        Self {
            num_inputs: 3,
            num_outputs: 2,
            hidden: vec![32, 16, 16, 32],
            activation: Activation::Softplus,
        }
    }
}

/// A feed-forward stack of dense layers. Layer shapes are fixed at build
/// time; only the held values change afterwards.
pub struct Network {
    layers: Vec<Dense>,
    num_inputs: usize,
    num_outputs: usize,
}

impl Network {
    /// Builds the configured stack, Glorot-uniform weights and zero biases.
    /// The output layer is linear.
    pub fn build<R: Rng + ?Sized>(config: &NetworkConfig, rng: &mut R) -> Self {
        let mut widths = Vec::with_capacity(config.hidden.len() + 2);
        widths.push(config.num_inputs);
        widths.extend_from_slice(&config.hidden);
        widths.push(config.num_outputs);

        let layers = widths
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                let (fan_in, fan_out) = (pair[0], pair[1]);
                let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
                let weights =
                    Array2::random_using((fan_in, fan_out), Uniform::new(-limit, limit), rng);
                let bias = Array2::zeros((1, fan_out));
                let act_fn = (i + 2 < widths.len()).then_some(config.activation);

                Dense::new(Var::new(weights), Var::new(bias), act_fn)
            })
            .collect();

        Self {
            layers,
            num_inputs: config.num_inputs,
            num_outputs: config.num_outputs,
        }
    }

    /// The trainable parameters in their fixed declaration order:
    /// weights then bias, layer by layer.
    pub fn parameters(&self) -> Vec<Var> {
        self.layers
            .iter()
            .flat_map(|layer| [layer.weights().clone(), layer.bias().clone()])
            .collect()
    }

    /// Drops every accumulated parameter gradient.
    pub fn zero_grad(&self) {
        for param in self.parameters() {
            param.clear_grad();
        }
    }

    /// The amount of parameters in the model.
    pub fn size(&self) -> usize {
        self.layers.iter().map(Dense::size).sum()
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }
}

impl Differentiable for Network {
    fn evaluate(&self, x: &Var) -> Var {
        let mut h = x.clone();
        for layer in &self.layers {
            h = layer.forward(&h);
        }
        h
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn the_default_architecture_matches_its_parameter_count() {
        let mut rng = StdRng::seed_from_u64(7);
        let network = Network::build(&NetworkConfig::default(), &mut rng);

        // (3*32+32) + (32*16+16) + (16*16+16) + (16*32+32) + (32*2+2)
        assert_eq!(network.size(), 128 + 528 + 272 + 544 + 66);
        assert_eq!(network.parameters().len(), 10);
    }

    #[test]
    fn forward_produces_the_configured_output_width() {
        let mut rng = StdRng::seed_from_u64(7);
        let config = NetworkConfig {
            hidden: vec![8, 8],
            ..NetworkConfig::default()
        };
        let network = Network::build(&config, &mut rng);

        let y = network.evaluate(&Var::new(Array2::from_elem((5, 3), 0.5)));
        assert_eq!(y.shape(), (5, 2));
    }

    #[test]
    fn building_is_deterministic_for_a_fixed_seed() {
        let config = NetworkConfig::default();
        let a = Network::build(&config, &mut StdRng::seed_from_u64(3));
        let b = Network::build(&config, &mut StdRng::seed_from_u64(3));

        for (pa, pb) in a.parameters().iter().zip(b.parameters()) {
            assert_eq!(pa.value(), pb.value());
        }
    }

    #[test]
    fn weights_stay_inside_the_glorot_bound() {
        let mut rng = StdRng::seed_from_u64(11);
        let config = NetworkConfig {
            hidden: vec![4],
            ..NetworkConfig::default()
        };
        let network = Network::build(&config, &mut rng);

        let limit = (6.0_f64 / (3.0 + 4.0)).sqrt();
        let first = &network.parameters()[0];
        assert!(first.value().iter().all(|w| w.abs() <= limit));
    }

    #[test]
    fn biases_start_at_zero() {
        let mut rng = StdRng::seed_from_u64(5);
        let network = Network::build(&NetworkConfig::default(), &mut rng);

        for bias in network.parameters().iter().skip(1).step_by(2) {
            assert!(bias.value().iter().all(|&b| b == 0.0));
        }
    }
}
