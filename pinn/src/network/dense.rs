use autograd::{ops, Var};

use super::Activation;

/// A fully connected layer: `act(x W + b)`.
pub struct Dense {
    weights: Var,
    bias: Var,
    act_fn: Option<Activation>,
}

impl Dense {
    /// Wraps a `[d_in, d_out]` weight matrix and a `[1, d_out]` bias row.
    pub fn new(weights: Var, bias: Var, act_fn: Option<Activation>) -> Self {
        assert_eq!(
            weights.shape().1,
            bias.shape().1,
            "dense: weight and bias widths differ"
        );
        Self {
            weights,
            bias,
            act_fn,
        }
    }

    pub fn forward(&self, x: &Var) -> Var {
        let z = ops::add_row(&ops::matmul(x, &self.weights), &self.bias);

        match self.act_fn {
            Some(act_fn) => act_fn.apply(&z),
            None => z,
        }
    }

    pub fn weights(&self) -> &Var {
        &self.weights
    }

    pub fn bias(&self) -> &Var {
        &self.bias
    }

    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.weights.len() + self.bias.len()
    }
}
