use autograd::{ops, Differentiable, GradientEngine, Var};
use ndarray::Array2;

use crate::error::{PinnError, Result};

/// The residual scalars of one forward pass, each a mean-squared value
/// over the batch, plus their unweighted sum.
///
/// Every term is non-negative. The terms stay connected to the model
/// parameters, so `total.backward()` yields the training gradient.
pub struct ResidualTerms {
    /// `d²r/dt²` against `[0, -g]`.
    pub pde: Var,
    /// `r(t=0)` against the origin.
    pub position: Var,
    /// `dr/dt(t=0)` against the batch's own initial-velocity coordinates.
    pub velocity: Var,
    /// `pde + position + velocity`, all weights 1.
    pub total: Var,
}

/// Builds the physics-informed training objective for projectile motion:
/// the governing equation and the initial conditions are encoded as
/// residuals of a model's derivatives, not fitted from labeled data.
pub struct ProjectileResidual<M> {
    grads: GradientEngine<M>,
    mask: Var,
    gravity: f64,
    num_inputs: usize,
}

impl<M> std::fmt::Debug for ProjectileResidual<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectileResidual")
            .field("gravity", &self.gravity)
            .field("num_inputs", &self.num_inputs)
            .finish_non_exhaustive()
    }
}

impl<M: Differentiable> ProjectileResidual<M> {
    /// Wraps `model` and the gravity constant `g`.
    ///
    /// Probes the model on a one-sample batch so that a graph that cannot
    /// be differentiated along the time coordinate fails here, before any
    /// training iteration runs.
    pub fn new(model: M, gravity: f64, num_inputs: usize) -> Result<Self> {
        // t is coordinate 0; the remaining coordinates pass through.
        let mut mask = Array2::ones((1, num_inputs));
        mask[[0, 0]] = 0.0;

        let this = Self {
            grads: GradientEngine::new(model),
            mask: Var::new(mask),
            gravity,
            num_inputs,
        };

        let probe = Var::new(Array2::from_elem((1, num_inputs), 0.5));
        let derivs = this.grads.evaluate(&probe)?;

        let num_outputs = derivs.value.shape().1;
        if num_outputs + 1 != num_inputs {
            return Err(PinnError::ShapeMismatch {
                what: "model output width",
                got: num_outputs,
                expected: num_inputs - 1,
            });
        }
        this.grads.evaluate(&this.zero_time(&probe))?;

        Ok(this)
    }

    /// Forces the time coordinate of a batch to zero, leaving the other
    /// coordinates unchanged. A mask multiply, not a branch, so the result
    /// stays differentiable.
    pub fn zero_time(&self, x: &Var) -> Var {
        ops::mul_row(x, &self.mask)
    }

    /// Evaluates the three residual terms on a `[n, num_inputs]` batch.
    ///
    /// The second time derivative is taken on the raw batch; position and
    /// velocity at `t = 0` are taken on the zero-time view of the same
    /// batch. The velocity target is the batch's own trailing coordinates,
    /// a projection of the input rather than a constant.
    pub fn residuals(&self, x: &Var) -> Result<ResidualTerms> {
        let (n, _) = x.shape();
        let num_outputs = self.num_inputs - 1;

        let motion = self.grads.evaluate(x)?;
        let accel_target = Var::new(Array2::from_shape_fn((n, num_outputs), |(_, j)| {
            if j + 1 == num_outputs {
                -self.gravity
            } else {
                0.0
            }
        }));
        let pde = ops::mse(&motion.second, &accel_target);

        let at_rest = self.grads.evaluate(&self.zero_time(x))?;
        let origin = Var::new(Array2::zeros((n, num_outputs)));
        let position = ops::mse(&at_rest.value, &origin);
        let velocity = ops::mse(&at_rest.first, &ops::cols(x, 1, self.num_inputs));

        let total = &(&pde + &position) + &velocity;

        Ok(ResidualTerms {
            pde,
            position,
            velocity,
            total,
        })
    }

    pub fn model(&self) -> &M {
        self.grads.model()
    }

    pub fn gravity(&self) -> f64 {
        self.gravity
    }
}
