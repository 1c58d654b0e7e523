use argmin::core::{CostFunction, Error, Gradient};
use autograd::Var;
use ndarray::{Array1, Array2};

use crate::error::{PinnError, Result};
use crate::network::Network;
use crate::residual::{ProjectileResidual, ResidualTerms};

use super::ParamLayout;

/// A full-batch training objective over a flat parameter vector: the loss
/// and its analytic reverse-mode gradient.
pub trait Objective {
    /// The number of free parameters.
    fn dim(&self) -> usize;

    /// The loss at `theta`.
    fn eval(&self, theta: &Array1<f64>) -> Result<f64>;

    /// The gradient of the loss at `theta`, same length as `theta`.
    fn grad(&self, theta: &Array1<f64>) -> Result<Array1<f64>>;
}

/// The physics-informed objective: a [`ProjectileResidual`] evaluated on a
/// fixed sample batch, exposed over the network's flat parameter vector.
pub struct PinnObjective {
    residual: ProjectileResidual<Network>,
    params: Vec<Var>,
    layout: ParamLayout,
    batch: Array2<f64>,
}

impl PinnObjective {
    /// Binds the residual model to its training batch and records the
    /// parameter template.
    pub fn new(residual: ProjectileResidual<Network>, batch: Array2<f64>) -> Self {
        let params = residual.model().parameters();
        let layout = ParamLayout::of(&params);

        Self {
            residual,
            params,
            layout,
            batch,
        }
    }

    /// The network's current parameters as a flat vector, the natural
    /// starting point for a fit.
    pub fn initial_params(&self) -> Array1<f64> {
        ParamLayout::flatten(&self.params)
    }

    /// Writes a flat vector into the network.
    pub fn apply(&self, theta: &Array1<f64>) -> Result<()> {
        self.layout.restore(&self.params, theta)
    }

    pub fn residual(&self) -> &ProjectileResidual<Network> {
        &self.residual
    }

    fn terms_at(&self, theta: &Array1<f64>) -> Result<ResidualTerms> {
        self.apply(theta)?;
        self.residual.residuals(&Var::new(self.batch.clone()))
    }
}

impl Objective for PinnObjective {
    fn dim(&self) -> usize {
        self.layout.len()
    }

    fn eval(&self, theta: &Array1<f64>) -> Result<f64> {
        Ok(self.terms_at(theta)?.total.item())
    }

    fn grad(&self, theta: &Array1<f64>) -> Result<Array1<f64>> {
        let terms = self.terms_at(theta)?;

        // The nested derivative passes leave scratch gradients on the
        // parameters; the loss pass must start from zero.
        self.residual.model().zero_grad();
        terms.total.backward();

        Ok(ParamLayout::flatten_grads(&self.params))
    }
}

/// Bridges an [`Objective`] to the solver's cost and gradient traits.
///
/// Non-finite values are rejected here, inside the evaluation, so a
/// diverging run fails fast instead of stepping through NaNs.
pub(crate) struct ObjectiveAdapter<'a, F: Objective> {
    pub f: &'a F,
}

impl<F: Objective> CostFunction for ObjectiveAdapter<'_, F> {
    type Param = Array1<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> std::result::Result<f64, Error> {
        let value = self.f.eval(theta)?;
        if !value.is_finite() {
            return Err(PinnError::NumericalDivergence { value }.into());
        }
        Ok(value)
    }
}

impl<F: Objective> Gradient for ObjectiveAdapter<'_, F> {
    type Param = Array1<f64>;
    type Gradient = Array1<f64>;

    fn gradient(&self, theta: &Self::Param) -> std::result::Result<Array1<f64>, Error> {
        let grad = self.f.grad(theta)?;
        if grad.len() != self.f.dim() {
            return Err(PinnError::ShapeMismatch {
                what: "gradient vector",
                got: grad.len(),
                expected: self.f.dim(),
            }
            .into());
        }
        if let Some(&bad) = grad.iter().find(|g| !g.is_finite()) {
            return Err(PinnError::NumericalDivergence { value: bad }.into());
        }
        Ok(grad)
    }
}
