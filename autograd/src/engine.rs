use ndarray::Array2;

use crate::error::{AdError, Result};
use crate::ops;
use crate::var::Var;

/// A batched, differentiable map from input vectors to output vectors.
///
/// Implementations must build their output from [`ops`] applied to `x`, so
/// that derivatives can be taken with respect to the batch itself.
pub trait Differentiable {
    /// Evaluates the model on a `[n, d_in]` batch, producing `[n, d_out]`.
    fn evaluate(&self, x: &Var) -> Var;
}

/// A model output together with its first and second derivatives with
/// respect to the first input coordinate, all shaped `[n, d_out]`.
#[derive(Debug)]
pub struct Derivatives {
    pub value: Var,
    pub first: Var,
    pub second: Var,
}

/// Computes per-sample first and second derivatives of a model output with
/// respect to the first input coordinate, by composing two reverse passes.
///
/// The engine holds no state besides the model it wraps. The nested passes
/// leave scratch gradients on the model's parameters; callers that intend
/// to differentiate a loss must zero parameter gradients afterwards.
pub struct GradientEngine<M> {
    model: M,
}

impl<M: Differentiable> GradientEngine<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Evaluates the model on `x` and differentiates each output column
    /// twice along input coordinate 0.
    ///
    /// Both reverse passes run against the same `x` instance, keeping the
    /// derivative chain connected; `x` may itself be produced by an
    /// operation (it is watched, not required to be a leaf). The returned
    /// derivatives are graph nodes, so a loss built from them still
    /// propagates into the model parameters.
    ///
    /// Fails with [`AdError::Disconnected`] when the first pass finds no
    /// path from an output column to the input. A disconnected *second*
    /// pass means the first derivative no longer depends on the input and
    /// is reported as exact zeros.
    pub fn evaluate(&self, x: &Var) -> Result<Derivatives> {
        let value = self.model.evaluate(x);
        let (n, num_outputs) = value.shape();

        let mut first = Vec::with_capacity(num_outputs);
        let mut second = Vec::with_capacity(num_outputs);

        for k in 0..num_outputs {
            // Summing the k-th output column over the batch gives per-sample
            // input gradients, since samples are independent.
            let pick = unit_row(num_outputs, k);
            let column_sum = ops::sum_all(&ops::mul_row(&value, &pick));

            x.clear_grad();
            column_sum.backward_watching(&[x]);
            let gx = x.take_grad().ok_or(AdError::Disconnected { output: k })?;
            let d1 = ops::cols(&gx, 0, 1);

            let d1_sum = ops::sum_all(&d1);
            x.clear_grad();
            d1_sum.backward_watching(&[x]);
            let d2 = match x.take_grad() {
                Some(gx2) => ops::cols(&gx2, 0, 1),
                None => Var::new(Array2::zeros((n, 1))),
            };

            first.push(d1);
            second.push(d2);
        }

        Ok(Derivatives {
            value,
            first: ops::hstack(&first),
            second: ops::hstack(&second),
        })
    }
}

fn unit_row(width: usize, index: usize) -> Var {
    let mut row = Array2::zeros((1, width));
    row[[0, index]] = 1.0;
    Var::new(row)
}
