use autograd::Var;
use ndarray::{Array1, Array2};

use crate::error::{PinnError, Result};

/// Shape template of an ordered parameter set.
///
/// Flattening walks the parameters in their declaration order and
/// concatenates each array in row-major order; restoring is the exact
/// inverse given this template. `restore(flatten(p)) == p` bit for bit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamLayout {
    shapes: Vec<(usize, usize)>,
}

impl ParamLayout {
    /// Records the shapes of `params`, in order.
    pub fn of(params: &[Var]) -> Self {
        Self {
            shapes: params.iter().map(Var::shape).collect(),
        }
    }

    /// The total element count across the template.
    pub fn len(&self) -> usize {
        self.shapes.iter().map(|&(r, c)| r * c).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenates the parameter values into one flat vector.
    pub fn flatten(params: &[Var]) -> Array1<f64> {
        let mut flat = Vec::new();
        for param in params {
            flat.extend(param.value().iter().copied());
        }
        Array1::from(flat)
    }

    /// Concatenates the parameter gradients in the same order. A parameter
    /// the loss does not reach contributes zeros.
    pub fn flatten_grads(params: &[Var]) -> Array1<f64> {
        let mut flat = Vec::new();
        for param in params {
            match param.grad() {
                Some(grad) => flat.extend(grad.value().iter().copied()),
                None => flat.extend(std::iter::repeat(0.0).take(param.len())),
            }
        }
        Array1::from(flat)
    }

    /// Splits a flat vector back into arrays matching the template.
    ///
    /// # Errors
    /// `ShapeMismatch` if the vector length does not equal the template's
    /// total element count.
    pub fn unflatten(&self, theta: &Array1<f64>) -> Result<Vec<Array2<f64>>> {
        if theta.len() != self.len() {
            return Err(PinnError::ShapeMismatch {
                what: "flat parameter vector",
                got: theta.len(),
                expected: self.len(),
            });
        }

        let mut offset = 0;
        let arrays = self
            .shapes
            .iter()
            .map(|&(rows, cols)| {
                let count = rows * cols;
                let chunk = theta.slice(ndarray::s![offset..offset + count]).to_vec();
                offset += count;
                Array2::from_shape_vec((rows, cols), chunk)
                    .expect("chunk length matches the recorded shape")
            })
            .collect();

        Ok(arrays)
    }

    /// Writes a flat vector back into the parameter set it was recorded
    /// from.
    ///
    /// # Errors
    /// `ShapeMismatch` if the vector length or the parameter count does not
    /// match the template.
    pub fn restore(&self, params: &[Var], theta: &Array1<f64>) -> Result<()> {
        if params.len() != self.shapes.len() {
            return Err(PinnError::ShapeMismatch {
                what: "parameter set",
                got: params.len(),
                expected: self.shapes.len(),
            });
        }

        for (param, array) in params.iter().zip(self.unflatten(theta)?) {
            if param.shape() != array.dim() {
                return Err(PinnError::ShapeMismatch {
                    what: "parameter array",
                    got: array.len(),
                    expected: param.len(),
                });
            }
            param.set_value(array);
        }

        Ok(())
    }
}
