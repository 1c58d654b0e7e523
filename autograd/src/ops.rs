//! Operations on [`Var`]s.
//!
//! Forward values are computed eagerly; every backward rule is itself built
//! from these operations, never from raw arrays, so the gradient graph can
//! be differentiated a second time.

use ndarray::{concatenate, s, Array2, Axis};

use crate::var::Var;

pub(crate) trait Op {
    fn name(&self) -> &'static str;

    /// Gradients of the inputs given the output gradient `gy`, in input
    /// order.
    fn backward(&self, inputs: &[Var], gy: &Var) -> Vec<Var>;
}

/// Elementwise sum of two same-shaped variables.
pub fn add(a: &Var, b: &Var) -> Var {
    let data = {
        let (x, y) = (a.array(), b.array());
        assert_eq!(x.dim(), y.dim(), "add: shape mismatch");
        &*x + &*y
    };
    Var::from_op(Box::new(Add), vec![a.clone(), b.clone()], data)
}

struct Add;

impl Op for Add {
    fn name(&self) -> &'static str {
        "add"
    }

    fn backward(&self, _inputs: &[Var], gy: &Var) -> Vec<Var> {
        vec![gy.clone(), gy.clone()]
    }
}

/// Elementwise difference of two same-shaped variables.
pub fn sub(a: &Var, b: &Var) -> Var {
    let data = {
        let (x, y) = (a.array(), b.array());
        assert_eq!(x.dim(), y.dim(), "sub: shape mismatch");
        &*x - &*y
    };
    Var::from_op(Box::new(Sub), vec![a.clone(), b.clone()], data)
}

struct Sub;

impl Op for Sub {
    fn name(&self) -> &'static str {
        "sub"
    }

    fn backward(&self, _inputs: &[Var], gy: &Var) -> Vec<Var> {
        vec![gy.clone(), affine(gy, -1.0, 0.0)]
    }
}

/// Elementwise product of two same-shaped variables.
pub fn mul(a: &Var, b: &Var) -> Var {
    let data = {
        let (x, y) = (a.array(), b.array());
        assert_eq!(x.dim(), y.dim(), "mul: shape mismatch");
        &*x * &*y
    };
    Var::from_op(Box::new(Mul), vec![a.clone(), b.clone()], data)
}

struct Mul;

impl Op for Mul {
    fn name(&self) -> &'static str {
        "mul"
    }

    fn backward(&self, inputs: &[Var], gy: &Var) -> Vec<Var> {
        vec![mul(gy, &inputs[1]), mul(gy, &inputs[0])]
    }
}

/// Elementwise `scale * x + shift`.
pub fn affine(x: &Var, scale: f64, shift: f64) -> Var {
    let data = x.array().mapv(|v| scale * v + shift);
    Var::from_op(Box::new(Affine { scale }), vec![x.clone()], data)
}

struct Affine {
    scale: f64,
}

impl Op for Affine {
    fn name(&self) -> &'static str {
        "affine"
    }

    fn backward(&self, _inputs: &[Var], gy: &Var) -> Vec<Var> {
        vec![affine(gy, self.scale, 0.0)]
    }
}

/// Elementwise square.
pub fn square(x: &Var) -> Var {
    let data = x.array().mapv(|v| v * v);
    Var::from_op(Box::new(Square), vec![x.clone()], data)
}

struct Square;

impl Op for Square {
    fn name(&self) -> &'static str {
        "square"
    }

    fn backward(&self, inputs: &[Var], gy: &Var) -> Vec<Var> {
        vec![affine(&mul(gy, &inputs[0]), 2.0, 0.0)]
    }
}

/// Matrix product of `[n, k]` and `[k, m]` variables.
pub fn matmul(a: &Var, b: &Var) -> Var {
    let data = {
        let (x, y) = (a.array(), b.array());
        assert_eq!(
            x.dim().1,
            y.dim().0,
            "matmul: inner dimensions do not match"
        );
        x.dot(&*y)
    };
    Var::from_op(Box::new(MatMul), vec![a.clone(), b.clone()], data)
}

struct MatMul;

impl Op for MatMul {
    fn name(&self) -> &'static str {
        "matmul"
    }

    fn backward(&self, inputs: &[Var], gy: &Var) -> Vec<Var> {
        vec![
            matmul(gy, &transpose(&inputs[1])),
            matmul(&transpose(&inputs[0]), gy),
        ]
    }
}

/// Matrix transpose.
pub fn transpose(x: &Var) -> Var {
    let data = x.array().t().to_owned();
    Var::from_op(Box::new(Transpose), vec![x.clone()], data)
}

struct Transpose;

impl Op for Transpose {
    fn name(&self) -> &'static str {
        "transpose"
    }

    fn backward(&self, _inputs: &[Var], gy: &Var) -> Vec<Var> {
        vec![transpose(gy)]
    }
}

/// Adds a `[1, d]` row to every row of a `[n, d]` variable.
pub fn add_row(x: &Var, row: &Var) -> Var {
    let data = {
        let (x, r) = (x.array(), row.array());
        assert_eq!(r.dim().0, 1, "add_row: row must have a single row");
        assert_eq!(x.dim().1, r.dim().1, "add_row: column count mismatch");
        &*x + &*r
    };
    Var::from_op(Box::new(AddRow), vec![x.clone(), row.clone()], data)
}

struct AddRow;

impl Op for AddRow {
    fn name(&self) -> &'static str {
        "add_row"
    }

    fn backward(&self, _inputs: &[Var], gy: &Var) -> Vec<Var> {
        vec![gy.clone(), sum_rows(gy)]
    }
}

/// Multiplies every row of a `[n, d]` variable by a `[1, d]` row.
pub fn mul_row(x: &Var, row: &Var) -> Var {
    let data = {
        let (x, r) = (x.array(), row.array());
        assert_eq!(r.dim().0, 1, "mul_row: row must have a single row");
        assert_eq!(x.dim().1, r.dim().1, "mul_row: column count mismatch");
        &*x * &*r
    };
    Var::from_op(Box::new(MulRow), vec![x.clone(), row.clone()], data)
}

struct MulRow;

impl Op for MulRow {
    fn name(&self) -> &'static str {
        "mul_row"
    }

    fn backward(&self, inputs: &[Var], gy: &Var) -> Vec<Var> {
        vec![mul_row(gy, &inputs[1]), sum_rows(&mul(gy, &inputs[0]))]
    }
}

/// Sums a `[n, d]` variable over its rows into `[1, d]`.
pub fn sum_rows(x: &Var) -> Var {
    let data = x.array().sum_axis(Axis(0)).insert_axis(Axis(0));
    Var::from_op(Box::new(SumRows), vec![x.clone()], data)
}

struct SumRows;

impl Op for SumRows {
    fn name(&self) -> &'static str {
        "sum_rows"
    }

    fn backward(&self, inputs: &[Var], gy: &Var) -> Vec<Var> {
        vec![repeat_rows(gy, inputs[0].shape().0)]
    }
}

/// Repeats a `[1, d]` row `n` times into `[n, d]`.
pub fn repeat_rows(row: &Var, n: usize) -> Var {
    let data = {
        let r = row.array();
        assert_eq!(r.dim().0, 1, "repeat_rows: input must have a single row");
        r.broadcast((n, r.dim().1))
            .expect("a single row broadcasts over any row count")
            .to_owned()
    };
    Var::from_op(Box::new(RepeatRows), vec![row.clone()], data)
}

struct RepeatRows;

impl Op for RepeatRows {
    fn name(&self) -> &'static str {
        "repeat_rows"
    }

    fn backward(&self, _inputs: &[Var], gy: &Var) -> Vec<Var> {
        vec![sum_rows(gy)]
    }
}

/// Sums every element into a `[1, 1]` scalar variable.
pub fn sum_all(x: &Var) -> Var {
    let data = Array2::from_elem((1, 1), x.array().sum());
    Var::from_op(Box::new(SumAll), vec![x.clone()], data)
}

struct SumAll;

impl Op for SumAll {
    fn name(&self) -> &'static str {
        "sum_all"
    }

    fn backward(&self, inputs: &[Var], gy: &Var) -> Vec<Var> {
        let (rows, cols) = inputs[0].shape();
        vec![repeat_full(gy, rows, cols)]
    }
}

/// Broadcasts a `[1, 1]` scalar variable to `[rows, cols]`.
pub fn repeat_full(scalar: &Var, rows: usize, cols: usize) -> Var {
    let data = {
        let s = scalar.array();
        assert_eq!(s.dim(), (1, 1), "repeat_full: input must be a scalar");
        Array2::from_elem((rows, cols), s[[0, 0]])
    };
    Var::from_op(Box::new(RepeatFull), vec![scalar.clone()], data)
}

struct RepeatFull;

impl Op for RepeatFull {
    fn name(&self) -> &'static str {
        "repeat_full"
    }

    fn backward(&self, _inputs: &[Var], gy: &Var) -> Vec<Var> {
        vec![sum_all(gy)]
    }
}

/// Mean of every element as a `[1, 1]` scalar variable.
pub fn mean(x: &Var) -> Var {
    affine(&sum_all(x), 1.0 / x.len() as f64, 0.0)
}

/// Mean squared error between two same-shaped variables.
pub fn mse(a: &Var, b: &Var) -> Var {
    mean(&square(&sub(a, b)))
}

/// Selects the column range `start..end`.
pub fn cols(x: &Var, start: usize, end: usize) -> Var {
    let data = {
        let v = x.array();
        assert!(
            start < end && end <= v.dim().1,
            "cols: column range out of bounds"
        );
        v.slice(s![.., start..end]).to_owned()
    };
    Var::from_op(Box::new(Cols { start }), vec![x.clone()], data)
}

struct Cols {
    start: usize,
}

impl Op for Cols {
    fn name(&self) -> &'static str {
        "cols"
    }

    fn backward(&self, inputs: &[Var], gy: &Var) -> Vec<Var> {
        vec![pad_cols(gy, self.start, inputs[0].shape().1)]
    }
}

/// Embeds a `[n, w]` variable into `[n, total]` zeros, starting at column
/// `start`.
pub fn pad_cols(x: &Var, start: usize, total: usize) -> Var {
    let data = {
        let v = x.array();
        let (rows, width) = v.dim();
        assert!(start + width <= total, "pad_cols: slice does not fit");
        let mut out = Array2::zeros((rows, total));
        out.slice_mut(s![.., start..start + width]).assign(&v);
        out
    };
    Var::from_op(Box::new(PadCols { start }), vec![x.clone()], data)
}

struct PadCols {
    start: usize,
}

impl Op for PadCols {
    fn name(&self) -> &'static str {
        "pad_cols"
    }

    fn backward(&self, inputs: &[Var], gy: &Var) -> Vec<Var> {
        let width = inputs[0].shape().1;
        vec![cols(gy, self.start, self.start + width)]
    }
}

/// Concatenates variables along the column axis.
pub fn hstack(parts: &[Var]) -> Var {
    assert!(!parts.is_empty(), "hstack: nothing to concatenate");
    let arrays: Vec<Array2<f64>> = parts.iter().map(Var::value).collect();
    let views: Vec<_> = arrays.iter().map(Array2::view).collect();
    let data = concatenate(Axis(1), &views).expect("hstack: row counts must match");
    Var::from_op(Box::new(HStack), parts.to_vec(), data)
}

struct HStack;

impl Op for HStack {
    fn name(&self) -> &'static str {
        "hstack"
    }

    fn backward(&self, inputs: &[Var], gy: &Var) -> Vec<Var> {
        let mut offset = 0;
        inputs
            .iter()
            .map(|input| {
                let width = input.shape().1;
                let g = cols(gy, offset, offset + width);
                offset += width;
                g
            })
            .collect()
    }
}

/// Elementwise softplus, `ln(1 + e^x)`.
pub fn softplus(x: &Var) -> Var {
    // Evaluated as max(x, 0) + ln(1 + e^-|x|) so large inputs do not
    // overflow the exponential.
    let data = x.array().mapv(|v| v.max(0.0) + (-v.abs()).exp().ln_1p());
    Var::from_op(Box::new(Softplus), vec![x.clone()], data)
}

struct Softplus;

impl Op for Softplus {
    fn name(&self) -> &'static str {
        "softplus"
    }

    fn backward(&self, inputs: &[Var], gy: &Var) -> Vec<Var> {
        vec![mul(gy, &sigmoid(&inputs[0]))]
    }
}

/// Elementwise logistic sigmoid.
pub fn sigmoid(x: &Var) -> Var {
    let data = x.array().mapv(|v| 1.0 / (1.0 + (-v).exp()));
    Var::from_op(Box::new(Sigmoid), vec![x.clone()], data)
}

struct Sigmoid;

impl Op for Sigmoid {
    fn name(&self) -> &'static str {
        "sigmoid"
    }

    fn backward(&self, inputs: &[Var], gy: &Var) -> Vec<Var> {
        let s = sigmoid(&inputs[0]);
        vec![mul(gy, &mul(&s, &affine(&s, -1.0, 1.0)))]
    }
}

/// Elementwise hyperbolic tangent.
pub fn tanh(x: &Var) -> Var {
    let data = x.array().mapv(f64::tanh);
    Var::from_op(Box::new(Tanh), vec![x.clone()], data)
}

struct Tanh;

impl Op for Tanh {
    fn name(&self) -> &'static str {
        "tanh"
    }

    fn backward(&self, inputs: &[Var], gy: &Var) -> Vec<Var> {
        let t = tanh(&inputs[0]);
        vec![mul(gy, &affine(&square(&t), -1.0, 1.0))]
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;

    /// d/dx of `f` at `x`, via central differences on scalar variables.
    fn numeric_grad(f: impl Fn(&Var) -> Var, x: f64) -> f64 {
        let h = 1e-6;
        let hi = f(&Var::scalar(x + h)).item();
        let lo = f(&Var::scalar(x - h)).item();
        (hi - lo) / (2.0 * h)
    }

    fn analytic_grad(f: impl Fn(&Var) -> Var, x: f64) -> f64 {
        let v = Var::scalar(x);
        f(&v).backward();
        v.grad().unwrap().item()
    }

    #[test]
    fn elementwise_backward_rules_match_finite_differences() {
        let fns: [fn(&Var) -> Var; 4] = [softplus, sigmoid, tanh, square];
        for x in [-1.5, -0.3, 0.0, 0.7, 2.0] {
            for f in fns {
                assert_abs_diff_eq!(analytic_grad(f, x), numeric_grad(f, x), epsilon = 1e-6);
            }
            assert_abs_diff_eq!(
                analytic_grad(|v| affine(v, 3.0, -2.0), x),
                3.0,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn matmul_backward_matches_the_closed_form() {
        let a = Var::new(array![[1.0, 2.0], [3.0, 4.0]]);
        let b = Var::new(array![[5.0, 6.0], [7.0, 8.0]]);

        sum_all(&matmul(&a, &b)).backward();

        // d sum(AB) / dA = 1 B^T, d sum(AB) / dB = A^T 1
        assert_eq!(a.grad().unwrap().value(), array![[11.0, 15.0], [11.0, 15.0]]);
        assert_eq!(b.grad().unwrap().value(), array![[4.0, 4.0], [6.0, 6.0]]);
    }

    #[test]
    fn row_broadcasts_reduce_back_to_a_row() {
        let x = Var::new(array![[1.0, 2.0], [3.0, 4.0]]);
        let row = Var::new(array![[10.0, 20.0]]);

        sum_all(&add_row(&x, &row)).backward();
        assert_eq!(row.grad().unwrap().value(), array![[2.0, 2.0]]);

        let scale = Var::new(array![[2.0, 3.0]]);
        sum_all(&mul_row(&x, &scale)).backward();
        assert_eq!(scale.grad().unwrap().value(), array![[4.0, 6.0]]);
    }

    #[test]
    fn cols_and_pad_are_inverse_slices() {
        let x = Var::new(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let middle = cols(&x, 1, 2);
        assert_eq!(middle.value(), array![[2.0], [5.0]]);

        sum_all(&middle).backward();
        assert_eq!(
            x.grad().unwrap().value(),
            array![[0.0, 1.0, 0.0], [0.0, 1.0, 0.0]]
        );
    }

    #[test]
    fn hstack_splits_its_gradient() {
        let a = Var::new(array![[1.0], [2.0]]);
        let b = Var::new(array![[3.0], [4.0]]);
        let joined = hstack(&[a.clone(), b.clone()]);
        assert_eq!(joined.shape(), (2, 2));

        let weight = Var::new(array![[10.0, 20.0], [10.0, 20.0]]);
        sum_all(&mul(&joined, &weight)).backward();

        assert_eq!(a.grad().unwrap().value(), array![[10.0], [10.0]]);
        assert_eq!(b.grad().unwrap().value(), array![[20.0], [20.0]]);
    }

    #[test]
    fn mean_and_mse_reduce_to_scalars() {
        let a = Var::new(array![[1.0, 3.0], [5.0, 7.0]]);
        assert_abs_diff_eq!(mean(&a).item(), 4.0);

        let b = Var::new(array![[0.0, 0.0], [0.0, 0.0]]);
        assert_abs_diff_eq!(mse(&a, &b).item(), (1.0 + 9.0 + 25.0 + 49.0) / 4.0);
        assert_abs_diff_eq!(mse(&a, &a).item(), 0.0);
    }

    #[test]
    fn softplus_is_stable_for_large_inputs() {
        let x = Var::new(array![[800.0, -800.0]]);
        let y = softplus(&x).value();
        assert_abs_diff_eq!(y[[0, 0]], 800.0);
        assert_abs_diff_eq!(y[[0, 1]], 0.0);
    }
}
