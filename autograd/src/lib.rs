//! Reverse-mode automatic differentiation over `ndarray` batches.
//!
//! Computations are recorded as a graph of [`Var`]s while they run; calling
//! [`Var::backward`] propagates gradients back to the leaves. Gradients are
//! graph nodes themselves, so composing two reverse passes yields exact
//! second derivatives — which is what [`GradientEngine`] does for the first
//! input coordinate of a [`Differentiable`] model.

mod engine;
mod error;
pub mod ops;
mod var;

pub use engine::{Derivatives, Differentiable, GradientEngine};
pub use error::{AdError, Result};
pub use var::Var;
