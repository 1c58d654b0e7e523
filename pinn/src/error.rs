use autograd::AdError;
use thiserror::Error;

/// The result type used in the entire training crate.
pub type Result<T> = std::result::Result<T, PinnError>;

/// The training crate's error type.
#[derive(Debug, Error)]
pub enum PinnError {
    /// A flat vector does not match the parameter template it is restored
    /// into. Programmer error, surfaced immediately.
    #[error("shape mismatch for {what}: got {got}, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },

    /// The loss or one of its gradient entries became NaN or infinite.
    /// Fatal for the run; callers may refit with a perturbed
    /// initialization, the trainer itself never retries.
    #[error("training diverged on a non-finite value: {value}")]
    NumericalDivergence { value: f64 },

    /// The model graph cannot be differentiated along the time coordinate.
    /// Raised when the objective is built, before any iteration runs.
    #[error("model is not differentiable: {0}")]
    DifferentiationFailure(#[from] AdError),

    /// An activation name from the configuration is not recognized.
    #[error("unknown activation `{name}`, expected one of: softplus, tanh, sigmoid")]
    UnknownActivation { name: String },

    /// The quasi-Newton solver failed internally.
    #[error("optimizer failure: {text}")]
    Optimizer { text: String },
}

impl From<argmin::core::Error> for PinnError {
    fn from(err: argmin::core::Error) -> Self {
        // Errors raised by our own cost/gradient evaluations travel through
        // argmin as opaque boxes; recover them before falling back.
        match err.downcast::<PinnError>() {
            Ok(own) => own,
            Err(other) => PinnError::Optimizer {
                text: other.to_string(),
            },
        }
    }
}
