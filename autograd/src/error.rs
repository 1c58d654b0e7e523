use thiserror::Error;

/// The result type used in the differentiation engine.
pub type Result<T> = std::result::Result<T, AdError>;

/// The differentiation engine's error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdError {
    /// No differentiation path connects the model output back to its input;
    /// the model does not consume the batch it was given.
    #[error("output column {output} of the model is not connected to its input")]
    Disconnected { output: usize },
}
