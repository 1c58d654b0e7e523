use autograd::{ops, Var};

use crate::error::{PinnError, Result};

/// Hidden-layer nonlinearity.
///
/// Every variant is smooth, so second derivatives with respect to the
/// inputs exist everywhere.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Activation {
    #[default]
    Softplus,
    Tanh,
    Sigmoid,
}

impl Activation {
    /// Resolves a configuration name into an activation.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "softplus" => Ok(Self::Softplus),
            "tanh" => Ok(Self::Tanh),
            "sigmoid" => Ok(Self::Sigmoid),
            _ => Err(PinnError::UnknownActivation {
                name: name.to_owned(),
            }),
        }
    }

    pub fn apply(&self, z: &Var) -> Var {
        match self {
            Self::Softplus => ops::softplus(z),
            Self::Tanh => ops::tanh(z),
            Self::Sigmoid => ops::sigmoid(z),
        }
    }
}
