mod activation;
mod dense;
mod net;

pub use activation::Activation;
pub use dense::Dense;
pub use net::{Network, NetworkConfig};
