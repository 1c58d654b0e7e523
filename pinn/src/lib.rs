//! Physics-informed training of a projectile-motion network.
//!
//! A feed-forward network `(t, v0_x, v0_z) -> (x, z)` is trained without
//! labeled trajectories: the governing equation `d²r/dt² = (0, -g)` and the
//! initial conditions at `t = 0` are encoded as residuals over the model's
//! derivatives, and the resulting full-batch objective is minimized with a
//! bounded-memory quasi-Newton line search.

pub mod dataset;
pub mod error;
pub mod network;
pub mod residual;
pub mod training;

pub use error::{PinnError, Result};
