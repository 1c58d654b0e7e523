mod flatten;
mod objective;
mod trainer;

pub use flatten::ParamLayout;
pub use objective::{Objective, PinnObjective};
pub(crate) use objective::ObjectiveAdapter;
pub use trainer::{
    FitOutcome, FitStatus, Grad, LineSearch, QuasiNewtonTrainer, Theta, TrainOptions,
    DEFAULT_LBFGS_MEM,
};
