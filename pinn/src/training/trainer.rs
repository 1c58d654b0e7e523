use std::collections::HashMap;

use argmin::core::observers::{Observe, ObserverMode};
use argmin::core::{Executor, IterState, Solver, State, TerminationReason, TerminationStatus, KV};
use argmin::solver::linesearch::{HagerZhangLineSearch, MoreThuenteLineSearch};
use argmin::solver::quasinewton::LBFGS;
use log::{debug, info};
use ndarray::Array1;

use crate::error::{PinnError, Result};

use super::{Objective, ObjectiveAdapter};

/// Flat parameter vector seen by the optimizer.
pub type Theta = Array1<f64>;

/// Gradient vector, same length as [`Theta`].
pub type Grad = Array1<f64>;

type LbfgsState = IterState<Theta, Grad, (), (), (), f64>;

type MoreThuenteLs = MoreThuenteLineSearch<Theta, Grad, f64>;
type HagerZhangLs = HagerZhangLineSearch<Theta, Grad, f64>;

/// Default history size (`m`) for L-BFGS runs.
pub const DEFAULT_LBFGS_MEM: usize = 7;

/// Line-search strategy used inside L-BFGS.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LineSearch {
    #[default]
    MoreThuente,
    HagerZhang,
}

/// Options for a quasi-Newton fit.
#[derive(Clone, Debug)]
pub struct TrainOptions {
    /// Iteration budget; reaching it is a normal terminal state.
    pub max_iters: u64,
    /// Terminate once the gradient norm falls below this.
    pub tol_grad: f64,
    /// Terminate once the loss improvement falls below this.
    pub tol_cost: f64,
    /// L-BFGS history size.
    pub memory: usize,
    pub line_search: LineSearch,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            max_iters: 500,
            tol_grad: 1e-8,
            tol_cost: f64::EPSILON,
            memory: DEFAULT_LBFGS_MEM,
            line_search: LineSearch::default(),
        }
    }
}

/// Terminal state of a fit. Both are normal outcomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FitStatus {
    /// A tolerance was met before the iteration budget ran out.
    Converged,
    /// The iteration budget was exhausted first.
    MaxIterReached,
}

/// What a fit produced: the best parameter vector and how the run ended.
#[derive(Clone, Debug)]
pub struct FitOutcome {
    pub theta: Theta,
    pub loss: f64,
    pub iterations: u64,
    pub status: FitStatus,
    /// Norm of the last available gradient, when the solver kept one.
    pub grad_norm: Option<f64>,
    /// Solver function-evaluation counters, by name.
    pub func_counts: HashMap<String, u64>,
}

type ProgressFn = Box<dyn FnMut(u64, f64) + Send>;

/// Per-iteration observer: logs progress and forwards `(iteration, loss)`
/// to an optional caller-supplied callback. Observation never affects
/// control flow.
struct Progress {
    callback: Option<ProgressFn>,
}

impl<I: State<Float = f64>> Observe<I> for Progress {
    fn observe_iter(&mut self, state: &I, _kv: &KV) -> std::result::Result<(), argmin::core::Error> {
        let (iter, cost) = (state.get_iter(), state.get_cost());
        debug!("iter {iter}: loss {cost:.6e}");

        if let Some(callback) = &mut self.callback {
            callback(iter, cost);
        }
        Ok(())
    }
}

/// Owns one full-batch quasi-Newton training loop: it submits loss and
/// analytic gradient evaluations of an [`Objective`] to a bounded-memory
/// L-BFGS line-search solver until a tolerance is met or the iteration
/// budget is exhausted.
///
/// The loop is synchronous and single-threaded; one trainer owns its
/// objective's parameter set for the duration of [`fit`](Self::fit).
pub struct QuasiNewtonTrainer {
    opts: TrainOptions,
    progress: Option<ProgressFn>,
}

impl QuasiNewtonTrainer {
    pub fn new(opts: TrainOptions) -> Self {
        Self {
            opts,
            progress: None,
        }
    }

    /// Registers a callback invoked once per iteration with the iteration
    /// index and the current loss.
    pub fn with_progress(mut self, callback: impl FnMut(u64, f64) + Send + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Minimizes `objective` starting from `theta0`.
    ///
    /// # Errors
    /// - `ShapeMismatch` if `theta0` does not match the objective dimension.
    /// - `NumericalDivergence` if any loss or gradient evaluation produces
    ///   a non-finite value; the run stops at once and is not retried.
    /// - `Optimizer` for solver-internal failures.
    ///
    /// Exhausting the iteration budget is reported through
    /// [`FitStatus::MaxIterReached`], not as an error.
    pub fn fit<F: Objective>(&mut self, objective: &F, theta0: Theta) -> Result<FitOutcome> {
        if theta0.len() != objective.dim() {
            return Err(PinnError::ShapeMismatch {
                what: "initial parameter vector",
                got: theta0.len(),
                expected: objective.dim(),
            });
        }

        match self.opts.line_search {
            LineSearch::MoreThuente => {
                let solver = LBFGS::new(MoreThuenteLs::new(), self.opts.memory)
                    .with_tolerance_grad(self.opts.tol_grad)?
                    .with_tolerance_cost(self.opts.tol_cost)?;
                self.run(objective, solver, theta0)
            }
            LineSearch::HagerZhang => {
                let solver = LBFGS::new(HagerZhangLs::new(), self.opts.memory)
                    .with_tolerance_grad(self.opts.tol_grad)?
                    .with_tolerance_cost(self.opts.tol_cost)?;
                self.run(objective, solver, theta0)
            }
        }
    }

    fn run<'a, F, S>(&mut self, objective: &'a F, solver: S, theta0: Theta) -> Result<FitOutcome>
    where
        F: Objective,
        S: Solver<ObjectiveAdapter<'a, F>, LbfgsState> + Send + 'static,
    {
        let max_iters = self.opts.max_iters;
        let problem = ObjectiveAdapter { f: objective };
        let progress = Progress {
            callback: self.progress.take(),
        };

        let executor = Executor::new(problem, solver)
            .configure(|state| state.param(theta0).max_iters(max_iters))
            .add_observer(progress, ObserverMode::Always);

        let mut state = executor.run()?.state().clone();

        let iterations = state.get_iter();
        let func_counts = state.get_func_counts().clone();
        let status = match state.get_termination_status() {
            TerminationStatus::Terminated(TerminationReason::MaxItersReached) => {
                FitStatus::MaxIterReached
            }
            _ => FitStatus::Converged,
        };
        let grad_norm = state.take_gradient().map(|g| g.dot(&g).sqrt());
        let loss = state.get_best_cost();
        let theta = state.take_best_param().ok_or_else(|| PinnError::Optimizer {
            text: "solver finished without a parameter vector".to_owned(),
        })?;

        if !loss.is_finite() {
            return Err(PinnError::NumericalDivergence { value: loss });
        }

        info!("fit finished after {iterations} iterations ({status:?}): loss {loss:.6e}");

        Ok(FitOutcome {
            theta,
            loss,
            iterations,
            status,
            grad_norm,
            func_counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;

    /// Convex quadratic `sum_i w_i (theta_i - c_i)^2` with its analytic
    /// gradient.
    struct Quadratic {
        center: Theta,
        weights: Theta,
    }

    impl Quadratic {
        fn new(center: Theta, weights: Theta) -> Self {
            Self { center, weights }
        }
    }

    impl Objective for Quadratic {
        fn dim(&self) -> usize {
            self.center.len()
        }

        fn eval(&self, theta: &Theta) -> Result<f64> {
            let d = theta - &self.center;
            Ok((&d * &d).dot(&self.weights))
        }

        fn grad(&self, theta: &Theta) -> Result<Grad> {
            Ok(2.0 * &self.weights * (theta - &self.center))
        }
    }

    #[test]
    fn a_convex_quadratic_converges_to_its_minimum() {
        let objective = Quadratic::new(array![1.0, -2.0, 3.0], array![1.0, 2.0, 0.5]);
        let mut trainer = QuasiNewtonTrainer::new(TrainOptions::default());

        let outcome = trainer.fit(&objective, Array1::zeros(3)).unwrap();

        assert_eq!(outcome.status, FitStatus::Converged);
        assert!(outcome.loss < 1e-10);
        for (got, want) in outcome.theta.iter().zip([1.0, -2.0, 3.0]) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-4);
        }
    }

    #[test]
    fn both_line_searches_solve_the_same_problem() {
        for line_search in [LineSearch::MoreThuente, LineSearch::HagerZhang] {
            let objective = Quadratic::new(array![0.5, 0.25], array![1.0, 3.0]);
            let opts = TrainOptions {
                line_search,
                ..TrainOptions::default()
            };

            let outcome = QuasiNewtonTrainer::new(opts)
                .fit(&objective, Array1::zeros(2))
                .unwrap();
            assert!(outcome.loss < 1e-10);
        }
    }

    #[test]
    fn the_progress_callback_sees_every_iteration() {
        use std::sync::{Arc, Mutex};

        let objective = Quadratic::new(array![4.0, -1.0], array![1.0, 5.0]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut trainer = QuasiNewtonTrainer::new(TrainOptions::default())
            .with_progress(move |iter, loss| sink.lock().unwrap().push((iter, loss)));
        let outcome = trainer.fit(&objective, Array1::zeros(2)).unwrap();

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.len() as u64 >= outcome.iterations);
        assert!(seen.iter().all(|(_, loss)| loss.is_finite()));
    }

    #[test]
    fn a_mismatched_initial_vector_is_rejected() {
        let objective = Quadratic::new(array![0.0, 0.0], array![1.0, 1.0]);
        let err = QuasiNewtonTrainer::new(TrainOptions::default())
            .fit(&objective, Array1::zeros(5))
            .unwrap_err();

        assert!(matches!(
            err,
            PinnError::ShapeMismatch {
                got: 5,
                expected: 2,
                ..
            }
        ));
    }

    #[test]
    fn exhausting_the_budget_is_a_normal_outcome() {
        // Anisotropic, so a single line search cannot land on the minimum.
        let objective = Quadratic::new(Array1::from_elem(4, 10.0), array![1.0, 4.0, 9.0, 16.0]);
        let opts = TrainOptions {
            max_iters: 1,
            ..TrainOptions::default()
        };

        let outcome = QuasiNewtonTrainer::new(opts)
            .fit(&objective, Array1::zeros(4))
            .unwrap();
        assert_eq!(outcome.status, FitStatus::MaxIterReached);
        assert!(outcome.loss.is_finite());
    }
}
