//! Bounded local refinement.
//!
//! Wraps argmin's L-BFGS (with a More-Thuente line search) behind a small
//! objective trait. Box bounds are handled by clamping parameters before
//! every objective/gradient evaluation plus a projected-gradient heuristic,
//! so unbounded dimensions simply use infinite boxes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;

use crate::error::{Error, Result};

/// Objective function consumed by the refinement stages.
pub trait Objective: Send + Sync {
    /// Evaluate the cost at the given parameters.
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient at the given parameters. The default uses central differences
    /// with an adaptive step size.
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let n = params.len();
        let mut grad = vec![0.0; n];

        for i in 0..n {
            // Adaptive step size: eps = sqrt(machine epsilon) * max(|x_i|, 1)
            let eps = 1e-8 * params[i].abs().max(1.0);

            let mut plus = params.to_vec();
            plus[i] += eps;
            let f_plus = self.eval(&plus)?;

            let mut minus = params.to_vec();
            minus[i] -= eps;
            let f_minus = self.eval(&minus)?;

            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }

        Ok(grad)
    }
}

/// Configuration for the local optimizer.
#[derive(Debug, Clone)]
pub struct RefineConfig {
    pub max_iter: u64,
    /// Convergence tolerance on the gradient norm.
    pub tol: f64,
    /// Number of corrections kept for the inverse-Hessian approximation.
    pub memory: usize,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self { max_iter: 500, tol: 1e-6, memory: 10 }
    }
}

/// Result of a refinement run.
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub parameters: Vec<f64>,
    pub cost: f64,
    pub n_iter: u64,
    pub n_fev: usize,
    pub n_gev: usize,
    pub converged: bool,
    pub message: String,
}

impl std::fmt::Display for OptimizationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "OptimizationOutcome(cost={:.6}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.cost, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

#[derive(Default)]
struct EvalCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

/// Adapter making an [`Objective`] consumable by argmin.
struct BoxedProblem<'a> {
    objective: &'a dyn Objective,
    bounds: &'a [(f64, f64)],
    counts: Arc<EvalCounts>,
}

impl CostFunction for BoxedProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        self.objective.eval(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl Gradient for BoxedProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        let mut g = self
            .objective
            .gradient(&clamped)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))?;

        // At an active bound, zero any gradient component that would push
        // further outside; otherwise the line search keeps stepping into the
        // flat clamped region.
        const EPS: f64 = 1e-12;
        for (i, (&x, &(lo, hi))) in clamped.iter().zip(self.bounds.iter()).enumerate() {
            if x <= lo + EPS && g[i] > 0.0 {
                g[i] = 0.0;
            }
            if x >= hi - EPS && g[i] < 0.0 {
                g[i] = 0.0;
            }
        }

        Ok(g)
    }
}

/// Bounded quasi-Newton optimizer.
pub struct LocalOptimizer {
    config: RefineConfig,
}

impl LocalOptimizer {
    pub fn new(config: RefineConfig) -> Self {
        Self { config }
    }

    /// Minimize `objective` from `init`, keeping every parameter inside its
    /// `(lower, upper)` box.
    pub fn minimize(
        &self,
        objective: &dyn Objective,
        init: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationOutcome> {
        if init.len() != bounds.len() {
            return Err(Error::Config(format!(
                "Parameter and bounds length mismatch: {} != {}.",
                init.len(),
                bounds.len()
            )));
        }
        if init.iter().any(|v| !v.is_finite()) {
            return Err(Error::Optimizer(
                "Refinement seed contains non-finite values.".to_string(),
            ));
        }

        let init_clamped = clamp_params(init, bounds);
        let counts = Arc::new(EvalCounts::default());
        let problem = BoxedProblem { objective, bounds, counts: counts.clone() };

        let linesearch = MoreThuenteLineSearch::new();
        // Argmin's default cost tolerance is ~machine epsilon, which is too
        // strict for residual-sum scales and leads to max-iter terminations.
        let tol_cost = if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(linesearch, self.config.memory)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| Error::Config(format!("Invalid optimizer tolerance: {e}")))?
            .with_tolerance_cost(tol_cost)
            .map_err(|e| Error::Config(format!("Invalid optimizer cost tolerance: {e}")))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(init_clamped).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Optimizer(format!("Refinement failed: {e}")))?;

        let state = res.state();
        let best_unclamped = state
            .get_best_param()
            .ok_or_else(|| Error::Optimizer("Refinement produced no parameters.".to_string()))?
            .clone();
        let parameters = clamp_params(&best_unclamped, bounds);
        let cost = state.get_best_cost();
        let n_iter = state.get_iter();
        let n_fev = counts.cost.load(Ordering::Relaxed);
        let n_gev = counts.grad.load(Ordering::Relaxed);

        let termination = state.get_termination_status();
        let converged = matches!(
            termination,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );
        let message = termination.to_string();

        Ok(OptimizationOutcome { parameters, cost, n_iter, n_fev, n_gev, converged, message })
    }
}

impl Default for LocalOptimizer {
    fn default() -> Self {
        Self::new(RefineConfig::default())
    }
}
