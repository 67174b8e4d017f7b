//! # Portfolio allocation
//!
//! Turns blended returns into weights by solving
//!
//! ```text
//! max  wᵗ·μ − ½·λ·wᵗ·Σ·w      s.t.  1ᵗ·w = 1,  bounds
//! ```
//!
//! handed to the solver as `Q = −λ·Σ`, `d = μ`. A failed solve is reported once
//! through [`OptimizationResult::success`]; retrying with looser bounds is the
//! caller's call.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::blend::{BlackLitterman, ImpliedReturn};
use crate::config::SolverConfig;
use crate::constraints::{build_constraints, Bounds, ConstraintSystem};
use crate::error::{BlmError, Result};
use crate::math;
use crate::qp::{GoldfarbIdnani, QuadraticObjective, QuadraticProgram, QuadraticSolver, Sense};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub success: bool,
    /// Undefined unless `success`; prefer [`OptimizationResult::weights`].
    pub weights: DVector<f64>,
    pub objective_value: f64,
}

impl OptimizationResult {
    pub fn weights(&self) -> Option<&DVector<f64>> {
        self.success.then_some(&self.weights)
    }
}

/// Everything one Black-Litterman run produced, in pipeline order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub implied: ImpliedReturn,
    pub posterior: DVector<f64>,
    pub result: OptimizationResult,
}

/// Stateless: each call builds its own objective, constraints and solver
/// workspace, so one optimizer can serve many threads.
#[derive(Debug, Clone, Default)]
pub struct PortfolioOptimizer<S = GoldfarbIdnani> {
    solver: S,
}

impl PortfolioOptimizer<GoldfarbIdnani> {
    pub fn new(config: &SolverConfig) -> Self {
        Self {
            solver: GoldfarbIdnani::new(config),
        }
    }
}

impl<S: QuadraticSolver> PortfolioOptimizer<S> {
    pub fn with_solver(solver: S) -> Self {
        Self { solver }
    }

    /// Full pipeline: implied → posterior → allocation.
    pub fn optimize(&self, model: &BlackLitterman, bounds: &Bounds) -> Result<Allocation> {
        // Constraints do not depend on returns; build them first so shape
        // errors surface before any numerical work.
        let constraints = build_constraints(model.num_assets(), bounds)?;

        let implied = model.implied_return()?;
        let posterior = model.posterior_return(&implied)?;
        let objective = objective(model.covariance(), implied.lambda, &posterior)?;

        let result = self.solve(&objective, &constraints);
        Ok(Allocation {
            implied,
            posterior,
            result,
        })
    }

    /// Allocation for already-blended returns.
    pub fn optimize_returns(
        &self,
        covariance: &DMatrix<f64>,
        lambda: f64,
        returns: &DVector<f64>,
        bounds: &Bounds,
    ) -> Result<OptimizationResult> {
        let constraints = build_constraints(returns.len(), bounds)?;
        let objective = objective(covariance, lambda, returns)?;
        Ok(self.solve(&objective, &constraints))
    }

    fn solve(
        &self,
        objective: &QuadraticObjective,
        constraints: &ConstraintSystem,
    ) -> OptimizationResult {
        let solution = self.solver.solve(&QuadraticProgram {
            objective,
            constraints,
            sense: Sense::Maximize,
        });

        let success = solution.is_optimal();
        if success {
            debug!(
                iterations = solution.iterations,
                objective = solution.value,
                "allocation solved"
            );
        } else {
            warn!(status = ?solution.status, "allocation solve failed");
        }

        OptimizationResult {
            success,
            weights: solution.x,
            objective_value: solution.value,
        }
    }
}

// ────────────────────────────────────────────────────────────────
// objective
// Q = −λ·Σ,  d = μ
// ────────────────────────────────────────────────────────────────
pub fn objective(
    covariance: &DMatrix<f64>,
    lambda: f64,
    returns: &DVector<f64>,
) -> Result<QuadraticObjective> {
    let n = returns.len();
    if n == 0 {
        return Err(BlmError::InvalidParameter {
            name: "returns",
            reason: "at least one asset is required".into(),
        });
    }
    if covariance.nrows() != n || covariance.ncols() != n {
        return Err(BlmError::DimensionMismatch {
            what: "covariance",
            expected: n,
            actual: if covariance.nrows() != n { covariance.nrows() } else { covariance.ncols() },
        });
    }
    if !(lambda.is_finite() && lambda > 0.0) {
        return Err(BlmError::InvalidParameter {
            name: "lambda",
            reason: format!("risk aversion must be positive, got {lambda}"),
        });
    }
    math::ensure_finite("covariance", covariance.as_slice())?;
    math::ensure_finite("returns", returns.as_slice())?;
    Ok(QuadraticObjective {
        quadratic: covariance * -lambda,
        linear: returns.clone(),
    })
}
