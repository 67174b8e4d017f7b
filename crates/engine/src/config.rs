//! Engine configuration.
//!
//! Every field has a default, so an empty TOML document (or `EngineConfig::default()`)
//! yields the standard Black-Litterman setup with tau = 0.025.

use serde::{Deserialize, Serialize};

use crate::error::{BlmError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scale of the prior's uncertainty relative to the covariance.
    pub tau: f64,
    /// Smallest reciprocal condition number accepted before inverting.
    pub singular_tolerance: f64,
    /// Eigenvalue slack allowed by the positive-semidefinite check.
    pub psd_tolerance: f64,
    /// Constant added to the diagonal by the inflation repair.
    pub inflation_shift: f64,
    pub solver: SolverConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tau: 0.025,
            singular_tolerance: 1e-12,
            psd_tolerance: 1e-10,
            inflation_shift: 1e-4,
            solver: SolverConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        positive("tau", self.tau)?;
        positive("singular_tolerance", self.singular_tolerance)?;
        positive("psd_tolerance", self.psd_tolerance)?;
        positive("inflation_shift", self.inflation_shift)?;
        self.solver.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Upper bound on active-set changes per solve.
    pub max_iterations: usize,
    /// Feasibility and degeneracy tolerance.
    pub tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-10,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(BlmError::InvalidParameter {
                name: "solver.max_iterations",
                reason: "must be at least 1".into(),
            });
        }
        positive("solver.tolerance", self.tolerance)
    }
}

fn positive(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(BlmError::InvalidParameter {
            name,
            reason: format!("must be a positive finite number, got {value}"),
        })
    }
}
