//! Black-Litterman allocation engine.
//!
//! ```text
//! raw Σ ─► regularize (if not PSD) ─► blend: π, λ ─► blend: μ ─┐
//!                                                              ├─► optimizer ─► weights
//!                          constraints (bounds) ───────────────┘
//! ```
//!
//! ```rust,ignore
//! use blm_engine::{
//!     BlackLitterman, Bounds, EngineConfig, PortfolioOptimizer, RiskPremium, Uncertainty, Views,
//! };
//!
//! let config = EngineConfig::default();
//! let views = Views::none(2).absolute(0, 0.08)?;
//! let premium = RiskPremium::Direct(0.05);
//! let model = BlackLitterman::new(cov, w_mkt, views, premium, Uncertainty::Derived, &config)?;
//! let alloc = PortfolioOptimizer::new(&config.solver).optimize(&model, &Bounds::LongOnly)?;
//! if let Some(w) = alloc.result.weights() { /* … */ }
//! ```

pub mod blend;
pub mod config;
pub mod constraints;
pub mod engine;
pub mod error;
pub mod math;
pub mod optimizer;
pub mod qp;
pub mod regularize;

pub use blend::{BlackLitterman, ImpliedReturn, RiskPremium, Uncertainty, Views};
pub use config::{EngineConfig, SolverConfig};
pub use constraints::{build_constraints, Bounds, ConstraintSystem};
pub use error::{BlmError, MatrixKind, Result};
pub use optimizer::{Allocation, OptimizationResult, PortfolioOptimizer};
pub use qp::{GoldfarbIdnani, QpSolution, QpStatus, QuadraticSolver};
pub use regularize::{Definiteness, Repair};
