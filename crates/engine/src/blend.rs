//! # Black-Litterman return blending
//!
//! Reverse-optimizes the market portfolio into an implied ("prior") return
//! vector, then blends it with investor views:
//!
//! ```text
//! λ  = premium / (wᵗ·Σ·w)                      π = λ·Σ·w
//! M1 = (τΣ)⁻¹ + Pᵗ·Ω⁻¹·P                       M2 = (τΣ)⁻¹·π + Pᵗ·Ω⁻¹·Q
//! μ  = M1⁻¹ · M2
//! ```
//!
//! Every intermediate is returned to the caller rather than cached, so the
//! pipeline reads `implied_return → posterior_return → optimizer`.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{BlmError, MatrixKind, Result};
use crate::math;
use crate::regularize;

/// Market excess return over the risk-free rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RiskPremium {
    Direct(f64),
    Derived { market_return: f64, risk_free_rate: f64 },
}

impl RiskPremium {
    pub fn value(&self) -> f64 {
        match *self {
            RiskPremium::Direct(premium) => premium,
            RiskPremium::Derived {
                market_return,
                risk_free_rate,
            } => market_return - risk_free_rate,
        }
    }
}

/// Source of the view uncertainty matrix Ω.
#[derive(Debug, Clone, PartialEq)]
pub enum Uncertainty {
    /// `Ω_ii = τ·p_i·Σ·p_iᵗ` (He & Litterman, 1999).
    Derived,
    /// Used as given. A full (non-diagonal) Ω is accepted and expresses
    /// correlated view errors.
    Supplied(DMatrix<f64>),
}

/// View portfolios `P` (k×n) and their expected returns `Q` (k).
#[derive(Debug, Clone, PartialEq)]
pub struct Views {
    p: DMatrix<f64>,
    q: DVector<f64>,
}

impl Views {
    pub fn new(p: DMatrix<f64>, q: DVector<f64>) -> Result<Self> {
        if q.len() != p.nrows() {
            return Err(BlmError::DimensionMismatch {
                what: "view returns (Q)",
                expected: p.nrows(),
                actual: q.len(),
            });
        }
        math::ensure_finite("view matrix (P)", p.as_slice())?;
        math::ensure_finite("view returns (Q)", q.as_slice())?;
        Ok(Self { p, q })
    }

    /// No views: the posterior collapses to the prior.
    pub fn none(num_assets: usize) -> Self {
        Self {
            p: DMatrix::zeros(0, num_assets),
            q: DVector::zeros(0),
        }
    }

    /// Appends "asset returns `expected`".
    pub fn absolute(self, asset: usize, expected: f64) -> Result<Self> {
        let mut row = vec![0.0; self.p.ncols()];
        *row.get_mut(asset).ok_or_else(|| out_of_range(asset, self.p.ncols()))? = 1.0;
        self.push(&row, expected)
    }

    /// Appends "`outperformer` beats `underperformer` by `spread`".
    pub fn relative(self, outperformer: usize, underperformer: usize, spread: f64) -> Result<Self> {
        let n = self.p.ncols();
        if outperformer == underperformer {
            return Err(BlmError::InvalidParameter {
                name: "underperformer",
                reason: "a relative view needs two distinct assets".into(),
            });
        }
        let mut row = vec![0.0; n];
        *row.get_mut(outperformer).ok_or_else(|| out_of_range(outperformer, n))? = 1.0;
        *row.get_mut(underperformer).ok_or_else(|| out_of_range(underperformer, n))? = -1.0;
        self.push(&row, spread)
    }

    fn push(self, row: &[f64], expected: f64) -> Result<Self> {
        let k = self.p.nrows();
        let mut p = self.p.insert_row(k, 0.0);
        p.row_mut(k).copy_from_slice(row);
        let q = self.q.push(expected);
        Views::new(p, q)
    }

    pub fn p(&self) -> &DMatrix<f64> {
        &self.p
    }

    pub fn q(&self) -> &DVector<f64> {
        &self.q
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }
}

fn out_of_range(asset: usize, n: usize) -> BlmError {
    BlmError::InvalidParameter {
        name: "asset",
        reason: format!("index {asset} out of range for {n} assets"),
    }
}

/// Market-implied returns together with the risk aversion that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpliedReturn {
    pub lambda: f64,
    pub prior: DVector<f64>,
}

// ────────────────────────────────────────────────────────────────
// implied_return
// λ = premium / (wᵗΣw),  π = λ·Σ·w
// ────────────────────────────────────────────────────────────────
pub fn implied_return(
    covariance: &DMatrix<f64>,
    market_weights: &DVector<f64>,
    risk_premium: f64,
) -> Result<ImpliedReturn> {
    let variance = math::quadratic_form(covariance, market_weights);
    if !(variance.is_finite() && variance > 0.0) {
        return Err(BlmError::DegenerateMarketPortfolio(variance));
    }
    let lambda = risk_premium / variance;
    let prior = covariance * market_weights * lambda;
    debug!(lambda, market_variance = variance, "implied equilibrium returns");
    Ok(ImpliedReturn { lambda, prior })
}

// ────────────────────────────────────────────────────────────────
// derive_omega
// Ω = diag(τ · p_i·Σ·p_iᵗ)
// ────────────────────────────────────────────────────────────────
pub fn derive_omega(p: &DMatrix<f64>, covariance: &DMatrix<f64>, tau: f64) -> DMatrix<f64> {
    let diag = DVector::from_iterator(
        p.nrows(),
        p.row_iter().map(|row| {
            let p_i = row.transpose();
            tau * math::quadratic_form(covariance, &p_i)
        }),
    );
    DMatrix::from_diagonal(&diag)
}

// ────────────────────────────────────────────────────────────────
// posterior_return
// μ = [(τΣ)⁻¹ + PᵗΩ⁻¹P]⁻¹ · [(τΣ)⁻¹π + PᵗΩ⁻¹Q]
// ────────────────────────────────────────────────────────────────
pub fn posterior_return(
    covariance: &DMatrix<f64>,
    prior: &DVector<f64>,
    views: &Views,
    omega: &DMatrix<f64>,
    tau: f64,
    singular_tolerance: f64,
) -> Result<DVector<f64>> {
    if views.is_empty() {
        return Ok(prior.clone());
    }
    let tol = singular_tolerance;
    let prior_precision = checked_inverse(covariance * tau, MatrixKind::Covariance, tol)?;
    let omega_inv = checked_inverse(omega.clone(), MatrixKind::Uncertainty, tol)?;

    let p_t_omega_inv = views.p().transpose() * &omega_inv;
    let m1 = &prior_precision + &p_t_omega_inv * views.p();
    let m2 = &prior_precision * prior + &p_t_omega_inv * views.q();

    let m1_inv = checked_inverse(m1, MatrixKind::CombinedInformation, tol)?;
    Ok(m1_inv * m2)
}

fn checked_inverse(m: DMatrix<f64>, kind: MatrixKind, tol: f64) -> Result<DMatrix<f64>> {
    math::checked_inverse(&m, kind, tol)
}

/// Validated inputs for one Black-Litterman run.
///
/// Construction performs every dimension check up front and resolves Ω, so the
/// numerical methods only fail on conditioning.
#[derive(Debug, Clone)]
pub struct BlackLitterman {
    covariance: DMatrix<f64>,
    market_weights: DVector<f64>,
    views: Views,
    omega: DMatrix<f64>,
    risk_premium: f64,
    tau: f64,
    singular_tolerance: f64,
}

impl BlackLitterman {
    pub fn new(
        covariance: DMatrix<f64>,
        market_weights: DVector<f64>,
        views: Views,
        risk_premium: RiskPremium,
        uncertainty: Uncertainty,
        config: &EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let n = market_weights.len();
        if n == 0 {
            return Err(BlmError::InvalidParameter {
                name: "market_weights",
                reason: "at least one asset is required".into(),
            });
        }
        if covariance.nrows() != n {
            return Err(BlmError::DimensionMismatch {
                what: "covariance rows",
                expected: n,
                actual: covariance.nrows(),
            });
        }
        if covariance.ncols() != n {
            return Err(BlmError::DimensionMismatch {
                what: "covariance columns",
                expected: n,
                actual: covariance.ncols(),
            });
        }
        if views.p().ncols() != n {
            return Err(BlmError::DimensionMismatch {
                what: "view matrix (P) columns",
                expected: n,
                actual: views.p().ncols(),
            });
        }
        math::ensure_finite("covariance", covariance.as_slice())?;
        math::ensure_finite("market_weights", market_weights.as_slice())?;

        let k = views.len();
        let omega = match uncertainty {
            Uncertainty::Derived => derive_omega(views.p(), &covariance, config.tau),
            Uncertainty::Supplied(omega) => {
                if omega.nrows() != k || omega.ncols() != k {
                    return Err(BlmError::DimensionMismatch {
                        what: "uncertainty matrix (Omega)",
                        expected: k,
                        actual: if omega.nrows() != k { omega.nrows() } else { omega.ncols() },
                    });
                }
                math::ensure_finite("uncertainty matrix (Omega)", omega.as_slice())?;
                if omega.iter().enumerate().any(|(i, x)| i % (k + 1) != 0 && *x != 0.0) {
                    debug!(views = k, "supplied uncertainty matrix has off-diagonal terms");
                }
                omega
            }
        };

        let premium = risk_premium.value();
        if !premium.is_finite() {
            return Err(BlmError::InvalidParameter {
                name: "risk_premium",
                reason: format!("must be finite, got {premium}"),
            });
        }

        regularize::ensure_positive_semidefinite(&covariance, config.psd_tolerance)?;
        debug!(assets = n, views = k, tau = config.tau, "black-litterman inputs validated");

        Ok(Self {
            covariance,
            market_weights,
            views,
            omega,
            risk_premium: premium,
            tau: config.tau,
            singular_tolerance: config.singular_tolerance,
        })
    }

    pub fn implied_return(&self) -> Result<ImpliedReturn> {
        implied_return(&self.covariance, &self.market_weights, self.risk_premium)
    }

    pub fn posterior_return(&self, implied: &ImpliedReturn) -> Result<DVector<f64>> {
        posterior_return(
            &self.covariance,
            &implied.prior,
            &self.views,
            &self.omega,
            self.tau,
            self.singular_tolerance,
        )
    }

    pub fn num_assets(&self) -> usize {
        self.market_weights.len()
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    pub fn market_weights(&self) -> &DVector<f64> {
        &self.market_weights
    }

    pub fn views(&self) -> &Views {
        &self.views
    }

    pub fn omega(&self) -> &DMatrix<f64> {
        &self.omega
    }

    pub fn risk_premium(&self) -> f64 {
        self.risk_premium
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }
}
