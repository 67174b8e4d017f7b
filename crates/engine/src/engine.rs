use wasm_bindgen::prelude::*;
use js_sys::Float64Array;
use nalgebra::{DMatrix, DVector};

use crate::blend::{BlackLitterman, RiskPremium, Uncertainty, Views};
use crate::config::EngineConfig;
use crate::constraints::Bounds;
use crate::error::{self, BlmError};
use crate::optimizer::PortfolioOptimizer;
use crate::regularize::{self, Repair};

// ════════════════════════════════════════════════════════════════
// AllocationResult: returned to JS as Float64Array views
// ════════════════════════════════════════════════════════════════
#[wasm_bindgen]
pub struct AllocationResult {
    success: bool,
    weights: Vec<f64>,
    objective_value: f64,
    lambda: f64,
    prior: Vec<f64>,
    posterior: Vec<f64>,
    num_assets: usize,
}

#[wasm_bindgen]
impl AllocationResult {
    #[wasm_bindgen(getter)]
    pub fn success(&self) -> bool {
        self.success
    }

    #[wasm_bindgen(getter)]
    pub fn weights(&self) -> Float64Array {
        Float64Array::from(self.weights.as_slice())
    }

    #[wasm_bindgen(getter)]
    pub fn objective_value(&self) -> f64 {
        self.objective_value
    }

    #[wasm_bindgen(getter)]
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    #[wasm_bindgen(getter)]
    pub fn prior(&self) -> Float64Array {
        Float64Array::from(self.prior.as_slice())
    }

    #[wasm_bindgen(getter)]
    pub fn posterior(&self) -> Float64Array {
        Float64Array::from(self.posterior.as_slice())
    }

    #[wasm_bindgen(getter)]
    pub fn num_assets(&self) -> usize {
        self.num_assets
    }
}

// ════════════════════════════════════════════════════════════════
// optimize_portfolio: main entry point called from JS
// Matrices are flattened row-major.
// ════════════════════════════════════════════════════════════════
#[allow(clippy::too_many_arguments)]
#[wasm_bindgen]
pub fn optimize_portfolio(
    num_assets: usize,
    covariance: &[f64],
    market_weights: &[f64],
    num_views: usize,
    view_matrix: &[f64],
    view_returns: &[f64],
    view_uncertainty: &[f64],
    risk_premium: f64,
    lower_bounds: &[f64],
    upper_bounds: &[f64],
) -> Result<AllocationResult, JsValue> {
    let input = AllocationInput {
        num_assets,
        covariance,
        market_weights,
        num_views,
        view_matrix,
        view_returns,
        view_uncertainty,
        risk_premium,
        lower_bounds,
        upper_bounds,
    };
    run_allocation(&input, &EngineConfig::default()).map_err(to_js)
}

// ════════════════════════════════════════════════════════════════
// repair_covariance: "nearest" | "diagonal" | "inflate"
// ════════════════════════════════════════════════════════════════
#[wasm_bindgen]
pub fn repair_covariance(
    num_assets: usize,
    covariance: &[f64],
    strategy: &str,
    shift: f64,
) -> Result<Float64Array, JsValue> {
    let repaired = run_repair(num_assets, covariance, strategy, shift).map_err(to_js)?;
    Ok(Float64Array::from(repaired.as_slice()))
}

#[wasm_bindgen]
pub fn is_positive_definite(num_assets: usize, covariance: &[f64]) -> Result<bool, JsValue> {
    let cov = square(num_assets, covariance, "covariance").map_err(to_js)?;
    Ok(regularize::is_positive_definite(&cov))
}

fn to_js(err: BlmError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

struct AllocationInput<'a> {
    num_assets: usize,
    covariance: &'a [f64],
    market_weights: &'a [f64],
    num_views: usize,
    view_matrix: &'a [f64],
    view_returns: &'a [f64],
    view_uncertainty: &'a [f64],
    risk_premium: f64,
    lower_bounds: &'a [f64],
    upper_bounds: &'a [f64],
}

fn run_allocation(
    input: &AllocationInput<'_>,
    config: &EngineConfig,
) -> error::Result<AllocationResult> {
    let n = input.num_assets;
    let k = input.num_views;

    // ── Validate input lengths ──────────────────────────────────
    let cov = square(n, input.covariance, "covariance")?;
    expect_len("market weights", n, input.market_weights.len())?;
    expect_len("view matrix", k * n, input.view_matrix.len())?;
    expect_len("view returns", k, input.view_returns.len())?;

    let uncertainty = match input.view_uncertainty.len() {
        0 => Uncertainty::Derived,
        len if len == k => Uncertainty::Supplied(DMatrix::from_diagonal(&DVector::from_row_slice(
            input.view_uncertainty,
        ))),
        len => {
            return Err(BlmError::DimensionMismatch {
                what: "view uncertainty",
                expected: k,
                actual: len,
            })
        }
    };

    let bounds = match (input.lower_bounds.len(), input.upper_bounds.len()) {
        (0, 0) => Bounds::LongOnly,
        (lo, up) => {
            expect_len("lower bounds", n, lo)?;
            expect_len("upper bounds", n, up)?;
            Bounds::PerAsset(
                input
                    .lower_bounds
                    .iter()
                    .copied()
                    .zip(input.upper_bounds.iter().copied())
                    .collect(),
            )
        }
    };

    // ── Run the pipeline ────────────────────────────────────────
    let views = Views::new(
        DMatrix::from_row_slice(k, n, input.view_matrix),
        DVector::from_row_slice(input.view_returns),
    )?;
    let model = BlackLitterman::new(
        cov,
        DVector::from_row_slice(input.market_weights),
        views,
        RiskPremium::Direct(input.risk_premium),
        uncertainty,
        config,
    )?;
    let alloc = PortfolioOptimizer::new(&config.solver).optimize(&model, &bounds)?;

    Ok(AllocationResult {
        success: alloc.result.success,
        weights: alloc.result.weights.iter().copied().collect(),
        objective_value: alloc.result.objective_value,
        lambda: alloc.implied.lambda,
        prior: alloc.implied.prior.iter().copied().collect(),
        posterior: alloc.posterior.iter().copied().collect(),
        num_assets: n,
    })
}

fn run_repair(
    num_assets: usize,
    covariance: &[f64],
    strategy: &str,
    shift: f64,
) -> error::Result<Vec<f64>> {
    let cov = square(num_assets, covariance, "covariance")?;
    let strategy = match strategy {
        "nearest" => Repair::NearestSymmetricPsd,
        "diagonal" => Repair::DiagonalApproximation,
        "inflate" => Repair::DiagonalInflation { shift },
        other => {
            return Err(BlmError::InvalidParameter {
                name: "strategy",
                reason: format!("unknown repair strategy {other:?}"),
            })
        }
    };
    let repaired = regularize::repair(&cov, strategy)?;

    // Flatten row-major
    let n = repaired.nrows();
    let mut out = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            out.push(repaired[(i, j)]);
        }
    }
    Ok(out)
}

fn square(n: usize, data: &[f64], what: &'static str) -> error::Result<DMatrix<f64>> {
    expect_len(what, n * n, data.len())?;
    Ok(DMatrix::from_row_slice(n, n, data))
}

fn expect_len(what: &'static str, expected: usize, actual: usize) -> error::Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(BlmError::DimensionMismatch {
            what,
            expected,
            actual,
        })
    }
}
