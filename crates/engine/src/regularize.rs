//! Covariance repair.
//!
//! When assets outnumber observations the sample covariance routinely comes out
//! indefinite. [`diagnose`] reports the damage and the caller picks one of the
//! [`Repair`] strategies; nothing here selects a strategy on its own, and every
//! function returns a new matrix.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{BlmError, Result};
use crate::math;

/// Outcome of the definiteness diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Definiteness {
    pub positive_definite: bool,
    pub min_eigenvalue: f64,
}

pub fn diagnose(matrix: &DMatrix<f64>) -> Result<Definiteness> {
    check_matrix(matrix)?;
    Ok(Definiteness {
        positive_definite: math::is_positive_definite(matrix),
        min_eigenvalue: math::min_eigenvalue(matrix),
    })
}

pub fn is_positive_definite(matrix: &DMatrix<f64>) -> bool {
    math::is_positive_definite(matrix)
}

/// Rejects a covariance matrix that fails the PSD test.
pub fn ensure_positive_semidefinite(matrix: &DMatrix<f64>, tol: f64) -> Result<()> {
    check_matrix(matrix)?;
    if math::is_positive_semidefinite(matrix, tol) {
        return Ok(());
    }
    let min_eigenvalue = math::min_eigenvalue(matrix);
    warn!(min_eigenvalue, "covariance matrix failed the PSD check");
    Err(BlmError::NotPositiveSemidefinite { min_eigenvalue })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Repair {
    /// Higham (1988) projection onto the nearest symmetric PSD matrix.
    NearestSymmetricPsd,
    /// Keep only per-asset variances.
    DiagonalApproximation,
    /// Shift every eigenvalue up by `shift`.
    DiagonalInflation { shift: f64 },
}

pub fn repair(matrix: &DMatrix<f64>, strategy: Repair) -> Result<DMatrix<f64>> {
    match strategy {
        Repair::NearestSymmetricPsd => nearest_symmetric_psd(matrix),
        Repair::DiagonalApproximation => diagonal_approximation(matrix),
        Repair::DiagonalInflation { shift } => diagonal_inflation(matrix, shift),
    }
}

// ────────────────────────────────────────────────────────────────
// nearest_symmetric_psd
// M = U·S·Vᵗ,  H = V·S·Vᵗ,  result = (M + Mᵗ + H + Hᵗ) / 4
// ────────────────────────────────────────────────────────────────
pub fn nearest_symmetric_psd(matrix: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    check_matrix(matrix)?;
    let svd = matrix.clone().svd(false, true);
    let v_t = svd.v_t.ok_or_else(|| BlmError::InvalidParameter {
        name: "matrix",
        reason: "singular value decomposition produced no right singular vectors".into(),
    })?;
    let h = v_t.transpose() * DMatrix::from_diagonal(&svd.singular_values) * &v_t;
    Ok((matrix + matrix.transpose() + &h + h.transpose()) * 0.25)
}

// ────────────────────────────────────────────────────────────────
// diagonal_approximation
// D_ii = sample variance of row i, all cross terms dropped
// ────────────────────────────────────────────────────────────────
pub fn diagonal_approximation(matrix: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    check_matrix(matrix)?;
    let variances = DVector::from_iterator(
        matrix.nrows(),
        matrix.row_iter().map(|row| math::sample_variance(row.iter())),
    );
    Ok(DMatrix::from_diagonal(&variances))
}

// ────────────────────────────────────────────────────────────────
// diagonal_inflation
// M + shift·I
// ────────────────────────────────────────────────────────────────
pub fn diagonal_inflation(matrix: &DMatrix<f64>, shift: f64) -> Result<DMatrix<f64>> {
    check_matrix(matrix)?;
    if !(shift.is_finite() && shift > 0.0) {
        return Err(BlmError::InvalidParameter {
            name: "shift",
            reason: format!("must be a positive finite number, got {shift}"),
        });
    }
    let n = matrix.nrows();
    Ok(matrix + DMatrix::<f64>::identity(n, n) * shift)
}

/// Non-empty, square and free of NaN/∞.
fn check_matrix(matrix: &DMatrix<f64>) -> Result<()> {
    if matrix.is_empty() {
        return Err(BlmError::InvalidParameter {
            name: "matrix",
            reason: "must have at least one row".into(),
        });
    }
    if !matrix.is_square() {
        return Err(BlmError::DimensionMismatch {
            what: "covariance columns",
            expected: matrix.nrows(),
            actual: matrix.ncols(),
        });
    }
    math::ensure_finite("matrix", matrix.as_slice())
}
