use nalgebra::{Cholesky, DMatrix, DVector};

use crate::error::{BlmError, MatrixKind, Result};

// ────────────────────────────────────────────────────────────────
// symmetrize
// S = (M + Mᵗ) / 2
// ────────────────────────────────────────────────────────────────
pub fn symmetrize(mat: &DMatrix<f64>) -> DMatrix<f64> {
    (mat + mat.transpose()) * 0.5
}

// ────────────────────────────────────────────────────────────────
// quadratic_form
// vᵗ · M · v
// ────────────────────────────────────────────────────────────────
pub fn quadratic_form(mat: &DMatrix<f64>, v: &DVector<f64>) -> f64 {
    v.dot(&(mat * v))
}

// ────────────────────────────────────────────────────────────────
// reciprocal_condition
// σ_min / σ_max, 0 for a zero (or empty) matrix
// ────────────────────────────────────────────────────────────────
pub fn reciprocal_condition(mat: &DMatrix<f64>) -> f64 {
    if mat.is_empty() || !is_finite(mat.as_slice()) {
        return 0.0;
    }
    let sv = mat.singular_values();
    let max = sv.iter().copied().fold(0.0_f64, f64::max);
    let min = sv.iter().copied().fold(f64::INFINITY, f64::min);
    if max <= 0.0 || !max.is_finite() {
        0.0
    } else {
        min / max
    }
}

// ────────────────────────────────────────────────────────────────
// checked_inverse
// M⁻¹, refusing singular or near-singular input
// ────────────────────────────────────────────────────────────────
pub fn checked_inverse(
    mat: &DMatrix<f64>,
    kind: MatrixKind,
    tolerance: f64,
) -> Result<DMatrix<f64>> {
    let rcond = reciprocal_condition(mat);
    if !(rcond >= tolerance) {
        return Err(BlmError::SingularMatrix { matrix: kind, rcond });
    }
    mat.clone()
        .try_inverse()
        .filter(|inv| inv.iter().all(|x| x.is_finite()))
        .ok_or(BlmError::SingularMatrix { matrix: kind, rcond })
}

// ────────────────────────────────────────────────────────────────
// is_finite / ensure_finite
// ────────────────────────────────────────────────────────────────
pub fn is_finite(values: &[f64]) -> bool {
    values.iter().all(|x| x.is_finite())
}

pub fn ensure_finite(name: &'static str, values: &[f64]) -> Result<()> {
    match values.iter().position(|x| !x.is_finite()) {
        None => Ok(()),
        Some(i) => Err(BlmError::InvalidParameter {
            name,
            reason: format!("entry {i} is {}", values[i]),
        }),
    }
}

// ────────────────────────────────────────────────────────────────
// is_symmetric
// max |M - Mᵗ| ≤ tol
// ────────────────────────────────────────────────────────────────
pub fn is_symmetric(mat: &DMatrix<f64>, tol: f64) -> bool {
    mat.is_square() && is_finite(mat.as_slice()) && (mat - mat.transpose()).amax() <= tol
}

// ────────────────────────────────────────────────────────────────
// is_positive_definite
// M = Mᵗ and LLᵗ = M exists  ⇔  M is (strictly) positive-definite
// Cholesky only reads the lower triangle, so symmetry is checked first.
// ────────────────────────────────────────────────────────────────
pub const SYMMETRY_TOLERANCE: f64 = 1e-12;

pub fn is_positive_definite(mat: &DMatrix<f64>) -> bool {
    !mat.is_empty()
        && is_symmetric(mat, SYMMETRY_TOLERANCE)
        && Cholesky::new(mat.clone()).is_some()
}

// ────────────────────────────────────────────────────────────────
// min_eigenvalue
// smallest eigenvalue of the symmetric part of M, NaN for non-finite M
// ────────────────────────────────────────────────────────────────
pub fn min_eigenvalue(mat: &DMatrix<f64>) -> f64 {
    if !is_finite(mat.as_slice()) {
        return f64::NAN;
    }
    symmetrize(mat)
        .symmetric_eigenvalues()
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min)
}

// ────────────────────────────────────────────────────────────────
// is_positive_semidefinite
// finite, symmetric within tol and λ_min ≥ -tol
// ────────────────────────────────────────────────────────────────
pub fn is_positive_semidefinite(mat: &DMatrix<f64>, tol: f64) -> bool {
    !mat.is_empty() && is_symmetric(mat, tol) && min_eigenvalue(mat) >= -tol
}

// ────────────────────────────────────────────────────────────────
// sample_variance
// Σ(x - x̄)² / (n - 1)
// ────────────────────────────────────────────────────────────────
pub fn sample_variance<'a, I>(values: I) -> f64
where
    I: IntoIterator<Item = &'a f64>,
{
    let xs: Vec<f64> = values.into_iter().copied().collect();
    if xs.len() < 2 {
        return 0.0;
    }
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)
}
