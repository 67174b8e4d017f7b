use std::fmt;

use thiserror::Error;

/// Which matrix an inversion was attempted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    /// The (tau-scaled) asset covariance matrix.
    Covariance,
    /// The view uncertainty matrix Omega.
    Uncertainty,
    /// `(τΣ)⁻¹ + Pᵗ·Ω⁻¹·P`, inverted to produce the posterior.
    CombinedInformation,
}

impl fmt::Display for MatrixKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixKind::Covariance => write!(f, "covariance"),
            MatrixKind::Uncertainty => write!(f, "uncertainty (omega)"),
            MatrixKind::CombinedInformation => write!(f, "combined information"),
        }
    }
}

/// Engine errors.
///
/// Solver infeasibility is deliberately absent: it is reported through
/// [`OptimizationResult::success`](crate::optimizer::OptimizationResult).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlmError {
    #[error("{matrix} matrix is singular or ill-conditioned (reciprocal condition {rcond:e})")]
    SingularMatrix { matrix: MatrixKind, rcond: f64 },

    #[error("Dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Covariance matrix is not positive semidefinite (smallest eigenvalue {min_eigenvalue:e})")]
    NotPositiveSemidefinite { min_eigenvalue: f64 },

    #[error("Market portfolio variance must be positive, got {0:e}")]
    DegenerateMarketPortfolio(f64),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, BlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singular_message_names_matrix() {
        let err = BlmError::SingularMatrix {
            matrix: MatrixKind::Uncertainty,
            rcond: 0.0,
        };
        assert!(err.to_string().starts_with("uncertainty (omega) matrix"));
    }

    #[test]
    fn test_dimension_message() {
        let err = BlmError::DimensionMismatch {
            what: "view returns",
            expected: 2,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Dimension mismatch for view returns: expected 2, got 3"
        );
    }
}
