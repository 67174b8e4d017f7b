//! Linear constraint system for the allocation problem.
//!
//! Rows are read as `A_i·w ≥ b_i`, except the leading `equalities` rows which
//! are `A_i·w = b_i`. Layout:
//!
//! ```text
//! long-only   [ 1ᵗ ; I ]          b = [1, 0…0]                   n+1 rows
//! per-asset   [ 1ᵗ ; I ; -I ]     b = [1, lo_1…lo_n, -up_1…-up_n]  2n+1 rows
//! ```

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{BlmError, Result};

/// Per-asset weight limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Bounds {
    /// `0 ≤ w_i`, no cap beyond full investment.
    #[default]
    LongOnly,
    /// `(lower_i, upper_i)` for every asset.
    PerAsset(Vec<(f64, f64)>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSystem {
    pub matrix: DMatrix<f64>,
    pub values: DVector<f64>,
    /// Number of leading equality rows.
    pub equalities: usize,
}

impl ConstraintSystem {
    pub fn rows(&self) -> usize {
        self.matrix.nrows()
    }

    /// Shape check run before every solve.
    pub fn validate(&self, num_assets: usize) -> Result<()> {
        if self.values.len() != self.matrix.nrows() {
            return Err(BlmError::DimensionMismatch {
                what: "constraint values",
                expected: self.matrix.nrows(),
                actual: self.values.len(),
            });
        }
        if self.matrix.ncols() != num_assets {
            return Err(BlmError::DimensionMismatch {
                what: "constraint columns",
                expected: num_assets,
                actual: self.matrix.ncols(),
            });
        }
        if self.equalities > self.matrix.nrows() {
            return Err(BlmError::DimensionMismatch {
                what: "equality rows",
                expected: self.matrix.nrows(),
                actual: self.equalities,
            });
        }
        Ok(())
    }
}

pub fn build_constraints(num_assets: usize, bounds: &Bounds) -> Result<ConstraintSystem> {
    let n = num_assets;
    let budget = DMatrix::from_element(1, n, 1.0);
    let identity = DMatrix::<f64>::identity(n, n);

    let system = match bounds {
        Bounds::LongOnly => {
            let mut matrix = DMatrix::zeros(n + 1, n);
            matrix.rows_mut(0, 1).copy_from(&budget);
            matrix.rows_mut(1, n).copy_from(&identity);

            let mut values = DVector::zeros(n + 1);
            values[0] = 1.0;
            ConstraintSystem {
                matrix,
                values,
                equalities: 1,
            }
        }
        Bounds::PerAsset(pairs) => {
            if pairs.len() != n {
                return Err(BlmError::DimensionMismatch {
                    what: "bounds",
                    expected: n,
                    actual: pairs.len(),
                });
            }
            if let Some((i, _)) = pairs
                .iter()
                .enumerate()
                .find(|(_, (lo, up))| !lo.is_finite() || !up.is_finite())
            {
                return Err(BlmError::InvalidParameter {
                    name: "bounds",
                    reason: format!("bound pair for asset {i} is not finite"),
                });
            }

            let mut matrix = DMatrix::zeros(2 * n + 1, n);
            matrix.rows_mut(0, 1).copy_from(&budget);
            matrix.rows_mut(1, n).copy_from(&identity);
            matrix.rows_mut(n + 1, n).copy_from(&(-identity));

            let mut values = DVector::zeros(2 * n + 1);
            values[0] = 1.0;
            for (i, &(lo, up)) in pairs.iter().enumerate() {
                values[1 + i] = lo;
                values[1 + n + i] = -up;
            }
            ConstraintSystem {
                matrix,
                values,
                equalities: 1,
            }
        }
    };

    system.validate(n)?;
    Ok(system)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_only_has_n_plus_one_rows() {
        for n in 1..6 {
            let c = build_constraints(n, &Bounds::LongOnly).unwrap();
            assert_eq!(c.rows(), n + 1);
            assert_eq!(c.values.len(), n + 1);
            assert_eq!(c.equalities, 1);
        }
    }

    #[test]
    fn test_long_only_layout() {
        let c = build_constraints(3, &Bounds::LongOnly).unwrap();
        assert_eq!(c.matrix.row(0).iter().copied().collect::<Vec<_>>(), vec![1.0, 1.0, 1.0]);
        assert_eq!(c.matrix.row(2).iter().copied().collect::<Vec<_>>(), vec![0.0, 1.0, 0.0]);
        assert_eq!(c.values.iter().copied().collect::<Vec<_>>(), vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_per_asset_has_two_n_plus_one_rows() {
        let bounds = Bounds::PerAsset(vec![(0.1, 0.5), (0.0, 0.7), (0.2, 0.4)]);
        let c = build_constraints(3, &bounds).unwrap();
        assert_eq!(c.rows(), 7);
        assert_eq!(
            c.values.iter().copied().collect::<Vec<_>>(),
            vec![1.0, 0.1, 0.0, 0.2, -0.5, -0.7, -0.4]
        );
        assert_eq!(c.matrix.row(1).iter().copied().collect::<Vec<_>>(), vec![1.0, 0.0, 0.0]);
        assert_eq!(c.matrix.row(5).iter().copied().collect::<Vec<_>>(), vec![0.0, -1.0, 0.0]);
    }

    #[test]
    fn test_bounds_length_mismatch() {
        let bounds = Bounds::PerAsset(vec![(0.0, 1.0)]);
        assert!(matches!(
            build_constraints(2, &bounds),
            Err(BlmError::DimensionMismatch { what: "bounds", expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_non_finite_bounds_rejected() {
        let bounds = Bounds::PerAsset(vec![(0.0, f64::INFINITY), (0.0, 1.0)]);
        assert!(matches!(
            build_constraints(2, &bounds),
            Err(BlmError::InvalidParameter { name: "bounds", .. })
        ));
    }

    #[test]
    fn test_contradictory_bounds_are_not_rejected_here() {
        let bounds = Bounds::PerAsset(vec![(0.6, 0.6), (0.6, 0.6)]);
        assert!(build_constraints(2, &bounds).is_ok());
    }

    #[test]
    fn test_validate_catches_row_value_mismatch() {
        let mut c = build_constraints(2, &Bounds::LongOnly).unwrap();
        c.values = DVector::zeros(2);
        assert!(matches!(
            c.validate(2),
            Err(BlmError::DimensionMismatch { what: "constraint values", .. })
        ));
    }
}
