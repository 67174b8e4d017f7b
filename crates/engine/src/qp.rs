//! Quadratic programming service.
//!
//! The optimizer only talks to [`QuadraticSolver`]; [`GoldfarbIdnani`] is the
//! bundled dense implementation of the Goldfarb-Idnani (1983) dual active-set
//! method. It is exact for the small, strictly convex programs produced by
//! the allocation step and reports infeasibility instead of failing.

use nalgebra::{Cholesky, DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SolverConfig;
use crate::constraints::ConstraintSystem;
use crate::math;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sense {
    Minimize,
    Maximize,
}

/// `f(x) = ½·xᵗ·Q·x + dᵗ·x`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuadraticObjective {
    pub quadratic: DMatrix<f64>,
    pub linear: DVector<f64>,
}

impl QuadraticObjective {
    pub fn value(&self, x: &DVector<f64>) -> f64 {
        0.5 * math::quadratic_form(&self.quadratic, x) + self.linear.dot(x)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QuadraticProgram<'a> {
    pub objective: &'a QuadraticObjective,
    pub constraints: &'a ConstraintSystem,
    pub sense: Sense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QpStatus {
    Optimal,
    /// No point satisfies every constraint.
    Infeasible,
    /// The quadratic term is not definite in the direction of `sense`.
    NotConvex,
    /// Active normals became linearly dependent beyond recovery, or the
    /// iterate stopped being finite.
    Degenerate,
    /// Objective and constraint shapes disagree, or the data holds NaN/∞.
    Malformed,
    MaxIterations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QpSolution {
    pub status: QpStatus,
    /// Last iterate; only meaningful when `status` is `Optimal`.
    pub x: DVector<f64>,
    /// Objective value at `x`, in the caller's sense.
    pub value: f64,
    pub iterations: usize,
}

impl QpSolution {
    pub fn is_optimal(&self) -> bool {
        self.status == QpStatus::Optimal
    }
}

pub trait QuadraticSolver {
    fn solve(&self, program: &QuadraticProgram<'_>) -> QpSolution;
}

#[derive(Debug, Clone)]
pub struct GoldfarbIdnani {
    max_iterations: usize,
    tolerance: f64,
}

impl Default for GoldfarbIdnani {
    fn default() -> Self {
        Self::new(&SolverConfig::default())
    }
}

/// A constraint in the working set, with its sign already folded in.
struct Active {
    row: usize,
    normal: DVector<f64>,
    equality: bool,
}

enum Step {
    Added,
    Redundant,
    Stopped(QpStatus),
}

impl GoldfarbIdnani {
    pub fn new(config: &SolverConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
        }
    }

    /// `z = H·n_p` (primal direction) and `r = N*·n_p` (dual direction).
    fn directions(
        &self,
        g_inv: &DMatrix<f64>,
        active: &[Active],
        np: &DVector<f64>,
    ) -> Option<(DVector<f64>, DVector<f64>)> {
        if active.is_empty() {
            return Some((g_inv * np, DVector::zeros(0)));
        }
        let normals: Vec<DVector<f64>> = active.iter().map(|c| c.normal.clone()).collect();
        let n_mat = DMatrix::from_columns(&normals);
        let g_inv_n = g_inv * &n_mat;
        let m_inv = (n_mat.transpose() * &g_inv_n).try_inverse()?;
        let r = m_inv * (g_inv_n.transpose() * np);
        let z = g_inv * np - &g_inv_n * &r;
        Some((z, r))
    }

    /// Drives constraint `(np, bp)` into the working set, dropping blocking
    /// inequalities along the way.
    #[allow(clippy::too_many_arguments)]
    fn add_constraint(
        &self,
        g_inv: &DMatrix<f64>,
        x: &mut DVector<f64>,
        active: &mut Vec<Active>,
        u: &mut Vec<f64>,
        row: usize,
        np: DVector<f64>,
        bp: f64,
        equality: bool,
        iterations: &mut usize,
    ) -> Step {
        let scale = g_inv.amax().max(1.0);
        let mut u_p = 0.0;
        loop {
            *iterations += 1;
            if *iterations > self.max_iterations {
                return Step::Stopped(QpStatus::MaxIterations);
            }
            let Some((z, r)) = self.directions(g_inv, active, &np) else {
                return Step::Stopped(QpStatus::Degenerate);
            };

            let mut t1 = f64::INFINITY;
            let mut blocking = None;
            for (j, c) in active.iter().enumerate() {
                if !c.equality && r[j] > self.tolerance {
                    let ratio = u[j] / r[j];
                    if ratio < t1 {
                        t1 = ratio;
                        blocking = Some(j);
                    }
                }
            }

            let s_p = np.dot(&*x) - bp;
            let z_zero = z.amax() <= self.tolerance * scale;
            if z_zero && blocking.is_none() {
                if equality && s_p.abs() <= self.tolerance {
                    return Step::Redundant;
                }
                return Step::Stopped(QpStatus::Infeasible);
            }
            let t2 = if z_zero {
                f64::INFINITY
            } else {
                -s_p / z.dot(&np)
            };
            let t = t1.min(t2);

            for (uj, rj) in u.iter_mut().zip(r.iter()) {
                *uj -= t * rj;
            }
            u_p += t;
            if !z_zero {
                *x += &z * t;
            }

            match blocking {
                Some(j) if t1 < t2 => {
                    active.remove(j);
                    u.remove(j);
                }
                _ => {
                    active.push(Active {
                        row,
                        normal: np,
                        equality,
                    });
                    u.push(u_p);
                    return Step::Added;
                }
            }
        }
    }
}

impl QuadraticSolver for GoldfarbIdnani {
    fn solve(&self, program: &QuadraticProgram<'_>) -> QpSolution {
        let objective = program.objective;
        let a = &program.constraints.matrix;
        let b = &program.constraints.values;
        let meq = program.constraints.equalities;

        let n = objective.linear.len();
        if objective.quadratic.shape() != (n, n)
            || a.ncols() != n
            || b.len() != a.nrows()
            || meq > a.nrows()
            || ![
                objective.quadratic.as_slice(),
                objective.linear.as_slice(),
                a.as_slice(),
                b.as_slice(),
            ]
            .iter()
            .all(|data| math::is_finite(data))
        {
            return QpSolution {
                status: QpStatus::Malformed,
                x: DVector::zeros(n),
                value: f64::NAN,
                iterations: 0,
            };
        }

        // Work in the minimization form ½xᵗGx + cᵗx.
        let (g, c) = match program.sense {
            Sense::Minimize => (math::symmetrize(&objective.quadratic), objective.linear.clone()),
            Sense::Maximize => (-math::symmetrize(&objective.quadratic), -&objective.linear),
        };

        let finish = |status: QpStatus, x: DVector<f64>, iterations: usize| {
            let value = objective.value(&x);
            let status = match status {
                QpStatus::Optimal if !(value.is_finite() && math::is_finite(x.as_slice())) => {
                    QpStatus::Degenerate
                }
                other => other,
            };
            debug!(?status, iterations, value, "quadratic program finished");
            QpSolution {
                status,
                x,
                value,
                iterations,
            }
        };

        let Some(chol) = Cholesky::new(g) else {
            return finish(QpStatus::NotConvex, DVector::zeros(n), 0);
        };
        let g_inv = chol.inverse();

        // Unconstrained optimum.
        let mut x = -(&g_inv * &c);
        let mut active: Vec<Active> = Vec::with_capacity(a.nrows());
        let mut u: Vec<f64> = Vec::with_capacity(a.nrows());
        let mut iterations = 0;

        for i in 0..meq {
            let row = a.row(i).transpose();
            let s = row.dot(&x) - b[i];
            // Orient the row so the current point sits on the violated side.
            let sign = if s > 0.0 { -1.0 } else { 1.0 };
            let step = self.add_constraint(
                &g_inv,
                &mut x,
                &mut active,
                &mut u,
                i,
                row * sign,
                b[i] * sign,
                true,
                &mut iterations,
            );
            if let Step::Stopped(status) = step {
                return finish(status, x, iterations);
            }
        }

        loop {
            // Most violated inequality outside the working set.
            let mut worst: Option<(usize, f64)> = None;
            for i in meq..a.nrows() {
                if active.iter().any(|c| c.row == i) {
                    continue;
                }
                let s = a.row(i).transpose().dot(&x) - b[i];
                if s < -self.tolerance && worst.map_or(true, |(_, w)| s < w) {
                    worst = Some((i, s));
                }
            }
            let Some((p, _)) = worst else {
                return finish(QpStatus::Optimal, x, iterations);
            };

            let step = self.add_constraint(
                &g_inv,
                &mut x,
                &mut active,
                &mut u,
                p,
                a.row(p).transpose(),
                b[p],
                false,
                &mut iterations,
            );
            if let Step::Stopped(status) = step {
                return finish(status, x, iterations);
            }
        }
    }
}
