use approx::assert_relative_eq;
use blm_engine::regularize::{self, Repair};
use blm_engine::{
    blend, build_constraints, BlackLitterman, BlmError, Bounds, EngineConfig, PortfolioOptimizer,
    RiskPremium, Uncertainty, Views,
};
use nalgebra::{DMatrix, DVector};

fn cov2() -> DMatrix<f64> {
    DMatrix::from_row_slice(2, 2, &[
        0.04, 0.01,
        0.01, 0.09,
    ])
}

fn cov3() -> DMatrix<f64> {
    DMatrix::from_row_slice(3, 3, &[
        0.0400, 0.0060, 0.0020,
        0.0060, 0.0900, 0.0150,
        0.0020, 0.0150, 0.0625,
    ])
}

fn model(views: Views, uncertainty: Uncertainty) -> BlackLitterman {
    BlackLitterman::new(
        cov2(),
        DVector::from_vec(vec![0.6, 0.4]),
        views,
        RiskPremium::Direct(0.05),
        uncertainty,
        &EngineConfig::default(),
    )
    .unwrap()
}

fn optimizer() -> PortfolioOptimizer {
    PortfolioOptimizer::new(&EngineConfig::default().solver)
}

#[test]
fn lambda_positive_for_positive_premium() {
    let cases = [
        (cov2(), DVector::from_vec(vec![0.6, 0.4])),
        (cov2(), DVector::from_vec(vec![0.1, 0.9])),
        (cov3(), DVector::from_vec(vec![0.5, 0.3, 0.2])),
        (cov3(), DVector::from_vec(vec![0.2, 0.2, 0.6])),
    ];
    for (cov, w) in cases.iter() {
        for premium in [0.01, 0.05, 0.12] {
            let implied = blend::implied_return(cov, w, premium).unwrap();
            assert!(implied.lambda > 0.0);
        }
    }
}

#[test]
fn derived_premium_matches_direct() {
    let direct = model(Views::none(2), Uncertainty::Derived);
    let derived = BlackLitterman::new(
        cov2(),
        DVector::from_vec(vec![0.6, 0.4]),
        Views::none(2),
        RiskPremium::Derived {
            market_return: 0.07,
            risk_free_rate: 0.02,
        },
        Uncertainty::Derived,
        &EngineConfig::default(),
    )
    .unwrap();
    assert_relative_eq!(
        direct.implied_return().unwrap().lambda,
        derived.implied_return().unwrap().lambda,
        epsilon = 1e-12
    );
}

#[test]
fn uninformative_views_leave_prior_unchanged() {
    let views = Views::none(2).absolute(0, 0.08).unwrap();
    let bl = model(views, Uncertainty::Supplied(DMatrix::from_element(1, 1, 1e12)));
    let implied = bl.implied_return().unwrap();
    let posterior = bl.posterior_return(&implied).unwrap();
    assert_relative_eq!(posterior, implied.prior, epsilon = 1e-8);
}

#[test]
fn certain_views_are_matched_exactly() {
    let views = Views::none(2).absolute(0, 0.08).unwrap();
    let bl = model(views, Uncertainty::Supplied(DMatrix::from_element(1, 1, 1e-10)));
    let implied = bl.implied_return().unwrap();
    let posterior = bl.posterior_return(&implied).unwrap();
    assert_relative_eq!(posterior[0], 0.08, epsilon = 1e-6);
}

#[test]
fn certain_relative_view_sets_the_spread() {
    let views = Views::none(2).relative(1, 0, 0.02).unwrap();
    let bl = model(views, Uncertainty::Supplied(DMatrix::from_element(1, 1, 1e-10)));
    let implied = bl.implied_return().unwrap();
    let posterior = bl.posterior_return(&implied).unwrap();
    assert_relative_eq!(posterior[1] - posterior[0], 0.02, epsilon = 1e-6);
}

#[test]
fn constraint_row_counts() {
    for n in 1..8 {
        assert_eq!(build_constraints(n, &Bounds::LongOnly).unwrap().rows(), n + 1);
        let bounds = Bounds::PerAsset(vec![(0.0, 1.0); n]);
        assert_eq!(build_constraints(n, &bounds).unwrap().rows(), 2 * n + 1);
    }
}

#[test]
fn nearest_psd_is_idempotent() {
    let cov = cov3();
    let once = regularize::nearest_symmetric_psd(&cov).unwrap();
    assert_relative_eq!(once, cov, epsilon = 1e-12);
    let twice = regularize::nearest_symmetric_psd(&once).unwrap();
    assert_relative_eq!(twice, once, epsilon = 1e-12);
}

#[test]
fn end_to_end_absolute_view() {
    let views = Views::none(2).absolute(0, 0.08).unwrap();
    let bl = model(views, Uncertainty::Derived);
    let alloc = optimizer().optimize(&bl, &Bounds::LongOnly).unwrap();

    assert!(alloc.implied.prior[0] < 0.08);
    assert!(alloc.result.success);
    let w = alloc.result.weights().unwrap();
    assert_relative_eq!(w.sum(), 1.0, epsilon = 1e-6);
    assert!(w[0] > 0.6);
    assert!(w.iter().all(|&x| x >= -1e-9));
}

#[test]
fn contradictory_bounds_report_failure() {
    let views = Views::none(2).absolute(0, 0.08).unwrap();
    let bl = model(views, Uncertainty::Derived);
    let bounds = Bounds::PerAsset(vec![(0.6, 0.6), (0.6, 0.6)]);
    let alloc = optimizer().optimize(&bl, &bounds).unwrap();
    assert!(!alloc.result.success);
    assert!(alloc.result.weights().is_none());
}

#[test]
fn lower_bounds_summing_above_one_report_failure() {
    let bl = model(Views::none(2), Uncertainty::Derived);
    let bounds = Bounds::PerAsset(vec![(0.7, 1.0), (0.4, 1.0)]);
    let alloc = optimizer().optimize(&bl, &bounds).unwrap();
    assert!(!alloc.result.success);
}

#[test]
fn diagonal_inflation_needs_a_large_enough_shift() {
    // Eigenvalues 0.0205 and -0.0005.
    let bad = DMatrix::from_row_slice(2, 2, &[
        0.01,   0.0105,
        0.0105, 0.01,
    ]);
    assert!(!regularize::is_positive_definite(&bad));

    let too_small = regularize::repair(&bad, Repair::DiagonalInflation { shift: 1e-4 }).unwrap();
    assert!(!regularize::is_positive_definite(&too_small));

    let enough = regularize::repair(&bad, Repair::DiagonalInflation { shift: 1e-3 }).unwrap();
    assert!(regularize::is_positive_definite(&enough));
}

#[test]
fn repaired_covariance_feeds_the_optimizer() {
    let bad = DMatrix::from_row_slice(3, 3, &[
        0.04,  0.05, 0.0,
        0.05,  0.04, 0.0,
        0.0,   0.0,  0.09,
    ]);
    let weights = DVector::from_vec(vec![0.4, 0.3, 0.3]);
    let config = EngineConfig::default();

    let err = BlackLitterman::new(
        bad.clone(),
        weights.clone(),
        Views::none(3),
        RiskPremium::Direct(0.05),
        Uncertainty::Derived,
        &config,
    )
    .unwrap_err();
    assert!(matches!(err, BlmError::NotPositiveSemidefinite { .. }));

    let fixed = regularize::repair(&bad, Repair::DiagonalInflation { shift: 0.02 }).unwrap();
    let bl = BlackLitterman::new(
        fixed,
        weights,
        Views::none(3).relative(2, 0, 0.01).unwrap(),
        RiskPremium::Direct(0.05),
        Uncertainty::Derived,
        &config,
    )
    .unwrap();
    let alloc = optimizer().optimize(&bl, &Bounds::LongOnly).unwrap();
    assert!(alloc.result.success);
    assert_relative_eq!(alloc.result.weights.sum(), 1.0, epsilon = 1e-6);
}

#[test]
fn independent_runs_in_parallel() {
    let opt = optimizer();
    let bl = model(Views::none(2).absolute(0, 0.08).unwrap(), Uncertainty::Derived);
    let reference = opt.optimize(&bl, &Bounds::LongOnly).unwrap();

    let (opt, bl) = (&opt, &bl);
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(move || opt.optimize(bl, &Bounds::LongOnly).unwrap()))
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), reference);
        }
    });
}

#[test]
fn non_finite_inputs_never_reach_the_optimizer() {
    assert!(matches!(
        Views::none(2).absolute(0, f64::NAN),
        Err(BlmError::InvalidParameter { .. })
    ));

    let mut nan_cov = cov2();
    nan_cov[(0, 1)] = f64::NAN;
    nan_cov[(1, 0)] = f64::NAN;
    let err = BlackLitterman::new(
        nan_cov.clone(),
        DVector::from_vec(vec![0.6, 0.4]),
        Views::none(2),
        RiskPremium::Direct(0.05),
        Uncertainty::Derived,
        &EngineConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, BlmError::InvalidParameter { name: "covariance", .. }));
    assert!(!regularize::is_positive_definite(&nan_cov));
}

#[test]
fn asymmetric_matrix_is_not_positive_definite() {
    let lower_looks_fine = DMatrix::from_row_slice(2, 2, &[
        1.0, 10.0,
        0.0, 1.0,
    ]);
    let d = regularize::diagnose(&lower_looks_fine).unwrap();
    assert!(!d.positive_definite);
    assert!(d.min_eigenvalue < 0.0);

    let repaired = regularize::repair(&lower_looks_fine, Repair::NearestSymmetricPsd).unwrap();
    assert!(regularize::ensure_positive_semidefinite(&repaired, 1e-10).is_ok());
}
