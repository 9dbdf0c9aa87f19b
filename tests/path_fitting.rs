use approx::assert_abs_diff_eq;
use mlmnet::solvers::{AdmmConfig, CdConfig};
use mlmnet::{
    EstimationError, FitOptions, PathSolver, Predictors, RawData, RegularizationMask, Solver,
    SolverError, SolverProblem, mlmnet, mlmnet_cv, run_path, run_path_from,
};
use ndarray::{Array2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

fn gaussian(rows: usize, cols: usize, rng: &mut StdRng) -> Array2<f64> {
    let normal = Normal::new(0.0, 1.0).unwrap();
    Array2::from_shape_fn((rows, cols), |_| normal.sample(&mut *rng))
}

/// Y built from a sparse true B plus noise, with X and Z lacking intercepts.
fn simulated_data(n: usize, m: usize, p: usize, q: usize, seed: u64) -> RawData {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = gaussian(n, p, &mut rng);
    let z = gaussian(m, q, &mut rng);
    let mut b = Array2::<f64>::zeros((p, q));
    b[[0, 0]] = 2.0;
    b[[p - 1, q - 1]] = -1.5;
    let noise = gaussian(n, m, &mut rng) * 0.1;
    let y = x.dot(&b).dot(&z.t()) + noise;
    RawData::new(y, Predictors::new(x, z, false, false).unwrap()).unwrap()
}

fn tight_cd() -> Solver {
    Solver::CoordinateDescent(CdConfig::new(1e-18, 1_000_000, false, 0).unwrap())
}

/// Closed-form ridge solution through the shared spectral decomposition.
/// Ignores the warm start entirely.
struct RidgeSolver;

impl PathSolver for RidgeSolver {
    fn name(&self) -> &'static str {
        "ridge"
    }

    fn requires_spectral(&self) -> bool {
        true
    }

    fn solve(
        &self,
        problem: &SolverProblem<'_>,
        lambda: f64,
        warm_start: Array2<f64>,
    ) -> Result<Array2<f64>, SolverError> {
        let spectral = problem
            .spectral
            .ok_or(SolverError::MissingSpectralInputs("ridge"))?;
        assert_eq!(warm_start.dim(), problem.shape());
        let rotated = &spectral.rotated_response / &(&spectral.eigenvalue_products + lambda);
        Ok(spectral.qx.dot(&rotated).dot(&spectral.qz.t()))
    }
}

#[test]
fn end_to_end_fit_with_a_custom_solver() {
    let data = simulated_data(10, 6, 4, 3, 1);
    let fit = mlmnet(&RidgeSolver, &data, &[1.0, 0.1, 0.01], &FitOptions::default()).unwrap();

    assert_eq!(fit.coefficients().dim(), (3, 5, 4));
    assert!(fit.coefficients().iter().all(|v| v.is_finite()));
    assert_eq!(fit.lambdas(), &[1.0, 0.1, 0.01]);
    assert!(fit.data().predictors().has_x_intercept());
    assert!(fit.data().predictors().has_z_intercept());
    // The caller's container is left as it was.
    assert_eq!(data.p(), 4);
}

#[test]
fn warm_started_continuation_matches_the_full_path() {
    let data = simulated_data(20, 8, 3, 2, 2);
    let reg = RegularizationMask::from_flags(&[true; 3], &[true; 2]);
    let solver = tight_cd();
    let (x, y, z) = (data.x().view(), data.y().view(), data.z().view());

    let full = run_path(&solver, x, y, z, &[5.0, 3.0, 1.0], &reg, None, None, false).unwrap();
    let head = run_path(&solver, x, y, z, &[5.0, 3.0], &reg, None, None, false).unwrap();
    let seed = head.coefficients.index_axis(Axis(0), 1).to_owned();
    let tail = run_path_from(&solver, x, y, z, &[1.0], &reg, None, None, false, seed).unwrap();

    let expected = full.coefficients.index_axis(Axis(0), 2);
    let actual = tail.coefficients.index_axis(Axis(0), 0);
    for (a, e) in actual.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(*a, *e, epsilon = 1e-7);
    }
}

#[test]
fn duplicate_and_unsorted_lambdas_are_normalized() {
    let data = simulated_data(12, 5, 2, 2, 3);
    let fit = mlmnet(&Solver::default(), &data, &[0.1, 1.0, 0.1], &FitOptions::default()).unwrap();
    assert_eq!(fit.lambdas(), &[1.0, 0.1]);
    assert_eq!(fit.coefficients().len_of(Axis(0)), 2);
}

#[test]
fn standardization_does_not_change_the_unpenalized_fit() {
    let data = simulated_data(30, 8, 3, 2, 4);
    let standardized = mlmnet(&tight_cd(), &data, &[0.0], &FitOptions::default()).unwrap();
    let raw = mlmnet(
        &tight_cd(),
        &data,
        &[0.0],
        &FitOptions {
            standardize: false,
            ..FitOptions::default()
        },
    )
    .unwrap();

    for (a, b) in standardized
        .coefficients()
        .iter()
        .zip(raw.coefficients().iter())
    {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
    }
}

#[test]
fn predictions_on_training_predictors_match_fitted_values() {
    let data = simulated_data(15, 6, 3, 2, 5);
    let fit = mlmnet(&Solver::default(), &data, &[0.5, 0.05], &FitOptions::default()).unwrap();

    let mut predictors = data.predictors().clone();
    let predicted = fit.predict(0.05, &mut predictors).unwrap();
    let fitted = fit.fitted(0.05).unwrap();
    for (a, b) in predicted.iter().zip(fitted.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
    }
}

#[test]
fn admm_path_agrees_with_coordinate_descent() {
    let data = simulated_data(25, 7, 3, 3, 6);
    let lambdas = [2.0, 0.5, 0.1];
    let admm = Solver::Admm(AdmmConfig {
        tolerance: 1e-10,
        max_iter: 200_000,
        ..AdmmConfig::default()
    });
    let by_admm = mlmnet(&admm, &data, &lambdas, &FitOptions::default()).unwrap();
    let by_cd = mlmnet(&tight_cd(), &data, &lambdas, &FitOptions::default()).unwrap();

    for (a, b) in by_admm.coefficients().iter().zip(by_cd.coefficients().iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
    }
}

#[test]
fn unpaired_folds_are_rejected() {
    let data = simulated_data(9, 6, 2, 2, 7);
    let rows = vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8]];
    let cols = vec![vec![0, 1, 2], vec![3, 4, 5]];
    let err = mlmnet_cv(
        &Solver::default(),
        &data,
        &[1.0],
        &rows,
        &cols,
        &FitOptions::default(),
        &Default::default(),
    )
    .unwrap_err();
    assert!(matches!(err, EstimationError::FoldCountMismatch { rows: 3, cols: 2 }));
}
