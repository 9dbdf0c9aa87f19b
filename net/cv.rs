// net/cv.rs

//! # Cross-Validation Harness
//!
//! Cross-validation pairs a set of row folds with a set of column folds: fold
//! `i` trains on `Y[row_folds[i], col_folds[i]]` together with the matching rows
//! of `X` and `Z`. The fold index lists hold TRAINING indices; the held-out part
//! of fold `i` is the complement of each list, or every index when the list
//! already covers the whole dimension (a single fold, evaluated in sample).
//!
//! Folds are fit independently on the rayon pool and collected in fold order.
//! For every (lambda, fold) pair the harness records the mean squared held-out
//! residual and the proportion of penalized coefficients that are zero.

use crate::data::RawData;
use crate::fit::{EstimationError, FitOptions, mlmnet};
use crate::model::MlmNet;
use crate::solvers::{PathSolver, RegularizationMask};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Settings that only matter to cross-validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvOptions {
    /// Decimal places used to decide whether a coefficient counts as zero.
    pub digits: i32,
    /// Seed for shuffling indices when folds are generated from counts.
    pub fold_seed: u64,
}

impl Default for CvOptions {
    fn default() -> Self {
        Self {
            digits: 12,
            fold_seed: 0,
        }
    }
}

/// Results of a cross-validated path fit.
#[derive(Debug, Clone)]
pub struct MlmNetCv {
    fits: Vec<MlmNet>,
    lambdas: Vec<f64>,
    row_folds: Vec<Vec<usize>>,
    col_folds: Vec<Vec<usize>>,
    mse: Array2<f64>,
    prop_zero: Array2<f64>,
}

impl MlmNetCv {
    /// One fitted path per fold, in fold order.
    pub fn fits(&self) -> &[MlmNet] {
        &self.fits
    }

    /// The deduplicated, descending lambdas shared by every fold.
    pub fn lambdas(&self) -> &[f64] {
        &self.lambdas
    }

    pub fn row_folds(&self) -> &[Vec<usize>] {
        &self.row_folds
    }

    pub fn col_folds(&self) -> &[Vec<usize>] {
        &self.col_folds
    }

    /// Shape `(L, folds)`: mean squared held-out residual.
    pub fn mse(&self) -> &Array2<f64> {
        &self.mse
    }

    /// Shape `(L, folds)`: proportion of penalized coefficients that are zero.
    pub fn prop_zero(&self) -> &Array2<f64> {
        &self.prop_zero
    }

    /// Per-lambda mean of the held-out MSE across folds.
    pub fn mean_mse(&self) -> Array1<f64> {
        row_means(&self.mse)
    }

    /// Per-lambda mean proportion of zero coefficients across folds.
    pub fn mean_prop_zero(&self) -> Array1<f64> {
        row_means(&self.prop_zero)
    }
}

fn row_means(matrix: &Array2<f64>) -> Array1<f64> {
    matrix
        .mean_axis(Axis(1))
        .unwrap_or_else(|| Array1::from_elem(matrix.nrows(), f64::NAN))
}

/// What a single fold contributes to the summary matrices.
struct FoldOutcome {
    fit: MlmNet,
    mse: Vec<f64>,
    prop_zero: Vec<f64>,
}

/// Builds `target` training index sets over `0..total`.
///
/// With `desired == 1` every set is the full range, so each fold is evaluated
/// in sample. Otherwise `desired` must equal `target`: the shuffled indices
/// are dealt into `desired` disjoint held-out groups and each returned set is
/// the sorted complement of one group.
pub fn make_folds<R: Rng + ?Sized>(
    total: usize,
    desired: usize,
    target: usize,
    rng: &mut R,
) -> Result<Vec<Vec<usize>>, EstimationError> {
    if desired == 1 {
        return Ok(vec![(0..total).collect(); target]);
    }
    if desired != target || desired == 0 || desired > total {
        return Err(EstimationError::FoldGeneration {
            total,
            desired,
            target,
        });
    }

    let mut shuffled: Vec<usize> = (0..total).collect();
    shuffled.shuffle(rng);
    let mut group = vec![0usize; total];
    for (position, &index) in shuffled.iter().enumerate() {
        group[index] = position % desired;
    }

    Ok((0..desired)
        .map(|fold| (0..total).filter(|&i| group[i] != fold).collect())
        .collect())
}

/// Indices of `0..total` missing from `training`, or all of them if none are.
fn held_out(training: &[usize], total: usize) -> Vec<usize> {
    let mut in_training = vec![false; total];
    for &i in training {
        if i < total {
            in_training[i] = true;
        }
    }
    let complement: Vec<usize> = (0..total).filter(|&i| !in_training[i]).collect();
    if complement.is_empty() {
        (0..total).collect()
    } else {
        complement
    }
}

/// Share of penalized entries of `b` that round to zero at `digits` decimals.
/// NaN when nothing is penalized.
pub fn proportion_zero(b: ArrayView2<'_, f64>, reg: &RegularizationMask, digits: i32) -> f64 {
    let penalized = reg.num_penalized();
    if penalized == 0 {
        return f64::NAN;
    }
    let scale = 10f64.powi(digits);
    let zeros = b
        .iter()
        .zip(reg.mask.iter())
        .filter(|&(v, &flag)| flag && (v * scale).round() == 0.0)
        .count();
    zeros as f64 / penalized as f64
}

fn fit_fold<S: PathSolver + ?Sized>(
    solver: &S,
    data: &RawData,
    lambdas: &[f64],
    rows: &[usize],
    cols: &[usize],
    fit_options: &FitOptions,
    cv_options: &CvOptions,
) -> Result<FoldOutcome, EstimationError> {
    let training = data.subset(rows, cols)?;
    let fit = mlmnet(solver, &training, lambdas, fit_options)?;

    let mut test = data.subset(&held_out(rows, data.n()), &held_out(cols, data.m()))?;
    // Match the fit's intercepts up front so per-lambda prediction stays quiet.
    test.predictors_mut().set_x_intercept(fit_options.x_intercept);
    test.predictors_mut().set_z_intercept(fit_options.z_intercept);

    let mut mse = Vec::with_capacity(fit.lambdas().len());
    let mut prop_zero = Vec::with_capacity(fit.lambdas().len());
    for (l, &lambda) in fit.lambdas().iter().enumerate() {
        let residuals = fit.residuals(lambda, &mut test)?;
        mse.push(residuals.mapv(|r| r * r).mean().unwrap_or(f64::NAN));
        let b = fit.coefficients().index_axis(Axis(0), l);
        prop_zero.push(proportion_zero(b, fit.reg(), cv_options.digits));
    }

    Ok(FoldOutcome { fit, mse, prop_zero })
}

/// Cross-validates a path fit over explicitly paired row and column folds.
pub fn mlmnet_cv<S: PathSolver + ?Sized>(
    solver: &S,
    data: &RawData,
    lambdas: &[f64],
    row_folds: &[Vec<usize>],
    col_folds: &[Vec<usize>],
    fit_options: &FitOptions,
    cv_options: &CvOptions,
) -> Result<MlmNetCv, EstimationError> {
    if row_folds.len() != col_folds.len() {
        return Err(EstimationError::FoldCountMismatch {
            rows: row_folds.len(),
            cols: col_folds.len(),
        });
    }
    if row_folds.is_empty() {
        return Err(EstimationError::NoFolds);
    }

    log::info!(
        "Cross-validating {} fold(s) over {} lambda(s) with the {} solver.",
        row_folds.len(),
        lambdas.len(),
        solver.name()
    );

    let outcomes: Vec<FoldOutcome> = row_folds
        .par_iter()
        .zip(col_folds.par_iter())
        .map(|(rows, cols)| fit_fold(solver, data, lambdas, rows, cols, fit_options, cv_options))
        .collect::<Result<_, _>>()?;

    let path_lambdas = outcomes
        .first()
        .map(|outcome| outcome.fit.lambdas().to_vec())
        .unwrap_or_default();
    let shape = (path_lambdas.len(), outcomes.len());
    let mut mse = Array2::<f64>::zeros(shape);
    let mut prop_zero = Array2::<f64>::zeros(shape);
    let mut fits = Vec::with_capacity(outcomes.len());
    for (i, outcome) in outcomes.into_iter().enumerate() {
        mse.column_mut(i).assign(&Array1::from_vec(outcome.mse));
        prop_zero.column_mut(i).assign(&Array1::from_vec(outcome.prop_zero));
        fits.push(outcome.fit);
    }

    Ok(MlmNetCv {
        fits,
        lambdas: path_lambdas,
        row_folds: row_folds.to_vec(),
        col_folds: col_folds.to_vec(),
        mse,
        prop_zero,
    })
}

/// Cross-validates with generated row and column folds.
///
/// Both counts are paired against the larger of the two, so they must either
/// match or one of them must be 1.
#[allow(clippy::too_many_arguments)]
pub fn mlmnet_cv_k<S: PathSolver + ?Sized>(
    solver: &S,
    data: &RawData,
    lambdas: &[f64],
    n_row_folds: usize,
    n_col_folds: usize,
    fit_options: &FitOptions,
    cv_options: &CvOptions,
) -> Result<MlmNetCv, EstimationError> {
    let target = n_row_folds.max(n_col_folds);
    let mut rng = StdRng::seed_from_u64(cv_options.fold_seed);
    let row_folds = make_folds(data.n(), n_row_folds, target, &mut rng)?;
    let col_folds = make_folds(data.m(), n_col_folds, target, &mut rng)?;
    mlmnet_cv(solver, data, lambdas, &row_folds, &col_folds, fit_options, cv_options)
}

/// Cross-validates with generated row folds and explicit column folds.
#[allow(clippy::too_many_arguments)]
pub fn mlmnet_cv_rows<S: PathSolver + ?Sized>(
    solver: &S,
    data: &RawData,
    lambdas: &[f64],
    n_row_folds: usize,
    col_folds: &[Vec<usize>],
    fit_options: &FitOptions,
    cv_options: &CvOptions,
) -> Result<MlmNetCv, EstimationError> {
    let mut rng = StdRng::seed_from_u64(cv_options.fold_seed);
    let row_folds = make_folds(data.n(), n_row_folds, col_folds.len(), &mut rng)?;
    mlmnet_cv(solver, data, lambdas, &row_folds, col_folds, fit_options, cv_options)
}

/// Cross-validates with explicit row folds and generated column folds.
#[allow(clippy::too_many_arguments)]
pub fn mlmnet_cv_cols<S: PathSolver + ?Sized>(
    solver: &S,
    data: &RawData,
    lambdas: &[f64],
    row_folds: &[Vec<usize>],
    n_col_folds: usize,
    fit_options: &FitOptions,
    cv_options: &CvOptions,
) -> Result<MlmNetCv, EstimationError> {
    let mut rng = StdRng::seed_from_u64(cv_options.fold_seed);
    let col_folds = make_folds(data.m(), n_col_folds, row_folds.len(), &mut rng)?;
    mlmnet_cv(solver, data, lambdas, row_folds, &col_folds, fit_options, cv_options)
}
