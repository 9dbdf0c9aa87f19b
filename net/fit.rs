// net/fit.rs

//! # Model Fitting Orchestrator
//!
//! Turns raw data and a lambda sequence into a fitted penalty path:
//!
//! 1.  **Validation:** solver settings, lambdas, and regularization flag
//!     lengths are checked before any arithmetic happens.
//! 2.  **Intercepts:** `X` and `Z` independently gain or lose their leading
//!     column of ones to match the requested model; the regularization flags
//!     follow along. Intercepts are unpenalized unless overridden.
//! 3.  **Standardization:** optional, always on private copies of the
//!     predictors. Unstandardized fits hand per-coefficient norms to the solver.
//! 4.  **Step size:** fixed-step gradient solvers get a calibrated step derived
//!     from the extreme eigenvalues of the two Gram matrices.
//! 5.  **Path and backtransform:** the path engine runs, and coefficients are
//!     mapped back to the original predictor scale.

use crate::cv::CvOptions;
use crate::data::{DataError, RawData};
use crate::model::{MlmNet, ModelError};
use crate::path::run_path;
use crate::solvers::{PathSolver, RegularizationMask, Solver, SolverError, coordinate_norms};
use crate::standardize::{Standardization, backtransform, standardize};
use ndarray::{Array2, ArrayView2};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{EigValsh, UPLO};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Magnitude of the uniform noise added to Gram diagonals of standardized
/// designs before their extreme eigenvalues are read off.
const DIAGONAL_JITTER_SCALE: f64 = 1e-6;

/// A comprehensive error type for fitting and cross-validation.
#[derive(Error, Debug)]
pub enum EstimationError {
    #[error(
        "{which} regularization flags have length {found}, but the {which} matrix has {expected} columns."
    )]
    RegFlagLength {
        which: &'static str,
        found: usize,
        expected: usize,
    },

    #[error("At least one lambda is required.")]
    NoLambdas,

    #[error("Lambda values must be finite and non-negative, got {0}.")]
    InvalidLambda(f64),

    #[error("Found {rows} row folds but {cols} column folds; folds are paired and must match.")]
    FoldCountMismatch { rows: usize, cols: usize },

    #[error("Cross-validation needs at least one fold.")]
    NoFolds,

    #[error(
        "Cannot split {total} indices into {desired} folds to pair with {target} folds; the count must equal {target} or be 1."
    )]
    FoldGeneration {
        total: usize,
        desired: usize,
        target: usize,
    },

    #[error(
        "The Gram matrix spectra give a zero or non-finite step size (largest eigenvalue product {0:e})."
    )]
    DegenerateStepSize(f64),

    #[error("Eigenvalue extraction for step-size calibration failed: {0}")]
    EigenvaluesFailed(#[from] LinalgError),

    #[error("Solver failure: {0}")]
    Solver(#[from] SolverError),

    #[error("Invalid data: {0}")]
    Data(#[from] DataError),

    #[error("Model evaluation failed: {0}")]
    Model(#[from] ModelError),

    #[error("Failed to read configuration file: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Failed to parse TOML configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Model-level switches for a single fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Fit an intercept column in `X`, adding one if the data lacks it.
    pub x_intercept: bool,
    /// Fit an intercept column in `Z`, adding one if the data lacks it.
    pub z_intercept: bool,
    /// Per-column penalty flags for the data's current `X`; all `true` if unset.
    pub x_reg: Option<Vec<bool>>,
    /// Per-column penalty flags for the data's current `Z`; all `true` if unset.
    pub z_reg: Option<Vec<bool>>,
    /// Whether the `X` intercept is penalized.
    pub x_intercept_reg: bool,
    /// Whether the `Z` intercept is penalized.
    pub z_intercept_reg: bool,
    pub standardize: bool,
    /// Derive the step of fixed-step gradient solvers from the Gram spectra.
    pub calibrate_step_size: bool,
    /// Seed for the diagonal jitter used during step-size calibration.
    pub jitter_seed: u64,
    /// Report lambda and column adjustments at `info` rather than `debug`.
    pub verbose: bool,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            x_intercept: true,
            z_intercept: true,
            x_reg: None,
            z_reg: None,
            x_intercept_reg: false,
            z_intercept_reg: false,
            standardize: true,
            calibrate_step_size: true,
            jitter_seed: 0,
            verbose: false,
        }
    }
}

/// Everything a run reads from its TOML configuration file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub solver: Solver,
    pub fit: FitOptions,
    pub cv: CvOptions,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, EstimationError> {
        let text = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.solver.validate()?;
        Ok(config)
    }
}

/// Emits a non-fatal notice at `info` when verbose and `debug` otherwise.
pub(crate) fn notice(verbose: bool, message: &str) {
    if verbose {
        log::info!("{message}");
    } else {
        log::debug!("{message}");
    }
}

/// Fits the penalized matrix linear model along the whole lambda path.
pub fn mlmnet<S: PathSolver + ?Sized>(
    solver: &S,
    data: &RawData,
    lambdas: &[f64],
    options: &FitOptions,
) -> Result<MlmNet, EstimationError> {
    // --- 1. Validate configuration before touching any matrices ---
    solver.validate()?;
    validate_lambdas(lambdas)?;
    let x_flags = resolve_flags(options.x_reg.as_deref(), data.p(), "X")?;
    let z_flags = resolve_flags(options.z_reg.as_deref(), data.q(), "Z")?;

    // --- 2. Reconcile intercepts on an owned copy of the data ---
    let mut data = data.clone();
    let had_x = data.predictors().has_x_intercept();
    let had_z = data.predictors().has_z_intercept();
    data.predictors_mut().set_x_intercept(options.x_intercept);
    data.predictors_mut().set_z_intercept(options.z_intercept);
    let x_flags = reconcile_flags(x_flags, had_x, options.x_intercept, options.x_intercept_reg);
    let z_flags = reconcile_flags(z_flags, had_z, options.z_intercept, options.z_intercept_reg);

    // --- 3. Regularization mask ---
    let reg = RegularizationMask::from_flags(&x_flags, &z_flags);

    log::debug!(
        "Fitting {} lambda(s) with the {} solver: n={}, m={}, p={}, q={}, {} penalized coefficients.",
        lambdas.len(),
        solver.name(),
        data.n(),
        data.m(),
        data.p(),
        data.q(),
        reg.num_penalized()
    );

    let (coefficients, lambdas) = {
        // --- 4. Standardize private copies, or compute raw-scale norms ---
        let has_x = options.x_intercept;
        let has_z = options.z_intercept;
        let (x, z, scaling): (Cow<'_, Array2<f64>>, Cow<'_, Array2<f64>>, Option<(Standardization, Standardization)>) =
            if options.standardize {
                let mut x = data.x().clone();
                let mut z = data.z().clone();
                let x_std = standardize(&mut x, has_x, options.verbose);
                let z_std = standardize(&mut z, has_z, options.verbose);
                (Cow::Owned(x), Cow::Owned(z), Some((x_std, z_std)))
            } else {
                (Cow::Borrowed(data.x()), Cow::Borrowed(data.z()), None)
            };
        let norms = (!options.standardize).then(|| coordinate_norms(x.view(), z.view()));

        // --- 5. Step-size calibration for fixed-step gradient solvers ---
        let step_size = if solver.uses_fixed_step() && options.calibrate_step_size {
            let mut rng = StdRng::seed_from_u64(options.jitter_seed);
            let step = calibrated_step_size(x.view(), z.view(), options.standardize, &mut rng)?;
            log::debug!("Calibrated step size: {step:e}");
            Some(step)
        } else {
            None
        };

        // --- 6. Run the path ---
        let path = run_path(
            solver,
            x.view(),
            data.y().view(),
            z.view(),
            lambdas,
            &reg,
            norms.as_ref(),
            step_size,
            options.verbose,
        )?;

        // --- 7. Backtransform to the original predictor scale ---
        let mut coefficients = path.coefficients;
        if let Some((x_std, z_std)) = &scaling {
            backtransform(&mut coefficients, x_std, z_std, has_x, has_z);
        }
        (coefficients, path.lambdas)
    };

    // --- 8. Bundle the result ---
    Ok(MlmNet::new(coefficients, lambdas, data, reg))
}

fn validate_lambdas(lambdas: &[f64]) -> Result<(), EstimationError> {
    if lambdas.is_empty() {
        return Err(EstimationError::NoLambdas);
    }
    match lambdas.iter().find(|l| !(l.is_finite() && **l >= 0.0)) {
        Some(&bad) => Err(EstimationError::InvalidLambda(bad)),
        None => Ok(()),
    }
}

fn resolve_flags(
    flags: Option<&[bool]>,
    expected: usize,
    which: &'static str,
) -> Result<Vec<bool>, EstimationError> {
    match flags {
        None => Ok(vec![true; expected]),
        Some(flags) if flags.len() == expected => Ok(flags.to_vec()),
        Some(flags) => Err(EstimationError::RegFlagLength {
            which,
            found: flags.len(),
            expected,
        }),
    }
}

/// Adjusts the per-column flags to the reconciled intercept state.
fn reconcile_flags(mut flags: Vec<bool>, had: bool, wanted: bool, intercept_reg: bool) -> Vec<bool> {
    match (had, wanted) {
        (false, true) => std::iter::once(intercept_reg).chain(flags).collect(),
        (true, false) => flags.split_off(1),
        (true, true) => {
            flags[0] = intercept_reg;
            flags
        }
        (false, false) => flags,
    }
}

/// Smallest and largest eigenvalue of `MᵗM`, optionally after jittering its
/// diagonal with uniform noise.
fn gram_extremes<R: Rng>(matrix: ArrayView2<'_, f64>, jitter: bool, rng: &mut R) -> Result<(f64, f64), LinalgError> {
    let mut gram = matrix.t().dot(&matrix);
    if jitter {
        for value in gram.diag_mut() {
            *value += DIAGONAL_JITTER_SCALE * rng.gen_range(0.0..1.0);
        }
    }
    let eigenvalues = gram.eigvalsh(UPLO::Lower)?;
    let smallest = eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
    let largest = eigenvalues.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Ok((smallest, largest))
}

/// Step size for fixed-step proximal gradient solvers.
///
/// Returns the reciprocal of whichever of `λmax(XᵗX)·λmax(ZᵗZ)` and
/// `λmin(XᵗX)·λmin(ZᵗZ)` is larger in magnitude. The min·min branch only
/// matters for indefinite spectra and has no convergence proof; it is kept
/// as is. With `jitter`, Gram diagonals get noise of order
/// [`DIAGONAL_JITTER_SCALE`] drawn from `rng`.
pub fn calibrated_step_size<R: Rng>(
    x: ArrayView2<'_, f64>,
    z: ArrayView2<'_, f64>,
    jitter: bool,
    rng: &mut R,
) -> Result<f64, EstimationError> {
    let (x_min, x_max) = gram_extremes(x, jitter, rng)?;
    let (z_min, z_max) = gram_extremes(z, jitter, rng)?;
    let max_product = x_max * z_max;
    let min_product = x_min * z_min;
    let dominant = if max_product.abs() >= min_product.abs() {
        max_product
    } else {
        min_product
    };
    let step = 1.0 / dominant;
    if !step.is_finite() || step <= 0.0 {
        return Err(EstimationError::DegenerateStepSize(dominant));
    }
    Ok(step)
}
