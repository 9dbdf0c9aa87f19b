//! # Penalty Path Engine
//!
//! Drives a single [`PathSolver`] across a descending sequence of penalties.
//! Each solve starts from the previous solution (the warm start), beginning
//! from the all-zero matrix that belongs to an implicit infinite penalty.
//!
//! The lambda loop is strictly sequential: iteration `i` consumes the output of
//! iteration `i − 1`. The warm-start matrix is moved into the solver and moved
//! back out, so exactly one owner holds it at any time.
//!
//! For solvers that declare `requires_spectral`, the eigendecompositions of
//! `XᵗX` and `ZᵗZ` and the rotated response are computed once here, before the
//! loop, and shared read-only by every solve on the path.

use crate::fit::notice;
use crate::solvers::{PathSolver, RegularizationMask, SolverError, SolverProblem, SpectralDecomposition};
use itertools::Itertools;
use ndarray::{Array2, Array3, ArrayView2, Axis};

/// What the lambda preprocessing did to the caller's sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LambdaAdjustment {
    pub deduplicated: bool,
    pub sorted: bool,
}

/// Coefficients for every lambda on the path, indexed by lambda position.
#[derive(Debug, Clone)]
pub struct PathOutput {
    /// Shape `(L, p, q)`; slice `i` belongs to `lambdas[i]`.
    pub coefficients: Array3<f64>,
    /// The deduplicated, strictly descending lambdas actually used.
    pub lambdas: Vec<f64>,
    pub adjustment: LambdaAdjustment,
}

/// Sorts descending and removes duplicates, reporting what changed.
pub fn prepare_lambdas(lambdas: &[f64]) -> (Vec<f64>, LambdaAdjustment) {
    let sorted = lambdas.windows(2).all(|w| w[0] >= w[1]);
    let prepared: Vec<f64> = lambdas
        .iter()
        .copied()
        .sorted_by(|a, b| b.total_cmp(a))
        .dedup()
        .collect();
    let adjustment = LambdaAdjustment {
        deduplicated: prepared.len() != lambdas.len(),
        sorted: !sorted,
    };
    (prepared, adjustment)
}

fn report_adjustment(adjustment: LambdaAdjustment, verbose: bool) {
    let message = match (adjustment.deduplicated, adjustment.sorted) {
        (true, true) => "Lambdas were deduplicated and sorted in descending order.",
        (true, false) => "Duplicate lambdas were removed.",
        (false, true) => "Lambdas were sorted in descending order.",
        (false, false) => return,
    };
    notice(verbose, message);
}

/// Fits the whole path starting from the all-zero coefficient matrix.
#[allow(clippy::too_many_arguments)]
pub fn run_path<S: PathSolver + ?Sized>(
    solver: &S,
    x: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
    z: ArrayView2<'_, f64>,
    lambdas: &[f64],
    reg: &RegularizationMask,
    norms: Option<&Array2<f64>>,
    step_size: Option<f64>,
    verbose: bool,
) -> Result<PathOutput, SolverError> {
    let warm_start = Array2::zeros((x.ncols(), z.ncols()));
    run_path_from(solver, x, y, z, lambdas, reg, norms, step_size, verbose, warm_start)
}

/// Fits the whole path starting from `warm_start` instead of zeros.
#[allow(clippy::too_many_arguments)]
pub fn run_path_from<S: PathSolver + ?Sized>(
    solver: &S,
    x: ArrayView2<'_, f64>,
    y: ArrayView2<'_, f64>,
    z: ArrayView2<'_, f64>,
    lambdas: &[f64],
    reg: &RegularizationMask,
    norms: Option<&Array2<f64>>,
    step_size: Option<f64>,
    verbose: bool,
    warm_start: Array2<f64>,
) -> Result<PathOutput, SolverError> {
    let (lambdas, adjustment) = prepare_lambdas(lambdas);
    report_adjustment(adjustment, verbose);

    let spectral = if solver.requires_spectral() {
        log::debug!(
            "Precomputing spectral decomposition for the {} solver ({}x{} and {}x{} Gram matrices).",
            solver.name(),
            x.ncols(),
            x.ncols(),
            z.ncols(),
            z.ncols()
        );
        Some(SpectralDecomposition::compute(x, y, z)?)
    } else {
        None
    };

    let problem = SolverProblem {
        x: x.view(),
        y: y.view(),
        z: z.view(),
        reg,
        norms,
        spectral: spectral.as_ref(),
        step_size,
    };

    let (p, q) = problem.shape();
    let mut coefficients = Array3::<f64>::zeros((lambdas.len(), p, q));
    let mut current = warm_start;
    for (i, &lambda) in lambdas.iter().enumerate() {
        current = solver.solve(&problem, lambda, current)?;
        coefficients.index_axis_mut(Axis(0), i).assign(&current);
        log::debug!(
            "Lambda {}/{} ({:e}): {} non-zero coefficients.",
            i + 1,
            lambdas.len(),
            lambda,
            current.iter().filter(|&&v| v != 0.0).count()
        );
    }

    Ok(PathOutput {
        coefficients,
        lambdas,
        adjustment,
    })
}
