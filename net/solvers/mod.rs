//! # Per-Lambda Solvers
//!
//! Every strategy here minimizes, for one fixed penalty `λ`,
//!
//! ```text
//! ½‖Y − X B Zᵗ‖²_F + λ Σ reg[j,k]·|B[j,k]|
//! ```
//!
//! starting from the previous solution on the path. The path engine only talks
//! to solvers through [`PathSolver`]: the warm start is moved in and the
//! updated coefficients are moved back out, so no buffer is ever aliased
//! between the engine and a solver.
//!
//! Which extra inputs a solver needs is declared through capability flags on
//! the trait rather than inferred from its name. ADMM needs the spectral
//! decomposition of the two Gram matrices; ISTA and FISTA run with a fixed step
//! that the fit orchestrator may calibrate.

pub mod admm;
pub mod cd;
pub mod ista;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_linalg::{Eigh, EigValsh, UPLO};
use ndarray_linalg::error::LinalgError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

pub use admm::AdmmConfig;
pub use cd::CdConfig;
pub use ista::{BacktrackingConfig, ProxGradConfig};

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Eigendecomposition of a Gram matrix failed: {0}")]
    EigendecompositionFailed(#[from] LinalgError),

    #[error("The {0} solver needs the spectral decomposition of XᵗX and ZᵗZ, but none was supplied.")]
    MissingSpectralInputs(&'static str),

    #[error("Invalid {solver} configuration: {reason}")]
    InvalidConfig {
        solver: &'static str,
        reason: String,
    },

    #[error("The {solver} solver produced non-finite coefficients at lambda = {lambda:e}.")]
    NonFiniteCoefficients { solver: &'static str, lambda: f64 },

    #[error("Warm start has shape {found:?}, but the problem has {expected:?} coefficients.")]
    WarmStartShape {
        found: (usize, usize),
        expected: (usize, usize),
    },
}

/// Which coefficients carry the L1 penalty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegularizationMask {
    /// p×q; `true` marks a penalized (X-covariate, Z-covariate) interaction.
    pub mask: Array2<bool>,
    /// `X` columns flagged as regularized.
    pub x_indices: Vec<usize>,
    /// `Z` columns flagged as regularized.
    pub z_indices: Vec<usize>,
}

impl RegularizationMask {
    /// Outer product of the per-column flags of `X` and `Z`.
    pub fn from_flags(x_flags: &[bool], z_flags: &[bool]) -> Self {
        let mask = Array2::from_shape_fn((x_flags.len(), z_flags.len()), |(j, k)| {
            x_flags[j] && z_flags[k]
        });
        let indices = |flags: &[bool]| {
            flags
                .iter()
                .enumerate()
                .filter_map(|(i, &flag)| flag.then_some(i))
                .collect()
        };
        Self {
            mask,
            x_indices: indices(x_flags),
            z_indices: indices(z_flags),
        }
    }

    #[inline]
    pub fn is_penalized(&self, j: usize, k: usize) -> bool {
        self.mask[[j, k]]
    }

    pub fn num_penalized(&self) -> usize {
        self.mask.iter().filter(|&&flag| flag).count()
    }
}

/// Eigendecompositions of `XᵗX` and `ZᵗZ` plus the quantities ADMM reuses at
/// every lambda.
#[derive(Debug, Clone)]
pub struct SpectralDecomposition {
    /// Eigenvectors of `XᵗX`, one per column.
    pub qx: Array2<f64>,
    pub eigenvalues_x: Array1<f64>,
    /// Eigenvectors of `ZᵗZ`, one per column.
    pub qz: Array2<f64>,
    pub eigenvalues_z: Array1<f64>,
    /// The Kronecker product of the two eigenvalue vectors laid out as a p×q
    /// matrix: entry (j, k) is `λx_j · λz_k`.
    pub eigenvalue_products: Array2<f64>,
    /// `U = (X Qx)ᵗ Y (Z Qz)`.
    pub rotated_response: Array2<f64>,
}

impl SpectralDecomposition {
    pub fn compute(
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
        z: ArrayView2<'_, f64>,
    ) -> Result<Self, SolverError> {
        let (eigenvalues_x, qx) = x.t().dot(&x).eigh(UPLO::Lower)?;
        let (eigenvalues_z, qz) = z.t().dot(&z).eigh(UPLO::Lower)?;

        let eigenvalue_products = outer(&eigenvalues_x, &eigenvalues_z);
        let xq = x.dot(&qx);
        let zq = z.dot(&qz);
        let rotated_response = xq.t().dot(&y).dot(&zq);

        Ok(Self {
            qx,
            eigenvalues_x,
            qz,
            eigenvalues_z,
            eigenvalue_products,
            rotated_response,
        })
    }
}

/// Everything a solver may read for one path.
pub struct SolverProblem<'a> {
    pub x: ArrayView2<'a, f64>,
    pub y: ArrayView2<'a, f64>,
    pub z: ArrayView2<'a, f64>,
    pub reg: &'a RegularizationMask,
    /// `‖x_j‖²·‖z_k‖²` per coefficient; `None` when the design was standardized.
    pub norms: Option<&'a Array2<f64>>,
    pub spectral: Option<&'a SpectralDecomposition>,
    /// Step size fixed by the orchestrator for gradient-type solvers.
    pub step_size: Option<f64>,
}

impl SolverProblem<'_> {
    pub fn shape(&self) -> (usize, usize) {
        (self.x.ncols(), self.z.ncols())
    }

    /// Supplied norms, or the exact ones recomputed from the design.
    pub fn coordinate_norms(&self) -> Cow<'_, Array2<f64>> {
        match self.norms {
            Some(norms) => Cow::Borrowed(norms),
            None => Cow::Owned(coordinate_norms(self.x, self.z)),
        }
    }

    /// `Y − X B Zᵗ`.
    pub fn residual(&self, b: &Array2<f64>) -> Array2<f64> {
        &self.y - &self.x.dot(b).dot(&self.z.t())
    }

    /// `Xᵗ R Z`, the negative gradient of the squared-error term.
    pub fn negative_gradient(&self, residual: &Array2<f64>) -> Array2<f64> {
        self.x.t().dot(residual).dot(&self.z)
    }

    pub fn penalty(&self, b: &Array2<f64>) -> f64 {
        b.iter()
            .zip(self.reg.mask.iter())
            .filter(|&(_, &penalized)| penalized)
            .map(|(v, _)| v.abs())
            .sum()
    }

    /// The penalized objective at `b`.
    pub fn objective(&self, b: &Array2<f64>, lambda: f64) -> f64 {
        let residual = self.residual(b);
        0.5 * residual.iter().map(|r| r * r).sum::<f64>() + lambda * self.penalty(b)
    }

    /// Soft-thresholds the penalized entries of `b` at `threshold`.
    pub fn proximal(&self, b: &mut Array2<f64>, threshold: f64) {
        for (value, &penalized) in b.iter_mut().zip(self.reg.mask.iter()) {
            if penalized {
                *value = soft_threshold(*value, threshold);
            }
        }
    }

    fn check_warm_start(&self, warm_start: &Array2<f64>) -> Result<(), SolverError> {
        if warm_start.dim() != self.shape() {
            return Err(SolverError::WarmStartShape {
                found: warm_start.dim(),
                expected: self.shape(),
            });
        }
        Ok(())
    }
}

/// The seam between the path engine and a per-lambda strategy.
pub trait PathSolver: Sync {
    fn name(&self) -> &'static str;

    /// Whether the engine must precompute a [`SpectralDecomposition`].
    fn requires_spectral(&self) -> bool {
        false
    }

    /// Whether the solver runs with a fixed step that can be calibrated.
    fn uses_fixed_step(&self) -> bool {
        false
    }

    fn validate(&self) -> Result<(), SolverError> {
        Ok(())
    }

    /// Solves for one lambda starting from `warm_start` and hands the result back.
    fn solve(
        &self,
        problem: &SolverProblem<'_>,
        lambda: f64,
        warm_start: Array2<f64>,
    ) -> Result<Array2<f64>, SolverError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    CoordinateDescent,
    Ista,
    Fista,
    FistaBacktracking,
    Admm,
}

impl SolverKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::CoordinateDescent => "coordinate descent",
            Self::Ista => "ISTA",
            Self::Fista => "FISTA",
            Self::FistaBacktracking => "FISTA with backtracking",
            Self::Admm => "ADMM",
        }
    }

    pub fn requires_spectral(self) -> bool {
        matches!(self, Self::Admm)
    }

    pub fn uses_fixed_step(self) -> bool {
        matches!(self, Self::Ista | Self::Fista)
    }
}

/// The built-in solvers, each with its own typed configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Solver {
    CoordinateDescent(CdConfig),
    Ista(ProxGradConfig),
    Fista(ProxGradConfig),
    FistaBacktracking(BacktrackingConfig),
    Admm(AdmmConfig),
}

impl Default for Solver {
    fn default() -> Self {
        Self::CoordinateDescent(CdConfig::default())
    }
}

impl Solver {
    pub fn kind(&self) -> SolverKind {
        match self {
            Self::CoordinateDescent(_) => SolverKind::CoordinateDescent,
            Self::Ista(_) => SolverKind::Ista,
            Self::Fista(_) => SolverKind::Fista,
            Self::FistaBacktracking(_) => SolverKind::FistaBacktracking,
            Self::Admm(_) => SolverKind::Admm,
        }
    }

    /// A solver with default settings for `kind`.
    pub fn with_defaults(kind: SolverKind) -> Self {
        match kind {
            SolverKind::CoordinateDescent => Self::CoordinateDescent(CdConfig::default()),
            SolverKind::Ista => Self::Ista(ProxGradConfig::default()),
            SolverKind::Fista => Self::Fista(ProxGradConfig::default()),
            SolverKind::FistaBacktracking => Self::FistaBacktracking(BacktrackingConfig::default()),
            SolverKind::Admm => Self::Admm(AdmmConfig::default()),
        }
    }
}

impl PathSolver for Solver {
    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn requires_spectral(&self) -> bool {
        self.kind().requires_spectral()
    }

    fn uses_fixed_step(&self) -> bool {
        self.kind().uses_fixed_step()
    }

    fn validate(&self) -> Result<(), SolverError> {
        match self {
            Self::CoordinateDescent(config) => config.validate(),
            Self::Ista(config) | Self::Fista(config) => config.validate(self.name()),
            Self::FistaBacktracking(config) => config.validate(),
            Self::Admm(config) => config.validate(),
        }
    }

    fn solve(
        &self,
        problem: &SolverProblem<'_>,
        lambda: f64,
        warm_start: Array2<f64>,
    ) -> Result<Array2<f64>, SolverError> {
        problem.check_warm_start(&warm_start)?;
        let solution = match self {
            Self::CoordinateDescent(config) => cd::solve(config, problem, lambda, warm_start),
            Self::Ista(config) => ista::solve_ista(config, problem, lambda, warm_start),
            Self::Fista(config) => ista::solve_fista(config, problem, lambda, warm_start),
            Self::FistaBacktracking(config) => {
                ista::solve_fista_backtracking(config, problem, lambda, warm_start)
            }
            Self::Admm(config) => admm::solve(config, problem, lambda, warm_start),
        }?;
        if solution.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::NonFiniteCoefficients {
                solver: self.name(),
                lambda,
            });
        }
        Ok(solution)
    }
}

#[inline]
pub fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

/// Outer product of two vectors.
pub fn outer(left: &Array1<f64>, right: &Array1<f64>) -> Array2<f64> {
    Array2::from_shape_fn((left.len(), right.len()), |(j, k)| left[j] * right[k])
}

/// `‖x_j‖²·‖z_k‖²` for every coefficient.
pub fn coordinate_norms(x: ArrayView2<'_, f64>, z: ArrayView2<'_, f64>) -> Array2<f64> {
    let x_ss = x.map_axis(Axis(0), |c| c.dot(&c));
    let z_ss = z.map_axis(Axis(0), |c| c.dot(&c));
    outer(&x_ss, &z_ss)
}

/// Reciprocal of the Lipschitz constant `λmax(XᵗX)·λmax(ZᵗZ)` of the gradient.
pub fn lipschitz_step(x: ArrayView2<'_, f64>, z: ArrayView2<'_, f64>) -> Result<f64, SolverError> {
    let largest = |gram: Array2<f64>| -> Result<f64, SolverError> {
        let values = gram.eigvalsh(UPLO::Lower)?;
        Ok(values.iter().copied().fold(0.0, f64::max))
    };
    let lipschitz = largest(x.t().dot(&x))? * largest(z.t().dot(&z))?;
    Ok(if lipschitz > 0.0 { 1.0 / lipschitz } else { 1.0 })
}

/// Largest entry-wise change between two iterates, relative to the larger iterate.
pub(crate) fn relative_change(previous: &Array2<f64>, current: &Array2<f64>) -> f64 {
    let diff = (current - previous).iter().map(|v| v * v).sum::<f64>().sqrt();
    let size = current.iter().map(|v| v * v).sum::<f64>().sqrt().max(1.0);
    diff / size
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn mask_is_outer_product_of_flags() {
        let reg = RegularizationMask::from_flags(&[true, false], &[true, true, false]);
        assert_eq!(
            reg.mask,
            array![[true, true, false], [false, false, false]]
        );
        assert_eq!(reg.x_indices, vec![0]);
        assert_eq!(reg.z_indices, vec![0, 1]);
        assert_eq!(reg.num_penalized(), 2);
    }

    #[test]
    fn soft_threshold_shrinks_towards_zero() {
        assert_eq!(soft_threshold(3.0, 1.0), 2.0);
        assert_eq!(soft_threshold(-3.0, 1.0), -2.0);
        assert_eq!(soft_threshold(0.5, 1.0), 0.0);
        assert_eq!(soft_threshold(-1.0, 1.0), 0.0);
    }

    #[test]
    fn spectral_decomposition_diagonalizes_gram_matrices() {
        let x = array![[1.0, 2.0], [0.0, 1.0], [3.0, -1.0]];
        let z = array![[2.0, 0.0], [1.0, 1.0]];
        let y = array![[1.0, 0.0], [2.0, 1.0], [0.5, -1.0]];
        let spectral = SpectralDecomposition::compute(x.view(), y.view(), z.view()).unwrap();

        let gram = x.t().dot(&x);
        let rebuilt = spectral
            .qx
            .dot(&Array2::from_diag(&spectral.eigenvalues_x))
            .dot(&spectral.qx.t());
        for (a, b) in gram.iter().zip(rebuilt.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
        let expected_u = x.dot(&spectral.qx).t().dot(&y).dot(&z.dot(&spectral.qz));
        for (a, b) in spectral.rotated_response.iter().zip(expected_u.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
        assert_eq!(
            spectral.eigenvalue_products[[1, 0]],
            spectral.eigenvalues_x[1] * spectral.eigenvalues_z[0]
        );
    }

    #[test]
    fn solver_capabilities_are_explicit() {
        assert!(Solver::with_defaults(SolverKind::Admm).requires_spectral());
        assert!(!Solver::with_defaults(SolverKind::CoordinateDescent).requires_spectral());
        assert!(Solver::with_defaults(SolverKind::Ista).uses_fixed_step());
        assert!(Solver::with_defaults(SolverKind::Fista).uses_fixed_step());
        assert!(!Solver::with_defaults(SolverKind::FistaBacktracking).uses_fixed_step());
    }

    #[test]
    fn solver_config_parses_from_toml() {
        let solver: Solver = toml::from_str("kind = \"admm\"\nrho = 2.5\n").unwrap();
        match solver {
            Solver::Admm(config) => {
                assert_eq!(config.rho, 2.5);
                assert!(config.adaptive_rho);
            }
            other => panic!("Expected ADMM, got {other:?}"),
        }
    }
}
