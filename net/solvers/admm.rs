//! ADMM for the matrix lasso.
//!
//! Splits the problem into a smooth least-squares block `B` and a sparse copy
//! `C` tied by `B = C`. The `B`-update solves the Sylvester-like system
//! `XᵗX B ZᵗZ + ρB = XᵗYZ + ρ(C − W)` in closed form through the precomputed
//! eigendecompositions, so no factorization happens inside the lambda loop.

use super::{SolverError, SolverProblem};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmmConfig {
    /// Initial augmented Lagrangian parameter.
    pub rho: f64,
    /// Rebalance `rho` when primal and dual residuals drift apart.
    pub adaptive_rho: bool,
    /// Factor applied to `rho` on each rebalance.
    pub tau: f64,
    /// Ratio between residuals that triggers a rebalance.
    pub mu: f64,
    pub tolerance: f64,
    pub max_iter: usize,
}

impl Default for AdmmConfig {
    fn default() -> Self {
        Self {
            rho: 1.0,
            adaptive_rho: true,
            tau: 2.0,
            mu: 10.0,
            tolerance: 1e-6,
            max_iter: 10_000,
        }
    }
}

impl AdmmConfig {
    pub fn validate(&self) -> Result<(), SolverError> {
        let invalid = |reason: String| SolverError::InvalidConfig {
            solver: "ADMM",
            reason,
        };
        if !(self.rho.is_finite() && self.rho > 0.0) {
            return Err(invalid(format!("rho must be positive, got {}", self.rho)));
        }
        if !(self.tau.is_finite() && self.tau > 1.0) {
            return Err(invalid(format!("tau must exceed 1, got {}", self.tau)));
        }
        if !(self.mu.is_finite() && self.mu > 1.0) {
            return Err(invalid(format!("mu must exceed 1, got {}", self.mu)));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(invalid(format!("tolerance must be positive, got {}", self.tolerance)));
        }
        if self.max_iter == 0 {
            return Err(invalid("max_iter must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn frobenius(matrix: &Array2<f64>) -> f64 {
    matrix.iter().map(|v| v * v).sum::<f64>().sqrt()
}

pub(super) fn solve(
    config: &AdmmConfig,
    problem: &SolverProblem<'_>,
    lambda: f64,
    warm_start: Array2<f64>,
) -> Result<Array2<f64>, SolverError> {
    let spectral = problem
        .spectral
        .ok_or(SolverError::MissingSpectralInputs("ADMM"))?;
    let qx = &spectral.qx;
    let qz = &spectral.qz;

    let mut rho = config.rho;
    let mut sparse = warm_start;
    let mut dual = Array2::<f64>::zeros(sparse.raw_dim());

    for _ in 0..config.max_iter {
        let rotated = qx.t().dot(&(&sparse - &dual)).dot(qz);
        let numerator = &spectral.rotated_response + &(rotated * rho);
        let denominator = &spectral.eigenvalue_products + rho;
        let smooth = qx.dot(&(numerator / denominator)).dot(&qz.t());

        let previous = sparse;
        sparse = &smooth + &dual;
        problem.proximal(&mut sparse, lambda / rho);
        dual = dual + &smooth - &sparse;

        let primal_residual = frobenius(&(&smooth - &sparse));
        let dual_residual = rho * frobenius(&(&sparse - &previous));
        let primal_scale = frobenius(&smooth).max(frobenius(&sparse)).max(1.0);
        let dual_scale = (rho * frobenius(&dual)).max(1.0);
        if primal_residual <= config.tolerance * primal_scale
            && dual_residual <= config.tolerance * dual_scale
        {
            return Ok(sparse);
        }

        if config.adaptive_rho {
            if primal_residual > config.mu * dual_residual {
                rho *= config.tau;
                dual /= config.tau;
            } else if dual_residual > config.mu * primal_residual {
                rho /= config.tau;
                dual *= config.tau;
            }
        }
    }

    log::warn!(
        "ADMM reached {} iterations at lambda = {:e} without converging.",
        config.max_iter,
        lambda
    );
    Ok(sparse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvers::{CdConfig, PathSolver, RegularizationMask, Solver, SpectralDecomposition};
    use ndarray::array;

    #[test]
    fn matches_coordinate_descent() {
        let x = array![[1.0, 0.2], [0.3, 1.0], [0.5, -0.4], [1.2, 0.1]];
        let z = array![[1.0, 0.0], [0.4, 1.0], [-0.2, 0.6]];
        let y = array![
            [1.0, 0.5, -0.3],
            [0.2, 1.4, 0.8],
            [0.6, -0.1, -0.5],
            [1.1, 0.7, 0.0]
        ];
        let reg = RegularizationMask::from_flags(&[false, true], &[true, true]);
        let spectral = SpectralDecomposition::compute(x.view(), y.view(), z.view()).unwrap();
        let problem = SolverProblem {
            x: x.view(),
            y: y.view(),
            z: z.view(),
            reg: &reg,
            norms: None,
            spectral: Some(&spectral),
            step_size: None,
        };
        let lambda = 0.4;
        let reference = Solver::CoordinateDescent(CdConfig::new(1e-20, 100_000, false, 0).unwrap())
            .solve(&problem, lambda, Array2::zeros((2, 2)))
            .unwrap();
        let config = AdmmConfig {
            tolerance: 1e-11,
            max_iter: 100_000,
            ..AdmmConfig::default()
        };
        let b = Solver::Admm(config)
            .solve(&problem, lambda, Array2::zeros((2, 2)))
            .unwrap();
        for (a, r) in b.iter().zip(reference.iter()) {
            assert!((a - r).abs() < 1e-6, "ADMM {a} vs coordinate descent {r}");
        }
    }

    #[test]
    fn requires_spectral_inputs() {
        let x = array![[1.0]];
        let reg = RegularizationMask::from_flags(&[true], &[true]);
        let problem = SolverProblem {
            x: x.view(),
            y: x.view(),
            z: x.view(),
            reg: &reg,
            norms: None,
            spectral: None,
            step_size: None,
        };
        let err = Solver::Admm(AdmmConfig::default())
            .solve(&problem, 1.0, Array2::zeros((1, 1)))
            .unwrap_err();
        assert!(matches!(err, SolverError::MissingSpectralInputs(_)));
    }
}
