//! Proximal gradient solvers: ISTA, FISTA, and FISTA with backtracking.
//!
//! The smooth part `½‖Y − X B Zᵗ‖²` has gradient `−Xᵗ R Z` with Lipschitz
//! constant `λmax(XᵗX)·λmax(ZᵗZ)`; the proximal map of the penalty is
//! entry-wise soft-thresholding restricted to penalized coefficients.

use super::{SolverError, SolverProblem, lipschitz_step, relative_change};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Settings shared by ISTA and FISTA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxGradConfig {
    /// Used when the orchestrator did not calibrate one. `None` falls back to
    /// the reciprocal Lipschitz constant.
    pub step_size: Option<f64>,
    pub tolerance: f64,
    pub max_iter: usize,
}

impl Default for ProxGradConfig {
    fn default() -> Self {
        Self {
            step_size: None,
            tolerance: 1e-7,
            max_iter: 10_000,
        }
    }
}

impl ProxGradConfig {
    pub fn new(step_size: Option<f64>, tolerance: f64, max_iter: usize) -> Result<Self, SolverError> {
        let config = Self {
            step_size,
            tolerance,
            max_iter,
        };
        config.validate("proximal gradient")?;
        Ok(config)
    }

    pub fn validate(&self, solver: &'static str) -> Result<(), SolverError> {
        if let Some(step) = self.step_size {
            if !(step.is_finite() && step > 0.0) {
                return Err(SolverError::InvalidConfig {
                    solver,
                    reason: format!("step_size must be positive, got {step}"),
                });
            }
        }
        validate_stopping(solver, self.tolerance, self.max_iter)
    }

    fn resolve_step(&self, problem: &SolverProblem<'_>) -> Result<f64, SolverError> {
        match problem.step_size.or(self.step_size) {
            Some(step) => Ok(step),
            None => lipschitz_step(problem.x, problem.z),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktrackingConfig {
    /// Initial trial step at every lambda.
    pub step_size: f64,
    /// Factor in (0, 1) applied to the step until the quadratic bound holds.
    pub gamma: f64,
    pub tolerance: f64,
    pub max_iter: usize,
}

impl Default for BacktrackingConfig {
    fn default() -> Self {
        Self {
            step_size: 1.0,
            gamma: 0.5,
            tolerance: 1e-7,
            max_iter: 10_000,
        }
    }
}

impl BacktrackingConfig {
    pub fn new(step_size: f64, gamma: f64, tolerance: f64, max_iter: usize) -> Result<Self, SolverError> {
        let config = Self {
            step_size,
            gamma,
            tolerance,
            max_iter,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SolverError> {
        const SOLVER: &str = "FISTA with backtracking";
        if !(self.step_size.is_finite() && self.step_size > 0.0) {
            return Err(SolverError::InvalidConfig {
                solver: SOLVER,
                reason: format!("step_size must be positive, got {}", self.step_size),
            });
        }
        if !(self.gamma > 0.0 && self.gamma < 1.0) {
            return Err(SolverError::InvalidConfig {
                solver: SOLVER,
                reason: format!("gamma must lie in (0, 1), got {}", self.gamma),
            });
        }
        validate_stopping(SOLVER, self.tolerance, self.max_iter)
    }
}

fn validate_stopping(solver: &'static str, tolerance: f64, max_iter: usize) -> Result<(), SolverError> {
    if !(tolerance.is_finite() && tolerance > 0.0) {
        return Err(SolverError::InvalidConfig {
            solver,
            reason: format!("tolerance must be positive, got {tolerance}"),
        });
    }
    if max_iter == 0 {
        return Err(SolverError::InvalidConfig {
            solver,
            reason: "max_iter must be at least 1".to_string(),
        });
    }
    Ok(())
}

/// One proximal gradient step from `point`.
fn prox_step(problem: &SolverProblem<'_>, point: &Array2<f64>, step: f64, lambda: f64) -> Array2<f64> {
    let gradient = problem.negative_gradient(&problem.residual(point));
    let mut next = point + &(gradient * step);
    problem.proximal(&mut next, step * lambda);
    next
}

fn report_stall(solver: &str, max_iter: usize, lambda: f64) {
    log::warn!("{solver} reached {max_iter} iterations at lambda = {lambda:e} without converging.");
}

pub(super) fn solve_ista(
    config: &ProxGradConfig,
    problem: &SolverProblem<'_>,
    lambda: f64,
    mut b: Array2<f64>,
) -> Result<Array2<f64>, SolverError> {
    let step = config.resolve_step(problem)?;
    for _ in 0..config.max_iter {
        let next = prox_step(problem, &b, step, lambda);
        let change = relative_change(&b, &next);
        b = next;
        if change < config.tolerance {
            return Ok(b);
        }
    }
    report_stall("ISTA", config.max_iter, lambda);
    Ok(b)
}

pub(super) fn solve_fista(
    config: &ProxGradConfig,
    problem: &SolverProblem<'_>,
    lambda: f64,
    mut b: Array2<f64>,
) -> Result<Array2<f64>, SolverError> {
    let step = config.resolve_step(problem)?;
    let mut extrapolated = b.clone();
    let mut t = 1.0_f64;

    for _ in 0..config.max_iter {
        let next = prox_step(problem, &extrapolated, step, lambda);
        let t_next = 0.5 * (1.0 + (1.0 + 4.0 * t * t).sqrt());
        let momentum = (t - 1.0) / t_next;
        extrapolated = &next + &((&next - &b) * momentum);

        let change = relative_change(&b, &next);
        b = next;
        t = t_next;
        if change < config.tolerance {
            return Ok(b);
        }
    }
    report_stall("FISTA", config.max_iter, lambda);
    Ok(b)
}

pub(super) fn solve_fista_backtracking(
    config: &BacktrackingConfig,
    problem: &SolverProblem<'_>,
    lambda: f64,
    mut b: Array2<f64>,
) -> Result<Array2<f64>, SolverError> {
    let smooth = |point: &Array2<f64>| 0.5 * problem.residual(point).iter().map(|r| r * r).sum::<f64>();

    let mut step = config.step_size;
    let mut extrapolated = b.clone();
    let mut t = 1.0_f64;

    for _ in 0..config.max_iter {
        let residual = problem.residual(&extrapolated);
        let base = 0.5 * residual.iter().map(|r| r * r).sum::<f64>();
        let gradient = problem.negative_gradient(&residual);

        let next = loop {
            let mut candidate = &extrapolated + &(&gradient * step);
            problem.proximal(&mut candidate, step * lambda);
            let displacement = &candidate - &extrapolated;
            // Quadratic upper bound of the smooth part around the extrapolated point.
            let bound = base - (&gradient * &displacement).sum()
                + displacement.iter().map(|d| d * d).sum::<f64>() / (2.0 * step);
            let slack = 1e-14 * base.max(1.0);
            if smooth(&candidate) <= bound + slack || step < f64::EPSILON {
                break candidate;
            }
            step *= config.gamma;
        };

        let t_next = 0.5 * (1.0 + (1.0 + 4.0 * t * t).sqrt());
        let momentum = (t - 1.0) / t_next;
        extrapolated = &next + &((&next - &b) * momentum);

        let change = relative_change(&b, &next);
        b = next;
        t = t_next;
        if change < config.tolerance {
            return Ok(b);
        }
    }
    report_stall("FISTA with backtracking", config.max_iter, lambda);
    Ok(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvers::{CdConfig, PathSolver, RegularizationMask, Solver};
    use ndarray::array;

    fn small_problem() -> (Array2<f64>, Array2<f64>, Array2<f64>) {
        let x = array![[1.0, 0.2], [0.3, 1.0], [0.5, -0.4], [1.2, 0.1]];
        let z = array![[1.0, 0.0], [0.4, 1.0], [-0.2, 0.6]];
        let y = array![
            [1.0, 0.5, -0.3],
            [0.2, 1.4, 0.8],
            [0.6, -0.1, -0.5],
            [1.1, 0.7, 0.0]
        ];
        (x, y, z)
    }

    #[test]
    fn proximal_gradient_solvers_agree_with_coordinate_descent() {
        let (x, y, z) = small_problem();
        let reg = RegularizationMask::from_flags(&[true, true], &[true, true]);
        let problem = SolverProblem {
            x: x.view(),
            y: y.view(),
            z: z.view(),
            reg: &reg,
            norms: None,
            spectral: None,
            step_size: None,
        };
        let lambda = 0.3;
        let reference = Solver::CoordinateDescent(CdConfig::new(1e-20, 100_000, false, 0).unwrap())
            .solve(&problem, lambda, Array2::zeros((2, 2)))
            .unwrap();

        let tight = ProxGradConfig::new(None, 1e-12, 200_000).unwrap();
        let candidates = [
            Solver::Ista(tight.clone()),
            Solver::Fista(tight),
            Solver::FistaBacktracking(BacktrackingConfig::new(1.0, 0.5, 1e-12, 200_000).unwrap()),
        ];
        for solver in candidates {
            let b = solver.solve(&problem, lambda, Array2::zeros((2, 2))).unwrap();
            for (a, r) in b.iter().zip(reference.iter()) {
                assert!(
                    (a - r).abs() < 1e-6,
                    "{} disagrees with coordinate descent: {} vs {}",
                    solver.name(),
                    a,
                    r
                );
            }
        }
    }

    #[test]
    fn rejects_invalid_settings() {
        assert!(ProxGradConfig::new(Some(-1.0), 1e-6, 10).is_err());
        assert!(BacktrackingConfig::new(1.0, 1.5, 1e-6, 10).is_err());
        assert!(BacktrackingConfig::new(1.0, 0.5, 1e-6, 0).is_err());
    }
}
