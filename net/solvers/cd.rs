//! Coordinate descent for the matrix lasso.
//!
//! The residual `R = Y − X B Zᵗ` is kept up to date as single coefficients
//! move, so each update costs one `x_jᵗ R z_k` contraction and one rank-one
//! residual correction. After a full sweep the solver iterates over the active
//! (non-zero) set until it settles, then confirms with another full sweep.

use super::{SolverError, SolverProblem, soft_threshold};
use ndarray::{Array2, ArrayView1};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdConfig {
    /// Sweeps stop once `max norm_jk·ΔB²` falls below this fraction of `½‖Y‖²`.
    pub tolerance: f64,
    /// Upper bound on coordinate sweeps (full and active-set sweeps combined).
    pub max_iter: usize,
    /// Visit coordinates in a shuffled order on every sweep.
    pub random_order: bool,
    /// Seed for the coordinate order; each solve restarts from it.
    pub seed: u64,
}

impl Default for CdConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-7,
            max_iter: 100_000,
            random_order: true,
            seed: 42,
        }
    }
}

impl CdConfig {
    pub fn new(tolerance: f64, max_iter: usize, random_order: bool, seed: u64) -> Result<Self, SolverError> {
        let config = Self {
            tolerance,
            max_iter,
            random_order,
            seed,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SolverError> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(SolverError::InvalidConfig {
                solver: "coordinate descent",
                reason: format!("tolerance must be positive, got {}", self.tolerance),
            });
        }
        if self.max_iter == 0 {
            return Err(SolverError::InvalidConfig {
                solver: "coordinate descent",
                reason: "max_iter must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

struct Sweeper<'p, 'a> {
    problem: &'p SolverProblem<'a>,
    norms: Array2<f64>,
    residual: Array2<f64>,
    lambda: f64,
}

impl Sweeper<'_, '_> {
    /// Updates one coefficient and returns `norm_jk·ΔB²`.
    fn update(&mut self, b: &mut Array2<f64>, j: usize, k: usize) -> f64 {
        let norm = self.norms[[j, k]];
        if norm <= 0.0 {
            return 0.0;
        }
        let problem = self.problem;
        let xj = problem.x.column(j);
        let zk = problem.z.column(k);
        let old = b[[j, k]];

        let partial = xj.dot(&self.residual.dot(&zk)) + norm * old;
        let new = if problem.reg.is_penalized(j, k) {
            soft_threshold(partial, self.lambda) / norm
        } else {
            partial / norm
        };

        let delta = new - old;
        if delta == 0.0 {
            return 0.0;
        }
        b[[j, k]] = new;
        subtract_rank_one(&mut self.residual, delta, xj, zk);
        norm * delta * delta
    }

    fn sweep(&mut self, b: &mut Array2<f64>, coordinates: &[(usize, usize)]) -> f64 {
        coordinates
            .iter()
            .map(|&(j, k)| self.update(b, j, k))
            .fold(0.0, f64::max)
    }
}

fn subtract_rank_one(residual: &mut Array2<f64>, delta: f64, xj: ArrayView1<'_, f64>, zk: ArrayView1<'_, f64>) {
    for (mut row, &xi) in residual.rows_mut().into_iter().zip(xj.iter()) {
        let scale = delta * xi;
        if scale != 0.0 {
            row.scaled_add(-scale, &zk);
        }
    }
}

pub(super) fn solve(
    config: &CdConfig,
    problem: &SolverProblem<'_>,
    lambda: f64,
    mut b: Array2<f64>,
) -> Result<Array2<f64>, SolverError> {
    let (p, q) = problem.shape();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let threshold = config.tolerance * 0.5 * problem.y.iter().map(|v| v * v).sum::<f64>();

    let mut sweeper = Sweeper {
        problem,
        norms: problem.coordinate_norms().into_owned(),
        residual: problem.residual(&b),
        lambda,
    };

    let mut all: Vec<(usize, usize)> = (0..p).flat_map(|j| (0..q).map(move |k| (j, k))).collect();
    let mut iterations = 0;

    while iterations < config.max_iter {
        if config.random_order {
            all.shuffle(&mut rng);
        }
        let change = sweeper.sweep(&mut b, &all);
        iterations += 1;
        if change <= threshold {
            return Ok(b);
        }

        let mut active: Vec<(usize, usize)> = all
            .iter()
            .copied()
            .filter(|&(j, k)| b[[j, k]] != 0.0)
            .collect();
        while iterations < config.max_iter {
            if config.random_order {
                active.shuffle(&mut rng);
            }
            let change = sweeper.sweep(&mut b, &active);
            iterations += 1;
            if change <= threshold {
                break;
            }
        }
    }

    log::warn!(
        "Coordinate descent stopped after {} sweeps at lambda = {:e} without meeting tolerance {:e}.",
        config.max_iter,
        lambda,
        config.tolerance
    );
    Ok(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvers::{RegularizationMask, SolverProblem};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn orthonormal_design_gives_soft_thresholded_projection() {
        // With orthonormal columns the lasso solution is S(XᵗYZ, λ) entry-wise.
        let x = array![[1.0, 0.0], [0.0, 1.0], [0.0, 0.0]];
        let z = array![[1.0], [0.0]];
        let y = array![[3.0, 0.1], [-0.5, 0.2], [7.0, 7.0]];
        let reg = RegularizationMask::from_flags(&[true, true], &[true]);
        let problem = SolverProblem {
            x: x.view(),
            y: y.view(),
            z: z.view(),
            reg: &reg,
            norms: None,
            spectral: None,
            step_size: None,
        };
        let config = CdConfig::new(1e-12, 1000, false, 0).unwrap();
        let b = solve(&config, &problem, 1.0, Array2::zeros((2, 1))).unwrap();
        assert_abs_diff_eq!(b[[0, 0]], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(b[[1, 0]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn unpenalized_coefficients_are_not_shrunk() {
        let x = array![[1.0, 0.0], [0.0, 1.0]];
        let z = array![[1.0]];
        let y = array![[0.5], [0.5]];
        let reg = RegularizationMask::from_flags(&[false, true], &[true]);
        let problem = SolverProblem {
            x: x.view(),
            y: y.view(),
            z: z.view(),
            reg: &reg,
            norms: None,
            spectral: None,
            step_size: None,
        };
        let b = solve(&CdConfig::default(), &problem, 10.0, Array2::zeros((2, 1))).unwrap();
        assert_abs_diff_eq!(b[[0, 0]], 0.5, epsilon = 1e-9);
        assert_eq!(b[[1, 0]], 0.0);
    }

    #[test]
    fn rejects_nonpositive_tolerance() {
        assert!(CdConfig::new(0.0, 10, true, 1).is_err());
        assert!(CdConfig::new(1e-6, 0, true, 1).is_err());
    }
}
