//! Column standardization of design matrices and the inverse map for coefficients.

use crate::fit::notice;
use ndarray::{Array1, Array2, Array3, Axis};

/// Original column means and scales of a standardized design matrix.
/// The intercept column, when present, reports mean 0 and scale 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Standardization {
    pub means: Array1<f64>,
    pub scales: Array1<f64>,
}

impl Standardization {
    /// The factor each column was actually divided by. Columns whose scale
    /// was zero or non-finite were only centered.
    pub fn effective_scale(&self, column: usize) -> f64 {
        let scale = self.scales[column];
        if is_degenerate(scale) { 1.0 } else { scale }
    }

    /// The p×p matrix `A` with `X_std = X · A` for a design whose first column
    /// is an intercept.
    fn intercept_transform(&self) -> Array2<f64> {
        let p = self.means.len();
        let mut transform = Array2::<f64>::zeros((p, p));
        if p == 0 {
            return transform;
        }
        transform[[0, 0]] = 1.0;
        for j in 1..p {
            let scale = self.effective_scale(j);
            transform[[0, j]] = -self.means[j] / scale;
            transform[[j, j]] = 1.0 / scale;
        }
        transform
    }
}

/// Centers and scales every non-intercept column of `matrix` in place.
///
/// Columns are brought to zero mean and unit sample standard deviation. A column
/// with zero (or non-finite) spread is centered but not divided; its scale is
/// still reported as computed so callers can spot it.
pub fn standardize(matrix: &mut Array2<f64>, has_intercept: bool, verbose: bool) -> Standardization {
    let ncols = matrix.ncols();
    let mut means = Array1::<f64>::zeros(ncols);
    let mut scales = Array1::<f64>::ones(ncols);
    let first = usize::from(has_intercept && ncols > 0);

    for (j, mut column) in matrix.axis_iter_mut(Axis(1)).enumerate().skip(first) {
        let mean = column.mean().unwrap_or(0.0);
        let scale = if column.len() > 1 { column.std(1.0) } else { f64::NAN };
        column.mapv_inplace(|v| v - mean);
        if is_degenerate(scale) {
            notice(
                verbose,
                &format!("Column {j} has zero or undefined spread (scale {scale:e}); it was centered but left unscaled."),
            );
        } else {
            column.mapv_inplace(|v| v / scale);
        }
        means[j] = mean;
        scales[j] = scale;
    }

    Standardization { means, scales }
}

/// Maps a path of coefficients fit on standardized predictors back to the
/// original predictor scale, in place.
///
/// With intercepts on both sides every slice becomes `Ax · B · Azᵗ`, where the
/// intercept row and column absorb the re-centering. Without both intercepts the
/// centering cannot be absorbed, and each coefficient is only divided by the
/// scales of its `X` and `Z` columns.
pub fn backtransform(
    coefficients: &mut Array3<f64>,
    x_std: &Standardization,
    z_std: &Standardization,
    has_x_intercept: bool,
    has_z_intercept: bool,
) {
    if has_x_intercept && has_z_intercept {
        let ax = x_std.intercept_transform();
        let az_t = z_std.intercept_transform().reversed_axes();
        for mut slice in coefficients.axis_iter_mut(Axis(0)) {
            let original = ax.dot(&slice).dot(&az_t);
            slice.assign(&original);
        }
        return;
    }

    for mut slice in coefficients.axis_iter_mut(Axis(0)) {
        for ((j, k), value) in slice.indexed_iter_mut() {
            *value /= x_std.effective_scale(j) * z_std.effective_scale(k);
        }
    }
}

fn is_degenerate(scale: f64) -> bool {
    !scale.is_finite() || scale == 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn standardizes_non_intercept_columns() {
        let mut x = array![[1.0, 1.0, 10.0], [1.0, 2.0, 20.0], [1.0, 3.0, 60.0]];
        let std = standardize(&mut x, true, false);

        assert_eq!(std.means[0], 0.0);
        assert_eq!(std.scales[0], 1.0);
        assert_abs_diff_eq!(std.means[1], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(std.scales[1], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(std.means[2], 30.0, epsilon = 1e-12);

        assert!(x.column(0).iter().all(|&v| v == 1.0));
        for j in 1..3 {
            let column = x.column(j);
            assert_abs_diff_eq!(column.mean().unwrap(), 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(column.std(1.0), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn constant_column_is_centered_only() {
        let mut x = array![[4.0, 1.0], [4.0, 2.0], [4.0, 6.0]];
        let std = standardize(&mut x, false, true);

        assert_eq!(std.scales[0], 0.0);
        assert_eq!(std.effective_scale(0), 1.0);
        assert!(x.column(0).iter().all(|&v| v == 0.0));
        assert!(x.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn backtransform_with_intercepts_reproduces_linear_predictor() {
        let x_raw = array![[1.0, 0.5, 3.0], [1.0, -1.0, 2.0], [1.0, 2.0, 7.0], [1.0, 0.0, -1.0]];
        let z_raw = array![[1.0, 2.0], [1.0, 5.0], [1.0, -4.0]];
        let mut x = x_raw.clone();
        let mut z = z_raw.clone();
        let x_std = standardize(&mut x, true, false);
        let z_std = standardize(&mut z, true, false);

        let b_std = array![[0.3, -1.2], [2.0, 0.7], [-0.4, 1.1]];
        let expected = x.dot(&b_std).dot(&z.t());

        let mut tensor = b_std.clone().insert_axis(Axis(0));
        backtransform(&mut tensor, &x_std, &z_std, true, true);
        let b = tensor.index_axis(Axis(0), 0);
        let actual = x_raw.dot(&b).dot(&z_raw.t());

        for (a, e) in actual.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *e, epsilon = 1e-10);
        }
    }

    #[test]
    fn backtransform_without_both_intercepts_only_rescales() {
        let x_std = Standardization {
            means: array![0.0, 3.0],
            scales: array![1.0, 2.0],
        };
        let z_std = Standardization {
            means: array![5.0],
            scales: array![4.0],
        };
        let mut tensor = array![[[8.0], [8.0]]];
        backtransform(&mut tensor, &x_std, &z_std, true, false);
        assert_eq!(tensor, array![[[2.0], [1.0]]]);
    }
}
