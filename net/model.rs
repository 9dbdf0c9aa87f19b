// net/model.rs

//! # Fitted Model Accessors
//!
//! [`MlmNet`] is the result of a path fit: the coefficient tensor on the
//! original predictor scale, the lambdas it belongs to, the intercept-reconciled
//! data it was fit on, and the penalty mask. Lookups by lambda value, prediction
//! on new predictors, and TOML persistence live here.

use crate::data::{DataError, Predictors, RawData};
use crate::solvers::RegularizationMask;
use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Lambda {0:e} is not on the fitted path.")]
    LambdaNotFound(f64),
    #[error("{what} has {found} columns, but the model was fit with {expected}.")]
    DimensionMismatch {
        what: &'static str,
        found: usize,
        expected: usize,
    },
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("The stored model data is invalid: {0}")]
    InvalidData(#[from] DataError),
}

/// A penalty path fit by [`crate::fit::mlmnet`].
#[derive(Debug, Clone)]
pub struct MlmNet {
    coefficients: Array3<f64>,
    lambdas: Vec<f64>,
    data: RawData,
    reg: RegularizationMask,
}

/// On-disk layout of a fitted model. Scalars come first so the TOML output
/// keeps plain keys ahead of its tables.
#[derive(Serialize, Deserialize)]
struct ModelFile {
    lambdas: Vec<f64>,
    has_x_intercept: bool,
    has_z_intercept: bool,
    coefficients: Array3<f64>,
    reg: RegularizationMask,
    x: Array2<f64>,
    y: Array2<f64>,
    z: Array2<f64>,
}

impl MlmNet {
    pub(crate) fn new(
        coefficients: Array3<f64>,
        lambdas: Vec<f64>,
        data: RawData,
        reg: RegularizationMask,
    ) -> Self {
        Self {
            coefficients,
            lambdas,
            data,
            reg,
        }
    }

    /// Shape `(L, p, q)`, one slice per lambda in descending lambda order.
    pub fn coefficients(&self) -> &Array3<f64> {
        &self.coefficients
    }

    pub fn lambdas(&self) -> &[f64] {
        &self.lambdas
    }

    /// The data the model was fit on, with intercepts as the fit used them.
    pub fn data(&self) -> &RawData {
        &self.data
    }

    pub fn reg(&self) -> &RegularizationMask {
        &self.reg
    }

    /// Position of `lambda` on the path, matched with relative tolerance `√ε`.
    pub fn lambda_index(&self, lambda: f64) -> Result<usize, ModelError> {
        let tolerance = f64::EPSILON.sqrt();
        self.lambdas
            .iter()
            .position(|&l| (l - lambda).abs() <= tolerance * l.abs().max(lambda.abs()))
            .ok_or(ModelError::LambdaNotFound(lambda))
    }

    /// The p×q coefficient matrix for `lambda`.
    pub fn coefficients_at(&self, lambda: f64) -> Result<ArrayView2<'_, f64>, ModelError> {
        let index = self.lambda_index(lambda)?;
        Ok(self.coefficients.index_axis(Axis(0), index))
    }

    /// `X B Zᵗ` for new predictors at `lambda`.
    ///
    /// The predictors' intercept columns are first added or removed to match
    /// the fit, which mutates the caller's container.
    pub fn predict(&self, lambda: f64, predictors: &mut Predictors) -> Result<Array2<f64>, ModelError> {
        let b = self.coefficients_at(lambda)?;
        let fitted = self.data.predictors();
        if predictors.set_x_intercept(fitted.has_x_intercept()) {
            log::info!(
                "The X intercept column was {} to match the fitted model.",
                if fitted.has_x_intercept() { "added" } else { "removed" }
            );
        }
        if predictors.set_z_intercept(fitted.has_z_intercept()) {
            log::info!(
                "The Z intercept column was {} to match the fitted model.",
                if fitted.has_z_intercept() { "added" } else { "removed" }
            );
        }
        check_columns("X", predictors.x().ncols(), b.nrows())?;
        check_columns("Z", predictors.z().ncols(), b.ncols())?;
        Ok(predictors.x().dot(&b).dot(&predictors.z().t()))
    }

    /// In-sample predictions at `lambda`.
    pub fn fitted(&self, lambda: f64) -> Result<Array2<f64>, ModelError> {
        let b = self.coefficients_at(lambda)?;
        Ok(self.data.x().dot(&b).dot(&self.data.z().t()))
    }

    /// `Y − X B Zᵗ` for `data` at `lambda`, reconciling its intercepts first.
    pub fn residuals(&self, lambda: f64, data: &mut RawData) -> Result<Array2<f64>, ModelError> {
        let predicted = self.predict(lambda, data.predictors_mut())?;
        Ok(data.y() - &predicted)
    }

    /// Writes the model to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let predictors = self.data.predictors();
        let snapshot = ModelFile {
            lambdas: self.lambdas.clone(),
            has_x_intercept: predictors.has_x_intercept(),
            has_z_intercept: predictors.has_z_intercept(),
            coefficients: self.coefficients.clone(),
            reg: self.reg.clone(),
            x: predictors.x().clone(),
            y: self.data.y().clone(),
            z: predictors.z().clone(),
        };
        let toml_string = toml::to_string_pretty(&snapshot)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Reads a model written by [`MlmNet::save`], re-validating its data.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let file: ModelFile = toml::from_str(&toml_string)?;
        let predictors = Predictors::new(file.x, file.z, file.has_x_intercept, file.has_z_intercept)?;
        let data = RawData::new(file.y, predictors)?;

        let (num_lambdas, p, q) = file.coefficients.dim();
        if num_lambdas != file.lambdas.len() {
            return Err(ModelError::DimensionMismatch {
                what: "The coefficient tensor",
                found: num_lambdas,
                expected: file.lambdas.len(),
            });
        }
        check_columns("X", data.p(), p)?;
        check_columns("Z", data.q(), q)?;
        if file.reg.mask.dim() != (p, q) {
            return Err(ModelError::DimensionMismatch {
                what: "The regularization mask",
                found: file.reg.mask.ncols(),
                expected: q,
            });
        }

        Ok(Self::new(file.coefficients, file.lambdas, data, file.reg))
    }
}

fn check_columns(what: &'static str, found: usize, expected: usize) -> Result<(), ModelError> {
    if found != expected {
        return Err(ModelError::DimensionMismatch {
            what,
            found,
            expected,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// A two-lambda model with intercepts on both sides.
    fn toy_model() -> MlmNet {
        let x = array![[1.0, 0.5], [1.0, -1.0], [1.0, 2.0]];
        let z = array![[1.0, 3.0], [1.0, -2.0]];
        let y = array![[1.0, 2.0], [0.0, -1.0], [4.0, 1.0]];
        let data = RawData::new(y, Predictors::new(x, z, true, true).unwrap()).unwrap();
        let mut coefficients = Array3::<f64>::zeros((2, 2, 2));
        coefficients[[0, 0, 0]] = 1.0;
        coefficients
            .index_axis_mut(Axis(0), 1)
            .assign(&array![[1.0, 0.5], [2.0, -0.25]]);
        let reg = RegularizationMask::from_flags(&[false, true], &[false, true]);
        MlmNet::new(coefficients, vec![2.0, 0.5], data, reg)
    }

    #[test]
    fn looks_up_lambdas_with_relative_tolerance() {
        let model = toy_model();
        assert_eq!(model.lambda_index(0.5).unwrap(), 1);
        assert_eq!(model.lambda_index(0.5 * (1.0 + 1e-12)).unwrap(), 1);
        assert!(matches!(
            model.coefficients_at(0.49).unwrap_err(),
            ModelError::LambdaNotFound(l) if l == 0.49
        ));
        assert_eq!(model.coefficients_at(2.0).unwrap()[[0, 0]], 1.0);
    }

    #[test]
    fn predict_adds_missing_intercepts() {
        let model = toy_model();
        let mut predictors = Predictors::new(array![[0.5], [4.0]], array![[3.0]], false, false).unwrap();
        let predicted = model.predict(0.5, &mut predictors).unwrap();

        assert!(predictors.has_x_intercept());
        assert!(predictors.has_z_intercept());
        assert_eq!(predicted.dim(), (2, 1));
        // Row [1, 0.5] · B · [1, 3]ᵗ
        assert_abs_diff_eq!(predicted[[0, 0]], 1.0 + 1.5 + 1.0 - 0.375, epsilon = 1e-12);
    }

    #[test]
    fn fitted_and_residuals_agree() {
        let model = toy_model();
        let mut data = model.data().clone();
        let fitted = model.fitted(0.5).unwrap();
        let residuals = model.residuals(0.5, &mut data).unwrap();
        let rebuilt = &fitted + &residuals;
        for (a, b) in rebuilt.iter().zip(model.data().y().iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn predict_rejects_wrong_column_counts() {
        let model = toy_model();
        let mut predictors = Predictors::new(array![[0.5, 1.0]], array![[3.0]], false, false).unwrap();
        assert!(matches!(
            model.predict(2.0, &mut predictors).unwrap_err(),
            ModelError::DimensionMismatch { what: "X", found: 3, expected: 2 }
        ));
    }

    #[test]
    fn save_and_load_preserve_the_path() {
        let model = toy_model();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.toml");
        model.save(&path).unwrap();

        let loaded = MlmNet::load(&path).unwrap();
        assert_eq!(loaded.lambdas(), model.lambdas());
        assert_eq!(loaded.coefficients(), model.coefficients());
        assert_eq!(loaded.reg(), model.reg());
        assert_eq!(loaded.data().y(), model.data().y());
        assert!(loaded.data().predictors().has_z_intercept());
    }
}
