//! # Data Container Module
//!
//! Holds the response matrix `Y` together with the row covariates `X` and the
//! column covariates `Z`, and tracks whether the first column of each design
//! matrix is an intercept. Everything downstream (standardization, the path
//! engine, cross-validation) reads its matrices through these types.
//!
//! - Shapes: `Y` is n×m, `X` is n×p, `Z` is m×q.
//! - Intercepts: when a flag is set, column 0 of the matching matrix is all ones.
//!   The fit orchestrator works on a reconciled copy, so a caller's container is
//!   only mutated when it is explicitly handed over as `&mut` (prediction and
//!   residual accessors).

use ndarray::{Array2, Axis, concatenate};
use std::path::Path;
use thiserror::Error;

/// Every failure that can occur while assembling or loading model data.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse delimited file: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Value '{value}' at row {row}, column {column} of '{path}' is not a number.")]
    NotNumeric {
        path: String,
        row: usize,
        column: usize,
        value: String,
    },
    #[error("Row {row} of '{path}' has {found} fields, but the first row has {expected}.")]
    RaggedRow {
        path: String,
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("The file '{0}' contains no data rows.")]
    Empty(String),
    #[error("Non-finite values (NaN or Infinity) were found in {0}. All model data must be finite.")]
    NonFiniteValuesFound(&'static str),
    #[error("{what} has {found} rows, but {expected} were expected.")]
    RowMismatch {
        what: &'static str,
        found: usize,
        expected: usize,
    },
    #[error("{0} is flagged as having an intercept, but its first column is not all ones.")]
    InterceptColumnInvalid(&'static str),
    #[error("{0} has no columns, so it cannot carry an intercept.")]
    NoColumns(&'static str),
    #[error("Index {index} is out of range for a dimension of length {len}.")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Row covariates `X` (n×p) and column covariates `Z` (m×q).
#[derive(Debug, Clone)]
pub struct Predictors {
    x: Array2<f64>,
    z: Array2<f64>,
    has_x_intercept: bool,
    has_z_intercept: bool,
}

impl Predictors {
    /// Validates the intercept flags against the matrices and bundles them.
    pub fn new(
        x: Array2<f64>,
        z: Array2<f64>,
        has_x_intercept: bool,
        has_z_intercept: bool,
    ) -> Result<Self, DataError> {
        validate_finite(&x, "X")?;
        validate_finite(&z, "Z")?;
        if has_x_intercept {
            validate_intercept_column(&x, "X")?;
        }
        if has_z_intercept {
            validate_intercept_column(&z, "Z")?;
        }
        Ok(Self {
            x,
            z,
            has_x_intercept,
            has_z_intercept,
        })
    }

    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    pub fn z(&self) -> &Array2<f64> {
        &self.z
    }

    pub fn has_x_intercept(&self) -> bool {
        self.has_x_intercept
    }

    pub fn has_z_intercept(&self) -> bool {
        self.has_z_intercept
    }

    /// Brings the intercept state of `X` in line with `wanted`.
    /// Returns `true` if the matrix had to be altered.
    pub fn set_x_intercept(&mut self, wanted: bool) -> bool {
        match (wanted, self.has_x_intercept) {
            (true, false) => {
                self.x = add_intercept(&self.x);
                self.has_x_intercept = true;
                true
            }
            (false, true) => {
                self.x = remove_intercept(&self.x);
                self.has_x_intercept = false;
                true
            }
            _ => false,
        }
    }

    /// Brings the intercept state of `Z` in line with `wanted`.
    /// Returns `true` if the matrix had to be altered.
    pub fn set_z_intercept(&mut self, wanted: bool) -> bool {
        match (wanted, self.has_z_intercept) {
            (true, false) => {
                self.z = add_intercept(&self.z);
                self.has_z_intercept = true;
                true
            }
            (false, true) => {
                self.z = remove_intercept(&self.z);
                self.has_z_intercept = false;
                true
            }
            _ => false,
        }
    }

    /// Keeps only the listed rows of `X` and the listed rows of `Z`.
    pub fn subset(&self, rows: &[usize], cols: &[usize]) -> Result<Self, DataError> {
        check_indices(rows, self.x.nrows())?;
        check_indices(cols, self.z.nrows())?;
        Ok(Self {
            x: self.x.select(Axis(0), rows),
            z: self.z.select(Axis(0), cols),
            has_x_intercept: self.has_x_intercept,
            has_z_intercept: self.has_z_intercept,
        })
    }
}

/// A response matrix paired with its predictors.
#[derive(Debug, Clone)]
pub struct RawData {
    response: Array2<f64>,
    predictors: Predictors,
}

impl RawData {
    /// Checks that `Y` is n×m for the n rows of `X` and the m rows of `Z`.
    pub fn new(response: Array2<f64>, predictors: Predictors) -> Result<Self, DataError> {
        validate_finite(&response, "Y")?;
        if predictors.x.nrows() != response.nrows() {
            return Err(DataError::RowMismatch {
                what: "X",
                found: predictors.x.nrows(),
                expected: response.nrows(),
            });
        }
        if predictors.z.nrows() != response.ncols() {
            return Err(DataError::RowMismatch {
                what: "Z",
                found: predictors.z.nrows(),
                expected: response.ncols(),
            });
        }
        Ok(Self {
            response,
            predictors,
        })
    }

    /// Number of row units (rows of `Y` and `X`).
    pub fn n(&self) -> usize {
        self.response.nrows()
    }

    /// Number of column units (columns of `Y`, rows of `Z`).
    pub fn m(&self) -> usize {
        self.response.ncols()
    }

    /// Number of `X` covariates, intercept included.
    pub fn p(&self) -> usize {
        self.predictors.x.ncols()
    }

    /// Number of `Z` covariates, intercept included.
    pub fn q(&self) -> usize {
        self.predictors.z.ncols()
    }

    pub fn x(&self) -> &Array2<f64> {
        self.predictors.x()
    }

    pub fn y(&self) -> &Array2<f64> {
        &self.response
    }

    pub fn z(&self) -> &Array2<f64> {
        self.predictors.z()
    }

    pub fn predictors(&self) -> &Predictors {
        &self.predictors
    }

    pub fn predictors_mut(&mut self) -> &mut Predictors {
        &mut self.predictors
    }

    /// Restricts `Y` to the given rows and columns, `X` to the rows, `Z` to the
    /// columns. Intercept flags carry over unchanged.
    pub fn subset(&self, rows: &[usize], cols: &[usize]) -> Result<Self, DataError> {
        let predictors = self.predictors.subset(rows, cols)?;
        let response = self
            .response
            .select(Axis(0), rows)
            .select(Axis(1), cols);
        Ok(Self {
            response,
            predictors,
        })
    }
}

/// Prepends a column of ones.
pub fn add_intercept(matrix: &Array2<f64>) -> Array2<f64> {
    let ones = Array2::<f64>::ones((matrix.nrows(), 1));
    // Both operands share the row count, so concatenation cannot fail.
    concatenate(Axis(1), &[ones.view(), matrix.view()]).unwrap_or_else(|_| matrix.clone())
}

/// Drops the first column.
pub fn remove_intercept(matrix: &Array2<f64>) -> Array2<f64> {
    matrix.slice(ndarray::s![.., 1..]).to_owned()
}

/// Reads a headerless, delimited numeric matrix.
pub fn load_matrix(path: &Path, delimiter: u8) -> Result<Array2<f64>, DataError> {
    let display = path.display().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut values = Vec::new();
    let mut ncols = None;
    let mut nrows = 0;
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let expected = *ncols.get_or_insert(record.len());
        if record.len() != expected {
            return Err(DataError::RaggedRow {
                path: display,
                row: row + 1,
                found: record.len(),
                expected,
            });
        }
        for (column, field) in record.iter().enumerate() {
            let value: f64 = field.parse().map_err(|_| DataError::NotNumeric {
                path: display.clone(),
                row: row + 1,
                column: column + 1,
                value: field.to_string(),
            })?;
            values.push(value);
        }
        nrows += 1;
    }

    let ncols = ncols.ok_or_else(|| DataError::Empty(display.clone()))?;
    let matrix = Array2::from_shape_vec((nrows, ncols), values)
        .map_err(|_| DataError::Empty(display))?;
    validate_finite(&matrix, "an input file")?;
    Ok(matrix)
}

fn validate_finite(matrix: &Array2<f64>, what: &'static str) -> Result<(), DataError> {
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValuesFound(what));
    }
    Ok(())
}

fn validate_intercept_column(matrix: &Array2<f64>, what: &'static str) -> Result<(), DataError> {
    if matrix.ncols() == 0 {
        return Err(DataError::NoColumns(what));
    }
    if matrix.column(0).iter().any(|&v| v != 1.0) {
        return Err(DataError::InterceptColumnInvalid(what));
    }
    Ok(())
}

fn check_indices(indices: &[usize], len: usize) -> Result<(), DataError> {
    match indices.iter().find(|&&i| i >= len) {
        Some(&index) => Err(DataError::IndexOutOfRange { index, len }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Write;

    #[test]
    fn intercept_toggling_round_trips() {
        let x = array![[2.0, 3.0], [4.0, 5.0]];
        let z = array![[1.0], [1.0], [1.0]];
        let mut predictors = Predictors::new(x.clone(), z, false, true).unwrap();

        assert!(predictors.set_x_intercept(true));
        assert_eq!(predictors.x(), &array![[1.0, 2.0, 3.0], [1.0, 4.0, 5.0]]);
        assert!(!predictors.set_x_intercept(true));
        assert!(predictors.set_x_intercept(false));
        assert_eq!(predictors.x(), &x);

        assert!(predictors.set_z_intercept(false));
        assert_eq!(predictors.z().ncols(), 0);
    }

    #[test]
    fn rejects_bad_intercept_and_shape() {
        let x = array![[2.0, 3.0], [1.0, 5.0]];
        let z = array![[1.0, 0.5]];
        match Predictors::new(x.clone(), z.clone(), true, false).unwrap_err() {
            DataError::InterceptColumnInvalid(what) => assert_eq!(what, "X"),
            other => panic!("Expected InterceptColumnInvalid, got {other:?}"),
        }

        let predictors = Predictors::new(x, z, false, true).unwrap();
        match RawData::new(Array2::zeros((3, 1)), predictors).unwrap_err() {
            DataError::RowMismatch { what, found, expected } => {
                assert_eq!(what, "X");
                assert_eq!(found, 2);
                assert_eq!(expected, 3);
            }
            other => panic!("Expected RowMismatch, got {other:?}"),
        }
    }

    #[test]
    fn subset_restricts_every_matrix() {
        let y = Array2::from_shape_fn((4, 3), |(i, j)| (10 * i + j) as f64);
        let x = Array2::from_shape_fn((4, 2), |(i, j)| (i + j) as f64);
        let z = Array2::from_shape_fn((3, 2), |(i, j)| (i * j) as f64);
        let data = RawData::new(y, Predictors::new(x, z, false, false).unwrap()).unwrap();

        let sub = data.subset(&[0, 2], &[1, 2]).unwrap();
        assert_eq!(sub.y(), &array![[1.0, 2.0], [21.0, 22.0]]);
        assert_eq!(sub.x(), &array![[0.0, 1.0], [2.0, 3.0]]);
        assert_eq!(sub.z(), &array![[0.0, 1.0], [0.0, 2.0]]);
        assert!(data.subset(&[7], &[0]).is_err());
    }

    #[test]
    fn loads_delimited_matrix() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1.0, 2.5").unwrap();
        writeln!(file, "-3, 4e-1").unwrap();
        let matrix = load_matrix(file.path(), b',').unwrap();
        assert_eq!(matrix, array![[1.0, 2.5], [-3.0, 0.4]]);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "1.0\tabc").unwrap();
        assert!(matches!(
            load_matrix(bad.path(), b'\t').unwrap_err(),
            DataError::NotNumeric { row: 1, column: 2, .. }
        ));
    }
}
