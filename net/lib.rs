#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

//! Penalized matrix linear models.
//!
//! Fits `Y ≈ X B Zᵗ` under an L1 penalty along a descending lambda path, with
//! warm starts between consecutive penalties, optional predictor
//! standardization, and cross-validation over paired row/column folds.

pub mod cv;
pub mod data;
pub mod fit;
pub mod model;
pub mod path;
pub mod solvers;
pub mod standardize;

pub use cv::{CvOptions, MlmNetCv, make_folds, mlmnet_cv, mlmnet_cv_cols, mlmnet_cv_k, mlmnet_cv_rows};
pub use data::{DataError, Predictors, RawData};
pub use fit::{EstimationError, FitOptions, RunConfig, calibrated_step_size, mlmnet};
pub use model::{MlmNet, ModelError};
pub use path::{PathOutput, run_path, run_path_from};
pub use solvers::{PathSolver, RegularizationMask, Solver, SolverError, SolverKind, SolverProblem};
