#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use ndarray::Array2;
use serde::Serialize;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use mlmnet::data::load_matrix;
use mlmnet::{
    Predictors, RawData, RunConfig, Solver, SolverKind, mlmnet as fit_path, mlmnet_cv_k,
};

#[derive(Clone, Copy, ValueEnum)]
pub enum SolverCli {
    Cd,
    Ista,
    Fista,
    FistaBacktracking,
    Admm,
}

impl From<SolverCli> for SolverKind {
    fn from(solver: SolverCli) -> Self {
        match solver {
            SolverCli::Cd => SolverKind::CoordinateDescent,
            SolverCli::Ista => SolverKind::Ista,
            SolverCli::Fista => SolverKind::Fista,
            SolverCli::FistaBacktracking => SolverKind::FistaBacktracking,
            SolverCli::Admm => SolverKind::Admm,
        }
    }
}

/// Inputs shared by every subcommand.
#[derive(Args)]
pub struct InputArgs {
    /// Headerless delimited file with the n×p row covariates X
    #[arg(long, value_name = "FILE")]
    pub x: PathBuf,

    /// Headerless delimited file with the n×m response Y
    #[arg(long, value_name = "FILE")]
    pub y: PathBuf,

    /// Headerless delimited file with the m×q column covariates Z
    #[arg(long, value_name = "FILE")]
    pub z: PathBuf,

    /// Field delimiter of the input files
    #[arg(long, default_value_t = ',')]
    pub delimiter: char,

    /// The first column of X is already an intercept
    #[arg(long)]
    pub x_has_intercept: bool,

    /// The first column of Z is already an intercept
    #[arg(long)]
    pub z_has_intercept: bool,

    /// Penalties to fit, comma separated (any order; duplicates are dropped)
    #[arg(long, value_delimiter = ',', required = true, num_args = 1..)]
    pub lambdas: Vec<f64>,

    /// TOML run configuration with [solver], [fit] and [cv] tables
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Solver to use with default settings, overriding the configuration file
    #[arg(long, value_enum)]
    pub solver: Option<SolverCli>,
}

#[derive(Parser)]
#[command(
    name = "mlmnet",
    about = "Penalized matrix linear models fit along a lambda path",
    long_about = "Fits Y ≈ X B Zᵗ under an L1 penalty for a sequence of lambdas, \
                 with warm starts, optional standardization and cross-validation."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fit the penalty path (outputs: mlmnet_model.toml)")]
    Fit {
        #[command(flatten)]
        input: InputArgs,

        /// Where to write the fitted model
        #[arg(long, default_value = "mlmnet_model.toml")]
        output: PathBuf,
    },
    #[command(about = "Cross-validate the penalty path over row and column folds")]
    Cv {
        #[command(flatten)]
        input: InputArgs,

        /// Number of row folds
        #[arg(long, default_value_t = 5)]
        row_folds: usize,

        /// Number of column folds (1 keeps every column in every fold)
        #[arg(long, default_value_t = 1)]
        col_folds: usize,

        /// Optional TOML report of the per-fold results
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },
}

/// Cross-validation summary written by `mlmnet cv --report`.
#[derive(Serialize)]
struct CvReport {
    lambdas: Vec<f64>,
    mean_mse: Vec<f64>,
    mean_prop_zero: Vec<f64>,
    mse: Array2<f64>,
    prop_zero: Array2<f64>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Some(Commands::Fit { input, output }) => run_fit(&input, &output),
        Some(Commands::Cv {
            input,
            row_folds,
            col_folds,
            report,
        }) => run_cv(&input, row_folds, col_folds, report.as_deref()),
        None => Cli::command().print_help().map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_run_config(input: &InputArgs) -> Result<RunConfig, Box<dyn Error>> {
    let mut config = match &input.config {
        Some(path) => {
            log::info!("Reading run configuration from {}", path.display());
            RunConfig::load(path)?
        }
        None => RunConfig::default(),
    };
    if let Some(solver) = input.solver {
        config.solver = Solver::with_defaults(solver.into());
    }
    Ok(config)
}

fn load_data(input: &InputArgs) -> Result<RawData, Box<dyn Error>> {
    if !input.delimiter.is_ascii() {
        return Err(format!("Delimiter '{}' must be a single ASCII character", input.delimiter).into());
    }
    let delimiter = input.delimiter as u8;

    let x = load_matrix(&input.x, delimiter)?;
    let y = load_matrix(&input.y, delimiter)?;
    let z = load_matrix(&input.z, delimiter)?;
    let predictors = Predictors::new(x, z, input.x_has_intercept, input.z_has_intercept)?;
    let data = RawData::new(y, predictors)?;
    log::info!(
        "Loaded Y ({}x{}), X with {} column(s), Z with {} column(s)",
        data.n(),
        data.m(),
        data.p(),
        data.q()
    );
    Ok(data)
}

fn run_fit(input: &InputArgs, output: &Path) -> Result<(), Box<dyn Error>> {
    let config = load_run_config(input)?;
    let data = load_data(input)?;

    let fit = fit_path(&config.solver, &data, &input.lambdas, &config.fit)?;
    for (l, &lambda) in fit.lambdas().iter().enumerate() {
        let slice = fit.coefficients().index_axis(ndarray::Axis(0), l);
        let nonzero = slice.iter().filter(|&&v| v != 0.0).count();
        println!("lambda = {lambda:<12.6e} non-zero coefficients: {nonzero}");
    }

    fit.save(output)?;
    println!("Model saved to: {}", output.display());
    Ok(())
}

fn run_cv(
    input: &InputArgs,
    row_folds: usize,
    col_folds: usize,
    report: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let config = load_run_config(input)?;
    let data = load_data(input)?;

    let cv = mlmnet_cv_k(
        &config.solver,
        &data,
        &input.lambdas,
        row_folds,
        col_folds,
        &config.fit,
        &config.cv,
    )?;

    let mean_mse = cv.mean_mse();
    let mean_prop_zero = cv.mean_prop_zero();
    println!("{:>14} {:>14} {:>14}", "lambda", "mean MSE", "prop. zero");
    for (l, &lambda) in cv.lambdas().iter().enumerate() {
        println!(
            "{:>14.6e} {:>14.6e} {:>14.4}",
            lambda, mean_mse[l], mean_prop_zero[l]
        );
    }

    if let Some(path) = report {
        let summary = CvReport {
            lambdas: cv.lambdas().to_vec(),
            mean_mse: mean_mse.to_vec(),
            mean_prop_zero: mean_prop_zero.to_vec(),
            mse: cv.mse().clone(),
            prop_zero: cv.prop_zero().clone(),
        };
        fs::write(path, toml::to_string_pretty(&summary)?)?;
        println!("Cross-validation report saved to: {}", path.display());
    }
    Ok(())
}
