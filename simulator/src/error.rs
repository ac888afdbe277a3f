use std::path::PathBuf;
use thiserror::Error;

pub type SimulationResult<T> = Result<T, SimulationError>;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Unknown Particle Type: {0}")]
    UnknownParticleType(String),
    #[error("Invalid Configuration: {field} {reason}")]
    InvalidConfig { field: &'static str, reason: String },
    #[error("Malformed Table at line {line}: {reason}")]
    TableParse { line: usize, reason: String },
    #[error("Malformed Input File at line {line}: {reason}")]
    InputParse { line: usize, reason: String },
    #[error("Missing Input Parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid Json Configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid Poisson Distribution: {0}")]
    Poisson(#[from] rand_distr::PoissonError),
    #[error("Invalid Normal Distribution: {0}")]
    Normal(#[from] rand_distr::NormalError),
    #[error("Invalid Exponential Distribution: {0}")]
    Exp(#[from] rand_distr::ExpError),
    #[error("Invalid Weighted Distribution: {0}")]
    Weighted(#[from] rand::distr::weighted::Error),
}

impl SimulationError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
