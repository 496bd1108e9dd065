use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Task set extraction failed after {attempts} attempts: {last_error}")]
    ExtractionFailed { attempts: usize, last_error: String },

    #[error("Dependency graph invalid: {0}")]
    DependencyGraphInvalid(String),

    #[error("Stage {stage} failed for task {task}: {message}")]
    StageExecution {
        task: String,
        stage: String,
        message: String,
    },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run failed: {0}")]
    RunFailed(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Oracle binary not found: {0}")]
    OracleNotFound(String),

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },
}

impl Error {
    /// Whether this failure class is absorbed by a retry or a fallback
    /// somewhere below the run's caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MalformedPayload(_) | Error::DependencyGraphInvalid(_) | Error::Json(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
