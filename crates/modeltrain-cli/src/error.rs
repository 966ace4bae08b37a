//! Error types for modeltrain-cli

use modeltrain::ModeltrainError;
use modeltrain_core::ExitCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Error. {0}")]
    InvalidInput(String),

    #[error("Error. {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Modeltrain(#[from] ModeltrainError),
}

impl CliError {
    /// Process exit code reported for this error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::InvalidInput(_) | CliError::Io(_) => ExitCode::InvocationError,
            CliError::Modeltrain(e) => e.exit_code(),
        }
    }
}

impl From<modeltrain::PipelineError> for CliError {
    fn from(err: modeltrain::PipelineError) -> Self {
        CliError::Modeltrain(err.into())
    }
}
