//! Error types for modeltrain crate

use modeltrain_core::ExitCode;
use thiserror::Error;

use crate::config::ConfigError;
use crate::context::ContextError;
use crate::orchestrator::PipelineError;

#[derive(Error, Debug)]
pub enum ModeltrainError {
    #[error("Invocation error. {0}")]
    Core(#[from] modeltrain_core::CoreError),

    #[error("Error. {0}")]
    Context(#[from] ContextError),

    #[error("Error. {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),
}

impl ModeltrainError {
    /// Process exit code reported for this error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ModeltrainError::Core(_) => ExitCode::InvocationError,
            ModeltrainError::Context(_) => ExitCode::EnvironmentError,
            ModeltrainError::Config(_) => ExitCode::ConfigurationError,
            ModeltrainError::Pipeline(e) => e.exit_code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModeltrainError>;
