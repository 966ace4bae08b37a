//! Error types for modeltrain-core

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoreError {
    #[error("\"{0}\" is not a valid command")]
    InvalidCommand(String),

    #[error("Invalid job id: {0}")]
    InvalidJobId(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
