//! Common types for modeltrain-core

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{CoreError, Result};

/// Opaque training run identifier assigned by the remote training service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create from a string handed out by the service or typed by the user
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.contains(char::is_whitespace) || trimmed.contains('/') {
            return Err(CoreError::InvalidJobId(s));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline command selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Remove local training artifacts and stop
    Clean,
    /// Stage data and package the model-building code, skip training
    Prepare,
    /// Prepare, train and fetch the training log
    Train,
    /// Prepare, train and post-process the trained model
    Package,
}

impl Command {
    pub const ALL: [Command; 4] = [
        Command::Clean,
        Command::Prepare,
        Command::Train,
        Command::Package,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Clean => "clean",
            Command::Prepare => "prepare",
            Command::Train => "train",
            Command::Package => "package",
        }
    }

    /// One-line help text shown in the usage listing
    pub fn summary(&self) -> &'static str {
        match self {
            Command::Clean => "removes local model training artifacts",
            Command::Prepare => "generates model training artifacts but skips model training",
            Command::Train => "generates model training artifacts and trains the model",
            Command::Package => {
                "generates model training artifacts, trains the model, and performs post processing"
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        Command::ALL
            .into_iter()
            .find(|command| command.as_str() == normalized)
            .ok_or_else(|| CoreError::InvalidCommand(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parse_is_case_insensitive() {
        assert_eq!("Package".parse::<Command>().unwrap(), Command::Package);
        assert_eq!(" clean ".parse::<Command>().unwrap(), Command::Clean);
        assert_eq!(
            "deploy".parse::<Command>(),
            Err(CoreError::InvalidCommand("deploy".to_string()))
        );
    }

    #[test]
    fn test_job_id_rejects_blank_values() {
        assert!(JobId::parse("").is_err());
        assert!(JobId::parse("   ").is_err());
        assert!(JobId::parse("training a").is_err());
        assert_eq!(JobId::parse(" training-Ax5PvBRWg ").unwrap().as_str(), "training-Ax5PvBRWg");
    }
}
