//! Training job state as reported by the remote training service

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a remote training run
///
/// `Unknown` covers a missing or unrecognized state and is never terminal;
/// the monitor keeps polling when it sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Error,
    Canceled,
    #[default]
    #[serde(other)]
    Unknown,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Error | JobState::Canceled)
    }

    /// Terminal state that did not produce a trained model
    pub fn is_failure(&self) -> bool {
        matches!(self, JobState::Error | JobState::Canceled)
    }

    /// Single character progress marker
    pub fn indicator(&self) -> char {
        match self {
            JobState::Pending => 'p',
            JobState::Running => 'r',
            JobState::Completed => 'c',
            JobState::Error => 'e',
            JobState::Canceled => 'c',
            JobState::Unknown => '?',
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Error => "error",
            JobState::Canceled => "canceled",
            JobState::Unknown => "?",
        };
        f.write_str(name)
    }
}

/// Status payload of a training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingStatus {
    #[serde(default)]
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TrainingStatus {
    pub fn with_state(state: JobState) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }
}

/// Location of a training run's output inside the results bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsReference {
    pub bucket: String,
    pub model_location: String,
}
