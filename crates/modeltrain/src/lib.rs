//! Remote model training orchestration
//!
//! Validates a training configuration, stages training data and
//! model-building code in object storage, submits a training run to a
//! remote training service, monitors it and collects the trained model.

pub mod archive;
pub mod config;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod storage;
pub mod training_service;

// Re-export core types
pub use modeltrain_core::{
    Command, CoreError, ExitCode, JobId, JobState, ResultsReference, TrainingStatus,
};

pub use archive::{ArchiveBuilder, ArchiveError, MAX_ARCHIVE_SIZE};
pub use config::{ConfigError, TrainingConfig};
pub use context::{ContextError, ServiceCredentials};
pub use error::{ModeltrainError, Result};
pub use orchestrator::{
    MonitorSignal, PipelineError, RemoteConnector, ServiceConnector, SignalSender,
    TrainingOrchestrator, signal_channel,
};
pub use storage::{ObjectStorage, StorageError};
pub use training_service::{TrainingService, TrainingServiceError};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::orchestrator::{TrainingOrchestrator, signal_channel};
    pub use modeltrain_core::{Command, ExitCode, JobId};
}
