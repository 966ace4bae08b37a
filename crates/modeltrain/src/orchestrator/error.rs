use modeltrain_core::{ExitCode, JobId, JobState};
use std::path::PathBuf;
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::storage::StorageError;
use crate::training_service::TrainingServiceError;

/// A pipeline phase failed
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invocation error. {0}")]
    Invocation(String),

    #[error("\"{0}\" is an unknown training id")]
    UnknownJob(JobId),

    #[error("Cloud Object Storage preparation failed: {0}")]
    StorageConnect(#[source] StorageError),

    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: StorageError,
    },

    #[error("{0}")]
    Preparation(String),

    #[error("Packaging failed: {0}")]
    Packaging(#[source] ArchiveError),

    #[error("{0}")]
    TrainingConnect(#[source] TrainingServiceError),

    #[error("Training id could not be verified: {0}")]
    JobLookup(#[source] TrainingServiceError),

    #[error("{0}")]
    Submission(#[source] TrainingServiceError),

    #[error("Model training monitoring failed: {0}")]
    Monitoring(#[source] TrainingServiceError),

    #[error("Model training {job_id} was canceled")]
    Canceled {
        job_id: JobId,
        cancel_error: Option<String>,
    },

    #[error("Model training {job_id} ended with status \"{state}\". The training log was saved in {}", .log.display())]
    TrainingFailed {
        job_id: JobId,
        state: JobState,
        log: PathBuf,
    },

    #[error("The location of the training results for {0} could not be determined")]
    ResultsUnavailable(JobId),

    #[error("The location of the training results could not be determined: {0}")]
    ResultsLookup(#[source] TrainingServiceError),

    #[error("Download of \"{file}\" from bucket \"{bucket}\" failed: {source}")]
    Download {
        file: String,
        bucket: String,
        #[source]
        source: StorageError,
    },

    #[error("Extraction of the trained model archive failed: {0}")]
    Extraction(#[source] ArchiveError),

    #[error("Trained model files could not be copied from {} to {}: {error}", .from.display(), .to.display())]
    Relocation {
        from: PathBuf,
        to: PathBuf,
        #[source]
        error: std::io::Error,
    },
}

impl PipelineError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            PipelineError::Invocation(_) | PipelineError::UnknownJob(_) => {
                ExitCode::InvocationError
            }
            PipelineError::StorageConnect(_)
            | PipelineError::Storage { .. }
            | PipelineError::Preparation(_)
            | PipelineError::Packaging(_)
            | PipelineError::TrainingConnect(_)
            | PipelineError::JobLookup(_) => ExitCode::PreProcessingFailed,
            PipelineError::Submission(_)
            | PipelineError::Monitoring(_)
            | PipelineError::Canceled { .. }
            | PipelineError::TrainingFailed { .. } => ExitCode::TrainingFailed,
            PipelineError::ResultsUnavailable(_)
            | PipelineError::ResultsLookup(_)
            | PipelineError::Download { .. } => ExitCode::DownloadFailed,
            PipelineError::Extraction(_) => ExitCode::ExtractionFailed,
            PipelineError::Relocation { .. } => ExitCode::CopyFailed,
        }
    }
}
