use async_trait::async_trait;
use modeltrain_core::{JobId, ResultsReference, TrainingStatus};
use std::path::Path;

use super::{DefinitionMetadata, RunMetadata, TrainingServiceResult};

/// Lifecycle operations of a remote training service
#[async_trait]
pub trait TrainingService: Send + Sync {
    /// Store the definition and its code archive, then start a run that
    /// references it
    async fn start_training(
        &self,
        code_archive: &Path,
        definition: &DefinitionMetadata,
        run: &RunMetadata,
    ) -> TrainingServiceResult<JobId>;

    /// `false` when the service does not know `id`
    async fn is_known_job(&self, id: &JobId) -> TrainingServiceResult<bool>;

    /// Current status. With `ignore_server_error`, a 5xx response yields
    /// `None` instead of an error.
    async fn get_status(
        &self,
        id: &JobId,
        ignore_server_error: bool,
    ) -> TrainingServiceResult<Option<TrainingStatus>>;

    /// Where the run stores its results; `None` while the service has not
    /// published a location yet (or on a tolerated 5xx)
    async fn get_results_reference(
        &self,
        id: &JobId,
        ignore_server_error: bool,
    ) -> TrainingServiceResult<Option<ResultsReference>>;

    async fn cancel(&self, id: &JobId, not_found_ok: bool) -> TrainingServiceResult<()>;
}
