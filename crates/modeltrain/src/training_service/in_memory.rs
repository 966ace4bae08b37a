use async_trait::async_trait;
use modeltrain_core::{JobId, JobState, ResultsReference, TrainingStatus};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{
    DefinitionMetadata, RunMetadata, TrainingService, TrainingServiceError, TrainingServiceResult,
};

/// One scripted answer to a status request
#[derive(Debug, Clone, PartialEq)]
pub enum StatusStep {
    State(JobState),
    /// Response without a status object
    Missing,
    ServerError,
}

/// One scripted answer to a results reference request
#[derive(Debug, Clone, PartialEq)]
pub enum ResultsStep {
    Ready(ResultsReference),
    NotReady,
    ServerError,
}

#[derive(Debug, Default)]
struct State {
    known_jobs: Vec<JobId>,
    status_script: VecDeque<StatusStep>,
    results_script: VecDeque<ResultsStep>,
    submissions: Vec<(DefinitionMetadata, RunMetadata)>,
    status_calls: usize,
    results_calls: usize,
    cancel_calls: usize,
    next_id: usize,
    reject_start: bool,
    reject_cancel: bool,
}

/// Scripted training service
///
/// Answers come from the configured scripts in order; the last step of a
/// script repeats once it is reached. Every call is counted.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTrainingService {
    state: Arc<Mutex<State>>,
}

fn server_error() -> TrainingServiceError {
    TrainingServiceError::Api {
        status: 503,
        message: "Service temporarily unavailable".to_string(),
    }
}

fn not_found(id: &JobId) -> TrainingServiceError {
    TrainingServiceError::Api {
        status: 404,
        message: format!("Training run {} was not found", id),
    }
}

/// Pop the next step, keeping the last one in place
fn next_step<T: Clone>(script: &mut VecDeque<T>) -> Option<T> {
    if script.len() > 1 {
        script.pop_front()
    } else {
        script.front().cloned()
    }
}

impl InMemoryTrainingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_job(self, id: &JobId) -> Self {
        self.state.lock().await.known_jobs.push(id.clone());
        self
    }

    pub async fn with_statuses(self, states: impl IntoIterator<Item = StatusStep>) -> Self {
        self.state.lock().await.status_script = states.into_iter().collect();
        self
    }

    pub async fn with_results(self, steps: impl IntoIterator<Item = ResultsStep>) -> Self {
        self.state.lock().await.results_script = steps.into_iter().collect();
        self
    }

    pub async fn rejecting_start(self) -> Self {
        self.state.lock().await.reject_start = true;
        self
    }

    pub async fn rejecting_cancel(self) -> Self {
        self.state.lock().await.reject_cancel = true;
        self
    }

    pub async fn status_calls(&self) -> usize {
        self.state.lock().await.status_calls
    }

    pub async fn results_calls(&self) -> usize {
        self.state.lock().await.results_calls
    }

    pub async fn cancel_calls(&self) -> usize {
        self.state.lock().await.cancel_calls
    }

    pub async fn submissions(&self) -> Vec<(DefinitionMetadata, RunMetadata)> {
        self.state.lock().await.submissions.clone()
    }
}

#[async_trait]
impl TrainingService for InMemoryTrainingService {
    async fn start_training(
        &self,
        code_archive: &Path,
        definition: &DefinitionMetadata,
        run: &RunMetadata,
    ) -> TrainingServiceResult<JobId> {
        if !code_archive.is_file() {
            return Err(TrainingServiceError::StartFailed(Box::new(
                TrainingServiceError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} does not exist", code_archive.display()),
                )),
            )));
        }

        let mut state = self.state.lock().await;
        if state.reject_start {
            return Err(TrainingServiceError::StartFailed(Box::new(
                TrainingServiceError::Api {
                    status: 400,
                    message: "Invalid training definition".to_string(),
                },
            )));
        }

        state.next_id += 1;
        let id = JobId::parse(format!("training-{:04}", state.next_id))
            .map_err(|e| TrainingServiceError::InvalidResponse(e.to_string()))?;
        state.known_jobs.push(id.clone());
        state.submissions.push((definition.clone(), run.clone()));
        Ok(id)
    }

    async fn is_known_job(&self, id: &JobId) -> TrainingServiceResult<bool> {
        Ok(self.state.lock().await.known_jobs.contains(id))
    }

    async fn get_status(
        &self,
        id: &JobId,
        ignore_server_error: bool,
    ) -> TrainingServiceResult<Option<TrainingStatus>> {
        let mut state = self.state.lock().await;
        state.status_calls += 1;
        if !state.known_jobs.contains(id) {
            return Err(not_found(id));
        }
        match next_step(&mut state.status_script) {
            Some(StatusStep::State(job_state)) => Ok(Some(TrainingStatus::with_state(job_state))),
            Some(StatusStep::Missing) | None => Ok(None),
            Some(StatusStep::ServerError) if ignore_server_error => Ok(None),
            Some(StatusStep::ServerError) => Err(server_error()),
        }
    }

    async fn get_results_reference(
        &self,
        id: &JobId,
        ignore_server_error: bool,
    ) -> TrainingServiceResult<Option<ResultsReference>> {
        let mut state = self.state.lock().await;
        state.results_calls += 1;
        if !state.known_jobs.contains(id) {
            return Err(not_found(id));
        }
        match next_step(&mut state.results_script) {
            Some(ResultsStep::Ready(reference)) => Ok(Some(reference)),
            Some(ResultsStep::NotReady) | None => Ok(None),
            Some(ResultsStep::ServerError) if ignore_server_error => Ok(None),
            Some(ResultsStep::ServerError) => Err(server_error()),
        }
    }

    async fn cancel(&self, id: &JobId, not_found_ok: bool) -> TrainingServiceResult<()> {
        let mut state = self.state.lock().await;
        state.cancel_calls += 1;
        if state.reject_cancel {
            return Err(server_error());
        }
        if !state.known_jobs.contains(id) && !not_found_ok {
            return Err(not_found(id));
        }
        state.status_script = VecDeque::from([StatusStep::State(JobState::Canceled)]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobId {
        JobId::parse("training-abc").unwrap()
    }

    #[tokio::test]
    async fn test_status_script_repeats_last_step() {
        let service = InMemoryTrainingService::new()
            .with_job(&job())
            .await
            .with_statuses([
                StatusStep::State(JobState::Pending),
                StatusStep::State(JobState::Running),
            ])
            .await;

        let mut states = Vec::new();
        for _ in 0..3 {
            let status = service.get_status(&job(), true).await.unwrap().unwrap();
            states.push(status.state);
        }
        assert_eq!(states, vec![JobState::Pending, JobState::Running, JobState::Running]);
        assert_eq!(service.status_calls().await, 3);
    }

    #[tokio::test]
    async fn test_server_errors_are_tolerated_on_request() {
        let service = InMemoryTrainingService::new()
            .with_job(&job())
            .await
            .with_statuses([StatusStep::ServerError])
            .await;

        assert_eq!(service.get_status(&job(), true).await.unwrap(), None);
        assert!(service.get_status(&job(), false).await.unwrap_err().is_server_error());
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let service = InMemoryTrainingService::new();
        assert!(service.cancel(&job(), true).await.is_ok());
        assert!(service.cancel(&job(), false).await.unwrap_err().is_not_found());
        assert_eq!(service.cancel_calls().await, 2);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let service = InMemoryTrainingService::new();
        assert!(!service.is_known_job(&job()).await.unwrap());
    }
}
