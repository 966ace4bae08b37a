use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::context::{ServiceCredentials, StorageCredentials};
use crate::storage::{InMemoryObjectStorage, ObjectStorage, S3ObjectStorage, StorageError, StorageResult};
use crate::training_service::{
    HttpTrainingService, InMemoryTrainingService, TrainingService, TrainingServiceError,
    TrainingServiceResult,
};

/// Creates service clients on demand
///
/// The orchestrator only connects to a service once a phase needs it, so a
/// run that stops early never touches the services it does not use.
#[async_trait]
pub trait ServiceConnector: Send + Sync {
    async fn connect_storage(&self, endpoint: &str) -> StorageResult<Arc<dyn ObjectStorage>>;

    async fn connect_training(&self) -> TrainingServiceResult<Arc<dyn TrainingService>>;

    /// Credentials the training service uses to reach the object store
    fn storage_credentials(&self) -> &StorageCredentials;
}

/// Connects to the real object store and training service
#[derive(Debug, Clone)]
pub struct RemoteConnector {
    credentials: ServiceCredentials,
}

impl RemoteConnector {
    pub fn new(credentials: ServiceCredentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl ServiceConnector for RemoteConnector {
    async fn connect_storage(&self, endpoint: &str) -> StorageResult<Arc<dyn ObjectStorage>> {
        let storage = S3ObjectStorage::connect(endpoint, &self.credentials.storage).await?;
        Ok(Arc::new(storage))
    }

    async fn connect_training(&self) -> TrainingServiceResult<Arc<dyn TrainingService>> {
        let service = HttpTrainingService::connect(&self.credentials.training).await?;
        Ok(Arc::new(service))
    }

    fn storage_credentials(&self) -> &StorageCredentials {
        &self.credentials.storage
    }
}

/// Hands out in-memory services and counts connection attempts
#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    pub storage: InMemoryObjectStorage,
    pub training: InMemoryTrainingService,
    credentials: StorageCredentials,
    storage_connects: Arc<AtomicUsize>,
    training_connects: Arc<AtomicUsize>,
    storage_unreachable: bool,
    training_unreachable: bool,
}

impl InMemoryConnector {
    pub fn new(storage: InMemoryObjectStorage, training: InMemoryTrainingService) -> Self {
        Self {
            storage,
            training,
            credentials: StorageCredentials {
                access_key_id: "test-access-key".to_string(),
                secret_access_key: "test-secret-key".to_string(),
            },
            storage_connects: Arc::new(AtomicUsize::new(0)),
            training_connects: Arc::new(AtomicUsize::new(0)),
            storage_unreachable: false,
            training_unreachable: false,
        }
    }

    pub fn with_unreachable_storage(mut self) -> Self {
        self.storage_unreachable = true;
        self
    }

    pub fn with_unreachable_training(mut self) -> Self {
        self.training_unreachable = true;
        self
    }

    pub fn storage_connects(&self) -> usize {
        self.storage_connects.load(Ordering::SeqCst)
    }

    pub fn training_connects(&self) -> usize {
        self.training_connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceConnector for InMemoryConnector {
    async fn connect_storage(&self, endpoint: &str) -> StorageResult<Arc<dyn ObjectStorage>> {
        self.storage_connects.fetch_add(1, Ordering::SeqCst);
        if self.storage_unreachable {
            return Err(StorageError::Service(format!("{} is unreachable", endpoint)));
        }
        Ok(Arc::new(self.storage.clone()))
    }

    async fn connect_training(&self) -> TrainingServiceResult<Arc<dyn TrainingService>> {
        self.training_connects.fetch_add(1, Ordering::SeqCst);
        if self.training_unreachable {
            return Err(TrainingServiceError::Connection(
                "Invalid API key".to_string(),
            ));
        }
        Ok(Arc::new(self.training.clone()))
    }

    fn storage_credentials(&self) -> &StorageCredentials {
        &self.credentials
    }
}
