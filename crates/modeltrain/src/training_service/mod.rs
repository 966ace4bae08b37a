pub mod error;
pub mod http;
pub mod in_memory;
pub mod metadata;
pub mod traits;

pub use error::{TrainingServiceError, TrainingServiceResult};
pub use http::HttpTrainingService;
pub use in_memory::{InMemoryTrainingService, ResultsStep, StatusStep};
pub use metadata::{DefinitionMetadata, RunMetadata};
pub use traits::TrainingService;
