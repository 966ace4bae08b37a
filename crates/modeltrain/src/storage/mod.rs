pub mod error;
pub mod in_memory;
pub mod s3;
pub mod traits;

pub use error::{StorageError, StorageResult};
pub use in_memory::InMemoryObjectStorage;
pub use s3::S3ObjectStorage;
pub use traits::{MAX_DELETE_BATCH, ObjectStorage, object_key};
