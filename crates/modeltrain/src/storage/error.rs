use std::path::PathBuf;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Bucket \"{0}\" was not found")]
    BucketNotFound(String),

    #[error("Bucket \"{0}\" exists but access is denied")]
    AccessDenied(String),

    #[error("\"{0}\" is not a valid bucket name")]
    InvalidBucketName(String),

    #[error("Bucket \"{0}\" already exists")]
    AlreadyExists(String),

    #[error("Object \"{key}\" was not found in bucket \"{bucket}\"")]
    ObjectNotFound { bucket: String, key: String },

    #[error("File {} was not found", .0.display())]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Service(String),
}

impl StorageError {
    /// Errors that name a bucket the caller cannot use as-is
    pub fn is_bucket_rejection(&self) -> bool {
        matches!(
            self,
            StorageError::AccessDenied(_)
                | StorageError::InvalidBucketName(_)
                | StorageError::AlreadyExists(_)
        )
    }
}
