use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{StorageError, StorageResult};

/// Maximum number of keys a single bulk delete request may carry
pub const MAX_DELETE_BATCH: usize = 1000;

/// Object storage operations used by the training pipeline
///
/// Implementations provide the primitive calls; batching, key composition
/// and local path handling live in the provided methods so every backend
/// honours the same contract.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// List bucket names, at most `limit` when given
    async fn list_buckets(&self, limit: Option<usize>) -> StorageResult<Vec<String>>;

    /// Create a bucket. An existing, accessible bucket is a success when
    /// `exist_ok` is set.
    async fn create_bucket(&self, name: &str, exist_ok: bool) -> StorageResult<bool>;

    /// True if no object key in `bucket` starts with `prefix`
    async fn is_bucket_empty(&self, bucket: &str, prefix: &str) -> StorageResult<bool>;

    /// All object keys in `bucket` starting with `prefix`
    async fn list_objects(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>>;

    /// Issue one bulk delete request. Never called with more than
    /// [`MAX_DELETE_BATCH`] keys.
    async fn delete_batch(&self, bucket: &str, keys: &[String]) -> StorageResult<()>;

    /// Store the content of `local_path` under `key`
    async fn upload_object(&self, local_path: &Path, bucket: &str, key: &str) -> StorageResult<()>;

    /// Write the object stored under `key` to `target`
    async fn download_object(&self, bucket: &str, key: &str, target: &Path) -> StorageResult<()>;

    /// Delete `keys` in batches of at most [`MAX_DELETE_BATCH`]
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StorageResult<()> {
        debug!("delete_objects({}, {} keys)", bucket, keys.len());
        for batch in keys.chunks(MAX_DELETE_BATCH) {
            self.delete_batch(bucket, batch).await?;
        }
        Ok(())
    }

    /// Remove every object starting with `prefix`
    async fn clear_bucket(&self, bucket: &str, prefix: &str) -> StorageResult<()> {
        let keys = self.list_objects(bucket, prefix).await?;
        self.delete_objects(bucket, &keys).await
    }

    /// Upload a local file. The key is `key_prefix/key_name`; `key_name`
    /// defaults to the local path.
    async fn upload_file(
        &self,
        local_path: &Path,
        bucket: &str,
        key_prefix: Option<&str>,
        key_name: Option<&str>,
    ) -> StorageResult<()> {
        if !local_path.is_file() {
            return Err(StorageError::FileNotFound(local_path.to_path_buf()));
        }
        let name = match key_name {
            Some(name) => name.to_string(),
            None => local_path.to_string_lossy().into_owned(),
        };
        let key = object_key(key_prefix, &name);
        debug!("upload_file({}, {}, {})", local_path.display(), bucket, key);
        self.upload_object(local_path, bucket, &key).await
    }

    /// Download `key_prefix/file_name` into `target_dir`, creating the
    /// directory if necessary. Returns the local path.
    async fn download_file(
        &self,
        bucket: &str,
        file_name: &str,
        target_dir: &Path,
        key_prefix: Option<&str>,
    ) -> StorageResult<PathBuf> {
        let key = object_key(key_prefix, file_name);
        let target = target_dir.join(file_name);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!("download_file({}, {}, {})", bucket, key, target.display());
        self.download_object(bucket, &key, &target).await?;
        Ok(target)
    }
}

/// Join a logical prefix and a name into an object key
pub fn object_key(prefix: Option<&str>, name: &str) -> String {
    match prefix.map(|p| p.trim_end_matches('/')) {
        Some(prefix) if !prefix.is_empty() => format!("{}/{}", prefix, name),
        _ => name.to_string(),
    }
}
