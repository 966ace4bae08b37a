use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{MAX_DELETE_BATCH, ObjectStorage, StorageError, StorageResult};

type Buckets = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// In-memory implementation of ObjectStorage
///
/// Keeps every request it served so tests can assert on batch sizes and
/// upload keys.
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStorage {
    buckets: Arc<RwLock<Buckets>>,
    denied: Arc<RwLock<HashSet<String>>>,
    delete_batches: Arc<RwLock<Vec<usize>>>,
    uploads: Arc<RwLock<Vec<(String, String)>>>,
}

impl InMemoryObjectStorage {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes under `key`, creating the bucket if needed
    pub async fn put_object(&self, bucket: &str, key: &str, content: impl Into<Vec<u8>>) {
        self.buckets
            .write()
            .await
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), content.into());
    }

    pub async fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.buckets
            .read()
            .await
            .get(bucket)
            .and_then(|objects| objects.get(key).cloned())
    }

    pub async fn bucket_exists(&self, bucket: &str) -> bool {
        self.buckets.read().await.contains_key(bucket)
    }

    /// Make `bucket` exist but be inaccessible to this client
    pub async fn deny_access(&self, bucket: &str) {
        self.buckets.write().await.entry(bucket.to_string()).or_default();
        self.denied.write().await.insert(bucket.to_string());
    }

    /// Sizes of every bulk delete request in order
    pub async fn delete_batches(&self) -> Vec<usize> {
        self.delete_batches.read().await.clone()
    }

    /// `(bucket, key)` of every upload in order
    pub async fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.read().await.clone()
    }

    async fn check_access(&self, bucket: &str) -> StorageResult<()> {
        if self.denied.read().await.contains(bucket) {
            return Err(StorageError::AccessDenied(bucket.to_string()));
        }
        if !self.buckets.read().await.contains_key(bucket) {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        Ok(())
    }
}

/// S3 naming rules: 3-63 characters, lowercase letters, digits, dots and
/// hyphens, starting and ending with a letter or digit
pub fn is_valid_bucket_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    (3..=63).contains(&bytes.len())
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-' || *b == b'.')
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    async fn list_buckets(&self, limit: Option<usize>) -> StorageResult<Vec<String>> {
        let buckets = self.buckets.read().await;
        let names = buckets.keys().cloned();
        Ok(match limit {
            Some(limit) if limit > 0 => names.take(limit).collect(),
            _ => names.collect(),
        })
    }

    async fn create_bucket(&self, name: &str, exist_ok: bool) -> StorageResult<bool> {
        if !is_valid_bucket_name(name) {
            return Err(StorageError::InvalidBucketName(name.to_string()));
        }
        if self.bucket_exists(name).await {
            self.check_access(name).await?;
            if exist_ok {
                return Ok(true);
            }
            return Err(StorageError::AlreadyExists(name.to_string()));
        }
        self.buckets.write().await.insert(name.to_string(), BTreeMap::new());
        Ok(true)
    }

    async fn is_bucket_empty(&self, bucket: &str, prefix: &str) -> StorageResult<bool> {
        self.check_access(bucket).await?;
        let buckets = self.buckets.read().await;
        Ok(!buckets
            .get(bucket)
            .is_some_and(|objects| objects.keys().any(|key| key.starts_with(prefix))))
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        self.check_access(bucket).await?;
        let buckets = self.buckets.read().await;
        Ok(buckets
            .get(bucket)
            .map(|objects| {
                objects
                    .keys()
                    .filter(|key| key.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_batch(&self, bucket: &str, keys: &[String]) -> StorageResult<()> {
        if keys.len() > MAX_DELETE_BATCH {
            return Err(StorageError::Service(format!(
                "bulk delete of {} keys exceeds the limit of {}",
                keys.len(),
                MAX_DELETE_BATCH
            )));
        }
        self.check_access(bucket).await?;
        self.delete_batches.write().await.push(keys.len());
        if let Some(objects) = self.buckets.write().await.get_mut(bucket) {
            for key in keys {
                objects.remove(key);
            }
        }
        Ok(())
    }

    async fn upload_object(&self, local_path: &Path, bucket: &str, key: &str) -> StorageResult<()> {
        self.check_access(bucket).await?;
        let content = tokio::fs::read(local_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::FileNotFound(local_path.to_path_buf()),
            _ => StorageError::IoError(e),
        })?;
        self.put_object(bucket, key, content).await;
        self.uploads
            .write()
            .await
            .push((bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn download_object(&self, bucket: &str, key: &str, target: &Path) -> StorageResult<()> {
        self.check_access(bucket).await?;
        let content = self
            .object(bucket, key)
            .await
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        tokio::fs::write(target, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_bucket_is_idempotent() {
        let storage = InMemoryObjectStorage::new();

        assert!(storage.create_bucket("training-data", true).await.unwrap());
        assert!(storage.create_bucket("training-data", true).await.unwrap());
        assert_eq!(storage.list_buckets(None).await.unwrap(), vec!["training-data"]);
    }

    #[tokio::test]
    async fn test_create_bucket_demanding_uniqueness() {
        let storage = InMemoryObjectStorage::new();
        storage.create_bucket("training-data", false).await.unwrap();

        let err = storage.create_bucket("training-data", false).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
        assert!(err.is_bucket_rejection());
    }

    #[tokio::test]
    async fn test_create_bucket_rejects_invalid_and_denied_names() {
        let storage = InMemoryObjectStorage::new();
        storage.deny_access("someone-elses").await;

        assert!(matches!(
            storage.create_bucket("Not_Valid", true).await,
            Err(StorageError::InvalidBucketName(_))
        ));
        assert!(matches!(
            storage.create_bucket("someone-elses", true).await,
            Err(StorageError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_objects_batches_at_protocol_limit() {
        for (count, expected) in [
            (0, vec![]),
            (999, vec![999]),
            (1000, vec![1000]),
            (1001, vec![1000, 1]),
            (2000, vec![1000, 1000]),
            (2500, vec![1000, 1000, 500]),
        ] {
            let storage = InMemoryObjectStorage::new();
            storage.create_bucket("bulk", true).await.unwrap();
            let keys: Vec<String> = (0..count).map(|i| format!("data/{i:05}")).collect();
            for key in &keys {
                storage.put_object("bulk", key, "x").await;
            }

            storage.delete_objects("bulk", &keys).await.unwrap();

            let batches = storage.delete_batches().await;
            assert_eq!(batches, expected, "{count} keys");
            assert!(batches.iter().all(|size| *size <= MAX_DELETE_BATCH));
            assert!(storage.is_bucket_empty("bulk", "").await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_clear_bucket_honours_prefix() {
        let storage = InMemoryObjectStorage::new();
        storage.put_object("training-data", "initial_model/weights.h5", "w").await;
        storage.put_object("training-data", "images/cat.jpg", "c").await;

        storage.clear_bucket("training-data", "initial_model").await.unwrap();

        assert!(storage.is_bucket_empty("training-data", "initial_model").await.unwrap());
        assert!(!storage.is_bucket_empty("training-data", "").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_bucket() {
        let storage = InMemoryObjectStorage::new();
        assert!(matches!(
            storage.list_objects("nowhere", "").await,
            Err(StorageError::BucketNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_and_download_file() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("notes.txt");
        std::fs::write(&source, "hello").unwrap();

        let storage = InMemoryObjectStorage::new();
        storage.create_bucket("results", true).await.unwrap();
        storage
            .upload_file(&source, "results", Some("run-1/"), Some("notes.txt"))
            .await
            .unwrap();
        assert_eq!(
            storage.uploads().await,
            vec![("results".to_string(), "run-1/notes.txt".to_string())]
        );

        let target_dir = temp.path().join("nested").join("download");
        let local = storage
            .download_file("results", "notes.txt", &target_dir, Some("run-1"))
            .await
            .unwrap();
        assert_eq!(local, target_dir.join("notes.txt"));
        assert_eq!(std::fs::read_to_string(local).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_upload_missing_file() {
        let storage = InMemoryObjectStorage::new();
        storage.create_bucket("results", true).await.unwrap();
        let err = storage
            .upload_file(Path::new("/definitely/not/here.txt"), "results", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::FileNotFound(_)));
    }
}
