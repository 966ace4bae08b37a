//! S3-compatible object storage

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{MAX_DELETE_BATCH, ObjectStorage, StorageError, StorageResult};
use crate::context::StorageCredentials;

/// Region constraint sent with bucket creation requests
pub const DEFAULT_LOCATION_CONSTRAINT: &str = "us-standard";

/// Object storage backed by an S3-compatible endpoint
#[derive(Debug, Clone)]
pub struct S3ObjectStorage {
    client: Client,
    endpoint: String,
}

impl S3ObjectStorage {
    /// Build a client for `endpoint` and verify the credentials by listing a
    /// single bucket
    pub async fn connect(endpoint: &str, credentials: &StorageCredentials) -> StorageResult<Self> {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(DEFAULT_LOCATION_CONSTRAINT))
            .endpoint_url(endpoint)
            .credentials_provider(Credentials::new(
                credentials.access_key_id.clone(),
                credentials.secret_access_key.clone(),
                None,
                None,
                "modeltrain",
            ))
            .force_path_style(true)
            .build();

        let storage = Self {
            client: Client::from_conf(config),
            endpoint: endpoint.to_string(),
        };
        storage.list_buckets(Some(1)).await?;
        info!("Connected to object storage at {}", endpoint);
        Ok(storage)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn bucket_is_accessible(&self, bucket: &str) -> StorageResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => match classify(err, bucket) {
                StorageError::AccessDenied(_) => Ok(false),
                other => Err(other),
            },
        }
    }
}

fn status_of<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|response| response.status().as_u16())
}

/// Normalize a provider error into a [`StorageError`] naming `bucket`
fn classify<E>(err: SdkError<E, HttpResponse>, bucket: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let code = err.code().map(str::to_string);
    match (code.as_deref(), status_of(&err)) {
        (Some("NoSuchBucket"), _) | (None, Some(404)) => {
            StorageError::BucketNotFound(bucket.to_string())
        }
        (Some("AccessDenied"), _) | (_, Some(403)) => StorageError::AccessDenied(bucket.to_string()),
        (Some("InvalidBucketName"), _) => StorageError::InvalidBucketName(bucket.to_string()),
        _ => StorageError::Service(DisplayErrorContext(err).to_string()),
    }
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn list_buckets(&self, limit: Option<usize>) -> StorageResult<Vec<String>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| StorageError::Service(DisplayErrorContext(e).to_string()))?;

        let names = output
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name().map(str::to_string));
        Ok(match limit {
            Some(limit) if limit > 0 => names.take(limit).collect(),
            _ => names.collect(),
        })
    }

    async fn create_bucket(&self, name: &str, exist_ok: bool) -> StorageResult<bool> {
        debug!("create_bucket({}, exist_ok={})", name, exist_ok);
        let configuration = CreateBucketConfiguration::builder()
            .location_constraint(BucketLocationConstraint::from(DEFAULT_LOCATION_CONSTRAINT))
            .build();

        let err = match self
            .client
            .create_bucket()
            .bucket(name)
            .create_bucket_configuration(configuration)
            .send()
            .await
        {
            Ok(_) => {
                info!("Created bucket {}", name);
                return Ok(true);
            }
            Err(err) => err,
        };

        let already_exists = matches!(
            err.code(),
            Some("BucketAlreadyExists") | Some("BucketAlreadyOwnedByYou")
        ) || status_of(&err) == Some(409);
        if already_exists {
            if !self.bucket_is_accessible(name).await? {
                return Err(StorageError::AccessDenied(name.to_string()));
            }
            if exist_ok {
                debug!("Bucket {} already exists", name);
                return Ok(true);
            }
            return Err(StorageError::AlreadyExists(name.to_string()));
        }

        if err.code() == Some("InvalidBucketName") || status_of(&err) == Some(400) {
            return Err(StorageError::InvalidBucketName(name.to_string()));
        }
        Err(classify(err, name))
    }

    async fn is_bucket_empty(&self, bucket: &str, prefix: &str) -> StorageResult<bool> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| classify(e, bucket))?;
        Ok(output.contents().is_empty())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| classify(e, bucket))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }
        debug!("list_objects({}, {}) -> {} keys", bucket, prefix, keys.len());
        Ok(keys)
    }

    async fn delete_batch(&self, bucket: &str, keys: &[String]) -> StorageResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        if keys.len() > MAX_DELETE_BATCH {
            return Err(StorageError::Service(format!(
                "bulk delete of {} keys exceeds the limit of {}",
                keys.len(),
                MAX_DELETE_BATCH
            )));
        }

        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Service(e.to_string()))?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| StorageError::Service(e.to_string()))?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| classify(e, bucket))?;

        if let Some(failure) = output.errors().first() {
            return Err(StorageError::Service(format!(
                "failed to delete {} object(s) from \"{}\", first: {} ({})",
                output.errors().len(),
                bucket,
                failure.key().unwrap_or("?"),
                failure.message().unwrap_or("no message")
            )));
        }
        Ok(())
    }

    async fn upload_object(&self, local_path: &Path, bucket: &str, key: &str) -> StorageResult<()> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::Service(e.to_string()))?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| classify(e, bucket))?;
        Ok(())
    }

    async fn download_object(&self, bucket: &str, key: &str, target: &Path) -> StorageResult<()> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err.code() == Some("NoSuchKey") {
                    StorageError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    classify(err, bucket)
                }
            })?;

        let progress = ProgressBar::new(output.content_length().unwrap_or(0).max(0) as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{wide_bar:.cyan/blue}] {bytes}/{total_bytes}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        progress.set_message(key.to_string());

        let partial = PartialDownload::new(target);
        let mut file = tokio::fs::File::create(partial.path()).await?;
        let mut body = output.body;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StorageError::Service(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            progress.inc(chunk.len() as u64);
        }
        file.flush().await?;
        drop(file);
        partial.commit().await?;
        progress.finish_and_clear();
        Ok(())
    }
}

/// A download streamed into `<target>.part` and renamed onto the target once
/// complete. The partial file is removed if the download is abandoned.
struct PartialDownload {
    part: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl PartialDownload {
    fn new(target: &Path) -> Self {
        let mut name = target.file_name().map(OsString::from).unwrap_or_default();
        name.push(".part");
        Self {
            part: target.with_file_name(name),
            target: target.to_path_buf(),
            committed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.part
    }

    async fn commit(mut self) -> std::io::Result<()> {
        tokio::fs::rename(&self.part, &self.target).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialDownload {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.part);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_partial_download_is_renamed_on_commit() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("train.py");
        let partial = PartialDownload::new(&target);
        assert_eq!(partial.path(), temp.path().join("train.py.part"));

        tokio::fs::write(partial.path(), "print()").await.unwrap();
        partial.commit().await.unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "print()");
        assert!(!temp.path().join("train.py.part").exists());
    }

    #[tokio::test]
    async fn test_abandoned_download_leaves_target_untouched() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("train.py");
        std::fs::write(&target, "previous").unwrap();

        {
            let partial = PartialDownload::new(&target);
            tokio::fs::write(partial.path(), "trunc").await.unwrap();
        }

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "previous");
        assert!(!temp.path().join("train.py.part").exists());
    }
}
