use mockito::{Matcher, Server};
use modeltrain::context::StorageCredentials;
use modeltrain::storage::{ObjectStorage, S3ObjectStorage, StorageError};
use tempfile::TempDir;

const BUCKET: &str = "detector-results";

const LIST_BUCKETS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListAllMyBucketsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Owner><ID>owner</ID><DisplayName>owner</DisplayName></Owner>
  <Buckets>
    <Bucket><Name>detector-results</Name><CreationDate>2024-01-01T00:00:00.000Z</CreationDate></Bucket>
  </Buckets>
</ListAllMyBucketsResult>"#;

fn error_body(code: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>{code}</Code><Message>{code}</Message><Resource>/{BUCKET}</Resource><RequestId>1</RequestId></Error>"#
    )
}

fn credentials() -> StorageCredentials {
    StorageCredentials {
        access_key_id: "access".to_string(),
        secret_access_key: "secret".to_string(),
    }
}

fn bucket_path() -> Matcher {
    Matcher::Regex(format!("^/{BUCKET}/?$"))
}

async fn connect(server: &mut Server) -> S3ObjectStorage {
    server
        .mock("GET", "/")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/xml")
        .with_body(LIST_BUCKETS)
        .create_async()
        .await;
    S3ObjectStorage::connect(&server.url(), &credentials())
        .await
        .unwrap()
}

async fn bucket_already_exists(server: &mut Server) {
    server
        .mock("PUT", bucket_path())
        .with_status(409)
        .with_header("content-type", "application/xml")
        .with_body(error_body("BucketAlreadyOwnedByYou"))
        .create_async()
        .await;
}

#[tokio::test]
async fn test_connect_lists_buckets() {
    let mut server = Server::new_async().await;
    let storage = connect(&mut server).await;

    assert_eq!(storage.endpoint(), server.url());
    assert_eq!(storage.list_buckets(None).await.unwrap(), vec![BUCKET]);
}

#[tokio::test]
async fn test_create_bucket() {
    let mut server = Server::new_async().await;
    let storage = connect(&mut server).await;
    let create = server
        .mock("PUT", bucket_path())
        .with_status(200)
        .create_async()
        .await;

    assert!(storage.create_bucket(BUCKET, false).await.unwrap());
    create.assert_async().await;
}

#[tokio::test]
async fn test_existing_accessible_bucket() {
    let mut server = Server::new_async().await;
    let storage = connect(&mut server).await;
    bucket_already_exists(&mut server).await;
    let head = server
        .mock("HEAD", bucket_path())
        .with_status(200)
        .expect(2)
        .create_async()
        .await;

    assert!(storage.create_bucket(BUCKET, true).await.unwrap());
    let err = storage.create_bucket(BUCKET, false).await.unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists(ref name) if name == BUCKET), "{err:?}");
    head.assert_async().await;
}

#[tokio::test]
async fn test_existing_bucket_owned_elsewhere_is_access_denied() {
    let mut server = Server::new_async().await;
    let storage = connect(&mut server).await;
    bucket_already_exists(&mut server).await;
    server
        .mock("HEAD", bucket_path())
        .with_status(403)
        .create_async()
        .await;

    for exist_ok in [true, false] {
        let err = storage.create_bucket(BUCKET, exist_ok).await.unwrap_err();
        assert!(matches!(err, StorageError::AccessDenied(ref name) if name == BUCKET), "{err:?}");
        assert!(err.is_bucket_rejection());
    }
}

#[tokio::test]
async fn test_rejected_bucket_name() {
    let mut server = Server::new_async().await;
    let storage = connect(&mut server).await;
    server
        .mock("PUT", bucket_path())
        .with_status(400)
        .with_header("content-type", "application/xml")
        .with_body(error_body("InvalidBucketName"))
        .create_async()
        .await;

    let err = storage.create_bucket(BUCKET, true).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidBucketName(ref name) if name == BUCKET), "{err:?}");
}

#[tokio::test]
async fn test_download_object() {
    let mut server = Server::new_async().await;
    let storage = connect(&mut server).await;
    server
        .mock("GET", format!("/{BUCKET}/training-0001/model.tar.gz").as_str())
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/octet-stream")
        .with_body("archive bytes")
        .create_async()
        .await;
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("model.tar.gz");

    storage
        .download_object(BUCKET, "training-0001/model.tar.gz", &target)
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&target).unwrap(), "archive bytes");
    assert!(!temp.path().join("model.tar.gz.part").exists());
}

#[tokio::test]
async fn test_download_missing_object_writes_nothing() {
    let mut server = Server::new_async().await;
    let storage = connect(&mut server).await;
    server
        .mock("GET", format!("/{BUCKET}/training-0001/model.tar.gz").as_str())
        .match_query(Matcher::Any)
        .with_status(404)
        .with_header("content-type", "application/xml")
        .with_body(error_body("NoSuchKey"))
        .create_async()
        .await;
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("model.tar.gz");

    let err = storage
        .download_object(BUCKET, "training-0001/model.tar.gz", &target)
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::ObjectNotFound { .. }), "{err:?}");
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}
