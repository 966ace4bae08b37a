//! Request payloads describing a training definition and a training run

use serde::Serialize;
use std::fmt;

use crate::config::TrainingConfig;
use crate::context::StorageCredentials;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Author {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Runtime {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Framework {
    pub name: String,
    pub version: String,
    pub runtimes: Vec<Runtime>,
}

/// Stored description of the packaged model-building code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefinitionMetadata {
    pub name: String,
    pub description: String,
    pub author: Author,
    pub framework: Framework,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComputeConfiguration {
    pub name: String,
}

/// Object store connection handed to the training service
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct S3Connection {
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for S3Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Connection")
            .field("endpoint_url", &self.endpoint_url)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketLocation {
    pub bucket: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataReference {
    pub connection: S3Connection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<BucketLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<BucketLocation>,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Parameters of one training run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunMetadata {
    pub name: String,
    pub description: String,
    pub author: Author,
    pub compute_configuration: ComputeConfiguration,
    pub training_data_reference: DataReference,
    pub training_results_reference: DataReference,
}

impl DefinitionMetadata {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            name: config.training_run_name.clone(),
            description: config.training_run_description.clone(),
            author: Author {
                name: config.author_name.clone(),
            },
            framework: Framework {
                name: config.framework_name.clone(),
                version: config.framework_version.clone(),
                runtimes: vec![Runtime {
                    name: config.runtime_name.clone(),
                    version: config.runtime_version.clone(),
                }],
            },
            command: config.execution_command.clone(),
        }
    }
}

impl RunMetadata {
    pub fn from_config(config: &TrainingConfig, credentials: &StorageCredentials) -> Self {
        let connection = S3Connection {
            endpoint_url: config.cos_endpoint_url.clone(),
            access_key_id: credentials.access_key_id.clone(),
            secret_access_key: credentials.secret_access_key.clone(),
        };
        Self {
            name: config.training_run_name.clone(),
            description: config.training_run_description.clone(),
            author: Author {
                name: config.author_name.clone(),
            },
            compute_configuration: ComputeConfiguration {
                name: config.compute_configuration_name.clone(),
            },
            training_data_reference: DataReference {
                connection: connection.clone(),
                source: Some(BucketLocation {
                    bucket: config.training_bucket.clone(),
                }),
                target: None,
                kind: "s3".to_string(),
            },
            training_results_reference: DataReference {
                connection,
                source: None,
                target: Some(BucketLocation {
                    bucket: config.results_bucket.clone(),
                }),
                kind: "s3".to_string(),
            },
        }
    }
}
