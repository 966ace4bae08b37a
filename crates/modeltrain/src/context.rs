//! Service credentials read from the environment
//!
//! The environment is read exactly once, up front. Every missing variable is
//! collected so the user can fix them all in one go.

use std::fmt;
use thiserror::Error;

pub const ML_ENV: &str = "ML_ENV";
pub const ML_APIKEY: &str = "ML_APIKEY";
pub const ML_INSTANCE: &str = "ML_INSTANCE";
pub const ML_IAM_URL: &str = "ML_IAM_URL";
pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";

/// Identity endpoint used when `ML_IAM_URL` is not set
pub const DEFAULT_IAM_URL: &str = "https://iam.cloud.ibm.com";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Missing environment variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),
}

/// Credentials for the training service
#[derive(Clone, PartialEq, Eq)]
pub struct TrainingCredentials {
    /// Base URL of the training service
    pub url: String,
    pub api_key: String,
    pub instance_id: String,
    /// Identity endpoint the API key is exchanged at
    pub iam_url: String,
}

/// HMAC credentials for the object store
#[derive(Clone, PartialEq, Eq)]
pub struct StorageCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Everything the pipeline needs to reach its remote services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCredentials {
    pub training: TrainingCredentials,
    pub storage: StorageCredentials,
}

impl ServiceCredentials {
    /// Read the process environment
    pub fn from_env() -> Result<Self, ContextError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve through `lookup`; empty values count as missing
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ContextError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut require = |name: &str| match lookup(name).filter(|v| !v.trim().is_empty()) {
            Some(value) => value,
            None => {
                missing.push(name.to_string());
                String::new()
            }
        };

        let url = require(ML_ENV);
        let api_key = require(ML_APIKEY);
        let instance_id = require(ML_INSTANCE);
        let access_key_id = require(AWS_ACCESS_KEY_ID);
        let secret_access_key = require(AWS_SECRET_ACCESS_KEY);

        if !missing.is_empty() {
            return Err(ContextError::MissingVariables(missing));
        }

        let iam_url = lookup(ML_IAM_URL)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_IAM_URL.to_string());

        Ok(Self {
            training: TrainingCredentials {
                url: url.trim_end_matches('/').to_string(),
                api_key,
                instance_id,
                iam_url: iam_url.trim_end_matches('/').to_string(),
            },
            storage: StorageCredentials {
                access_key_id,
                secret_access_key,
            },
        })
    }
}

impl fmt::Debug for TrainingCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainingCredentials")
            .field("url", &self.url)
            .field("api_key", &"***")
            .field("instance_id", &self.instance_id)
            .field("iam_url", &self.iam_url)
            .finish()
    }
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_resolves_all_variables() {
        let credentials = ServiceCredentials::from_lookup(lookup(&[
            (ML_ENV, "https://us-south.ml.cloud.ibm.com/"),
            (ML_APIKEY, "key"),
            (ML_INSTANCE, "instance"),
            (AWS_ACCESS_KEY_ID, "access"),
            (AWS_SECRET_ACCESS_KEY, "secret"),
        ]))
        .unwrap();

        assert_eq!(credentials.training.url, "https://us-south.ml.cloud.ibm.com");
        assert_eq!(credentials.training.iam_url, DEFAULT_IAM_URL);
        assert_eq!(credentials.storage.secret_access_key, "secret");
    }

    #[test]
    fn test_reports_every_missing_variable() {
        let err = ServiceCredentials::from_lookup(lookup(&[
            (ML_APIKEY, "key"),
            (AWS_ACCESS_KEY_ID, "  "),
        ]))
        .unwrap_err();

        assert_eq!(
            err,
            ContextError::MissingVariables(vec![
                ML_ENV.to_string(),
                ML_INSTANCE.to_string(),
                AWS_ACCESS_KEY_ID.to_string(),
                AWS_SECRET_ACCESS_KEY.to_string(),
            ])
        );
    }

    #[test]
    fn test_debug_hides_secrets() {
        let credentials = StorageCredentials {
            access_key_id: "access".to_string(),
            secret_access_key: "super-secret".to_string(),
        };
        assert!(!format!("{credentials:?}").contains("super-secret"));
    }
}
