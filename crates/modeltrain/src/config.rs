//! Training configuration
//!
//! The configuration file is YAML. Loading resolves every setting the
//! pipeline needs into a flat, immutable [`TrainingConfig`]. Validation is
//! all-or-nothing: when required settings are missing the error lists every
//! one of them, not just the first.

use serde_yaml::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Seconds between two training status checks
pub const MONITORING_INTERVAL_SECS: u64 = 15;

/// A required setting that could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingSetting {
    /// Resolved field name
    pub key: String,
    /// Dotted location in the YAML document
    pub yaml_path: String,
}

impl MissingSetting {
    fn new(key: impl Into<String>, yaml_path: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            yaml_path: yaml_path.into(),
        }
    }
}

impl fmt::Display for MissingSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.yaml_path)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file {} was not found", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration file is invalid: {0}")]
    Parse(String),

    #[error("Missing required settings: {}", format_missing(.0))]
    Missing(Vec<MissingSetting>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn format_missing(missing: &[MissingSetting]) -> String {
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// One directly addressable setting
struct SettingDef {
    id: &'static str,
    path: &'static [&'static str],
    default: Option<&'static str>,
}

const REQUIRED: &[SettingDef] = &[
    SettingDef { id: "name", path: &["name"], default: None },
    SettingDef { id: "model_identifier", path: &["model_identifier"], default: None },
    SettingDef { id: "author_name", path: &["author", "name"], default: None },
    SettingDef { id: "framework_name", path: &["framework", "name"], default: None },
    SettingDef { id: "framework_version", path: &["framework", "version"], default: None },
    SettingDef { id: "runtime_name", path: &["framework", "runtimes", "name"], default: None },
    SettingDef { id: "runtime_version", path: &["framework", "runtimes", "version"], default: None },
    SettingDef {
        id: "training_bucket",
        path: &["train", "data_source", "training_data", "bucket"],
        default: None,
    },
    SettingDef {
        id: "results_bucket",
        path: &["train", "model_training_results", "trained_model", "bucket"],
        default: None,
    },
    SettingDef {
        id: "model_building_code_dir",
        path: &["train", "model_source", "initial_model_local", "path"],
        default: None,
    },
    SettingDef {
        id: "execution_command",
        path: &["train", "execution", "command"],
        default: None,
    },
    SettingDef {
        id: "compute_configuration_name",
        path: &["train", "execution", "compute_configuration", "name"],
        default: None,
    },
];

const OPTIONAL: &[SettingDef] = &[
    SettingDef { id: "description", path: &["description"], default: None },
    SettingDef {
        id: "local_data_dir",
        path: &["train", "data_source", "training_data_local", "path"],
        default: Some("sample_training_data/"),
    },
    SettingDef {
        id: "training_data_key_prefix",
        path: &["train", "data_source", "training_data", "path"],
        default: Some(""),
    },
    SettingDef {
        id: "model_bucket",
        path: &["train", "model_source", "initial_model", "bucket"],
        default: None,
    },
    SettingDef {
        id: "model_key_prefix",
        path: &["train", "model_source", "initial_model", "path"],
        default: None,
    },
    SettingDef {
        id: "model_asset_dir",
        path: &["train", "model_training_results", "trained_model_local", "path"],
        default: Some("../assets/"),
    },
];

const TRAINING_PROCESS: &str = "training_process";

/// Resolved training configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub name: String,
    pub model_identifier: String,
    pub description: Option<String>,
    pub author_name: String,
    pub framework_name: String,
    pub framework_version: String,
    pub runtime_name: String,
    pub runtime_version: String,

    /// Local training data; uploaded only when the training bucket is empty
    pub local_data_dir: Option<PathBuf>,
    pub training_bucket: String,
    /// Key prefix for uploaded training data, empty for none
    pub training_data_key_prefix: String,
    pub results_bucket: String,

    /// Fallback source for model-building code
    pub model_bucket: Option<String>,
    pub model_key_prefix: Option<String>,
    pub model_building_code_dir: PathBuf,

    pub execution_command: String,
    pub compute_configuration_name: String,
    /// Endpoint of the object store the training service reads from
    pub cos_endpoint_url: String,

    /// Framework/format specific subtree inside the extracted training output
    pub trained_model_path: PathBuf,
    /// Where training log and output archive are downloaded to
    pub local_download_dir: PathBuf,
    /// Final destination of the trained model assets
    pub model_asset_dir: PathBuf,

    pub model_code_archive_name: String,
    pub training_run_name: String,
    pub training_run_description: String,
    pub monitoring_interval: Duration,
}

impl TrainingConfig {
    /// Load from configuration file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let document: Value =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_value(&document)
    }

    /// Resolve a parsed YAML document
    pub fn from_value(document: &Value) -> Result<Self> {
        // a document that isn't a mapping resolves nothing and reports every
        // required setting as missing
        let empty = Value::Mapping(Default::default());
        let root = if document.is_mapping() { document } else { &empty };

        let mut resolved: HashMap<&'static str, String> = HashMap::new();
        let mut missing = Vec::new();

        for def in REQUIRED {
            match locate(root, def.path) {
                Some(value) => {
                    resolved.insert(def.id, value);
                }
                None => missing.push(MissingSetting::new(def.id, def.path.join("."))),
            }
        }

        if resolved.contains_key("training_bucket") {
            match resolve_data_store_endpoint(root) {
                Ok(endpoint) => {
                    resolved.insert("cos_endpoint_url", endpoint);
                }
                Err(setting) => missing.push(setting),
            }
        }

        let (trained_model_path, staging_dir) = resolve_training_process(root);
        match trained_model_path {
            Some(value) => {
                resolved.insert("trained_model_path", value);
            }
            None => missing.push(MissingSetting::new(
                "trained_model_path",
                "process.training_process.params.trained_model_path",
            )),
        }
        match staging_dir {
            Some(value) => {
                resolved.insert("local_download_dir", value);
            }
            None => missing.push(MissingSetting::new(
                "local_download_dir",
                "process.training_process.params.staging_dir",
            )),
        }

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        for def in OPTIONAL {
            if let Some(value) = locate(root, def.path).or(def.default.map(str::to_string)) {
                resolved.insert(def.id, value);
            }
        }

        Self::from_resolved(resolved)
    }

    fn from_resolved(mut resolved: HashMap<&'static str, String>) -> Result<Self> {
        let mut take = |id: &str| resolved.remove(id).unwrap_or_default();

        let name = take("name");
        let model_identifier = take("model_identifier");
        let training_bucket = take("training_bucket");
        let results_bucket = take("results_bucket");

        if training_bucket == results_bucket {
            return Err(ConfigError::Invalid(format!(
                "the training data bucket and the training results bucket must be different (both are \"{}\")",
                training_bucket
            )));
        }

        let optional = |value: String| (!value.is_empty()).then_some(value);

        Ok(Self {
            model_code_archive_name: format!("{}-model-building-code.tar.gz", model_identifier),
            training_run_name: format!("train-{}", model_identifier),
            training_run_description: format!("Train {}", name),
            monitoring_interval: Duration::from_secs(MONITORING_INTERVAL_SECS),
            description: optional(take("description")),
            author_name: take("author_name"),
            framework_name: take("framework_name"),
            framework_version: take("framework_version"),
            runtime_name: take("runtime_name"),
            runtime_version: take("runtime_version"),
            local_data_dir: optional(take("local_data_dir")).map(PathBuf::from),
            training_data_key_prefix: take("training_data_key_prefix"),
            model_bucket: optional(take("model_bucket")),
            model_key_prefix: optional(take("model_key_prefix")),
            model_building_code_dir: PathBuf::from(take("model_building_code_dir")),
            execution_command: take("execution_command"),
            compute_configuration_name: take("compute_configuration_name"),
            cos_endpoint_url: take("cos_endpoint_url"),
            trained_model_path: PathBuf::from(take("trained_model_path")),
            local_download_dir: PathBuf::from(take("local_download_dir")),
            model_asset_dir: PathBuf::from(take("model_asset_dir")),
            name,
            model_identifier,
            training_bucket,
            results_bucket,
        })
    }
}

/// Walk `path` from `root`; scalars are rendered as strings, anything else
/// (null, sequences, mappings) counts as unset.
fn locate(root: &Value, path: &[&str]) -> Option<String> {
    let mut node = root;
    for segment in path {
        node = node.get(*segment)?;
    }
    scalar(node)
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Tagged(tagged) => scalar(&tagged.value),
        _ => None,
    }
}

/// The object store endpoint lives in the `data_stores` entry referenced by
/// the training data source.
fn resolve_data_store_endpoint(root: &Value) -> std::result::Result<String, MissingSetting> {
    let Some(store_id) = locate(root, &["train", "data_source", "training_data", "data_store"])
    else {
        return Err(MissingSetting::new(
            "cos_endpoint_url",
            "train.data_source.training_data.data_store",
        ));
    };

    let store = root
        .get("data_stores")
        .and_then(Value::as_sequence)
        .and_then(|stores| {
            stores
                .iter()
                .find(|store| store.get("name").and_then(scalar).as_deref() == Some(store_id.as_str()))
        })
        .ok_or_else(|| MissingSetting::new("cos_endpoint_url", format!("data_stores.{}", store_id)))?;

    locate(store, &["connection", "endpoint"]).ok_or_else(|| {
        MissingSetting::new(
            "cos_endpoint_url",
            format!("data_stores.{}.connection.endpoint", store_id),
        )
    })
}

/// Returns `(trained_model_path, staging_dir)` from the training process entry
fn resolve_training_process(root: &Value) -> (Option<String>, Option<String>) {
    let entry = root
        .get("process")
        .and_then(Value::as_sequence)
        .and_then(|processes| {
            processes.iter().find(|process| {
                process
                    .get("name")
                    .and_then(scalar)
                    .is_some_and(|name| name.trim().eq_ignore_ascii_case(TRAINING_PROCESS))
            })
        });

    match entry {
        Some(process) => (
            locate(process, &["params", "trained_model_path"]),
            locate(process, &["params", "staging_dir"]),
        ),
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: Object Detector
model_identifier: max-object-detector
description: Detect objects in images
author:
  name: CODAIT
framework:
  name: tensorflow
  version: "1.15"
  runtimes:
    name: python
    version: "3.6"
train:
  model_source:
    initial_model:
      bucket: detector-code
      path: code/
    initial_model_local:
      path: model_building_code
  model_training_results:
    trained_model:
      bucket: detector-results
    trained_model_local:
      path: assets
  data_source:
    training_data_local:
      path: data
    training_data:
      bucket: detector-data
      path: images
      data_store: cloud_object_storage
  execution:
    command: ./train-max-model.sh
    compute_configuration:
      name: k80
data_stores:
  - name: cloud_object_storage
    type: s3_datastore
    connection:
      endpoint: https://s3.us.cloud-object-storage.appdomain.cloud
process:
  - name: training_process
    params:
      staging_dir: training_output/
      trained_model_path: trained_model/tensorflow/saved_model
"#;

    #[test]
    fn test_resolves_full_configuration() {
        let config = TrainingConfig::from_yaml_str(SAMPLE).unwrap();

        assert_eq!(config.model_identifier, "max-object-detector");
        assert_eq!(config.framework_version, "1.15");
        assert_eq!(config.training_bucket, "detector-data");
        assert_eq!(config.training_data_key_prefix, "images");
        assert_eq!(config.results_bucket, "detector-results");
        assert_eq!(config.model_bucket.as_deref(), Some("detector-code"));
        assert_eq!(
            config.cos_endpoint_url,
            "https://s3.us.cloud-object-storage.appdomain.cloud"
        );
        assert_eq!(config.local_download_dir, PathBuf::from("training_output/"));
        assert_eq!(
            config.model_code_archive_name,
            "max-object-detector-model-building-code.tar.gz"
        );
        assert_eq!(config.training_run_name, "train-max-object-detector");
        assert_eq!(config.training_run_description, "Train Object Detector");
        assert_eq!(config.monitoring_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_optional_settings_fall_back_to_defaults() {
        let trimmed = SAMPLE
            .replace("    training_data_local:\n      path: data\n", "")
            .replace("    trained_model_local:\n      path: assets\n", "")
            .replace("description: Detect objects in images\n", "");
        let config = TrainingConfig::from_yaml_str(&trimmed).unwrap();

        assert_eq!(config.local_data_dir, Some(PathBuf::from("sample_training_data/")));
        assert_eq!(config.model_asset_dir, PathBuf::from("../assets/"));
        assert_eq!(config.description, None);
    }

    #[test]
    fn test_reports_every_missing_setting() {
        let yaml = r#"
name: Object Detector
framework:
  name: tensorflow
train:
  data_source:
    training_data:
      bucket: detector-data
"#;
        let err = TrainingConfig::from_yaml_str(yaml).unwrap_err();
        let ConfigError::Missing(missing) = err else {
            panic!("expected missing settings, got {err:?}");
        };
        let keys: Vec<&str> = missing.iter().map(|m| m.key.as_str()).collect();

        assert_eq!(
            keys,
            vec![
                "model_identifier",
                "author_name",
                "framework_version",
                "runtime_name",
                "runtime_version",
                "results_bucket",
                "model_building_code_dir",
                "execution_command",
                "compute_configuration_name",
                "cos_endpoint_url",
                "trained_model_path",
                "local_download_dir",
            ]
        );
        assert_eq!(missing[9].yaml_path, "train.data_source.training_data.data_store");
    }

    #[test]
    fn test_each_removed_key_is_reported() {
        let removals = [
            ("model_identifier: max-object-detector\n", "model_identifier"),
            ("      bucket: detector-results\n", "results_bucket"),
            ("    command: ./train-max-model.sh\n", "execution_command"),
        ];
        let mut yaml = SAMPLE.to_string();
        for (line, _) in removals {
            yaml = yaml.replace(line, "");
        }

        let Err(ConfigError::Missing(missing)) = TrainingConfig::from_yaml_str(&yaml) else {
            panic!("expected missing settings");
        };
        assert_eq!(missing.len(), removals.len());
        for (_, key) in removals {
            assert!(missing.iter().any(|m| m.key == key), "{key} not reported");
        }
    }

    #[test]
    fn test_unknown_data_store_is_reported() {
        let yaml = SAMPLE.replace("data_store: cloud_object_storage", "data_store: elsewhere");
        let Err(ConfigError::Missing(missing)) = TrainingConfig::from_yaml_str(&yaml) else {
            panic!("expected missing settings");
        };
        assert_eq!(missing, vec![MissingSetting::new("cos_endpoint_url", "data_stores.elsewhere")]);
    }

    #[test]
    fn test_data_store_without_endpoint_is_reported() {
        let yaml = SAMPLE.replace(
            "      endpoint: https://s3.us.cloud-object-storage.appdomain.cloud\n",
            "      region: us\n",
        );
        let Err(ConfigError::Missing(missing)) = TrainingConfig::from_yaml_str(&yaml) else {
            panic!("expected missing settings");
        };
        assert_eq!(missing[0].yaml_path, "data_stores.cloud_object_storage.connection.endpoint");
    }

    #[test]
    fn test_same_bucket_is_rejected() {
        let yaml = SAMPLE.replace("bucket: detector-results", "bucket: detector-data");
        assert!(matches!(
            TrainingConfig::from_yaml_str(&yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_non_mapping_document_reports_missing_settings() {
        let Err(ConfigError::Missing(missing)) = TrainingConfig::from_yaml_str("- just\n- a list\n")
        else {
            panic!("expected missing settings");
        };
        // required keys plus the two training process settings; the data
        // store lookup is skipped because no training bucket resolved
        assert_eq!(missing.len(), REQUIRED.len() + 2);
    }

    #[test]
    fn test_malformed_yaml_is_a_parse_error() {
        assert!(matches!(
            TrainingConfig::from_yaml_str("name: [unterminated"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = TrainingConfig::load_from_file(Path::new("does/not/exist.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
