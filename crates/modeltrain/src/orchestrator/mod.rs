//! The training pipeline
//!
//! A full run walks through a fixed sequence of phases: clean, storage
//! preparation, packaging, submission, monitoring, results discovery, log
//! retrieval, artifact retrieval and extraction, relocation. The `clean`,
//! `prepare` and `train` commands stop after their phase. Given a job id the
//! run skips straight to monitoring that job.

pub mod connector;
pub mod error;
pub mod monitor;

pub use connector::{InMemoryConnector, RemoteConnector, ServiceConnector};
pub use error::PipelineError;
pub use monitor::{MonitorOutcome, MonitorSignal, SignalReceiver, SignalSender, signal_channel};

use modeltrain_core::{Command, JobId, ResultsReference};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::archive::{self, ArchiveBuilder};
use crate::config::TrainingConfig;
use crate::storage::{ObjectStorage, StorageError};
use crate::training_service::{DefinitionMetadata, RunMetadata, TrainingService};

/// Log file the training run writes next to its output
pub const TRAINING_LOG_NAME: &str = "training-log.txt";
/// Archive holding the trained model
pub const TRAINING_OUTPUT_ARCHIVE_NAME: &str = "model_training_output.tar.gz";
/// Key prefix of initial model artifacts in the training bucket
pub const INITIAL_MODEL_PREFIX: &str = "initial_model";

const LOCAL_DATA_README: &str = "README.md";

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Bounded retry for results discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(3),
        }
    }
}

/// Print a phase banner
pub fn banner(message: &str) {
    println!("# --------------------------------------------------------");
    println!("# {}", message);
    println!("# --------------------------------------------------------");
}

/// Object key for a path relative to an uploaded directory
fn key_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// A key prefix as a pseudo-directory: empty, or ending in exactly one `/`
fn key_directory(prefix: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        String::new()
    } else {
        format!("{}/", prefix)
    }
}

/// `relative` as a path that stays below the directory it is joined to.
/// `None` for parent, root or drive components.
fn contained_path(relative: &str) -> Option<PathBuf> {
    let path = Path::new(relative);
    path.components()
        .all(|component| matches!(component, Component::Normal(_)))
        .then(|| path.to_path_buf())
}

/// Regular files below `dir`, sorted by path
fn local_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn storage_error(context: impl Into<String>) -> impl FnOnce(StorageError) -> PipelineError {
    let context = context.into();
    move |source| PipelineError::Storage { context, source }
}

/// A bucket that cannot be created or used needs a different name
fn bucket_error(bucket: &str) -> impl FnOnce(StorageError) -> PipelineError {
    let bucket = bucket.to_string();
    move |source| {
        let hint = if source.is_bucket_rejection() {
            " (choose a different bucket name in the configuration file)"
        } else {
            ""
        };
        PipelineError::Storage {
            context: format!("Error. Bucket \"{}\" could not be prepared{}", bucket, hint),
            source,
        }
    }
}

/// Drives one pipeline run against the services handed out by `C`
pub struct TrainingOrchestrator<C> {
    config: TrainingConfig,
    connector: C,
    work_dir: PathBuf,
    invocation: String,
    results_retry: RetryPolicy,
}

impl<C: ServiceConnector> TrainingOrchestrator<C> {
    pub fn new(config: TrainingConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            work_dir: PathBuf::from("."),
            invocation: "modeltrain <config_file>".to_string(),
            results_retry: RetryPolicy::default(),
        }
    }

    /// Directory relative configuration paths resolve against
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Program and configuration file shown in the reattach command
    pub fn with_invocation(mut self, program: &str, config_file: &str) -> Self {
        self.invocation = format!("{} {}", program, config_file);
        self
    }

    pub fn with_results_retry(mut self, policy: RetryPolicy) -> Self {
        self.results_retry = policy;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }

    pub fn code_archive_path(&self) -> PathBuf {
        self.work_dir.join(&self.config.model_code_archive_name)
    }

    /// Command that resumes monitoring of `job_id`
    pub fn reattach_command(&self, job_id: &JobId) -> String {
        format!("{} {} {}", self.invocation, Command::Package, job_id)
    }

    /// Run `command`. With `job_id` the run resumes monitoring that job.
    pub async fn run(
        &self,
        command: Command,
        job_id: Option<JobId>,
        signals: &mut SignalReceiver,
    ) -> Result<()> {
        if let Some(job_id) = job_id {
            if command != Command::Package {
                return Err(PipelineError::Invocation(format!(
                    "A training id can only be specified with the \"{}\" command.",
                    Command::Package
                )));
            }
            let (storage, training) = self.reattach(&job_id).await?;
            return self
                .complete(command, storage.as_ref(), training.as_ref(), job_id, signals)
                .await;
        }

        self.clean()?;
        if command == Command::Clean {
            println!("Skipping model training.");
            return Ok(());
        }

        let storage = self.connect_storage().await?;
        self.prepare_storage(storage.as_ref()).await?;
        self.package(storage.as_ref()).await?;
        if command == Command::Prepare {
            println!("Skipping model training and post processing steps.");
            return Ok(());
        }

        banner("Starting model training ...");
        let training = self
            .connector
            .connect_training()
            .await
            .map_err(PipelineError::TrainingConnect)?;
        let job_id = self.submit(training.as_ref()).await?;
        self.complete(command, storage.as_ref(), training.as_ref(), job_id, signals)
            .await
    }

    async fn connect_storage(&self) -> Result<Arc<dyn ObjectStorage>> {
        self.connector
            .connect_storage(&self.config.cos_endpoint_url)
            .await
            .map_err(PipelineError::StorageConnect)
    }

    async fn reattach(
        &self,
        job_id: &JobId,
    ) -> Result<(Arc<dyn ObjectStorage>, Arc<dyn TrainingService>)> {
        let storage = self.connect_storage().await?;

        banner(&format!("Verifying that \"{}\" is a valid training id ...", job_id));
        let training = self
            .connector
            .connect_training()
            .await
            .map_err(PipelineError::TrainingConnect)?;
        if !training
            .is_known_job(job_id)
            .await
            .map_err(PipelineError::JobLookup)?
        {
            return Err(PipelineError::UnknownJob(job_id.clone()));
        }
        Ok((storage, training))
    }

    /// Remove the stale local code archive
    pub fn clean(&self) -> Result<()> {
        banner("Removing temporary work files ...");
        let archive = self.code_archive_path();
        if archive.is_file() {
            std::fs::remove_file(&archive).map_err(|e| {
                PipelineError::Preparation(format!(
                    "Error. {} could not be removed: {}",
                    archive.display(),
                    e
                ))
            })?;
            debug!("removed {}", archive.display());
        }
        Ok(())
    }

    /// Make sure both buckets exist and the training bucket holds data
    pub async fn prepare_storage(&self, storage: &dyn ObjectStorage) -> Result<()> {
        let config = &self.config;
        banner("Verifying Cloud Object Storage setup ...");

        println!(
            " Verifying that training results bucket \"{}\" exists. It will be created if necessary ...",
            config.results_bucket
        );
        storage
            .create_bucket(&config.results_bucket, true)
            .await
            .map_err(bucket_error(&config.results_bucket))?;

        println!(
            " Verifying that training data bucket \"{}\" exists. It will be created if necessary ...",
            config.training_bucket
        );
        storage
            .create_bucket(&config.training_bucket, true)
            .await
            .map_err(bucket_error(&config.training_bucket))?;

        let stale_prefix = format!("{}/", INITIAL_MODEL_PREFIX);
        let stale = storage
            .list_objects(&config.training_bucket, &stale_prefix)
            .await
            .map_err(storage_error("Error. Model artifacts could not be listed"))?;
        if !stale.is_empty() {
            println!(
                " Removing model artifacts from training bucket \"{}\" ...",
                config.training_bucket
            );
            storage
                .delete_objects(&config.training_bucket, &stale)
                .await
                .map_err(storage_error("Error. Model artifacts could not be removed"))?;
        }

        let no_training_data = storage
            .is_bucket_empty(&config.training_bucket, "")
            .await
            .map_err(storage_error("Error. The training data bucket could not be inspected"))?;

        let local_data_dir = config.local_data_dir.as_deref().map(|dir| self.resolve(dir));
        if let Some(data_dir) = local_data_dir.as_deref() {
            self.upload_initial_model(storage, data_dir).await?;
        }

        println!(
            " Looking for training data in bucket \"{}\" ...",
            config.training_bucket
        );
        if !no_training_data {
            println!(
                " Found data in training data bucket \"{}\". Skipping upload.",
                config.training_bucket
            );
            return Ok(());
        }

        println!(" No training data was found.");
        let Some(data_dir) = local_data_dir else {
            return Err(PipelineError::Preparation(
                "Error. No local training data was found. Please check your configuration settings."
                    .to_string(),
            ));
        };
        if !data_dir.is_dir() {
            return Err(PipelineError::Preparation(format!(
                "Error. \"{}\" is not a directory or cannot be accessed.",
                data_dir.display()
            )));
        }

        println!(" Looking for training data in \"{}\" ...", data_dir.display());
        let files = local_files(&data_dir).map_err(|e| {
            PipelineError::Preparation(format!(
                "Error. \"{}\" could not be read: {}",
                data_dir.display(),
                e
            ))
        })?;

        let mut uploaded = 0;
        for file in files {
            let Ok(relative) = file.strip_prefix(&data_dir) else {
                continue;
            };
            if relative == Path::new(LOCAL_DATA_README) || relative.starts_with(INITIAL_MODEL_PREFIX)
            {
                continue;
            }
            let key = key_name(relative);
            println!(
                " Uploading \"{}\" to training data bucket \"{}\" ...",
                key, config.training_bucket
            );
            storage
                .upload_file(
                    &file,
                    &config.training_bucket,
                    Some(&config.training_data_key_prefix),
                    Some(&key),
                )
                .await
                .map_err(storage_error(format!("Error. \"{}\" could not be uploaded", key)))?;
            uploaded += 1;
        }

        if uploaded == 0 {
            return Err(PipelineError::Preparation(format!(
                "Error. No local training data was found in \"{}\".",
                data_dir.display()
            )));
        }
        println!(
            "Uploaded {} data files to training data bucket \"{}\".",
            uploaded, config.training_bucket
        );
        Ok(())
    }

    async fn upload_initial_model(&self, storage: &dyn ObjectStorage, data_dir: &Path) -> Result<()> {
        let initial_model = data_dir.join(INITIAL_MODEL_PREFIX);
        if !initial_model.is_dir() {
            return Ok(());
        }

        println!(" Looking for model artifacts in \"{}\" ...", initial_model.display());
        let files = local_files(&initial_model).map_err(|e| {
            PipelineError::Preparation(format!(
                "Error. \"{}\" could not be read: {}",
                initial_model.display(),
                e
            ))
        })?;
        for file in files {
            let Ok(relative) = file.strip_prefix(&initial_model) else {
                continue;
            };
            let key = key_name(relative);
            println!(
                " Uploading model artifact \"{}\" to training data bucket \"{}\" ...",
                key, self.config.training_bucket
            );
            storage
                .upload_file(
                    &file,
                    &self.config.training_bucket,
                    Some(INITIAL_MODEL_PREFIX),
                    Some(&key),
                )
                .await
                .map_err(storage_error(format!(
                    "Error. Model artifact \"{}\" could not be uploaded",
                    key
                )))?;
        }
        Ok(())
    }

    /// Locate the model-building code and package it
    pub async fn package(&self, storage: &dyn ObjectStorage) -> Result<archive::PackagedArchive> {
        let config = &self.config;
        banner("Locating model building files ...");

        let code_dir = self.resolve(&config.model_building_code_dir);
        std::fs::create_dir_all(&code_dir).map_err(|e| {
            PipelineError::Preparation(format!(
                "Error. Model building code preparation failed: {}",
                e
            ))
        })?;

        let is_empty = std::fs::read_dir(&code_dir)
            .map(|mut entries| entries.next().is_none())
            .map_err(|e| {
                PipelineError::Preparation(format!(
                    "Error. Model building code preparation failed: {}",
                    e
                ))
            })?;
        if is_empty {
            println!(
                "No model building code was found in \"{}\".",
                code_dir.display()
            );
            self.download_model_code(storage, &code_dir).await?;
        }

        banner(&format!(
            "Packaging model building files in \"{}\" ...",
            code_dir.display()
        ));
        let archive_path = self.code_archive_path();
        let packaged = ArchiveBuilder::new()
            .build(&code_dir, &archive_path)
            .map_err(PipelineError::Packaging)?;

        println!(
            "Model building package \"{}\" contains the following entries:",
            archive_path.display()
        );
        for entry in &packaged.entries {
            println!(" {}", entry);
        }
        info!(
            "packaged {} entries into {} ({} bytes)",
            packaged.entries.len(),
            archive_path.display(),
            packaged.size
        );
        Ok(packaged)
    }

    /// Fill an empty code directory from the model bucket. Objects are
    /// written relative to the key prefix.
    async fn download_model_code(&self, storage: &dyn ObjectStorage, code_dir: &Path) -> Result<()> {
        let missing = || {
            PipelineError::Preparation(format!(
                "Error. Model building code preparation failed: no source code was found locally in \"{}\" or in Cloud Object Storage.",
                code_dir.display()
            ))
        };

        let Some(bucket) = self.config.model_bucket.as_deref() else {
            return Err(missing());
        };
        let prefix = key_directory(self.config.model_key_prefix.as_deref().unwrap_or(""));
        let context = format!("Error. Model building code could not be downloaded from \"{}\"", bucket);

        if storage
            .is_bucket_empty(bucket, &prefix)
            .await
            .map_err(storage_error(context.clone()))?
        {
            return Err(missing());
        }
        println!("Found model building code in bucket \"{}\".", bucket);

        let keys = storage
            .list_objects(bucket, &prefix)
            .await
            .map_err(storage_error(context.clone()))?;

        // resolve every target before anything is written
        let mut downloads = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(relative) = key.strip_prefix(prefix.as_str()) else {
                continue;
            };
            if relative.is_empty() || relative.ends_with('/') {
                continue;
            }
            let Some(relative) = contained_path(relative) else {
                return Err(PipelineError::Preparation(format!(
                    "{}: object \"{}\" would be written outside of \"{}\".",
                    context,
                    key,
                    code_dir.display()
                )));
            };
            downloads.push((code_dir.join(relative), key));
        }

        for (target, key) in downloads {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PipelineError::Preparation(format!("{}: {}", context, e))
                })?;
            }
            debug!("downloading {} to {}", key, target.display());
            storage
                .download_object(bucket, &key, &target)
                .await
                .map_err(storage_error(context.clone()))?;
        }
        Ok(())
    }

    /// Submit the packaged code and return the new job id
    pub async fn submit(&self, training: &dyn TrainingService) -> Result<JobId> {
        let config = &self.config;
        let definition = DefinitionMetadata::from_config(config);
        let run = RunMetadata::from_config(config, self.connector.storage_credentials());
        let archive = self.code_archive_path();

        println!("Training configuration summary:");
        println!(" Training run name     : {}", config.training_run_name);
        println!(" Training data bucket  : {}", config.training_bucket);
        println!(" Results bucket        : {}", config.results_bucket);
        println!(" Model-building archive: {}", archive.display());

        let job_id = training
            .start_training(&archive, &definition, &run)
            .await
            .map_err(PipelineError::Submission)?;
        println!("Model training was started. Training id: {}", job_id);
        Ok(job_id)
    }

    /// Monitoring and everything after it
    async fn complete(
        &self,
        command: Command,
        storage: &dyn ObjectStorage,
        training: &dyn TrainingService,
        job_id: JobId,
        signals: &mut SignalReceiver,
    ) -> Result<()> {
        let outcome = monitor::monitor(
            training,
            &job_id,
            self.config.monitoring_interval,
            &self.reattach_command(&job_id),
            signals,
        )
        .await
        .map_err(PipelineError::Monitoring)?;

        let state = match outcome {
            MonitorOutcome::Finished(state) => state,
            MonitorOutcome::Canceled { cancel_error } => {
                return Err(PipelineError::Canceled {
                    job_id,
                    cancel_error,
                });
            }
        };

        let results = self.discover_results(training, &job_id).await?;
        let download_dir = self.resolve(&self.config.local_download_dir);

        banner(&format!("Downloading training log file \"{}\" ...", TRAINING_LOG_NAME));
        let log = self
            .download(storage, &results, TRAINING_LOG_NAME, &download_dir)
            .await?;

        if state.is_failure() {
            println!(
                "The training log file \"{}\" was saved in \"{}\".",
                TRAINING_LOG_NAME,
                download_dir.display()
            );
            return Err(PipelineError::TrainingFailed { job_id, state, log });
        }

        if command == Command::Train {
            println!("Skipping post-processing steps.");
            return Ok(());
        }

        banner(&format!(
            "Downloading trained model archive \"{}\" ...",
            TRAINING_OUTPUT_ARCHIVE_NAME
        ));
        let output = self
            .download(storage, &results, TRAINING_OUTPUT_ARCHIVE_NAME, &download_dir)
            .await?;

        banner(&format!(
            "Extracting trained model artifacts from \"{}\" ...",
            output.display()
        ));
        let entries = archive::extract(&output, &download_dir).map_err(PipelineError::Extraction)?;
        for entry in &entries {
            println!("{}", entry);
        }
        println!(
            "Trained model artifacts are located in the \"{}\" directory.",
            download_dir.display()
        );

        let trained_assets = download_dir.join(&self.config.trained_model_path);
        let asset_dir = self.resolve(&self.config.model_asset_dir);
        banner(&format!(
            "Copying trained model artifacts from \"{}\" to \"{}\" ...",
            trained_assets.display(),
            asset_dir.display()
        ));
        let copied = archive::copy_dir(&trained_assets, &asset_dir).map_err(|error| {
            PipelineError::Relocation {
                from: trained_assets.clone(),
                to: asset_dir.clone(),
                error,
            }
        })?;
        debug!("copied {} files to {}", copied, asset_dir.display());

        println!("Done");
        Ok(())
    }

    /// Fetch the results location. Server errors are tolerated on all but
    /// the last attempt.
    pub async fn discover_results(
        &self,
        training: &dyn TrainingService,
        job_id: &JobId,
    ) -> Result<ResultsReference> {
        let attempts = self.results_retry.attempts.max(1);
        for attempt in 1..=attempts {
            let last = attempt == attempts;
            if let Some(results) = training
                .get_results_reference(job_id, !last)
                .await
                .map_err(PipelineError::ResultsLookup)?
            {
                debug!("results of {} are in {}/{}", job_id, results.bucket, results.model_location);
                return Ok(results);
            }
            if !last {
                tokio::time::sleep(self.results_retry.delay).await;
            }
        }
        Err(PipelineError::ResultsUnavailable(job_id.clone()))
    }

    async fn download(
        &self,
        storage: &dyn ObjectStorage,
        results: &ResultsReference,
        file: &str,
        download_dir: &Path,
    ) -> Result<PathBuf> {
        storage
            .download_file(&results.bucket, file, download_dir, Some(&results.model_location))
            .await
            .map_err(|source| PipelineError::Download {
                file: file.to_string(),
                bucket: results.bucket.clone(),
                source,
            })
    }
}
