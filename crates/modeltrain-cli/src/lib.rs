//! modeltrain command line front end
//!
//! Turns `modeltrain <config_file> <command> [<job_id>]` into a validated
//! [`Invocation`], wires Ctrl+C and stdin into the monitor signal channel
//! and runs the training pipeline against the remote services.

pub mod error;

pub use error::CliError;

use clap::Parser;
use modeltrain::config::TrainingConfig;
use modeltrain::{
    ModeltrainError, MonitorSignal, RemoteConnector, ServiceCredentials, SignalSender,
    TrainingOrchestrator,
};
use modeltrain::orchestrator::SignalReceiver;
use modeltrain_core::{Command, JobId};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use tracing_subscriber::EnvFilter;

pub const PROGRAM: &str = "modeltrain";

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "MODELTRAIN_LOG";

/// Exit status after Ctrl+C outside of training monitoring
pub const INTERRUPTED: u8 = 130;

fn commands_help() -> String {
    let mut help = String::from("Commands:\n");
    for command in Command::ALL {
        help.push_str(&format!("  {:<9}{}\n", command.as_str(), command.summary()));
    }
    help.push_str("\nA training id can only be passed to the \"package\" command.");
    help
}

#[derive(Parser, Debug)]
#[command(name = PROGRAM, version)]
#[command(about = "Train a model on a remote training service", long_about = None)]
#[command(after_help = commands_help())]
pub struct Cli {
    /// YAML training configuration file
    pub config_file: Option<PathBuf>,

    /// Pipeline command: clean, prepare, train or package
    pub command: Option<String>,

    /// Training id of a run to resume monitoring
    pub job_id: Option<String>,
}

/// A validated command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub config_file: PathBuf,
    pub command: Command,
    pub job_id: Option<JobId>,
}

impl Cli {
    /// Validate the arguments. `None` means no arguments were given and the
    /// usage should be shown.
    pub fn invocation(self) -> Result<Option<Invocation>, CliError> {
        let Some(config_file) = self.config_file else {
            return Ok(None);
        };
        if !config_file.is_file() {
            return Err(CliError::InvalidInput(format!(
                "\"{}\" is not a valid configuration file.",
                config_file.display()
            )));
        }

        let Some(command) = self.command else {
            return Err(CliError::InvalidInput(format!(
                "Missing command. Run \"{} --help\" for the list of commands.",
                PROGRAM
            )));
        };
        let command: Command = command.parse().map_err(ModeltrainError::from)?;

        let job_id = match self.job_id {
            Some(_) if command != Command::Package => {
                return Err(CliError::InvalidInput(format!(
                    "A training id can only be specified with the \"{}\" command.",
                    Command::Package
                )));
            }
            Some(id) => Some(JobId::parse(id).map_err(ModeltrainError::from)?),
            None => None,
        };

        Ok(Some(Invocation {
            config_file,
            command,
            job_id,
        }))
    }
}

/// Install the `tracing` subscriber. Filters come from `MODELTRAIN_LOG`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Forward Ctrl+C and stdin lines to the monitor
///
/// A Ctrl+C while no monitor is listening ends the process.
pub fn spawn_signal_forwarders(sender: SignalSender) {
    let interrupts = sender.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !interrupts.send(MonitorSignal::Interrupt) {
                eprintln!("Interrupted.");
                std::process::exit(i32::from(INTERRUPTED));
            }
        }
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(_)) = lines.next_line().await {
            if !sender.send(MonitorSignal::Resume) {
                debug!("ignoring input outside of training monitoring");
            }
        }
    });
}

/// Resolve the environment and configuration, then run the pipeline
pub async fn execute(invocation: Invocation, signals: &mut SignalReceiver) -> Result<(), CliError> {
    let credentials = ServiceCredentials::from_env().map_err(ModeltrainError::from)?;
    let config =
        TrainingConfig::load_from_file(&invocation.config_file).map_err(ModeltrainError::from)?;
    let work_dir = std::env::current_dir()?;

    debug!(
        "running {} with {} in {}",
        invocation.command,
        invocation.config_file.display(),
        work_dir.display()
    );
    let orchestrator = TrainingOrchestrator::new(config, RemoteConnector::new(credentials))
        .with_work_dir(work_dir)
        .with_invocation(PROGRAM, &invocation.config_file.display().to_string());
    orchestrator
        .run(invocation.command, invocation.job_id, signals)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once(PROGRAM).chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_no_arguments_shows_usage() {
        assert_eq!(cli(&[]).invocation().unwrap(), None);
    }

    #[test]
    fn test_valid_invocation() {
        let config = NamedTempFile::new().unwrap();
        let path = config.path().to_str().unwrap();

        let invocation = cli(&[path, "PACKAGE", "training-1"]).invocation().unwrap().unwrap();
        assert_eq!(invocation.command, Command::Package);
        assert_eq!(invocation.job_id, Some(JobId::parse("training-1").unwrap()));
    }

    #[test]
    fn test_invalid_invocations() {
        let config = NamedTempFile::new().unwrap();
        let path = config.path().to_str().unwrap();

        for args in [
            vec!["does-not-exist.yaml", "train"],
            vec![path],
            vec![path, "deploy"],
            vec![path, "train", "training-1"],
        ] {
            let err = cli(&args).invocation().unwrap_err();
            assert_eq!(err.exit_code().code(), 1, "{args:?}");
        }
    }

    #[test]
    fn test_help_lists_every_command() {
        let help = commands_help();
        for command in Command::ALL {
            assert!(help.contains(command.as_str()));
        }
    }
}
