use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use ignis_executor::{ExecutorConfig, RetryPolicy};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u32(value: &str) -> Result<u32, String> {
    let parsed = value
        .parse::<u32>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "ignis",
    about = "Plan and idempotently execute deployment modules",
    version
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Build the module graph and print its execution batches.
    Plan {
        #[arg(value_name = "MODULE_JSON")]
        module: PathBuf,
    },
    /// Execute a module, resuming from its journal when one exists.
    Deploy(DeployArgs),
    /// Print the journaled state of every future of a deployment.
    Status {
        #[arg(value_name = "MODULE_NAME")]
        module_name: String,
        #[command(flatten)]
        deployment: DeploymentArgs,
    },
    /// Reset one future to not-started so the next deploy runs it again.
    Wipe {
        #[arg(value_name = "MODULE_JSON")]
        module: PathBuf,
        #[arg(value_name = "FUTURE_ID")]
        future_id: String,
        /// Wipe even if a submitted transaction may still land.
        #[arg(long)]
        force: bool,
        #[command(flatten)]
        deployment: DeploymentArgs,
    },
    /// Delete the journal and address file of a deployment.
    Erase {
        #[arg(value_name = "MODULE_NAME")]
        module_name: String,
        #[command(flatten)]
        deployment: DeploymentArgs,
    },
}

/// Locates a deployment on disk.
#[derive(Debug, Clone, Args)]
pub(crate) struct DeploymentArgs {
    #[arg(long, env = "IGNIS_NETWORK", default_value = "localhost")]
    pub network: String,

    #[arg(
        long = "deployments-dir",
        env = "IGNIS_DEPLOYMENTS_DIR",
        default_value = "ignition/deployments",
        help = "Root directory holding <network>/<module> deployment journals"
    )]
    pub deployments_dir: PathBuf,

    #[arg(
        long = "journal-backend",
        help = "Journal backend: auto, jsonl or sqlite (overrides IGNIS_JOURNAL_BACKEND)"
    )]
    pub journal_backend: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub(crate) struct DeployArgs {
    #[arg(value_name = "MODULE_JSON")]
    pub module: PathBuf,

    #[command(flatten)]
    pub deployment: DeploymentArgs,

    #[arg(
        long = "max-in-flight",
        env = "IGNIS_MAX_IN_FLIGHT",
        default_value_t = 4,
        value_parser = parse_positive_usize,
        help = "Maximum futures executing concurrently"
    )]
    pub max_in_flight: usize,

    #[arg(
        long = "max-attempts",
        env = "IGNIS_MAX_ATTEMPTS",
        default_value_t = 5,
        value_parser = parse_positive_u32,
        help = "Transient failures tolerated per future before it fails"
    )]
    pub max_attempts: u32,

    #[arg(
        long = "backoff-initial-ms",
        env = "IGNIS_BACKOFF_INITIAL_MS",
        default_value_t = 250,
        value_parser = parse_positive_u64
    )]
    pub backoff_initial_ms: u64,

    #[arg(
        long = "backoff-max-ms",
        env = "IGNIS_BACKOFF_MAX_MS",
        default_value_t = 8_000,
        value_parser = parse_positive_u64
    )]
    pub backoff_max_ms: u64,

    #[arg(
        long = "poll-interval-ms",
        env = "IGNIS_POLL_INTERVAL_MS",
        default_value_t = 500,
        value_parser = parse_positive_u64
    )]
    pub poll_interval_ms: u64,

    #[arg(
        long = "confirmation-timeout-ms",
        env = "IGNIS_CONFIRMATION_TIMEOUT_MS",
        default_value_t = 300_000,
        value_parser = parse_positive_u64
    )]
    pub confirmation_timeout_ms: u64,

    #[arg(
        long = "chain-state",
        env = "IGNIS_CHAIN_STATE",
        help = "JSON file persisting the simulated chain between runs"
    )]
    pub chain_state: Option<PathBuf>,
}

impl DeployArgs {
    pub(crate) fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_in_flight: self.max_in_flight,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                backoff_initial: Duration::from_millis(self.backoff_initial_ms),
                backoff_max: Duration::from_millis(self.backoff_max_ms),
            },
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            confirmation_timeout: Duration::from_millis(self.confirmation_timeout_ms),
        }
    }
}
