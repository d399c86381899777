use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::checks::{IssueReport, PreflightChecker};
use crate::config::{ProvisionerConfig, ReadinessConfig, StateBackend, DEFAULT_PERSIST_INTERVAL};
use crate::console::Console;
use crate::metrics::write_metrics_file;
use crate::orchestrator::{Job, JobInput, Provisioner};
use crate::retry::RetryPolicy;
use crate::runner::ShellRunner;
use crate::terraform::TerraformCli;

const APP_VERSION: &str = match option_env!("PROVISIONER_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

#[derive(Parser)]
#[command(author, version = APP_VERSION, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Seconds a cancelled job gets to let terraform finish and save its
    /// state before the process gives up on it
    #[arg(long, global = true, env = "SHUTDOWN_GRACE_SECS", default_value = "300")]
    pub shutdown_grace: u64,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision, join or delete one node
    Run {
        /// Cloud provider: aws, do, azure or gcp
        #[arg(long, env = "PROVIDER")]
        provider: String,

        /// create-cluster, add-master, add-worker, delete or force-delete
        #[arg(long, env = "ACTION")]
        action: String,

        /// Base64 encoded node spec YAML
        #[arg(long, env = "NODE_SPEC")]
        node_spec: String,

        /// Base64 encoded provider credentials YAML
        #[arg(long, env = "PROVIDER_CREDENTIALS", hide_env_values = true)]
        credentials: String,

        /// Base64 encoded account context YAML
        #[arg(long, env = "ACCOUNT_CONTEXT")]
        account: String,

        /// GCS bucket (optionally `bucket/prefix`) holding workspaces and bundles
        #[arg(long, env = "STATE_BUCKET")]
        bucket: Option<String>,

        /// Base64 encoded GCS service account key
        #[arg(long, env = "GCS_CREDENTIALS", hide_env_values = true)]
        gcs_credentials: Option<String>,

        /// Keep state in a local directory instead of GCS
        #[arg(long, env = "STATE_DIR")]
        state_dir: Option<PathBuf>,

        /// Default workspace directory when the account context sets none
        #[arg(long)]
        workspace_dir: Option<PathBuf>,

        #[arg(long, default_value = "terraform")]
        terraform_bin: String,

        #[arg(long, default_value = "ssh")]
        ssh_bin: String,

        /// Override the provider's default ssh login user
        #[arg(long)]
        ssh_user: Option<String>,

        /// Readiness probe attempts
        #[arg(long, default_value = "24")]
        readiness_attempts: u32,

        /// Seconds between readiness probes
        #[arg(long, default_value = "5")]
        readiness_interval: u64,

        /// Give up probing after this many seconds
        #[arg(long)]
        readiness_deadline: Option<u64>,

        /// Seconds between state upload retries
        #[arg(long, default_value_t = DEFAULT_PERSIST_INTERVAL.as_secs())]
        persist_interval: u64,

        /// State upload attempts (0 for unlimited retries)
        #[arg(long, default_value = "0")]
        persist_attempts: u32,

        /// Give up uploading state after this many seconds
        #[arg(long)]
        persist_deadline: Option<u64>,

        /// Write prometheus metrics here when the job ends
        #[arg(long, env = "METRICS_FILE")]
        metrics_file: Option<PathBuf>,

        /// Loki URL
        #[arg(long)]
        loki_url: Option<String>,

        /// Log level
        #[arg(long)]
        log_level: Option<String>,
    },

    /// Check that this host can run jobs
    Check {
        #[arg(long, default_value = "terraform")]
        terraform_bin: String,

        #[arg(long, default_value = "ssh")]
        ssh_bin: String,

        /// Workspace directory to test for write access
        #[arg(long)]
        workspace_dir: Option<PathBuf>,

        #[arg(long, env = "STATE_BUCKET")]
        bucket: Option<String>,

        #[arg(long, env = "STATE_DIR")]
        state_dir: Option<PathBuf>,
    },
}

impl Cli {
    pub async fn run(&self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        match &self.command {
            Commands::Run {
                provider,
                action,
                node_spec,
                credentials,
                account,
                metrics_file,
                ..
            } => {
                let config = self.config()?;
                let input = JobInput {
                    provider: provider.clone(),
                    action: action.clone(),
                    node_spec: node_spec.clone(),
                    credentials: credentials.clone(),
                    account: account.clone(),
                };
                let job = Job::decode(&input)?;

                let store = config.backend.open().await?;
                let runner = Arc::new(ShellRunner::new(
                    config.ssh_binary.clone(),
                    config.ssh_connect_timeout,
                ));
                let tool = Arc::new(TerraformCli::new(
                    config.terraform_binary.clone(),
                    runner.clone(),
                ));
                let provisioner = Provisioner::new(config, store, runner, tool);

                let result = provisioner.execute(&job, &cancellation_token).await;

                if let Some(path) = metrics_file {
                    if let Err(e) = write_metrics_file(path) {
                        error!("Failed to write metrics to {}: {e}", path.display());
                    }
                }
                let state = result?;
                info!("Done: node {} is {state:?}", job.node.node_id);
                Ok(())
            }
            Commands::Check {
                terraform_bin,
                ssh_bin,
                workspace_dir,
                bucket,
                state_dir,
            } => {
                Console::section("PROVISIONER PREFLIGHT CHECK");
                let issues = IssueReport::new();
                let checker = PreflightChecker::new(issues.clone());
                checker.check_tools(terraform_bin, ssh_bin);
                let workspace_dir = workspace_dir
                    .clone()
                    .unwrap_or_else(|| ProvisionerConfig::default().workspace_root);
                checker.check_writable_dir(&workspace_dir);
                checker.check_state_backend(bucket.as_deref(), state_dir.as_deref());

                issues.print_issues();
                if issues.has_critical_issues() {
                    bail!("critical issues found");
                }
                Ok(())
            }
        }
    }

    /// Builds the process configuration from the `run` flags.
    pub fn config(&self) -> anyhow::Result<ProvisionerConfig> {
        let Commands::Run {
            bucket,
            gcs_credentials,
            state_dir,
            workspace_dir,
            terraform_bin,
            ssh_bin,
            ssh_user,
            readiness_attempts,
            readiness_interval,
            readiness_deadline,
            persist_interval,
            persist_attempts,
            persist_deadline,
            metrics_file,
            ..
        } = &self.command
        else {
            bail!("configuration is only available for `run`");
        };

        let defaults = ProvisionerConfig::default();
        let backend = match (bucket, state_dir) {
            (Some(_), Some(_)) => bail!("--bucket and --state-dir are mutually exclusive"),
            (Some(bucket), None) => StateBackend::Gcs {
                bucket: bucket.clone(),
                credentials_base64: gcs_credentials
                    .clone()
                    .context("--gcs-credentials is required with --bucket")?,
            },
            (None, Some(dir)) => StateBackend::Local { dir: dir.clone() },
            (None, None) => defaults.backend.clone(),
        };

        Ok(ProvisionerConfig {
            backend,
            workspace_root: workspace_dir.clone().unwrap_or(defaults.workspace_root),
            terraform_binary: terraform_bin.clone(),
            ssh_binary: ssh_bin.clone(),
            ssh_connect_timeout: defaults.ssh_connect_timeout,
            ssh_user: ssh_user.clone(),
            readiness: ReadinessConfig {
                attempts: *readiness_attempts,
                interval: Duration::from_secs(*readiness_interval),
                deadline: readiness_deadline.map(Duration::from_secs),
            },
            persist_policy: RetryPolicy::fixed(*persist_attempts, Duration::from_secs(*persist_interval))
                .with_deadline(persist_deadline.map(Duration::from_secs)),
            metrics_file: metrics_file.clone(),
        })
    }
}
