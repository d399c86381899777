use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{error, info};
use serde::de::DeserializeOwned;
use shared::models::{AccountContext, NodeSpec, ProviderCredentials};
use shared::utils::BlobStore;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::ClusterBootstrap;
use crate::config::ProvisionerConfig;
use crate::error::{ProvisionError, Result};
use crate::metrics::{JOBS, JOB_DURATION};
use crate::providers::CloudProvider;
use crate::readiness::NodeReadinessProbe;
use crate::resources::CloudResourceManager;
use crate::runner::CommandRunner;
use crate::ssh_keys::SshAccessManager;
use crate::state::{NodeLifecycle, NodeState};
use crate::terraform::InfraTool;
use crate::workspace::WorkspaceManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateCluster,
    AddMaster,
    AddWorker,
    Delete,
    ForceDelete,
}

impl FromStr for Action {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "create-cluster" => Ok(Action::CreateCluster),
            "add-master" => Ok(Action::AddMaster),
            "add-worker" => Ok(Action::AddWorker),
            "delete" => Ok(Action::Delete),
            "force-delete" => Ok(Action::ForceDelete),
            other => Err(ProvisionError::UnsupportedAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::CreateCluster => "create-cluster",
            Action::AddMaster => "add-master",
            Action::AddWorker => "add-worker",
            Action::Delete => "delete",
            Action::ForceDelete => "force-delete",
        };
        f.write_str(name)
    }
}

/// Raw job parameters as they arrive from the environment. Payloads are
/// base64 encoded YAML.
#[derive(Debug, Clone, Default)]
pub struct JobInput {
    pub provider: String,
    pub action: String,
    pub node_spec: String,
    pub credentials: String,
    pub account: String,
}

/// A decoded and validated job.
#[derive(Debug, Clone)]
pub struct Job {
    pub provider: CloudProvider,
    pub action: Action,
    pub node: NodeSpec,
    pub credentials: ProviderCredentials,
    pub account: AccountContext,
}

pub fn decode_payload<T: DeserializeOwned>(what: &'static str, encoded: &str) -> Result<T> {
    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ProvisionError::decode(what, e))?;
    serde_yaml::from_slice(&raw).map_err(|e| ProvisionError::decode(what, e))
}

impl Job {
    pub fn decode(input: &JobInput) -> Result<Self> {
        let provider: CloudProvider = input.provider.parse()?;
        let action: Action = input.action.parse()?;
        let node: NodeSpec = decode_payload("node spec", &input.node_spec)?;
        node.validate()?;
        let credentials: ProviderCredentials =
            decode_payload("provider credentials", &input.credentials)?;
        let account: AccountContext = decode_payload("account context", &input.account)?;
        account.validate(&credentials)?;
        Ok(Self {
            provider,
            action,
            node,
            credentials,
            account,
        })
    }
}

/// Runs provisioning jobs against one blob store, command runner and IaC tool.
pub struct Provisioner {
    config: ProvisionerConfig,
    store: Arc<dyn BlobStore>,
    runner: Arc<dyn CommandRunner>,
    tool: Arc<dyn InfraTool>,
}

impl Provisioner {
    pub fn new(
        config: ProvisionerConfig,
        store: Arc<dyn BlobStore>,
        runner: Arc<dyn CommandRunner>,
        tool: Arc<dyn InfraTool>,
    ) -> Self {
        Self {
            config,
            store,
            runner,
            tool,
        }
    }

    /// Returns the state the node ended in. On error the node is in
    /// `Failed` and the error is returned as is.
    pub async fn execute(&self, job: &Job, cancel: &CancellationToken) -> Result<NodeState> {
        let started = Instant::now();
        let mut lifecycle = NodeLifecycle::new(&job.node.node_id);
        info!(
            "Running {} for node {} on {}",
            job.action, job.node.node_id, job.provider
        );

        let result = self.dispatch(job, &mut lifecycle, cancel).await;

        let provider = job.provider.to_string();
        let action = job.action.to_string();
        JOB_DURATION
            .with_label_values(&[provider.as_str(), action.as_str()])
            .inc_by(started.elapsed().as_secs_f64());
        match result {
            Ok(()) => {
                JOBS.with_label_values(&[provider.as_str(), action.as_str(), "success"]).inc();
                info!("Node {} finished in state {:?}", job.node.node_id, lifecycle.state());
                Ok(lifecycle.state().clone())
            }
            Err(e) => {
                JOBS.with_label_values(&[provider.as_str(), action.as_str(), "failure"]).inc();
                lifecycle.fail(&e);
                error!("{} of node {} failed: {e}", job.action, job.node.node_id);
                Err(e)
            }
        }
    }

    fn bootstrap(&self, job: &Job) -> Result<ClusterBootstrap> {
        let provider = job.provider.ensure_supported()?;
        let ssh_user = match &self.config.ssh_user {
            Some(user) => user.clone(),
            None => provider.ssh_user()?.to_string(),
        };
        let workspace_root = job
            .account
            .workspace_root
            .clone()
            .unwrap_or_else(|| self.config.workspace_root.clone());

        let ssh = Arc::new(SshAccessManager::new(
            self.store.clone(),
            self.runner.clone(),
            &job.account.ssh_root,
        ));
        let workspaces = WorkspaceManager::new(
            self.store.clone(),
            workspace_root,
            self.config.persist_policy,
        );
        let resources = CloudResourceManager::new(
            provider,
            job.credentials.clone(),
            &job.account.template_root,
            workspaces,
            self.tool.clone(),
            ssh.clone(),
        );
        let readiness = &self.config.readiness;
        let probe = NodeReadinessProbe::new(self.runner.clone(), readiness.attempts, readiness.interval)
            .with_deadline(readiness.deadline);

        Ok(ClusterBootstrap::new(
            job.account.clone(),
            self.store.clone(),
            self.runner.clone(),
            ssh,
            resources,
            probe,
            ssh_user,
        ))
    }

    async fn dispatch(
        &self,
        job: &Job,
        lifecycle: &mut NodeLifecycle,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let bootstrap = self.bootstrap(job)?;
        match job.action {
            Action::CreateCluster => bootstrap.init_cluster(&job.node, lifecycle, cancel).await,
            Action::AddMaster => bootstrap.add_master(&job.node, lifecycle, cancel).await,
            Action::AddWorker => bootstrap.add_worker(&job.node, lifecycle, cancel).await,
            Action::Delete | Action::ForceDelete => {
                lifecycle.advance(NodeState::Destroying)?;
                let force = job.action == Action::ForceDelete;
                bootstrap
                    .resources()
                    .delete(&job.node, force, cancel)
                    .await?;
                lifecycle.advance(NodeState::Destroyed)
            }
        }
    }
}
