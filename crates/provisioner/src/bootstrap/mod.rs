//! Turning a fresh instance into a k3s server or agent.
//!
//! The first server of an account initializes the cluster and publishes a
//! [`JoinCredentialsBundle`]; every later master or worker reads that bundle
//! before touching any cloud resources.

use std::sync::Arc;

use log::{info, warn};
use shared::models::{keys, AccountContext, JoinCredentialsBundle, NodeSpec, Taint};
use shared::utils::{BlobStore, BlobStoreError, Precondition};
use tokio_util::sync::CancellationToken;

use crate::error::{ProvisionError, Result};
use crate::providers::NODE_CONFIG_FILE;
use crate::readiness::NodeReadinessProbe;
use crate::resources::CloudResourceManager;
use crate::runner::{CommandRunner, RemoteHost};
use crate::ssh_keys::SshAccessManager;
use crate::state::{NodeLifecycle, NodeState};

pub mod commands;
pub mod kubeconfig;
pub mod labels;
pub mod token;

pub struct ClusterBootstrap {
    account: AccountContext,
    store: Arc<dyn BlobStore>,
    runner: Arc<dyn CommandRunner>,
    ssh: Arc<SshAccessManager>,
    resources: CloudResourceManager,
    probe: NodeReadinessProbe,
    ssh_user: String,
}

impl ClusterBootstrap {
    pub fn new(
        account: AccountContext,
        store: Arc<dyn BlobStore>,
        runner: Arc<dyn CommandRunner>,
        ssh: Arc<SshAccessManager>,
        resources: CloudResourceManager,
        probe: NodeReadinessProbe,
        ssh_user: impl Into<String>,
    ) -> Self {
        Self {
            account,
            store,
            runner,
            ssh,
            resources,
            probe,
            ssh_user: ssh_user.into(),
        }
    }

    pub fn resources(&self) -> &CloudResourceManager {
        &self.resources
    }

    /// Keys, instance, reachable ssh. Shared by every flow.
    async fn provision(
        &self,
        node: &NodeSpec,
        lifecycle: &mut NodeLifecycle,
        cancel: &CancellationToken,
    ) -> Result<RemoteHost> {
        let keys = self.ssh.ensure(&self.account.account_id).await?;
        lifecycle.advance(NodeState::Provisioning)?;
        let instance = self.resources.create(node, &keys, &[], cancel).await?;
        let host = RemoteHost::new(instance.public_ip()?, &self.ssh_user, keys.private_key);
        lifecycle.advance(NodeState::AwaitingReady)?;
        self.probe.wait_ready(&host, cancel).await?;
        Ok(host)
    }

    async fn load_bundle(&self) -> Result<JoinCredentialsBundle> {
        let key = keys::join_bundle(&self.account.account_id);
        let object = match self.store.get(&key).await {
            Ok(object) => object,
            Err(BlobStoreError::NotFound(_)) => return Err(ProvisionError::CredentialsNotFound(key)),
            Err(e) => return Err(e.into()),
        };
        JoinCredentialsBundle::from_yaml(&object.data)
            .map_err(|e| ProvisionError::decode("join credentials bundle", e))
    }

    fn reject_spot(node: &NodeSpec) -> Result<()> {
        if node.is_spot() {
            return Err(ProvisionError::decode(
                "node spec",
                "spot provisioning is only available for workers",
            ));
        }
        Ok(())
    }

    pub async fn init_cluster(
        &self,
        node: &NodeSpec,
        lifecycle: &mut NodeLifecycle,
        cancel: &CancellationToken,
    ) -> Result<()> {
        Self::reject_spot(node)?;
        let host = self.provision(node, lifecycle, cancel).await?;
        let ip = host.address.clone();
        lifecycle.advance(NodeState::Installing)?;

        let installed = self.runner.run_remote(&host, commands::IS_INSTALLED).await?;
        let master_token = if installed.trim() == "installed" {
            info!("k3s already present on {ip}, restarting");
            self.runner.run_remote(&host, commands::RESTART_SERVER).await?;
            self.read_remote(&host, commands::SERVER_TOKEN_PATH).await?
        } else {
            let token = token::generate_token();
            info!("Installing k3s server on {ip}");
            self.runner
                .run_remote(&host, &commands::init_server(&token, &ip))
                .await?;
            token
        };

        let server_url = format!("https://{ip}:{}", JoinCredentialsBundle::API_PORT);
        let raw_kubeconfig = self
            .runner
            .run_remote(&host, &commands::read_file(commands::KUBECONFIG_PATH))
            .await?;
        let bundle = JoinCredentialsBundle {
            join_token: self.read_remote(&host, commands::NODE_TOKEN_PATH).await?,
            kubeconfig: kubeconfig::rewrite_server(&raw_kubeconfig, &server_url)?,
            server_ip: ip,
            master_token,
        };
        self.publish_bundle(&bundle).await?;
        lifecycle.advance(NodeState::Ready)
    }

    async fn read_remote(&self, host: &RemoteHost, path: &str) -> Result<String> {
        let content = self.runner.run_remote(host, &commands::read_file(path)).await?;
        let content = content.trim();
        if content.is_empty() {
            return Err(ProvisionError::Provisioning(format!(
                "{path} is empty on {}",
                host.address
            )));
        }
        Ok(content.to_string())
    }

    /// Create-only upload. A bundle left by an earlier run of the same init
    /// node is accepted as is.
    async fn publish_bundle(&self, bundle: &JoinCredentialsBundle) -> Result<()> {
        let key = keys::join_bundle(&self.account.account_id);
        let data = bundle
            .to_yaml()
            .map_err(|e| ProvisionError::Provisioning(format!("cannot encode join bundle: {e}")))?;
        match self.store.put(&key, data, Precondition::DoesNotExist).await {
            Ok(_) => {
                info!("Published join credentials to {key}");
                Ok(())
            }
            Err(BlobStoreError::PreconditionFailed(_)) => {
                let existing = self.load_bundle().await?;
                if existing.server_ip == bundle.server_ip {
                    warn!("Join credentials for {} already published, keeping them", bundle.server_ip);
                    Ok(())
                } else {
                    Err(ProvisionError::StateConflict(format!(
                        "{key} (cluster already initialized on {})",
                        existing.server_ip
                    )))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn add_master(
        &self,
        node: &NodeSpec,
        lifecycle: &mut NodeLifecycle,
        cancel: &CancellationToken,
    ) -> Result<()> {
        Self::reject_spot(node)?;
        let bundle = self.load_bundle().await?;
        let host = self.provision(node, lifecycle, cancel).await?;
        lifecycle.advance(NodeState::Joining)?;

        info!("Joining {} as server of {}", host.address, bundle.server_ip);
        self.runner
            .run_remote(
                &host,
                &commands::join_server(&bundle.server_url(), &bundle.master_token, &host.address),
            )
            .await?;
        lifecycle.advance(NodeState::Ready)
    }

    pub async fn add_worker(
        &self,
        node: &NodeSpec,
        lifecycle: &mut NodeLifecycle,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let bundle = self.load_bundle().await?;
        let taints = labels::merge_taints(&self.account.taints, &node.taints);

        if node.is_spot() {
            return self.launch_spot_worker(node, &bundle, &taints, lifecycle, cancel).await;
        }

        let host = self.provision(node, lifecycle, cancel).await?;
        let node_labels = labels::merge_labels(
            Some(&host.address),
            node.is_gpu,
            &self.account.labels,
            &node.labels,
        );
        lifecycle.advance(NodeState::Joining)?;

        info!("Joining {} as agent of {}", host.address, bundle.server_ip);
        self.runner
            .run_remote(
                &host,
                &commands::join_agent(
                    &bundle.server_url(),
                    &bundle.join_token,
                    &host.address,
                    &node_labels,
                    &taints,
                ),
            )
            .await?;
        lifecycle.advance(NodeState::Ready)
    }

    /// Spot capacity comes and goes, so the instance carries its own join
    /// config and nobody waits for it.
    async fn launch_spot_worker(
        &self,
        node: &NodeSpec,
        bundle: &JoinCredentialsBundle,
        taints: &[Taint],
        lifecycle: &mut NodeLifecycle,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let node_labels = labels::merge_labels(None, node.is_gpu, &self.account.labels, &node.labels);
        let config = kubeconfig::render_agent_config(bundle, &node_labels, taints)?;
        let keys = self.ssh.ensure(&self.account.account_id).await?;
        lifecycle.advance(NodeState::Provisioning)?;
        self.resources
            .create(node, &keys, &[(NODE_CONFIG_FILE, config.as_bytes())], cancel)
            .await?;
        info!("Spot worker {} launched, it joins on boot", node.node_id);
        lifecycle.advance(NodeState::Launched)
    }
}
