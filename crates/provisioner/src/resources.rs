use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info, warn};
use shared::models::{NodeSpec, ProviderCredentials};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::providers::CloudProvider;
use crate::ssh_keys::{SshAccessManager, SshKeyPair};
use crate::terraform::{InfraTool, TfOutputs};
use crate::workspace::WorkspaceManager;

pub const PUBLIC_IP_OUTPUT: &str = "public_ip";

#[derive(Debug, Clone)]
pub struct Instance {
    pub outputs: TfOutputs,
}

impl Instance {
    pub fn public_ip(&self) -> Result<&str> {
        self.outputs.require_str(PUBLIC_IP_OUTPUT)
    }
}

/// Creates and destroys the cloud instance behind one node. Every run ends by
/// writing the workspace back to the blob store, whether the IaC tool
/// succeeded or not.
pub struct CloudResourceManager {
    provider: CloudProvider,
    credentials: ProviderCredentials,
    template_root: PathBuf,
    workspaces: WorkspaceManager,
    tool: Arc<dyn InfraTool>,
    ssh: Arc<SshAccessManager>,
}

impl CloudResourceManager {
    pub fn new(
        provider: CloudProvider,
        credentials: ProviderCredentials,
        template_root: impl Into<PathBuf>,
        workspaces: WorkspaceManager,
        tool: Arc<dyn InfraTool>,
        ssh: Arc<SshAccessManager>,
    ) -> Self {
        Self {
            provider,
            credentials,
            template_root: template_root.into(),
            workspaces,
            tool,
            ssh,
        }
    }

    /// `extra_files` are written into the workspace root before applying.
    pub async fn create(
        &self,
        node: &NodeSpec,
        keys: &SshKeyPair,
        extra_files: &[(&str, &[u8])],
        cancel: &CancellationToken,
    ) -> Result<Instance> {
        let template = self.provider.template_dir(&self.template_root)?;
        let workspace = self.workspaces.workspace_dir(&node.node_id);
        let vars = self
            .provider
            .terraform_vars(node, &self.credentials, keys, &workspace)?;

        let mut lease = self.workspaces.hydrate(&node.node_id, &template, true).await?;
        for (name, body) in extra_files {
            tokio::fs::write(lease.dir().join(name), body).await?;
        }

        info!("Creating {} instance for node {}", self.provider, node.node_id);
        let applied = self.tool.apply(lease.dir(), &vars).await;
        let persisted = self.workspaces.persist(&mut lease, cancel).await;

        match (applied, persisted) {
            (Ok(outputs), Ok(())) => Ok(Instance { outputs }),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(persist_error)) => {
                error!("Workspace for {} not saved after failed apply: {persist_error}", node.node_id);
                Err(e)
            }
        }
    }

    /// Tears down the node's instance. With `force`, a failing destroy is
    /// logged and the run still counts as a success.
    pub async fn delete(&self, node: &NodeSpec, force: bool, cancel: &CancellationToken) -> Result<()> {
        let template = self.provider.template_dir(&self.template_root)?;
        let mut lease = self.workspaces.hydrate(&node.node_id, &template, false).await?;
        let keys = self.ssh.for_teardown(&self.credentials.account_id).await?;
        let vars = self
            .provider
            .terraform_vars(node, &self.credentials, &keys, lease.dir())?;

        info!("Destroying {} instance for node {}", self.provider, node.node_id);
        let destroyed = match self.tool.destroy(lease.dir(), &vars).await {
            Err(e) if force => {
                warn!("Ignoring failed destroy of node {} (forced): {e}", node.node_id);
                Ok(())
            }
            other => other,
        };
        let persisted = self.workspaces.persist(&mut lease, cancel).await;

        match (destroyed, persisted) {
            (Ok(()), result) => result,
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(persist_error)) => {
                error!("Workspace for {} not saved after failed destroy: {persist_error}", node.node_id);
                Err(e)
            }
        }
    }
}
