use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use serde::Deserialize;

use crate::error::{ProvisionError, Result};
use crate::runner::{CommandRunner, LocalCommand};

pub type TfVars = BTreeMap<String, String>;

/// Values from `terraform output -json`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TfOutputs(BTreeMap<String, serde_json::Value>);

#[derive(Deserialize)]
struct OutputEntry {
    value: serde_json::Value,
}

impl TfOutputs {
    pub fn from_json(raw: &str) -> Result<Self> {
        let entries: BTreeMap<String, OutputEntry> = serde_json::from_str(raw).map_err(|e| {
            ProvisionError::Provisioning(format!("unreadable terraform outputs: {e}"))
        })?;
        Ok(Self(
            entries.into_iter().map(|(k, v)| (k, v.value)).collect(),
        ))
    }

    pub fn from_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        Self(
            values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn require_str(&self, name: &str) -> Result<&str> {
        self.get_str(name).ok_or_else(|| {
            ProvisionError::Provisioning(format!("apply produced no `{name}` output"))
        })
    }
}

/// The infrastructure-as-code tool, seen as a black box over one workspace.
#[async_trait]
pub trait InfraTool: Send + Sync {
    async fn apply(&self, workspace: &Path, vars: &TfVars) -> Result<TfOutputs>;

    async fn destroy(&self, workspace: &Path, vars: &TfVars) -> Result<()>;
}

pub struct TerraformCli {
    binary: String,
    runner: Arc<dyn CommandRunner>,
}

impl TerraformCli {
    pub fn new(binary: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }

    /// Variables go through `TF_VAR_*` so credentials never show up in the
    /// process list.
    fn command(&self, workspace: &Path, vars: &TfVars, args: &[&str]) -> LocalCommand {
        let mut command = LocalCommand::new(&self.binary)
            .args(args.iter().copied())
            .arg("-no-color")
            .current_dir(workspace)
            .env("TF_IN_AUTOMATION", "1");
        for (key, value) in vars {
            command = command.env(format!("TF_VAR_{key}"), value);
        }
        command
    }

    async fn run(&self, workspace: &Path, vars: &TfVars, args: &[&str]) -> Result<String> {
        let command = self.command(workspace, vars, args);
        self.runner
            .run_local(&command)
            .await
            .map_err(|e| match e {
                ProvisionError::Command { command, reason } => {
                    ProvisionError::Provisioning(format!("`{command}` failed: {reason}"))
                }
                other => other,
            })
    }

    async fn init(&self, workspace: &Path, vars: &TfVars) -> Result<()> {
        self.run(workspace, vars, &["init", "-input=false"]).await?;
        Ok(())
    }
}

#[async_trait]
impl InfraTool for TerraformCli {
    async fn apply(&self, workspace: &Path, vars: &TfVars) -> Result<TfOutputs> {
        self.init(workspace, vars).await?;
        info!("Applying terraform in {}", workspace.display());
        self.run(workspace, vars, &["apply", "-auto-approve", "-input=false"])
            .await?;
        let raw = self.run(workspace, vars, &["output", "-json"]).await?;
        TfOutputs::from_json(&raw)
    }

    async fn destroy(&self, workspace: &Path, vars: &TfVars) -> Result<()> {
        self.init(workspace, vars).await?;
        info!("Destroying terraform resources in {}", workspace.display());
        self.run(workspace, vars, &["destroy", "-auto-approve", "-input=false"])
            .await?;
        Ok(())
    }
}
