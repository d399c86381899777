use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use shared::models::{NodeSpec, ProviderCredentials};

use crate::error::{ProvisionError, Result};
use crate::ssh_keys::SshKeyPair;
use crate::terraform::TfVars;

mod aws;
mod digitalocean;

/// k3s config rendered into the workspace for nodes that join on their own.
pub const NODE_CONFIG_FILE: &str = "node-config.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudProvider {
    Aws,
    DigitalOcean,
    Azure,
    Gcp,
}

impl FromStr for CloudProvider {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "aws" => Ok(CloudProvider::Aws),
            "do" | "digitalocean" => Ok(CloudProvider::DigitalOcean),
            "azure" => Ok(CloudProvider::Azure),
            "gcp" => Ok(CloudProvider::Gcp),
            _ => Err(ProvisionError::UnsupportedProvider(s.to_string())),
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloudProvider::Aws => "aws",
            CloudProvider::DigitalOcean => "do",
            CloudProvider::Azure => "azure",
            CloudProvider::Gcp => "gcp",
        };
        f.write_str(name)
    }
}

impl CloudProvider {
    /// Errors for providers that have no templates yet.
    pub fn ensure_supported(self) -> Result<Self> {
        match self {
            CloudProvider::Aws | CloudProvider::DigitalOcean => Ok(self),
            CloudProvider::Azure | CloudProvider::Gcp => {
                Err(ProvisionError::UnsupportedProvider(self.to_string()))
            }
        }
    }

    pub fn template_dir(self, template_root: &Path) -> Result<PathBuf> {
        self.ensure_supported()?;
        Ok(template_root.join(self.to_string()))
    }

    /// Login user baked into the provider's default images.
    pub fn ssh_user(self) -> Result<&'static str> {
        match self.ensure_supported()? {
            CloudProvider::DigitalOcean => Ok("root"),
            _ => Ok("ubuntu"),
        }
    }

    pub fn terraform_vars(
        self,
        node: &NodeSpec,
        credentials: &ProviderCredentials,
        keys: &SshKeyPair,
        workspace: &Path,
    ) -> Result<TfVars> {
        match self {
            CloudProvider::Aws => aws::terraform_vars(node, credentials, keys, workspace),
            CloudProvider::DigitalOcean => digitalocean::terraform_vars(node, credentials, keys),
            CloudProvider::Azure | CloudProvider::Gcp => {
                Err(ProvisionError::UnsupportedProvider(self.to_string()))
            }
        }
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ProvisionError::decode("provider credentials", format!("missing `{field}`")))
}

fn set(vars: &mut TfVars, key: &str, value: impl ToString) {
    vars.insert(key.to_string(), value.to_string());
}
