use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use super::node::{Taint, ValidationError};

/// Secret material for one cloud account. Supplied per job and never written
/// to the blob store or the workspace by this crate.
#[derive(Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    pub account_id: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("ProviderCredentials")
            .field("account_id", &self.account_id)
            .field("access_key", &redact(&self.access_key))
            .field("secret_key", &redact(&self.secret_key))
            .field("api_token", &redact(&self.api_token))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountContext {
    pub account_id: String,
    /// Directory holding one Terraform template per provider (`aws/`, `do/`).
    pub template_root: PathBuf,
    /// Per-account SSH key directories are created below this path.
    pub ssh_root: PathBuf,
    /// Node workspaces are hydrated below this path. Filled in from the
    /// process configuration when the payload leaves it out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
}

impl AccountContext {
    pub fn validate(&self, credentials: &ProviderCredentials) -> Result<(), ValidationError> {
        if self.account_id.trim().is_empty() {
            return Err(ValidationError::MissingField("accountId"));
        }
        if self.account_id.contains(['/', '\\']) || self.account_id.starts_with('.') {
            return Err(ValidationError::InvalidField {
                field: "accountId",
                reason: format!("`{}` is not usable as a storage key", self.account_id),
            });
        }
        if credentials.account_id != self.account_id {
            return Err(ValidationError::InvalidField {
                field: "accountId",
                reason: format!(
                    "credentials belong to `{}` but the account context is `{}`",
                    credentials.account_id, self.account_id
                ),
            });
        }
        Ok(())
    }
}
