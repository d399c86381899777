use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use log::debug;
use shared::utils::google_cloud::GcsBlobStore;
use shared::utils::local::LocalBlobStore;
use shared::utils::BlobStore;

use crate::readiness::{DEFAULT_ATTEMPTS, DEFAULT_INTERVAL};
use crate::retry::RetryPolicy;

pub const DEFAULT_PERSIST_INTERVAL: Duration = Duration::from_secs(20);

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("com", "provisioner", "provisioner")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("provisioner"))
}

/// Where archives and credential bundles live.
#[derive(Debug, Clone, PartialEq)]
pub enum StateBackend {
    Gcs {
        bucket: String,
        credentials_base64: String,
    },
    Local {
        dir: PathBuf,
    },
}

impl StateBackend {
    pub async fn open(&self) -> anyhow::Result<Arc<dyn BlobStore>> {
        match self {
            StateBackend::Gcs {
                bucket,
                credentials_base64,
            } => {
                debug!("Using GCS state bucket {bucket}");
                Ok(Arc::new(GcsBlobStore::new(bucket, credentials_base64).await?))
            }
            StateBackend::Local { dir } => {
                debug!("Using local state directory {}", dir.display());
                Ok(Arc::new(LocalBlobStore::new(dir.clone())))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadinessConfig {
    pub attempts: u32,
    pub interval: Duration,
    pub deadline: Option<Duration>,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
            deadline: None,
        }
    }
}

/// Process level settings. Everything that differs between jobs arrives in
/// the job payloads instead.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionerConfig {
    pub backend: StateBackend,
    /// Used when the account context names no workspace root.
    pub workspace_root: PathBuf,
    pub terraform_binary: String,
    pub ssh_binary: String,
    pub ssh_connect_timeout: Duration,
    /// Overrides the provider's default login user.
    pub ssh_user: Option<String>,
    pub readiness: ReadinessConfig,
    pub persist_policy: RetryPolicy,
    pub metrics_file: Option<PathBuf>,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            backend: StateBackend::Local {
                dir: data_dir.join("state"),
            },
            workspace_root: data_dir.join("workspaces"),
            terraform_binary: "terraform".to_string(),
            ssh_binary: "ssh".to_string(),
            ssh_connect_timeout: Duration::from_secs(10),
            ssh_user: None,
            readiness: ReadinessConfig::default(),
            persist_policy: RetryPolicy::unbounded(DEFAULT_PERSIST_INTERVAL),
            metrics_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProvisionerConfig::default();
        assert_eq!(config.readiness.attempts, 24);
        assert_eq!(config.readiness.interval, Duration::from_secs(5));
        assert!(!config.persist_policy.is_bounded());
        assert_eq!(config.persist_policy.interval, Duration::from_secs(20));
        assert!(matches!(config.backend, StateBackend::Local { .. }));
        assert!(config.workspace_root.ends_with("workspaces"));
    }

    #[tokio::test]
    async fn test_open_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateBackend::Local {
            dir: dir.path().to_path_buf(),
        }
        .open()
        .await
        .unwrap();
        assert!(!store.exists("missing.zip").await.unwrap());
    }
}
