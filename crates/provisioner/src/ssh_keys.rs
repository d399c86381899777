use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use shared::models::keys;
use shared::utils::{BlobStore, BlobStoreError, Precondition};

use crate::archive::{reset_dir, WorkspaceArchiver};
use crate::error::Result;
use crate::runner::{CommandRunner, LocalCommand};

pub const PRIVATE_KEY_FILE: &str = "id_ed25519";
pub const PUBLIC_KEY_FILE: &str = "id_ed25519.pub";

/// Local copy of an account's keypair.
#[derive(Debug, Clone, PartialEq)]
pub struct SshKeyPair {
    pub dir: PathBuf,
    pub private_key: PathBuf,
    pub public_key: PathBuf,
}

impl SshKeyPair {
    fn in_dir(dir: PathBuf) -> Self {
        Self {
            private_key: dir.join(PRIVATE_KEY_FILE),
            public_key: dir.join(PUBLIC_KEY_FILE),
            dir,
        }
    }
}

pub struct SshAccessManager {
    store: Arc<dyn BlobStore>,
    runner: Arc<dyn CommandRunner>,
    archiver: WorkspaceArchiver,
    ssh_root: PathBuf,
    keygen_binary: String,
}

impl SshAccessManager {
    pub fn new(
        store: Arc<dyn BlobStore>,
        runner: Arc<dyn CommandRunner>,
        ssh_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            runner,
            archiver: WorkspaceArchiver::default(),
            ssh_root: ssh_root.into(),
            keygen_binary: "ssh-keygen".to_string(),
        }
    }

    pub fn with_keygen_binary(mut self, binary: impl Into<String>) -> Self {
        self.keygen_binary = binary.into();
        self
    }

    pub fn key_dir(&self, account_id: &str) -> PathBuf {
        self.ssh_root.join(account_id)
    }

    /// Makes the account's keypair available locally, creating and
    /// publishing it on first use.
    pub async fn ensure(&self, account_id: &str) -> Result<SshKeyPair> {
        let key = keys::ssh_bundle(account_id);
        let pair = SshKeyPair::in_dir(self.key_dir(account_id));

        if self.store.exists(&key).await? {
            debug!("Fetching SSH keys for account {account_id}");
            self.download(&key, &pair).await?;
            return Ok(pair);
        }

        self.generate(account_id, &pair).await?;
        let bundle = self.archiver.compress(&pair.dir)?;
        match self.store.put(&key, bundle, Precondition::DoesNotExist).await {
            Ok(_) => info!("Created SSH key bundle for account {account_id}"),
            Err(BlobStoreError::PreconditionFailed(_)) => {
                info!("Another job published keys for account {account_id} first, using those");
                self.download(&key, &pair).await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(pair)
    }

    /// Keys for tearing a node down. The account's published keys are used
    /// when present; otherwise a local-only pair is generated so templates
    /// that read the key files still evaluate. Nothing is uploaded.
    pub async fn for_teardown(&self, account_id: &str) -> Result<SshKeyPair> {
        let key = keys::ssh_bundle(account_id);
        let pair = SshKeyPair::in_dir(self.key_dir(account_id));

        if self.store.exists(&key).await? {
            self.download(&key, &pair).await?;
        } else {
            warn!("No SSH key bundle for account {account_id}, using throwaway keys for teardown");
            self.generate(account_id, &pair).await?;
        }
        Ok(pair)
    }

    async fn download(&self, key: &str, pair: &SshKeyPair) -> Result<()> {
        let object = self.store.get(key).await?;
        reset_dir(&pair.dir)?;
        self.archiver.extract(&object.data, &pair.dir)?;
        restrict(&pair.private_key)?;
        Ok(())
    }

    async fn generate(&self, account_id: &str, pair: &SshKeyPair) -> Result<()> {
        reset_dir(&pair.dir)?;
        let command = LocalCommand::new(&self.keygen_binary)
            .args(["-q", "-t", "ed25519", "-N", "", "-C"])
            .arg(format!("provisioner-{account_id}"))
            .arg("-f")
            .arg(pair.private_key.to_string_lossy());
        self.runner.run_local(&command).await?;
        restrict(&pair.private_key)?;
        Ok(())
    }
}

/// Owner-only read/write, as ssh requires for private keys.
fn restrict(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
