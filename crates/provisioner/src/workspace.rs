use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info, warn};
use shared::models::keys;
use shared::utils::{BlobStore, BlobStoreError, Precondition};
use tokio_util::sync::CancellationToken;

use crate::archive::{copy_dir, reset_dir, WorkspaceArchiver};
use crate::error::{ProvisionError, Result};
use crate::metrics::{PERSIST_ESCALATIONS, PERSIST_RETRIES};
use crate::retry::{retry, RetryError, RetryPolicy};

/// A hydrated local workspace plus the archive generation it came from.
/// Persisting only succeeds if nobody replaced that generation meanwhile.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceLease {
    node_id: String,
    dir: PathBuf,
    generation: Option<i64>,
}

impl WorkspaceLease {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// None while no archive exists for this node yet.
    pub fn generation(&self) -> Option<i64> {
        self.generation
    }
}

pub struct WorkspaceManager {
    store: Arc<dyn BlobStore>,
    archiver: WorkspaceArchiver,
    root: PathBuf,
    persist_policy: RetryPolicy,
}

impl WorkspaceManager {
    pub fn new(store: Arc<dyn BlobStore>, root: impl Into<PathBuf>, persist_policy: RetryPolicy) -> Self {
        Self {
            store,
            archiver: WorkspaceArchiver::for_terraform(),
            root: root.into(),
            persist_policy,
        }
    }

    pub fn workspace_dir(&self, node_id: &str) -> PathBuf {
        self.root.join(node_id)
    }

    /// Rebuilds the local workspace for `node_id`. Whatever is on local disk
    /// is discarded first.
    pub async fn hydrate(
        &self,
        node_id: &str,
        template: &Path,
        create_if_missing: bool,
    ) -> Result<WorkspaceLease> {
        let key = keys::workspace_archive(node_id);
        let dir = self.workspace_dir(node_id);

        if !self.store.exists(&key).await? {
            if !create_if_missing {
                return Err(ProvisionError::StateNotFound(node_id.to_string()));
            }
            if !template.is_dir() {
                return Err(ProvisionError::Provisioning(format!(
                    "template directory {} does not exist",
                    template.display()
                )));
            }
            reset_dir(&dir)?;
            copy_dir(template, &dir)?;
            info!("Seeded workspace for {node_id} from {}", template.display());
            return Ok(WorkspaceLease {
                node_id: node_id.to_string(),
                dir,
                generation: None,
            });
        }

        let object = match self.store.get(&key).await {
            Ok(object) => object,
            // Deleted between the two calls
            Err(BlobStoreError::NotFound(_)) => {
                return Err(ProvisionError::StateNotFound(node_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        reset_dir(&dir)?;
        self.archiver.extract(&object.data, &dir)?;
        info!(
            "Hydrated workspace for {node_id} from {key} (generation {})",
            object.generation
        );
        Ok(WorkspaceLease {
            node_id: node_id.to_string(),
            dir,
            generation: Some(object.generation),
        })
    }

    /// Uploads the workspace behind `lease`. Transient storage errors are
    /// retried under the persist policy; a concurrent writer is reported as
    /// [`ProvisionError::StateConflict`] without retrying.
    ///
    /// One upload is always attempted, even when `cancel` already fired:
    /// the workspace may describe resources that exist by now. Cancellation
    /// only stops further retries.
    pub async fn persist(&self, lease: &mut WorkspaceLease, cancel: &CancellationToken) -> Result<()> {
        let key = keys::workspace_archive(&lease.node_id);
        let data = self.archiver.compress(&lease.dir)?;
        let precondition = Precondition::from_observed(lease.generation);
        let node_id = lease.node_id.clone();
        let operation_name = format!("Persisting workspace {key}");

        let policy = self.persist_policy.finishing_first_attempt();
        let outcome = retry(
            &policy,
            &operation_name,
            cancel,
            ProvisionError::is_transient,
            |attempt| {
                let data = data.clone();
                let key = key.as_str();
                let node_id = node_id.as_str();
                async move {
                    if attempt > 1 {
                        PERSIST_RETRIES.with_label_values(&[node_id]).inc();
                    }
                    self.store
                        .put(key, data, precondition)
                        .await
                        .map_err(ProvisionError::from)
                }
            },
        )
        .await;

        match outcome {
            Ok(generation) => {
                info!("Persisted workspace {key} (generation {generation})");
                lease.generation = Some(generation);
                Ok(())
            }
            Err(RetryError::Permanent {
                error: ProvisionError::RemoteIo(BlobStoreError::PreconditionFailed(_)),
                ..
            }) => {
                error!(
                    "Workspace {key} changed since it was hydrated, local state left at {}",
                    lease.dir.display()
                );
                Err(ProvisionError::StateConflict(key))
            }
            Err(RetryError::Permanent { error, .. }) => Err(error),
            Err(RetryError::Exhausted { attempts, last }) => {
                PERSIST_ESCALATIONS.with_label_values(&[node_id.as_str()]).inc();
                error!(
                    "Giving up on persisting {key} after {attempts} attempts, recover it manually from {}",
                    lease.dir.display()
                );
                Err(ProvisionError::PersistExhausted {
                    node_id,
                    attempts,
                    path: lease.dir.display().to_string(),
                    reason: last.to_string(),
                })
            }
            Err(RetryError::Cancelled { attempts }) => {
                warn!(
                    "Persisting {key} cancelled after {attempts} attempts, local state left at {}",
                    lease.dir.display()
                );
                Err(ProvisionError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::snapshot;
    use shared::utils::MockBlobStore;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        store: MockBlobStore,
        template: TempDir,
        root: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let template = TempDir::new().unwrap();
            fs::write(template.path().join("main.tf"), "provider \"aws\" {}").unwrap();
            fs::write(template.path().join("variables.tf"), "variable \"node_id\" {}").unwrap();
            Self {
                store: MockBlobStore::new(),
                template,
                root: TempDir::new().unwrap(),
            }
        }

        fn manager(&self, policy: RetryPolicy) -> WorkspaceManager {
            WorkspaceManager::new(Arc::new(self.store.clone()), self.root.path(), policy)
        }
    }

    fn quick() -> RetryPolicy {
        RetryPolicy::fixed(3, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_missing_state_without_create() {
        let fx = Fixture::new();
        let err = fx
            .manager(quick())
            .hydrate("n1", fx.template.path(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::StateNotFound(ref id) if id == "n1"));
        assert!(err.to_string().contains("no state found"));
        assert!(!fx.root.path().join("n1").exists());
    }

    #[tokio::test]
    async fn test_seed_from_template() {
        let fx = Fixture::new();
        let lease = fx
            .manager(quick())
            .hydrate("n1", fx.template.path(), true)
            .await
            .unwrap();
        assert_eq!(lease.generation(), None);
        assert_eq!(snapshot(lease.dir()), snapshot(fx.template.path()));
    }

    #[tokio::test]
    async fn test_hydrate_is_idempotent_and_ignores_local_edits() {
        let fx = Fixture::new();
        let manager = fx.manager(quick());
        let cancel = CancellationToken::new();

        let mut lease = manager.hydrate("n1", fx.template.path(), true).await.unwrap();
        fs::write(lease.dir().join("terraform.tfstate"), "{\"serial\": 1}").unwrap();
        manager.persist(&mut lease, &cancel).await.unwrap();

        let first = manager.hydrate("n1", fx.template.path(), false).await.unwrap();
        let first_snapshot = snapshot(first.dir());
        fs::write(first.dir().join("terraform.tfstate"), "local garbage").unwrap();
        fs::write(first.dir().join("extra.tf"), "#").unwrap();

        let second = manager.hydrate("n1", fx.template.path(), false).await.unwrap();
        assert_eq!(snapshot(second.dir()), first_snapshot);
        assert_eq!(first.generation(), second.generation());
    }

    #[tokio::test]
    async fn test_persist_then_hydrate_elsewhere() {
        let fx = Fixture::new();
        let cancel = CancellationToken::new();
        let manager = fx.manager(quick());
        let mut lease = manager.hydrate("n1", fx.template.path(), true).await.unwrap();
        fs::write(lease.dir().join("terraform.tfstate"), "{\"serial\": 3}").unwrap();
        fs::write(lease.dir().join(".terraform.tfstate.lock.info"), "held").unwrap();
        manager.persist(&mut lease, &cancel).await.unwrap();
        assert!(lease.generation().is_some());
        assert_eq!(fx.store.keys().await, vec!["n1.zip"]);

        let other_root = TempDir::new().unwrap();
        let other = WorkspaceManager::new(Arc::new(fx.store.clone()), other_root.path(), quick());
        let restored = other.hydrate("n1", fx.template.path(), false).await.unwrap();

        let mut expected = snapshot(lease.dir());
        expected.remove(".terraform.tfstate.lock.info");
        assert_eq!(snapshot(restored.dir()), expected);
    }

    #[tokio::test]
    async fn test_concurrent_writer_is_a_conflict() {
        let fx = Fixture::new();
        let cancel = CancellationToken::new();
        let manager = fx.manager(quick());
        let mut seed = manager.hydrate("n1", fx.template.path(), true).await.unwrap();
        manager.persist(&mut seed, &cancel).await.unwrap();

        let mut job_a = manager.hydrate("n1", fx.template.path(), false).await.unwrap();
        let mut job_b = job_a.clone();
        manager.persist(&mut job_a, &cancel).await.unwrap();

        let err = manager.persist(&mut job_b, &cancel).await.unwrap_err();
        assert!(matches!(err, ProvisionError::StateConflict(ref key) if key == "n1.zip"));
    }

    #[tokio::test]
    async fn test_two_first_writers_conflict() {
        let fx = Fixture::new();
        let cancel = CancellationToken::new();
        let manager = fx.manager(quick());
        let mut job_a = manager.hydrate("n1", fx.template.path(), true).await.unwrap();
        let mut job_b = job_a.clone();
        manager.persist(&mut job_a, &cancel).await.unwrap();
        assert!(matches!(
            manager.persist(&mut job_b, &cancel).await,
            Err(ProvisionError::StateConflict(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_persist_rides_out_outage() {
        let fx = Fixture::new();
        let manager = fx.manager(RetryPolicy::unbounded(Duration::from_secs(20)));
        let mut lease = manager.hydrate("n1", fx.template.path(), true).await.unwrap();
        fx.store.fail_next_puts(5);

        manager
            .persist(&mut lease, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fx.store.put_calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_persist_escalates() {
        let fx = Fixture::new();
        let manager = fx.manager(RetryPolicy::fixed(3, Duration::from_secs(20)));
        let mut lease = manager.hydrate("n-escalate", fx.template.path(), true).await.unwrap();
        fx.store.fail_next_puts(10);

        let err = manager
            .persist(&mut lease, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ProvisionError::PersistExhausted { attempts, path, .. } => {
                assert_eq!(attempts, 3);
                assert!(path.ends_with("n-escalate"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            PERSIST_ESCALATIONS.with_label_values(&["n-escalate"]).get(),
            1
        );
        assert!(lease.dir().exists());
    }

    #[tokio::test]
    async fn test_cancelled_persist_still_uploads_once() {
        let fx = Fixture::new();
        let manager = fx.manager(RetryPolicy::unbounded(Duration::from_secs(20)));
        let mut lease = manager.hydrate("n1", fx.template.path(), true).await.unwrap();
        fs::write(lease.dir().join("terraform.tfstate"), "{\"serial\": 1}").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        manager.persist(&mut lease, &cancel).await.unwrap();
        assert_eq!(fx.store.put_calls(), 1);
        assert_eq!(fx.store.keys().await, vec!["n1.zip"]);
        assert!(lease.generation().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_persist_stops_retrying() {
        let fx = Fixture::new();
        let manager = fx.manager(RetryPolicy::unbounded(Duration::from_secs(20)));
        let mut lease = manager.hydrate("n1", fx.template.path(), true).await.unwrap();
        fx.store.fail_next_puts(10);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            manager.persist(&mut lease, &cancel).await,
            Err(ProvisionError::Cancelled)
        ));
        assert_eq!(fx.store.put_calls(), 1);
        assert!(lease.dir().join("main.tf").exists());
    }
}
