use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use log::debug;

use super::{BlobStore, BlobStoreError, Precondition, StoredObject};

const GENERATION_SUFFIX: &str = ".generation";
const LOCK_SUFFIX: &str = ".lock";

/// Blob store kept in a local directory, for development and single-host
/// setups. Generations live in a sidecar file next to each object.
///
/// Every read and write of an object holds an exclusive `flock` on
/// `<key>.lock`, so jobs in different processes sharing one directory get
/// the same conditional-write guarantees as a real bucket. The sidecar is
/// bumped before the data is renamed into place: a crash in between leaves
/// the sidecar ahead of the data, which rejects stale writers instead of
/// accepting them.
pub struct LocalBlobStore {
    root: PathBuf,
}

/// Holds the object's lock file until dropped.
struct ObjectLock {
    file: File,
}

impl ObjectLock {
    fn acquire(object: &Path) -> Result<Self, BlobStoreError> {
        if let Some(parent) = object.parent() {
            fs::create_dir_all(parent).map_err(backend)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(sibling(object, LOCK_SUFFIX))
            .map_err(backend)?;
        file.lock_exclusive().map_err(backend)?;
        Ok(Self { file })
    }
}

impl Drop for ObjectLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, BlobStoreError> {
        let key = key.trim_start_matches('/');
        let invalid = key.is_empty()
            || Path::new(key)
                .components()
                .any(|c| !matches!(c, std::path::Component::Normal(_)));
        if invalid {
            return Err(BlobStoreError::Backend(format!("invalid object key `{key}`")));
        }
        Ok(self.root.join(key))
    }
}

fn sibling(object: &Path, suffix: &str) -> PathBuf {
    let mut name = object.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn backend(err: std::io::Error) -> BlobStoreError {
    BlobStoreError::Backend(err.to_string())
}

fn read_generation(object: &Path) -> Result<Option<i64>, BlobStoreError> {
    match fs::read_to_string(sibling(object, GENERATION_SUFFIX)) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| BlobStoreError::Backend(format!("corrupt generation file: {e}"))),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            // Objects copied in by hand have no sidecar yet
            if object.exists() {
                Ok(Some(1))
            } else {
                Ok(None)
            }
        }
        Err(e) => Err(backend(e)),
    }
}

fn write_replacing(path: &Path, data: &[u8]) -> Result<(), BlobStoreError> {
    let staging = sibling(path, ".partial");
    fs::write(&staging, data).map_err(backend)?;
    fs::rename(&staging, path).map_err(backend)
}

fn get_locked(key: &str, path: &Path) -> Result<StoredObject, BlobStoreError> {
    let _lock = ObjectLock::acquire(path)?;
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(BlobStoreError::NotFound(key.to_string()))
        }
        Err(e) => return Err(backend(e)),
    };
    let generation = read_generation(path)?.unwrap_or(1);
    Ok(StoredObject { data, generation })
}

fn put_locked(
    key: &str,
    path: &Path,
    data: &[u8],
    precondition: Precondition,
) -> Result<i64, BlobStoreError> {
    let _lock = ObjectLock::acquire(path)?;
    let current = read_generation(path)?;
    let allowed = match precondition {
        Precondition::None => true,
        Precondition::DoesNotExist => current.is_none(),
        Precondition::GenerationMatch(expected) => current == Some(expected),
    };
    if !allowed {
        return Err(BlobStoreError::PreconditionFailed(key.to_string()));
    }

    let generation = current.unwrap_or(0) + 1;
    let staging = sibling(path, ".partial");
    fs::write(&staging, data).map_err(backend)?;
    write_replacing(
        &sibling(path, GENERATION_SUFFIX),
        generation.to_string().as_bytes(),
    )?;
    fs::rename(&staging, path).map_err(backend)?;
    Ok(generation)
}

fn delete_locked(key: &str, path: &Path) -> Result<(), BlobStoreError> {
    let _lock = ObjectLock::acquire(path)?;
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(BlobStoreError::NotFound(key.to_string()))
        }
        Err(e) => return Err(backend(e)),
    }
    let _ = fs::remove_file(sibling(path, GENERATION_SUFFIX));
    Ok(())
}

/// Runs a blocking, lock-holding store operation off the async runtime.
async fn blocking<T, F>(operation: F) -> Result<T, BlobStoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BlobStoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(|e| BlobStoreError::Backend(format!("storage task failed: {e}")))?
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn exists(&self, key: &str) -> Result<bool, BlobStoreError> {
        tokio::fs::try_exists(self.object_path(key)?)
            .await
            .map_err(backend)
    }

    async fn get(&self, key: &str) -> Result<StoredObject, BlobStoreError> {
        let path = self.object_path(key)?;
        let key = key.to_string();
        blocking(move || get_locked(&key, &path)).await
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        precondition: Precondition,
    ) -> Result<i64, BlobStoreError> {
        let path = self.object_path(key)?;
        let owned_key = key.to_string();
        let generation =
            blocking(move || put_locked(&owned_key, &path, &data, precondition)).await?;
        debug!("Stored {} at generation {}", key, generation);
        Ok(generation)
    }

    async fn delete(&self, key: &str) -> Result<(), BlobStoreError> {
        let path = self.object_path(key)?;
        let key = key.to_string();
        blocking(move || delete_locked(&key, &path)).await
    }
}
