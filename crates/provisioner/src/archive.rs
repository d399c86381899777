use std::fs;
use std::io::Write;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::warn;
use tar::{Archive, Builder};
use walkdir::WalkDir;

use crate::error::{ProvisionError, Result};

/// Local file header magic of a PKZIP archive.
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Packs a directory into a gzip'd tar and back. Paths inside the archive are
/// relative to the packed directory.
///
/// Objects keep their historical `.zip` key names, but the payload is gzip'd
/// tar. Real zip archives written by earlier tooling under those keys cannot
/// be extracted; [`WorkspaceArchiver::extract`] rejects them with an error
/// naming the format, and they have to be repacked as `tar.gz` once.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceArchiver {
    excluded: Vec<String>,
}

impl WorkspaceArchiver {
    /// Archiver for IaC workspaces. Provider plugins are restored by `init`
    /// and lock info only describes this process.
    pub fn for_terraform() -> Self {
        Self::excluding([".terraform", ".terraform.tfstate.lock.info"])
    }

    pub fn excluding<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: names.into_iter().map(Into::into).collect(),
        }
    }

    fn is_excluded(&self, name: &std::ffi::OsStr) -> bool {
        self.excluded.iter().any(|e| name == e.as_str())
    }

    pub fn compress(&self, dir: &Path) -> Result<Vec<u8>> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = Builder::new(encoder);

        let walker = WalkDir::new(dir)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry.file_name()));
        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            let relative = entry
                .path()
                .strip_prefix(dir)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
            if entry.file_type().is_dir() {
                builder.append_dir(relative, entry.path())?;
            } else {
                builder.append_path_with_name(entry.path(), relative)?;
            }
        }

        let mut encoder = builder.into_inner()?;
        encoder.flush()?;
        Ok(encoder.finish()?)
    }

    /// Unpacks `data` into `dest`, creating it if needed. Entries that would
    /// land outside `dest` are skipped.
    pub fn extract(&self, data: &[u8], dest: &Path) -> Result<()> {
        if data.starts_with(ZIP_MAGIC) {
            return Err(ProvisionError::Provisioning(
                "archive is in zip format, only gzip'd tar workspaces can be restored".to_string(),
            ));
        }
        fs::create_dir_all(dest)?;
        let mut archive = Archive::new(GzDecoder::new(data));
        archive.set_preserve_permissions(true);
        archive.set_overwrite(true);

        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.into_owned();
            if path
                .file_name()
                .is_some_and(|name| self.is_excluded(name))
            {
                continue;
            }
            if !entry.unpack_in(dest)? {
                warn!("Skipped archive entry outside of {}: {}", dest.display(), path.display());
            }
        }
        Ok(())
    }
}

/// Removes `dir` if present and creates it empty.
pub(crate) fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Recursively copies the contents of `from` into `to`.
pub(crate) fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
