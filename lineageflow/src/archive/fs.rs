//! Filesystem archive: one JSON file per tree.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use super::{archive_key, checksum, decode, encode, ArchiveReceipt, ArchiveStore};
use crate::core::LineageTree;
use crate::errors::ArchiveError;
use crate::utils::{generate_event_id, is_valid_identifier};

/// Archive writing `<root_id>.json` files into a directory.
///
/// Files are written to a temporary name and hard-linked into place, so a
/// reader never sees a partial object and the first writer wins.
#[derive(Debug, Clone)]
pub struct FsArchive {
    directory: PathBuf,
}

impl FsArchive {
    /// Creates an archive rooted at `directory`. The directory is created on
    /// first write.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// The archive directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn directory_error(&self, err: &std::io::Error) -> ArchiveError {
        ArchiveError::Io {
            key: self.directory.display().to_string(),
            reason: err.to_string(),
        }
    }

    fn path_for(&self, root_id: &str) -> Result<PathBuf, ArchiveError> {
        if !is_valid_identifier(root_id) {
            return Err(io_error(root_id, "root id is not a valid object name"));
        }
        Ok(self.directory.join(archive_key(root_id)))
    }
}

fn io_error(root_id: &str, reason: impl ToString) -> ArchiveError {
    ArchiveError::Io {
        key: archive_key(root_id),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl ArchiveStore for FsArchive {
    async fn put_if_absent(&self, tree: &LineageTree) -> Result<ArchiveReceipt, ArchiveError> {
        let root_id = tree.root_id.as_str();
        let target = self.path_for(root_id)?;
        let bytes = encode(tree)?;

        fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| io_error(root_id, e))?;

        let staging = self
            .directory
            .join(format!(".{}.{}.tmp", archive_key(root_id), generate_event_id()));
        fs::write(&staging, &bytes)
            .await
            .map_err(|e| io_error(root_id, e))?;

        let linked = fs::hard_link(&staging, &target).await;
        if let Err(err) = fs::remove_file(&staging).await {
            warn!(
                path = %staging.display(),
                error = %err,
                "Could not remove archive staging file"
            );
        }

        match linked {
            Ok(()) => {
                debug!(path = %target.display(), bytes = bytes.len(), "Archived lineage tree");
                Ok(ArchiveReceipt {
                    key: archive_key(root_id),
                    checksum: checksum(&bytes),
                    bytes: bytes.len(),
                    newly_written: true,
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let existing = fs::read(&target).await.map_err(|e| io_error(root_id, e))?;
                Ok(ArchiveReceipt {
                    key: archive_key(root_id),
                    checksum: checksum(&existing),
                    bytes: existing.len(),
                    newly_written: false,
                })
            }
            Err(e) => Err(io_error(root_id, e)),
        }
    }

    async fn get(&self, root_id: &str) -> Result<Option<LineageTree>, ArchiveError> {
        let path = self.path_for(root_id)?;
        match fs::read(&path).await {
            Ok(bytes) => decode(&archive_key(root_id), &bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(root_id, e)),
        }
    }

    async fn list(&self) -> Result<Vec<String>, ArchiveError> {
        let mut entries = match fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.directory_error(&e)),
        };

        let mut roots = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.directory_error(&e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(root) = name.strip_suffix(".json") {
                roots.push(root.to_string());
            }
        }
        roots.sort();
        Ok(roots)
    }
}
