//! Filesystem backup destination (local disk or a mounted share)

use super::{BackupLayout, TransferError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct FolderTarget {
    root: PathBuf,
    layout: BackupLayout,
}

impl FolderTarget {
    pub fn new(root: PathBuf, layout: BackupLayout) -> Self {
        Self { root, layout }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn layout(&self) -> &BackupLayout {
        &self.layout
    }

    /// Copy `local` to `<root>/<key>`, creating parents. Returns bytes written.
    pub(crate) fn put(&self, key: &str, local: &Path) -> Result<u64, TransferError> {
        let dest = self.root.join(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|source| TransferError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        debug!("Copying {:?} -> {:?}", local, dest);
        fs::copy(local, &dest).map_err(|source| TransferError::Io { path: dest, source })
    }

    /// Copy `<root>/<key>` to `dest`. `None` when the key does not exist.
    pub(crate) fn get(&self, key: &str, dest: &Path) -> Result<Option<u64>, TransferError> {
        let source_path = self.root.join(key);
        if !source_path.is_file() {
            return Ok(None);
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|source| TransferError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        debug!("Copying {:?} -> {:?}", source_path, dest);
        fs::copy(&source_path, dest)
            .map(Some)
            .map_err(|source| TransferError::Io {
                path: source_path,
                source,
            })
    }
}
