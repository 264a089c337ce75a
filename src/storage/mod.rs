//! Backup destinations
//!
//! A [`BackupTarget`] is either a filesystem folder or an object-store bucket.
//! Both compute the same relative keys from the configuration:
//!
//! - database: `<hostname>/<database_folder>/<dump_file>.tar.gz`
//! - repository: `<hostname>/<repos_folder>/<repo>.git.tar.gz`
//! - repository list: `<hostname>/<repos_list_folder>/<basename(repo_list_file)>`
//!
//! Every transfer honors dry-run by doing nothing and reporting success.

pub mod folder;
pub mod object_store;
pub mod s3;

use crate::config::{BackupStructure, Config};
use crate::context::RunContext;
use crate::utils::format::human_size;
use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub use folder::FolderTarget;
pub use object_store::{ObjectStoreClient, ObjectStoreTarget, ObjectVersion, PutOptions};
pub use s3::S3Client;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Local source file does not exist: {0:?}")]
    SourceMissing(PathBuf),

    #[error("Mismatch in bytes transferred for {key}: {written} written, local file is {expected}")]
    IntegrityMismatch { key: String, expected: u64, written: u64 },

    #[error("Backup key not found on {target}: {key}")]
    NotFound { target: String, key: String },

    #[error("Download of {key} finished but {dest:?} does not exist")]
    Incomplete { key: String, dest: PathBuf },

    #[error("{target}: {reason}")]
    Backend { target: String, reason: String },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Direction of a fan-out transfer, for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => f.write_str("upload"),
            Direction::Download => f.write_str("download"),
        }
    }
}

/// One or more targets failed for a unit of work
#[derive(Debug, thiserror::Error)]
#[error("{} of {} failed on {} target(s): {}", .direction, .label, .failures.len(), summarize(.failures))]
pub struct FanOutError {
    pub label: String,
    pub direction: Direction,
    /// (target description, error)
    pub failures: Vec<(String, TransferError)>,
}

fn summarize(failures: &[(String, TransferError)]) -> String {
    failures
        .iter()
        .map(|(target, err)| format!("[{}] {}", target, err))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Canonical relative keys shared by every destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupLayout {
    hostname: String,
    structure: BackupStructure,
    dump_file: String,
    repo_list_name: String,
}

impl BackupLayout {
    pub fn from_config(config: &Config) -> Self {
        let repo_list_name = config
            .global
            .repo_list_file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| config.global.repo_list_file.display().to_string());

        Self {
            hostname: config.global.hostname.clone(),
            structure: config.backup_structure.clone(),
            dump_file: config.database.dump_file.clone(),
            repo_list_name,
        }
    }

    fn join(&self, folder: &str, leaf: &str) -> String {
        let folder = folder.trim_matches('/');
        let leaf = leaf.trim_matches('/');
        if folder.is_empty() {
            format!("{}/{}", self.hostname, leaf)
        } else {
            format!("{}/{}/{}", self.hostname, folder, leaf)
        }
    }

    pub fn database_path(&self) -> String {
        self.join(
            &self.structure.database_folder,
            &format!("{}.tar.gz", self.dump_file),
        )
    }

    pub fn repo_path(&self, repo: &str) -> String {
        self.join(&self.structure.repos_folder, &format!("{}.git.tar.gz", repo))
    }

    pub fn repo_list_path(&self) -> String {
        self.join(&self.structure.repos_list_folder, &self.repo_list_name)
    }
}

/// A configured backup destination
pub enum BackupTarget {
    Folder(FolderTarget),
    ObjectStore(ObjectStoreTarget),
}

impl BackupTarget {
    pub fn description(&self) -> String {
        match self {
            BackupTarget::Folder(f) => format!("Folder Backup ({})", f.root().display()),
            BackupTarget::ObjectStore(o) => format!("S3 Backup ({})", o.bucket()),
        }
    }

    fn layout(&self) -> &BackupLayout {
        match self {
            BackupTarget::Folder(f) => f.layout(),
            BackupTarget::ObjectStore(o) => o.layout(),
        }
    }

    pub fn resolve_database_path(&self) -> String {
        self.layout().database_path()
    }

    pub fn resolve_repo_path(&self, repo: &str) -> String {
        self.layout().repo_path(repo)
    }

    pub fn resolve_repo_list_path(&self) -> String {
        self.layout().repo_list_path()
    }

    /// Copy `local_file` to `path` on this target
    pub fn upload(&self, path: &str, local_file: &Path, ctx: &RunContext) -> Result<(), TransferError> {
        if ctx.dry_run() {
            info!("[DRY RUN] Would upload {:?} to {} ({})", local_file, path, self.description());
            return Ok(());
        }

        let expected = match std::fs::metadata(local_file) {
            Ok(meta) => meta.len(),
            Err(_) => return Err(TransferError::SourceMissing(local_file.to_path_buf())),
        };

        info!(
            "Uploading {:?} to {} on {} ({})",
            local_file,
            path,
            self.description(),
            human_size(expected)
        );

        let written = match self {
            BackupTarget::Folder(f) => f.put(path, local_file)?,
            BackupTarget::ObjectStore(o) => o.put(path, local_file)?,
        };

        if written != expected {
            return Err(TransferError::IntegrityMismatch {
                key: path.to_string(),
                expected,
                written,
            });
        }

        Ok(())
    }

    /// Fetch `path` from this target into `local_dest`
    pub fn download(&self, path: &str, local_dest: &Path, ctx: &RunContext) -> Result<(), TransferError> {
        if ctx.dry_run() {
            info!("[DRY RUN] Would download {} from {} to {:?}", path, self.description(), local_dest);
            return Ok(());
        }

        info!("Downloading {} from {} to {:?}", path, self.description(), local_dest);

        let fetched = match self {
            BackupTarget::Folder(f) => f.get(path, local_dest)?,
            BackupTarget::ObjectStore(o) => o.get(path, local_dest)?,
        };

        if fetched.is_none() {
            return Err(TransferError::NotFound {
                target: self.description(),
                key: path.to_string(),
            });
        }

        if !local_dest.exists() {
            return Err(TransferError::Incomplete {
                key: path.to_string(),
                dest: local_dest.to_path_buf(),
            });
        }

        Ok(())
    }

    /// Version identifiers of `path`, newest first
    pub fn list_versions(&self, path: &str, ctx: &RunContext) -> Result<Vec<String>, TransferError> {
        match self {
            BackupTarget::Folder(_) => Ok(vec!["0".to_string()]),
            BackupTarget::ObjectStore(_) if ctx.dry_run() => {
                info!("[DRY RUN] Would list versions of {} on {}", path, self.description());
                Ok(Vec::new())
            }
            BackupTarget::ObjectStore(o) => Ok(o
                .versions(path)?
                .into_iter()
                .map(|v| v.version_id)
                .collect()),
        }
    }
}

impl fmt::Debug for BackupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// Targets from configuration: the object store first, then the folder
pub fn build_targets(config: &Config) -> Result<Vec<BackupTarget>> {
    let layout = BackupLayout::from_config(config);
    let mut targets = Vec::new();

    if let Some(ref s3) = config.backup_s3 {
        let client = S3Client::new(s3)?;
        targets.push(BackupTarget::ObjectStore(ObjectStoreTarget::new(
            Box::new(client),
            PutOptions::from_config(s3),
            layout.clone(),
        )));
    }

    if let Some(ref folder) = config.backup_folder {
        let root = crate::config::expand_tilde(&folder.path);
        if !root.exists() {
            warn!("Backup folder {:?} does not exist yet; it will be created on upload", root);
        }
        targets.push(BackupTarget::Folder(FolderTarget::new(root, layout)));
    }

    Ok(targets)
}
