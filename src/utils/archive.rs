//! Compressed snapshots of a file or directory via `tar`

use crate::context::RunContext;
use crate::utils::executor::CommandExecutor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("tar {operation} of {path} failed with exit code {exit_code:?}: {stderr}")]
    Failed {
        operation: &'static str,
        path: PathBuf,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Cannot archive {0}: path has no parent directory or file name")]
    InvalidPath(PathBuf),

    #[error("Failed to run tar: {0}")]
    Spawn(String),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Path of the archive `create` produces for `path`
pub fn archive_path_for(path: &Path) -> Result<PathBuf> {
    let (dir, name) = split(path)?;
    Ok(dir.join(format!("{}.tar.gz", name)))
}

fn split(path: &Path) -> Result<(PathBuf, String)> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| ArchiveError::InvalidPath(path.to_path_buf()))?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        Some(_) => PathBuf::from("."),
        None => return Err(ArchiveError::InvalidPath(path.to_path_buf())),
    };
    Ok((dir, name))
}

/// Wraps the external `tar` tool
pub struct Archiver {
    executor: Arc<dyn CommandExecutor>,
    timeout: Duration,
}

impl Archiver {
    pub fn new(executor: Arc<dyn CommandExecutor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    /// Compress `path` in place into `<dirname>/<basename>.tar.gz`
    ///
    /// In dry-run mode nothing runs, but the would-be archive path is still returned.
    pub fn create(&self, path: &Path, ctx: &RunContext) -> Result<PathBuf> {
        let (dir, name) = split(path)?;
        let archive = dir.join(format!("{}.tar.gz", name));
        let archive_name = format!("{}.tar.gz", name);

        if ctx.dry_run() {
            info!("[DRY RUN] Would archive {:?} into {:?}", path, archive);
            return Ok(archive);
        }

        info!("Archiving {:?}", path);
        let flags = if ctx.verbose() { "-czvf" } else { "-czf" };
        self.run("create", path, &[flags, &archive_name, &name], &dir)?;
        debug!("Created archive {:?}", archive);

        Ok(archive)
    }

    /// Unpack `archive` into the directory that contains it
    pub fn extract(&self, archive: &Path, ctx: &RunContext) -> Result<PathBuf> {
        let (dir, name) = split(archive)?;

        if ctx.dry_run() {
            info!("[DRY RUN] Would extract {:?} into {:?}", archive, dir);
            return Ok(dir);
        }

        info!("Extracting {:?}", archive);
        let flags = if ctx.verbose() { "-xzvf" } else { "-xzf" };
        self.run("extract", archive, &[flags, &name], &dir)?;

        Ok(dir)
    }

    fn run(&self, operation: &'static str, path: &Path, args: &[&str], dir: &Path) -> Result<()> {
        let output = self
            .executor
            .output("tar", args, Some(dir), Some(self.timeout))
            .map_err(|e| ArchiveError::Spawn(format!("{:#}", e)))?;

        if !output.status.success() {
            return Err(ArchiveError::Failed {
                operation,
                path: path.to_path_buf(),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}
