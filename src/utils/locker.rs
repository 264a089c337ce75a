//! File-based locking to prevent concurrent runs on one host

use anyhow::{Context, Result};
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Exclusive lock held for a whole invocation
pub struct RunLock {
    guard: Option<RwLockWriteGuard<'static, File>>,
    lock_path: PathBuf,
}

impl RunLock {
    /// Acquire the lock for `name` (normally the configured hostname)
    /// Returns error if another invocation holds it
    pub fn acquire(name: &str) -> Result<Self> {
        Self::acquire_at(Self::lock_path(name))
    }

    pub fn acquire_at(lock_path: PathBuf) -> Result<Self> {
        debug!("Attempting to acquire lock: {:?}", lock_path);

        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create lock directory")?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .context(format!("Failed to open lock file: {:?}", lock_path))?;

        // One lock per process run; leaking it gives the guard a 'static borrow
        let lock: &'static mut RwLock<File> = Box::leak(Box::new(RwLock::new(file)));
        let guard = lock.try_write().context(format!(
            "Another gerrit-backup run holds the lock {:?}",
            lock_path
        ))?;

        info!("Acquired run lock: {:?}", lock_path);

        Ok(Self {
            guard: Some(guard),
            lock_path,
        })
    }

    /// Get the lock file path for a name
    fn lock_path(name: &str) -> PathBuf {
        let safe: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        Path::new("/tmp").join(format!("gerrit-backup-{}.lock", safe))
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // Release before removing the file
        self.guard.take();
        info!("Released run lock: {:?}", self.lock_path);

        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            debug!("Failed to remove lock file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_acquire_and_release() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("run.lock");

        let lock = RunLock::acquire_at(path.clone()).expect("Failed to acquire lock");
        assert!(lock.path().exists());

        // Second acquire fails while held
        assert!(RunLock::acquire_at(path.clone()).is_err());

        drop(lock);
        assert!(!path.exists());

        let lock2 = RunLock::acquire_at(path).expect("Failed to acquire lock after release");
        drop(lock2);
    }

    #[test]
    fn test_lock_path_sanitizes_name() {
        assert_eq!(
            RunLock::lock_path("gerrit01.example.com"),
            PathBuf::from("/tmp/gerrit-backup-gerrit01.example.com.lock")
        );
        assert_eq!(
            RunLock::lock_path("a/b"),
            PathBuf::from("/tmp/gerrit-backup-a_b.lock")
        );
    }
}
