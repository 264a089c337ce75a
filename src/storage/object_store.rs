//! Object-store backup destination
//!
//! [`ObjectStoreClient`] is the seam between the transfer rules in
//! [`super::BackupTarget`] and a concrete store. [`super::S3Client`] speaks
//! the S3 REST API; `mock::MockObjectStore` keeps objects in memory.

use super::{BackupLayout, TransferError};
use crate::config::S3BackendConfig;
use anyhow::Result;
use std::path::Path;

/// Headers attached to every uploaded object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: String,
    pub server_side_encryption: bool,
    /// s3cmd-compatible `gpgenc` marker
    pub gpg_marker: bool,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            content_type: "application/tar+gzip".to_string(),
            server_side_encryption: true,
            gpg_marker: false,
        }
    }
}

impl PutOptions {
    pub fn from_config(config: &S3BackendConfig) -> Self {
        Self {
            content_type: config.content_type.clone(),
            server_side_encryption: true,
            gpg_marker: config.encrypt_files,
        }
    }

    /// Extra request headers, lowercase names
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("content-type".to_string(), self.content_type.clone())];
        if self.server_side_encryption {
            headers.push(("x-amz-server-side-encryption".to_string(), "AES256".to_string()));
        }
        if self.gpg_marker {
            headers.push(("x-amz-meta-s3tools-gpgenc".to_string(), "gpg".to_string()));
        }
        headers
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
    pub version_id: String,
    pub is_latest: bool,
    pub last_modified: String,
}

/// Minimal object-store operations
pub trait ObjectStoreClient: Send + Sync {
    fn bucket(&self) -> &str;

    /// Upload `local` under `key`. Returns the size the store reports for the stored object.
    fn put_file(&self, key: &str, local: &Path, options: &PutOptions) -> Result<u64>;

    /// Download `key` into `dest`. `None` when the key does not exist.
    fn get_to_file(&self, key: &str, dest: &Path) -> Result<Option<u64>>;

    /// Versions of exactly `key`, newest first
    fn list_versions(&self, key: &str) -> Result<Vec<ObjectVersion>>;
}

pub struct ObjectStoreTarget {
    client: Box<dyn ObjectStoreClient>,
    options: PutOptions,
    layout: BackupLayout,
}

impl ObjectStoreTarget {
    pub fn new(client: Box<dyn ObjectStoreClient>, options: PutOptions, layout: BackupLayout) -> Self {
        Self {
            client,
            options,
            layout,
        }
    }

    pub fn bucket(&self) -> &str {
        self.client.bucket()
    }

    pub(crate) fn layout(&self) -> &BackupLayout {
        &self.layout
    }

    fn backend_error(&self, err: anyhow::Error) -> TransferError {
        TransferError::Backend {
            target: format!("S3 Backup ({})", self.bucket()),
            reason: format!("{:#}", err),
        }
    }

    pub(crate) fn put(&self, key: &str, local: &Path) -> Result<u64, TransferError> {
        self.client
            .put_file(key, local, &self.options)
            .map_err(|e| self.backend_error(e))
    }

    pub(crate) fn get(&self, key: &str, dest: &Path) -> Result<Option<u64>, TransferError> {
        self.client.get_to_file(key, dest).map_err(|e| self.backend_error(e))
    }

    pub(crate) fn versions(&self, key: &str) -> Result<Vec<ObjectVersion>, TransferError> {
        self.client.list_versions(key).map_err(|e| self.backend_error(e))
    }
}

pub mod mock {
    use super::*;
    use anyhow::{bail, Context};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum StoreCall {
        Put { key: String, options: PutOptions },
        Get(String),
        ListVersions(String),
    }

    /// In-memory store keeping every uploaded version
    #[derive(Clone, Default)]
    pub struct MockObjectStore {
        objects: Arc<Mutex<HashMap<String, Vec<Vec<u8>>>>>,
        calls: Arc<Mutex<Vec<StoreCall>>>,
        short_writes: bool,
        without_landing: bool,
        unreachable: bool,
    }

    impl MockObjectStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Report one byte less than was uploaded
        pub fn short_writes(mut self) -> Self {
            self.short_writes = true;
            self
        }

        /// Report downloads as successful without writing the file
        pub fn without_landing(mut self) -> Self {
            self.without_landing = true;
            self
        }

        /// Fail every request
        pub fn unreachable(mut self) -> Self {
            self.unreachable = true;
            self
        }

        /// Seed an object version
        pub fn insert(&self, key: &str, data: &[u8]) {
            self.objects
                .lock()
                .unwrap()
                .entry(key.to_string())
                .or_default()
                .push(data.to_vec());
        }

        pub fn contains(&self, key: &str) -> bool {
            self.objects.lock().unwrap().contains_key(key)
        }

        pub fn keys(&self) -> Vec<String> {
            let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
            keys.sort();
            keys
        }

        pub fn get_calls(&self) -> Vec<StoreCall> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: StoreCall) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            if self.unreachable {
                bail!("connection refused");
            }
            Ok(())
        }
    }

    impl ObjectStoreClient for MockObjectStore {
        fn bucket(&self) -> &str {
            "mock-bucket"
        }

        fn put_file(&self, key: &str, local: &Path, options: &PutOptions) -> Result<u64> {
            self.record(StoreCall::Put {
                key: key.to_string(),
                options: options.clone(),
            })?;
            let data = std::fs::read(local).with_context(|| format!("Failed to read {:?}", local))?;
            let len = data.len() as u64;
            self.insert(key, &data);
            if self.short_writes {
                Ok(len.saturating_sub(1))
            } else {
                Ok(len)
            }
        }

        fn get_to_file(&self, key: &str, dest: &Path) -> Result<Option<u64>> {
            self.record(StoreCall::Get(key.to_string()))?;
            let latest = self
                .objects
                .lock()
                .unwrap()
                .get(key)
                .and_then(|versions| versions.last().cloned());
            let Some(data) = latest else {
                return Ok(None);
            };
            if !self.without_landing {
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(dest, &data)?;
            }
            Ok(Some(data.len() as u64))
        }

        fn list_versions(&self, key: &str) -> Result<Vec<ObjectVersion>> {
            self.record(StoreCall::ListVersions(key.to_string()))?;
            let count = self
                .objects
                .lock()
                .unwrap()
                .get(key)
                .map(Vec::len)
                .unwrap_or(0);
            Ok((0..count)
                .rev()
                .map(|i| ObjectVersion {
                    version_id: format!("v{}", i + 1),
                    is_latest: i + 1 == count,
                    last_modified: String::new(),
                })
                .collect())
        }
    }
}
