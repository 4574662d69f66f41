//! Local directory storage
//!
//! Bundles are stored content-addressed under
//! `<root>/<package>/<target>/<fingerprint>/bundle`. Writes go through a
//! temporary directory inside `root` and are renamed into place, so a reader
//! never sees a half-copied entry.

use futures::future::BoxFuture;
use std::path::{Path, PathBuf};

use super::{CacheKey, CacheStorage};
use crate::error::{FilesystemError, StorageError};
use crate::infra::filesystem;

/// Name of the bundle directory inside an entry
const ENTRY_BUNDLE: &str = "bundle";

/// Storage information
#[derive(Debug)]
pub struct StorageInfo {
    /// Storage directory path
    pub path: PathBuf,
    /// Total size in bytes
    pub size_bytes: u64,
    /// Number of stored bundles
    pub entry_count: usize,
    /// Whether the directory exists
    pub exists: bool,
}

impl StorageInfo {
    /// Format size for display
    pub fn format_size(&self) -> String {
        filesystem::format_size(self.size_bytes)
    }
}

/// Storage backed by a local directory tree
#[derive(Debug, Clone)]
pub struct LocalDiskStorage {
    name: String,
    root: PathBuf,
}

impl LocalDiskStorage {
    /// Create a storage rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            name: format!("local:{}", root.display()),
            root,
        }
    }

    /// Storage root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the entry for `key`
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    fn bundle_path(&self, key: &CacheKey) -> PathBuf {
        self.entry_path(key).join(ENTRY_BUNDLE)
    }

    /// Size and entry count of the storage
    pub fn info(&self) -> StorageInfo {
        let exists = self.root.exists();
        let entry_count = if exists {
            walkdir::WalkDir::new(&self.root)
                .min_depth(4)
                .max_depth(4)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_dir() && e.file_name() == ENTRY_BUNDLE)
                .count()
        } else {
            0
        };

        StorageInfo {
            path: self.root.clone(),
            size_bytes: filesystem::dir_size(&self.root),
            entry_count,
            exists,
        }
    }

    /// Remove every stored bundle, returning the bytes freed
    pub fn clean(&self) -> Result<u64, FilesystemError> {
        if !self.root.exists() {
            return Ok(0);
        }
        let size_before = filesystem::dir_size(&self.root);
        filesystem::remove_dir_all(&self.root)?;
        Ok(size_before)
    }

    fn store_blocking(&self, key: &CacheKey, bundle: &Path) -> Result<(), StorageError> {
        let entry = self.entry_path(key);
        let io_err = |path: &Path, error: String| StorageError::IoError {
            path: path.to_path_buf(),
            error,
        };

        filesystem::create_dir_all(&self.root).map_err(|e| io_err(&self.root, e.to_string()))?;
        let incoming = tempfile::Builder::new()
            .prefix(".incoming-")
            .tempdir_in(&self.root)
            .map_err(|e| io_err(&self.root, e.to_string()))?;

        let staged = incoming.path().join(ENTRY_BUNDLE);
        filesystem::copy_dir_all(bundle, &staged).map_err(|e| io_err(bundle, e.to_string()))?;

        if let Some(parent) = entry.parent() {
            filesystem::create_dir_all(parent).map_err(|e| io_err(parent, e.to_string()))?;
        }
        // Fingerprints are content addresses, so an entry that appeared
        // concurrently holds the same bundle.
        if entry.exists() {
            return Ok(());
        }
        filesystem::rename(incoming.path(), &entry).map_err(|e| io_err(&entry, e.to_string()))?;
        // Moved into place; keep it from being removed on drop
        let _ = incoming.keep();
        Ok(())
    }
}

impl CacheStorage for LocalDiskStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move { Ok(filesystem::is_non_empty_dir(&self.bundle_path(key))) })
    }

    fn fetch<'a>(
        &'a self,
        key: &'a CacheKey,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move {
            let source = self.bundle_path(key);
            if !filesystem::is_non_empty_dir(&source) {
                return Ok(false);
            }

            let dest = destination.to_path_buf();
            tokio::task::spawn_blocking(move || filesystem::copy_dir_all(&source, &dest))
                .await
                .map_err(|e| StorageError::IoError {
                    path: destination.to_path_buf(),
                    error: e.to_string(),
                })?
                .map_err(|e| StorageError::IoError {
                    path: destination.to_path_buf(),
                    error: e.to_string(),
                })?;

            Ok(true)
        })
    }

    fn store<'a>(
        &'a self,
        key: &'a CacheKey,
        bundle: &'a Path,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let this = self.clone();
            let key = key.clone();
            let bundle_path = bundle.to_path_buf();
            tokio::task::spawn_blocking(move || this.store_blocking(&key, &bundle_path))
                .await
                .map_err(|e| StorageError::IoError {
                    path: bundle.to_path_buf(),
                    error: e.to_string(),
                })?
        })
    }
}
