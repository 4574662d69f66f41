//! Cache validity and storage orchestration
//!
//! Decides, per product, whether the bundle in the output directory can be
//! reused, whether a consumer storage can supply it, or whether it must be
//! rebuilt. After a rebuild the version record is written and the bundle is
//! pushed to producer storages.
//!
//! A version record is trusted only when the bundle next to it exists and is
//! non-empty. Storage failures never fail a product: a failed fetch is a
//! miss, a failed store is a warning.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

use crate::core::assembler;
use crate::core::fingerprint::Fingerprint;
use crate::core::options::BuildOptions;
use crate::core::product::Product;
use crate::core::version_record::VersionRecord;
use crate::error::{ConfigError, FilesystemError};
use crate::infra::filesystem;
use crate::infra::storage::{CacheKey, CacheStorage, StorageRoles};

/// Where a reused bundle came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HitSource {
    /// Bundle already in the output directory
    Local,
    /// Bundle fetched from a consumer storage
    Remote {
        /// Storage name
        storage: String,
    },
}

impl fmt::Display for HitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote { storage } => write!(f, "{storage}"),
        }
    }
}

/// Why a product must be rebuilt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    /// Caching is turned off for the run
    Disabled,
    /// No version record next to the bundle
    NoRecord,
    /// Version record exists but cannot be read
    UnreadableRecord,
    /// Version record pins a different fingerprint
    Outdated,
    /// Version record matches but the bundle is missing or empty
    BundleMissing,
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "cache disabled"),
            Self::NoRecord => write!(f, "no version record"),
            Self::UnreadableRecord => write!(f, "unreadable version record"),
            Self::Outdated => write!(f, "fingerprint changed"),
            Self::BundleMissing => write!(f, "bundle missing"),
        }
    }
}

/// Outcome of a cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    /// Reuse, bundle is in place
    Hit(HitSource),
    /// Rebuild
    Miss(MissReason),
}

/// A storage with the roles it plays in this run
#[derive(Debug, Clone)]
pub struct ConfiguredStorage {
    /// Backend
    pub storage: Arc<dyn CacheStorage>,
    /// Roles
    pub roles: StorageRoles,
}

/// Cache system for one output directory
#[derive(Debug)]
pub struct CacheSystem {
    output_dir: PathBuf,
    enabled: bool,
    storages: Vec<ConfiguredStorage>,
    locks: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl CacheSystem {
    /// Create a cache system without storages
    pub fn new(output_dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            output_dir: output_dir.into(),
            enabled,
            storages: Vec::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Add a storage; lookups consult consumers in the order they are added
    pub fn with_storage(
        mut self,
        storage: Arc<dyn CacheStorage>,
        roles: StorageRoles,
    ) -> Result<Self, ConfigError> {
        if !roles.producer && !roles.consumer {
            return Err(ConfigError::StorageWithoutRole {
                name: storage.name().to_string(),
            });
        }
        self.storages.push(ConfiguredStorage { storage, roles });
        Ok(self)
    }

    /// Whether caching is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Configured storages
    pub fn storages(&self) -> &[ConfiguredStorage] {
        &self.storages
    }

    /// Output directory
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Exclusive access to one cache key for the rest of the product's pipeline
    ///
    /// A second caller for the same key waits, then sees whatever the first
    /// one published.
    pub async fn lock(&self, key: &CacheKey) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        mutex.lock_owned().await
    }

    /// Classify the local state of a product's output
    pub fn local_state(&self, product: &Product, fingerprint: &Fingerprint) -> CacheDecision {
        let record_path = VersionRecord::path(&self.output_dir, product);
        if !record_path.exists() {
            return CacheDecision::Miss(MissReason::NoRecord);
        }

        let Some(record) = VersionRecord::load(&record_path) else {
            return CacheDecision::Miss(MissReason::UnreadableRecord);
        };
        if &record.fingerprint != fingerprint || record.product != product.id() {
            return CacheDecision::Miss(MissReason::Outdated);
        }

        let bundle = assembler::bundle_path(&self.output_dir, product);
        if !filesystem::is_non_empty_dir(&bundle) {
            return CacheDecision::Miss(MissReason::BundleMissing);
        }

        CacheDecision::Hit(HitSource::Local)
    }

    /// Decide whether `product` must be rebuilt
    ///
    /// On a remote hit the fetched bundle is published and its version record
    /// written before this returns.
    pub async fn lookup(
        &self,
        product: &Product,
        key: &CacheKey,
        toolchain_version: &str,
        options: &BuildOptions,
    ) -> CacheDecision {
        if !self.enabled {
            return CacheDecision::Miss(MissReason::Disabled);
        }

        let reason = match self.local_state(product, &key.fingerprint) {
            CacheDecision::Hit(source) => return CacheDecision::Hit(source),
            CacheDecision::Miss(reason) => reason,
        };

        for configured in self.storages.iter().filter(|s| s.roles.consumer) {
            let storage = &configured.storage;
            match storage.exists(key).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!("{key} not in {}", storage.name());
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Failed to query {}: {e}", storage.name());
                    continue;
                }
            }

            match self
                .restore(storage.as_ref(), product, key, toolchain_version, options)
                .await
            {
                Ok(true) => {
                    tracing::info!("Restored {key} from {}", storage.name());
                    return CacheDecision::Hit(HitSource::Remote {
                        storage: storage.name().to_string(),
                    });
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to restore {key} from {}: {e}", storage.name()),
            }
        }

        CacheDecision::Miss(reason)
    }

    async fn restore(
        &self,
        storage: &dyn CacheStorage,
        product: &Product,
        key: &CacheKey,
        toolchain_version: &str,
        options: &BuildOptions,
    ) -> Result<bool, String> {
        let staging = assembler::staging_dir(&self.output_dir).map_err(|e| e.to_string())?;
        let staged = assembler::bundle_path(staging.path(), product);

        if !storage.fetch(key, &staged).await.map_err(|e| e.to_string())? {
            return Ok(false);
        }
        if !filesystem::is_non_empty_dir(&staged) {
            tracing::warn!("{} returned an empty bundle for {key}", storage.name());
            return Ok(false);
        }

        self.invalidate(product).map_err(|e| e.to_string())?;
        let destination = assembler::bundle_path(&self.output_dir, product);
        assembler::publish(&self.output_dir, &staged, &destination).map_err(|e| e.to_string())?;
        self.record(product, &key.fingerprint, toolchain_version, options)
            .map_err(|e| e.to_string())?;
        Ok(true)
    }

    /// Remove the version record of a product
    ///
    /// Called before a new bundle is published, so an interrupted publish can
    /// never leave a record vouching for the wrong bundle.
    pub fn invalidate(&self, product: &Product) -> Result<(), FilesystemError> {
        let path = VersionRecord::path(&self.output_dir, product);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FilesystemError::WriteFile {
                path,
                error: e.to_string(),
            }),
        }
    }

    /// Write the version record for a freshly published bundle
    pub fn record(
        &self,
        product: &Product,
        fingerprint: &Fingerprint,
        toolchain_version: &str,
        options: &BuildOptions,
    ) -> Result<(), FilesystemError> {
        let record = VersionRecord::new(product, fingerprint.clone(), toolchain_version, options);
        record.save(&VersionRecord::path(&self.output_dir, product))
    }

    /// Push a bundle to every producer storage, returning how many stored it
    pub async fn share(&self, key: &CacheKey, bundle: &Path) -> usize {
        if !self.enabled {
            return 0;
        }

        let mut stored = 0;
        for configured in self.storages.iter().filter(|s| s.roles.producer) {
            let storage = &configured.storage;
            match storage.exists(key).await {
                Ok(true) => {
                    tracing::debug!("{key} already in {}", storage.name());
                    continue;
                }
                Ok(false) => {}
                Err(e) => tracing::debug!("Could not query {} before store: {e}", storage.name()),
            }

            match storage.store(key, bundle).await {
                Ok(()) => {
                    tracing::info!("Stored {key} in {}", storage.name());
                    stored += 1;
                }
                Err(e) => tracing::warn!("Failed to store {key} in {}: {e}", storage.name()),
            }
        }
        stored
    }
}
