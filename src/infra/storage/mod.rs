//! Cache storage backends
//!
//! A storage holds complete bundles addressed by [`CacheKey`]. Backends are
//! composed by the cache system, each tagged with the roles it plays in the
//! current run: producers receive freshly built bundles, consumers are asked
//! for bundles before building.
//!
//! - [`local`] - Directory tree on this machine
//! - [`http`] - Remote store speaking plain HTTP

pub mod http;
pub mod local;

use futures::future::BoxFuture;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::core::fingerprint::Fingerprint;
use crate::core::product::ProductId;
use crate::error::StorageError;

pub use http::HttpStorage;
pub use local::LocalDiskStorage;

/// Storage address of a bundle: product identity plus fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    /// Product identity
    pub product: ProductId,
    /// Fingerprint of the bundle
    pub fingerprint: Fingerprint,
}

impl CacheKey {
    /// Create a key
    pub fn new(product: ProductId, fingerprint: Fingerprint) -> Self {
        Self {
            product,
            fingerprint,
        }
    }

    /// Relative location `<package>/<target>/<fingerprint>`
    ///
    /// Independent of any local output layout.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.product.package)
            .join(&self.product.target)
            .join(self.fingerprint.as_str())
    }

    /// Components of [`Self::relative_path`], unescaped
    pub fn segments(&self) -> [&str; 3] {
        [
            &self.product.package,
            &self.product.target,
            self.fingerprint.as_str(),
        ]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.product, self.fingerprint.short())
    }
}

/// Uniform contract over cache storage backends
///
/// Futures are boxed so backends can be mixed behind `dyn CacheStorage`.
pub trait CacheStorage: Send + Sync + fmt::Debug {
    /// Name for log lines
    fn name(&self) -> &str;

    /// Whether a bundle is stored under `key`
    fn exists<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<bool, StorageError>>;

    /// Materialize the bundle stored under `key` as the directory `destination`
    ///
    /// Returns `Ok(false)` when nothing is stored under the key. `destination`
    /// must not exist yet.
    fn fetch<'a>(
        &'a self,
        key: &'a CacheKey,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<bool, StorageError>>;

    /// Store the bundle directory `bundle` under `key`
    fn store<'a>(
        &'a self,
        key: &'a CacheKey,
        bundle: &'a Path,
    ) -> BoxFuture<'a, Result<(), StorageError>>;
}

/// Roles a storage plays in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageRoles {
    /// May receive built bundles
    pub producer: bool,
    /// May be asked for bundles
    pub consumer: bool,
}

impl StorageRoles {
    /// Producer and consumer
    pub const BOTH: Self = Self {
        producer: true,
        consumer: true,
    };

    /// Producer only
    pub const PRODUCER: Self = Self {
        producer: true,
        consumer: false,
    };

    /// Consumer only
    pub const CONSUMER: Self = Self {
        producer: false,
        consumer: true,
    };
}

impl fmt::Display for StorageRoles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.producer, self.consumer) {
            (true, true) => write!(f, "producer+consumer"),
            (true, false) => write!(f, "producer"),
            (false, true) => write!(f, "consumer"),
            (false, false) => write!(f, "none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_paths() {
        let key = CacheKey::new(
            ProductId::new("swift-log", "Logging"),
            Fingerprint::from_hex("0123456789abcdef".repeat(4)),
        );

        assert_eq!(
            key.relative_path(),
            PathBuf::from("swift-log/Logging").join("0123456789abcdef".repeat(4))
        );
        assert_eq!(key.segments()[..2], ["swift-log", "Logging"]);
        assert_eq!(key.to_string(), "swift-log/Logging@0123456789ab");
    }

    #[test]
    fn test_roles_display() {
        assert_eq!(StorageRoles::BOTH.to_string(), "producer+consumer");
        assert_eq!(StorageRoles::CONSUMER.to_string(), "consumer");
        assert_eq!(StorageRoles::default().to_string(), "none");
    }
}
