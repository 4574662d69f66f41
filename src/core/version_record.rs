//! Version records
//!
//! A version record is the hidden `.<target>.version` file stored next to a
//! product's bundle. It pins the fingerprint the bundle was built from, plus
//! enough context (toolchain, option summary) to make a stale cache easy to
//! diagnose by diffing two records.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::defaults;
use crate::core::fingerprint::Fingerprint;
use crate::core::options::BuildOptions;
use crate::core::product::{Product, ProductId};
use crate::error::FilesystemError;
use crate::infra::filesystem;

/// Persisted `(product, fingerprint)` marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Record format version
    pub format_version: u32,

    /// Product identity
    pub product: ProductId,

    /// Fingerprint of the bundle next to this record
    pub fingerprint: Fingerprint,

    /// Toolchain version the bundle was built with
    pub toolchain_version: String,

    /// Options the bundle was built with
    pub options: BuildOptions,

    /// Human-readable option summary
    pub options_summary: String,

    /// xcpack version that wrote the record
    pub tool_version: String,
}

impl VersionRecord {
    /// Create a record for a product
    pub fn new(
        product: &Product,
        fingerprint: Fingerprint,
        toolchain_version: &str,
        options: &BuildOptions,
    ) -> Self {
        Self {
            format_version: defaults::VERSION_RECORD_FORMAT,
            product: product.id(),
            fingerprint,
            toolchain_version: toolchain_version.to_string(),
            options: options.clone(),
            options_summary: options.summary(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Path of the record for a product under an output directory
    pub fn path(output_dir: &Path, product: &Product) -> PathBuf {
        output_dir.join(format!(".{}.version", product.display_name()))
    }

    /// Read a record
    ///
    /// Returns `None` when the file is missing, unparsable, or written by a
    /// newer format; all of these are treated as a cache miss by the caller.
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        let record: Self = match serde_json::from_str(&content) {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!("Ignoring unreadable version record {}: {e}", path.display());
                return None;
            }
        };

        if record.format_version > defaults::VERSION_RECORD_FORMAT {
            tracing::debug!(
                "Ignoring version record {} with newer format {}",
                path.display(),
                record.format_version
            );
            return None;
        }

        Some(record)
    }

    /// Write the record atomically
    pub fn save(&self, path: &Path) -> Result<(), FilesystemError> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| FilesystemError::WriteFile {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;
        filesystem::write_file_atomic(path, &content)
    }
}
