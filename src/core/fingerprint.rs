//! Content fingerprints
//!
//! A fingerprint summarizes everything that determines a product's bundle:
//! source tree content, resolved build options and toolchain version. Only
//! relative paths and file contents are hashed, so fingerprints are stable
//! across machines and checkouts.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::path::Path;

use crate::config::defaults;
use crate::core::options::BuildOptions;
use crate::core::product::Product;
use crate::error::FilesystemError;

/// Hex-encoded SHA-256 fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an existing hex digest
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// The hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First characters, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint of a product
///
/// Deterministic: identical inputs give identical output, and a change to any
/// source byte, any option field or the toolchain version changes the result.
pub fn fingerprint(
    product: &Product,
    options: &BuildOptions,
    toolchain_version: &str,
) -> Result<Fingerprint, FilesystemError> {
    let mut hasher = Sha256::new();

    field(&mut hasher, "package", product.package.as_bytes());
    field(&mut hasher, "target", product.target.as_bytes());
    field(&mut hasher, "kind", product.kind.to_string().as_bytes());

    hash_tree(&mut hasher, &product.root, &product.sources)?;
    if let Some(headers) = &product.public_headers {
        if !headers.starts_with(&product.sources) {
            hash_tree(&mut hasher, &product.root, headers)?;
        }
    }
    for resource in &product.resources {
        if !resource.starts_with(&product.sources) {
            hash_tree(&mut hasher, &product.root, resource)?;
        }
    }

    // Struct field order is fixed and platforms are a sorted set, so the
    // serialization is canonical.
    let options_json = serde_json::to_string(options).map_err(|e| FilesystemError::ReadFile {
        path: product.root.clone(),
        error: e.to_string(),
    })?;
    field(&mut hasher, "options", options_json.as_bytes());
    field(&mut hasher, "toolchain", toolchain_version.as_bytes());

    Ok(Fingerprint(hex::encode(hasher.finalize())))
}

/// Length-prefixed field so adjacent values cannot run into each other
fn field(hasher: &mut Sha256, name: &str, value: &[u8]) {
    hasher.update(name.as_bytes());
    hasher.update(b"\0");
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value);
}

/// Hash every file under `root/relative` by relative path and content
///
/// A missing path hashes as a marker rather than failing, so a vanished
/// optional directory changes the fingerprint instead of aborting the run.
fn hash_tree(hasher: &mut Sha256, root: &Path, relative: &Path) -> Result<(), FilesystemError> {
    let start = root.join(relative);
    let label = portable(relative);

    if !start.exists() {
        field(hasher, "missing", label.as_bytes());
        return Ok(());
    }

    let walker = walkdir::WalkDir::new(&start)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e
                    .file_name()
                    .to_str()
                    .is_some_and(|name| defaults::FINGERPRINT_IGNORED_DIRS.contains(&name))
        });

    for entry in walker {
        let entry = entry.map_err(|e| FilesystemError::ReadFile {
            path: start.clone(),
            error: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        field(hasher, "path", portable(rel).as_bytes());
        hash_file(hasher, entry.path())?;
    }

    Ok(())
}

fn hash_file(hasher: &mut Sha256, path: &Path) -> Result<(), FilesystemError> {
    let read_err = |e: std::io::Error| FilesystemError::ReadFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    };

    let mut file = std::fs::File::open(path).map_err(read_err)?;
    let mut content = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(read_err)?;
        if n == 0 {
            break;
        }
        content.update(&buf[..n]);
    }
    field(hasher, "content", &content.finalize());
    Ok(())
}

/// Forward-slash relative path, identical on every host
fn portable(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
