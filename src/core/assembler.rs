//! Bundle assembly
//!
//! Turns the per-platform frameworks of one product into a single bundle in
//! the output directory. Everything happens inside a staging directory created
//! in the output root; the finished bundle becomes visible through a single
//! rename, and the previous bundle is only discarded once the new one is in
//! place.

use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::defaults;
use crate::core::modulemap::{self, HeaderLayout};
use crate::core::product::{Product, ProductKind};
use crate::error::{AssemblyError, FilesystemError};
use crate::infra::filesystem;
use crate::infra::merger::{ArtifactMerger, MergeInput};

/// Name of a module map file
const MODULE_MAP: &str = "module.modulemap";

/// Location of a product's bundle in the output directory
pub fn bundle_path(output_dir: &Path, product: &Product) -> PathBuf {
    output_dir.join(format!(
        "{}.{}",
        product.display_name(),
        defaults::BUNDLE_EXTENSION
    ))
}

/// A complete bundle waiting in a staging directory
///
/// Dropping it discards the staging directory.
#[derive(Debug)]
pub struct StagedBundle {
    path: PathBuf,
    destination: PathBuf,
    _staging: StagingDir,
}

impl StagedBundle {
    /// Staged bundle directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the bundle will be published
    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

/// Assembles and publishes bundles into one output directory
#[derive(Clone)]
pub struct Assembler {
    merger: Arc<dyn ArtifactMerger>,
    output_dir: PathBuf,
}

impl std::fmt::Debug for Assembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assembler")
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

impl Assembler {
    /// Create an assembler publishing into `output_dir`
    pub fn new(merger: Arc<dyn ArtifactMerger>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            merger,
            output_dir: output_dir.into(),
        }
    }

    /// Output directory
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Assemble compiled frameworks into a staged bundle
    ///
    /// Nothing in the output directory changes until the result is passed to
    /// [`Self::publish_staged`].
    pub async fn stage(
        &self,
        product: &Product,
        mut inputs: Vec<MergeInput>,
        cancel: &CancellationToken,
    ) -> Result<StagedBundle, AssemblyError> {
        if inputs.is_empty() {
            return Err(AssemblyError::NoArtifacts {
                product: product.id().to_string(),
            });
        }
        inputs.sort_by_key(|input| input.task.sort_key());

        let staging = self.staging_dir()?;
        let staged_bundle = bundle_path(staging.path(), product);

        let prepared = {
            let product = product.clone();
            let root = staging.path().join("frameworks");
            tokio::task::spawn_blocking(move || prepare_frameworks(&product, &inputs, &root))
                .await
                .map_err(|e| AssemblyError::IoError {
                    path: staging.path().to_path_buf(),
                    error: e.to_string(),
                })??
        };

        if cancel.is_cancelled() {
            return Err(AssemblyError::Cancelled);
        }
        self.merger.merge(&prepared, &staged_bundle, cancel).await?;
        if cancel.is_cancelled() {
            return Err(AssemblyError::Cancelled);
        }

        Ok(StagedBundle {
            path: staged_bundle,
            destination: bundle_path(&self.output_dir, product),
            _staging: staging,
        })
    }

    /// Stage a copy of a prebuilt bundle
    pub async fn stage_prebuilt(
        &self,
        product: &Product,
        cancel: &CancellationToken,
    ) -> Result<StagedBundle, AssemblyError> {
        let source = product.source_path();
        if !filesystem::is_non_empty_dir(&source) {
            return Err(AssemblyError::NoArtifacts {
                product: product.id().to_string(),
            });
        }

        let staging = self.staging_dir()?;
        let staged_bundle = bundle_path(staging.path(), product);
        {
            let to = staged_bundle.clone();
            tokio::task::spawn_blocking(move || filesystem::copy_dir_all(&source, &to))
                .await
                .map_err(|e| AssemblyError::IoError {
                    path: staged_bundle.clone(),
                    error: e.to_string(),
                })??;
        }
        if cancel.is_cancelled() {
            return Err(AssemblyError::Cancelled);
        }

        Ok(StagedBundle {
            path: staged_bundle,
            destination: bundle_path(&self.output_dir, product),
            _staging: staging,
        })
    }

    /// Move a staged bundle into place, returning its final path
    pub fn publish_staged(&self, staged: StagedBundle) -> Result<PathBuf, AssemblyError> {
        self.publish(&staged.path, &staged.destination)?;
        tracing::debug!("Published {}", staged.destination.display());
        Ok(staged.destination)
    }

    /// Staging directory inside the output root, removed on drop
    pub fn staging_dir(&self) -> Result<StagingDir, AssemblyError> {
        staging_dir(&self.output_dir)
    }

    /// Publish a staged bundle over `destination`
    pub fn publish(&self, staged: &Path, destination: &Path) -> Result<(), AssemblyError> {
        publish(&self.output_dir, staged, destination)
    }

    /// Remove staging directories left behind by an interrupted run
    ///
    /// Directories still locked by a live run are left alone.
    pub fn remove_stale_staging(&self) -> Result<usize, FilesystemError> {
        let Ok(entries) = std::fs::read_dir(&self.output_dir) else {
            return Ok(0);
        };

        let mut removed = 0;
        for entry in entries.filter_map(Result::ok) {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(defaults::STAGING_PREFIX) {
                continue;
            }
            let path = entry.path();
            if staging_in_use(&path) {
                tracing::debug!("Staging directory {} is in use", path.display());
                continue;
            }
            tracing::debug!("Removing stale staging directory {}", path.display());
            filesystem::remove_dir_all(&path)?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// Staging directory owned by this process
///
/// An exclusive lock on a file inside the directory is held for its whole
/// lifetime. The directory is removed on drop.
#[derive(Debug)]
pub struct StagingDir {
    _lock: File,
    dir: tempfile::TempDir,
}

impl StagingDir {
    /// Staging directory path
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Create a staging directory inside `output_dir`, removed on drop
pub fn staging_dir(output_dir: &Path) -> Result<StagingDir, AssemblyError> {
    filesystem::create_dir_all(output_dir)?;
    let io_err = |path: &Path, e: std::io::Error| AssemblyError::IoError {
        path: path.to_path_buf(),
        error: e.to_string(),
    };

    let dir = tempfile::Builder::new()
        .prefix(defaults::STAGING_PREFIX)
        .tempdir_in(output_dir)
        .map_err(|e| io_err(output_dir, e))?;

    let lock_path = dir.path().join(defaults::STAGING_LOCK);
    let lock = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&lock_path)
        .map_err(|e| io_err(&lock_path, e))?;
    lock.try_lock().map_err(|e| match e {
        TryLockError::Error(e) => io_err(&lock_path, e),
        TryLockError::WouldBlock => io_err(
            &lock_path,
            std::io::Error::new(std::io::ErrorKind::WouldBlock, "lock held"),
        ),
    })?;

    Ok(StagingDir { _lock: lock, dir })
}

/// Whether another run still owns a staging directory
fn staging_in_use(dir: &Path) -> bool {
    match OpenOptions::new().write(true).open(dir.join(defaults::STAGING_LOCK)) {
        Ok(lock) => matches!(lock.try_lock(), Err(TryLockError::WouldBlock)),
        // The owner creates the directory before its lock file
        Err(_) => std::fs::metadata(dir)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age < Duration::from_secs(defaults::STAGING_GRACE_SECS)),
    }
}

/// Publish a complete bundle directory that lives inside `output_dir`
///
/// The previous bundle, if any, is moved aside first and restored when the
/// new one cannot be renamed into place.
pub fn publish(output_dir: &Path, staged: &Path, destination: &Path) -> Result<(), AssemblyError> {
    if !destination.exists() {
        filesystem::rename(staged, destination)?;
        return Ok(());
    }

    let trash = staging_dir(output_dir)?;
    let previous = trash.path().join("previous");
    filesystem::rename(destination, &previous)?;

    if let Err(e) = filesystem::rename(staged, destination) {
        if let Err(restore) = filesystem::rename(&previous, destination) {
            tracing::warn!("Failed to restore previous bundle: {restore}");
        }
        return Err(e.into());
    }
    Ok(())
}

/// Copy frameworks into the staging area and apply per-product extras
fn prepare_frameworks(
    product: &Product,
    inputs: &[MergeInput],
    root: &Path,
) -> Result<Vec<MergeInput>, AssemblyError> {
    let resources = if product.has_resources() {
        Some(build_resource_bundle(product, &root.join("resources"))?)
    } else {
        None
    };

    let module = if product.kind == ProductKind::ClangModule {
        Some(prepare_module(product)?)
    } else {
        None
    };

    let mut prepared = Vec::with_capacity(inputs.len());
    for input in inputs {
        let name = input
            .framework
            .file_name()
            .ok_or_else(|| AssemblyError::IoError {
                path: input.framework.clone(),
                error: "framework path has no file name".to_string(),
            })?;
        let framework = root.join(input.task.identifier()).join(name);
        filesystem::copy_dir_all(&input.framework, &framework)?;

        if let Some(module) = &module {
            module.install(&framework)?;
        }
        if let Some(bundle) = &resources {
            let name = product.resource_bundle_name();
            filesystem::copy_dir_all(bundle, &framework.join(name))?;
        }

        prepared.push(MergeInput {
            task: input.task.clone(),
            framework,
        });
    }
    Ok(prepared)
}

/// Build the resource sub-bundle once
fn build_resource_bundle(product: &Product, dir: &Path) -> Result<PathBuf, AssemblyError> {
    let bundle = dir.join(product.resource_bundle_name());
    filesystem::create_dir_all(&bundle)?;

    for resource in product.resource_paths() {
        let name = resource
            .file_name()
            .ok_or_else(|| AssemblyError::MissingResource {
                product: product.id().to_string(),
                path: resource.clone(),
            })?;

        if resource.is_dir() {
            filesystem::copy_dir_all(&resource, &bundle.join(name))?;
        } else if resource.is_file() {
            filesystem::copy_file(&resource, &bundle.join(name))?;
        } else {
            return Err(AssemblyError::MissingResource {
                product: product.id().to_string(),
                path: resource,
            });
        }
    }
    Ok(bundle)
}

/// Headers and module map of a foreign-language module
#[derive(Debug)]
struct ModuleLayout {
    headers: Option<PathBuf>,
    external_headers: Vec<PathBuf>,
    modulemap: String,
}

impl ModuleLayout {
    fn install(&self, framework: &Path) -> Result<(), AssemblyError> {
        let headers_dir = framework.join("Headers");
        filesystem::create_dir_all(&headers_dir)?;

        if let Some(headers) = &self.headers {
            filesystem::copy_dir_all(headers, &headers_dir)?;
            let copied_map = headers_dir.join(MODULE_MAP);
            if copied_map.exists() {
                std::fs::remove_file(&copied_map).map_err(|e| AssemblyError::IoError {
                    path: copied_map.clone(),
                    error: e.to_string(),
                })?;
            }
        }
        for header in &self.external_headers {
            if let Some(name) = header.file_name() {
                filesystem::copy_file(header, &headers_dir.join(name))?;
            }
        }

        filesystem::write_file(&framework.join("Modules").join(MODULE_MAP), &self.modulemap)?;
        Ok(())
    }
}

fn prepare_module(product: &Product) -> Result<ModuleLayout, AssemblyError> {
    let Some(headers) = product.public_headers_path().filter(|p| p.is_dir()) else {
        return Ok(ModuleLayout {
            headers: None,
            external_headers: Vec::new(),
            modulemap: modulemap::generate(product.display_name(), false),
        });
    };

    let declared = headers.join(MODULE_MAP);
    if !declared.is_file() {
        let umbrella = headers
            .join(format!("{}.h", product.display_name()))
            .is_file();
        return Ok(ModuleLayout {
            headers: Some(headers),
            external_headers: Vec::new(),
            modulemap: modulemap::generate(product.display_name(), umbrella),
        });
    }

    let source = filesystem::read_file(&declared)?;
    let layout = HeaderLayout {
        modulemap_dir: headers.clone(),
        headers_root: headers.clone(),
    };

    let mut external_headers = Vec::new();
    let text = modulemap::normalize(&source, |reference, path| {
        let rewritten = layout.rewrite(reference, path)?;
        if let Some(external) = rewritten.external {
            external_headers.push(external);
        }
        Ok(rewritten.path)
    })
    .map_err(|error| AssemblyError::ModuleMap {
        path: declared.clone(),
        error,
    })?;

    for header in &external_headers {
        if !header.is_file() {
            return Err(AssemblyError::ModuleMap {
                path: declared.clone(),
                error: format!("header '{}' does not exist", header.display()),
            });
        }
    }

    Ok(ModuleLayout {
        headers: Some(headers),
        external_headers,
        modulemap: text,
    })
}
