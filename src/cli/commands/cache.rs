//! CLI command for `xcpack cache`
//!
//! Reports on and clears the local cache storages of a project.

use anyhow::{Context, Result};
use std::path::Path;

use super::ProjectArgs;
use crate::cli::output::status;
use crate::core::manifest::{Manifest, StorageBackend};
use crate::infra::dirs::XcpackDirs;
use crate::infra::filesystem;
use crate::infra::storage::LocalDiskStorage;

/// Local storages named by the project file, or the default one
fn local_storages(project_dir: &Path, args: &ProjectArgs) -> Result<Vec<LocalDiskStorage>> {
    let config_path = args.config_path(project_dir);
    let manifest = if config_path.exists() {
        Manifest::load(&config_path).context("Failed to load project file")?
    } else {
        Manifest::default()
    };

    let dirs = XcpackDirs::new();
    let mut storages: Vec<LocalDiskStorage> = manifest
        .cache
        .storages
        .iter()
        .filter_map(|s| match &s.backend {
            StorageBackend::Local { path: Some(path) } => {
                Some(LocalDiskStorage::new(project_dir.join(path)))
            }
            StorageBackend::Local { path: None } => {
                Some(LocalDiskStorage::new(dirs.artifacts_dir()))
            }
            StorageBackend::Http { .. } => None,
        })
        .collect();

    if storages.is_empty() {
        storages.push(LocalDiskStorage::new(dirs.artifacts_dir()));
    }
    Ok(storages)
}

/// Execute cache info subcommand
pub async fn execute_info(project_dir: &Path, args: &ProjectArgs) -> Result<()> {
    println!("Cache Information\n");

    for storage in local_storages(project_dir, args)? {
        let info = storage.info();
        println!("Location: {}", info.path.display());
        println!("Size: {}", info.format_size());
        println!("Bundles: {}", info.entry_count);
        if !info.exists {
            println!("{} Storage directory does not exist (empty cache)", status::WARNING);
        }
        println!();
    }

    Ok(())
}

/// Execute cache clean subcommand
pub async fn execute_clean(project_dir: &Path, args: &ProjectArgs) -> Result<()> {
    for storage in local_storages(project_dir, args)? {
        let freed = storage
            .clean()
            .with_context(|| format!("Failed to clean {}", storage.root().display()))?;
        if freed > 0 {
            println!(
                "{} Cleared {} ({} freed)",
                status::SUCCESS,
                storage.root().display(),
                filesystem::format_size(freed)
            );
        } else {
            println!("{} {} was already empty", status::SUCCESS, storage.root().display());
        }
    }
    Ok(())
}
