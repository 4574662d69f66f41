//! Clean command implementation
//!
//! Removes the intermediate build directory, and with `--all` the output
//! directory with every bundle and version record.

use anyhow::{Context, Result};
use std::path::Path;

use super::ProjectArgs;
use crate::cli::output::status;
use crate::core::manifest::Manifest;
use crate::infra::filesystem;

/// Execute the clean command
pub async fn execute(project_dir: &Path, args: &ProjectArgs, all: bool) -> Result<()> {
    let config_path = args.config_path(project_dir);
    let manifest = if config_path.exists() {
        Manifest::load(&config_path).context("Failed to load project file")?
    } else {
        Manifest::default()
    };

    let mut targets = vec![manifest.build_dir(project_dir)];
    if all {
        targets.push(manifest.output_dir(project_dir));
    }

    for dir in targets {
        if dir.exists() {
            let size = filesystem::dir_size(&dir);
            filesystem::remove_dir_all(&dir)
                .with_context(|| format!("Failed to remove {}", dir.display()))?;
            println!(
                "{} Removed {} ({})",
                status::SUCCESS,
                dir.display(),
                filesystem::format_size(size)
            );
        }
    }
    Ok(())
}
