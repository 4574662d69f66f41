//! Plan command implementation
//!
//! Prints what a run would do: the platform tasks of each product and
//! whether its current bundle would be reused.

use anyhow::{Context, Result};
use std::path::Path;

use super::ProjectArgs;
use crate::core::cache::CacheDecision;
use crate::core::fingerprint::fingerprint;
use crate::core::manifest::Manifest;
use crate::core::matrix::PlatformMatrix;
use crate::core::platform::CapabilityTable;
use crate::core::product::{ProductGraph, RunMode};
use crate::infra::compiler::Compiler;
use crate::infra::dirs::XcpackDirs;

/// Execute the plan command
pub async fn execute(project_dir: &Path, mode: RunMode, args: &ProjectArgs) -> Result<()> {
    let manifest =
        Manifest::load(&args.config_path(project_dir)).context("Failed to load project file")?;
    let graph = ProductGraph::load(&args.graph_path(project_dir)).context("Failed to load graph")?;

    let table = CapabilityTable::default();
    let matrix = PlatformMatrix::new(&table, &manifest.options, &manifest.overrides);
    matrix.check_overrides(&graph.products)?;
    let products = graph.select(&mode)?;

    let output_dir = manifest.output_dir(project_dir);
    let cache = manifest.cache_system(&output_dir, project_dir, &XcpackDirs::new(), false)?;

    // Without a working toolchain, cache state cannot be decided.
    let toolchain_version = match manifest.compiler().version().await {
        Ok(version) => Some(version),
        Err(e) => {
            tracing::warn!("{e}");
            None
        }
    };

    for product in &products {
        let plan = matrix.expand(product)?;
        let state = match &toolchain_version {
            Some(version) => {
                let fp = fingerprint(product, &plan.options, version)?;
                match cache.local_state(product, &fp) {
                    CacheDecision::Hit(_) => "up to date".to_string(),
                    CacheDecision::Miss(reason) => format!("needs build: {reason}"),
                }
            }
            None => "unknown".to_string(),
        };

        println!("{} [{}]", product.id(), state);
        println!("  options: {}", plan.options.summary());
        for task in &plan.tasks {
            println!("  - {} ({})", task.identifier(), task.architectures.sdk);
        }
    }

    if products.is_empty() {
        println!("No products in scope");
    }
    Ok(())
}
