//! Prepare and create command implementation
//!
//! Loads the project file and graph, wires the compiler, merge tool and cache
//! storages together and runs the pipeline.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::RunArgs;
use crate::cli::output::{self, OutputConfig};
use crate::core::manifest::Manifest;
use crate::core::platform::CapabilityTable;
use crate::core::product::{ProductGraph, RunMode};
use crate::core::runner::{RunSettings, Runner};
use crate::infra::dirs::XcpackDirs;

/// Execute a run in `mode`
pub async fn execute(
    project_dir: &Path,
    mode: RunMode,
    args: &RunArgs,
    config: OutputConfig,
) -> Result<()> {
    let manifest = Manifest::load(&args.project.config_path(project_dir))
        .context("Failed to load project file")?;
    let graph_path = args.project.graph_path(project_dir);
    let graph = ProductGraph::load(&graph_path)
        .with_context(|| format!("Failed to load graph from {}", graph_path.display()))?;

    let output_dir = args
        .output
        .as_ref()
        .map_or_else(|| manifest.output_dir(project_dir), |o| project_dir.join(o));
    let cache = manifest
        .cache_system(&output_dir, project_dir, &XcpackDirs::new(), args.no_cache)
        .context("Invalid cache configuration")?;

    let settings = RunSettings {
        mode,
        jobs: args.jobs.map_or_else(|| manifest.jobs(), usize::from),
        stop_on_first_error: args.stop_on_first_error || manifest.run.stop_on_first_error,
        capabilities: CapabilityTable::default(),
        options: manifest.options.clone(),
        overrides: manifest.overrides.clone(),
    };
    tracing::info!(
        "Output: {}, jobs: {}, cache: {}",
        output_dir.display(),
        settings.jobs,
        if cache.is_enabled() { "on" } else { "off" }
    );

    let runner = Runner::new(
        Arc::new(manifest.compiler()),
        manifest.merger(),
        cache,
        manifest.build_dir(project_dir),
        settings,
    );

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, stopping builds");
                cancel.cancel();
            }
        })
    };

    let spinner = config
        .show_progress()
        .then(|| output::create_spinner("Building bundles..."));
    let result = runner.run(&graph, &cancel).await;
    interrupt.abort();
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let report = result?;
    output::print_report(&report, config);

    if !report.is_success() {
        bail!("{} of {} products failed", report.failed(), report.products.len());
    }
    Ok(())
}
