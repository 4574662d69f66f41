//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod cache;
pub mod clean;
pub mod plan;
pub mod run;

use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

use crate::cli::output::OutputConfig;
use crate::config::defaults;
use crate::core::product::RunMode;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build bundles for every dependency of the root package
    Prepare {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Build bundles for the root package's own products
    Create {
        /// Build only this product
        product: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Show the platform tasks and cache state of each product without building
    Plan {
        /// Plan the root package's products instead of its dependencies
        #[arg(long)]
        create: bool,

        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Manage cache storages
    Cache {
        #[command(subcommand)]
        command: CacheCommands,

        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Remove intermediate build files
    Clean {
        /// Also remove the output directory with all bundles
        #[arg(long)]
        all: bool,

        #[command(flatten)]
        project: ProjectArgs,
    },
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show local storage information
    Info,

    /// Remove every bundle from the local storages
    Clean,
}

/// Project file locations
#[derive(Args, Debug, Clone, Default)]
pub struct ProjectArgs {
    /// Project file (defaults to xcpack.toml in the project directory)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Resolved graph file (defaults to xcpack-graph.json in the project directory)
    #[arg(long, value_name = "FILE")]
    pub graph: Option<PathBuf>,
}

impl ProjectArgs {
    /// Project file path
    pub fn config_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(
            self.config
                .as_deref()
                .unwrap_or_else(|| Path::new(defaults::CONFIG_FILE)),
        )
    }

    /// Graph file path
    pub fn graph_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(
            self.graph
                .as_deref()
                .unwrap_or_else(|| Path::new(defaults::GRAPH_FILE)),
        )
    }
}

/// Arguments shared by the building commands
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Rebuild everything, ignoring and not consulting any cache
    #[arg(long)]
    pub no_cache: bool,

    /// Number of products built concurrently
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: Option<u16>,

    /// Skip products not yet started once one fails
    #[arg(long)]
    pub stop_on_first_error: bool,

    /// Output directory (overrides the project file)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,
}

impl Commands {
    /// Execute the command
    pub async fn run(self, project_dir: &Path, output: OutputConfig) -> Result<()> {
        match self {
            Self::Prepare { run } => {
                run::execute(project_dir, RunMode::PrepareDependencies, &run, output).await
            }
            Self::Create { product, run } => {
                run::execute(project_dir, RunMode::CreatePackage { product }, &run, output).await
            }
            Self::Plan { create, project } => {
                let mode = if create {
                    RunMode::CreatePackage { product: None }
                } else {
                    RunMode::PrepareDependencies
                };
                plan::execute(project_dir, mode, &project).await
            }
            Self::Cache { command, project } => match command {
                CacheCommands::Info => cache::execute_info(project_dir, &project).await,
                CacheCommands::Clean => cache::execute_clean(project_dir, &project).await,
            },
            Self::Clean { all, project } => clean::execute(project_dir, &project, all).await,
        }
    }
}
