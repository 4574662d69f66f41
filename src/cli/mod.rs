//! Command-line interface module
//!
//! This module handles argument parsing and output formatting.
//! It contains no business logic - that belongs in the [`crate::core`] module.

pub mod commands;
pub mod output;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use commands::Commands;
use output::OutputConfig;

/// xcpack - Cached multi-platform framework bundle builder
///
/// Builds one framework bundle per product of a resolved package graph,
/// reusing bundles whose sources, options and toolchain are unchanged.
#[derive(Parser, Debug)]
#[command(name = "xcpack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Project directory (defaults to the current directory)
    #[arg(short = 'C', long, global = true, value_name = "DIR")]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Output configuration derived from the global flags
    pub fn output_config(&self) -> OutputConfig {
        OutputConfig::new(self.quiet, self.verbose)
    }

    /// Execute the CLI command
    pub async fn run(self) -> Result<()> {
        let output = self.output_config();
        let project_dir = match self.project_dir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };

        if let Some(cmd) = self.command {
            cmd.run(&project_dir, output).await
        } else {
            // No subcommand provided, show help
            use clap::CommandFactory;
            let mut cmd = Self::command();
            cmd.print_help()?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commands::CacheCommands;

    #[test]
    fn test_parse_create_with_product() {
        let cli = Cli::parse_from(["xcpack", "-vv", "create", "Logging", "--no-cache"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Some(Commands::Create { product, run }) => {
                assert_eq!(product.as_deref(), Some("Logging"));
                assert!(run.no_cache);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_prepare_flags() {
        let cli = Cli::parse_from([
            "xcpack",
            "prepare",
            "--jobs",
            "3",
            "--stop-on-first-error",
            "--graph",
            "g.json",
        ]);
        match cli.command {
            Some(Commands::Prepare { run }) => {
                assert_eq!(run.jobs, Some(3));
                assert!(run.stop_on_first_error);
                assert_eq!(run.project.graph, Some(PathBuf::from("g.json")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_cache_subcommand() {
        let cli = Cli::parse_from(["xcpack", "-C", "/proj", "cache", "info"]);
        assert_eq!(cli.project_dir, Some(PathBuf::from("/proj")));
        assert!(matches!(
            cli.command,
            Some(Commands::Cache {
                command: CacheCommands::Info,
                ..
            })
        ));
    }

    #[test]
    fn test_zero_jobs_rejected() {
        assert!(Cli::try_parse_from(["xcpack", "prepare", "--jobs", "0"]).is_err());
    }
}
