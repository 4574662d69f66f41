//! Artifact merge operation
//!
//! Combines per-platform frameworks into one bundle. xcpack never links or
//! rewrites binaries itself: [`XcodebuildMerger`] delegates to
//! `xcodebuild -create-xcframework`, and [`DirectoryMerger`] only lays out
//! copies for hosts without that tool.

use futures::future::BoxFuture;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::defaults;
use crate::core::matrix::PlatformTask;
use crate::core::platform::SdkVariant;
use crate::error::{AssemblyError, ExitInfo};
use crate::infra::filesystem;

/// One framework to merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeInput {
    /// Task that produced the framework
    pub task: PlatformTask,
    /// Framework directory
    pub framework: PathBuf,
}

/// External merge operation
pub trait ArtifactMerger: Send + Sync {
    /// Merge `inputs` into a new bundle directory at `output`
    ///
    /// `output` does not exist yet. Inputs arrive in canonical platform order.
    fn merge<'a>(
        &'a self,
        inputs: &'a [MergeInput],
        output: &'a Path,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), AssemblyError>>;
}

/// Merger backed by `xcodebuild -create-xcframework`
#[derive(Debug, Clone)]
pub struct XcodebuildMerger {
    program: PathBuf,
}

impl XcodebuildMerger {
    /// Create a merger using `program`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Whether the merge tool can be found in PATH
    pub fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    /// Arguments for one merge
    pub fn arguments(inputs: &[MergeInput], output: &Path) -> Vec<String> {
        let mut args = vec!["-create-xcframework".to_string()];
        for input in inputs {
            args.push("-framework".to_string());
            args.push(input.framework.display().to_string());
        }
        args.push("-output".to_string());
        args.push(output.display().to_string());
        args
    }
}

impl Default for XcodebuildMerger {
    fn default() -> Self {
        Self::new(defaults::DEFAULT_MERGE_TOOL)
    }
}

impl ArtifactMerger for XcodebuildMerger {
    fn merge<'a>(
        &'a self,
        inputs: &'a [MergeInput],
        output: &'a Path,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), AssemblyError>> {
        Box::pin(async move {
            let program = self.program.display().to_string();
            let args = Self::arguments(inputs, output);
            tracing::debug!("{program} {}", args.join(" "));

            let mut child = Command::new(&self.program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| AssemblyError::MergeSpawn {
                    program: program.clone(),
                    error: e.to_string(),
                })?;

            let status = tokio::select! {
                status = child.wait() => status.map_err(|e| AssemblyError::IoError {
                    path: output.to_path_buf(),
                    error: e.to_string(),
                })?,
                () = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(AssemblyError::Cancelled);
                }
            };

            if !status.success() {
                return Err(AssemblyError::MergeFailed {
                    program,
                    exit: ExitInfo {
                        code: status.code(),
                        log: None,
                    },
                });
            }
            Ok(())
        })
    }
}

/// Library entry of a directory bundle's `Info.json`
#[derive(Debug, Serialize)]
struct LibraryEntry<'a> {
    identifier: String,
    platform: &'a str,
    variant: Option<&'static str>,
    architectures: &'a [String],
    path: String,
}

/// `Info.json` of a directory bundle
#[derive(Debug, Serialize)]
struct BundleInfo<'a> {
    format_version: u32,
    libraries: Vec<LibraryEntry<'a>>,
}

/// Merger that copies frameworks into `<task-id>/` sub-directories
///
/// Produces the same directory shape as the platform tool, with an
/// `Info.json` manifest instead of a property list.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryMerger;

impl DirectoryMerger {
    fn merge_blocking(inputs: &[MergeInput], output: &Path) -> Result<(), AssemblyError> {
        filesystem::create_dir_all(output)?;

        let mut libraries = Vec::with_capacity(inputs.len());
        for input in inputs {
            let identifier = input.task.identifier();
            let name = input
                .framework
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| AssemblyError::IoError {
                    path: input.framework.clone(),
                    error: "framework path has no file name".to_string(),
                })?;

            let target = output.join(&identifier).join(&name);
            filesystem::copy_dir_all(&input.framework, &target)?;

            libraries.push(LibraryEntry {
                platform: input.task.platform.as_str(),
                variant: match input.task.architectures.variant {
                    SdkVariant::Device => None,
                    SdkVariant::Simulator => Some("simulator"),
                },
                architectures: &input.task.architectures.architectures,
                path: format!("{identifier}/{name}"),
                identifier,
            });
        }

        let info = BundleInfo {
            format_version: 1,
            libraries,
        };
        let content = serde_json::to_string_pretty(&info).map_err(|e| AssemblyError::IoError {
            path: output.join("Info.json"),
            error: e.to_string(),
        })?;
        filesystem::write_file(&output.join("Info.json"), &content)?;
        Ok(())
    }
}

impl ArtifactMerger for DirectoryMerger {
    fn merge<'a>(
        &'a self,
        inputs: &'a [MergeInput],
        output: &'a Path,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), AssemblyError>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(AssemblyError::Cancelled);
            }
            let inputs = inputs.to_vec();
            let out = output.to_path_buf();
            tokio::task::spawn_blocking(move || Self::merge_blocking(&inputs, &out))
                .await
                .map_err(|e| AssemblyError::IoError {
                    path: output.to_path_buf(),
                    error: e.to_string(),
                })?
        })
    }
}
