//! Build executor
//!
//! Runs the compiler once per platform task of a product and collects the
//! frameworks it produces. Tasks run concurrently unless the toolchain only
//! allows one build at a time. The first failure drops the remaining
//! invocations, which kills their processes.

use futures::future::try_join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::matrix::{PlatformTask, ProductPlan};
use crate::error::CompileError;
use crate::infra::compiler::{CompileRequest, Compiler};
use crate::infra::merger::MergeInput;

/// Executes platform tasks through a [`Compiler`]
#[derive(Clone)]
pub struct Executor {
    compiler: Arc<dyn Compiler>,
    build_dir: PathBuf,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("build_dir", &self.build_dir)
            .field("exclusive", &self.compiler.is_exclusive())
            .finish()
    }
}

impl Executor {
    /// Create an executor with intermediate files under `build_dir`
    pub fn new(compiler: Arc<dyn Compiler>, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            compiler,
            build_dir: build_dir.into(),
        }
    }

    /// Workspace of one task: `<build_dir>/<package>/<target>/<task-id>`
    pub fn workspace(&self, task: &PlatformTask) -> PathBuf {
        workspace(&self.build_dir, task)
    }

    /// Build every task of a plan
    ///
    /// Returned artifacts follow the plan's task order.
    pub async fn build(
        &self,
        plan: &ProductPlan,
        cancel: &CancellationToken,
    ) -> Result<Vec<MergeInput>, CompileError> {
        let requests = plan
            .tasks
            .iter()
            .map(|task| {
                let workspace = self.workspace(task);
                reset_workspace(&workspace)?;
                Ok(CompileRequest {
                    product: plan.product.clone(),
                    task: task.clone(),
                    options: plan.options.clone(),
                    workspace,
                })
            })
            .collect::<Result<Vec<_>, CompileError>>()?;

        if self.compiler.is_exclusive() {
            let mut artifacts = Vec::with_capacity(requests.len());
            for request in &requests {
                artifacts.push(self.run_one(request, cancel).await?);
            }
            Ok(artifacts)
        } else {
            try_join_all(requests.iter().map(|r| self.run_one(r, cancel))).await
        }
    }

    async fn run_one(
        &self,
        request: &CompileRequest,
        cancel: &CancellationToken,
    ) -> Result<MergeInput, CompileError> {
        if cancel.is_cancelled() {
            return Err(CompileError::Cancelled);
        }
        tracing::info!("Compiling {}", request.task);
        let framework = self.compiler.compile(request, cancel).await?;
        tracing::debug!("{} produced {}", request.task, framework.display());
        Ok(MergeInput {
            task: request.task.clone(),
            framework,
        })
    }
}

/// Workspace of one task under `build_dir`
pub fn workspace(build_dir: &Path, task: &PlatformTask) -> PathBuf {
    build_dir
        .join(&task.product.package)
        .join(&task.product.target)
        .join(task.identifier())
}

fn reset_workspace(path: &Path) -> Result<(), CompileError> {
    let io_err = |e: std::io::Error| CompileError::IoError {
        path: path.to_path_buf(),
        error: e.to_string(),
    };
    if path.exists() {
        std::fs::remove_dir_all(path).map_err(io_err)?;
    }
    std::fs::create_dir_all(path).map_err(io_err)
}
