//! External compiler invocation
//!
//! The compiler is an opaque external process. xcpack hands it an argument
//! list describing one platform task and reads back only success or failure
//! plus the framework it was asked to produce.

use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::defaults;
use crate::core::matrix::PlatformTask;
use crate::core::options::BuildOptions;
use crate::core::platform::SdkVariant;
use crate::core::product::Product;
use crate::error::{CompileError, ExitInfo};

/// Everything the compiler needs for one platform task
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Product being built
    pub product: Product,
    /// Platform and architectures
    pub task: PlatformTask,
    /// Resolved options
    pub options: BuildOptions,
    /// Task-scoped workspace; the framework is expected directly inside
    pub workspace: PathBuf,
}

impl CompileRequest {
    /// Where the compiler must leave the framework
    pub fn expected_artifact(&self) -> PathBuf {
        self.workspace.join(format!(
            "{}.{}",
            self.product.display_name(),
            defaults::FRAMEWORK_EXTENSION
        ))
    }

    /// Opaque argument list describing this task
    pub fn arguments(&self) -> Vec<String> {
        let mut args = vec![
            "--package".to_string(),
            self.product.package.clone(),
            "--target".to_string(),
            self.product.target.clone(),
            "--source".to_string(),
            self.product.source_path().display().to_string(),
            "--configuration".to_string(),
            self.options.configuration.to_string(),
            "--platform".to_string(),
            self.task.platform.to_string(),
            "--sdk".to_string(),
            self.task.architectures.sdk.clone(),
        ];

        if self.task.architectures.variant == SdkVariant::Simulator {
            args.push("--simulator".to_string());
        }
        for arch in &self.task.architectures.architectures {
            args.push("--arch".to_string());
            args.push(arch.clone());
        }

        args.push("--framework-type".to_string());
        args.push(self.options.framework_type.to_string());
        args.push("--output".to_string());
        args.push(self.workspace.display().to_string());

        if self.options.library_evolution {
            args.push("--library-evolution".to_string());
        }
        if self.options.debug_symbols {
            args.push("--debug-symbols".to_string());
        }

        let flags = &self.options.extra_flags;
        for (prefix, values) in [
            ("-Xcc", &flags.c),
            ("-Xcxx", &flags.cxx),
            ("-Xswiftc", &flags.swift),
            ("-Xlinker", &flags.linker),
        ] {
            for value in values {
                args.push(prefix.to_string());
                args.push(value.clone());
            }
        }

        args
    }
}

/// External compiler
pub trait Compiler: Send + Sync {
    /// Toolchain version string, part of every fingerprint
    fn version(&self) -> BoxFuture<'_, Result<String, CompileError>>;

    /// Build one platform task, returning the produced framework
    ///
    /// Must stop promptly and return [`CompileError::Cancelled`] once `cancel`
    /// fires.
    fn compile<'a>(
        &'a self,
        request: &'a CompileRequest,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<PathBuf, CompileError>>;

    /// Whether the toolchain allows only one build at a time
    fn is_exclusive(&self) -> bool {
        false
    }
}

/// Compiler that runs an external program
#[derive(Debug, Clone)]
pub struct ProcessCompiler {
    program: PathBuf,
    base_args: Vec<String>,
    exclusive: bool,
}

impl ProcessCompiler {
    /// Create a compiler wrapper for `program`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            exclusive: false,
        }
    }

    /// Arguments placed before every invocation
    #[must_use]
    pub fn with_base_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }

    /// Mark the toolchain as allowing one build at a time
    #[must_use]
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Path to the program
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

impl Default for ProcessCompiler {
    fn default() -> Self {
        Self::new(defaults::DEFAULT_COMPILER)
    }
}

impl Compiler for ProcessCompiler {
    fn version(&self) -> BoxFuture<'_, Result<String, CompileError>> {
        Box::pin(async move {
            let output = Command::new(&self.program)
                .args(&self.base_args)
                .arg("--version")
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|e| CompileError::Spawn {
                    program: self.program_name(),
                    error: e.to_string(),
                })?;

            if !output.status.success() {
                return Err(CompileError::Version {
                    error: format!(
                        "'{} --version' exited with {}",
                        self.program_name(),
                        output.status
                    ),
                });
            }

            let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if version.is_empty() {
                return Err(CompileError::Version {
                    error: "empty version output".to_string(),
                });
            }
            Ok(version)
        })
    }

    fn compile<'a>(
        &'a self,
        request: &'a CompileRequest,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<PathBuf, CompileError>> {
        Box::pin(async move {
            let task = request.task.identifier();
            let io_err = |path: &Path, e: std::io::Error| CompileError::IoError {
                path: path.to_path_buf(),
                error: e.to_string(),
            };

            tokio::fs::create_dir_all(&request.workspace)
                .await
                .map_err(|e| io_err(&request.workspace, e))?;

            let log_path = request.workspace.join("build.log");
            let log = std::fs::File::create(&log_path).map_err(|e| io_err(&log_path, e))?;
            let log_err = log.try_clone().map_err(|e| io_err(&log_path, e))?;

            let args = request.arguments();
            tracing::debug!("{} {}", self.program_name(), args.join(" "));

            let mut child = Command::new(&self.program)
                .args(&self.base_args)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::from(log))
                .stderr(Stdio::from(log_err))
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| CompileError::Spawn {
                    program: self.program_name(),
                    error: e.to_string(),
                })?;

            let status = tokio::select! {
                status = child.wait() => status.map_err(|e| io_err(&log_path, e))?,
                () = cancel.cancelled() => {
                    tracing::info!("Cancelling compiler for {task}");
                    let _ = child.kill().await;
                    return Err(CompileError::Cancelled);
                }
            };

            if !status.success() {
                return Err(CompileError::Failed {
                    task,
                    exit: ExitInfo {
                        code: status.code(),
                        log: Some(log_path),
                    },
                });
            }

            let artifact = request.expected_artifact();
            if !artifact.is_dir() {
                return Err(CompileError::MissingArtifact {
                    task,
                    path: artifact,
                });
            }
            Ok(artifact)
        })
    }

    fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::options::ExtraFlags;
    use crate::core::platform::{CapabilityTable, Platform};
    use crate::core::product::ProductKind;

    fn request(workspace: &Path, simulator: bool) -> CompileRequest {
        let product = Product::new("pkg", "Lib", ProductKind::Library, "/src/pkg", "Sources/Lib");
        let table = CapabilityTable::default();
        let caps = table.get(Platform::Ios).unwrap();
        let architectures = if simulator {
            caps.simulator.clone().unwrap()
        } else {
            caps.device.clone()
        };
        let mut options = BuildOptions::default().with_library_evolution(true);
        options.extra_flags = ExtraFlags {
            swift: vec!["-Osize".to_string()],
            ..ExtraFlags::default()
        };

        CompileRequest {
            task: PlatformTask {
                product: product.id(),
                platform: Platform::Ios,
                architectures,
            },
            product,
            options,
            workspace: workspace.to_path_buf(),
        }
    }

    #[test]
    fn test_arguments_describe_task() {
        let args = request(Path::new("/ws"), true).arguments();
        let joined = args.join(" ");

        assert!(joined.contains("--target Lib"));
        assert!(joined.contains("--sdk iphonesimulator"));
        assert!(joined.contains("--simulator"));
        assert!(joined.contains("--arch arm64 --arch x86_64"));
        assert!(joined.contains("--library-evolution"));
        assert!(joined.contains("-Xswiftc -Osize"));
        assert!(!joined.contains("--debug-symbols"));
    }

    #[test]
    fn test_expected_artifact_location() {
        let req = request(Path::new("/ws/ios-arm64"), false);
        assert_eq!(
            req.expected_artifact(),
            PathBuf::from("/ws/ios-arm64/Lib.framework")
        );
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        fn script(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-compiler");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn test_version_reads_stdout() {
            let temp = TempDir::new().unwrap();
            let compiler = ProcessCompiler::new(script(temp.path(), "echo 'swift 6.0.1'"));
            assert_eq!(compiler.version().await.unwrap(), "swift 6.0.1");
        }

        #[tokio::test]
        async fn test_failure_reports_exit_code_and_log() {
            let temp = TempDir::new().unwrap();
            let compiler =
                ProcessCompiler::new(script(temp.path(), "echo 'error: boom' >&2\nexit 3"));
            let req = request(&temp.path().join("ws"), false);

            let err = compiler
                .compile(&req, &CancellationToken::new())
                .await
                .unwrap_err();

            match err {
                CompileError::Failed { exit, .. } => {
                    assert_eq!(exit.code, Some(3));
                    let log = std::fs::read_to_string(exit.log.unwrap()).unwrap();
                    assert!(log.contains("boom"));
                }
                other => panic!("expected failure, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_success_without_artifact_is_error() {
            let temp = TempDir::new().unwrap();
            let compiler = ProcessCompiler::new(script(temp.path(), "exit 0"));
            let req = request(&temp.path().join("ws"), false);

            let err = compiler
                .compile(&req, &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, CompileError::MissingArtifact { .. }));
        }

        #[tokio::test]
        async fn test_cancellation_stops_compiler() {
            let temp = TempDir::new().unwrap();
            let compiler = ProcessCompiler::new(script(temp.path(), "sleep 30"));
            let req = request(&temp.path().join("ws"), false);
            let cancel = CancellationToken::new();

            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                trigger.cancel();
            });

            let started = std::time::Instant::now();
            let err = compiler.compile(&req, &cancel).await.unwrap_err();
            assert!(matches!(err, CompileError::Cancelled));
            assert!(started.elapsed() < std::time::Duration::from_secs(10));
        }
    }
}
