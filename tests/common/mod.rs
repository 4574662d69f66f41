//! Common test utilities and helpers
//!
//! Shared fixtures for integration tests: a scripted compiler, a storage
//! wrapper that counts calls, and a temporary project with a product graph.

#![allow(dead_code)]

use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use xcpack::core::cache::CacheSystem;
use xcpack::core::product::{Product, ProductGraph, ProductKind};
use xcpack::core::runner::{RunReport, RunSettings, Runner};
use xcpack::error::{CompileError, ExitInfo, StorageError};
use xcpack::infra::compiler::{CompileRequest, Compiler};
use xcpack::infra::merger::DirectoryMerger;
use xcpack::infra::storage::{CacheKey, CacheStorage};

/// Compiler double that writes a deterministic framework per task
#[derive(Debug)]
pub struct FakeCompiler {
    version: Mutex<String>,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
    per_target: Mutex<BTreeMap<String, usize>>,
    delay: Mutex<Option<Duration>>,
    compiling: Notify,
}

impl FakeCompiler {
    /// Compiler reporting toolchain `version`
    pub fn new(version: &str) -> Arc<Self> {
        Arc::new(Self {
            version: Mutex::new(version.to_string()),
            failing: Mutex::new(HashSet::new()),
            calls: AtomicUsize::new(0),
            per_target: Mutex::new(BTreeMap::new()),
            delay: Mutex::new(None),
            compiling: Notify::new(),
        })
    }

    /// Make every compile take `delay` unless cancelled first
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Wait until a delayed compile is in progress
    pub async fn wait_until_compiling(&self) {
        self.compiling.notified().await;
    }

    /// Change the reported toolchain version
    pub fn set_version(&self, version: &str) {
        *self.version.lock().unwrap() = version.to_string();
    }

    /// Make every compile of `target` fail
    pub fn fail(&self, target: &str) {
        self.failing.lock().unwrap().insert(target.to_string());
    }

    /// Stop failing `target`
    pub fn heal(&self, target: &str) {
        self.failing.lock().unwrap().remove(target);
    }

    /// Total compile invocations
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Compile invocations for one target
    pub fn calls_for(&self, target: &str) -> usize {
        self.per_target
            .lock()
            .unwrap()
            .get(target)
            .copied()
            .unwrap_or(0)
    }
}

impl Compiler for FakeCompiler {
    fn version(&self) -> BoxFuture<'_, Result<String, CompileError>> {
        let version = self.version.lock().unwrap().clone();
        Box::pin(async move { Ok(version) })
    }

    fn compile<'a>(
        &'a self,
        request: &'a CompileRequest,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<PathBuf, CompileError>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(CompileError::Cancelled);
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self
                .per_target
                .lock()
                .unwrap()
                .entry(request.product.target.clone())
                .or_default() += 1;

            if self.failing.lock().unwrap().contains(&request.product.target) {
                return Err(CompileError::Failed {
                    task: request.task.identifier(),
                    exit: ExitInfo {
                        code: Some(65),
                        log: None,
                    },
                });
            }

            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                self.compiling.notify_one();
                tokio::select! {
                    () = cancel.cancelled() => return Err(CompileError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }

            let framework = request.expected_artifact();
            std::fs::create_dir_all(&framework).unwrap();
            let sources = std::fs::read_to_string(request.product.source_path().join("main.swift"))
                .unwrap_or_default();
            std::fs::write(
                framework.join(&request.product.target),
                format!("{}\n{}\n{}", request.task.identifier(), request.options.summary(), sources),
            )
            .unwrap();
            Ok(framework)
        })
    }
}

/// Storage wrapper counting every call
#[derive(Debug)]
pub struct CountingStorage {
    inner: Arc<dyn CacheStorage>,
    pub exists: AtomicUsize,
    pub fetches: AtomicUsize,
    pub stores: AtomicUsize,
}

impl CountingStorage {
    pub fn new(inner: Arc<dyn CacheStorage>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            exists: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            stores: AtomicUsize::new(0),
        })
    }

    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.exists.load(Ordering::SeqCst)
    }
}

impl CacheStorage for CountingStorage {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn exists<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<bool, StorageError>> {
        self.exists.fetch_add(1, Ordering::SeqCst);
        self.inner.exists(key)
    }

    fn fetch<'a>(
        &'a self,
        key: &'a CacheKey,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(key, destination)
    }

    fn store<'a>(
        &'a self,
        key: &'a CacheKey,
        bundle: &'a Path,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.inner.store(key, bundle)
    }
}

/// Temporary project with sources for a few products
pub struct TestProject {
    /// Temporary directory for the test project
    pub dir: TempDir,
}

impl TestProject {
    /// Create a new test project in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Get the path to the test project directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Output directory used by [`Self::runner`]
    pub fn output(&self) -> PathBuf {
        self.dir.path().join("XCFrameworks")
    }

    /// Create a file in the test project
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Read a file from the test project
    pub fn read_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).expect("Failed to read file")
    }

    /// Write `Sources/<target>/main.swift`
    pub fn write_source(&self, target: &str, content: &str) {
        self.create_file(&format!("Sources/{target}/main.swift"), content);
    }

    /// Library product with sources under `Sources/<target>`
    pub fn library(&self, package: &str, target: &str) -> Product {
        if !self.dir.path().join("Sources").join(target).exists() {
            self.write_source(target, &format!("// {target}\n"));
        }
        Product::new(
            package,
            target,
            ProductKind::Library,
            self.path(),
            format!("Sources/{target}"),
        )
    }

    /// Graph rooted at package `app`
    pub fn graph(&self, products: Vec<Product>) -> ProductGraph {
        ProductGraph::new("app", products).expect("Invalid graph")
    }

    /// Runner writing to [`Self::output`] with a directory merger
    pub fn runner(
        &self,
        compiler: Arc<FakeCompiler>,
        cache: CacheSystem,
        settings: RunSettings,
    ) -> Runner {
        Runner::new(
            compiler,
            Arc::new(DirectoryMerger),
            cache,
            self.dir.path().join(".xcpack/build"),
            settings,
        )
    }

    /// Enabled cache system over [`Self::output`] without storages
    pub fn cache(&self) -> CacheSystem {
        CacheSystem::new(self.output(), true)
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Run to completion without cancellation
pub async fn run(runner: &Runner, graph: &ProductGraph) -> RunReport {
    runner
        .run(graph, &CancellationToken::new())
        .await
        .expect("Run failed")
}

/// Every file under `dir` with its content, keyed by relative path
pub fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            (
                e.path().strip_prefix(dir).unwrap().to_path_buf(),
                std::fs::read(e.path()).unwrap(),
            )
        })
        .collect()
}

/// Sample project file for CLI tests
pub const SAMPLE_MANIFEST: &str = r#"
[options]
configuration = "release"
platforms = ["ios", "macos"]
simulator = true

[overrides.Net]
platforms = ["ios"]

[run]
jobs = 2
"#;
