//! Pipeline runner
//!
//! Drives every in-scope product through fingerprint, cache lookup, build,
//! assembly, publish, version record and storage share. Configuration errors
//! abort the run before any compiler starts; everything after that is
//! reported per product.
//!
//! Products run concurrently up to the configured job count. A product waits
//! for its in-scope dependencies to finish first; if one of them did not
//! succeed, the product is skipped.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::core::assembler::Assembler;
use crate::core::cache::{CacheDecision, CacheSystem, HitSource};
use crate::core::executor::Executor;
use crate::core::fingerprint::{fingerprint, Fingerprint};
use crate::core::matrix::{PlatformMatrix, ProductPlan};
use crate::core::options::{BuildOptions, OptionsOverride};
use crate::core::platform::CapabilityTable;
use crate::core::product::{ProductGraph, ProductId, RunMode};
use crate::error::{AssemblyError, CompileError, ProductError, XcpackError};
use crate::infra::compiler::Compiler;
use crate::infra::merger::ArtifactMerger;
use crate::infra::storage::CacheKey;

/// Settings of one run
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Which products to build
    pub mode: RunMode,
    /// Products processed concurrently
    pub jobs: usize,
    /// Skip products not yet started after the first failure
    pub stop_on_first_error: bool,
    /// Platform capabilities
    pub capabilities: CapabilityTable,
    /// Global options
    pub options: BuildOptions,
    /// Per-product overrides keyed by target
    pub overrides: BTreeMap<String, OptionsOverride>,
}

impl RunSettings {
    /// Settings with default capabilities, options and no overrides
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            jobs: 1,
            stop_on_first_error: false,
            capabilities: CapabilityTable::default(),
            options: BuildOptions::default(),
            overrides: BTreeMap::new(),
        }
    }
}

/// What happened to one product
#[derive(Debug)]
pub enum ProductOutcome {
    /// Existing bundle reused
    Reused(HitSource),
    /// Built and published
    Rebuilt,
    /// Failed; the previous bundle, if any, is untouched
    Failed(ProductError),
    /// Not attempted
    Skipped,
}

impl ProductOutcome {
    /// Whether a valid bundle is in place after the run
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Reused(_) | Self::Rebuilt)
    }
}

/// Result for one product
#[derive(Debug)]
pub struct ProductReport {
    /// Product
    pub product: ProductId,
    /// Fingerprint, when it could be computed
    pub fingerprint: Option<Fingerprint>,
    /// Outcome
    pub outcome: ProductOutcome,
}

/// Result of a run, in dependency order
#[derive(Debug, Default)]
pub struct RunReport {
    /// Per-product results
    pub products: Vec<ProductReport>,
}

impl RunReport {
    /// Whether no product failed
    pub fn is_success(&self) -> bool {
        !self
            .products
            .iter()
            .any(|p| matches!(p.outcome, ProductOutcome::Failed(_)))
    }

    /// Number of reused products
    pub fn reused(&self) -> usize {
        self.count(|o| matches!(o, ProductOutcome::Reused(_)))
    }

    /// Number of rebuilt products
    pub fn rebuilt(&self) -> usize {
        self.count(|o| matches!(o, ProductOutcome::Rebuilt))
    }

    /// Number of failed products
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ProductOutcome::Failed(_)))
    }

    /// Number of skipped products
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ProductOutcome::Skipped))
    }

    /// Report for one target
    pub fn get(&self, target: &str) -> Option<&ProductReport> {
        self.products.iter().find(|p| p.product.target == target)
    }

    fn count(&self, f: impl Fn(&ProductOutcome) -> bool) -> usize {
        self.products.iter().filter(|p| f(&p.outcome)).count()
    }
}

/// Runs the pipeline
pub struct Runner {
    compiler: Arc<dyn Compiler>,
    assembler: Assembler,
    cache: Arc<CacheSystem>,
    build_dir: PathBuf,
    settings: RunSettings,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("assembler", &self.assembler)
            .field("build_dir", &self.build_dir)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Shared state of the product tasks of one run
struct ProductPipeline {
    executor: Executor,
    assembler: Assembler,
    cache: Arc<CacheSystem>,
    toolchain_version: String,
}

impl Runner {
    /// Create a runner; bundles go to the cache system's output directory
    pub fn new(
        compiler: Arc<dyn Compiler>,
        merger: Arc<dyn ArtifactMerger>,
        cache: CacheSystem,
        build_dir: impl Into<PathBuf>,
        settings: RunSettings,
    ) -> Self {
        let assembler = Assembler::new(merger, cache.output_dir());
        Self {
            compiler,
            assembler,
            cache: Arc::new(cache),
            build_dir: build_dir.into(),
            settings,
        }
    }

    /// Resolve the plans for the products in scope
    pub fn plan(&self, graph: &ProductGraph) -> Result<Vec<ProductPlan>, XcpackError> {
        let products = graph.select(&self.settings.mode)?;
        let matrix = PlatformMatrix::new(
            &self.settings.capabilities,
            &self.settings.options,
            &self.settings.overrides,
        );
        matrix.check_overrides(&graph.products)?;
        Ok(products
            .iter()
            .map(|p| matrix.expand(p))
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Run the pipeline over `graph`
    ///
    /// Cancelling `cancel` stops compilers in flight and skips products not
    /// yet started. Existing bundles and records are never left half-written.
    pub async fn run(
        &self,
        graph: &ProductGraph,
        cancel: &CancellationToken,
    ) -> Result<RunReport, XcpackError> {
        let plans = self.plan(graph)?;
        if plans.is_empty() {
            tracing::info!("No products in scope");
            return Ok(RunReport::default());
        }

        let toolchain_version = self.compiler.version().await?;
        tracing::info!("Toolchain: {toolchain_version}");

        match self.assembler.remove_stale_staging() {
            Ok(0) => {}
            Ok(n) => tracing::info!("Removed {n} stale staging directories"),
            Err(e) => tracing::warn!("Failed to remove stale staging directories: {e}"),
        }

        let pipeline = Arc::new(ProductPipeline {
            executor: Executor::new(Arc::clone(&self.compiler), &self.build_dir),
            assembler: self.assembler.clone(),
            cache: Arc::clone(&self.cache),
            toolchain_version,
        });
        let stop = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(self.settings.jobs.max(1)));
        let stop_on_first_error = self.settings.stop_on_first_error;

        let mut finished: HashMap<String, watch::Receiver<Option<bool>>> = HashMap::new();
        let mut handles = Vec::with_capacity(plans.len());

        for plan in plans {
            let (done, receiver) = watch::channel(None);
            let dependencies: Vec<_> = plan
                .product
                .dependencies
                .iter()
                .filter_map(|d| finished.get(d).map(|rx| (d.clone(), rx.clone())))
                .collect();
            finished.insert(plan.product.target.clone(), receiver);

            let id = plan.product.id();
            let pipeline = Arc::clone(&pipeline);
            let semaphore = Arc::clone(&semaphore);
            let stop = stop.clone();
            let cancel = cancel.clone();

            let handle = tokio::spawn(async move {
                let stop = stop_on_first_error.then_some(&stop);
                let report =
                    run_product(&pipeline, plan, dependencies, &semaphore, stop, &cancel).await;
                let _ = done.send(Some(report.outcome.is_success()));
                report
            });
            handles.push((id, handle));
        }

        let mut report = RunReport::default();
        for (id, handle) in handles {
            let product = match handle.await {
                Ok(product) => product,
                Err(e) => ProductReport {
                    product: id,
                    fingerprint: None,
                    outcome: ProductOutcome::Failed(ProductError::Panicked(e.to_string())),
                },
            };
            report.products.push(product);
        }

        Ok(report)
    }
}

async fn run_product(
    pipeline: &ProductPipeline,
    plan: ProductPlan,
    dependencies: Vec<(String, watch::Receiver<Option<bool>>)>,
    semaphore: &Semaphore,
    stop: Option<&CancellationToken>,
    cancel: &CancellationToken,
) -> ProductReport {
    let id = plan.product.id();
    let skipped = |id: ProductId| ProductReport {
        product: id,
        fingerprint: None,
        outcome: ProductOutcome::Skipped,
    };

    for (name, mut receiver) in dependencies {
        let succeeded = receiver
            .wait_for(Option::is_some)
            .await
            .map(|state| *state == Some(true))
            .unwrap_or(false);
        if !succeeded {
            tracing::info!("Skipping {id}: dependency '{name}' was not built");
            return skipped(id);
        }
    }

    let Ok(_permit) = semaphore.acquire().await else {
        return skipped(id);
    };
    if cancel.is_cancelled() || stop.is_some_and(CancellationToken::is_cancelled) {
        tracing::debug!("Skipping {id}: run stopped");
        return skipped(id);
    }

    let report = pipeline.process(&plan, cancel).await;
    if let (Some(stop), ProductOutcome::Failed(_)) = (stop, &report.outcome) {
        tracing::info!("Stopping after failure of {id}");
        stop.cancel();
    }
    report
}

impl ProductPipeline {
    async fn process(&self, plan: &ProductPlan, cancel: &CancellationToken) -> ProductReport {
        let product = &plan.product;
        let id = product.id();

        let computed = {
            let product = product.clone();
            let options = plan.options.clone();
            let toolchain = self.toolchain_version.clone();
            tokio::task::spawn_blocking(move || fingerprint(&product, &options, &toolchain)).await
        };
        let fingerprint = match computed {
            Ok(Ok(fingerprint)) => fingerprint,
            Ok(Err(e)) => {
                return ProductReport {
                    product: id,
                    fingerprint: None,
                    outcome: ProductOutcome::Failed(ProductError::Fingerprint(e)),
                }
            }
            Err(e) => {
                return ProductReport {
                    product: id,
                    fingerprint: None,
                    outcome: ProductOutcome::Failed(ProductError::Panicked(e.to_string())),
                }
            }
        };
        tracing::debug!("{id} fingerprint {fingerprint}");

        let key = CacheKey::new(id.clone(), fingerprint.clone());
        let _guard = self.cache.lock(&key).await;

        let outcome = match self
            .cache
            .lookup(product, &key, &self.toolchain_version, &plan.options)
            .await
        {
            CacheDecision::Hit(source) => {
                tracing::info!("Reusing {id} ({source})");
                ProductOutcome::Reused(source)
            }
            CacheDecision::Miss(reason) => {
                tracing::info!("Building {id}: {reason}");
                match self.rebuild(plan, &key, cancel).await {
                    Ok(()) => ProductOutcome::Rebuilt,
                    Err(e) => {
                        let e = cancelled_or(e);
                        tracing::error!("Failed to build {id}: {e}");
                        ProductOutcome::Failed(e)
                    }
                }
            }
        };

        ProductReport {
            product: id,
            fingerprint: Some(fingerprint),
            outcome,
        }
    }

    async fn rebuild(
        &self,
        plan: &ProductPlan,
        key: &CacheKey,
        cancel: &CancellationToken,
    ) -> Result<(), ProductError> {
        let product = &plan.product;
        let staged = if product.is_compiled() {
            let artifacts = self.executor.build(plan, cancel).await?;
            self.assembler.stage(product, artifacts, cancel).await?
        } else {
            self.assembler.stage_prebuilt(product, cancel).await?
        };

        self.cache
            .invalidate(product)
            .map_err(|e| ProductError::VersionRecord(e.to_string()))?;
        let bundle = self.assembler.publish_staged(staged)?;
        self.cache
            .record(product, &key.fingerprint, &self.toolchain_version, &plan.options)
            .map_err(|e| ProductError::VersionRecord(e.to_string()))?;

        self.cache.share(key, &bundle).await;
        Ok(())
    }
}

fn cancelled_or(e: ProductError) -> ProductError {
    match e {
        ProductError::Compile(CompileError::Cancelled)
        | ProductError::Assembly(AssemblyError::Cancelled) => ProductError::Cancelled,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::platform::Platform;
    use crate::core::product::{Product, ProductKind};
    use crate::infra::compiler::CompileRequest;
    use crate::infra::merger::DirectoryMerger;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingCompiler {
        calls: AtomicUsize,
        fail: Vec<String>,
    }

    impl Compiler for CountingCompiler {
        fn version(&self) -> BoxFuture<'_, Result<String, CompileError>> {
            Box::pin(async { Ok("tc 1".to_string()) })
        }

        fn compile<'a>(
            &'a self,
            request: &'a CompileRequest,
            _cancel: &'a CancellationToken,
        ) -> BoxFuture<'a, Result<PathBuf, CompileError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.fail.contains(&request.product.target) {
                    return Err(CompileError::Failed {
                        task: request.task.identifier(),
                        exit: crate::error::ExitInfo {
                            code: Some(1),
                            log: None,
                        },
                    });
                }
                let artifact = request.expected_artifact();
                std::fs::create_dir_all(&artifact).unwrap();
                std::fs::write(artifact.join(&request.product.target), "bin").unwrap();
                Ok(artifact)
            })
        }
    }

    fn graph(root: &std::path::Path) -> ProductGraph {
        for target in ["Core", "Net", "App"] {
            let dir = root.join("Sources").join(target);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("main.swift"), target).unwrap();
        }
        ProductGraph::new(
            "app",
            vec![
                Product::new("core", "Core", ProductKind::Library, root, "Sources/Core"),
                Product::new("net", "Net", ProductKind::Library, root, "Sources/Net")
                    .with_dependency("Core"),
                Product::new("app", "App", ProductKind::Library, root, "Sources/App")
                    .with_dependency("Net"),
            ],
        )
        .unwrap()
    }

    fn runner(temp: &TempDir, compiler: Arc<CountingCompiler>, settings: RunSettings) -> Runner {
        Runner::new(
            compiler,
            Arc::new(DirectoryMerger),
            CacheSystem::new(temp.path().join("out"), true),
            temp.path().join("build"),
            settings,
        )
    }

    #[tokio::test]
    async fn test_prepare_builds_dependencies_in_order() {
        let temp = TempDir::new().unwrap();
        let graph = graph(temp.path());
        let compiler = Arc::new(CountingCompiler::default());
        let mut settings = RunSettings::new(RunMode::PrepareDependencies);
        settings.jobs = 4;

        let report = runner(&temp, compiler.clone(), settings)
            .run(&graph, &CancellationToken::new())
            .await
            .unwrap();

        let order: Vec<_> = report.products.iter().map(|p| p.product.target.as_str()).collect();
        assert_eq!(order, vec!["Core", "Net"]);
        assert_eq!(report.rebuilt(), 2);
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_run_reuses() {
        let temp = TempDir::new().unwrap();
        let graph = graph(temp.path());
        let compiler = Arc::new(CountingCompiler::default());
        let runner = runner(&temp, compiler.clone(), RunSettings::new(RunMode::PrepareDependencies));

        runner.run(&graph, &CancellationToken::new()).await.unwrap();
        let report = runner.run(&graph, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.reused(), 2);
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_dependency_skips_dependents() {
        let temp = TempDir::new().unwrap();
        let graph = graph(temp.path());
        let compiler = Arc::new(CountingCompiler {
            fail: vec!["Core".to_string()],
            ..CountingCompiler::default()
        });

        let report = runner(&temp, compiler, RunSettings::new(RunMode::PrepareDependencies))
            .run(&graph, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!report.is_success());
        assert!(matches!(
            report.get("Core").unwrap().outcome,
            ProductOutcome::Failed(ProductError::Compile(CompileError::Failed { .. }))
        ));
        assert!(matches!(report.get("Net").unwrap().outcome, ProductOutcome::Skipped));
    }

    #[tokio::test]
    async fn test_config_error_before_any_compile() {
        let temp = TempDir::new().unwrap();
        let graph = graph(temp.path());
        let compiler = Arc::new(CountingCompiler::default());
        let mut settings = RunSettings::new(RunMode::CreatePackage { product: None });
        settings.options = BuildOptions::default()
            .with_platforms([Platform::DriverKit])
            .with_library_evolution(true);

        let err = runner(&temp, compiler.clone(), settings)
            .run(&graph, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, XcpackError::Config(_)));
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_everything() {
        let temp = TempDir::new().unwrap();
        let graph = graph(temp.path());
        let compiler = Arc::new(CountingCompiler::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = runner(&temp, compiler.clone(), RunSettings::new(RunMode::PrepareDependencies))
            .run(&graph, &cancel)
            .await
            .unwrap();

        assert_eq!(report.skipped(), 2);
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_named_product() {
        let temp = TempDir::new().unwrap();
        let graph = graph(temp.path());
        let settings = RunSettings::new(RunMode::CreatePackage {
            product: Some("Nope".to_string()),
        });

        let err = runner(&temp, Arc::new(CountingCompiler::default()), settings)
            .plan(&graph)
            .unwrap_err();
        assert!(matches!(err, XcpackError::Config(_)));
    }
}
