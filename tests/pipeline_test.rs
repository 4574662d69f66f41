//! Integration tests for the build pipeline
//!
//! Each test drives a full run over a temporary project with a fake compiler
//! and the directory merger, then inspects the output directory.

mod common;

use common::{run, snapshot, CountingStorage, FakeCompiler, TestProject};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use xcpack::core::cache::{CacheSystem, HitSource};
use xcpack::core::options::{BuildOptions, OptionsOverride};
use xcpack::core::platform::Platform;
use xcpack::core::product::{ProductGraph, RunMode};
use xcpack::core::runner::{ProductOutcome, RunSettings};
use xcpack::core::version_record::VersionRecord;
use xcpack::error::{AssemblyError, CompileError, ProductError};
use xcpack::infra::storage::{LocalDiskStorage, StorageRoles};

fn prepare() -> RunSettings {
    RunSettings::new(RunMode::PrepareDependencies)
}

/// Two dependency products (Core <- Net) and the root product App
fn three_products(project: &TestProject) -> ProductGraph {
    project.graph(vec![
        project.library("core", "Core"),
        project.library("net", "Net").with_dependency("Core"),
        project.library("app", "App").with_dependency("Net"),
    ])
}

fn platform_dirs(bundle: &std::path::Path) -> Vec<String> {
    let mut dirs: Vec<String> = std::fs::read_dir(bundle)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().unwrap().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    dirs.sort();
    dirs
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let project = TestProject::new();
    let graph = three_products(&project);
    let compiler = FakeCompiler::new("swift 6.0");
    let mut settings = prepare();
    settings.options = BuildOptions::default()
        .with_platforms([Platform::Ios, Platform::MacOs])
        .with_simulator(true);

    let runner = project.runner(compiler.clone(), project.cache(), settings);
    let first = run(&runner, &graph).await;
    assert_eq!(first.rebuilt(), 2);
    let calls = compiler.calls();
    let before = snapshot(&project.output());

    let second = run(&runner, &graph).await;
    assert_eq!(second.reused(), 2);
    assert_eq!(compiler.calls(), calls, "no compiler call on the second run");
    assert_eq!(snapshot(&project.output()), before);
    for report in &second.products {
        assert!(matches!(report.outcome, ProductOutcome::Reused(HitSource::Local)));
    }
}

#[tokio::test]
async fn test_source_change_rebuilds_only_that_product() {
    let project = TestProject::new();
    let graph = three_products(&project);
    let compiler = FakeCompiler::new("swift 6.0");
    let runner = project.runner(compiler.clone(), project.cache(), prepare());

    run(&runner, &graph).await;
    project.write_source("Net", "// changed\n");
    let report = run(&runner, &graph).await;

    assert!(matches!(report.get("Core").unwrap().outcome, ProductOutcome::Reused(_)));
    assert!(matches!(report.get("Net").unwrap().outcome, ProductOutcome::Rebuilt));
    assert_eq!(compiler.calls_for("Core"), 1);
    assert_eq!(compiler.calls_for("Net"), 2);
}

#[tokio::test]
async fn test_toolchain_change_rebuilds_everything() {
    let project = TestProject::new();
    let graph = three_products(&project);
    let compiler = FakeCompiler::new("swift 6.0");
    let runner = project.runner(compiler.clone(), project.cache(), prepare());

    run(&runner, &graph).await;
    compiler.set_version("swift 6.1");
    let report = run(&runner, &graph).await;

    assert_eq!(report.rebuilt(), 2);
    let record =
        VersionRecord::load(&VersionRecord::path(&project.output(), graph.product("Core").unwrap()))
            .unwrap();
    assert_eq!(record.toolchain_version, "swift 6.1");
}

#[tokio::test]
async fn test_option_change_rebuilds_affected_products_only() {
    let project = TestProject::new();
    let graph = three_products(&project);
    let compiler = FakeCompiler::new("swift 6.0");

    run(&project.runner(compiler.clone(), project.cache(), prepare()), &graph).await;

    let mut settings = prepare();
    settings.overrides = BTreeMap::from([(
        "Net".to_string(),
        OptionsOverride::default().with_simulator(true),
    )]);
    let report = run(&project.runner(compiler.clone(), project.cache(), settings), &graph).await;

    assert!(matches!(report.get("Core").unwrap().outcome, ProductOutcome::Reused(_)));
    assert!(matches!(report.get("Net").unwrap().outcome, ProductOutcome::Rebuilt));
    assert_eq!(
        platform_dirs(&project.output().join("Net.xcframework")),
        vec!["ios-arm64", "ios-arm64_x86_64-simulator"]
    );
}

#[tokio::test]
async fn test_disabled_cache_always_rebuilds() {
    let project = TestProject::new();
    let graph = three_products(&project);
    let compiler = FakeCompiler::new("swift 6.0");
    let runner = project.runner(
        compiler.clone(),
        CacheSystem::new(project.output(), false),
        prepare(),
    );

    run(&runner, &graph).await;
    let report = run(&runner, &graph).await;

    assert_eq!(report.rebuilt(), 2);
    assert_eq!(compiler.calls(), 4);
    // Records are still written so a later cached run can reuse the bundles.
    assert!(VersionRecord::path(&project.output(), graph.product("Core").unwrap()).exists());
}

#[tokio::test]
async fn test_missing_bundle_with_valid_record_rebuilds() {
    let project = TestProject::new();
    let graph = three_products(&project);
    let compiler = FakeCompiler::new("swift 6.0");
    let runner = project.runner(compiler.clone(), project.cache(), prepare());

    run(&runner, &graph).await;
    let bundle = project.output().join("Core.xcframework");
    std::fs::remove_dir_all(&bundle).unwrap();
    std::fs::create_dir(&bundle).unwrap();

    let report = run(&runner, &graph).await;
    assert!(matches!(report.get("Core").unwrap().outcome, ProductOutcome::Rebuilt));
    assert!(matches!(report.get("Net").unwrap().outcome, ProductOutcome::Reused(_)));
    assert!(bundle.join("ios-arm64/Core.framework/Core").exists());
}

#[tokio::test]
async fn test_corrupt_record_rebuilds() {
    let project = TestProject::new();
    let graph = three_products(&project);
    let compiler = FakeCompiler::new("swift 6.0");
    let runner = project.runner(compiler.clone(), project.cache(), prepare());

    run(&runner, &graph).await;
    let record = VersionRecord::path(&project.output(), graph.product("Core").unwrap());
    std::fs::write(&record, "{ not json").unwrap();

    let report = run(&runner, &graph).await;
    assert!(matches!(report.get("Core").unwrap().outcome, ProductOutcome::Rebuilt));
    assert!(VersionRecord::load(&record).is_some());
}

#[tokio::test]
async fn test_storage_roles_are_respected() {
    let project = TestProject::new();
    let graph = three_products(&project);
    let shared = tempfile::TempDir::new().unwrap();
    let producer = CountingStorage::new(Arc::new(LocalDiskStorage::new(shared.path().join("a"))));
    let consumer = CountingStorage::new(Arc::new(LocalDiskStorage::new(shared.path().join("b"))));

    let cache = project
        .cache()
        .with_storage(producer.clone(), StorageRoles::PRODUCER)
        .unwrap()
        .with_storage(consumer.clone(), StorageRoles::CONSUMER)
        .unwrap();
    let report = run(
        &project.runner(FakeCompiler::new("swift 6.0"), cache, prepare()),
        &graph,
    )
    .await;

    assert_eq!(report.rebuilt(), 2);
    assert_eq!(producer.stores(), 2);
    assert_eq!(producer.fetches(), 0);
    assert_eq!(consumer.stores(), 0);
    assert_eq!(consumer.queries(), 2);
}

#[tokio::test]
async fn test_bundle_restored_from_shared_storage() {
    let shared = tempfile::TempDir::new().unwrap();

    // First machine builds and shares.
    let first = TestProject::new();
    let graph = three_products(&first);
    let cache = first
        .cache()
        .with_storage(Arc::new(LocalDiskStorage::new(shared.path())), StorageRoles::BOTH)
        .unwrap();
    run(&first.runner(FakeCompiler::new("swift 6.0"), cache, prepare()), &graph).await;

    // Second machine has identical sources and only consumes.
    let second = TestProject::new();
    let graph = three_products(&second);
    let compiler = FakeCompiler::new("swift 6.0");
    let storage = CountingStorage::new(Arc::new(LocalDiskStorage::new(shared.path())));
    let cache = second
        .cache()
        .with_storage(storage.clone(), StorageRoles::CONSUMER)
        .unwrap();
    let report = run(&second.runner(compiler.clone(), cache, prepare()), &graph).await;

    assert_eq!(compiler.calls(), 0);
    assert_eq!(storage.fetches(), 2);
    assert!(matches!(
        report.get("Core").unwrap().outcome,
        ProductOutcome::Reused(HitSource::Remote { .. })
    ));
    assert_eq!(
        snapshot(&second.output().join("Core.xcframework")),
        snapshot(&first.output().join("Core.xcframework"))
    );
    assert!(VersionRecord::path(&second.output(), graph.product("Core").unwrap()).exists());
}

#[tokio::test]
async fn test_override_restricts_platforms_of_one_product() {
    let project = TestProject::new();
    let graph = three_products(&project);
    let mut settings = prepare();
    settings.options = BuildOptions::default().with_platforms([Platform::Ios, Platform::MacOs]);
    settings.overrides = BTreeMap::from([(
        "Net".to_string(),
        OptionsOverride::default().with_platforms([Platform::Ios]),
    )]);

    run(
        &project.runner(FakeCompiler::new("swift 6.0"), project.cache(), settings),
        &graph,
    )
    .await;

    assert_eq!(
        platform_dirs(&project.output().join("Net.xcframework")),
        vec!["ios-arm64"]
    );
    assert_eq!(
        platform_dirs(&project.output().join("Core.xcframework")),
        vec!["ios-arm64", "macos-arm64_x86_64"]
    );
}

#[tokio::test]
async fn test_single_platform_without_simulator() {
    let project = TestProject::new();
    let graph = ProductGraph::new("lib", vec![project.library("lib", "Lib")]).unwrap();
    let compiler = FakeCompiler::new("swift 6.0");
    let mut settings = RunSettings::new(RunMode::CreatePackage { product: None });
    settings.options = BuildOptions::default()
        .with_platforms([Platform::Ios])
        .with_simulator(false);

    let report = run(&project.runner(compiler.clone(), project.cache(), settings), &graph).await;

    assert_eq!(report.rebuilt(), 1);
    assert_eq!(compiler.calls(), 1);
    let bundle = project.output().join("Lib.xcframework");
    assert_eq!(platform_dirs(&bundle), vec!["ios-arm64"]);
    assert!(!platform_dirs(&bundle).iter().any(|d| d.ends_with("-simulator")));
}

#[tokio::test]
async fn test_failure_is_isolated_to_the_product() {
    let project = TestProject::new();
    let graph = project.graph(vec![
        project.library("a", "A"),
        project.library("b", "B"),
        project.library("c", "C"),
    ]);
    let compiler = FakeCompiler::new("swift 6.0");
    compiler.fail("B");
    let mut settings = prepare();
    settings.jobs = 3;

    let report = run(&project.runner(compiler.clone(), project.cache(), settings), &graph).await;

    assert!(!report.is_success());
    assert_eq!(report.rebuilt(), 2);
    match &report.get("B").unwrap().outcome {
        ProductOutcome::Failed(ProductError::Compile(CompileError::Failed { exit, .. })) => {
            assert_eq!(exit.code, Some(65));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!project.output().join("B.xcframework").exists());
}

#[tokio::test]
async fn test_stop_on_first_error_skips_pending_products() {
    let project = TestProject::new();
    let graph = project.graph(vec![
        project.library("a", "A"),
        project.library("b", "B"),
        project.library("c", "C"),
    ]);
    let compiler = FakeCompiler::new("swift 6.0");
    for target in ["A", "B", "C"] {
        compiler.fail(target);
    }
    let mut settings = prepare();
    settings.jobs = 1;
    settings.stop_on_first_error = true;

    let report = run(&project.runner(compiler.clone(), project.cache(), settings), &graph).await;

    assert_eq!(report.failed(), 1);
    assert_eq!(report.skipped(), 2);
    assert_eq!(compiler.calls(), 1);
}

#[tokio::test]
async fn test_failed_rebuild_keeps_previous_bundle() {
    let project = TestProject::new();
    let graph = three_products(&project);
    let compiler = FakeCompiler::new("swift 6.0");
    let runner = project.runner(compiler.clone(), project.cache(), prepare());

    run(&runner, &graph).await;
    let bundle = project.output().join("Net.xcframework");
    let before = snapshot(&bundle);
    let record = VersionRecord::path(&project.output(), graph.product("Net").unwrap());
    let record_before = std::fs::read_to_string(&record).unwrap();

    project.write_source("Net", "// broken\n");
    compiler.fail("Net");
    let report = run(&runner, &graph).await;

    assert!(matches!(report.get("Net").unwrap().outcome, ProductOutcome::Failed(_)));
    assert_eq!(snapshot(&bundle), before);
    assert_eq!(std::fs::read_to_string(&record).unwrap(), record_before);

    compiler.heal("Net");
    let report = run(&runner, &graph).await;
    assert!(matches!(report.get("Net").unwrap().outcome, ProductOutcome::Rebuilt));
}

#[tokio::test]
async fn test_cancel_during_rebuild_keeps_previous_bundle() {
    let project = TestProject::new();
    let graph = project.graph(vec![project.library("net", "Net")]);
    let compiler = FakeCompiler::new("swift 6.0");
    let mut settings = prepare();
    settings.options = BuildOptions::default().with_simulator(true);
    let runner = project.runner(compiler.clone(), project.cache(), settings);

    run(&runner, &graph).await;
    let bundle = project.output().join("Net.xcframework");
    let before = snapshot(&bundle);
    let record = VersionRecord::path(&project.output(), graph.product("Net").unwrap());
    let record_before = std::fs::read_to_string(&record).unwrap();

    project.write_source("Net", "// changed\n");
    compiler.set_delay(Some(Duration::from_secs(30)));
    let cancel = CancellationToken::new();
    let (report, ()) = tokio::join!(runner.run(&graph, &cancel), async {
        compiler.wait_until_compiling().await;
        cancel.cancel();
    });
    let report = report.unwrap();

    assert!(matches!(
        report.get("Net").unwrap().outcome,
        ProductOutcome::Failed(ProductError::Cancelled)
    ));
    assert_eq!(snapshot(&bundle), before);
    assert_eq!(std::fs::read_to_string(&record).unwrap(), record_before);
    let staging_left = std::fs::read_dir(project.output())
        .unwrap()
        .filter_map(Result::ok)
        .any(|e| e.file_name().to_string_lossy().starts_with(".xcpack-staging-"));
    assert!(!staging_left);

    compiler.set_delay(None);
    let report = run(&runner, &graph).await;
    assert!(matches!(report.get("Net").unwrap().outcome, ProductOutcome::Rebuilt));
}

#[tokio::test]
async fn test_missing_resource_fails_without_publishing() {
    let project = TestProject::new();
    let product = project.library("kit", "Kit").with_resource("Resources/strings.json");
    let graph = project.graph(vec![product]);

    let report = run(
        &project.runner(FakeCompiler::new("swift 6.0"), project.cache(), prepare()),
        &graph,
    )
    .await;

    assert!(matches!(
        report.get("Kit").unwrap().outcome,
        ProductOutcome::Failed(ProductError::Assembly(AssemblyError::MissingResource { .. }))
    ));
    assert!(!project.output().join("Kit.xcframework").exists());
    assert!(!VersionRecord::path(&project.output(), graph.product("Kit").unwrap()).exists());
}

#[tokio::test]
async fn test_resources_embedded_in_every_platform() {
    let project = TestProject::new();
    project.create_file("Resources/strings.json", r#"{"hello": "world"}"#);
    let product = project.library("kit", "Kit").with_resource("Resources/strings.json");
    let graph = project.graph(vec![product]);
    let mut settings = prepare();
    settings.options = BuildOptions::default()
        .with_platforms([Platform::Ios, Platform::TvOs])
        .with_simulator(true);

    let report = run(
        &project.runner(FakeCompiler::new("swift 6.0"), project.cache(), settings),
        &graph,
    )
    .await;
    assert!(report.is_success());

    let bundle = project.output().join("Kit.xcframework");
    let dirs = platform_dirs(&bundle);
    assert_eq!(dirs.len(), 4);
    for dir in dirs {
        let resource = bundle
            .join(&dir)
            .join("Kit.framework/kit_Kit.bundle/strings.json");
        assert_eq!(
            std::fs::read_to_string(&resource).unwrap(),
            r#"{"hello": "world"}"#,
            "{dir} is missing the resource bundle"
        );
    }
}
