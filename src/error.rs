//! Error types for xcpack
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
///
/// Always fatal, and always reported before any compiler is invoked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No platforms left after merging options
    #[error("No target platforms configured for '{product}'")]
    NoPlatforms { product: String },

    /// Platform cannot honour a requested capability
    #[error("Platform '{platform}' does not support {capability} (requested for '{product}')")]
    UnsupportedCapability {
        product: String,
        platform: String,
        capability: String,
    },

    /// Platform missing from the capability table
    #[error("Platform '{platform}' is not in the capability table")]
    UnknownPlatform { platform: String },

    /// Override for a product that is not part of the graph
    #[error("Override given for unknown product '{product}'")]
    UnknownOverride { product: String },

    /// Target name used by more than one product
    #[error("Product target '{target}' is declared more than once")]
    DuplicateProduct { target: String },

    /// Dependency on a target that is not in the graph
    #[error("Missing dependency: '{dependency}' required by '{product}'")]
    MissingDependency { product: String, dependency: String },

    /// Circular dependency detected
    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    /// Named product not found in the requested scope
    #[error("Product '{product}' not found in package '{package}'")]
    ProductNotFound { package: String, product: String },

    /// Storage entry with neither role
    #[error("Cache storage '{name}' is neither producer nor consumer")]
    StorageWithoutRole { name: String },

    /// Parse error
    #[error("Failed to parse {what}: {error}")]
    ParseError { what: String, error: String },
}

/// Cache storage errors
///
/// Never abort a run: fetch failures degrade to a miss, store failures are logged.
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },

    /// Network error
    #[error("Network error for '{url}': {error}")]
    NetworkError { url: String, error: String },

    /// Unexpected HTTP status
    #[error("Unexpected HTTP status {status} for '{url}'")]
    HttpStatus { url: String, status: u16 },

    /// Archive error
    #[error("Archive error for '{key}': {error}")]
    ArchiveError { key: String, error: String },
}

/// Exit information of an external process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, absent when the process was killed by a signal
    pub code: Option<i32>,
    /// Captured output log
    pub log: Option<PathBuf>,
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit status {code}")?,
            None => write!(f, "terminated by signal")?,
        }
        if let Some(log) = &self.log {
            write!(f, " (log: {})", log.display())?;
        }
        Ok(())
    }
}

/// Compiler invocation errors
#[derive(Error, Debug)]
pub enum CompileError {
    /// Compiler process could not be started
    #[error("Failed to start '{program}': {error}")]
    Spawn { program: String, error: String },

    /// Compiler exited unsuccessfully
    #[error("Compiler failed for '{task}': {exit}")]
    Failed { task: String, exit: ExitInfo },

    /// Compiler succeeded but produced nothing where expected
    #[error("Compiler reported success for '{task}' but '{path}' does not exist")]
    MissingArtifact { task: String, path: PathBuf },

    /// Toolchain version could not be determined
    #[error("Failed to query toolchain version: {error}")]
    Version { error: String },

    /// IO error while preparing the workspace
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },

    /// Invocation was cancelled
    #[error("Compilation cancelled")]
    Cancelled,
}

/// Bundle assembly errors
///
/// Fatal for the product. No partial bundle is ever published.
#[derive(Error, Debug)]
pub enum AssemblyError {
    /// Resource disappeared after compilation
    #[error("Resource '{path}' for '{product}' is missing")]
    MissingResource { product: String, path: PathBuf },

    /// Module map could not be normalized
    #[error("Invalid module map '{path}': {error}")]
    ModuleMap { path: PathBuf, error: String },

    /// External merge tool failed
    #[error("Merge tool '{program}' failed: {exit}")]
    MergeFailed { program: String, exit: ExitInfo },

    /// Merge tool could not be started
    #[error("Failed to start merge tool '{program}': {error}")]
    MergeSpawn { program: String, error: String },

    /// Nothing to merge
    #[error("No platform artifacts to merge for '{product}'")]
    NoArtifacts { product: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },

    /// Assembly was cancelled
    #[error("Assembly cancelled")]
    Cancelled,
}

/// Filesystem errors
#[derive(Error, Debug)]
pub enum FilesystemError {
    /// Failed to create directory
    #[error("Failed to create directory '{path}': {error}")]
    CreateDir { path: PathBuf, error: String },

    /// Failed to remove directory
    #[error("Failed to remove directory '{path}': {error}")]
    RemoveDir { path: PathBuf, error: String },

    /// Failed to write file
    #[error("Failed to write file '{path}': {error}")]
    WriteFile { path: PathBuf, error: String },

    /// Failed to read file
    #[error("Failed to read file '{path}': {error}")]
    ReadFile { path: PathBuf, error: String },

    /// Failed to copy
    #[error("Failed to copy '{from}' to '{to}': {error}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        error: String,
    },

    /// Failed to rename
    #[error("Failed to move '{from}' to '{to}': {error}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        error: String,
    },
}

impl From<FilesystemError> for AssemblyError {
    fn from(e: FilesystemError) -> Self {
        let path = match &e {
            FilesystemError::CreateDir { path, .. }
            | FilesystemError::RemoveDir { path, .. }
            | FilesystemError::WriteFile { path, .. }
            | FilesystemError::ReadFile { path, .. } => path.clone(),
            FilesystemError::Copy { to, .. } | FilesystemError::Rename { to, .. } => to.clone(),
        };
        AssemblyError::IoError {
            path,
            error: e.to_string(),
        }
    }
}

/// Per-product build failure
#[derive(Error, Debug)]
pub enum ProductError {
    /// Compiler failure
    #[error("{0}")]
    Compile(#[from] CompileError),

    /// Assembly failure
    #[error("{0}")]
    Assembly(#[from] AssemblyError),

    /// Fingerprint could not be computed
    #[error("Failed to fingerprint sources: {0}")]
    Fingerprint(#[from] FilesystemError),

    /// Version record could not be written after publish
    #[error("Failed to write version record: {0}")]
    VersionRecord(String),

    /// Run was cancelled before the product finished
    #[error("Cancelled")]
    Cancelled,

    /// Build task panicked
    #[error("Build task panicked: {0}")]
    Panicked(String),
}

/// Top-level xcpack error type
#[derive(Error, Debug)]
pub enum XcpackError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Toolchain error
    #[error("Toolchain error: {0}")]
    Toolchain(#[from] CompileError),

    /// Filesystem error
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),

    /// Config file not found
    #[error("Config file not found at '{path}'. Create an xcpack.toml first.")]
    ConfigNotFound { path: String },

    /// Generic error
    #[error("{0}")]
    Generic(String),
}
