//! Project configuration (xcpack.toml) parsing
//!
//! The project file carries the global build options, per-product overrides,
//! the cache storages with their roles, run settings and the toolchain.
//! String values support environment variable substitution using `${VAR}`
//! syntax, which keeps remote cache URLs and credentials out of the file.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::defaults;
use crate::core::cache::CacheSystem;
use crate::core::options::{BuildOptions, OptionsOverride};
use crate::error::{ConfigError, XcpackError};
use crate::infra::compiler::ProcessCompiler;
use crate::infra::dirs::XcpackDirs;
use crate::infra::merger::{ArtifactMerger, DirectoryMerger, XcodebuildMerger};
use crate::infra::storage::{CacheStorage, HttpStorage, LocalDiskStorage, StorageRoles};

/// The project file (xcpack.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Global build options
    #[serde(default)]
    pub options: BuildOptions,

    /// Per-product overrides keyed by target name
    #[serde(default)]
    pub overrides: BTreeMap<String, OptionsOverride>,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Run settings
    #[serde(default)]
    pub run: RunConfig,

    /// Toolchain
    #[serde(default)]
    pub toolchain: ToolchainConfig,
}

/// `[cache]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Reuse bundles at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Storages, consulted in declaration order
    #[serde(default)]
    pub storages: Vec<StorageConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storages: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// One `[[cache.storages]]` entry
///
/// Unknown keys are rejected by `check_storage_keys` before deserializing,
/// since the flattened backend cannot deny them itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Backend
    #[serde(flatten)]
    pub backend: StorageBackend,

    /// Receives freshly built bundles
    #[serde(default = "default_true")]
    pub producer: bool,

    /// Is asked for bundles before building
    #[serde(default = "default_true")]
    pub consumer: bool,
}

impl StorageConfig {
    /// Roles of this storage
    pub fn roles(&self) -> StorageRoles {
        StorageRoles {
            producer: self.producer,
            consumer: self.consumer,
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageBackend {
    /// Directory on this machine; the user cache directory when unset
    Local {
        /// Storage root
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// Remote HTTP blob server
    Http {
        /// Base URL
        url: String,
    },
}

/// `[run]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Products built concurrently; number of CPUs when unset
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Skip products not yet started once one fails
    #[serde(default)]
    pub stop_on_first_error: bool,

    /// Output directory, relative to the project
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// Intermediate build directory, relative to the project
    #[serde(default)]
    pub build_dir: Option<PathBuf>,
}

/// Merge tool selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MergerKind {
    /// `xcodebuild` when it is installed, the directory merger otherwise
    #[default]
    Auto,
    /// Always `xcodebuild -create-xcframework`
    Xcodebuild,
    /// Always the directory merger
    Directory,
}

/// `[toolchain]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ToolchainConfig {
    /// Compiler program
    #[serde(default)]
    pub compiler: Option<String>,

    /// Arguments placed before every compiler invocation
    #[serde(default)]
    pub args: Vec<String>,

    /// The toolchain allows only one build at a time
    #[serde(default)]
    pub exclusive: bool,

    /// Merge tool
    #[serde(default)]
    pub merger: MergerKind,
}

/// Keys every storage entry accepts
const STORAGE_KEYS: &[&str] = &["kind", "producer", "consumer"];

/// Reject unknown keys in `[[cache.storages]]` entries
fn check_storage_keys(value: &toml::Value) -> Result<(), ConfigError> {
    let Some(storages) = value
        .get("cache")
        .and_then(|cache| cache.get("storages"))
        .and_then(toml::Value::as_array)
    else {
        return Ok(());
    };

    for (index, entry) in storages.iter().enumerate() {
        let Some(table) = entry.as_table() else {
            continue;
        };
        let kind = table.get("kind").and_then(toml::Value::as_str);
        let backend_keys: &[&str] = match kind {
            Some("local") => &["path"],
            Some("http") => &["url"],
            _ => &[],
        };

        let known = |key: &str| STORAGE_KEYS.contains(&key) || backend_keys.contains(&key);
        if let Some(key) = table.keys().find(|key| !known(key.as_str())) {
            return Err(ConfigError::ParseError {
                what: defaults::CONFIG_FILE.to_string(),
                error: format!(
                    "unknown field `{key}` in cache storage #{} ({})",
                    index + 1,
                    kind.unwrap_or("no kind")
                ),
            });
        }
    }
    Ok(())
}

/// Substitute `${VAR}` patterns with environment variable values
///
/// Unset variables expand to an empty string.
pub fn substitute_env_vars(input: &str) -> String {
    let Ok(re) = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}") else {
        return input.to_string();
    };
    re.replace_all(input, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

fn substitute_in_value(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => *s = substitute_env_vars(s),
        toml::Value::Array(items) => items.iter_mut().for_each(substitute_in_value),
        toml::Value::Table(table) => table
            .iter_mut()
            .for_each(|(_, v)| substitute_in_value(v)),
        _ => {}
    }
}

impl Manifest {
    /// Load the project file, substituting environment variables
    pub fn load(path: &Path) -> Result<Self, XcpackError> {
        if !path.exists() {
            return Err(XcpackError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            what: path.display().to_string(),
            error: e.to_string(),
        })?;
        Ok(Self::from_toml(&content)?)
    }

    /// Parse from TOML, substituting environment variables
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let parse_err = |e: toml::de::Error| ConfigError::ParseError {
            what: defaults::CONFIG_FILE.to_string(),
            error: e.to_string(),
        };

        let mut value: toml::Value = toml::from_str(content).map_err(parse_err)?;
        check_storage_keys(&value)?;
        substitute_in_value(&mut value);
        Self::deserialize(value).map_err(parse_err)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Products built concurrently
    pub fn jobs(&self) -> usize {
        self.run.jobs.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Output directory under `project_dir`
    pub fn output_dir(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(
            self.run
                .output
                .as_deref()
                .unwrap_or_else(|| Path::new(defaults::DEFAULT_OUTPUT_DIR)),
        )
    }

    /// Intermediate build directory under `project_dir`
    pub fn build_dir(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(
            self.run
                .build_dir
                .as_deref()
                .unwrap_or_else(|| Path::new(defaults::DEFAULT_BUILD_DIR)),
        )
    }

    /// Compiler described by `[toolchain]`
    pub fn compiler(&self) -> ProcessCompiler {
        let program = self
            .toolchain
            .compiler
            .as_deref()
            .unwrap_or(defaults::DEFAULT_COMPILER);
        ProcessCompiler::new(program)
            .with_base_args(self.toolchain.args.clone())
            .exclusive(self.toolchain.exclusive)
    }

    /// Merge tool described by `[toolchain]`
    pub fn merger(&self) -> Arc<dyn ArtifactMerger> {
        match self.toolchain.merger {
            MergerKind::Xcodebuild => Arc::new(XcodebuildMerger::default()),
            MergerKind::Directory => Arc::new(DirectoryMerger),
            MergerKind::Auto => {
                let xcodebuild = XcodebuildMerger::default();
                if xcodebuild.is_available() {
                    Arc::new(xcodebuild)
                } else {
                    tracing::debug!("xcodebuild not found, using the directory merger");
                    Arc::new(DirectoryMerger)
                }
            }
        }
    }

    /// Cache system for `output_dir` with the configured storages
    ///
    /// `force_disabled` turns caching off regardless of the file.
    pub fn cache_system(
        &self,
        output_dir: &Path,
        project_dir: &Path,
        dirs: &XcpackDirs,
        force_disabled: bool,
    ) -> Result<CacheSystem, ConfigError> {
        let mut cache = CacheSystem::new(output_dir, self.cache.enabled && !force_disabled);

        for entry in &self.cache.storages {
            let storage: Arc<dyn CacheStorage> = match &entry.backend {
                StorageBackend::Local { path: Some(path) } => {
                    Arc::new(LocalDiskStorage::new(project_dir.join(path)))
                }
                StorageBackend::Local { path: None } => {
                    Arc::new(LocalDiskStorage::new(dirs.artifacts_dir()))
                }
                StorageBackend::Http { url } => Arc::new(HttpStorage::new(url.clone())),
            };
            cache = cache.with_storage(storage, entry.roles())?;
        }

        Ok(cache)
    }
}
