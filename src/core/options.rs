//! Build options and per-product overrides
//!
//! Options come in two layers: a global default and an optional per-product
//! override. Override fields take precedence field by field; anything the
//! override leaves unset falls back to the global value. The merge happens
//! once, in the platform matrix resolver, and the result is immutable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::core::platform::Platform;

/// Build configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildConfiguration {
    /// Unoptimized build
    Debug,
    /// Optimized build
    #[default]
    Release,
}

impl fmt::Display for BuildConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Release => write!(f, "release"),
        }
    }
}

/// Linkage of the produced frameworks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameworkType {
    /// Dynamically linked framework
    #[default]
    Dynamic,
    /// Statically linked framework
    Static,
}

impl fmt::Display for FrameworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dynamic => write!(f, "dynamic"),
            Self::Static => write!(f, "static"),
        }
    }
}

/// Extra flags passed through to the compiler untouched
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtraFlags {
    /// C compiler flags
    pub c: Vec<String>,
    /// C++ compiler flags
    pub cxx: Vec<String>,
    /// Swift compiler flags
    pub swift: Vec<String>,
    /// Linker flags
    pub linker: Vec<String>,
}

impl ExtraFlags {
    /// Whether no flags are set
    pub fn is_empty(&self) -> bool {
        self.c.is_empty() && self.cxx.is_empty() && self.swift.is_empty() && self.linker.is_empty()
    }
}

/// Fully specified build options
///
/// Used both as the global layer and as the resolved per-product result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildOptions {
    /// Debug or release
    pub configuration: BuildConfiguration,

    /// Target platforms
    pub platforms: BTreeSet<Platform>,

    /// Also build simulator slices where the platform has a simulator
    pub simulator: bool,

    /// Build with a stable binary interface
    pub library_evolution: bool,

    /// Framework linkage
    pub framework_type: FrameworkType,

    /// Embed debug symbols into the bundle
    pub debug_symbols: bool,

    /// Extra compiler and linker flags
    pub extra_flags: ExtraFlags,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            configuration: BuildConfiguration::Release,
            platforms: BTreeSet::from([Platform::Ios]),
            simulator: false,
            library_evolution: false,
            framework_type: FrameworkType::Dynamic,
            debug_symbols: false,
            extra_flags: ExtraFlags::default(),
        }
    }
}

impl BuildOptions {
    /// Set the platforms
    #[must_use]
    pub fn with_platforms(mut self, platforms: impl IntoIterator<Item = Platform>) -> Self {
        self.platforms = platforms.into_iter().collect();
        self
    }

    /// Set simulator support
    #[must_use]
    pub fn with_simulator(mut self, simulator: bool) -> Self {
        self.simulator = simulator;
        self
    }

    /// Set library evolution
    #[must_use]
    pub fn with_library_evolution(mut self, enabled: bool) -> Self {
        self.library_evolution = enabled;
        self
    }

    /// Set the build configuration
    #[must_use]
    pub fn with_configuration(mut self, configuration: BuildConfiguration) -> Self {
        self.configuration = configuration;
        self
    }

    /// Apply an override; set override fields win, unset ones inherit
    #[must_use]
    pub fn merged(&self, over: &OptionsOverride) -> Self {
        Self {
            configuration: over.configuration.unwrap_or(self.configuration),
            platforms: over
                .platforms
                .clone()
                .unwrap_or_else(|| self.platforms.clone()),
            simulator: over.simulator.unwrap_or(self.simulator),
            library_evolution: over.library_evolution.unwrap_or(self.library_evolution),
            framework_type: over.framework_type.unwrap_or(self.framework_type),
            debug_symbols: over.debug_symbols.unwrap_or(self.debug_symbols),
            extra_flags: over
                .extra_flags
                .clone()
                .unwrap_or_else(|| self.extra_flags.clone()),
        }
    }

    /// One-line summary for logs and version records
    pub fn summary(&self) -> String {
        let platforms: Vec<&str> = self.platforms.iter().map(Platform::as_str).collect();
        let mut parts = vec![
            self.configuration.to_string(),
            platforms.join("+"),
            self.framework_type.to_string(),
        ];
        if self.simulator {
            parts.push("simulator".to_string());
        }
        if self.library_evolution {
            parts.push("library-evolution".to_string());
        }
        if self.debug_symbols {
            parts.push("debug-symbols".to_string());
        }
        if !self.extra_flags.is_empty() {
            parts.push("extra-flags".to_string());
        }
        parts.join(", ")
    }
}

/// Per-product override; every field is optional
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptionsOverride {
    /// Debug or release
    pub configuration: Option<BuildConfiguration>,
    /// Target platforms
    pub platforms: Option<BTreeSet<Platform>>,
    /// Simulator support
    pub simulator: Option<bool>,
    /// Library evolution
    pub library_evolution: Option<bool>,
    /// Framework linkage
    pub framework_type: Option<FrameworkType>,
    /// Embed debug symbols
    pub debug_symbols: Option<bool>,
    /// Extra flags, replacing the global ones wholesale
    pub extra_flags: Option<ExtraFlags>,
}

impl OptionsOverride {
    /// Restrict platforms
    #[must_use]
    pub fn with_platforms(mut self, platforms: impl IntoIterator<Item = Platform>) -> Self {
        self.platforms = Some(platforms.into_iter().collect());
        self
    }

    /// Override simulator support
    #[must_use]
    pub fn with_simulator(mut self, simulator: bool) -> Self {
        self.simulator = Some(simulator);
        self
    }

    /// Override library evolution
    #[must_use]
    pub fn with_library_evolution(mut self, enabled: bool) -> Self {
        self.library_evolution = Some(enabled);
        self
    }
}
