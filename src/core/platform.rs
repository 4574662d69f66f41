//! Target platforms and their capabilities
//!
//! The capability table is the only place that knows which SDKs and
//! architectures a platform builds for.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Target platform
///
/// Declaration order is the canonical build and bundle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    /// iOS and iPadOS
    #[serde(rename = "ios")]
    Ios,
    /// macOS
    #[serde(rename = "macos")]
    MacOs,
    /// iOS apps running on macOS
    #[serde(rename = "maccatalyst")]
    MacCatalyst,
    /// tvOS
    #[serde(rename = "tvos")]
    TvOs,
    /// watchOS
    #[serde(rename = "watchos")]
    WatchOs,
    /// visionOS
    #[serde(rename = "visionos")]
    VisionOs,
    /// DriverKit system extensions
    #[serde(rename = "driverkit")]
    DriverKit,
}

impl Platform {
    /// All platforms in canonical order
    pub const ALL: [Platform; 7] = [
        Platform::Ios,
        Platform::MacOs,
        Platform::MacCatalyst,
        Platform::TvOs,
        Platform::WatchOs,
        Platform::VisionOs,
        Platform::DriverKit,
    ];

    /// Identifier used in task ids and config files
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::MacOs => "macos",
            Self::MacCatalyst => "maccatalyst",
            Self::TvOs => "tvos",
            Self::WatchOs => "watchos",
            Self::VisionOs => "visionos",
            Self::DriverKit => "driverkit",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::ParseError {
                what: "platform".to_string(),
                error: format!("unknown platform '{s}'"),
            })
    }
}

/// SDK variant of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdkVariant {
    /// Physical device
    Device,
    /// Simulator
    Simulator,
}

/// A set of architectures built together against one SDK
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArchitectureSet {
    /// SDK name passed to the compiler
    pub sdk: String,
    /// Device or simulator
    pub variant: SdkVariant,
    /// Architectures, in table order
    pub architectures: Vec<String>,
}

impl ArchitectureSet {
    /// Create an architecture set
    pub fn new(sdk: &str, variant: SdkVariant, architectures: &[&str]) -> Self {
        Self {
            sdk: sdk.to_string(),
            variant,
            architectures: architectures.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    /// Architectures joined the way bundle library identifiers spell them
    pub fn joined(&self) -> String {
        self.architectures.join("_")
    }
}

/// What a platform can build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCapabilities {
    /// Device build
    pub device: ArchitectureSet,
    /// Simulator build, if the platform has a simulator
    pub simulator: Option<ArchitectureSet>,
    /// Whether library evolution (stable binary interface) is available
    pub supports_library_evolution: bool,
}

impl PlatformCapabilities {
    /// Whether the platform has a simulator
    pub fn supports_simulator(&self) -> bool {
        self.simulator.is_some()
    }
}

/// Static capability table mapping platform to capabilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityTable {
    entries: BTreeMap<Platform, PlatformCapabilities>,
}

impl CapabilityTable {
    /// Create an empty table
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Add or replace an entry
    #[must_use]
    pub fn with(mut self, platform: Platform, capabilities: PlatformCapabilities) -> Self {
        self.entries.insert(platform, capabilities);
        self
    }

    /// Look up a platform
    pub fn get(&self, platform: Platform) -> Result<&PlatformCapabilities, ConfigError> {
        self.entries
            .get(&platform)
            .ok_or_else(|| ConfigError::UnknownPlatform {
                platform: platform.to_string(),
            })
    }
}

impl Default for CapabilityTable {
    fn default() -> Self {
        use SdkVariant::{Device, Simulator};

        let caps = |device: ArchitectureSet, simulator: Option<ArchitectureSet>, evolution| {
            PlatformCapabilities {
                device,
                simulator,
                supports_library_evolution: evolution,
            }
        };

        Self::empty()
            .with(
                Platform::Ios,
                caps(
                    ArchitectureSet::new("iphoneos", Device, &["arm64"]),
                    Some(ArchitectureSet::new("iphonesimulator", Simulator, &["arm64", "x86_64"])),
                    true,
                ),
            )
            .with(
                Platform::MacOs,
                caps(
                    ArchitectureSet::new("macosx", Device, &["arm64", "x86_64"]),
                    None,
                    true,
                ),
            )
            .with(
                Platform::MacCatalyst,
                caps(
                    ArchitectureSet::new("macosx", Device, &["arm64", "x86_64"]),
                    None,
                    true,
                ),
            )
            .with(
                Platform::TvOs,
                caps(
                    ArchitectureSet::new("appletvos", Device, &["arm64"]),
                    Some(ArchitectureSet::new("appletvsimulator", Simulator, &["arm64", "x86_64"])),
                    true,
                ),
            )
            .with(
                Platform::WatchOs,
                caps(
                    ArchitectureSet::new("watchos", Device, &["arm64_32", "armv7k"]),
                    Some(ArchitectureSet::new("watchsimulator", Simulator, &["arm64", "x86_64"])),
                    true,
                ),
            )
            .with(
                Platform::VisionOs,
                caps(
                    ArchitectureSet::new("xros", Device, &["arm64"]),
                    Some(ArchitectureSet::new("xrsimulator", Simulator, &["arm64"])),
                    true,
                ),
            )
            .with(
                Platform::DriverKit,
                caps(
                    ArchitectureSet::new("driverkit", Device, &["arm64", "x86_64"]),
                    None,
                    false,
                ),
            )
    }
}
