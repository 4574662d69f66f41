//! Default configuration values

/// Project configuration file name
pub const CONFIG_FILE: &str = "xcpack.toml";

/// Resolved graph file name
pub const GRAPH_FILE: &str = "xcpack-graph.json";

/// Default output directory (relative to the project)
pub const DEFAULT_OUTPUT_DIR: &str = "XCFrameworks";

/// Default intermediate build directory (relative to the project)
pub const DEFAULT_BUILD_DIR: &str = ".xcpack/build";

/// Bundle directory extension
pub const BUNDLE_EXTENSION: &str = "xcframework";

/// Per-platform framework extension
pub const FRAMEWORK_EXTENSION: &str = "framework";

/// Resource sub-bundle extension
pub const RESOURCE_BUNDLE_EXTENSION: &str = "bundle";

/// Version record format written by this build of xcpack
pub const VERSION_RECORD_FORMAT: u32 = 1;

/// Prefix of staging directories inside the output root
pub const STAGING_PREFIX: &str = ".xcpack-staging-";

/// Lock file held by the run that owns a staging directory
pub const STAGING_LOCK: &str = ".owner.lock";

/// Age below which an unlocked staging directory is assumed to be starting up
pub const STAGING_GRACE_SECS: u64 = 60;

/// Default compiler program
pub const DEFAULT_COMPILER: &str = "xcpack-compile";

/// Default merge tool
pub const DEFAULT_MERGE_TOOL: &str = "xcodebuild";

/// Directories skipped when fingerprinting source trees
pub const FINGERPRINT_IGNORED_DIRS: &[&str] = &[".build", ".git", ".swiftpm", "DerivedData"];
