//! Platform-specific directory management
//!
//! Provides the default location of the local artifact storage.
//! Follows XDG Base Directory Specification on Linux and standard locations on macOS.
//!
//! Environment variables can override default directories:
//! - `XCPACK_CACHE_DIR` - Override cache directory

use std::env;
use std::path::PathBuf;

/// Environment variable name for the cache directory override
pub const ENV_CACHE_DIR: &str = "XCPACK_CACHE_DIR";

/// Application name used in directory paths
const APP_NAME: &str = "xcpack";

/// Subdirectory holding shared bundles
const ARTIFACTS_SUBDIR: &str = "artifacts";

/// Platform-specific directory provider for xcpack
#[derive(Debug, Clone)]
pub struct XcpackDirs {
    cache_dir: PathBuf,
}

impl XcpackDirs {
    /// Create a new `XcpackDirs` instance
    ///
    /// Checks environment variables first, then falls back to platform defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache_dir: Self::resolve_cache_dir(),
        }
    }

    /// Get the cache directory path
    ///
    /// - Linux: `$XDG_CACHE_HOME/xcpack` or `~/.cache/xcpack`
    /// - macOS: `~/Library/Caches/xcpack`
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone()
    }

    /// Get the default local storage directory
    ///
    /// Bundles shared between projects on this machine live here.
    #[must_use]
    pub fn artifacts_dir(&self) -> PathBuf {
        self.cache_dir.join(ARTIFACTS_SUBDIR)
    }

    fn resolve_cache_dir() -> PathBuf {
        if let Ok(path) = env::var(ENV_CACHE_DIR) {
            return PathBuf::from(path);
        }

        Self::platform_cache_dir()
    }

    fn platform_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .map(|p| p.join(APP_NAME))
            .unwrap_or_else(|| {
                // Fallback to home directory
                dirs::home_dir()
                    .map(|h| h.join(".cache").join(APP_NAME))
                    .unwrap_or_else(|| PathBuf::from(".").join(".cache").join(APP_NAME))
            })
    }
}

impl Default for XcpackDirs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_new_creates_instance() {
        let dirs = XcpackDirs::new();
        assert!(!dirs.cache_dir().as_os_str().is_empty());
    }

    #[test]
    fn test_artifacts_dir_is_under_cache_dir() {
        let dirs = XcpackDirs::new();
        assert!(dirs.artifacts_dir().starts_with(dirs.cache_dir()));
        assert!(dirs.artifacts_dir().ends_with("artifacts"));
    }
}
