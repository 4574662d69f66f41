//! Filesystem operations
//!
//! Handles file and directory operations.

use std::path::Path;

use crate::error::FilesystemError;

/// Create a directory and all parent directories
pub fn create_dir_all(path: &Path) -> Result<(), FilesystemError> {
    std::fs::create_dir_all(path).map_err(|e| FilesystemError::CreateDir {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Remove a directory and all its contents
pub fn remove_dir_all(path: &Path) -> Result<(), FilesystemError> {
    if path.exists() {
        std::fs::remove_dir_all(path).map_err(|e| FilesystemError::RemoveDir {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
    }
    Ok(())
}

/// Write content to a file
pub fn write_file(path: &Path, content: &str) -> Result<(), FilesystemError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    std::fs::write(path, content).map_err(|e| FilesystemError::WriteFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Write content to a file through a sibling temporary file and a rename
///
/// Readers see either the previous content or the new content, never a
/// truncated file.
pub fn write_file_atomic(path: &Path, content: &str) -> Result<(), FilesystemError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    create_dir_all(parent)?;

    let write_err = |e: std::io::Error| FilesystemError::WriteFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    std::io::Write::write_all(&mut temp, content.as_bytes()).map_err(write_err)?;
    temp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Read content from a file
pub fn read_file(path: &Path) -> Result<String, FilesystemError> {
    std::fs::read_to_string(path).map_err(|e| FilesystemError::ReadFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Rename a file or directory
pub fn rename(from: &Path, to: &Path) -> Result<(), FilesystemError> {
    std::fs::rename(from, to).map_err(|e| FilesystemError::Rename {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        error: e.to_string(),
    })
}

/// Recursively copy a directory tree
///
/// Symlinks are recreated as symlinks with the same target, so framework
/// layouts such as `Versions/Current` survive the copy. The destination is
/// created if needed; existing files are overwritten. Returns the number of
/// regular files copied.
pub fn copy_dir_all(from: &Path, to: &Path) -> Result<u64, FilesystemError> {
    let copy_err = |error: String| FilesystemError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        error,
    };

    create_dir_all(to)?;
    let mut copied = 0;

    for entry in walkdir::WalkDir::new(from).follow_links(false).min_depth(1) {
        let entry = entry.map_err(|e| copy_err(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| copy_err(e.to_string()))?;
        let target = to.join(relative);

        if let Some(parent) = target.parent() {
            create_dir_all(parent)?;
        }

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            copy_symlink(entry.path(), &target).map_err(|e| copy_err(e.to_string()))?;
        } else if file_type.is_dir() {
            create_dir_all(&target)?;
        } else {
            if target.is_symlink() {
                std::fs::remove_file(&target).map_err(|e| copy_err(e.to_string()))?;
            }
            std::fs::copy(entry.path(), &target).map_err(|e| copy_err(e.to_string()))?;
            copied += 1;
        }
    }

    Ok(copied)
}

fn copy_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    let destination = std::fs::read_link(link)?;
    if target.is_symlink() || target.is_file() {
        std::fs::remove_file(target)?;
    } else if target.is_dir() {
        std::fs::remove_dir_all(target)?;
    }

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(&destination, target)
    }
    #[cfg(not(unix))]
    {
        if link.is_dir() {
            std::os::windows::fs::symlink_dir(&destination, target)
        } else {
            std::os::windows::fs::symlink_file(&destination, target)
        }
    }
}

/// Copy a single file, creating the destination's parent directories
pub fn copy_file(from: &Path, to: &Path) -> Result<u64, FilesystemError> {
    if let Some(parent) = to.parent() {
        create_dir_all(parent)?;
    }
    std::fs::copy(from, to).map_err(|e| FilesystemError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        error: e.to_string(),
    })
}

/// Whether a directory exists and has at least one entry
pub fn is_non_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Calculate directory size recursively
pub fn dir_size(path: &Path) -> u64 {
    if !path.exists() {
        return 0;
    }

    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Format a byte count for display
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
