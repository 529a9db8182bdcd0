//! Filesystem access behind a small trait so the scanner stays testable.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{GitotekoError, Result};

/// Filesystem operations used by the scanner and the actions.
pub trait FileSystem: Send + Sync + std::fmt::Debug {
    /// Ensure target directory exists (create recursively if needed).
    fn ensure_directory(&self, path: &Path) -> Result<()>;

    /// Return whether a path exists.
    fn path_exists(&self, path: &Path) -> bool;

    /// Yield recursive file paths under a directory root.
    ///
    /// Unreadable entries are skipped; an empty directory yields nothing.
    fn list_files_recursive(&self, path: &Path) -> Box<dyn Iterator<Item = PathBuf> + Send>;
}

/// `std::fs` + `walkdir` backed implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn ensure_directory(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)
            .map_err(|e| GitotekoError::io(path, format!("failed to create directory: {e}")))?;
        debug!(path = %path.display(), "directory ensured");
        Ok(())
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_files_recursive(&self, path: &Path) -> Box<dyn Iterator<Item = PathBuf> + Send> {
        let walker = WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path());
        Box::new(walker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_directory_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("a/b/c");
        let fs_adapter = LocalFileSystem;

        fs_adapter.ensure_directory(&target).unwrap();
        fs_adapter.ensure_directory(&target).unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn test_path_exists() {
        let tmp = TempDir::new().unwrap();
        let fs_adapter = LocalFileSystem;
        assert!(fs_adapter.path_exists(tmp.path()));
        assert!(!fs_adapter.path_exists(&tmp.path().join("missing")));
    }

    #[test]
    fn test_list_files_recursive_skips_directories() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("nested/deeper")).unwrap();
        fs::write(tmp.path().join("top.txt"), "x").unwrap();
        fs::write(tmp.path().join("nested/deeper/leaf.rs"), "y").unwrap();

        let fs_adapter = LocalFileSystem;
        let names: BTreeSet<String> = fs_adapter
            .list_files_recursive(tmp.path())
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, BTreeSet::from(["top.txt".to_string(), "leaf.rs".to_string()]));
    }

    #[test]
    fn test_list_files_recursive_empty_directory() {
        let tmp = TempDir::new().unwrap();
        let fs_adapter = LocalFileSystem;
        assert_eq!(fs_adapter.list_files_recursive(tmp.path()).count(), 0);
    }
}
