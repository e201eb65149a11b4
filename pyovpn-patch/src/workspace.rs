//! Per-run temporary workspace
//!
//! The workspace is released when it is dropped, so every exit path of the
//! pipeline (early returns included) removes it. In debug mode release keeps
//! the directory and logs where it is.

use crate::error::{PatchError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Temporary directory owned by one pipeline run
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
    retain: bool,
}

impl Workspace {
    /// Create a fresh empty directory in the system temp location
    pub fn acquire(prefix: &str, retain: bool) -> Result<Self> {
        Self::acquire_in(std::env::temp_dir(), prefix, retain)
    }

    /// Create a fresh empty directory beneath `parent`
    pub fn acquire_in(parent: impl AsRef<Path>, prefix: &str, retain: bool) -> Result<Self> {
        let parent = parent.as_ref();
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(parent)
            .map_err(PatchError::io("create a workspace in", parent))?;
        let path = dir.path().to_path_buf();
        log::debug!("Created temporary directory: {}", path.display());

        Ok(Self {
            dir: Some(dir),
            path,
            retain,
        })
    }

    /// Root of the workspace
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a path inside the workspace
    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path.join(relative)
    }

    /// Whether release will keep the directory
    pub fn is_retained(&self) -> bool {
        self.retain
    }

    /// Release now, returning the kept path in debug mode
    pub fn release(mut self) -> Option<PathBuf> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Option<PathBuf> {
        let dir = self.dir.take()?;

        if self.retain {
            let kept = dir.keep();
            log::info!("Left temporary directory for inspection: {}", kept.display());
            return Some(kept);
        }

        match dir.close() {
            Ok(()) => log::debug!("Cleaned up temporary directory: {}", self.path.display()),
            Err(e) => {
                log::warn!(
                    "Could not fully remove temporary directory {}: {e}",
                    self.path.display()
                );
                let left = remove_tree_best_effort(&self.path);
                if left > 0 {
                    log::warn!(
                        "{left} entries remain under {} after cleanup",
                        self.path.display()
                    );
                }
            }
        }
        None
    }
}

/// Remove everything under `root` that can be removed, children before parents
///
/// Failures are logged and skipped. Returns how many entries could not be
/// removed.
pub fn remove_tree_best_effort(root: &Path) -> usize {
    let mut failed = 0;
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::debug!("Skipping unreadable entry during cleanup: {e}");
                failed += 1;
                continue;
            }
        };
        let path = entry.path();
        let removed = if entry.file_type().is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        };
        if let Err(e) = removed {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::debug!("Could not remove {}: {e}", path.display());
                failed += 1;
            }
        }
    }
    failed
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_is_empty_and_release_removes() {
        let parent = TempDir::new().unwrap();
        let workspace = Workspace::acquire_in(parent.path(), "pyovpn_patch_", false).unwrap();
        let path = workspace.path().to_path_buf();

        assert!(path.is_dir());
        assert_eq!(fs::read_dir(&path).unwrap().count(), 0);
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("pyovpn_patch_")
        );

        fs::create_dir_all(workspace.join("extracted/pyovpn")).unwrap();
        fs::write(workspace.join("extracted/pyovpn/a.pyc"), b"x").unwrap();

        assert_eq!(workspace.release(), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_removes_on_early_exit() {
        let parent = TempDir::new().unwrap();
        let path = {
            let workspace = Workspace::acquire_in(parent.path(), "run_", false).unwrap();
            fs::write(workspace.join("copy.egg"), b"x").unwrap();
            workspace.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_retained_workspace_survives() {
        let parent = TempDir::new().unwrap();
        let workspace = Workspace::acquire_in(parent.path(), "debug_", true).unwrap();
        let path = workspace.path().to_path_buf();

        assert!(workspace.is_retained());
        assert_eq!(workspace.release(), Some(path.clone()));
        assert!(path.is_dir());
    }

    #[test]
    fn test_best_effort_removal_of_whole_tree() {
        let parent = TempDir::new().unwrap();
        let root = parent.path().join("leftover");
        fs::create_dir_all(root.join("extracted/pyovpn/lic")).unwrap();
        fs::write(root.join("copy.egg"), b"x").unwrap();
        fs::write(root.join("extracted/pyovpn/lic/uprop2.pyc"), b"y").unwrap();

        assert_eq!(remove_tree_best_effort(&root), 0);
        assert!(!root.exists());
        assert_eq!(remove_tree_best_effort(&root), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_best_effort_removal_continues_past_failures() {
        use std::os::unix::fs::PermissionsExt;

        let parent = TempDir::new().unwrap();
        let root = parent.path().join("leftover");
        let locked = root.join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("stuck.pyc"), b"x").unwrap();
        fs::create_dir_all(root.join("open")).unwrap();
        fs::write(root.join("open/gone.pyc"), b"y").unwrap();
        fs::write(root.join("copy.egg"), b"z").unwrap();

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();
        // Root ignores directory permissions, so nothing fails there
        let canary = locked.join("writable");
        let privileged = fs::write(&canary, b"").is_ok();
        let _ = fs::remove_file(&canary);

        let left = remove_tree_best_effort(&root);
        if locked.exists() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        }

        assert!(!root.join("copy.egg").exists());
        assert!(!root.join("open").exists());
        if !privileged {
            // stuck.pyc, locked/ and root itself
            assert_eq!(left, 3);
            assert!(locked.join("stuck.pyc").exists());
        }
    }
}
