//! Scoped working directories removed on every exit path.

use std::path::{Path, PathBuf};

use crate::error::{HarnessError, Result};

/// A working directory owned for the duration of a run.
///
/// Leftovers from a crashed previous run are removed on acquire. The
/// directory is removed again on release or drop; failures there are logged
/// and otherwise ignored.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    released: bool,
}

impl ScratchDir {
    /// Creates a fresh, empty directory at `path`.
    ///
    /// A stale file or directory at `path` is removed first. Failing to remove
    /// it is logged and does not stop the run.
    ///
    /// # Errors
    ///
    /// - `HarnessError::FixtureIo` - If the directory cannot be created
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        remove_stale(&path);

        std::fs::create_dir_all(&path).map_err(|source| HarnessError::FixtureIo {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory now instead of on drop.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::debug!("Removed scratch directory {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove scratch directory {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Best-effort removal of whatever a crashed run left at `path`.
fn remove_stale(path: &Path) {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            tracing::warn!("Cannot inspect stale path {}: {}", path.display(), e);
            return;
        }
    };

    tracing::debug!("Removing stale scratch path {}", path.display());
    let removed = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    if let Err(e) = removed {
        tracing::warn!("Failed to remove stale path {}: {}", path.display(), e);
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_acquire_clears_stale_content() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("tmp1");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("leftover"), b"stale").unwrap();

        let scratch = ScratchDir::acquire(&path).unwrap();
        assert!(scratch.path().is_dir());
        assert!(!path.join("leftover").exists());
    }

    #[test]
    fn test_acquire_replaces_stale_file() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("tmp2");
        std::fs::write(&path, b"stale").unwrap();

        let scratch = ScratchDir::acquire(&path).unwrap();
        assert!(scratch.path().is_dir());
    }

    #[test]
    fn test_drop_removes_directory() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("tmp2");

        {
            let scratch = ScratchDir::acquire(&path).unwrap();
            std::fs::write(scratch.path().join("content"), b"data").unwrap();
        }

        assert!(!path.exists());
    }

    #[test]
    fn test_release_tolerates_missing_directory() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("tmp3");
        let scratch = ScratchDir::acquire(&path).unwrap();

        std::fs::remove_dir_all(&path).unwrap();
        scratch.release();

        assert!(!path.exists());
    }
}
