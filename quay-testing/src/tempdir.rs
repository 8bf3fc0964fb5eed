//! Scratch directories for log-backed tests.

use std::path::Path;

use quay_storage::topic_log_path;
use tempfile::TempDir;

/// A temporary directory for a test's topic logs, removed on drop.
pub struct TempLogDir {
    dir: TempDir,
}

impl TempLogDir {
    /// Create a fresh scratch directory.
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to create a temporary directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    /// The directory's path, suitable for [`quay_storage::Log::open`].
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of `topic`'s log file within this directory.
    #[must_use]
    pub fn log_path(&self, topic: &str) -> std::path::PathBuf {
        topic_log_path(self.dir.path(), topic)
    }
}

impl Default for TempLogDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_path_is_inside_dir() {
        let scratch = TempLogDir::new();
        assert!(scratch.log_path("orders").starts_with(scratch.path()));
    }
}
