//! Filesystem fixtures.

use std::io;
use std::path::{Path, PathBuf};

use crate::core::Artifact;

/// Creates source files under a root directory, usually a temporary one.
#[derive(Debug, Clone)]
pub struct WorkspaceFixture {
    root: PathBuf,
}

impl WorkspaceFixture {
    /// Creates a fixture rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the absolute path of a relative one.
    #[must_use]
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Returns a file artifact for a relative path.
    #[must_use]
    pub fn file(&self, relative: &str) -> Artifact {
        Artifact::file(self.path(relative))
    }

    /// Writes a file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&self, relative: &str, contents: &str) -> io::Result<PathBuf> {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Reads a file, or `None` if it does not exist.
    #[must_use]
    pub fn read(&self, relative: &str) -> Option<String> {
        std::fs::read_to_string(self.path(relative)).ok()
    }

    /// Removes a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove(&self, relative: &str) -> io::Result<()> {
        match std::fs::remove_file(self.path(relative)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = WorkspaceFixture::new(dir.path());

        let path = fixture.write("src/a.c", "int a;").unwrap();
        assert!(path.starts_with(dir.path()));
        assert_eq!(fixture.read("src/a.c").as_deref(), Some("int a;"));

        fixture.remove("src/a.c").unwrap();
        fixture.remove("src/a.c").unwrap();
        assert!(fixture.read("src/a.c").is_none());
    }
}
