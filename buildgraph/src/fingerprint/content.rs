//! Content hashing of files and directory trees.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Hex SHA-256 of a path's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Returns the hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn hash_file_into(hasher: &mut Sha256, path: &Path) -> io::Result<()> {
    let mut file = File::open(path)?;
    io::copy(&mut file, hasher)?;
    Ok(())
}

/// Hashes the content of a file, or of every file under a directory.
///
/// Directory hashes cover sorted relative paths and file contents, so
/// modification times never matter. Returns `Ok(None)` if the path does not
/// exist.
///
/// # Errors
///
/// Returns an error if the path exists but cannot be read.
pub fn hash_path(path: &Path) -> io::Result<Option<ContentHash>> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut hasher = Sha256::new();
    if metadata.is_dir() {
        hasher.update(b"dir\0");
        for entry in WalkDir::new(path).sort_by_file_name().min_depth(1) {
            let entry = entry.map_err(io::Error::from)?;
            let relative = entry.path().strip_prefix(path).unwrap_or(entry.path());
            let relative = relative.to_string_lossy();
            hasher.update((relative.len() as u64).to_le_bytes());
            hasher.update(relative.as_bytes());
            if entry.file_type().is_file() {
                hasher.update(b"f");
                let mut file_hasher = Sha256::new();
                hash_file_into(&mut file_hasher, entry.path())?;
                hasher.update(file_hasher.finalize());
            } else {
                hasher.update(b"d");
            }
        }
    } else {
        hasher.update(b"file\0");
        hash_file_into(&mut hasher, path)?;
    }

    Ok(Some(ContentHash(hex::encode(hasher.finalize()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_missing_path_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(hash_path(&dir.path().join("absent")).unwrap(), None);
    }

    #[test]
    fn test_touch_does_not_change_hash() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.h");
        fs::write(&file, "int x;").unwrap();
        let before = hash_path(&file).unwrap();

        let handle = fs::File::options().write(true).open(&file).unwrap();
        handle
            .set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();

        assert_eq!(hash_path(&file).unwrap(), before);
    }

    #[test]
    fn test_content_change_changes_hash() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.h");
        fs::write(&file, "int x;").unwrap();
        let before = hash_path(&file).unwrap();
        fs::write(&file, "int y;").unwrap();
        assert_ne!(hash_path(&file).unwrap(), before);
    }

    #[test]
    fn test_directory_hash_covers_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("headers");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.h"), "a").unwrap();
        fs::write(root.join("sub/b.h"), "b").unwrap();
        let before = hash_path(&root).unwrap().unwrap();

        fs::write(root.join("sub/b.h"), "bb").unwrap();
        let after = hash_path(&root).unwrap().unwrap();
        assert_ne!(before, after);

        fs::write(root.join("sub/b.h"), "b").unwrap();
        assert_eq!(hash_path(&root).unwrap().unwrap(), before);
    }
}
