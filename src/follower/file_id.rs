// SPDX-License-Identifier: Apache-2.0

//! File identity based on device and inode numbers.
//!
//! The identity remains stable across renames, so it is what lets us keep
//! reading a log file through a rename-style rotation, and what the
//! checkpoint uses to decide whether a persisted offset still applies.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::Path;

/// A unique identifier for a file on a single host.
///
/// Two paths with the same `FileId` are the same open file; a path whose
/// `FileId` changed was rotated (rename/recreate).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    /// Create a FileId from raw device and inode values.
    /// Used when loading persisted state.
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// Create a FileId from an open file handle.
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let metadata = file.metadata()?;
        Ok(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    /// Create a FileId from a path without keeping the file open.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let metadata = std::fs::metadata(path)?;
        Ok(Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    /// Device ID.
    pub fn dev(&self) -> u64 {
        self.dev
    }

    /// Inode number.
    pub fn ino(&self) -> u64 {
        self.ino
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_id_same_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();
        file.flush().unwrap();

        let id1 = FileId::from_path(file.path()).unwrap();
        let id2 = FileId::from_path(file.path()).unwrap();

        assert_eq!(id1, id2);
    }

    #[test]
    fn test_file_id_different_files() {
        let mut file1 = NamedTempFile::new().unwrap();
        let mut file2 = NamedTempFile::new().unwrap();

        file1.write_all(b"content 1").unwrap();
        file2.write_all(b"content 2").unwrap();
        file1.flush().unwrap();
        file2.flush().unwrap();

        let id1 = FileId::from_path(file1.path()).unwrap();
        let id2 = FileId::from_path(file2.path()).unwrap();

        assert_ne!(id1, id2);
    }

    #[test]
    fn test_file_id_matches_open_handle() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();
        file.flush().unwrap();

        let f = file.reopen().unwrap();
        let from_handle = FileId::from_file(&f).unwrap();
        let from_path = FileId::from_path(file.path()).unwrap();

        assert_eq!(from_handle, from_path);
    }

    #[test]
    fn test_file_id_stable_across_append() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();
        file.flush().unwrap();

        let path = file.path().to_path_buf();
        let id1 = FileId::from_path(&path).unwrap();

        {
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .unwrap();
            f.write_all(b" more content").unwrap();
            f.flush().unwrap();
        }

        let id2 = FileId::from_path(&path).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_file_id_display() {
        let id = FileId { dev: 123, ino: 456 };
        assert_eq!(format!("{}", id), "123:456");
    }

    #[test]
    fn test_file_id_serde() {
        let id = FileId::new(17, 42);
        let json = serde_json::to_string(&id).unwrap();
        let id2: FileId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, id2);
    }
}
