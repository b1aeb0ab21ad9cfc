//! File-backed checkpoint store with atomic writes.
//!
//! Writes go to a sibling temp file which is then renamed over the target, so
//! concurrent readers see either the old record or the new one, never a torn
//! write. The record itself is a small flat JSON object with integer fields;
//! unknown fields are ignored on load so newer writers stay readable.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{Checkpoint, Error, Result};
use crate::follower::FileId;

/// On-disk schema. Kept flat (dev/ino as separate fields) so the record stays
/// trivially inspectable and extensible with optional fields.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    version: u64,
    file_dev: u64,
    file_ino: u64,
    generation: u64,
    committed_offset: u64,
}

impl From<&Checkpoint> for CheckpointRecord {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            version: cp.version,
            file_dev: cp.file_id.dev(),
            file_ino: cp.file_id.ino(),
            generation: cp.generation,
            committed_offset: cp.committed_offset,
        }
    }
}

impl From<CheckpointRecord> for Checkpoint {
    fn from(rec: CheckpointRecord) -> Self {
        Self {
            version: rec.version,
            file_id: FileId::new(rec.file_dev, rec.file_ino),
            generation: rec.generation,
            committed_offset: rec.committed_offset,
        }
    }
}

/// Persists and loads [`Checkpoint`] records at a fixed filesystem path.
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checkpoint. Returns `Ok(None)` if no checkpoint exists yet.
    ///
    /// An existing-but-empty file and a record with missing or non-integer
    /// fields are errors: the operator decides what to do with a damaged
    /// checkpoint, we never silently overwrite one.
    pub fn load(&self) -> Result<Option<Checkpoint>> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        if bytes.is_empty() {
            return Err(Error::EmptyFile(self.path.clone()));
        }

        let record: CheckpointRecord = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Parse(format!("{}: {}", self.path.display(), e)))?;

        Ok(Some(record.into()))
    }

    /// Atomically persist the checkpoint.
    ///
    /// Writes the serialized record to `<path>.tmp`, flushes, then renames
    /// over the target. If the rename fails because the target exists on a
    /// platform that forbids cross-name replacement, the target is removed
    /// and the rename retried exactly once. The parent directory is created
    /// if missing.
    pub fn save(&self, cp: &Checkpoint) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = tmp_path(&self.path);
        let record = CheckpointRecord::from(cp);

        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, &record).map_err(io::Error::from)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }

        if fs::rename(&tmp, &self.path).is_err() {
            let _ = fs::remove_file(&self.path);
            fs::rename(&tmp, &self.path)?;
        }

        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}
