// SPDX-License-Identifier: Apache-2.0

//! Rotation- and truncation-aware follower for a single log file path.
//!
//! The follower owns the open descriptor and tracks where the bytes it emits
//! sit inside the current `(file_id, generation)`. Rotation by rename or
//! recreate is detected by comparing the path's identity against the open
//! descriptor; in-place truncation (including copytruncate) is detected by
//! the file shrinking below an offset we already produced or committed.
//!
//! All recoverable filesystem faults are reported through [`PollResult`]
//! flags rather than errors; the flags are independent booleans because real
//! filesystem events compose.

mod file_id;

pub use file_id::FileId;

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;

use crate::checkpoint::Checkpoint;

/// Follower tuning. `poll_interval` is the cadence the caller is expected to
/// drive [`FileFollower::poll`] at; the follower itself never sleeps.
#[derive(Debug, Clone)]
pub struct FollowerConfig {
    /// Suggested cadence for calling `poll`.
    pub poll_interval: Duration,
    /// Minimum time the old file must sit at EOF with no growth before we
    /// switch to a pending rotated file.
    pub rotate_settle_time: Duration,
    /// Upper bound on a single read.
    pub max_read_bytes: usize,
}

impl Default for FollowerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            rotate_settle_time: Duration::from_millis(500),
            max_read_bytes: 64 * 1024,
        }
    }
}

/// A contiguous run of bytes from one `(file_id, generation)`.
///
/// An empty `data` signals EOF (or a retryable interruption) so the caller
/// can observe it without special casing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadChunk {
    pub data: Bytes,
    /// Offset of the first byte within the current generation.
    pub start_offset: u64,
    pub file_id: FileId,
    pub generation: u64,
}

impl ReadChunk {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Outcome of one `poll` call. Flags are independent: a single poll can
/// observe, say, both `truncated` and `path_missing`.
#[derive(Debug, Default, Clone)]
pub struct PollResult {
    /// The path does not exist right now.
    pub path_missing: bool,
    /// A file was opened during this poll.
    pub file_opened: bool,
    /// The path's inode changed (rotation by rename/recreate observed).
    pub rotated: bool,
    /// The open file shrank (copytruncate or manual truncate).
    pub truncated: bool,
    /// We switched from the old inode to the one now at the path.
    pub switched: bool,
    /// We closed the active descriptor (e.g. deleted and drained).
    pub closed: bool,
    /// A non-recoverable fault was encountered.
    pub error: bool,
    /// Human-readable detail for logs.
    pub message: Option<String>,
    /// Identity seen at the path when `rotated` is set.
    pub new_path_id: Option<FileId>,
}

/// Follows a single path, surviving rotation and truncation.
pub struct FileFollower {
    path: PathBuf,
    config: FollowerConfig,

    file: Option<File>,
    active_id: FileId,
    generation: u64,
    /// Next byte to read == bytes already produced since the last open or
    /// truncation.
    read_offset: u64,

    rotation_pending: bool,
    pending_id: FileId,

    last_read_was_eof: bool,
    last_eof_time: Option<Instant>,
}

impl FileFollower {
    pub fn new(path: impl Into<PathBuf>, config: FollowerConfig) -> Self {
        Self {
            path: path.into(),
            config,
            file: None,
            active_id: FileId::default(),
            generation: 0,
            read_offset: 0,
            rotation_pending: false,
            pending_id: FileId::default(),
            last_read_was_eof: false,
            last_eof_time: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }

    pub fn active_id(&self) -> FileId {
        self.active_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    /// Try to re-adopt a persisted position.
    ///
    /// Opens the path and, when its identity matches the checkpoint and its
    /// size covers `committed_offset`, seeks there and restores the
    /// generation counter. Returns `Ok(false)` when the file is missing, has
    /// a different identity, or is shorter than the committed offset; the
    /// caller then starts a fresh generation via the next `poll`.
    pub fn resume_from(&mut self, cp: &Checkpoint) -> io::Result<bool> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        let metadata = file.metadata()?;
        let id = FileId::from_file(&file)?;
        if id != cp.file_id || metadata.len() < cp.committed_offset {
            return Ok(false);
        }

        file.seek(SeekFrom::Start(cp.committed_offset))?;

        self.file = Some(file);
        self.active_id = id;
        self.generation = cp.generation;
        self.read_offset = cp.committed_offset;
        self.rotation_pending = false;
        self.last_read_was_eof = false;
        self.last_eof_time = None;

        debug!(
            file_id = %id,
            generation = cp.generation,
            offset = cp.committed_offset,
            "resumed from checkpoint"
        );
        Ok(true)
    }

    /// Observe the path and the open descriptor once.
    ///
    /// Runs the ordered checks: open if closed, truncation, rotation
    /// detection, rotation completion. `committed_offset` lets the follower
    /// catch a truncation that cut below the durable offset even when the
    /// local read offset was further behind.
    pub fn poll(&mut self, committed_offset: u64) -> PollResult {
        let mut out = PollResult::default();

        if self.file.is_none() {
            self.open_at_path(&mut out);
            return out;
        }

        // Truncate / copytruncate: same inode, content shrank below what we
        // already produced or committed. New generation, restart at zero.
        match self.active_size() {
            Ok(size) => {
                if size < self.read_offset || (committed_offset > 0 && size < committed_offset) {
                    self.generation += 1;
                    self.read_offset = 0;
                    if let Err(e) = self.seek_to_start() {
                        out.error = true;
                        out.message = Some(format!("seek after truncate failed: {}", e));
                    } else {
                        out.message =
                            Some("truncate detected (copytruncate or manual truncate)".to_string());
                    }
                    out.truncated = true;
                }
            }
            Err(e) => {
                // Descriptor may be invalid; close and reopen on the next poll.
                self.close_file(&mut out, format!("size query failed, will reopen: {}", e));
                return out;
            }
        }

        // Rotation by rename/recreate: the identity at the path differs from
        // the open descriptor. A missing path is not an error; the old
        // descriptor may still be draining.
        match FileId::from_path(&self.path) {
            Err(_) => {
                out.path_missing = true;

                // Deleted and fully drained: release the descriptor once EOF
                // has held for the settle time, so we don't pin deleted files
                // forever.
                if self.last_read_was_eof && self.eof_settled() {
                    self.close_file(&mut out, "path missing and file drained".to_string());
                }
                return out;
            }
            Ok(path_id) => {
                if path_id != self.active_id {
                    self.rotation_pending = true;
                    self.pending_id = path_id;
                    out.rotated = true;
                    out.new_path_id = Some(path_id);
                    out.message = Some("rotation detected (path inode changed)".to_string());
                }
            }
        }

        self.maybe_switch_to_pending(&mut out);

        out
    }

    /// Perform one bounded read from the active descriptor.
    ///
    /// Returns `None` when no descriptor is open or when a non-retryable read
    /// error closed it; an empty chunk signals EOF or a retryable
    /// interruption.
    pub fn read_some(&mut self) -> Option<ReadChunk> {
        let file = self.file.as_mut()?;

        let mut buf = vec![0u8; self.config.max_read_bytes];
        match file.read(&mut buf) {
            Ok(0) => {
                // EOF for now; the writer may append later.
                self.last_read_was_eof = true;
                self.last_eof_time = Some(Instant::now());
                Some(self.empty_chunk())
            }
            Ok(n) => {
                buf.truncate(n);
                let chunk = ReadChunk {
                    data: Bytes::from(buf),
                    start_offset: self.read_offset,
                    file_id: self.active_id,
                    generation: self.generation,
                };
                self.read_offset += n as u64;
                self.last_read_was_eof = false;
                Some(chunk)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Some(self.empty_chunk()),
            Err(e) => {
                let mut out = PollResult::default();
                self.close_file(&mut out, format!("read failed, will reopen: {}", e));
                None
            }
        }
    }

    fn empty_chunk(&self) -> ReadChunk {
        ReadChunk {
            data: Bytes::new(),
            start_offset: self.read_offset,
            file_id: self.active_id,
            generation: self.generation,
        }
    }

    fn active_size(&self) -> io::Result<u64> {
        match self.file.as_ref() {
            Some(file) => Ok(file.metadata()?.len()),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "no open file")),
        }
    }

    fn seek_to_start(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.seek(SeekFrom::Start(0))?;
        }
        Ok(())
    }

    fn eof_settled(&self) -> bool {
        self.last_eof_time
            .is_some_and(|t| t.elapsed() >= self.config.rotate_settle_time)
    }

    fn close_file(&mut self, out: &mut PollResult, reason: String) {
        if self.file.take().is_some() {
            debug!(path = %self.path.display(), "{}", reason);
            out.closed = true;
            out.message = Some(reason);
        }
    }

    fn open_at_path(&mut self, out: &mut PollResult) {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                out.path_missing = true;
                return;
            }
            Err(e) => {
                out.error = true;
                out.message = Some(format!("open failed: {}", e));
                return;
            }
        };

        let id = match FileId::from_file(&file) {
            Ok(id) => id,
            Err(e) => {
                out.error = true;
                out.message = Some(format!("stat after open failed: {}", e));
                return;
            }
        };

        self.file = Some(file);
        self.active_id = id;
        self.generation = 0;
        self.read_offset = 0;
        self.rotation_pending = false;
        self.last_read_was_eof = false;
        self.last_eof_time = None;

        out.file_opened = true;
        out.message = Some("opened file".to_string());
    }

    /// Complete a pending rotation once the old file is drained and stable.
    fn maybe_switch_to_pending(&mut self, out: &mut PollResult) {
        if !self.rotation_pending || self.file.is_none() {
            return;
        }

        // Only switch after EOF has held for the settle time.
        if !self.last_read_was_eof || !self.eof_settled() {
            return;
        }

        // If the old file grew after EOF (writer still flushing), keep
        // reading it and re-arm EOF tracking.
        let size = match self.active_size() {
            Ok(s) => s,
            Err(_) => return,
        };
        if size > self.read_offset {
            self.last_read_was_eof = false;
            return;
        }

        self.file = None;

        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Path disappeared between pending and switch; reopen later.
                self.rotation_pending = false;
                out.message = Some("rotation pending but path missing, will reopen".to_string());
                return;
            }
            Err(e) => {
                out.error = true;
                out.message = Some(format!("failed to open rotated file: {}", e));
                self.rotation_pending = false;
                return;
            }
        };

        // Adopt whatever identity is at the path now; it may have changed
        // again since the rotation was first observed.
        let id = match FileId::from_file(&file) {
            Ok(id) => id,
            Err(e) => {
                out.error = true;
                out.message = Some(format!("stat of rotated file failed: {}", e));
                self.rotation_pending = false;
                return;
            }
        };

        self.file = Some(file);
        self.active_id = id;
        self.generation = 0;
        self.read_offset = 0;
        self.last_read_was_eof = false;
        self.last_eof_time = None;
        self.rotation_pending = false;

        out.switched = true;
        out.message = Some("switched to rotated file".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::thread::sleep;
    use tempfile::tempdir;

    const SETTLE: Duration = Duration::from_millis(50);

    fn test_config() -> FollowerConfig {
        FollowerConfig {
            rotate_settle_time: SETTLE,
            ..Default::default()
        }
    }

    fn append(path: &Path, data: &[u8]) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(data).unwrap();
        f.flush().unwrap();
    }

    fn drain_to_eof(follower: &mut FileFollower) -> Vec<u8> {
        let mut collected = Vec::new();
        loop {
            let chunk = follower.read_some().expect("descriptor should stay open");
            if chunk.is_empty() {
                return collected;
            }
            collected.extend_from_slice(&chunk.data);
        }
    }

    #[test]
    fn test_poll_missing_path() {
        let dir = tempdir().unwrap();
        let mut follower = FileFollower::new(dir.path().join("app.log"), test_config());

        let result = follower.poll(0);
        assert!(result.path_missing);
        assert!(!result.error);
        assert!(!follower.has_file());
    }

    #[test]
    fn test_open_and_read_offsets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"a\nbb\n");

        let mut follower = FileFollower::new(&path, test_config());
        let result = follower.poll(0);
        assert!(result.file_opened);
        assert_eq!(follower.generation(), 0);

        let chunk = follower.read_some().unwrap();
        assert_eq!(chunk.start_offset, 0);
        assert_eq!(&chunk.data[..], b"a\nbb\n");
        assert_eq!(follower.read_offset(), 5);

        // Appends continue from the previous offset.
        append(&path, b"ccc\n");
        let chunk = follower.read_some().unwrap();
        assert_eq!(chunk.start_offset, 5);
        assert_eq!(&chunk.data[..], b"ccc\n");
    }

    #[test]
    fn test_eof_yields_empty_chunk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"x\n");

        let mut follower = FileFollower::new(&path, test_config());
        follower.poll(0);

        let chunk = follower.read_some().unwrap();
        assert!(!chunk.is_empty());

        let eof = follower.read_some().unwrap();
        assert!(eof.is_empty());
        assert_eq!(eof.start_offset, 2);
        assert_eq!(eof.file_id, follower.active_id());
    }

    #[test]
    fn test_truncation_bumps_generation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"a\nbb\nccc\n");

        let mut follower = FileFollower::new(&path, test_config());
        follower.poll(0);
        drain_to_eof(&mut follower);
        assert_eq!(follower.read_offset(), 9);

        // Copytruncate: same inode, size back to zero, then new content.
        let f = OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(0).unwrap();
        drop(f);
        append(&path, b"x\n");

        let result = follower.poll(9);
        assert!(result.truncated);
        assert_eq!(follower.generation(), 1);
        assert_eq!(follower.read_offset(), 0);

        let chunk = follower.read_some().unwrap();
        assert_eq!(chunk.start_offset, 0);
        assert_eq!(chunk.generation, 1);
        assert_eq!(&chunk.data[..], b"x\n");
    }

    #[test]
    fn test_truncation_below_committed_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"abcdef\n");

        let mut follower = FileFollower::new(&path, test_config());
        follower.poll(0);

        // Nothing read yet, but the durable offset says 7; a shrink below it
        // is still a truncation.
        let f = OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(3).unwrap();
        drop(f);

        let result = follower.poll(7);
        assert!(result.truncated);
        assert_eq!(follower.generation(), 1);
    }

    #[test]
    fn test_rotate_by_rename() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"old-1\n");

        let mut follower = FileFollower::new(&path, test_config());
        follower.poll(0);
        assert_eq!(drain_to_eof(&mut follower), b"old-1\n");
        let old_id = follower.active_id();

        fs::rename(&path, dir.path().join("app.log.1")).unwrap();
        append(&path, b"new-1\n");

        let result = follower.poll(6);
        assert!(result.rotated);
        assert_ne!(result.new_path_id.unwrap(), old_id);

        // EOF has not settled yet; still on the old descriptor.
        assert_eq!(follower.active_id(), old_id);

        sleep(SETTLE + Duration::from_millis(20));
        let result = follower.poll(6);
        assert!(result.switched);
        assert_ne!(follower.active_id(), old_id);
        assert_eq!(follower.generation(), 0);
        assert_eq!(follower.read_offset(), 0);

        let chunk = follower.read_some().unwrap();
        assert_eq!(chunk.start_offset, 0);
        assert_eq!(&chunk.data[..], b"new-1\n");
    }

    #[test]
    fn test_rotate_with_trailing_data_drains_old_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let rotated = dir.path().join("app.log.1");
        append(&path, b"old-1\n");

        let mut follower = FileFollower::new(&path, test_config());
        follower.poll(0);
        drain_to_eof(&mut follower);
        let old_id = follower.active_id();

        fs::rename(&path, &rotated).unwrap();
        append(&path, b"new-1\n");
        // Writer flushes one more line into the renamed file after our EOF.
        append(&rotated, b"old-2\n");

        sleep(SETTLE + Duration::from_millis(20));
        let result = follower.poll(6);
        assert!(result.rotated);
        assert!(!result.switched, "must drain the old file first");
        assert_eq!(follower.active_id(), old_id);

        assert_eq!(drain_to_eof(&mut follower), b"old-2\n");

        sleep(SETTLE + Duration::from_millis(20));
        let result = follower.poll(12);
        assert!(result.switched);

        let chunk = follower.read_some().unwrap();
        assert_eq!(&chunk.data[..], b"new-1\n");
        assert_eq!(chunk.start_offset, 0);
    }

    #[test]
    fn test_deleted_path_closes_after_drain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"only\n");

        let mut follower = FileFollower::new(&path, test_config());
        follower.poll(0);
        drain_to_eof(&mut follower);

        fs::remove_file(&path).unwrap();

        let result = follower.poll(5);
        assert!(result.path_missing);
        assert!(!result.closed, "EOF has not settled yet");
        assert!(follower.has_file());

        sleep(SETTLE + Duration::from_millis(20));
        let result = follower.poll(5);
        assert!(result.path_missing);
        assert!(result.closed);
        assert!(!follower.has_file());

        // Recreate at the same path: fresh generation at offset zero.
        append(&path, b"again\n");
        let result = follower.poll(0);
        assert!(result.file_opened);
        assert_eq!(follower.generation(), 0);
        assert_eq!(follower.read_offset(), 0);
    }

    #[test]
    fn test_resume_from_matching_checkpoint() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"committed!\nfresh\n");

        let id = FileId::from_path(&path).unwrap();
        let cp = Checkpoint::new(id, 2, 11);

        let mut follower = FileFollower::new(&path, test_config());
        assert!(follower.resume_from(&cp).unwrap());
        assert_eq!(follower.generation(), 2);
        assert_eq!(follower.read_offset(), 11);

        let chunk = follower.read_some().unwrap();
        assert_eq!(chunk.start_offset, 11);
        assert_eq!(chunk.generation, 2);
        assert_eq!(&chunk.data[..], b"fresh\n");
    }

    #[test]
    fn test_resume_rejects_shorter_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"short\n");

        let id = FileId::from_path(&path).unwrap();
        let cp = Checkpoint::new(id, 0, 1000);

        let mut follower = FileFollower::new(&path, test_config());
        assert!(!follower.resume_from(&cp).unwrap());
        assert!(!follower.has_file());
    }

    #[test]
    fn test_resume_rejects_different_identity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"data\n");

        let cp = Checkpoint::new(FileId::new(0, 0), 0, 0);

        let mut follower = FileFollower::new(&path, test_config());
        assert!(!follower.resume_from(&cp).unwrap());
    }

    #[test]
    fn test_resume_missing_path() {
        let dir = tempdir().unwrap();
        let cp = Checkpoint::new(FileId::new(1, 2), 0, 0);

        let mut follower = FileFollower::new(dir.path().join("gone.log"), test_config());
        assert!(!follower.resume_from(&cp).unwrap());
    }
}
