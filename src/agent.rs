// SPDX-License-Identifier: Apache-2.0

//! The agent tick loop: Observe -> Read -> Frame -> Batch -> Send -> Commit.
//!
//! A tick is an indivisible step; cancellation is only checked between
//! ticks. The agent owns the authoritative in-memory committed offset and
//! the checkpoint store handle, and is the only component that advances
//! either.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::follower::{FileFollower, FileId};
use crate::framing::LineFramer;
use crate::router::Router;
use crate::sinks::{Batch, Labels, Record};

#[derive(Debug, Clone, Copy)]
struct Position {
    file_id: FileId,
    generation: u64,
}

pub struct Agent {
    follower: FileFollower,
    framer: LineFramer,
    router: Router,
    store: CheckpointStore,
    /// Static labels stamped on every record.
    labels: Labels,
    poll_interval: Duration,

    /// Highest offset acknowledged under the ack policy for the current
    /// `(file_id, generation)`. Monotonically non-decreasing per generation.
    committed_offset: u64,
    /// The generation the committed offset belongs to; None until a file has
    /// been seen.
    position: Option<Position>,
    next_batch_id: u64,
}

impl Agent {
    pub fn new(
        follower: FileFollower,
        router: Router,
        store: CheckpointStore,
        labels: Labels,
        poll_interval: Duration,
    ) -> Self {
        Self {
            follower,
            framer: LineFramer::new(),
            router,
            store,
            labels,
            poll_interval,
            committed_offset: 0,
            position: None,
            next_batch_id: 0,
        }
    }

    pub fn committed_offset(&self) -> u64 {
        self.committed_offset
    }

    /// Load the checkpoint and, when it still describes the file at the
    /// path, resume from it.
    ///
    /// A malformed or empty checkpoint is fatal: the operator decides
    /// whether to delete it, we never silently overwrite. A checkpoint that
    /// no longer matches the file (different identity, or file shorter than
    /// the committed offset) means a fresh generation starting at zero.
    pub fn start(&mut self) -> Result<(), crate::checkpoint::Error> {
        let Some(cp) = self.store.load()? else {
            info!(path = %self.follower.path().display(), "no checkpoint, starting fresh");
            return Ok(());
        };

        match self.follower.resume_from(&cp) {
            Ok(true) => {
                self.committed_offset = cp.committed_offset;
                self.position = Some(Position {
                    file_id: cp.file_id,
                    generation: cp.generation,
                });
                info!(
                    file_id = %cp.file_id,
                    generation = cp.generation,
                    committed_offset = cp.committed_offset,
                    "resumed from checkpoint"
                );
            }
            Ok(false) => {
                info!(
                    file_id = %cp.file_id,
                    "checkpoint does not match file at path, starting a new generation"
                );
            }
            Err(e) => {
                warn!(error = %e, "checkpoint resume failed, starting a new generation");
            }
        }

        Ok(())
    }

    /// Execute one tick of the state machine.
    pub fn tick(&mut self) {
        // Observe.
        let observed = self.follower.poll(self.committed_offset);
        if observed.error {
            error!(
                component = "follower",
                message = observed.message.as_deref().unwrap_or(""),
                "poll reported an error"
            );
        }
        if observed.truncated || observed.switched || observed.file_opened {
            self.begin_generation(&observed);
        }

        // Read. Absent descriptor or a bare EOF/EINTR ends the tick.
        let Some(chunk) = self.follower.read_some() else {
            return;
        };
        if chunk.is_empty() {
            return;
        }

        // Frame.
        self.framer.ingest(&chunk.data, chunk.start_offset);
        let framed = self.framer.drain();
        if framed.is_empty() {
            return;
        }

        // Batch.
        let ts_ingest_ns = epoch_nanos();
        let records: Vec<Record> = framed
            .into_iter()
            .map(|f| Record {
                payload: f.payload,
                ts_ingest_ns,
                labels: self.labels.clone(),
                start_offset: f.start_offset,
                end_offset: f.end_offset,
            })
            .collect();
        let batch = Batch::from_records(
            self.next_batch_id,
            chunk.file_id,
            chunk.generation,
            records,
        );
        self.next_batch_id += 1;

        // Send.
        let decision = self.router.decide(&batch.records[0]);
        let (commit, results) = self.router.send_and_decide_commit(&batch, &decision);
        for res in results.iter().filter(|r| !r.ok) {
            warn!(
                component = "sink",
                status = res.status,
                message = %res.message,
                "send failed"
            );
        }

        // Commit.
        match commit {
            Some(offset) => {
                if offset > self.committed_offset {
                    self.committed_offset = offset;
                }
                self.position = Some(Position {
                    file_id: batch.file_id,
                    generation: batch.generation,
                });
                self.persist_checkpoint();
            }
            None => {
                debug!(
                    batch_id = batch.batch_id,
                    committed_offset = self.committed_offset,
                    "ack policy not satisfied, offset unchanged"
                );
            }
        }
    }

    /// Run ticks at the configured cadence until cancelled, then persist one
    /// final checkpoint. The token is only consulted between ticks.
    pub fn run(&mut self, cancel: CancellationToken) {
        info!(
            path = %self.follower.path().display(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "agent started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.tick();
            std::thread::sleep(self.poll_interval);
        }

        self.persist_checkpoint();
        info!("agent stopped");
    }

    /// A new generation became current: truncation, a switch to a rotated
    /// file, or a fresh open. Buffered partial bytes belong to the old
    /// generation and are dropped; the durable record is rewritten so it
    /// never points past the end of a live generation.
    fn begin_generation(&mut self, observed: &crate::follower::PollResult) {
        self.framer.reset();
        self.committed_offset = 0;
        self.position = Some(Position {
            file_id: self.follower.active_id(),
            generation: self.follower.generation(),
        });
        debug!(
            file_id = %self.follower.active_id(),
            generation = self.follower.generation(),
            truncated = observed.truncated,
            switched = observed.switched,
            opened = observed.file_opened,
            "generation changed"
        );
        self.persist_checkpoint();
    }

    /// Write the checkpoint; on failure keep the in-memory offset so the
    /// next commit retries the persist (at-least-once is preserved either
    /// way: a restart re-delivers from the last durable offset).
    fn persist_checkpoint(&mut self) {
        let Some(pos) = self.position else {
            return;
        };
        let cp = Checkpoint::new(pos.file_id, pos.generation, self.committed_offset);
        if let Err(e) = self.store.save(&cp) {
            error!(
                component = "checkpoint",
                error = %e,
                "failed to persist checkpoint, keeping in-memory offset"
            );
        }
    }
}

fn epoch_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
