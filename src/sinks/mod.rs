// SPDX-License-Identifier: Apache-2.0

//! Output backends and the batch shapes they consume.
//!
//! A sink is anything that can take a batch of framed records and attempt
//! delivery. Failures are encoded in [`SendResult`], never panics; the
//! router turns per-sink results into a commit decision.

mod blackhole;
mod http_ndjson;

pub use blackhole::BlackholeSink;
pub use http_ndjson::{HttpNdjsonConfig, HttpNdjsonSink};

use std::collections::HashMap;

use bytes::Bytes;

use crate::follower::FileId;

pub type Labels = HashMap<String, String>;

/// A framed record enriched with delivery metadata.
#[derive(Debug, Clone)]
pub struct Record {
    /// Raw framed payload, terminator excluded.
    pub payload: Bytes,
    /// Ingest timestamp, nanoseconds since the epoch.
    pub ts_ingest_ns: u64,
    /// Static labels (env, service, host, ...) used by routing rules.
    pub labels: Labels,
    /// Byte range within `(file_id, generation)`; `end_offset` exclusive,
    /// terminator included.
    pub start_offset: u64,
    pub end_offset: u64,
}

/// An immutable, ordered, non-empty run of records from a single
/// `(file_id, generation)`.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Monotonic identifier, unique per agent run.
    pub batch_id: u64,
    pub records: Vec<Record>,
    pub file_id: FileId,
    pub generation: u64,
    /// End offset of the last record: what becomes durable if acknowledged.
    pub commit_end_offset: u64,
    /// Approximate payload size.
    pub bytes: usize,
}

impl Batch {
    /// Build a batch from framed records. Records must be non-empty and in
    /// file order; the commit offset is taken from the last record.
    pub fn from_records(
        batch_id: u64,
        file_id: FileId,
        generation: u64,
        records: Vec<Record>,
    ) -> Self {
        debug_assert!(!records.is_empty());
        let commit_end_offset = records.last().map(|r| r.end_offset).unwrap_or(0);
        let bytes = records.iter().map(|r| r.payload.len()).sum();
        Self {
            batch_id,
            records,
            file_id,
            generation,
            commit_end_offset,
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone)]
pub struct SendResult {
    pub ok: bool,
    /// Protocol status code, 0 when not applicable.
    pub status: u16,
    pub message: String,
    /// Offset the sink certifies as durable, when it makes that promise.
    pub commit_end_offset: Option<u64>,
}

impl SendResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            status: 0,
            message: message.into(),
            commit_end_offset: None,
        }
    }
}

/// An output backend. Implementations must not panic out of `send`; every
/// failure mode is reported through the returned [`SendResult`]. Sinks
/// enforce their own internal deadlines.
pub trait Sink: Send + Sync {
    /// Unique name used by router rules and logs.
    fn name(&self) -> &str;

    /// Cheap, non-blocking readiness indicator.
    fn is_ready(&self) -> bool {
        true
    }

    /// Attempt delivery of one batch.
    fn send(&self, batch: &Batch) -> SendResult;
}


#[cfg(test)]
mod tests {
    use super::*;

    fn record(start: u64, end: u64) -> Record {
        Record {
            payload: Bytes::from(vec![b'x'; (end - start - 1) as usize]),
            ts_ingest_ns: 0,
            labels: Labels::new(),
            start_offset: start,
            end_offset: end,
        }
    }

    #[test]
    fn test_batch_commit_offset_is_last_record_end() {
        let batch = Batch::from_records(
            1,
            FileId::new(1, 2),
            0,
            vec![record(0, 2), record(2, 5), record(5, 9)],
        );
        assert_eq!(batch.commit_end_offset, 9);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.bytes, 1 + 2 + 3);
    }
}
