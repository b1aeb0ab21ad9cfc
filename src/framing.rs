// SPDX-License-Identifier: Apache-2.0

//! Newline framing over the follower's byte chunks.
//!
//! The framer buffers partial bytes across reads and hands out complete
//! records with exact byte ranges relative to the current file generation.
//! Trailing terminator-less bytes stay buffered until a newline arrives or
//! the framer is reset on truncation/rotation.

use bytes::{Bytes, BytesMut};

/// One complete line. `payload` excludes the terminator; the byte range
/// `[start_offset, end_offset)` includes it, so
/// `end_offset == start_offset + payload.len() + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedRecord {
    pub payload: Bytes,
    pub start_offset: u64,
    pub end_offset: u64,
}

/// Splits buffered bytes into `\n`-terminated records.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: BytesMut,
    /// File offset of the first buffered byte.
    buffer_start_offset: u64,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read at `base_offset`. The offset is only recorded when
    /// the buffer is empty; afterwards contiguity is the follower's
    /// guarantee.
    pub fn ingest(&mut self, data: &[u8], base_offset: u64) {
        if self.buffer.is_empty() {
            self.buffer_start_offset = base_offset;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Return every complete record currently buffered, in file order, and
    /// discard the consumed prefix. Incomplete trailing bytes remain.
    pub fn drain(&mut self) -> Vec<FramedRecord> {
        let mut out = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let payload = self.buffer.split_to(newline).freeze();
            let _ = self.buffer.split_to(1); // the terminator

            let start_offset = self.buffer_start_offset;
            let end_offset = start_offset + payload.len() as u64 + 1;
            self.buffer_start_offset = end_offset;

            out.push(FramedRecord {
                payload,
                start_offset,
                end_offset,
            });
        }

        out
    }

    /// Drop all buffered bytes and restart offsets at zero. Called when the
    /// follower reports a truncation or a switch to a rotated file.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.buffer_start_offset = 0;
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_start_offset(&self) -> u64 {
        self.buffer_start_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_lines() {
        let mut framer = LineFramer::new();
        framer.ingest(b"a\nbb\nccc\n", 0);

        let records = framer.drain();
        assert_eq!(records.len(), 3);

        assert_eq!(&records[0].payload[..], b"a");
        assert_eq!((records[0].start_offset, records[0].end_offset), (0, 2));
        assert_eq!(&records[1].payload[..], b"bb");
        assert_eq!((records[1].start_offset, records[1].end_offset), (2, 5));
        assert_eq!(&records[2].payload[..], b"ccc");
        assert_eq!((records[2].start_offset, records[2].end_offset), (5, 9));

        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn test_partial_line_spans_ingests() {
        let mut framer = LineFramer::new();

        framer.ingest(b"hel", 0);
        assert!(framer.drain().is_empty());
        assert_eq!(framer.buffered_len(), 3);

        framer.ingest(b"lo\n", 3);
        let records = framer.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(&records[0].payload[..], b"hello");
        assert_eq!((records[0].start_offset, records[0].end_offset), (0, 6));
    }

    #[test]
    fn test_no_newline_stays_buffered() {
        let mut framer = LineFramer::new();
        framer.ingest(b"never terminated", 100);

        assert!(framer.drain().is_empty());
        assert!(framer.drain().is_empty());
        assert_eq!(framer.buffered_len(), 16);
        assert_eq!(framer.buffer_start_offset(), 100);
    }

    #[test]
    fn test_records_are_adjacent() {
        let mut framer = LineFramer::new();
        framer.ingest(b"one\ntwo\nthree\n", 50);

        let records = framer.drain();
        for pair in records.windows(2) {
            assert_eq!(pair[0].end_offset, pair[1].start_offset);
        }
        for rec in &records {
            assert_eq!(rec.end_offset, rec.start_offset + rec.payload.len() as u64 + 1);
        }
    }

    #[test]
    fn test_trailing_bytes_carry_offset_across_drains() {
        let mut framer = LineFramer::new();
        framer.ingest(b"full\npart", 0);

        let records = framer.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].end_offset, 5);

        // The leftover "part" begins where the drained record ended.
        assert_eq!(framer.buffer_start_offset(), 5);

        framer.ingest(b"ial\n", 9);
        let records = framer.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(&records[0].payload[..], b"partial");
        assert_eq!((records[0].start_offset, records[0].end_offset), (5, 13));
    }

    #[test]
    fn test_chunk_ending_on_newline_aligns_next_start() {
        let mut framer = LineFramer::new();
        framer.ingest(b"abc\n", 0);
        let records = framer.drain();
        assert_eq!(records.last().unwrap().end_offset, 4);

        framer.ingest(b"def\n", 4);
        let records = framer.drain();
        assert_eq!(records[0].start_offset, 4);
    }

    #[test]
    fn test_empty_lines() {
        let mut framer = LineFramer::new();
        framer.ingest(b"\n\nx\n", 10);

        let records = framer.drain();
        assert_eq!(records.len(), 3);
        assert!(records[0].payload.is_empty());
        assert_eq!((records[0].start_offset, records[0].end_offset), (10, 11));
        assert_eq!((records[1].start_offset, records[1].end_offset), (11, 12));
        assert_eq!(&records[2].payload[..], b"x");
    }

    #[test]
    fn test_reset_clears_buffer_and_offset() {
        let mut framer = LineFramer::new();
        framer.ingest(b"dangling", 42);

        framer.reset();
        assert_eq!(framer.buffered_len(), 0);
        assert_eq!(framer.buffer_start_offset(), 0);

        // Post-reset ingest records the new base offset.
        framer.ingest(b"x\n", 0);
        let records = framer.drain();
        assert_eq!((records[0].start_offset, records[0].end_offset), (0, 2));
    }
}
