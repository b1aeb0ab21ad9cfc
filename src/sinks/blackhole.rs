// SPDX-License-Identifier: Apache-2.0

use tracing::debug;

use super::{Batch, SendResult, Sink};

/// Sink that acknowledges and discards every batch.
///
/// Useful as the default when no endpoint is configured, and for exercising
/// the delivery path without a collector.
pub struct BlackholeSink {
    name: String,
}

impl BlackholeSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for BlackholeSink {
    fn default() -> Self {
        Self::new("blackhole")
    }
}

impl Sink for BlackholeSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, batch: &Batch) -> SendResult {
        debug!(
            sink = %self.name,
            batch_id = batch.batch_id,
            records = batch.len(),
            "discarding batch"
        );
        SendResult {
            ok: true,
            status: 0,
            message: "discarded".to_string(),
            commit_end_offset: Some(batch.commit_end_offset),
        }
    }
}
