// SPDX-License-Identifier: Apache-2.0

//! Reference sink: one HTTP POST per batch, body is newline-delimited JSON,
//! one serialized record per line. A 2xx response is an acknowledgement;
//! everything else, including transport errors, is a failure encoded in the
//! result.

use serde::Serialize;
use tracing::debug;

use super::{Batch, Record, SendResult, Sink};

#[derive(Debug, Clone)]
pub struct HttpNdjsonConfig {
    /// Sink name used by router rules.
    pub name: String,
    /// Collector endpoint receiving the NDJSON POST.
    pub url: String,
    /// Per-request deadline; a sink that cannot answer in time fails the
    /// batch for ack purposes.
    pub timeout: std::time::Duration,
    /// Whether a 2xx response certifies the whole batch as durable. When
    /// set, the sink echoes `batch.commit_end_offset` in its result.
    pub assume_durable_on_2xx: bool,
}

impl Default for HttpNdjsonConfig {
    fn default() -> Self {
        Self {
            name: "ndjson".to_string(),
            url: String::new(),
            timeout: std::time::Duration::from_secs(5),
            assume_durable_on_2xx: true,
        }
    }
}

/// One record on the wire.
#[derive(Debug, Serialize)]
struct WireRecord<'a> {
    ts_ingest_ns: u64,
    payload: std::borrow::Cow<'a, str>,
    #[serde(skip_serializing_if = "super::Labels::is_empty")]
    labels: &'a super::Labels,
}

impl<'a> From<&'a Record> for WireRecord<'a> {
    fn from(r: &'a Record) -> Self {
        Self {
            ts_ingest_ns: r.ts_ingest_ns,
            payload: String::from_utf8_lossy(&r.payload),
            labels: &r.labels,
        }
    }
}

pub struct HttpNdjsonSink {
    config: HttpNdjsonConfig,
    client: reqwest::blocking::Client,
}

impl HttpNdjsonSink {
    /// Build the sink and its HTTP client. Fails when the URL is empty or
    /// the client cannot be constructed.
    pub fn new(config: HttpNdjsonConfig) -> Result<Self, String> {
        if config.url.trim().is_empty() {
            return Err("ndjson sink: url must not be empty".to_string());
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| format!("ndjson sink: http client build failed: {}", e))?;
        Ok(Self { config, client })
    }

    /// Serialize a batch to the NDJSON body.
    fn to_ndjson(batch: &Batch) -> Result<String, serde_json::Error> {
        let mut body = String::with_capacity(batch.bytes + batch.len() * 48);
        for record in &batch.records {
            let line = serde_json::to_string(&WireRecord::from(record))?;
            body.push_str(&line);
            body.push('\n');
        }
        Ok(body)
    }
}

impl Sink for HttpNdjsonSink {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn send(&self, batch: &Batch) -> SendResult {
        let body = match Self::to_ndjson(batch) {
            Ok(b) => b,
            Err(e) => return SendResult::failure(format!("ndjson encode failed: {}", e)),
        };

        let response = match self
            .client
            .post(&self.config.url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
        {
            Ok(r) => r,
            Err(e) => return SendResult::failure(format!("post failed: {}", e)),
        };

        let status = response.status();
        if !status.is_success() {
            return SendResult {
                ok: false,
                status: status.as_u16(),
                message: format!("collector returned {}", status),
                commit_end_offset: None,
            };
        }

        debug!(
            sink = %self.config.name,
            batch_id = batch.batch_id,
            records = batch.len(),
            status = status.as_u16(),
            "batch delivered"
        );

        SendResult {
            ok: true,
            status: status.as_u16(),
            message: "ok".to_string(),
            commit_end_offset: if self.config.assume_durable_on_2xx {
                Some(batch.commit_end_offset)
            } else {
                None
            },
        }
    }
}
