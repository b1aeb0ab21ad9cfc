// SPDX-License-Identifier: Apache-2.0

//! Line-oriented `key: value` configuration.
//!
//! Deliberately trivial: `#` starts a comment, values may be quoted, unknown
//! keys are ignored for forward compatibility. A handful of legacy key
//! aliases are accepted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::router::AckPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to open config file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid line {line} (missing ':')")]
    MissingColon { line: usize },

    #[error("empty key at line {line}")]
    EmptyKey { line: usize },

    #[error("invalid value for {key} at line {line}: {value}")]
    InvalidValue {
        key: String,
        line: usize,
        value: String,
    },

    #[error("missing required option: {0}")]
    MissingOption(&'static str),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Minimum log severity: debug/info/warn/error.
    pub log_level: String,
    /// Log output format: text or json.
    pub log_format: LogFormat,
    /// Path of the file to follow.
    pub input_path: PathBuf,
    /// Path of the durable checkpoint.
    pub checkpoint_path: PathBuf,
    /// Tick cadence.
    pub poll_interval: Duration,
    /// EOF settle time before switching to a rotated file.
    pub rotate_settle_time: Duration,
    /// Upper bound on a single read.
    pub max_read_bytes: usize,
    /// NDJSON collector endpoint; empty selects the blackhole sink.
    pub sink_url: String,
    /// Sink registry name; defaults per sink kind when empty.
    pub sink_name: String,
    /// Per-request deadline for the HTTP sink.
    pub sink_timeout: Duration,
    /// Whether a 2xx response is trusted as durable.
    pub sink_assume_durable: bool,
    pub ack_policy: AckPolicy,
    /// Static labels stamped on every record.
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            input_path: PathBuf::new(),
            checkpoint_path: PathBuf::new(),
            poll_interval: Duration::from_millis(200),
            rotate_settle_time: Duration::from_millis(500),
            max_read_bytes: 64 * 1024,
            sink_url: String::new(),
            sink_name: String::new(),
            sink_timeout: Duration::from_secs(5),
            sink_assume_durable: true,
            ack_policy: AckPolicy::Primary,
            labels: HashMap::new(),
        }
    }
}

impl Config {
    /// Load and parse a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Parse config text. Errors on structurally broken lines; unknown keys
    /// are ignored.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        for (idx, raw) in contents.lines().enumerate() {
            let line_no = idx + 1;

            let line = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let colon = line
                .find(':')
                .ok_or(ConfigError::MissingColon { line: line_no })?;
            let key = line[..colon].trim();
            let value = strip_quotes(line[colon + 1..].trim());

            if key.is_empty() {
                return Err(ConfigError::EmptyKey { line: line_no });
            }

            cfg.apply(key, value, line_no)?;
        }

        Ok(cfg)
    }

    /// Require the options that have no workable default.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingOption("input.path"));
        }
        if self.checkpoint_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingOption("checkpoint.path"));
        }
        Ok(())
    }

    fn apply(&mut self, key: &str, value: &str, line: usize) -> Result<(), ConfigError> {
        match key {
            "logging.level" | "log.level" => self.log_level = value.to_string(),
            "logging.format" => {
                self.log_format = match value.to_ascii_lowercase().as_str() {
                    "text" => LogFormat::Text,
                    "json" => LogFormat::Json,
                    _ => return Err(invalid(key, value, line)),
                }
            }
            "input.path" | "input.file" | "input" => self.input_path = PathBuf::from(value),
            "checkpoint.path" | "state.checkpoint" | "checkpoint" => {
                self.checkpoint_path = PathBuf::from(value)
            }
            "poll.interval_ms" => {
                self.poll_interval = Duration::from_millis(parse_u64(key, value, line)?)
            }
            "rotate.settle_ms" => {
                self.rotate_settle_time = Duration::from_millis(parse_u64(key, value, line)?)
            }
            "read.max_bytes" => {
                let n = parse_u64(key, value, line)?;
                if n == 0 {
                    return Err(invalid(key, value, line));
                }
                self.max_read_bytes = n as usize;
            }
            "sink.url" => self.sink_url = value.to_string(),
            "sink.name" => self.sink_name = value.to_string(),
            "sink.timeout_ms" => {
                self.sink_timeout = Duration::from_millis(parse_u64(key, value, line)?)
            }
            "sink.assume_durable" => {
                self.sink_assume_durable = match value.to_ascii_lowercase().as_str() {
                    "true" | "yes" | "1" => true,
                    "false" | "no" | "0" => false,
                    _ => return Err(invalid(key, value, line)),
                }
            }
            "ack.policy" => {
                self.ack_policy = match value.to_ascii_lowercase().as_str() {
                    "primary" => AckPolicy::Primary,
                    "any" => AckPolicy::Any,
                    "all" => AckPolicy::All,
                    _ => return Err(invalid(key, value, line)),
                }
            }
            _ => {
                if let Some(label_key) = key.strip_prefix("label.") {
                    self.labels
                        .insert(label_key.to_string(), value.to_string());
                }
                // Unknown keys are ignored for forward compatibility.
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str, line: usize) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        line,
        value: value.to_string(),
    }
}

fn parse_u64(key: &str, value: &str, line: usize) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| invalid(key, value, line))
}

fn strip_quotes(value: &str) -> &str {
    if value.len() >= 2 {
        let bytes = value.as_bytes();
        if (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'')
        {
            return &value[1..value.len() - 1];
        }
    }
    value
}
