// SPDX-License-Identifier: Apache-2.0

//! Rule-based sink selection and the acknowledgement policy that decides
//! when a batch's offset becomes committable.
//!
//! The router owns the `name -> sink` registry under shared ownership (the
//! same sink may appear in several rules); decisions carry cloned handles
//! for the duration of one tick. It holds no state across batches: commit
//! bookkeeping belongs to the agent.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::sinks::{Batch, Record, SendResult, Sink};

/// When is a batch considered acknowledged?
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckPolicy {
    /// Commit when the designated primary sink acknowledges.
    #[default]
    Primary,
    /// Commit when any selected sink acknowledges.
    Any,
    /// Commit only when every selected sink acknowledges.
    All,
}

/// Route by label equality. First matching rule wins.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub label_key: String,
    pub label_value: String,
    /// Ordered sink names to deliver to when the rule matches.
    pub sink_names: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    pub ack_policy: AckPolicy,
    /// Required when `ack_policy` is `Primary`.
    pub primary_sink_name: Option<String>,
    /// Used when no rule matches.
    pub default_sink_names: Vec<String>,
    pub rules: Vec<RouteRule>,
}

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("no default sinks and no rules configured")]
    NothingConfigured,

    #[error("primary sink name is required for the primary ack policy")]
    MissingPrimary,

    #[error("unknown sink referenced: {0}")]
    UnknownSink(String),
}

/// Sinks selected for one batch.
pub struct RouteDecision {
    pub sinks: Vec<Arc<dyn Sink>>,
    /// Whether the primary sink is among the selected sinks.
    pub uses_primary: bool,
}

pub struct Router {
    config: RouterConfig,
    sinks_by_name: HashMap<String, Arc<dyn Sink>>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            sinks_by_name: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Register a sink under its own name. Re-registering a name replaces
    /// the previous handle.
    pub fn add_sink(&mut self, sink: Arc<dyn Sink>) {
        self.sinks_by_name.insert(sink.name().to_string(), sink);
    }

    /// Verify the configuration against the registered sinks. Called once at
    /// startup; `decide` assumes a validated config and silently skips
    /// unknown names after that.
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.config.default_sink_names.is_empty() && self.config.rules.is_empty() {
            return Err(RouterError::NothingConfigured);
        }

        if self.config.ack_policy == AckPolicy::Primary {
            let primary = self
                .config
                .primary_sink_name
                .as_deref()
                .filter(|n| !n.is_empty())
                .ok_or(RouterError::MissingPrimary)?;
            if !self.sinks_by_name.contains_key(primary) {
                return Err(RouterError::UnknownSink(primary.to_string()));
            }
        }

        for name in &self.config.default_sink_names {
            if !self.sinks_by_name.contains_key(name) {
                return Err(RouterError::UnknownSink(name.clone()));
            }
        }
        for rule in &self.config.rules {
            for name in &rule.sink_names {
                if !self.sinks_by_name.contains_key(name) {
                    return Err(RouterError::UnknownSink(name.clone()));
                }
            }
        }

        Ok(())
    }

    fn rule_matches(rule: &RouteRule, record: &Record) -> bool {
        record
            .labels
            .get(&rule.label_key)
            .is_some_and(|v| *v == rule.label_value)
    }

    fn is_primary(&self, name: &str) -> bool {
        self.config.ack_policy == AckPolicy::Primary
            && self.config.primary_sink_name.as_deref() == Some(name)
    }

    /// Select sinks for a record: first-match over the rules, falling back
    /// to the default list. Unknown names are skipped.
    pub fn decide(&self, record: &Record) -> RouteDecision {
        let names = self
            .config
            .rules
            .iter()
            .find(|rule| Self::rule_matches(rule, record))
            .map(|rule| &rule.sink_names)
            .unwrap_or(&self.config.default_sink_names);

        let mut decision = RouteDecision {
            sinks: Vec::with_capacity(names.len()),
            uses_primary: false,
        };

        for name in names {
            if let Some(sink) = self.sinks_by_name.get(name) {
                decision.sinks.push(Arc::clone(sink));
                if self.is_primary(name) {
                    decision.uses_primary = true;
                }
            }
        }

        decision
    }

    /// Deliver a batch to the decided sinks and compute the committable
    /// offset under the configured ack policy. Returns `None` when the
    /// policy is not satisfied; the caller must then leave the durable
    /// offset untouched.
    pub fn send_and_decide_commit(
        &self,
        batch: &Batch,
        decision: &RouteDecision,
    ) -> (Option<u64>, Vec<SendResult>) {
        let mut results = Vec::with_capacity(decision.sinks.len());

        if decision.sinks.is_empty() {
            results.push(SendResult::failure("no sinks selected by router"));
            return (None, results);
        }

        let mut any_ok = false;
        let mut all_ok = true;
        let mut any_commit: Option<u64> = None;
        let mut primary_ok = false;
        let mut primary_commit: Option<u64> = None;

        for sink in &decision.sinks {
            if !sink.is_ready() {
                results.push(SendResult::failure(format!(
                    "sink {} not ready",
                    sink.name()
                )));
                all_ok = false;
                continue;
            }

            let res = sink.send(batch);
            if res.ok {
                any_ok = true;
                if res.commit_end_offset.is_some() {
                    any_commit = res.commit_end_offset;
                }
            } else {
                all_ok = false;
            }

            if self.is_primary(sink.name()) {
                primary_ok = res.ok;
                primary_commit = res.commit_end_offset;
            }

            results.push(res);
        }

        let commit = match self.config.ack_policy {
            AckPolicy::Primary => {
                if primary_ok {
                    // Prefer the sink's explicit durability promise; fall
                    // back to the batch end when the ack carried none.
                    Some(primary_commit.unwrap_or(batch.commit_end_offset))
                } else {
                    None
                }
            }
            AckPolicy::Any => {
                if any_ok {
                    Some(any_commit.unwrap_or(batch.commit_end_offset))
                } else {
                    None
                }
            }
            AckPolicy::All => {
                if all_ok {
                    Some(batch.commit_end_offset)
                } else {
                    None
                }
            }
        };

        (commit, results)
    }
}
