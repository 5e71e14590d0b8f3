//! Destinations for ended contexts.
//!
//! A context produces exactly one `ContextRecord` when it ends. What happens
//! to the record is up to the `Reporter`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;
use tracing::info;

use super::span::{ContextKind, Outcome};
use crate::advice::Failure;

/// Serialize SystemTime as RFC3339 string.
fn serialize_system_time<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use chrono::{DateTime, Utc};
    let datetime: DateTime<Utc> = (*time).into();
    serializer.serialize_str(&datetime.to_rfc3339())
}

fn deserialize_system_time<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use chrono::{DateTime, Utc};
    let raw = String::deserialize(deserializer)?;
    let datetime = DateTime::parse_from_rfc3339(&raw).map_err(serde::de::Error::custom)?;
    Ok(datetime.with_timezone(&Utc).into())
}

/// Snapshot of a context at the moment it ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    pub kind: ContextKind,

    /// Unique span identifier (16-char hex)
    pub span_id: String,

    /// Trace identifier shared by a transaction and all its descendants
    pub trace_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    pub outcome: Outcome,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework_version: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(
        serialize_with = "serialize_system_time",
        deserialize_with = "deserialize_system_time"
    )]
    pub timestamp: SystemTime,

    pub start_time_unix_nano: u64,
    pub end_time_unix_nano: u64,
    pub duration_us: u64,
}

/// Receives every ended context exactly once
pub trait Reporter: Send + Sync {
    fn report(&self, record: ContextRecord);
}

/// Emits ended contexts as structured log events
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingReporter;

impl Reporter for LoggingReporter {
    fn report(&self, record: ContextRecord) {
        let payload = serde_json::to_string(&record).unwrap_or_default();
        info!(
            target: "spanhook::report",
            kind = ?record.kind,
            span_id = %record.span_id,
            trace_id = %record.trace_id,
            outcome = ?record.outcome,
            duration_us = record.duration_us,
            "{}",
            payload
        );
    }
}

/// Keeps ended contexts in memory, mostly for tests and the CLI
#[derive(Debug, Default)]
pub struct MemoryReporter {
    records: Mutex<Vec<ContextRecord>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ContextRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Records whose name equals `name`
    pub fn named(&self, name: &str) -> Vec<ContextRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.name == name)
            .collect()
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, record: ContextRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

/// Drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl Reporter for NoopReporter {
    fn report(&self, _record: ContextRecord) {}
}
