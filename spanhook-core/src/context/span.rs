//! Transactions and spans.
//!
//! A `TraceContext` is shared as `Arc<TraceContext>` between the code that
//! started it, the activation stack and its children. State only moves
//! forward; `end()` reports the context exactly once no matter how many
//! times or from how many threads it is called.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::activation;
use super::reporter::{ContextRecord, Reporter};
use crate::advice::Failure;
use crate::error::UsageError;

pub type ContextRef = Arc<TraceContext>;

/// Generate a unique 16-character hex span ID (8 bytes).
fn generate_span_id() -> String {
    let uuid = Uuid::now_v7();
    hex::encode(&uuid.as_bytes()[8..16])
}

fn generate_trace_id() -> String {
    Uuid::now_v7().simple().to_string()
}

/// Convert SystemTime to nanoseconds since Unix epoch.
fn system_time_to_nanos(time: &SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// Root of a trace
    Transaction,
    /// Child of another context
    Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    Created,
    Active,
    Ended,
}

const CREATED: u8 = 0;
const ACTIVE: u8 = 1;
const ENDED: u8 = 2;

impl ContextState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            CREATED => ContextState::Created,
            ACTIVE => ContextState::Active,
            _ => ContextState::Ended,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Default)]
struct ContextData {
    name: String,
    context_type: Option<String>,
    result: Option<String>,
    failure: Option<Failure>,
    framework_name: Option<String>,
    framework_version: Option<String>,
    labels: BTreeMap<String, String>,
}

pub struct TraceContext {
    kind: ContextKind,
    span_id: String,
    trace_id: String,
    parent_span_id: Option<String>,
    parent: Weak<TraceContext>,
    state: AtomicU8,
    /// Thread whose activation stack holds this context
    owner: Mutex<Option<ThreadId>>,
    data: Mutex<ContextData>,
    timestamp: SystemTime,
    start_instant: Instant,
    reporter: Arc<dyn Reporter>,
}

impl TraceContext {
    pub(crate) fn new_root(reporter: Arc<dyn Reporter>) -> ContextRef {
        Arc::new(Self::new(
            ContextKind::Transaction,
            generate_trace_id(),
            None,
            Weak::new(),
            reporter,
        ))
    }

    pub(crate) fn new_child(parent: &ContextRef, reporter: Arc<dyn Reporter>) -> ContextRef {
        Arc::new(Self::new(
            ContextKind::Span,
            parent.trace_id.clone(),
            Some(parent.span_id.clone()),
            Arc::downgrade(parent),
            reporter,
        ))
    }

    fn new(
        kind: ContextKind,
        trace_id: String,
        parent_span_id: Option<String>,
        parent: Weak<TraceContext>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            kind,
            span_id: generate_span_id(),
            trace_id,
            parent_span_id,
            parent,
            state: AtomicU8::new(CREATED),
            owner: Mutex::new(None),
            data: Mutex::new(ContextData::default()),
            timestamp: SystemTime::now(),
            start_instant: Instant::now(),
            reporter,
        }
    }

    fn data(&self) -> MutexGuard<'_, ContextData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn parent_span_id(&self) -> Option<&str> {
        self.parent_span_id.as_deref()
    }

    /// The parent context, if it is still alive
    pub fn parent(&self) -> Option<ContextRef> {
        self.parent.upgrade()
    }

    pub fn state(&self) -> ContextState {
        ContextState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_ended(&self) -> bool {
        self.state() == ContextState::Ended
    }

    pub fn name(&self) -> String {
        self.data().name.clone()
    }

    pub fn context_type(&self) -> Option<String> {
        self.data().context_type.clone()
    }

    pub fn result(&self) -> Option<String> {
        self.data().result.clone()
    }

    pub fn failure(&self) -> Option<Failure> {
        self.data().failure.clone()
    }

    pub fn framework_name(&self) -> Option<String> {
        self.data().framework_name.clone()
    }

    pub fn framework_version(&self) -> Option<String> {
        self.data().framework_version.clone()
    }

    pub fn label(&self, key: &str) -> Option<String> {
        self.data().labels.get(key).cloned()
    }

    pub fn with_name(self: &Arc<Self>, name: impl Into<String>) -> &Arc<Self> {
        self.data().name = name.into();
        self
    }

    pub fn with_type(self: &Arc<Self>, context_type: impl Into<String>) -> &Arc<Self> {
        self.data().context_type = Some(context_type.into());
        self
    }

    pub fn with_result(self: &Arc<Self>, result: impl Into<String>) -> &Arc<Self> {
        self.data().result = Some(result.into());
        self
    }

    /// Set the result only if nothing set one yet
    pub fn with_result_if_unset(self: &Arc<Self>, result: impl Into<String>) -> &Arc<Self> {
        let mut data = self.data();
        if data.result.is_none() {
            data.result = Some(result.into());
        }
        drop(data);
        self
    }

    pub fn with_label(
        self: &Arc<Self>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> &Arc<Self> {
        self.data().labels.insert(key.into(), value.into());
        self
    }

    pub fn set_framework_name(self: &Arc<Self>, name: impl Into<String>) -> &Arc<Self> {
        self.data().framework_name = Some(name.into());
        self
    }

    pub fn set_framework_version(self: &Arc<Self>, version: Option<String>) -> &Arc<Self> {
        self.data().framework_version = version;
        self
    }

    /// Attach a failure. `None` is a no-op; the first captured failure wins.
    pub fn capture_exception(self: &Arc<Self>, failure: Option<&Failure>) -> &Arc<Self> {
        if let Some(failure) = failure {
            let mut data = self.data();
            if data.failure.is_none() {
                data.failure = Some(failure.clone());
            } else {
                debug!(span_id = %self.span_id, "Ignoring additional failure: {}", failure);
            }
        }
        self
    }

    /// Make this the active context of the current thread.
    ///
    /// A context lives on one thread's stack at a time. It can move to
    /// another thread only after it was deactivated on the first one.
    pub fn activate(self: &Arc<Self>) -> &Arc<Self> {
        if self.state() == ContextState::Ended {
            warn!(
                "{}",
                UsageError::AlreadyEnded {
                    span_id: self.span_id.clone()
                }
            );
            return self;
        }
        {
            let current = thread::current().id();
            let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
            match *owner {
                Some(id) if id != current => {
                    warn!(
                        "{}",
                        UsageError::ActiveOnOtherThread {
                            span_id: self.span_id.clone()
                        }
                    );
                    return self;
                }
                _ => *owner = Some(current),
            }
        }
        if let Err(ENDED) =
            self.state
                .compare_exchange(CREATED, ACTIVE, Ordering::AcqRel, Ordering::Acquire)
        {
            // ended by another thread in between
            self.release_owner();
            warn!(
                "{}",
                UsageError::AlreadyEnded {
                    span_id: self.span_id.clone()
                }
            );
            return self;
        }
        activation::push(Arc::clone(self));
        trace!(span_id = %self.span_id, depth = activation::activation_depth(), "Activated context");
        self
    }

    /// Pop this context off the current thread's activation stack.
    ///
    /// Only the most recently activated context can be deactivated; anything
    /// else is logged and ignored.
    pub fn deactivate(self: &Arc<Self>) -> &Arc<Self> {
        match activation::pop_if_top(self) {
            Ok(()) if !activation::is_active_on_current_thread(self) => self.release_owner(),
            Ok(()) => {}
            Err(e) => warn!("{}", e),
        }
        self
    }

    fn release_owner(&self) {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// End the context and hand its record to the reporter. Idempotent.
    pub fn end(self: &Arc<Self>) {
        let still_active = activation::remove(self);
        if still_active > 0 {
            self.release_owner();
            warn!(
                span_id = %self.span_id,
                "Context ended while still active on this thread; deactivated it first"
            );
        }

        if self.state.swap(ENDED, Ordering::AcqRel) == ENDED {
            debug!(
                "{}",
                UsageError::AlreadyEnded {
                    span_id: self.span_id.clone()
                }
            );
            return;
        }

        let record = self.to_record();
        debug!(
            span_id = %record.span_id,
            name = %record.name,
            duration_us = record.duration_us,
            "Ended {:?}",
            record.kind
        );
        self.reporter.report(record);
    }

    fn to_record(&self) -> ContextRecord {
        let data = self.data();
        let duration = self.start_instant.elapsed();
        let start_time_unix_nano = system_time_to_nanos(&self.timestamp);
        ContextRecord {
            kind: self.kind,
            span_id: self.span_id.clone(),
            trace_id: self.trace_id.clone(),
            parent_span_id: self.parent_span_id.clone(),
            name: data.name.clone(),
            context_type: data.context_type.clone(),
            result: data.result.clone(),
            outcome: if data.failure.is_some() {
                Outcome::Failure
            } else {
                Outcome::Success
            },
            failure: data.failure.clone(),
            framework_name: data.framework_name.clone(),
            framework_version: data.framework_version.clone(),
            labels: data.labels.clone(),
            timestamp: self.timestamp,
            start_time_unix_nano,
            end_time_unix_nano: start_time_unix_nano + duration.as_nanos() as u64,
            duration_us: duration.as_micros() as u64,
        }
    }
}

impl fmt::Debug for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceContext")
            .field("kind", &self.kind)
            .field("span_id", &self.span_id)
            .field("trace_id", &self.trace_id)
            .field("parent_span_id", &self.parent_span_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' {}", self.name(), self.span_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{active_context, MemoryReporter};

    fn memory() -> (Arc<MemoryReporter>, Arc<dyn Reporter>) {
        let reporter = Arc::new(MemoryReporter::new());
        let dynamic: Arc<dyn Reporter> = reporter.clone();
        (reporter, dynamic)
    }

    #[test]
    fn test_span_id_format() {
        let id = generate_span_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_span_id());
    }

    #[test]
    fn test_lifecycle_reports_once() {
        let (records, reporter) = memory();
        let tx = TraceContext::new_root(reporter);
        assert_eq!(tx.state(), ContextState::Created);

        tx.with_name("Job#execute").with_type("scheduled").activate();
        assert_eq!(tx.state(), ContextState::Active);
        assert!(Arc::ptr_eq(&active_context().unwrap(), &tx));

        tx.deactivate().end();
        tx.end();

        assert_eq!(tx.state(), ContextState::Ended);
        assert_eq!(records.len(), 1);
        let record = &records.records()[0];
        assert_eq!(record.name, "Job#execute");
        assert_eq!(record.outcome, Outcome::Success);
        assert!(active_context().is_none());
    }

    #[test]
    fn test_active_context_stays_on_its_thread() {
        let (_, reporter) = memory();
        let tx = TraceContext::new_root(reporter);
        tx.activate();

        let shared = Arc::clone(&tx);
        let seen_elsewhere = std::thread::spawn(move || {
            shared.activate();
            active_context().is_some()
        })
        .join()
        .unwrap();

        assert!(!seen_elsewhere);
        assert!(activation::is_active_on_current_thread(&tx));
        tx.deactivate().end();
    }

    #[test]
    fn test_deactivated_context_can_move_threads() {
        let (records, reporter) = memory();
        let tx = TraceContext::new_root(reporter);
        tx.activate().deactivate();

        let shared = Arc::clone(&tx);
        let depth = std::thread::spawn(move || {
            shared.activate();
            let depth = activation::activation_depth();
            shared.deactivate().end();
            depth
        })
        .join()
        .unwrap();

        assert_eq!(depth, 1);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_result_if_unset_does_not_override() {
        let (_, reporter) = memory();
        let tx = TraceContext::new_root(reporter);
        tx.with_result_if_unset("success");
        tx.with_result_if_unset("other");
        assert_eq!(tx.result().as_deref(), Some("success"));

        tx.with_result("explicit");
        assert_eq!(tx.result().as_deref(), Some("explicit"));
    }

    #[test]
    fn test_capture_exception_null_is_noop() {
        let (records, reporter) = memory();
        let tx = TraceContext::new_root(reporter);
        tx.capture_exception(None);
        assert!(tx.failure().is_none());

        let first = Failure::new("IllegalStateException", "first");
        tx.capture_exception(Some(&first))
            .capture_exception(Some(&Failure::new("Other", "second")))
            .end();

        assert_eq!(tx.failure(), Some(first));
        assert_eq!(records.records()[0].outcome, Outcome::Failure);
    }

    #[test]
    fn test_end_while_active_cleans_stack() {
        let (records, reporter) = memory();
        let tx = TraceContext::new_root(reporter);
        tx.activate().end();

        assert!(active_context().is_none());
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_activate_after_end_is_ignored() {
        let (_, reporter) = memory();
        let tx = TraceContext::new_root(reporter);
        tx.end();
        tx.activate();

        assert_eq!(tx.state(), ContextState::Ended);
        assert!(active_context().is_none());
    }

    #[test]
    fn test_child_links_to_parent() {
        let (_, reporter) = memory();
        let tx = TraceContext::new_root(Arc::clone(&reporter));
        let child = TraceContext::new_child(&tx, reporter);

        assert_eq!(child.kind(), ContextKind::Span);
        assert_eq!(child.trace_id(), tx.trace_id());
        assert_eq!(child.parent_span_id(), Some(tx.span_id()));
        assert!(Arc::ptr_eq(&child.parent().unwrap(), &tx));

        drop(tx);
        assert!(child.parent().is_none());
    }

    #[test]
    fn test_record_serializes_timestamp_as_rfc3339() {
        let (records, reporter) = memory();
        let tx = TraceContext::new_root(reporter);
        tx.with_name("GET /").with_label("route", "/").end();

        let json = serde_json::to_value(&records.records()[0]).unwrap();
        assert_eq!(json["kind"], "transaction");
        assert_eq!(json["labels"]["route"], "/");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
        assert!(json.get("parent_span_id").is_none());
    }
}
