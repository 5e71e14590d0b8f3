//! Entry point for creating contexts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::activation;
use super::reporter::{MemoryReporter, NoopReporter, Reporter};
use super::span::{ContextRef, TraceContext};
use crate::error::UsageError;

pub struct Tracer {
    reporter: Arc<dyn Reporter>,
    running: AtomicBool,
}

impl Tracer {
    pub fn new(reporter: Arc<dyn Reporter>) -> Arc<Self> {
        Arc::new(Self {
            reporter,
            running: AtomicBool::new(true),
        })
    }

    /// A tracer that discards every ended context
    pub fn noop() -> Arc<Self> {
        Self::new(Arc::new(NoopReporter))
    }

    /// A tracer plus a handle to the in-memory reporter it writes to
    pub fn with_memory_reporter() -> (Arc<Self>, Arc<MemoryReporter>) {
        let reporter = Arc::new(MemoryReporter::new());
        (Self::new(reporter.clone()), reporter)
    }

    pub fn reporter(&self) -> &Arc<dyn Reporter> {
        &self.reporter
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Pause or resume context creation. Contexts already started are unaffected.
    pub fn set_running(&self, running: bool) {
        if self.running.swap(running, Ordering::AcqRel) != running {
            info!(running, "Tracer state changed");
        }
    }

    /// The active context of the current thread
    pub fn active(&self) -> Option<ContextRef> {
        activation::active_context()
    }

    /// Start a new transaction. Returns `None` while paused or when the
    /// current thread already has an active context.
    pub fn start_root_transaction(&self) -> Option<ContextRef> {
        if !self.is_running() {
            debug!("Tracer paused; not starting a transaction");
            return None;
        }
        if let Some(active) = self.active() {
            warn!(
                "{}",
                UsageError::ActiveRootExists {
                    active: active.to_string()
                }
            );
            return None;
        }
        let transaction = TraceContext::new_root(Arc::clone(&self.reporter));
        debug!(span_id = %transaction.span_id(), trace_id = %transaction.trace_id(), "Started transaction");
        Some(transaction)
    }

    /// Start a child of the active context. Returns `None` when nothing is active.
    pub fn start_span(&self) -> Option<ContextRef> {
        if !self.is_running() {
            return None;
        }
        let parent = self.active()?;
        let span = TraceContext::new_child(&parent, Arc::clone(&self.reporter));
        debug!(span_id = %span.span_id(), parent = %parent.span_id(), "Started span");
        Some(span)
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
