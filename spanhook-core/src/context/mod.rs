//! Execution contexts: transactions, spans and per-thread activation.
//!
//! ```text
//! Tracer
//!   ├── start_root_transaction() -> Transaction (no parent)
//!   └── start_span()             -> Span (child of the active context)
//!
//! TraceContext lifecycle:  CREATED --activate--> ACTIVE --end--> ENDED
//! ```
//!
//! Activation is tracked per thread: the most recently activated context is
//! the "active" one and must be the one deactivated next.

mod activation;
mod reporter;
mod span;
mod tracer;

pub use activation::{active_context, activation_depth, is_active_on_current_thread};
pub use reporter::{ContextRecord, LoggingReporter, MemoryReporter, NoopReporter, Reporter};
pub use span::{ContextKind, ContextRef, ContextState, Outcome, TraceContext};
pub use tracer::Tracer;
