//! Entry/exit hook contract.
//!
//! Every intercepted call runs each matching descriptor's entry hook before
//! the original body and its exit hook after it, in reverse order. Hooks get
//! a frame describing the call and a per-call, per-descriptor local slot that
//! carries state (usually the started context) from entry to exit.
//!
//! Hooks are guarded: an `Err` or a panic inside a hook is logged and
//! swallowed, and the host call continues as if the hook had not run. Exit
//! hooks see the body's return value (writable) or its failure (read-only);
//! return-value edits from a failing exit hook are discarded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

use crate::context::Tracer;
use crate::unit::UnitDescription;

pub mod transaction;

pub use transaction::TransactionAdvice;

/// A failure raised by an intercepted body: the thrown exception of the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Failure class, e.g. `NullPointerException` or `io.Timeout`
    pub kind: String,
    pub message: String,
}

impl Failure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Failure {}

/// Call-scoped storage shared by one descriptor's entry and exit hook
pub type LocalSlot = Option<Box<dyn Any + Send>>;

pub type EntryHook = Arc<dyn Fn(&mut EntryFrame<'_>) -> anyhow::Result<()> + Send + Sync>;
pub type ExitHook = Arc<dyn Fn(&mut ExitFrame<'_>) -> anyhow::Result<()> + Send + Sync>;

/// What an entry hook sees
pub struct EntryFrame<'a> {
    unit: &'a UnitDescription,
    args: &'a [Value],
    tracer: &'a Tracer,
    local: &'a mut LocalSlot,
}

impl<'a> EntryFrame<'a> {
    pub(crate) fn new(
        unit: &'a UnitDescription,
        args: &'a [Value],
        tracer: &'a Tracer,
        local: &'a mut LocalSlot,
    ) -> Self {
        Self {
            unit,
            args,
            tracer,
            local,
        }
    }

    /// The intercepted unit (the "origin" of the call)
    pub fn unit(&self) -> &UnitDescription {
        self.unit
    }

    pub fn args(&self) -> &[Value] {
        self.args
    }

    /// Argument `index`, treating JSON null like a missing argument
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index).filter(|v| !v.is_null())
    }

    pub fn tracer(&self) -> &Tracer {
        self.tracer
    }

    /// Store a value for this descriptor's exit hook
    pub fn set_local<T: Any + Send>(&mut self, value: T) {
        *self.local = Some(Box::new(value));
    }
}

/// What an exit hook sees
pub struct ExitFrame<'a> {
    unit: &'a UnitDescription,
    args: &'a [Value],
    tracer: &'a Tracer,
    local: &'a mut LocalSlot,
    return_value: &'a mut Value,
    thrown: Option<&'a Failure>,
}

impl<'a> ExitFrame<'a> {
    pub(crate) fn new(
        unit: &'a UnitDescription,
        args: &'a [Value],
        tracer: &'a Tracer,
        local: &'a mut LocalSlot,
        return_value: &'a mut Value,
        thrown: Option<&'a Failure>,
    ) -> Self {
        Self {
            unit,
            args,
            tracer,
            local,
            return_value,
            thrown,
        }
    }

    pub fn unit(&self) -> &UnitDescription {
        self.unit
    }

    pub fn args(&self) -> &[Value] {
        self.args
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index).filter(|v| !v.is_null())
    }

    pub fn tracer(&self) -> &Tracer {
        self.tracer
    }

    pub fn local<T: Any>(&self) -> Option<&T> {
        self.local.as_ref()?.downcast_ref::<T>()
    }

    /// Move the entry hook's value out of the slot
    pub fn take_local<T: Any>(&mut self) -> Option<T> {
        let boxed = self.local.take()?;
        match boxed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                *self.local = Some(other);
                None
            }
        }
    }

    /// The body's return value; `Value::Null` when the body failed
    pub fn return_value(&self) -> &Value {
        self.return_value
    }

    pub fn set_return_value(&mut self, value: Value) {
        *self.return_value = value;
    }

    /// The body's failure, if it failed
    pub fn thrown(&self) -> Option<&Failure> {
        self.thrown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Enter,
    Exit,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::Enter => f.write_str("entry"),
            HookPhase::Exit => f.write_str("exit"),
        }
    }
}

/// Run a hook, swallowing errors and panics. Returns whether it succeeded.
pub(crate) fn run_suppressed<F>(
    phase: HookPhase,
    descriptor: &str,
    unit: &UnitDescription,
    hook: F,
) -> bool
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(
                descriptor,
                unit = %unit.signature(),
                "Suppressed failure in {} hook: {:#}",
                phase,
                e
            );
            false
        }
        Err(payload) => {
            warn!(
                descriptor,
                unit = %unit.signature(),
                "Suppressed panic in {} hook: {}",
                phase,
                panic_message(payload.as_ref())
            );
            false
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
