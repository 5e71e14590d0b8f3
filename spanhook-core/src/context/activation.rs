//! Per-thread activation stack.
//!
//! A logical execution path is a thread here. Contexts are pushed on
//! activation and must be popped in LIFO order.

use std::cell::RefCell;
use std::sync::Arc;

use super::span::ContextRef;
use crate::error::UsageError;

thread_local! {
    static ACTIVE_STACK: RefCell<Vec<ContextRef>> = const { RefCell::new(Vec::new()) };
}

/// The context most recently activated on this thread and not yet deactivated
pub fn active_context() -> Option<ContextRef> {
    ACTIVE_STACK.with(|stack| stack.borrow().last().cloned())
}

pub fn activation_depth() -> usize {
    ACTIVE_STACK.with(|stack| stack.borrow().len())
}

pub fn is_active_on_current_thread(context: &ContextRef) -> bool {
    ACTIVE_STACK.with(|stack| stack.borrow().iter().any(|c| Arc::ptr_eq(c, context)))
}

pub(crate) fn push(context: ContextRef) {
    ACTIVE_STACK.with(|stack| stack.borrow_mut().push(context));
}

/// Pop `context` if it is on top of this thread's stack
pub(crate) fn pop_if_top(context: &ContextRef) -> Result<(), UsageError> {
    let popped = ACTIVE_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        match stack.last() {
            Some(top) if Arc::ptr_eq(top, context) => stack.pop(),
            _ => None,
        }
    });
    match popped {
        Some(_) => Ok(()),
        None => Err(UsageError::NotOnTop {
            span_id: context.span_id().to_string(),
        }),
    }
}

/// Remove every occurrence of `context` from this thread's stack, returning how many were removed
pub(crate) fn remove(context: &ContextRef) -> usize {
    let removed = ACTIVE_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        let (gone, kept): (Vec<_>, Vec<_>) = stack.drain(..).partition(|c| Arc::ptr_eq(c, context));
        *stack = kept;
        gone
    });
    removed.len()
}
