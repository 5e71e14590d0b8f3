//! Module scopes - the owners of dynamically loaded program units.
//!
//! A scope plays the role of a class loader or dynamically loaded module: it
//! owns the units it defines and carries the packaging metadata (artifact
//! coordinates and versions) shipped with them. Scopes are shared as `Arc`
//! and identified by a process-unique id that is never reused.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a module scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    fn next() -> Self {
        Self(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// Owner of a set of program units
#[derive(Debug)]
pub struct ModuleScope {
    id: ScopeId,
    name: String,
    /// "group:artifact" -> version, as found in the packaging metadata
    packaging: HashMap<String, String>,
}

impl ModuleScope {
    /// Create a scope without packaging metadata.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_packaging(name, std::iter::empty::<(String, String)>())
    }

    /// Create a scope whose packaging metadata lists the given
    /// `("group:artifact", version)` coordinates.
    pub fn with_packaging<K, V>(
        name: impl Into<String>,
        packaging: impl IntoIterator<Item = (K, V)>,
    ) -> Arc<Self>
    where
        K: Into<String>,
        V: Into<String>,
    {
        Arc::new(Self {
            id: ScopeId::next(),
            name: name.into(),
            packaging: packaging
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        })
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up an artifact version in the packaging metadata.
    ///
    /// This is the expensive operation the scoped cache memoizes; a missing
    /// artifact is a legitimate `None` answer.
    pub fn version_of(&self, group_id: &str, artifact_id: &str) -> Option<String> {
        self.packaging
            .get(&format!("{group_id}:{artifact_id}"))
            .filter(|v| !v.trim().is_empty())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_ids_are_unique() {
        let a = ModuleScope::new("a");
        let b = ModuleScope::new("b");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.name(), "a");
    }

    #[test]
    fn test_version_lookup() {
        let scope = ModuleScope::with_packaging(
            "scheduler",
            [("org.quartz-scheduler:quartz", "2.3.2"), ("empty:blank", " ")],
        );

        assert_eq!(
            scope.version_of("org.quartz-scheduler", "quartz").as_deref(),
            Some("2.3.2")
        );
        assert_eq!(scope.version_of("org.quartz-scheduler", "jobs"), None);
        assert_eq!(scope.version_of("empty", "blank"), None);
    }
}
