//! Scoped metadata cache with weak owner keys.
//!
//! Memoizes facts derived from a module scope (typically a framework version
//! read from packaging metadata) exactly once per scope. Entries hold only a
//! `Weak` reference to their owner, so caching never keeps a discarded scope
//! alive; stale entries are expunged on every write, on `len()` and by
//! `get_or_compute`, so a cache that is only read still lets them go.
//!
//! A stored value may itself be `None` ("computed, nothing found"). Callers
//! decide whether to compute with `contains_key`, never by checking `get`
//! for `None`, which would recompute absent answers on every call.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::trace;

use crate::scope::{ModuleScope, ScopeId};

struct Entry<V> {
    owner: Weak<ModuleScope>,
    value: Option<V>,
}

/// Cache keyed by owning scope, without pinning the owner
pub struct ScopedCache<V> {
    entries: RwLock<HashMap<ScopeId, Entry<V>>>,
}

impl<V: Clone> ScopedCache<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The memoized value, or `None` if never computed or computed-absent.
    pub fn get(&self, owner: &ModuleScope) -> Option<V> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&owner.id()).and_then(|e| e.value.clone())
    }

    /// Whether a value (possibly absent) has been stored for this owner.
    pub fn contains_key(&self, owner: &ModuleScope) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(&owner.id())
    }

    pub fn put(&self, owner: &Arc<ModuleScope>, value: Option<V>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        expunge(&mut entries);
        entries.insert(
            owner.id(),
            Entry {
                owner: Arc::downgrade(owner),
                value,
            },
        );
    }

    /// Return the memoized value, computing and storing it on first use.
    ///
    /// Concurrent first calls may both compute; the value is the same fact
    /// either way and the last write wins.
    pub fn get_or_compute<F>(&self, owner: &Arc<ModuleScope>, compute: F) -> Option<V>
    where
        F: FnOnce() -> Option<V>,
    {
        let (cached, stale) = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            (
                entries.get(&owner.id()).map(|e| e.value.clone()),
                entries.values().any(|e| e.owner.strong_count() == 0),
            )
        };
        if let Some(value) = cached {
            if stale {
                expunge(&mut self.entries.write().unwrap_or_else(PoisonError::into_inner));
            }
            return value;
        }
        let value = compute();
        self.put(owner, value.clone());
        value
    }

    /// Number of entries whose owner is still alive.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        expunge(&mut entries);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for ScopedCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn expunge<V>(entries: &mut HashMap<ScopeId, Entry<V>>) {
    let before = entries.len();
    entries.retain(|_, e| e.owner.strong_count() > 0);
    let removed = before - entries.len();
    if removed > 0 {
        trace!("Expunged {} cache entries of discarded scopes", removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_value_is_distinguished_from_never_computed() {
        let cache: ScopedCache<String> = ScopedCache::new();
        let scope = ModuleScope::new("jobs");

        assert!(!cache.contains_key(&scope));
        assert_eq!(cache.get(&scope), None);

        cache.put(&scope, None);
        assert!(cache.contains_key(&scope));
        assert_eq!(cache.get(&scope), None);
    }

    #[test]
    fn test_get_or_compute_runs_once_even_for_absent_values() {
        let cache: ScopedCache<String> = ScopedCache::new();
        let scope = ModuleScope::new("jobs");
        let mut calls = 0;

        for _ in 0..3 {
            let v = cache.get_or_compute(&scope, || {
                calls += 1;
                None
            });
            assert_eq!(v, None);
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_entries_do_not_pin_owner() {
        let cache: ScopedCache<String> = ScopedCache::new();
        let scope = ModuleScope::new("plugin");
        let weak = Arc::downgrade(&scope);
        cache.put(&scope, Some("1.0".into()));
        assert_eq!(cache.len(), 1);

        drop(scope);
        assert!(weak.upgrade().is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_hits_expunge_discarded_owners() {
        let cache: ScopedCache<String> = ScopedCache::new();
        let live = ModuleScope::new("live");
        let gone = ModuleScope::new("gone");
        cache.put(&live, Some("1".into()));
        cache.put(&gone, Some("2".into()));
        drop(gone);

        let raw_len = |c: &ScopedCache<String>| c.entries.read().unwrap().len();
        assert_eq!(raw_len(&cache), 2);

        let v = cache.get_or_compute(&live, || panic!("already cached"));
        assert_eq!(v.as_deref(), Some("1"));
        assert_eq!(raw_len(&cache), 1);
    }

    #[test]
    fn test_entries_are_per_owner() {
        let cache: ScopedCache<String> = ScopedCache::new();
        let a = ModuleScope::new("a");
        let b = ModuleScope::new("b");
        cache.put(&a, Some("1".into()));
        cache.put(&b, Some("2".into()));

        assert_eq!(cache.get(&a).as_deref(), Some("1"));
        assert_eq!(cache.get(&b).as_deref(), Some("2"));
    }
}
