//! Memoization per module scope without keeping scopes alive

mod common;

use common::init_test_logging;
use spanhook_core::cache::ScopedCache;
use spanhook_core::ModuleScope;
use std::sync::Arc;
use std::thread;

#[test]
fn test_computed_absent_differs_from_never_computed() {
    init_test_logging();
    let cache: ScopedCache<String> = ScopedCache::new();
    let scope = ModuleScope::new("webapp");

    assert!(!cache.contains_key(&scope));
    assert_eq!(cache.get(&scope), None);

    cache.put(&scope, None);
    assert!(cache.contains_key(&scope));
    assert_eq!(cache.get(&scope), None);
}

#[test]
fn test_dropped_scope_is_reclaimed() {
    init_test_logging();
    let cache: ScopedCache<String> = ScopedCache::new();
    let keep = ModuleScope::new("kept");
    let discard = ModuleScope::new("discarded");
    cache.put(&keep, Some("1.0".to_string()));
    cache.put(&discard, Some("2.0".to_string()));
    let weak = Arc::downgrade(&discard);

    drop(discard);
    assert!(weak.upgrade().is_none());
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get(&keep).as_deref(), Some("1.0"));
}

#[test]
fn test_concurrent_readers_see_one_value() {
    init_test_logging();
    let cache = Arc::new(ScopedCache::<String>::new());
    let scope = ModuleScope::new("shared");
    cache.put(&scope, Some("3.1".to_string()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let scope = Arc::clone(&scope);
            thread::spawn(move || cache.get(&scope))
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().as_deref(), Some("3.1"));
    }
}
