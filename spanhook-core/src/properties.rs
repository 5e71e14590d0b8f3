//! Process-wide string properties.
//!
//! A small, thread-safe property table standing in for the host process's
//! system properties. The agent writes to the global instance at startup;
//! tests and tools create private instances for isolation.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

static GLOBAL: Lazy<SystemProperties> = Lazy::new(SystemProperties::new);

#[derive(Debug, Default)]
pub struct SystemProperties {
    values: RwLock<BTreeMap<String, String>>,
}

impl SystemProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide property table
    pub fn global() -> &'static SystemProperties {
        &GLOBAL
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn clear(&self, key: &str) -> Option<String> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Read-modify-write a single property under one lock acquisition.
    pub fn update<F>(&self, key: &str, f: F)
    where
        F: FnOnce(Option<&str>) -> Option<String>,
    {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        let next = f(values.get(key).map(String::as_str));
        match next {
            Some(v) => {
                values.insert(key.to_string(), v);
            }
            None => {
                values.remove(key);
            }
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
