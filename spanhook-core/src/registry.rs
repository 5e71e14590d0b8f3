//! Registry of known instrumentation descriptors.
//!
//! Registration is idempotent by descriptor name. The registry itself is not
//! filtered by configuration; `active_descriptors` applies an enablement
//! snapshot on top of it.

use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use crate::descriptor::InstrumentationDescriptor;
use crate::enablement::EnablementState;

#[derive(Debug, Default)]
pub struct InstrumentationRegistry {
    descriptors: RwLock<Vec<Arc<InstrumentationDescriptor>>>,
}

impl InstrumentationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Returns false if one with the same name exists.
    pub fn register(&self, descriptor: Arc<InstrumentationDescriptor>) -> bool {
        let mut descriptors = self
            .descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if descriptors.iter().any(|d| d.name() == descriptor.name()) {
            debug!(name = descriptor.name(), "Descriptor already registered");
            return false;
        }
        debug!(name = descriptor.name(), groups = ?descriptor.groups(), "Registered descriptor");
        descriptors.push(descriptor);
        true
    }

    /// Register several descriptors, returning the ones that were new
    pub fn register_all<I>(&self, descriptors: I) -> Vec<Arc<InstrumentationDescriptor>>
    where
        I: IntoIterator<Item = Arc<InstrumentationDescriptor>>,
    {
        let added: Vec<_> = descriptors
            .into_iter()
            .filter(|d| self.register(Arc::clone(d)))
            .collect();
        if !added.is_empty() {
            info!(count = added.len(), "Registered instrumentation descriptors");
        }
        added
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<InstrumentationDescriptor>> {
        let mut descriptors = self
            .descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let index = descriptors.iter().position(|d| d.name() == name)?;
        debug!(name, "Unregistered descriptor");
        Some(descriptors.remove(index))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<InstrumentationDescriptor>> {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|d| d.name() == name)
            .cloned()
    }

    /// All descriptors, in registration order
    pub fn all(&self) -> Vec<Arc<InstrumentationDescriptor>> {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Descriptors allowed to intercept under `state`, in registration order
    pub fn active_descriptors(&self, state: &EnablementState) -> Vec<Arc<InstrumentationDescriptor>> {
        if !state.instrument() {
            return Vec::new();
        }
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|d| state.is_descriptor_enabled(d))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
