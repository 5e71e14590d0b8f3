//! Which descriptors are allowed to intercept anything right now.
//!
//! An `EnablementState` is an immutable snapshot derived from configuration.
//! The controller holds the current snapshot in an `EnablementCell` and
//! replaces it wholesale on reconfiguration, so a matching pass always sees
//! one consistent state.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::AgentConfig;
use crate::descriptor::InstrumentationDescriptor;
use crate::error::ConfigError;
use crate::matcher::WildcardMatcher;

/// Legacy group names and the names that replaced them
pub const LEGACY_GROUP_ALIASES: &[(&str, &str)] = &[("incubating", "experimental")];

fn canonical_group(name: &str) -> &str {
    LEGACY_GROUP_ALIASES
        .iter()
        .find(|(legacy, _)| *legacy == name)
        .map(|(_, current)| *current)
        .unwrap_or(name)
}

#[derive(Debug, Clone)]
pub struct EnablementState {
    instrument: bool,
    disabled_groups: HashSet<String>,
    enabled_groups: HashSet<String>,
    excluded: Vec<WildcardMatcher>,
    default_excluded: Vec<WildcardMatcher>,
}

impl Default for EnablementState {
    fn default() -> Self {
        Self {
            instrument: true,
            disabled_groups: HashSet::new(),
            enabled_groups: HashSet::new(),
            excluded: Vec::new(),
            default_excluded: Vec::new(),
        }
    }
}

impl EnablementState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a snapshot from configuration, compiling all exclusion patterns
    pub fn from_config(config: &AgentConfig) -> Result<Self, ConfigError> {
        Ok(Self::new()
            .with_instrument(config.instrument)
            .with_disabled_groups(&config.disabled_instrumentations)
            .with_enabled_groups(&config.enable_instrumentations)
            .with_excluded(WildcardMatcher::parse_all(
                &config.classes_excluded_from_instrumentation,
            )?)
            .with_default_excluded(WildcardMatcher::parse_all(
                &config.default_classes_excluded_from_instrumentation,
            )?))
    }

    pub fn with_instrument(mut self, instrument: bool) -> Self {
        self.instrument = instrument;
        self
    }

    pub fn with_disabled_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.disabled_groups = groups
            .into_iter()
            .map(|g| canonical_group(g.as_ref().trim()).to_string())
            .collect();
        self
    }

    pub fn with_enabled_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.enabled_groups = groups
            .into_iter()
            .map(|g| canonical_group(g.as_ref().trim()).to_string())
            .collect();
        self
    }

    pub fn with_excluded(mut self, excluded: Vec<WildcardMatcher>) -> Self {
        self.excluded = excluded;
        self
    }

    pub fn with_default_excluded(mut self, excluded: Vec<WildcardMatcher>) -> Self {
        self.default_excluded = excluded;
        self
    }

    pub fn instrument(&self) -> bool {
        self.instrument
    }

    /// True when `group`, or the name it replaced or was replaced by, is disabled
    pub fn is_group_disabled(&self, group: &str) -> bool {
        self.disabled_groups.contains(canonical_group(group))
    }

    fn is_group_enabled(&self, group: &str) -> bool {
        self.enabled_groups.contains(canonical_group(group))
    }

    /// Whether `descriptor` may intercept anything under this snapshot.
    ///
    /// A descriptor is disabled if any of its groups is disabled. Descriptors
    /// that are off by default need one of their groups opted in.
    pub fn is_descriptor_enabled(&self, descriptor: &InstrumentationDescriptor) -> bool {
        if !self.instrument {
            return false;
        }
        let groups = descriptor.groups();
        if groups.iter().any(|g| self.is_group_disabled(g)) {
            return false;
        }
        descriptor.enabled_by_default() || groups.iter().any(|g| self.is_group_enabled(g))
    }

    /// Whether a fully qualified type name is excluded from all interception
    pub fn is_excluded(&self, type_name: &str) -> bool {
        self.exclusion_for(type_name).is_some()
    }

    /// The first user or built-in pattern that excludes `type_name`
    pub fn exclusion_for(&self, type_name: &str) -> Option<&WildcardMatcher> {
        self.excluded
            .iter()
            .chain(self.default_excluded.iter())
            .find(|m| m.matches(type_name))
    }
}

/// Holder for the current snapshot. Readers get a cheap `Arc` clone.
#[derive(Debug)]
pub struct EnablementCell {
    current: RwLock<Arc<EnablementState>>,
}

impl EnablementCell {
    pub fn new(state: EnablementState) -> Self {
        Self {
            current: RwLock::new(Arc::new(state)),
        }
    }

    pub fn load(&self) -> Arc<EnablementState> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replace the snapshot, returning the previous one
    pub fn swap(&self, state: EnablementState) -> Arc<EnablementState> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(groups: &[&str], enabled_by_default: bool) -> Arc<InstrumentationDescriptor> {
        InstrumentationDescriptor::builder("test")
            .groups(groups.iter().copied())
            .enabled_by_default(enabled_by_default)
            .build()
    }

    #[test]
    fn test_any_disabled_group_disables_descriptor() {
        let state = EnablementState::new().with_disabled_groups(["quartz"]);
        assert!(!state.is_descriptor_enabled(&descriptor(&["scheduling", "quartz"], true)));
        assert!(state.is_descriptor_enabled(&descriptor(&["scheduling"], true)));
        assert!(state.is_descriptor_enabled(&descriptor(&[], true)));
    }

    #[test]
    fn test_legacy_group_alias_both_directions() {
        let legacy = EnablementState::new().with_disabled_groups(["incubating"]);
        assert!(!legacy.is_descriptor_enabled(&descriptor(&["experimental"], true)));
        assert!(!legacy.is_descriptor_enabled(&descriptor(&["incubating"], true)));

        let current = EnablementState::new().with_disabled_groups(["experimental"]);
        assert!(!current.is_descriptor_enabled(&descriptor(&["incubating"], true)));
    }

    #[test]
    fn test_instrument_off_disables_everything() {
        let state = EnablementState::new().with_instrument(false);
        assert!(!state.is_descriptor_enabled(&descriptor(&[], true)));
    }

    #[test]
    fn test_default_off_descriptor_needs_opt_in() {
        let d = descriptor(&["experimental"], false);
        assert!(!EnablementState::new().is_descriptor_enabled(&d));

        let opted_in = EnablementState::new().with_enabled_groups(["incubating"]);
        assert!(opted_in.is_descriptor_enabled(&d));

        let conflicting = opted_in.with_disabled_groups(["experimental"]);
        assert!(!conflicting.is_descriptor_enabled(&d));
    }

    #[test]
    fn test_from_config_compiles_exclusions() {
        let config = AgentConfig {
            classes_excluded_from_instrumentation: vec!["com.acme.internal.*".to_string()],
            ..AgentConfig::default()
        };
        let state = EnablementState::from_config(&config).unwrap();

        assert!(state.is_excluded("com.acme.internal.Cache"));
        assert!(state.is_excluded("spanhook.agent.Bootstrap"));
        assert!(state.is_excluded("com.acme.Service$$Proxy1"));
        assert!(!state.is_excluded("com.acme.Service"));
        assert_eq!(
            state.exclusion_for("com.acme.internal.Cache").map(|m| m.pattern()),
            Some("com.acme.internal.*")
        );
    }

    #[test]
    fn test_cell_swap_replaces_snapshot() {
        let cell = EnablementCell::new(EnablementState::new());
        let before = cell.load();
        let previous = cell.swap(EnablementState::new().with_instrument(false));

        assert!(previous.instrument());
        assert!(before.instrument());
        assert!(!cell.load().instrument());
    }
}
