//! Instrumentation descriptors - one interceptable behavior each.
//!
//! A descriptor composes a cheap name prefilter, a type predicate, a method
//! predicate, group tags and the entry/exit hooks to run. Descriptors are
//! immutable once built and are identified by name: registering a second
//! descriptor with the same name is a no-op.

use std::fmt;
use std::sync::Arc;

use crate::advice::{EntryFrame, EntryHook, ExitFrame, ExitHook};
use crate::matcher::Predicate;
use crate::unit::{MethodDescription, TypeDescription};

pub struct InstrumentationDescriptor {
    name: String,
    prefilter: Option<Predicate<str>>,
    type_matcher: Predicate<TypeDescription>,
    method_matcher: Predicate<MethodDescription>,
    groups: Vec<String>,
    enabled_by_default: bool,
    suppress_body_failures: bool,
    on_enter: Option<EntryHook>,
    on_exit: Option<ExitHook>,
}

impl InstrumentationDescriptor {
    pub fn builder(name: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            name: name.into(),
            prefilter: None,
            type_matcher: Predicate::none(),
            method_matcher: Predicate::any(),
            groups: Vec::new(),
            enabled_by_default: true,
            suppress_body_failures: false,
            on_enter: None,
            on_exit: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cheap filter over the fully qualified type name, evaluated first
    pub fn prefilter(&self) -> Option<&Predicate<str>> {
        self.prefilter.as_ref()
    }

    pub fn type_matcher(&self) -> &Predicate<TypeDescription> {
        &self.type_matcher
    }

    pub fn method_matcher(&self) -> &Predicate<MethodDescription> {
        &self.method_matcher
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn enabled_by_default(&self) -> bool {
        self.enabled_by_default
    }

    /// Whether failures of the original body are swallowed too
    pub fn suppresses_body_failures(&self) -> bool {
        self.suppress_body_failures
    }

    pub fn on_enter(&self) -> Option<&EntryHook> {
        self.on_enter.as_ref()
    }

    pub fn on_exit(&self) -> Option<&ExitHook> {
        self.on_exit.as_ref()
    }
}

impl fmt::Debug for InstrumentationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentationDescriptor")
            .field("name", &self.name)
            .field("prefilter", &self.prefilter)
            .field("type_matcher", &self.type_matcher)
            .field("method_matcher", &self.method_matcher)
            .field("groups", &self.groups)
            .field("enabled_by_default", &self.enabled_by_default)
            .field("suppress_body_failures", &self.suppress_body_failures)
            .finish_non_exhaustive()
    }
}

pub struct DescriptorBuilder {
    name: String,
    prefilter: Option<Predicate<str>>,
    type_matcher: Predicate<TypeDescription>,
    method_matcher: Predicate<MethodDescription>,
    groups: Vec<String>,
    enabled_by_default: bool,
    suppress_body_failures: bool,
    on_enter: Option<EntryHook>,
    on_exit: Option<ExitHook>,
}

impl DescriptorBuilder {
    pub fn prefilter(mut self, prefilter: Predicate<str>) -> Self {
        self.prefilter = Some(prefilter);
        self
    }

    pub fn type_matcher(mut self, matcher: Predicate<TypeDescription>) -> Self {
        self.type_matcher = matcher;
        self
    }

    pub fn method_matcher(mut self, matcher: Predicate<MethodDescription>) -> Self {
        self.method_matcher = matcher;
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        let group = group.into();
        if !self.groups.contains(&group) {
            self.groups.push(group);
        }
        self
    }

    pub fn groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for group in groups {
            self = self.group(group);
        }
        self
    }

    pub fn enabled_by_default(mut self, enabled: bool) -> Self {
        self.enabled_by_default = enabled;
        self
    }

    /// Declare that failures of the original body should be suppressed as well
    pub fn suppress_body_failures(mut self, suppress: bool) -> Self {
        self.suppress_body_failures = suppress;
        self
    }

    pub fn on_enter<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut EntryFrame<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_enter = Some(Arc::new(hook));
        self
    }

    pub fn on_exit<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut ExitFrame<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_exit = Some(Arc::new(hook));
        self
    }

    /// Install a prepared hook pair
    pub fn hooks(mut self, hooks: (EntryHook, ExitHook)) -> Self {
        self.on_enter = Some(hooks.0);
        self.on_exit = Some(hooks.1);
        self
    }

    pub fn build(self) -> Arc<InstrumentationDescriptor> {
        Arc::new(InstrumentationDescriptor {
            name: self.name,
            prefilter: self.prefilter,
            type_matcher: self.type_matcher,
            method_matcher: self.method_matcher,
            groups: self.groups,
            enabled_by_default: self.enabled_by_default,
            suppress_body_failures: self.suppress_body_failures,
            on_enter: self.on_enter,
            on_exit: self.on_exit,
        })
    }
}
