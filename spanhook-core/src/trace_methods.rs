//! Configuration-driven method tracing.
//!
//! Each `trace_methods` entry `TypePattern#methodPattern` becomes a
//! descriptor in the `method-matching` group. Matching calls start a
//! transaction when nothing is active on the thread and a child span of the
//! active context otherwise.

use std::sync::Arc;
use tracing::debug;

use crate::advice::{EntryFrame, ExitFrame};
use crate::context::ContextRef;
use crate::descriptor::InstrumentationDescriptor;
use crate::error::ConfigError;
use crate::matcher::{name_matches, name_starts_with, name_starts_with_ignore_case, WildcardMatcher};

pub const TRACE_METHODS_GROUP: &str = "method-matching";
const DESCRIPTOR_PREFIX: &str = "trace-methods:";

/// One parsed `trace_methods` entry
#[derive(Debug, Clone, PartialEq)]
pub struct TraceMethodsEntry {
    raw: String,
    type_pattern: WildcardMatcher,
    method_pattern: WildcardMatcher,
}

impl TraceMethodsEntry {
    pub fn parse(entry: &str) -> Result<Self, ConfigError> {
        let raw = entry.trim();
        let invalid = |reason: &str| ConfigError::InvalidTraceMethod {
            entry: entry.to_string(),
            reason: reason.to_string(),
        };
        if raw.is_empty() {
            return Err(invalid("entry is empty"));
        }

        let (type_part, method_part) = match raw.split_once('#') {
            Some((t, m)) => (t.trim(), m.trim()),
            None => (raw, ""),
        };
        if type_part.is_empty() {
            return Err(invalid("missing type pattern before '#'"));
        }
        if method_part.contains('#') {
            return Err(invalid("more than one '#'"));
        }
        let method_part = if method_part.is_empty() { "*" } else { method_part };

        Ok(Self {
            raw: raw.to_string(),
            type_pattern: WildcardMatcher::parse(type_part)?,
            method_pattern: WildcardMatcher::parse(method_part)?,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn type_pattern(&self) -> &WildcardMatcher {
        &self.type_pattern
    }

    pub fn method_pattern(&self) -> &WildcardMatcher {
        &self.method_pattern
    }

    pub fn descriptor_name(&self) -> String {
        format!("{DESCRIPTOR_PREFIX}{}", self.raw)
    }

    pub fn into_descriptor(self) -> Arc<InstrumentationDescriptor> {
        let mut builder = InstrumentationDescriptor::builder(self.descriptor_name())
            .group(TRACE_METHODS_GROUP)
            .type_matcher(name_matches(self.type_pattern.clone()))
            .method_matcher(name_matches(self.method_pattern.clone()))
            .on_enter(on_enter)
            .on_exit(on_exit);
        if let Some(prefix) = self.type_pattern.literal_prefix() {
            builder = builder.prefilter(if self.type_pattern.is_case_sensitive() {
                name_starts_with(prefix)
            } else {
                name_starts_with_ignore_case(prefix)
            });
        }
        builder.build()
    }
}

/// Whether a descriptor name was produced from a `trace_methods` entry
pub fn is_trace_methods_descriptor(name: &str) -> bool {
    name.starts_with(DESCRIPTOR_PREFIX)
}

/// Build one descriptor per entry, failing on the first malformed entry
pub fn build_descriptors<S: AsRef<str>>(
    entries: &[S],
) -> Result<Vec<Arc<InstrumentationDescriptor>>, ConfigError> {
    entries
        .iter()
        .map(|e| TraceMethodsEntry::parse(e.as_ref()).map(TraceMethodsEntry::into_descriptor))
        .collect()
}

fn on_enter(frame: &mut EntryFrame<'_>) -> anyhow::Result<()> {
    let tracer = frame.tracer();
    let context = match tracer.active() {
        Some(_) => tracer.start_span(),
        None => tracer.start_root_transaction(),
    };
    let Some(context) = context else {
        return Ok(());
    };
    context
        .with_name(frame.unit().simple_signature())
        .with_type("method")
        .activate();
    debug!(span_id = %context.span_id(), kind = ?context.kind(), "Tracing {}", frame.unit().signature());
    frame.set_local(context);
    Ok(())
}

fn on_exit(frame: &mut ExitFrame<'_>) -> anyhow::Result<()> {
    if let Some(context) = frame.take_local::<ContextRef>() {
        context
            .capture_exception(frame.thrown())
            .deactivate()
            .end();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enablement::EnablementState;
    use crate::matcher;
    use crate::unit::{MethodDescription, TypeDescription, UnitDescription};

    fn unit(type_name: &str, method: &str) -> UnitDescription {
        UnitDescription::new(TypeDescription::new(type_name), MethodDescription::new(method))
    }

    #[test]
    fn test_parse_entry() {
        let entry = TraceMethodsEntry::parse(" com.acme.*Service#handle* ").unwrap();
        assert_eq!(entry.raw(), "com.acme.*Service#handle*");
        assert_eq!(entry.type_pattern().pattern(), "com.acme.*Service");
        assert_eq!(entry.method_pattern().pattern(), "handle*");
        assert_eq!(entry.descriptor_name(), "trace-methods:com.acme.*Service#handle*");

        let any_method = TraceMethodsEntry::parse("com.acme.Billing").unwrap();
        assert_eq!(any_method.method_pattern().pattern(), "*");
    }

    #[test]
    fn test_parse_rejects_malformed_entries() {
        for bad in ["", "   ", "#run", "a.B#c#d"] {
            assert!(
                matches!(
                    TraceMethodsEntry::parse(bad),
                    Err(ConfigError::InvalidTraceMethod { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_descriptor_matching() {
        let descriptors = build_descriptors(&["com.acme.*Service#handle*"]).unwrap();
        let d = &descriptors[0];
        let state = EnablementState::new();

        assert_eq!(d.groups(), [TRACE_METHODS_GROUP]);
        assert!(matcher::matches(d, &unit("com.acme.billing.InvoiceService", "handleInvoice"), &state));
        assert!(matcher::matches(d, &unit("COM.ACME.billing.InvoiceService", "handleInvoice"), &state));
        assert!(!matcher::matches(d, &unit("com.acme.billing.InvoiceService", "close"), &state));
        assert!(!d.prefilter().unwrap().test("org.other.Service"));
    }

    #[test]
    fn test_case_sensitive_prefilter() {
        let descriptors = build_descriptors(&["(?-i)com.acme.Job#run"]).unwrap();
        let prefilter = descriptors[0].prefilter().unwrap();
        assert!(prefilter.test("com.acme.Job"));
        assert!(!prefilter.test("COM.ACME.Job"));
        assert!(is_trace_methods_descriptor(descriptors[0].name()));
    }
}
