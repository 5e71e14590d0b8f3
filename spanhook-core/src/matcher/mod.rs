//! Matching engine: decides whether a descriptor applies to a program unit.
//!
//! Evaluation order is fixed and short-circuits: name prefilter, exclusion
//! lists, type predicate, method predicate. The cheap string checks run
//! first so most units are rejected without looking at supertypes.

pub mod predicate;
pub mod wildcard;

use serde::Serialize;
use std::fmt;

pub use predicate::{
    has_super_type, name_ends_with_ignore_case, name_matches, name_starts_with,
    name_starts_with_ignore_case, named, takes_argument_count, takes_arguments, NamedElement,
    Predicate,
};
pub use wildcard::WildcardMatcher;

use crate::descriptor::InstrumentationDescriptor;
use crate::enablement::EnablementState;
use crate::unit::UnitDescription;

/// Outcome of matching one descriptor against one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchVerdict {
    Matched,
    PrefilterRejected,
    Excluded,
    TypeRejected,
    MethodRejected,
}

impl MatchVerdict {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchVerdict::Matched)
    }
}

impl fmt::Display for MatchVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchVerdict::Matched => "matched",
            MatchVerdict::PrefilterRejected => "prefilter rejected",
            MatchVerdict::Excluded => "excluded",
            MatchVerdict::TypeRejected => "type rejected",
            MatchVerdict::MethodRejected => "method rejected",
        };
        f.write_str(s)
    }
}

/// Full evaluation of one descriptor against one unit.
///
/// Group enablement is not checked here; callers filter descriptors through
/// `EnablementState::is_descriptor_enabled` first.
pub fn evaluate(
    descriptor: &InstrumentationDescriptor,
    unit: &UnitDescription,
    state: &EnablementState,
) -> MatchVerdict {
    if !passes_prefilter(descriptor, unit) {
        return MatchVerdict::PrefilterRejected;
    }
    if state.is_excluded(unit.type_name()) {
        return MatchVerdict::Excluded;
    }
    evaluate_predicates(descriptor, unit)
}

pub fn matches(
    descriptor: &InstrumentationDescriptor,
    unit: &UnitDescription,
    state: &EnablementState,
) -> bool {
    evaluate(descriptor, unit, state).is_match()
}

/// Prefilter, type and method checks only. Used once the unit is known not to be excluded.
pub(crate) fn evaluate_unexcluded(
    descriptor: &InstrumentationDescriptor,
    unit: &UnitDescription,
) -> MatchVerdict {
    if !passes_prefilter(descriptor, unit) {
        return MatchVerdict::PrefilterRejected;
    }
    evaluate_predicates(descriptor, unit)
}

fn passes_prefilter(descriptor: &InstrumentationDescriptor, unit: &UnitDescription) -> bool {
    descriptor
        .prefilter()
        .map_or(true, |p| p.test(unit.type_name()))
}

fn evaluate_predicates(
    descriptor: &InstrumentationDescriptor,
    unit: &UnitDescription,
) -> MatchVerdict {
    if !descriptor.type_matcher().test(&unit.type_description) {
        return MatchVerdict::TypeRejected;
    }
    if !descriptor.method_matcher().test(&unit.method) {
        return MatchVerdict::MethodRejected;
    }
    MatchVerdict::Matched
}
