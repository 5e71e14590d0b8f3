//! Composable predicates over unit descriptions.
//!
//! A `Predicate<T>` is a named, shareable, side-effect free test. The
//! element helpers below cover the usual selection vocabulary (exact name,
//! name prefix/suffix, supertype, parameter list) and combine with
//! `and`/`or`/`negate`. Combinators short-circuit left to right.

use std::fmt;
use std::sync::Arc;

use super::wildcard::WildcardMatcher;
use crate::unit::{MethodDescription, TypeDescription};

/// Anything with a name a matcher can look at
pub trait NamedElement {
    fn element_name(&self) -> &str;
}

impl NamedElement for str {
    fn element_name(&self) -> &str {
        self
    }
}

impl NamedElement for TypeDescription {
    fn element_name(&self) -> &str {
        &self.name
    }
}

impl NamedElement for MethodDescription {
    fn element_name(&self) -> &str {
        &self.name
    }
}

pub struct Predicate<T: ?Sized> {
    description: Arc<str>,
    test: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: ?Sized> Clone for Predicate<T> {
    fn clone(&self) -> Self {
        Self {
            description: Arc::clone(&self.description),
            test: Arc::clone(&self.test),
        }
    }
}

impl<T: ?Sized + 'static> Predicate<T> {
    pub fn new<F>(description: impl Into<String>, test: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            description: Arc::from(description.into()),
            test: Arc::new(test),
        }
    }

    pub fn any() -> Self {
        Self::new("any()", |_| true)
    }

    pub fn none() -> Self {
        Self::new("none()", |_| false)
    }

    pub fn test(&self, value: &T) -> bool {
        (self.test)(value)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn and(self, other: Predicate<T>) -> Self {
        let description = format!("{}.and({})", self.description, other.description);
        Self::new(description, move |v| self.test(v) && other.test(v))
    }

    pub fn or(self, other: Predicate<T>) -> Self {
        let description = format!("{}.or({})", self.description, other.description);
        Self::new(description, move |v| self.test(v) || other.test(v))
    }

    pub fn negate(self) -> Self {
        let description = format!("not({})", self.description);
        Self::new(description, move |v| !self.test(v))
    }
}

impl<T: ?Sized> fmt::Debug for Predicate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

pub fn named<T: NamedElement + ?Sized + 'static>(name: &str) -> Predicate<T> {
    let expected = name.to_string();
    Predicate::new(format!("named({name})"), move |e: &T| {
        e.element_name() == expected
    })
}

pub fn name_starts_with<T: NamedElement + ?Sized + 'static>(prefix: &str) -> Predicate<T> {
    let prefix = prefix.to_string();
    Predicate::new(format!("nameStartsWith({prefix})"), move |e: &T| {
        e.element_name().starts_with(&prefix)
    })
}

pub fn name_starts_with_ignore_case<T: NamedElement + ?Sized + 'static>(prefix: &str) -> Predicate<T> {
    let prefix = prefix.to_ascii_lowercase();
    Predicate::new(format!("nameStartsWithIgnoreCase({prefix})"), move |e: &T| {
        let name = e.element_name();
        name.len() >= prefix.len()
            && name.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
    })
}

pub fn name_ends_with_ignore_case<T: NamedElement + ?Sized + 'static>(suffix: &str) -> Predicate<T> {
    let suffix = suffix.to_ascii_lowercase();
    Predicate::new(format!("nameEndsWithIgnoreCase({suffix})"), move |e: &T| {
        e.element_name().to_ascii_lowercase().ends_with(&suffix)
    })
}

pub fn name_matches<T: NamedElement + ?Sized + 'static>(matcher: WildcardMatcher) -> Predicate<T> {
    Predicate::new(format!("nameMatches({matcher})"), move |e: &T| {
        matcher.matches(e.element_name())
    })
}

/// Type is `name` or inherits from it
pub fn has_super_type(name: &str) -> Predicate<TypeDescription> {
    let expected = name.to_string();
    Predicate::new(format!("hasSuperType({name})"), move |t: &TypeDescription| {
        t.is_assignable_to(&expected)
    })
}

/// Method takes exactly these parameter types, in order
pub fn takes_arguments(parameter_types: &[&str]) -> Predicate<MethodDescription> {
    let expected: Vec<String> = parameter_types.iter().map(|s| s.to_string()).collect();
    Predicate::new(
        format!("takesArguments({})", expected.join(",")),
        move |m: &MethodDescription| m.parameter_types == expected,
    )
}

pub fn takes_argument_count(count: usize) -> Predicate<MethodDescription> {
    Predicate::new(
        format!("takesArguments({count})"),
        move |m: &MethodDescription| m.parameter_types.len() == count,
    )
}
