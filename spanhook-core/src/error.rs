//! Error types with clear, actionable messages

use serde::Serialize;
use thiserror::Error;

/// Failure to apply interception to a single program unit.
///
/// These are isolated per unit: one failing unit never aborts an
/// application pass over the others.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApplyError {
    /// The unit was produced for a runtime format too old to be altered safely
    #[error("{unit} has format version {version}, below the minimum supported version {minimum}")]
    UnsupportedFormatVersion {
        unit: String,
        version: u32,
        minimum: u32,
    },

    /// The runtime refuses to alter this unit
    #[error("{unit} cannot be modified by the runtime")]
    NotModifiable { unit: String },

    /// Installing hooks failed for a transient or unexpected reason
    #[error("Failed to install hooks on {unit}: {reason}")]
    Install { unit: String, reason: String },
}

impl ApplyError {
    /// Permanent faults mark the unit as skipped for the rest of the process lifetime.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ApplyError::UnsupportedFormatVersion { .. } | ApplyError::NotModifiable { .. }
        )
    }

    pub fn unit(&self) -> &str {
        match self {
            ApplyError::UnsupportedFormatVersion { unit, .. }
            | ApplyError::NotModifiable { unit }
            | ApplyError::Install { unit, .. } => unit,
        }
    }
}

/// Invalid configuration values
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A wildcard pattern could not be compiled
    #[error("Invalid wildcard pattern '{pattern}'")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A trace_methods entry is malformed
    #[error("Invalid trace_methods entry '{entry}': {reason}")]
    InvalidTraceMethod { entry: String, reason: String },
}

/// Misuse of the execution-context state machine.
///
/// Usage faults are logged and the offending operation becomes a no-op;
/// they never abort the host call that triggered them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("Context {span_id} is not the active context of the current thread")]
    NotOnTop { span_id: String },

    #[error("Context {span_id} has already ended")]
    AlreadyEnded { span_id: String },

    #[error("Context {span_id} is already active on another thread")]
    ActiveOnOtherThread { span_id: String },

    #[error("Cannot start a root context while {active} is active on the current thread")]
    ActiveRootExists { active: String },
}
