//! Static descriptions of program units.
//!
//! A program unit is one method of one type. Its description is everything
//! the matchers may look at: names, supertypes, parameter types, the runtime
//! format version of the defining artifact and the owning module scope.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::scope::ModuleScope;

fn default_format_version() -> u32 {
    crate::controller::MIN_SUPPORTED_FORMAT_VERSION + 3
}

fn default_true() -> bool {
    true
}

/// Static identity of a type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescription {
    /// Fully qualified, dot-separated name
    pub name: String,

    /// All supertypes and implemented interfaces, fully qualified
    #[serde(default)]
    pub super_types: Vec<String>,

    /// Runtime format version of the artifact that defined the type
    #[serde(default = "default_format_version")]
    pub format_version: u32,

    /// Whether the runtime allows altering this type after it was loaded
    #[serde(default = "default_true")]
    pub modifiable: bool,
}

impl TypeDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_types: Vec::new(),
            format_version: default_format_version(),
            modifiable: true,
        }
    }

    pub fn with_super_type(mut self, super_type: impl Into<String>) -> Self {
        self.super_types.push(super_type.into());
        self
    }

    pub fn with_format_version(mut self, version: u32) -> Self {
        self.format_version = version;
        self
    }

    pub fn with_modifiable(mut self, modifiable: bool) -> Self {
        self.modifiable = modifiable;
        self
    }

    /// The name without its package prefix
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// True if the type is `name` or has `name` among its supertypes
    pub fn is_assignable_to(&self, name: &str) -> bool {
        self.name == name || self.super_types.iter().any(|s| s == name)
    }
}

/// Static identity of a method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescription {
    pub name: String,

    #[serde(default)]
    pub parameter_types: Vec<String>,
}

impl MethodDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameter_types: Vec::new(),
        }
    }

    pub fn with_parameters<I, S>(mut self, parameter_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameter_types = parameter_types.into_iter().map(Into::into).collect();
        self
    }
}

/// A program unit: one method of one type, owned by a module scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitDescription {
    #[serde(rename = "type")]
    pub type_description: TypeDescription,

    pub method: MethodDescription,

    /// Owning scope; units described in files have none
    #[serde(skip)]
    pub scope: Option<Arc<ModuleScope>>,
}

impl UnitDescription {
    pub fn new(type_description: TypeDescription, method: MethodDescription) -> Self {
        Self {
            type_description,
            method,
            scope: None,
        }
    }

    pub fn in_scope(mut self, scope: Arc<ModuleScope>) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_description.name
    }

    pub fn method_name(&self) -> &str {
        &self.method.name
    }

    /// `pkg.Type#method(ParamA,ParamB)` - unique per loaded unit
    pub fn signature(&self) -> String {
        format!(
            "{}#{}({})",
            self.type_description.name,
            self.method.name,
            self.method.parameter_types.join(",")
        )
    }

    /// `Type#method`, used to name contexts
    pub fn simple_signature(&self) -> String {
        format!(
            "{}#{}",
            self.type_description.simple_name(),
            self.method.name
        )
    }
}
