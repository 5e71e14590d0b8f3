//! Agent configuration - the structured settings the engine consumes.
//!
//! Loaded from YAML; every key is optional and falls back to its default.
//! The engine only reads this object; changes reach the live process through
//! `Agent::reconfigure`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Package token appended to OSGi boot delegation properties by default
pub const DEFAULT_BOOT_DELEGATION_PACKAGES: &str = "spanhook.agent.*";

/// Structured agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Global switch; when false no unit is intercepted
    pub instrument: bool,

    /// Instrumentation group names to disable
    pub disabled_instrumentations: Vec<String>,

    /// Group names that opt in to descriptors which are off by default
    pub enable_instrumentations: Vec<String>,

    /// User wildcard patterns over fully qualified type names to never intercept
    pub classes_excluded_from_instrumentation: Vec<String>,

    /// Built-in wildcard patterns over fully qualified type names to never intercept
    pub default_classes_excluded_from_instrumentation: Vec<String>,

    /// `TypePattern#methodPattern` entries traced without any code changes
    pub trace_methods: Vec<String>,

    /// Append to the `.extra` Atlassian delegation key instead of the legacy one
    pub use_atlassian_new_boot_delegation_config: bool,

    /// Package token appended to the boot delegation properties
    pub packages_to_append_to_boot_delegation_property: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instrument: true,
            disabled_instrumentations: Vec::new(),
            enable_instrumentations: Vec::new(),
            classes_excluded_from_instrumentation: Vec::new(),
            default_classes_excluded_from_instrumentation: default_excluded_classes(),
            trace_methods: Vec::new(),
            use_atlassian_new_boot_delegation_config: false,
            packages_to_append_to_boot_delegation_property: Some(
                DEFAULT_BOOT_DELEGATION_PACKAGES.to_string(),
            ),
        }
    }
}

fn default_excluded_classes() -> Vec<String> {
    vec![
        // the agent never intercepts itself
        "(?-i)spanhook.agent.*".to_string(),
        // generated proxies and accessors
        "(?-i)*$$*".to_string(),
        "(?-i)*$JaxbAccessor*".to_string(),
    ]
}

impl AgentConfig {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading agent configuration from: {:?}", path);

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read agent configuration {}", path.display()))?;

        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        // An empty document means "all defaults"
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: AgentConfig =
            serde_yaml_ng::from_str(content).context("Failed to parse agent configuration YAML")?;

        debug!(
            "Loaded configuration: instrument={}, {} disabled groups, {} exclusions, {} trace_methods",
            config.instrument,
            config.disabled_instrumentations.len(),
            config.classes_excluded_from_instrumentation.len(),
            config.trace_methods.len()
        );

        Ok(config)
    }

    /// The delegation token to append, if any. Blank values count as absent.
    pub fn boot_delegation_packages(&self) -> Option<&str> {
        self.packages_to_append_to_boot_delegation_property
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert!(config.instrument);
        assert!(config.disabled_instrumentations.is_empty());
        assert!(!config.default_classes_excluded_from_instrumentation.is_empty());
        assert_eq!(config.boot_delegation_packages(), Some("spanhook.agent.*"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = AgentConfig::from_yaml_str(
            r#"
disabled_instrumentations: ["jdbc", "experimental"]
classes_excluded_from_instrumentation:
  - "com.acme.internal.*"
"#,
        )
        .unwrap();

        assert!(config.instrument);
        assert_eq!(config.disabled_instrumentations, vec!["jdbc", "experimental"]);
        assert_eq!(
            config.classes_excluded_from_instrumentation,
            vec!["com.acme.internal.*"]
        );
        assert_eq!(
            config.default_classes_excluded_from_instrumentation,
            default_excluded_classes()
        );
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(AgentConfig::from_yaml_str("").unwrap(), AgentConfig::default());
    }

    #[test]
    fn test_blank_delegation_packages_count_as_absent() {
        let config = AgentConfig {
            packages_to_append_to_boot_delegation_property: Some("  ".into()),
            ..AgentConfig::default()
        };
        assert_eq!(config.boot_delegation_packages(), None);

        let config = AgentConfig {
            packages_to_append_to_boot_delegation_property: None,
            ..AgentConfig::default()
        };
        assert_eq!(config.boot_delegation_packages(), None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "instrument: false\nuse_atlassian_new_boot_delegation_config: true").unwrap();

        let config = AgentConfig::load(file.path()).unwrap();
        assert!(!config.instrument);
        assert!(config.use_atlassian_new_boot_delegation_config);
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let err = AgentConfig::from_yaml_str("instrument: [not, a, bool]").unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse agent configuration YAML"));
    }
}
