//! OSGi boot delegation enabler.
//!
//! OSGi containers only delegate class loading of listed packages to the
//! boot scope. For agent code injected into bundles to be resolvable, the
//! agent's package token has to be appended to the container's delegation
//! properties before the container starts.
//!
//! Atlassian products read their own key. Older products replace their
//! built-in delegation list with `atlassian.org.osgi.framework.bootdelegation`
//! (so the defaults must be carried over when seeding it); newer ones add
//! the `.extra` key to their built-in list.

use tracing::{debug, info};

use crate::config::AgentConfig;
use crate::properties::SystemProperties;

pub const BOOT_DELEGATION_PROPERTY: &str = "org.osgi.framework.bootdelegation";
pub const ATLASSIAN_BOOT_DELEGATION_PROPERTY: &str = "atlassian.org.osgi.framework.bootdelegation";
pub const ATLASSIAN_BOOT_DELEGATION_EXTRA_PROPERTY: &str =
    "atlassian.org.osgi.framework.bootdelegation.extra";

/// Built-in Atlassian delegation list, kept when seeding the legacy key
pub const ATLASSIAN_BOOT_DELEGATION_DEFAULTS: &str = "META-INF.services,com.yourkit,com.singularity.*,\
com.jprofiler,com.jprofiler.*,org.apache.xerces,org.apache.xerces.*,org.apache.xalan,org.apache.xalan.*,\
sun.*,com.sun.jndi.*,com.icl.saxon,com.icl.saxon.*,javax.servlet,javax.servlet.*,com.sun.xml.bind.*";

/// Append the configured package token to the delegation properties.
///
/// Does nothing when no token is configured.
pub fn enable_boot_delegation(config: &AgentConfig, properties: &SystemProperties) {
    let Some(packages) = config.boot_delegation_packages() else {
        debug!("No boot delegation packages configured, leaving properties untouched");
        return;
    };

    append_to_property(properties, BOOT_DELEGATION_PROPERTY, packages, None);

    if config.use_atlassian_new_boot_delegation_config {
        append_to_property(
            properties,
            ATLASSIAN_BOOT_DELEGATION_EXTRA_PROPERTY,
            packages,
            None,
        );
    } else {
        append_to_property(
            properties,
            ATLASSIAN_BOOT_DELEGATION_PROPERTY,
            packages,
            Some(ATLASSIAN_BOOT_DELEGATION_DEFAULTS),
        );
    }
}

/// Comma-append `token` to a property unless it is already listed.
///
/// `seed` is used as the existing value when the property is unset.
pub fn append_to_property(
    properties: &SystemProperties,
    key: &str,
    token: &str,
    seed: Option<&str>,
) {
    properties.update(key, |current| {
        let existing = current
            .filter(|v| !v.trim().is_empty())
            .or(seed)
            .unwrap_or("");
        let merged = merge_token(existing, token);
        if merged != existing {
            info!("Setting {} to {}", key, merged);
        }
        Some(merged)
    });
}

fn merge_token(existing: &str, token: &str) -> String {
    if existing.is_empty() {
        return token.to_string();
    }
    if existing.split(',').any(|entry| entry.trim() == token) {
        return existing.to_string();
    }
    format!("{existing},{token}")
}
