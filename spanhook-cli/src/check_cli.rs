//! `spanhook check` - explain which units a configuration would intercept

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tracing::{debug, info};

use spanhook_core::matcher::{self, MatchVerdict};
use spanhook_core::{
    trace_methods, AgentConfig, EnablementState, InstrumentationDescriptor, UnitDescription,
    MIN_SUPPORTED_FORMAT_VERSION,
};

/// Verdict for one unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitDiagnosis {
    pub unit: String,
    pub intercepted: bool,
    pub descriptors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Tabled)]
struct DiagnosisRow {
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Intercepted")]
    intercepted: String,
    #[tabled(rename = "Descriptors")]
    descriptors: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

pub fn load_units(path: &Path) -> Result<Vec<UnitDescription>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read units file: {}", path.display()))?;
    serde_yaml_ng::from_str(&content)
        .with_context(|| format!("Failed to parse units file: {}", path.display()))
}

/// Decide, for every unit, whether `descriptors` would intercept it under `config`
pub fn diagnose(
    config: &AgentConfig,
    descriptors: &[Arc<InstrumentationDescriptor>],
    units: &[UnitDescription],
) -> Result<Vec<UnitDiagnosis>> {
    let state = EnablementState::from_config(config).context("Invalid agent configuration")?;
    let enabled: Vec<_> = descriptors
        .iter()
        .filter(|d| state.is_descriptor_enabled(d))
        .collect();
    debug!(
        total = descriptors.len(),
        enabled = enabled.len(),
        "Evaluating descriptors"
    );

    Ok(units
        .iter()
        .map(|unit| diagnose_unit(&state, descriptors.len(), &enabled, unit))
        .collect())
}

fn diagnose_unit(
    state: &EnablementState,
    total: usize,
    enabled: &[&Arc<InstrumentationDescriptor>],
    unit: &UnitDescription,
) -> UnitDiagnosis {
    let skip = |reason: String| UnitDiagnosis {
        unit: unit.signature(),
        intercepted: false,
        descriptors: Vec::new(),
        reason: Some(reason),
    };

    let version = unit.type_description.format_version;
    if version < MIN_SUPPORTED_FORMAT_VERSION {
        return skip(format!(
            "unsupported format version {version} (minimum {MIN_SUPPORTED_FORMAT_VERSION})"
        ));
    }
    if !unit.type_description.modifiable {
        return skip("not modifiable".to_string());
    }
    if let Some(pattern) = state.exclusion_for(unit.type_name()) {
        return skip(format!("excluded by '{pattern}'"));
    }
    if !state.instrument() {
        return skip("instrumentation disabled".to_string());
    }

    let matched: Vec<String> = enabled
        .iter()
        .filter(|d| matcher::evaluate(d, unit, state) == MatchVerdict::Matched)
        .map(|d| d.name().to_string())
        .collect();

    if matched.is_empty() {
        let reason = if enabled.len() < total && enabled.is_empty() {
            "all descriptors disabled"
        } else {
            "no descriptor matches"
        };
        return skip(reason.to_string());
    }

    UnitDiagnosis {
        unit: unit.signature(),
        intercepted: true,
        descriptors: matched,
        reason: None,
    }
}

pub fn check_command(config_path: &Path, units_path: &Path, json: bool, table: bool) -> Result<()> {
    let config = AgentConfig::load(config_path)?;
    let units = load_units(units_path)?;
    let descriptors = trace_methods::build_descriptors(&config.trace_methods)
        .context("Invalid trace_methods in agent configuration")?;
    info!(
        units = units.len(),
        descriptors = descriptors.len(),
        "Checking interception"
    );

    let diagnoses = diagnose(&config, &descriptors, &units)?;
    let intercepted = diagnoses.iter().filter(|d| d.intercepted).count();

    if json {
        let output = serde_json::json!({
            "total_units": diagnoses.len(),
            "intercepted": intercepted,
            "units": diagnoses,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if table {
        let rows: Vec<DiagnosisRow> = diagnoses
            .iter()
            .map(|d| DiagnosisRow {
                unit: d.unit.clone(),
                intercepted: if d.intercepted { "yes" } else { "no" }.to_string(),
                descriptors: if d.descriptors.is_empty() {
                    "-".to_string()
                } else {
                    d.descriptors.join(", ")
                },
                reason: d.reason.clone().unwrap_or_else(|| "-".to_string()),
            })
            .collect();

        if rows.is_empty() {
            println!("No units found.");
        } else {
            let table = Table::new(&rows)
                .with(Style::rounded())
                .with(Modify::new(Rows::first()).with(Alignment::center()))
                .to_string();
            println!("{intercepted} of {} units intercepted\n", diagnoses.len());
            println!("{table}");
        }
    } else {
        println!("{intercepted} of {} units intercepted\n", diagnoses.len());
        for d in &diagnoses {
            if d.intercepted {
                println!("✅ {}", d.unit);
                println!("   Descriptors: {}", d.descriptors.join(", "));
            } else {
                println!("➖ {}", d.unit);
                if let Some(reason) = &d.reason {
                    println!("   Reason: {reason}");
                }
            }
        }
    }

    Ok(())
}
