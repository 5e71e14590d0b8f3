//! Spanhook - inspect what the tracing agent core would do with a configuration
//!
//! The CLI never attaches to a live process. It evaluates a configuration
//! against unit descriptions and shows the effect on boot delegation
//! properties, which is what operators usually need before rolling out.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use spanhook_core::boot_delegation::enable_boot_delegation;
use spanhook_core::properties::SystemProperties;
use spanhook_core::AgentConfig;

mod check_cli;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "spanhook",
    about = "Inspect tracing agent configurations",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set the logging level
    #[clap(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Emit logs as JSON lines
    #[clap(long, global = true)]
    json_logs: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Show which units a configuration would intercept, and why not
    Check {
        /// Agent configuration file (YAML)
        #[clap(long)]
        config: PathBuf,

        /// Unit descriptions to evaluate (YAML list)
        #[clap(long)]
        units: PathBuf,

        /// Output as JSON
        #[clap(long, conflicts_with = "table")]
        json: bool,

        /// Output as a table
        #[clap(short, long)]
        table: bool,
    },

    /// Show the boot delegation properties after the agent appends its packages
    BootDelegation {
        /// Agent configuration file (YAML); defaults apply when omitted
        #[clap(long)]
        config: Option<PathBuf>,

        /// Pre-existing property, as KEY=VALUE (repeatable)
        #[clap(long = "set", value_name = "KEY=VALUE")]
        properties: Vec<String>,
    },
}

fn initialize_tracing(log_level: &LogLevel, json_logs: bool) {
    let filter = EnvFilter::new(log_level.to_filter_directive());

    // Logs go to stderr, reports go to stdout
    if json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing(&cli.log_level, cli.json_logs);

    match cli.command {
        Command::Check {
            config,
            units,
            json,
            table,
        } => check_cli::check_command(&config, &units, json, table),
        Command::BootDelegation { config, properties } => {
            boot_delegation_command(config, &properties)
        }
    }
}

fn parse_property(pair: &str) -> Result<(String, String)> {
    let (key, value) = pair
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid property '{pair}', expected KEY=VALUE"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("Invalid property '{pair}', key is empty"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn boot_delegation_command(config: Option<PathBuf>, properties: &[String]) -> Result<()> {
    let config = match config {
        Some(path) => AgentConfig::load(&path)
            .with_context(|| format!("Failed to load agent configuration {}", path.display()))?,
        None => {
            debug!("No configuration given, using defaults");
            AgentConfig::default()
        }
    };

    let props = SystemProperties::new();
    for pair in properties {
        let (key, value) = parse_property(pair)?;
        props.set(key, value);
    }

    enable_boot_delegation(&config, &props);
    info!("Boot delegation properties updated");

    for (key, value) in props.snapshot() {
        println!("{key}={value}");
    }
    Ok(())
}
