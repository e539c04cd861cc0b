//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::AttributeValue;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// memrelay - run memory-analysis plugins against a target image
///
/// Runs a batch of analysis plugins against one memory image, reusing a
/// cached analysis context across requests, and emits one structured
/// result document per plugin.
///
/// Examples:
///   memrelay --device mem.raw --plugin imageinfo
///   memrelay --device mem.raw --plugin hexdump --attr offset=0x1000 --attr length=256
///   memrelay --request request.json --format markdown --output report.md
///   memrelay --list-plugins
///   memrelay --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path of the target image to analyze
    #[arg(
        short,
        long,
        value_name = "PATH",
        conflicts_with = "request",
        required_unless_present_any = ["request", "init_config", "list_plugins"]
    )]
    pub device: Option<String>,

    /// Read the whole request (device, plugins, attributes) from a JSON file
    #[arg(short, long, value_name = "FILE")]
    pub request: Option<PathBuf>,

    /// Plugin to run (repeatable, comma-separated)
    ///
    /// Plugins run in the order given. Example: --plugin imageinfo,hexdump
    #[arg(short, long = "plugin", value_name = "NAME", value_delimiter = ',')]
    pub plugins: Vec<String>,

    /// Context attribute (repeatable)
    ///
    /// Values parse as bool, integer (decimal or 0x hex), float, then string.
    /// Example: --attr offset=0x1000
    #[arg(short, long = "attr", value_name = "KEY=VALUE", value_parser = parse_attribute)]
    pub attrs: Vec<(String, AttributeValue)>,

    /// Output format (json, json-array, markdown)
    #[arg(long, default_value = "json", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Output file path ("-" for stdout)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .memrelay.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Maximum number of cached analysis contexts
    #[arg(long, value_name = "COUNT")]
    pub cache_capacity: Option<usize>,

    /// Profile to use when detection is off or fails
    #[arg(long, value_name = "NAME", env = "MEMRELAY_PROFILE")]
    pub profile: Option<String>,

    /// Do not ask the engine to guess the profile
    #[arg(long)]
    pub no_profile_detect: bool,

    /// Seconds without a heartbeat before the batch is aborted
    #[arg(long, value_name = "SECS")]
    pub heartbeat_timeout: Option<u64>,

    /// Disable the heartbeat watchdog
    #[arg(long)]
    pub no_watchdog: bool,

    /// Exit with code 2 if any plugin reported an error
    #[arg(long)]
    pub strict: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .memrelay.toml configuration file
    #[arg(long)]
    pub init_config: bool,

    /// List the plugins of the built-in engine and exit
    #[arg(long)]
    pub list_plugins: bool,
}

/// Output format for result documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// One JSON document per line (default)
    #[default]
    Json,
    /// One pretty-printed JSON array, written after the batch
    JsonArray,
    /// Human-readable Markdown report
    Markdown,
}

/// Parse a `KEY=VALUE` attribute.
fn parse_attribute(raw: &str) -> Result<(String, AttributeValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("attribute name is empty in '{}'", raw));
    }
    Ok((key.to_string(), AttributeValue::parse(value.trim())))
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for standalone actions
        if self.init_config || self.list_plugins {
            return Ok(());
        }

        match (&self.device, &self.request) {
            (None, None) => return Err("Either --device or --request is required".to_string()),
            (Some(_), Some(_)) => {
                return Err("Cannot use both --device and --request".to_string())
            }
            (Some(device), None) => {
                if device.trim().is_empty() {
                    return Err("Device path must not be empty".to_string());
                }
                if self.plugins.is_empty() {
                    return Err("At least one --plugin is required".to_string());
                }
            }
            (None, Some(request)) => {
                if !request.is_file() {
                    return Err(format!("Request file does not exist: {}", request.display()));
                }
            }
        }

        if self.plugins.iter().any(|p| p.trim().is_empty()) {
            return Err("Plugin names must not be empty".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.cache_capacity == Some(0) {
            return Err("Cache capacity must be at least 1".to_string());
        }

        if self.heartbeat_timeout == Some(0) {
            return Err("Heartbeat timeout must be at least 1 second".to_string());
        }

        Ok(())
    }

    /// Attributes given with --attr; later values win.
    pub fn attributes(&self) -> BTreeMap<String, AttributeValue> {
        self.attrs.iter().cloned().collect()
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
