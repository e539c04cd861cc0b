//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.memrelay.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = ".memrelay.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Context cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Profile selection settings.
    #[serde(default)]
    pub profile: ProfileConfig,

    /// Watchdog settings.
    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Where result documents are written; "-" is stdout.
    #[serde(default = "default_output")]
    pub output: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            output: default_output(),
        }
    }
}

fn default_output() -> String {
    "-".to_string()
}

/// Analysis context cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached contexts.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

fn default_capacity() -> usize {
    crate::session::DEFAULT_CAPACITY
}

/// Profile selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Profile used when detection is disabled or fails.
    #[serde(default = "default_profile")]
    pub default: String,

    /// Ask the engine to guess the profile of new targets.
    #[serde(default = "default_true")]
    pub auto_detect: bool,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            default: default_profile(),
            auto_detect: true,
        }
    }
}

fn default_profile() -> String {
    crate::agent::DEFAULT_PROFILE.to_string()
}

/// Heartbeat watchdog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Abort the batch when plugins stop reporting progress.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Allowed silence between heartbeats, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    600
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load `.memrelay.toml` from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(CONFIG_FILE);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(capacity) = args.cache_capacity {
            self.cache.capacity = capacity;
        }
        if let Some(ref profile) = args.profile {
            self.profile.default = profile.clone();
        }
        if args.no_profile_detect {
            self.profile.auto_detect = false;
        }
        if let Some(timeout) = args.heartbeat_timeout {
            self.watchdog.timeout_seconds = timeout;
        }
        if args.no_watchdog {
            self.watchdog.enabled = false;
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
