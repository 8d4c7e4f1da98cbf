//! Harness configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// When a device's deferred unplug task gets scheduled
///
/// A runtime value rather than a build-time switch, so both scenarios can
/// be exercised by the same binary and test suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// The controller schedules every device's unplug right after creation
    Immediate,
    /// The first control request reaching a device's queue schedules it
    DeferredOnFirstRequest,
}

impl Default for Scenario {
    fn default() -> Self {
        Scenario::Immediate
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scenario::Immediate => write!(f, "immediate"),
            Scenario::DeferredOnFirstRequest => write!(f, "deferred-on-first-request"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub harness: HarnessSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessSettings {
    /// Number of emulated child devices
    #[serde(default = "HarnessSettings::default_devices")]
    pub devices: u32,
    /// Unplug trigger scenario
    #[serde(default)]
    pub scenario: Scenario,
    /// Default log level when RUST_LOG is not set
    #[serde(default = "HarnessSettings::default_log_level")]
    pub log_level: String,
}

impl HarnessSettings {
    fn default_devices() -> u32 {
        4
    }

    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            harness: HarnessSettings {
                devices: HarnessSettings::default_devices(),
                scenario: Scenario::default(),
                log_level: HarnessSettings::default_log_level(),
            },
        }
    }
}

impl HarnessConfig {
    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("vhc-harness").join("harness.toml")
        } else {
            PathBuf::from("/etc/vhc-harness/harness.toml")
        }
    }

    /// Load configuration from the given path, or the default path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.unwrap_or_else(Self::default_path);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load from the default path, falling back to defaults when absent
    pub fn load_or_default() -> Self {
        Self::load(None).unwrap_or_default()
    }

    /// Save configuration to the given path, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}
