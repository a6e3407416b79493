//! Configuration management for Vigil components

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use vigil_core::{Error, InputSource, Result, Value};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Audit run settings
    #[serde(default)]
    pub audit: AuditConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Input overrides, keyed by input name
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Create a configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Merge with environment variables (VIGIL_ prefix)
    pub fn merge_env(self) -> Self {
        self.merge_vars(|key| std::env::var(key).ok())
    }

    fn merge_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(n) = var("VIGIL_CONCURRENCY").and_then(|v| v.parse().ok()) {
            self.audit.concurrency = n;
        }
        if let Some(ms) = var("VIGIL_PROBE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.audit.probe_timeout_ms = ms;
        }
        if let Some(val) = var("VIGIL_PROFILE") {
            self.audit.profile = Some(val);
        }
        if let Some(val) = var("VIGIL_SNAPSHOT") {
            self.audit.snapshot = Some(val);
        }

        // Logging
        if let Some(val) = var("VIGIL_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = var("VIGIL_LOG_FORMAT") {
            self.logging.format = val;
        }

        self
    }
}

impl InputSource for Config {
    fn get(&self, name: &str) -> Option<Value> {
        self.inputs.get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        self.inputs.keys().cloned().collect()
    }
}

/// Audit run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Maximum controls evaluated concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Timeout for a single snapshot probe in milliseconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// YAML profile to run instead of the built-in one
    pub profile: Option<String>,

    /// JSON snapshot to audit instead of the local host
    pub snapshot: Option<String>,
}

fn default_concurrency() -> usize {
    4
}

fn default_probe_timeout() -> u64 {
    5000
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            probe_timeout_ms: default_probe_timeout(),
            profile: None,
            snapshot: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    String::from("info")
}

fn default_log_format() -> String {
    String::from("pretty")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Builder for constructing Config
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.audit.concurrency = n;
        self
    }

    pub fn probe_timeout_ms(mut self, ms: u64) -> Self {
        self.config.audit.probe_timeout_ms = ms;
        self
    }

    pub fn profile(mut self, path: impl Into<String>) -> Self {
        self.config.audit.profile = Some(path.into());
        self
    }

    pub fn snapshot(mut self, path: impl Into<String>) -> Self {
        self.config.audit.snapshot = Some(path.into());
        self
    }

    pub fn input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.inputs.insert(name.into(), value.into());
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
