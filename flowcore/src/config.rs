//! Configuration management for the workflow engine
//!
//! Settings are resolved from defaults, then `FLOWCORE_*` environment
//! variables, then an optional `flowcore.yaml` file. Runners take an explicit
//! [`Config`] so that embedding services and tests stay hermetic; the CLI uses
//! [`Config::global`].

use crate::common::env_loader::EnvLoader;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const CONFIG_FILE_NAME: &str = "flowcore.yaml";
const DEFAULT_ENVIRONMENT_NAME: &str = "development";

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file from disk
    #[error("Failed to read configuration file {path}: {source}")]
    FileRead {
        /// Path to the configuration file that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML content from a configuration file
    #[error("Invalid YAML syntax in {path}:\n{source}")]
    YamlParse {
        /// Path to the configuration file with invalid YAML content
        path: PathBuf,
        /// Underlying YAML parsing error
        #[source]
        source: serde_yaml::Error,
    },

    /// Invalid configuration value for a specific field
    #[error("Invalid configuration value for '{field}': {value}\n{hint}")]
    InvalidValue {
        /// Name of the offending field
        field: String,
        /// The rejected value
        value: String,
        /// How to fix it
        hint: String,
    },
}

/// Runtime settings of the workflow engine
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Upper bound on events processed by one `send_event` cascade (default: 1000)
    pub max_cascade_events: usize,
    /// Upper bound on eventless (`always`) steps after one transition (default: 100)
    pub max_eventless_steps: usize,
    /// Timeout applied to each HTTP plugin request (default: 30 seconds)
    pub http_timeout_secs: u64,
    /// Delay before state-changed webhooks are delivered (default: 5000 ms)
    pub webhook_delay_ms: u64,
    /// Environment name stamped on outgoing webhooks (default: "development")
    pub environment_name: String,
    /// Log the full context after each plugin cascade (default: false)
    pub debug_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_cascade_events: 1000,
            max_eventless_steps: 100,
            http_timeout_secs: 30,
            webhook_delay_ms: 5000,
            environment_name: DEFAULT_ENVIRONMENT_NAME.to_string(),
            debug_mode: false,
        }
    }
}

impl Config {
    /// Create a configuration from defaults, environment variables and the
    /// YAML file, in increasing order of precedence
    pub fn new() -> Self {
        let mut config = Self::default();
        config.apply_env_vars();

        match YamlConfig::load_or_default() {
            Ok(yaml_config) => {
                yaml_config.apply_to_config(&mut config);
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load YAML configuration, falling back to env vars and defaults: {}",
                    e
                );
            }
        }

        if let Err(e) = config.validate() {
            tracing::warn!("Invalid configuration: {}. Using defaults.", e);
            return Self::default();
        }

        config
    }

    fn apply_env_vars(&mut self) {
        let loader = EnvLoader::new("FLOWCORE");
        let positive = |v: &usize| *v > 0;

        self.max_cascade_events =
            loader.load_validated("MAX_CASCADE_EVENTS", self.max_cascade_events, positive);
        self.max_eventless_steps =
            loader.load_validated("MAX_EVENTLESS_STEPS", self.max_eventless_steps, positive);
        self.http_timeout_secs =
            loader.load_validated("HTTP_TIMEOUT_SECS", self.http_timeout_secs, |v| *v > 0);
        self.webhook_delay_ms = loader.load_parsed("WEBHOOK_DELAY_MS", self.webhook_delay_ms);
        self.environment_name = loader.load_string("ENVIRONMENT_NAME", &self.environment_name);
        self.debug_mode = loader.load_parsed("DEBUG_MODE", self.debug_mode);
    }

    /// Get the global configuration instance
    pub fn global() -> &'static Self {
        static CONFIG: std::sync::OnceLock<Config> = std::sync::OnceLock::new();
        CONFIG.get_or_init(Config::new)
    }

    /// HTTP plugin timeout as a [`Duration`]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Webhook delivery delay as a [`Duration`]
    pub fn webhook_delay(&self) -> Duration {
        Duration::from_millis(self.webhook_delay_ms)
    }

    /// Find `flowcore.yaml` in the working directory or `~/.config/flowcore/`
    pub fn find_yaml_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(home_dir) = dirs::home_dir() {
            search_paths.push(home_dir.join(".config").join("flowcore").join(CONFIG_FILE_NAME));
        }

        let found = search_paths.into_iter().find(|path| path.is_file());
        match &found {
            Some(path) => tracing::debug!("Found configuration file: {:?}", path),
            None => tracing::debug!("No {} found in any search location", CONFIG_FILE_NAME),
        }
        found
    }

    /// Validate the current configuration settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("max_cascade_events", self.max_cascade_events as u64),
            ("max_eventless_steps", self.max_eventless_steps as u64),
            ("http_timeout_secs", self.http_timeout_secs),
        ];
        for (field, value) in limits {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    hint: "Limits must be greater than zero".to_string(),
                });
            }
        }

        if self.environment_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "environment_name".to_string(),
                value: self.environment_name.clone(),
                hint: "Set FLOWCORE_ENVIRONMENT_NAME or environment_name in flowcore.yaml"
                    .to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration loaded from `flowcore.yaml`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct YamlConfig {
    /// Overrides [`Config::max_cascade_events`]
    pub max_cascade_events: Option<usize>,
    /// Overrides [`Config::max_eventless_steps`]
    pub max_eventless_steps: Option<usize>,
    /// Overrides [`Config::http_timeout_secs`]
    pub http_timeout_secs: Option<u64>,
    /// Overrides [`Config::webhook_delay_ms`]
    pub webhook_delay_ms: Option<u64>,
    /// Overrides [`Config::environment_name`]
    pub environment_name: Option<String>,
    /// Overrides [`Config::debug_mode`]
    pub debug_mode: Option<bool>,
}

impl YamlConfig {
    /// Apply YAML values on top of an existing config
    pub fn apply_to_config(&self, config: &mut Config) {
        if let Some(value) = self.max_cascade_events {
            config.max_cascade_events = value;
        }
        if let Some(value) = self.max_eventless_steps {
            config.max_eventless_steps = value;
        }
        if let Some(value) = self.http_timeout_secs {
            config.http_timeout_secs = value;
        }
        if let Some(value) = self.webhook_delay_ms {
            config.webhook_delay_ms = value;
        }
        if let Some(ref value) = self.environment_name {
            config.environment_name = value.clone();
        }
        if let Some(value) = self.debug_mode {
            config.debug_mode = value;
        }
    }

    /// Load YAML configuration from a file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::info!("Loading YAML configuration from: {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load the YAML file if one exists, otherwise return an empty override set
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Config::find_yaml_config_file() {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }
}
