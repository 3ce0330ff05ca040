// Configuration management with layered configuration (file, env, CLI)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub provision: ProvisionConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Only pushes to this branch start a run
    pub push_branch: String,
    /// Crontab expression for scheduled runs
    pub cron: String,
    pub timezone: String,
    /// Value of `text_to_print` when a manual run omits it
    pub manual_default: String,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            push_branch: "main".to_string(),
            cron: "0 12 * * *".to_string(),
            timezone: "UTC".to_string(),
            manual_default: "Running".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    pub enabled: bool,
    pub interpreter: String,
    /// Declared interpreter version, matched as a prefix of the reported one
    pub interpreter_version: Option<String>,
    pub manifest: PathBuf,
    /// Create an isolated environment for the install
    pub isolated: bool,
    /// Fixed location of the isolated environment; relative paths resolve
    /// under the system temp directory. Must lie outside the working tree.
    /// Unset means a fresh directory per run.
    pub venv_dir: Option<PathBuf>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interpreter: "python3".to_string(),
            interpreter_version: None,
            manifest: PathBuf::from("requirements.txt"),
            isolated: true,
            venv_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub entry_point: String,
    /// Run the entry point through the provisioned interpreter
    pub interpreted: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            entry_point: "price-scraper".to_string(),
            interpreted: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub author_name: String,
    pub author_email: String,
    pub message: String,
    pub remote: String,
    pub branch: String,
    /// Environment variable holding the run-scoped push token
    pub token_env: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            author_name: "GitHub Action".to_string(),
            author_email: "action@github.com".to_string(),
            message: "Update Data".to_string(),
            remote: "origin".to_string(),
            branch: "main".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    /// Prometheus listener port for the scheduler daemon
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            metrics_port: None,
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Add environment-specific configuration
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.trigger.push_branch.trim().is_empty() {
            return Err("Trigger push_branch cannot be empty".to_string());
        }
        if self.trigger.cron.trim().is_empty() {
            return Err("Trigger cron expression cannot be empty".to_string());
        }

        if self.provision.enabled && self.provision.interpreter.is_empty() {
            return Err("Provision interpreter cannot be empty when enabled".to_string());
        }

        if self.producer.entry_point.trim().is_empty() {
            return Err("Producer entry_point cannot be empty".to_string());
        }

        if self.publish.author_name.is_empty() || self.publish.author_email.is_empty() {
            return Err("Publish author name and email are required".to_string());
        }
        if self.publish.message.trim().is_empty() {
            return Err("Publish commit message cannot be empty".to_string());
        }
        if self.publish.branch.is_empty() || self.publish.remote.is_empty() {
            return Err("Publish remote and branch are required".to_string());
        }

        if self.observability.metrics_port == Some(0) {
            return Err("Metrics port must be greater than 0".to_string());
        }

        Ok(())
    }
}
