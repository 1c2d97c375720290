//! Configuration management for trackman.
//!
//! Supports layered configuration: defaults → project → user → env

use crate::domain::duration;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub runner: RunnerSection,
    #[serde(default)]
    pub notify: NotifySection,
    #[serde(default)]
    pub log: LogSection,
}

impl RunnerConfig {
    /// Load configuration with hierarchy: defaults → project → user → env
    pub fn load(project_root: Option<&PathBuf>) -> Result<Self, ConfigError> {
        use config::{Config, Environment, File};

        let mut builder = Config::builder();

        // 1. Start with defaults
        builder = builder.add_source(
            config::File::from_str(
                include_str!("../default_config.toml"),
                config::FileFormat::Toml,
            )
            .required(false),
        );

        // 2. Project-specific config (.trackman.toml in project root)
        if let Some(root) = project_root {
            let project_config = root.join(".trackman.toml");
            if project_config.exists() {
                builder = builder.add_source(File::from(project_config).required(false));
            }
        }

        // 3. User config (~/.config/trackman/config.toml)
        if let Some(config_dir) = directories::ProjectDirs::from("com", "trackman", "trackman") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                builder = builder.add_source(File::from(user_config).required(false));
            }
        }

        // 4. Environment variables (TRACKMAN_*)
        builder = builder.add_source(
            Environment::with_prefix("TRACKMAN")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        let loaded: Self = config
            .try_deserialize()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject budgets that would time out immediately
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.default_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("runner.default_timeout".to_string()));
        }
        if self.notify.delivery_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("notify.delivery_timeout".to_string()));
        }
        Ok(())
    }
}

/// Step execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSection {
    /// Budget for steps that do not set their own timeout
    #[serde(default = "default_step_timeout", with = "duration::required")]
    pub default_timeout: Duration,
    /// Mirror raw child output to the terminal
    #[serde(default)]
    pub echo_output: bool,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            default_timeout: default_step_timeout(),
            echo_output: false,
        }
    }
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(600)
}

/// Notification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySection {
    /// Upper bound for one notifier delivery
    #[serde(default = "default_delivery_timeout", with = "duration::required")]
    pub delivery_timeout: Duration,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            delivery_timeout: default_delivery_timeout(),
        }
    }
}

fn default_delivery_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSection {
    /// `EnvFilter` directive used when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}
