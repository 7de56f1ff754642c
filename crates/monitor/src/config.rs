//! Monitor configuration management

use anyhow::{Context, Result, anyhow};
use device::DriverOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// trace, debug, info, warn or error
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Depth of the read loop -> dispatcher queue
    #[serde(default = "SessionSettings::default_queue_capacity")]
    pub event_queue_capacity: usize,
    /// Reconnect when the device reappears after a disconnect
    #[serde(default = "SessionSettings::default_auto_reconnect")]
    pub auto_reconnect: bool,
    /// Availability poll period while disconnected
    #[serde(default = "SessionSettings::default_reconnect_interval")]
    pub reconnect_interval_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            event_queue_capacity: Self::default_queue_capacity(),
            auto_reconnect: Self::default_auto_reconnect(),
            reconnect_interval_ms: Self::default_reconnect_interval(),
        }
    }
}

impl SessionSettings {
    fn default_queue_capacity() -> usize {
        DriverOptions::default().event_queue_capacity
    }

    fn default_auto_reconnect() -> bool {
        true
    }

    fn default_reconnect_interval() -> u64 {
        2000
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            event_queue_capacity: self.event_queue_capacity,
        }
    }
}

/// How events are written to stdout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable lines
    Text,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            other => Err(format!("unknown format '{}', expected json or text", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(default)]
    pub format: OutputFormat,
    /// Skip the early (spinless) reading of each shot
    #[serde(default)]
    pub final_readings_only: bool,
}

impl MonitorConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/gc2-monitor/monitor.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: MonitorConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("gc2-monitor").join("monitor.toml")
        } else {
            PathBuf::from(".config/gc2-monitor/monitor.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        if self.session.event_queue_capacity == 0 {
            return Err(anyhow!("session.event_queue_capacity must be at least 1"));
        }

        if self.session.reconnect_interval_ms == 0 {
            return Err(anyhow!("session.reconnect_interval_ms must be greater than 0"));
        }

        Ok(())
    }
}
