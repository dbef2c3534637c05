//! Engine configuration management

use crate::quirks::{DeviceQuirk, QuirkTable, builtin_quirks};
use anyhow::{Context, Result, anyhow};
use hidlink_protocol::DEFAULT_VENDOR_ID;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub buffer: BufferSettings,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    /// Device-specific close quirks
    #[serde(default = "builtin_quirks")]
    pub quirks: Vec<DeviceQuirk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferSettings {
    /// Ring buffer slot count per direction
    #[serde(default = "BufferSettings::default_capacity")]
    pub capacity: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
        }
    }
}

impl BufferSettings {
    fn default_capacity() -> usize {
        128
    }
}

/// Every bounded wait used by the session, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Read worker wait per completion poll
    pub read_poll_ms: u64,
    /// Write worker wait for new records when idle
    pub write_idle_wait_ms: u64,
    /// Maximum time a write may stay pending before the channel fails
    pub write_completion_timeout_ms: u64,
    /// Error surfacer cadence
    pub error_poll_ms: u64,
    /// Dispatcher wait on the read-ready signal
    pub dispatch_wait_ms: u64,
    /// `blocking_read` retry interval
    pub blocking_read_poll_ms: u64,
    /// Per-worker exit budget during close
    pub shutdown_budget_ms: u64,
    /// Exit check interval during close
    pub shutdown_poll_ms: u64,
    /// Pause before reporting a full write buffer (0 = none)
    pub backpressure_pause_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            read_poll_ms: 50,
            write_idle_wait_ms: 100,
            write_completion_timeout_ms: 1000,
            error_poll_ms: 25,
            dispatch_wait_ms: 100,
            blocking_read_poll_ms: 10,
            shutdown_budget_ms: 100,
            shutdown_poll_ms: 10,
            backpressure_pause_ms: 1,
        }
    }
}

impl TimingSettings {
    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms)
    }

    pub fn write_idle_wait(&self) -> Duration {
        Duration::from_millis(self.write_idle_wait_ms)
    }

    pub fn write_completion_timeout(&self) -> Duration {
        Duration::from_millis(self.write_completion_timeout_ms)
    }

    pub fn error_poll(&self) -> Duration {
        Duration::from_millis(self.error_poll_ms)
    }

    pub fn dispatch_wait(&self) -> Duration {
        Duration::from_millis(self.dispatch_wait_ms)
    }

    pub fn blocking_read_poll(&self) -> Duration {
        Duration::from_millis(self.blocking_read_poll_ms)
    }

    pub fn shutdown_budget(&self) -> Duration {
        Duration::from_millis(self.shutdown_budget_ms)
    }

    pub fn shutdown_poll(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_ms)
    }

    pub fn backpressure_pause(&self) -> Duration {
        Duration::from_millis(self.backpressure_pause_ms)
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("read_poll_ms", self.read_poll_ms),
            ("write_idle_wait_ms", self.write_idle_wait_ms),
            ("write_completion_timeout_ms", self.write_completion_timeout_ms),
            ("error_poll_ms", self.error_poll_ms),
            ("dispatch_wait_ms", self.dispatch_wait_ms),
            ("blocking_read_poll_ms", self.blocking_read_poll_ms),
            ("shutdown_budget_ms", self.shutdown_budget_ms),
            ("shutdown_poll_ms", self.shutdown_poll_ms),
        ];
        for (name, value) in required {
            if value == 0 {
                return Err(anyhow!("Invalid timing.{}: must be greater than 0", name));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Vendor id to enumerate
    #[serde(default = "DeviceSettings::default_vendor_id")]
    pub vendor_id: u16,
    /// Initial duplicate-suppression flag of new sessions
    #[serde(default)]
    pub suppress_duplicates: bool,
    /// Initial reporting-disabled flag of new sessions
    #[serde(default)]
    pub disable_reporting: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            suppress_duplicates: false,
            disable_reporting: false,
        }
    }
}

impl DeviceSettings {
    fn default_vendor_id() -> u16 {
        DEFAULT_VENDOR_ID
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            logging: LoggingSettings::default(),
            buffer: BufferSettings::default(),
            timing: TimingSettings::default(),
            device: DeviceSettings::default(),
            quirks: builtin_quirks(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![Self::default_path(), PathBuf::from("/etc/hidlink/config.toml")];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to load config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content).context("Failed to parse configuration")?;
        config.validate()?;
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
            config_dir.join("hidlink").join("config.toml")
        } else {
            PathBuf::from(".config/hidlink/config.toml")
        }
    }

    /// Quirk table built from the `[[quirks]]` entries
    pub fn quirk_table(&self) -> QuirkTable {
        QuirkTable::new(self.quirks.clone())
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

        if self.buffer.capacity == 0 {
            return Err(anyhow!("Invalid buffer.capacity: must be greater than 0"));
        }

        self.timing.validate()?;

        for quirk in &self.quirks {
            if let (Some(min), Some(max)) = (quirk.min_version, quirk.max_version) {
                if min > max {
                    return Err(anyhow!(
                        "Invalid quirk for vendor {:04x}: min_version {} exceeds max_version {}",
                        quirk.vendor_id,
                        min,
                        max
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Load a configuration file, expanding `~` in the path
pub fn load_config(path: &str) -> Result<EngineConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    EngineConfig::load(Some(path_buf))
}
