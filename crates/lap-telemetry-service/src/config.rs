//! Configuration for the telemetry service, loaded from TOML with serde
//! field defaults; CLI flags override file values at the boundary.

use std::path::Path;

use lap_telemetry_core::TelemetryError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file path
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "./lap_telemetry.sqlite3".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Maximum age in days before a lap is eligible for deletion
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_retention_days() -> u32 {
    10
}

fn default_sweep_interval_secs() -> u64 {
    // Weekly.
    604_800
}

impl RetentionConfig {
    #[must_use]
    pub fn retention_window(&self) -> time::Duration {
        time::Duration::days(i64::from(self.retention_days))
    }

    #[must_use]
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    /// # Errors
    /// Returns [`TelemetryError::InvalidArgument`] when the window or the
    /// interval is zero.
    pub fn validate(&self) -> Result<(), TelemetryError> {
        if self.retention_days == 0 {
            return Err(TelemetryError::InvalidArgument(
                "retention_days must be >= 1".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(TelemetryError::InvalidArgument(
                "sweep_interval_secs must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl TelemetryConfig {
    /// # Errors
    /// Returns [`TelemetryError::InvalidArgument`] when the TOML does not
    /// parse or fails validation.
    pub fn from_toml_str(raw: &str) -> Result<Self, TelemetryError> {
        let config: Self = toml::from_str(raw)
            .map_err(|err| TelemetryError::InvalidArgument(format!("invalid config: {err}")))?;
        config.retention.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns [`TelemetryError::InvalidArgument`] when the file cannot be
    /// read or its contents are invalid.
    pub fn load(path: &Path) -> Result<Self, TelemetryError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            TelemetryError::InvalidArgument(format!(
                "failed to read config {}: {err}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }
}
