//! Loader configuration
//!
//! Read from TOML or YAML:
//!
//! ```toml
//! refresh_interval_secs = 300
//! event_capacity = 256
//!
//! [layout]
//! tiers = [["alerts", "kpis"], ["weather", "poc"], ["heatmap"]]
//! ```

use crate::error::ConfigError;
use crate::loader::DEFAULT_EVENT_CAPACITY;
use crate::plan::TierLayout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default refresh interval (5 minutes)
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Loader configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Seconds between refresh cycles
    pub refresh_interval_secs: u64,
    /// Capacity of the progress event channel
    pub event_capacity: usize,
    /// Tier layout
    pub layout: TierLayout,
}

impl LoaderConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With refresh interval in seconds
    #[inline]
    #[must_use]
    pub fn with_refresh_interval_secs(mut self, secs: u64) -> Self {
        self.refresh_interval_secs = secs;
        self
    }

    /// With event channel capacity
    #[inline]
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// With tier layout
    #[inline]
    #[must_use]
    pub fn with_layout(mut self, layout: TierLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Refresh interval
    #[inline]
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Check value ranges and layout
    ///
    /// # Errors
    /// - `ConfigError::Invalid` for a zero interval or zero capacity
    /// - `ConfigError::Layout` for an invalid layout
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "refresh_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        self.layout.validate()?;
        Ok(())
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// Parse or validation failure
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate YAML
    ///
    /// # Errors
    /// Parse or validation failure
    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file
    ///
    /// # Errors
    /// IO, format, parse or validation failure
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        let parse: fn(&str) -> Result<Self, ConfigError> = match extension.as_deref() {
            Some("toml") => Self::from_toml_str,
            Some("yaml" | "yml") => Self::from_yaml_str,
            _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        };

        let source =
            std::fs::read_to_string(path).map_err(|err| ConfigError::io_error(path, err))?;
        let config = parse(&source)?;
        tracing::debug!(path = %path.display(), "loaded loader config");
        Ok(config)
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL.as_secs(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            layout: TierLayout::plant_monitor(),
        }
    }
}
