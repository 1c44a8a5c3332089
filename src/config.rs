//! # Dashboard Configuration
//!
//! Runtime settings for the dashboard: where the controller lives, how often
//! it is polled, which view is active and how the chart surface is sized.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! log_level = "debug"
//!
//! [controller]
//! base_url = "http://192.168.4.1"
//! request_timeout_ms = 5000
//!
//! [sync]
//! poll_interval_ms = 2000
//! view = "config"
//!
//! [chart]
//! width = 800
//! pixel_ratio = 2.0
//! snapshot_path = "chart.png"
//! ```
//!
//! Every section and field is optional; missing values fall back to the
//! defaults below.

// src/config.rs - Single configuration file
use crate::chart::{MARGIN_LEFT, MARGIN_RIGHT, MAX_PIXEL_RATIO};
use crate::sync::ViewMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the controller link, the poll loop and the chart.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub chart: ChartConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            controller: ControllerConfig::default(),
            sync: SyncConfig::default(),
            chart: ChartConfig::default(),
        }
    }
}

/// Where the controller's HTTP API is reachable.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ControllerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Poll loop settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub view: ViewMode,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            view: ViewMode::default(),
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Chart surface settings. The height is fixed by the renderer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChartConfig {
    #[serde(default = "default_chart_width")]
    pub width: u32,
    #[serde(default = "default_pixel_ratio")]
    pub pixel_ratio: f64,
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width: default_chart_width(),
            pixel_ratio: default_pixel_ratio(),
            snapshot_path: None,
        }
    }
}

impl Config {
    /// Validate value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("controller.base_url must not be empty".to_string()));
        }
        if self.sync.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("sync.poll_interval_ms must be > 0".to_string()));
        }
        let min_width = (MARGIN_LEFT + MARGIN_RIGHT) as u32;
        if self.chart.width <= min_width {
            return Err(ConfigError::Invalid(format!(
                "chart.width must be > {} to leave room for the plot",
                min_width
            )));
        }
        if !(self.chart.pixel_ratio > 0.0 && self.chart.pixel_ratio <= MAX_PIXEL_RATIO) {
            return Err(ConfigError::Invalid(format!(
                "chart.pixel_ratio must be in (0, {}]",
                MAX_PIXEL_RATIO
            )));
        }
        Ok(())
    }

    /// Map `log_level` onto a tracing level, falling back to INFO.
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

// Default value functions
fn default_log_level() -> String { "info".to_string() }
fn default_base_url() -> String { "http://192.168.4.1".to_string() }
fn default_request_timeout_ms() -> u64 { 5000 }
fn default_poll_interval_ms() -> u64 { 2000 }
fn default_chart_width() -> u32 { 640 }
fn default_pixel_ratio() -> f64 { 1.0 }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path, e);
        ConfigError::Io(e)
    })?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate()?;
    Ok(config)
}
