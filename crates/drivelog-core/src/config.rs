//! Engine configuration.
//!
//! Every section is `#[serde(default)]`, so a partial TOML file only needs
//! the keys it changes:
//!
//! ```toml
//! [tracking]
//! forced_capture_interval = 15
//!
//! [address]
//! cache_ttl = 1800
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::traits::DesiredAccuracy;

/// Engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Location acquisition settings.
    pub location: LocationConfig,
    /// Waypoint filtering and batching settings.
    pub tracking: TrackingConfig,
    /// Address resolution settings.
    pub address: AddressConfig,
    /// Background execution settings.
    pub background: BackgroundConfig,
    /// Drive session settings.
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if it does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// ```
    /// use drivelog_core::Config;
    ///
    /// Config::default().validate().expect("default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.location.validate());
        errors.extend(self.tracking.validate());
        errors.extend(self.address.validate());
        errors.extend(self.background.validate());
        errors.extend(self.session.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Location acquisition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// One-shot fix timeout in seconds.
    pub one_shot_timeout: u64,
    /// Maximum age in seconds of a cached fix that may stand in for a new one.
    pub staleness_threshold: u64,
    /// Accuracy requested for continuous tracking.
    pub desired_accuracy: DesiredAccuracy,
    /// Hardware distance filter in meters for continuous tracking.
    pub distance_filter: f64,
    /// Distance filter multiplier applied in the background.
    pub background_distance_factor: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            one_shot_timeout: 10,
            staleness_threshold: 300,
            desired_accuracy: DesiredAccuracy::BestForNavigation,
            distance_filter: 5.0,
            background_distance_factor: 2.0,
        }
    }
}

impl LocationConfig {
    /// One-shot fix timeout.
    pub fn one_shot_timeout(&self) -> Duration {
        Duration::from_secs(self.one_shot_timeout)
    }

    /// Staleness threshold for cached fixes.
    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold)
    }

    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.one_shot_timeout == 0 {
            errors.push(ValidationError::new(
                "location.one_shot_timeout",
                "timeout must be at least 1 second",
            ));
        }
        if !(self.distance_filter >= 0.0) {
            errors.push(ValidationError::new(
                "location.distance_filter",
                "distance filter cannot be negative",
            ));
        }
        if !(self.background_distance_factor >= 1.0) {
            errors.push(ValidationError::new(
                "location.background_distance_factor",
                "background factor must be >= 1.0",
            ));
        }
        errors
    }
}

/// Waypoint filtering and batching settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Worst accuracy in meters accepted from continuous updates.
    pub max_continuous_accuracy: f64,
    /// Worst accuracy in meters accepted by a forced capture.
    pub max_forced_accuracy: f64,
    /// Minimum distance in meters between consecutive continuous waypoints.
    pub min_waypoint_distance: f64,
    /// Forced capture interval in seconds.
    pub forced_capture_interval: u64,
    /// Persist after this many accepted continuous waypoints.
    pub flush_every: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_continuous_accuracy: 50.0,
            max_forced_accuracy: 100.0,
            min_waypoint_distance: 5.0,
            forced_capture_interval: 10,
            flush_every: 10,
        }
    }
}

impl TrackingConfig {
    /// Forced capture interval.
    pub fn forced_capture_interval(&self) -> Duration {
        Duration::from_secs(self.forced_capture_interval)
    }

    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !(self.max_continuous_accuracy > 0.0) {
            errors.push(ValidationError::new(
                "tracking.max_continuous_accuracy",
                "accuracy bound must be positive",
            ));
        }
        if self.max_forced_accuracy < self.max_continuous_accuracy {
            errors.push(ValidationError::new(
                "tracking.max_forced_accuracy",
                "forced capture bound cannot be stricter than the continuous bound",
            ));
        }
        if !(self.min_waypoint_distance >= 0.0) {
            errors.push(ValidationError::new(
                "tracking.min_waypoint_distance",
                "distance cannot be negative",
            ));
        }
        if self.forced_capture_interval == 0 {
            errors.push(ValidationError::new(
                "tracking.forced_capture_interval",
                "interval must be at least 1 second",
            ));
        }
        if self.flush_every == 0 {
            errors.push(ValidationError::new(
                "tracking.flush_every",
                "batch size must be at least 1",
            ));
        }
        errors
    }
}

/// Address resolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressConfig {
    /// Reverse-geocoding wait in seconds.
    pub resolve_timeout: u64,
    /// Cache entry lifetime in seconds.
    pub cache_ttl: u64,
    /// Entry count above which expired entries are swept.
    pub cache_max_entries: usize,
    /// Separator between label components.
    pub separator: String,
    /// Maximum number of components in a label.
    pub max_components: usize,
}

impl Default for AddressConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: 5,
            cache_ttl: 3600,
            cache_max_entries: 200,
            separator: ", ".to_string(),
            max_components: 3,
        }
    }
}

impl AddressConfig {
    /// Reverse-geocoding wait.
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout)
    }

    /// Cache entry lifetime.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.resolve_timeout == 0 {
            errors.push(ValidationError::new(
                "address.resolve_timeout",
                "timeout must be at least 1 second",
            ));
        }
        if self.cache_max_entries == 0 {
            errors.push(ValidationError::new(
                "address.cache_max_entries",
                "cache must hold at least one entry",
            ));
        }
        if self.max_components == 0 {
            errors.push(ValidationError::new(
                "address.max_components",
                "labels need at least one component",
            ));
        }
        errors
    }
}

/// Background execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Renewal period in seconds; must be shorter than the platform expiry.
    pub renew_interval: u64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self { renew_interval: 20 }
    }
}

impl BackgroundConfig {
    /// Renewal period.
    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval)
    }

    fn validate(&self) -> Vec<ValidationError> {
        if self.renew_interval == 0 {
            vec![ValidationError::new(
                "background.renew_interval",
                "interval must be at least 1 second",
            )]
        } else {
            Vec::new()
        }
    }
}

/// Drive session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Attempts to obtain an end location before asking for manual input.
    pub end_max_attempts: u32,
    /// Per-attempt fix timeout in seconds when ending a drive.
    pub end_attempt_timeout: u64,
    /// Pause in milliseconds between end-location attempts.
    pub end_retry_delay_ms: u64,
    /// Elapsed-time refresh period in milliseconds.
    pub elapsed_refresh_ms: u64,
    /// Capacity of the session event channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            end_max_attempts: 3,
            end_attempt_timeout: 5,
            end_retry_delay_ms: 500,
            elapsed_refresh_ms: 1000,
            event_capacity: 100,
        }
    }
}

impl SessionConfig {
    /// Per-attempt fix timeout when ending a drive.
    pub fn end_attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.end_attempt_timeout)
    }

    /// Pause between end-location attempts.
    pub fn end_retry_delay(&self) -> Duration {
        Duration::from_millis(self.end_retry_delay_ms)
    }

    /// Elapsed-time refresh period.
    pub fn elapsed_refresh(&self) -> Duration {
        Duration::from_millis(self.elapsed_refresh_ms)
    }

    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.end_max_attempts == 0 {
            errors.push(ValidationError::new(
                "session.end_max_attempts",
                "at least one attempt is required",
            ));
        }
        if self.end_attempt_timeout == 0 {
            errors.push(ValidationError::new(
                "session.end_attempt_timeout",
                "timeout must be at least 1 second",
            ));
        }
        if self.elapsed_refresh_ms == 0 {
            errors.push(ValidationError::new(
                "session.elapsed_refresh_ms",
                "refresh period must be positive",
            ));
        }
        if self.event_capacity == 0 {
            errors.push(ValidationError::new(
                "session.event_capacity",
                "event channel needs capacity",
            ));
        }
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// The field path (e.g., `tracking.flush_every`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("drivelog")
        .join("config.toml")
}
