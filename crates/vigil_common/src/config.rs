//! Configuration management for Vigil.
//!
//! Loads settings from /etc/vigil/config.toml or uses defaults.
//! Every duration is stored as whole seconds and exposed through an
//! accessor returning `std::time::Duration`.

use crate::error::{Result, VigilError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/vigil/config.toml";

/// Default config file path for fallback
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/vigil/config.toml";

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

/// Driver loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// How often the host is sampled
    #[serde(default = "default_collect_interval")]
    pub collect_interval_secs: u64,

    /// Live utilization above this raises a threshold alert (percent)
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold_percent: f64,

    /// Predictions above this failure probability raise an alert
    #[serde(default = "default_prediction_alert_probability")]
    pub prediction_alert_probability: f64,
}

fn default_collect_interval() -> u64 {
    30
}

fn default_alert_threshold() -> f64 {
    90.0
}

fn default_prediction_alert_probability() -> f64 {
    0.5
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            collect_interval_secs: default_collect_interval(),
            alert_threshold_percent: default_alert_threshold(),
            prediction_alert_probability: default_prediction_alert_probability(),
        }
    }
}

impl DaemonConfig {
    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval_secs.max(1))
    }
}

/// Failure predictor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Samples older than this are pruned
    #[serde(default = "default_predictor_history_window")]
    pub history_window_secs: u64,

    /// How far ahead predictions look
    #[serde(default = "default_prediction_window")]
    pub prediction_window_secs: u64,

    /// Minimum samples before a metric can be predicted
    #[serde(default = "default_predictor_min_points")]
    pub min_data_points: usize,

    /// Z-score above which the latest sample counts as anomalous
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,

    /// Samples considered by the anomaly detector
    #[serde(default = "default_anomaly_window")]
    pub anomaly_window: usize,

    /// Expected spacing between samples; one regression index step
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u64,

    /// Refresh cadence for cached predictions
    #[serde(default = "default_predictor_update_interval")]
    pub update_interval_secs: u64,
}

fn default_predictor_history_window() -> u64 {
    DAY
}

fn default_prediction_window() -> u64 {
    4 * HOUR
}

fn default_predictor_min_points() -> usize {
    10
}

fn default_anomaly_threshold() -> f64 {
    2.0
}

fn default_anomaly_window() -> usize {
    20
}

fn default_sample_interval() -> u64 {
    60
}

fn default_predictor_update_interval() -> u64 {
    5 * 60
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            history_window_secs: default_predictor_history_window(),
            prediction_window_secs: default_prediction_window(),
            min_data_points: default_predictor_min_points(),
            anomaly_threshold: default_anomaly_threshold(),
            anomaly_window: default_anomaly_window(),
            sample_interval_secs: default_sample_interval(),
            update_interval_secs: default_predictor_update_interval(),
        }
    }
}

impl PredictorConfig {
    pub fn history_window(&self) -> Duration {
        Duration::from_secs(self.history_window_secs)
    }

    pub fn prediction_window(&self) -> Duration {
        Duration::from_secs(self.prediction_window_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs.max(1))
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs.max(1))
    }
}

/// Capacity planner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// How far ahead forecasts look
    #[serde(default = "default_forecast_window")]
    pub forecast_window_secs: u64,

    /// Measurements older than this are pruned
    #[serde(default = "default_capacity_history_window")]
    pub history_window_secs: u64,

    /// Minimum measurements before a resource can be forecast
    #[serde(default = "default_capacity_min_points")]
    pub min_data_points: usize,

    /// Daily growth (percent) considered fast
    #[serde(default = "default_growth_threshold")]
    pub growth_threshold: f64,

    /// Refresh cadence for cached forecasts
    #[serde(default = "default_capacity_update_interval")]
    pub update_interval_secs: u64,
}

fn default_forecast_window() -> u64 {
    30 * DAY
}

fn default_capacity_history_window() -> u64 {
    90 * DAY
}

fn default_capacity_min_points() -> usize {
    20
}

fn default_growth_threshold() -> f64 {
    10.0
}

fn default_capacity_update_interval() -> u64 {
    HOUR
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            forecast_window_secs: default_forecast_window(),
            history_window_secs: default_capacity_history_window(),
            min_data_points: default_capacity_min_points(),
            growth_threshold: default_growth_threshold(),
            update_interval_secs: default_capacity_update_interval(),
        }
    }
}

impl CapacityConfig {
    pub fn forecast_window(&self) -> Duration {
        Duration::from_secs(self.forecast_window_secs)
    }

    pub fn history_window(&self) -> Duration {
        Duration::from_secs(self.history_window_secs)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs.max(1))
    }

    /// Forecast horizon in (fractional) days
    pub fn forecast_days(&self) -> f64 {
        self.forecast_window_secs as f64 / DAY as f64
    }
}

/// Remediation engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationConfig {
    #[serde(default = "default_true")]
    pub enable_auto_remediation: bool,

    /// Extra attempts after a failed action
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Used when an action carries no timeout of its own
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,

    #[serde(default)]
    pub dry_run: bool,

    /// Skip rules that are not marked auto_execute
    #[serde(default)]
    pub require_approval: bool,

    /// Never run the same rule twice concurrently
    #[serde(default = "default_true")]
    pub single_flight: bool,

    #[serde(default = "default_history_limit")]
    pub max_history_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    30
}

fn default_action_timeout() -> u64 {
    5 * 60
}

fn default_history_limit() -> usize {
    1000
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            enable_auto_remediation: true,
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            action_timeout_secs: default_action_timeout(),
            dry_run: false,
            require_approval: false,
            single_flight: true,
            max_history_size: default_history_limit(),
        }
    }
}

impl RemediationConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub predictor: PredictorConfig,

    #[serde(default)]
    pub capacity: CapacityConfig,

    #[serde(default)]
    pub remediation: RemediationConfig,

    /// Optional TOML file with `[[rules]]` tables replacing the built-in rules
    #[serde(default)]
    pub rules_path: Option<PathBuf>,
}

impl VigilConfig {
    /// Load config from file, or return defaults
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_PATH)
            .or_else(|_| Self::load_from_path(DEFAULT_CONFIG_PATH))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                VigilConfig::default()
            })
    }

    /// Load config from a specific path
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: VigilConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject values that parse but cannot drive the agent
    pub fn validate(&self) -> Result<()> {
        let probability = self.daemon.prediction_alert_probability;
        if !(0.0..=1.0).contains(&probability) {
            return Err(VigilError::Config(format!(
                "daemon.prediction_alert_probability must be within 0..=1, got {}",
                probability
            )));
        }
        if !self.daemon.alert_threshold_percent.is_finite() {
            return Err(VigilError::Config(
                "daemon.alert_threshold_percent must be a number".to_string(),
            ));
        }
        if !(self.predictor.anomaly_threshold > 0.0 && self.predictor.anomaly_threshold.is_finite())
        {
            return Err(VigilError::Config(format!(
                "predictor.anomaly_threshold must be positive, got {}",
                self.predictor.anomaly_threshold
            )));
        }
        if self.remediation.max_history_size == 0 {
            return Err(VigilError::Config(
                "remediation.max_history_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = VigilConfig::default();
        assert_eq!(config.predictor.min_data_points, 10);
        assert_eq!(config.predictor.prediction_window(), Duration::from_secs(4 * 3600));
        assert_eq!(config.capacity.min_data_points, 20);
        assert_eq!(config.capacity.forecast_days(), 30.0);
        assert_eq!(config.remediation.max_history_size, 1000);
        assert!(config.remediation.enable_auto_remediation);
        assert!(!config.remediation.dry_run);
        assert!(config.rules_path.is_none());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[predictor]
min_data_points = 5
prediction_window_secs = 3600

[remediation]
dry_run = true
max_retries = 0
"#;
        let config: VigilConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.predictor.min_data_points, 5);
        assert_eq!(config.predictor.prediction_window_secs, 3600);
        assert!(config.remediation.dry_run);
        assert_eq!(config.remediation.max_retries, 0);
        // Defaults for missing fields
        assert_eq!(config.predictor.anomaly_window, 20);
        assert_eq!(config.remediation.retry_delay_secs, 30);
        assert_eq!(config.capacity.growth_threshold, 10.0);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config: VigilConfig = toml::from_str("").unwrap();
        assert_eq!(config.daemon.collect_interval_secs, 30);
        assert_eq!(config.capacity.update_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rules_path = \"/etc/vigil/rules.toml\"").unwrap();
        writeln!(file, "[daemon]\ncollect_interval_secs = 10").unwrap();

        let config = VigilConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.daemon.collect_interval_secs, 10);
        assert_eq!(
            config.rules_path.as_deref(),
            Some(Path::new("/etc/vigil/rules.toml"))
        );
    }

    #[test]
    fn test_load_from_missing_path_fails() {
        let result = VigilConfig::load_from_path("/nonexistent/vigil.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        assert!(VigilConfig::default().validate().is_ok());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[daemon]\nprediction_alert_probability = 1.5").unwrap();
        match VigilConfig::load_from_path(file.path()) {
            Err(VigilError::Config(message)) => {
                assert!(message.contains("prediction_alert_probability"))
            }
            other => panic!("expected Config error, got {:?}", other),
        }

        let mut config = VigilConfig::default();
        config.remediation.max_history_size = 0;
        assert!(matches!(config.validate(), Err(VigilError::Config(_))));

        let mut config = VigilConfig::default();
        config.predictor.anomaly_threshold = 0.0;
        assert!(matches!(config.validate(), Err(VigilError::Config(_))));
    }

    #[test]
    fn test_zero_sample_interval_is_clamped() {
        let config = PredictorConfig {
            sample_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.sample_interval(), Duration::from_secs(1));
    }
}
