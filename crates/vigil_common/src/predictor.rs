//! Failure prediction
//!
//! Projects each metric forward over the prediction window and turns the
//! projected value into a failure probability, a risk level and a
//! time-to-failure estimate. One regression step is one `sample_interval`.

use crate::anomaly::AnomalyDetector;
use crate::config::PredictorConfig;
use crate::error::{Result, VigilError};
use crate::history::{values, HistoryStore, Sample};
use crate::shutdown::ShutdownSignal;
use crate::trend::{self, variance, Trend};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const SECS_PER_DAY: f64 = 86_400.0;

/// Samples used to estimate the recent rate of change
const RATE_WINDOW: usize = 10;

/// Reported when the metric is not heading towards its threshold
const TTF_NOT_APPROACHING: Duration = Duration::from_secs(24 * 3600);

/// Reported when the metric already sits at or over its threshold
const TTF_ALREADY_BREACHED: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// First match wins, most severe first.
    pub fn assess(failure_probability: f64, predicted_value: f64) -> Self {
        if failure_probability >= 0.75 || predicted_value >= 90.0 {
            RiskLevel::Critical
        } else if failure_probability >= 0.50 || predicted_value >= 80.0 {
            RiskLevel::High
        } else if failure_probability >= 0.25 || predicted_value >= 70.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Forward-looking risk snapshot for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub metric: String,
    pub current_value: f64,
    pub predicted_value: f64,
    pub confidence: f64,
    pub trend: Trend,
    pub risk_level: RiskLevel,
    pub failure_probability: f64,
    /// Only estimated when failure is more likely than not
    pub time_to_failure: Option<Duration>,
    pub recommendation: String,
    pub predicted_at: DateTime<Utc>,
}

/// Per-mount disk metrics (`disk_usage_root`, `disk_usage_var_log`) share
/// the `disk_usage` thresholds and advice.
fn metric_family(metric: &str) -> &str {
    if metric.starts_with("disk_usage") {
        "disk_usage"
    } else {
        metric
    }
}

/// Value at which a metric is considered failed
pub fn critical_threshold(metric: &str) -> f64 {
    match metric_family(metric) {
        "cpu_usage" | "memory_usage" => 95.0,
        "disk_usage" => 90.0,
        "network_errors" => 100.0,
        _ => 90.0,
    }
}

pub fn failure_probability(predicted: f64, threshold: f64) -> f64 {
    match predicted {
        p if p >= threshold => 0.95,
        p if p >= threshold * 0.9 => 0.75,
        p if p >= threshold * 0.8 => 0.50,
        p if p >= threshold * 0.7 => 0.25,
        _ => 0.10,
    }
}

pub fn recommendation(metric: &str, probability: f64) -> String {
    if probability < 0.25 {
        return "System is operating normally. Continue monitoring.".to_string();
    }
    let critical = probability >= 0.75;

    match (metric_family(metric), critical) {
        ("cpu_usage", true) => "CRITICAL: CPU usage predicted to exceed safe limits. \
            Identify runaway processes or add CPU capacity."
            .to_string(),
        ("cpu_usage", false) => {
            "WARNING: CPU usage is trending upward. Review scheduled workloads.".to_string()
        }
        ("memory_usage", true) => "CRITICAL: Memory exhaustion predicted. \
            Restart leaking services or add memory."
            .to_string(),
        ("memory_usage", false) => {
            "WARNING: Memory usage is climbing. Check for leaks and cache growth.".to_string()
        }
        ("disk_usage", true) => "CRITICAL: Disk predicted to fill. \
            Clean up logs and temporary files or expand the volume."
            .to_string(),
        ("disk_usage", false) => {
            "WARNING: Disk usage is growing. Schedule a cleanup.".to_string()
        }
        (other, _) => format!(
            "Monitor {} closely. Predicted values are approaching the critical threshold.",
            other
        ),
    }
}

pub struct FailurePredictor {
    config: PredictorConfig,
    history: HistoryStore<Sample>,
    detector: AnomalyDetector,
    predictions: RwLock<HashMap<String, Prediction>>,
}

impl FailurePredictor {
    pub fn new(config: PredictorConfig) -> Self {
        let history = HistoryStore::new(config.history_window());
        let detector = AnomalyDetector::new(config.anomaly_window, config.anomaly_threshold);
        Self {
            config,
            history,
            detector,
            predictions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Record a value observed now
    pub async fn add_sample(&self, metric: &str, value: f64, tags: HashMap<String, String>) {
        self.history.record(metric, value, tags).await;
    }

    /// Record an already timestamped sample
    pub async fn push_sample(&self, metric: &str, sample: Sample) {
        self.history.push(metric, sample).await;
    }

    pub async fn predict_failure(&self, metric: &str) -> Result<Prediction> {
        let samples = self.history.snapshot(metric).await;
        let need = self.config.min_data_points.max(1);
        let Some(latest) = samples.last().filter(|_| samples.len() >= need) else {
            return Err(VigilError::InsufficientData {
                need,
                have: samples.len(),
            });
        };

        let series = values(&samples);
        let current = latest.value;
        let (trend, slope) =
            trend::analyze(&samples).map_or((Trend::Linear, 0.0), |a| (a.trend, a.slope));

        let anomaly = self.detector.check(&series);
        if anomaly.is_anomaly {
            warn!(
                "Anomaly detected in {}: value={:.2} z-score={:.2}",
                metric, current, anomaly.z_score
            );
        }

        let mut predicted_value = self.project(current, trend, slope).max(0.0);
        if latest.tag("type") == Some("percentage") {
            predicted_value = predicted_value.min(100.0);
        }

        let threshold = critical_threshold(metric);
        let probability = failure_probability(predicted_value, threshold);
        let time_to_failure =
            (probability > 0.5).then(|| self.time_to_failure(&series, threshold));

        let prediction = Prediction {
            metric: metric.to_string(),
            current_value: current,
            predicted_value,
            confidence: self.confidence(&series),
            trend,
            risk_level: RiskLevel::assess(probability, predicted_value),
            failure_probability: probability,
            time_to_failure,
            recommendation: recommendation(metric, probability),
            predicted_at: Utc::now(),
        };

        debug!(
            "Predicted {}: {:.2} -> {:.2} ({}, p={:.2})",
            metric,
            current,
            predicted_value,
            prediction.risk_level.as_str(),
            probability
        );

        self.predictions
            .write()
            .await
            .insert(metric.to_string(), prediction.clone());

        Ok(prediction)
    }

    /// Seasonal series are projected as linear over short horizons.
    fn project(&self, current: f64, trend: Trend, slope: f64) -> f64 {
        let interval = self.config.sample_interval().as_secs_f64();
        let daily_growth = slope * SECS_PER_DAY / interval;
        let horizon_days = self.config.prediction_window().as_secs_f64() / SECS_PER_DAY;

        let shape = match trend {
            Trend::Exponential => Trend::Exponential,
            Trend::Linear | Trend::Seasonal => Trend::Linear,
        };
        shape.extrapolate(current, daily_growth, horizon_days)
    }

    fn confidence(&self, series: &[f64]) -> f64 {
        let variance_factor = 1.0 / (1.0 + variance(series) / 100.0);
        let wanted = (self.config.min_data_points.max(1) * 2) as f64;
        let data_factor = (series.len() as f64 / wanted).min(1.0);
        variance_factor * data_factor
    }

    fn time_to_failure(&self, series: &[f64], threshold: f64) -> Duration {
        let recent = &series[series.len().saturating_sub(RATE_WINDOW)..];
        if recent.len() < 2 {
            return TTF_NOT_APPROACHING;
        }

        let avg_change = (recent[recent.len() - 1] - recent[0]) / (recent.len() - 1) as f64;
        if avg_change <= 0.0 {
            return TTF_NOT_APPROACHING;
        }

        let remaining = threshold - recent[recent.len() - 1];
        if remaining <= 0.0 {
            return TTF_ALREADY_BREACHED;
        }

        let steps = remaining / avg_change;
        Duration::try_from_secs_f64(steps * self.config.sample_interval().as_secs_f64())
            .unwrap_or(TTF_NOT_APPROACHING)
    }

    /// Last cached prediction for a metric
    pub async fn prediction(&self, metric: &str) -> Option<Prediction> {
        self.predictions.read().await.get(metric).cloned()
    }

    pub async fn all_predictions(&self) -> HashMap<String, Prediction> {
        self.predictions.read().await.clone()
    }

    pub async fn history(&self, metric: &str) -> Vec<Sample> {
        self.history.snapshot(metric).await
    }

    /// Forget a metric's samples and its cached prediction
    pub async fn clear_history(&self, metric: &str) {
        self.history.clear(metric).await;
        self.predictions.write().await.remove(metric);
    }

    /// Recompute every metric with history. Returns how many succeeded.
    pub async fn refresh_all(&self) -> usize {
        let mut refreshed = 0;
        for metric in self.history.keys().await {
            match self.predict_failure(&metric).await {
                Ok(_) => refreshed += 1,
                Err(e) if e.is_transient() => debug!("Skipping {}: {}", metric, e),
                Err(e) => warn!("Failed to predict {}: {}", metric, e),
            }
        }
        refreshed
    }

    /// Periodically refresh predictions until shutdown
    pub async fn run(&self, shutdown: ShutdownSignal) {
        info!(
            "Failure predictor running (interval={}s)",
            self.config.update_interval_secs
        );
        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                _ = tokio::time::sleep(self.config.update_interval()) => {
                    let refreshed = self.refresh_all().await;
                    debug!("Refreshed {} predictions", refreshed);
                }
            }
        }
        info!("Failure predictor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn predictor() -> FailurePredictor {
        FailurePredictor::new(PredictorConfig::default())
    }

    fn percentage() -> HashMap<String, String> {
        HashMap::from([("type".to_string(), "percentage".to_string())])
    }

    async fn feed(predictor: &FailurePredictor, metric: &str, series: &[f64]) {
        for v in series {
            predictor.add_sample(metric, *v, percentage()).await;
        }
    }

    #[test]
    fn test_risk_levels() {
        assert_eq!(RiskLevel::assess(0.10, 90.0), RiskLevel::Critical);
        assert_eq!(RiskLevel::assess(0.75, 10.0), RiskLevel::Critical);
        assert_eq!(RiskLevel::assess(0.50, 10.0), RiskLevel::High);
        assert_eq!(RiskLevel::assess(0.10, 80.0), RiskLevel::High);
        assert_eq!(RiskLevel::assess(0.25, 10.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::assess(0.10, 70.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::assess(0.10, 69.9), RiskLevel::Low);
    }

    #[test]
    fn test_probability_bands() {
        assert_eq!(failure_probability(95.0, 95.0), 0.95);
        assert_eq!(failure_probability(86.0, 95.0), 0.75);
        assert_eq!(failure_probability(76.0, 95.0), 0.50);
        assert_eq!(failure_probability(67.0, 95.0), 0.25);
        assert_eq!(failure_probability(10.0, 95.0), 0.10);
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(critical_threshold("cpu_usage"), 95.0);
        assert_eq!(critical_threshold("memory_usage"), 95.0);
        assert_eq!(critical_threshold("disk_usage"), 90.0);
        assert_eq!(critical_threshold("network_errors"), 100.0);
        assert_eq!(critical_threshold("open_files"), 90.0);
    }

    #[test]
    fn test_recommendation_tiers() {
        assert!(recommendation("cpu_usage", 0.10).contains("operating normally"));
        assert!(recommendation("cpu_usage", 0.95).starts_with("CRITICAL"));
        assert!(recommendation("disk_usage", 0.50).starts_with("WARNING"));
        assert!(recommendation("open_files", 0.75).contains("open_files"));
    }

    #[test]
    fn test_per_mount_disk_metrics() {
        assert_eq!(critical_threshold("disk_usage_root"), 90.0);
        assert_eq!(
            recommendation("disk_usage_var_log", 0.95),
            recommendation("disk_usage", 0.95)
        );
        assert!(recommendation("disk_usage_root", 0.50).starts_with("WARNING: Disk usage"));
    }

    #[tokio::test]
    async fn test_insufficient_data() {
        let predictor = predictor();
        feed(&predictor, "cpu_usage", &[50.0; 9]).await;

        match predictor.predict_failure("cpu_usage").await {
            Err(VigilError::InsufficientData { need, have }) => {
                assert_eq!(need, 10);
                assert_eq!(have, 9);
            }
            other => panic!("expected InsufficientData, got {:?}", other),
        }
        assert!(predictor.prediction("cpu_usage").await.is_none());
    }

    #[tokio::test]
    async fn test_steady_metric_is_low_risk() {
        let predictor = predictor();
        feed(&predictor, "cpu_usage", &[30.0; 20]).await;

        let prediction = predictor.predict_failure("cpu_usage").await.unwrap();
        assert_eq!(prediction.risk_level, RiskLevel::Low);
        assert_eq!(prediction.failure_probability, 0.10);
        assert!(prediction.time_to_failure.is_none());
        assert_relative_eq!(prediction.predicted_value, 30.0, epsilon = 1e-9);
        assert_relative_eq!(prediction.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_decreasing_metric_lowest_band() {
        let predictor = predictor();
        let series: Vec<f64> = (0..20).map(|i| 80.0 - 2.0 * i as f64).collect();
        feed(&predictor, "memory_usage", &series).await;

        let prediction = predictor.predict_failure("memory_usage").await.unwrap();
        assert_eq!(prediction.predicted_value, 0.0);
        assert_eq!(prediction.failure_probability, 0.10);
        assert!(prediction.time_to_failure.is_none());
    }

    #[tokio::test]
    async fn test_rising_cpu_is_critical() {
        let predictor = predictor();
        let series: Vec<f64> = (0..15).map(|i| 70.0 + 2.0 * i as f64).collect();
        feed(&predictor, "cpu_usage", &series).await;

        let prediction = predictor.predict_failure("cpu_usage").await.unwrap();
        assert_eq!(prediction.risk_level, RiskLevel::Critical);
        assert!(prediction.failure_probability >= 0.75);
        assert_eq!(prediction.predicted_value, 100.0);
        let ttf = prediction.time_to_failure.unwrap();
        assert!(ttf < Duration::from_secs(24 * 3600));
    }

    #[tokio::test]
    async fn test_time_to_failure_from_recent_rate() {
        let predictor = predictor();
        // One point per minute per step, 50 -> 69.
        let series: Vec<f64> = (0..20).map(|i| 50.0 + i as f64).collect();
        feed(&predictor, "cpu_usage", &series).await;

        let prediction = predictor.predict_failure("cpu_usage").await.unwrap();
        // 26 points to go at one point per minute.
        assert_eq!(prediction.time_to_failure, Some(Duration::from_secs(26 * 60)));
    }

    #[tokio::test]
    async fn test_untagged_metric_is_not_capped() {
        let predictor = predictor();
        for i in 0..15 {
            predictor
                .add_sample("queue_depth", 100.0 + 10.0 * i as f64, HashMap::new())
                .await;
        }
        let prediction = predictor.predict_failure("queue_depth").await.unwrap();
        assert!(prediction.predicted_value > 100.0);
    }

    #[tokio::test]
    async fn test_cache_and_clear() {
        let predictor = predictor();
        feed(&predictor, "cpu_usage", &[40.0; 12]).await;
        feed(&predictor, "memory_usage", &[40.0; 12]).await;

        assert_eq!(predictor.refresh_all().await, 2);
        let first = predictor.all_predictions().await;
        assert_eq!(first, predictor.all_predictions().await);
        assert_eq!(first.len(), 2);

        predictor.clear_history("cpu_usage").await;
        assert!(predictor.history("cpu_usage").await.is_empty());
        assert!(predictor.prediction("cpu_usage").await.is_none());
        assert!(predictor.prediction("memory_usage").await.is_some());
    }
}
