//! Capacity planning
//!
//! Tracks per-resource usage as a percentage of capacity and forecasts it
//! over a long horizon. Measurements are assumed to arrive hourly, which is
//! what turns the regression slope into a per-day growth rate.

use crate::alerts::{format_duration, Severity};
use crate::config::CapacityConfig;
use crate::error::{Result, VigilError};
use crate::history::{values, HistoryStore, Observation};
use crate::shutdown::ShutdownSignal;
use crate::trend::{self, linear_slope, variance, Trend};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const HOURS_PER_DAY: f64 = 24.0;

/// Growth is estimated from the most recent measurements only
const GROWTH_WINDOW: usize = 30;

const CRITICAL_USAGE: f64 = 90.0;
const WARNING_USAGE: f64 = 80.0;

const EXHAUSTION_WARNING: Duration = Duration::from_secs(30 * 86_400);
const EXHAUSTION_CRITICAL: Duration = Duration::from_secs(7 * 86_400);

/// One observation of a resource with its capacity at that moment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub capacity: f64,
    /// Percent of capacity in use, 0..=100
    pub usage: f64,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl Measurement {
    pub fn new(value: f64, capacity: f64) -> Self {
        Self::at(Utc::now(), value, capacity)
    }

    pub fn at(timestamp: DateTime<Utc>, value: f64, capacity: f64) -> Self {
        Self {
            timestamp,
            value,
            capacity,
            usage: usage_percent(value, capacity),
            tags: HashMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = tags;
        self
    }
}

impl Observation for Measurement {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn value(&self) -> f64 {
        self.usage
    }
}

/// Usage as a percentage of capacity, clamped to 0..=100.
pub fn usage_percent(value: f64, capacity: f64) -> f64 {
    if capacity <= 0.0 || !capacity.is_finite() {
        warn!("Non-positive capacity {}, treating usage as 0", capacity);
        return 0.0;
    }
    (value / capacity * 100.0).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityAlert {
    pub severity: Severity,
    pub message: String,
    pub threshold: f64,
    pub observed: f64,
    pub raised_at: DateTime<Utc>,
}

impl CapacityAlert {
    fn new(severity: Severity, message: String, threshold: f64, observed: f64) -> Self {
        Self {
            severity,
            message,
            threshold,
            observed,
            raised_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub resource: String,
    /// Latest raw value, in the resource's own unit
    pub current_value: f64,
    pub capacity: f64,
    /// Latest usage percentage
    pub current_usage: f64,
    pub forecasted_usage: f64,
    pub forecast_at: DateTime<Utc>,
    /// Percentage points per day
    pub growth_rate: f64,
    pub time_to_exhaustion: Option<Duration>,
    pub recommendation: String,
    pub confidence: f64,
    pub trend: Trend,
    pub alerts: Vec<CapacityAlert>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Healthy,
    Warning,
    Critical,
}

impl ResourceStatus {
    pub fn from_usage(usage: f64) -> Self {
        match usage {
            u if u >= CRITICAL_USAGE => ResourceStatus::Critical,
            u if u >= WARNING_USAGE => ResourceStatus::Warning,
            _ => ResourceStatus::Healthy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub name: String,
    pub current_value: f64,
    pub capacity: f64,
    pub utilization: f64,
    pub growth_rate: f64,
    pub time_to_exhaustion: Option<Duration>,
    pub status: ResourceStatus,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityReport {
    pub generated_at: DateTime<Utc>,
    pub report_period: Duration,
    pub resources: Vec<ResourceSummary>,
    pub recommendations: Vec<String>,
    /// 0 (everything full) to 100 (everything empty)
    pub health_score: f64,
}

pub struct CapacityPlanner {
    config: CapacityConfig,
    history: HistoryStore<Measurement>,
    forecasts: RwLock<HashMap<String, Forecast>>,
}

impl CapacityPlanner {
    pub fn new(config: CapacityConfig) -> Self {
        let history = HistoryStore::new(config.history_window());
        Self {
            config,
            history,
            forecasts: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CapacityConfig {
        &self.config
    }

    pub async fn add_measurement(
        &self,
        resource: &str,
        value: f64,
        capacity: f64,
        tags: HashMap<String, String>,
    ) {
        let measurement = Measurement::new(value, capacity).with_tags(tags);
        self.history.push(resource, measurement).await;
    }

    pub async fn push_measurement(&self, resource: &str, measurement: Measurement) {
        self.history.push(resource, measurement).await;
    }

    pub async fn history(&self, resource: &str) -> Vec<Measurement> {
        self.history.snapshot(resource).await
    }

    pub async fn forecast_capacity(&self, resource: &str) -> Result<Forecast> {
        let data = self.history.snapshot(resource).await;
        let need = self.config.min_data_points.max(1);
        let Some(latest) = data.last().filter(|_| data.len() >= need) else {
            return Err(VigilError::InsufficientData {
                need,
                have: data.len(),
            });
        };

        let usage = values(&data);
        let current_usage = latest.usage;
        let trend = trend::analyze(&data).map_or(Trend::Linear, |a| a.trend);
        let growth_rate = growth_rate(&usage);

        let days = self.config.forecast_days();
        let forecasted_usage = trend.extrapolate(current_usage, growth_rate, days);

        let time_to_exhaustion =
            (growth_rate > 0.0).then(|| time_to_exhaustion(current_usage, growth_rate));

        let alerts = self.alerts(resource, current_usage, forecasted_usage, time_to_exhaustion);
        let recommendation = self.recommendation(
            resource,
            current_usage,
            forecasted_usage,
            growth_rate,
            time_to_exhaustion,
        );

        let forecast = Forecast {
            resource: resource.to_string(),
            current_value: latest.value,
            capacity: latest.capacity,
            current_usage,
            forecasted_usage,
            forecast_at: Utc::now() + forecast_offset(self.config.forecast_window()),
            growth_rate,
            time_to_exhaustion,
            recommendation,
            confidence: self.confidence(&usage, trend),
            trend,
            alerts,
        };

        debug!(
            "Forecast {}: {:.1}% -> {:.1}% ({}, {:.2}%/day)",
            resource,
            current_usage,
            forecasted_usage,
            trend.label(),
            growth_rate
        );

        self.forecasts
            .write()
            .await
            .insert(resource.to_string(), forecast.clone());

        Ok(forecast)
    }

    fn confidence(&self, usage: &[f64], trend: Trend) -> f64 {
        let wanted = (self.config.min_data_points.max(1) * 3) as f64;
        let data_factor = (usage.len() as f64 / wanted).min(1.0);
        let variance_factor = 1.0 / (1.0 + variance(usage) / 100.0);
        let trend_factor = match trend {
            Trend::Linear => 0.9,
            Trend::Exponential => 0.7,
            Trend::Seasonal => 0.8,
        };
        data_factor * variance_factor * trend_factor
    }

    fn alerts(
        &self,
        resource: &str,
        current: f64,
        forecasted: f64,
        tte: Option<Duration>,
    ) -> Vec<CapacityAlert> {
        let mut alerts = Vec::new();

        if current >= CRITICAL_USAGE {
            alerts.push(CapacityAlert::new(
                Severity::Critical,
                format!("{} is at critical capacity ({:.1}%)", resource, current),
                CRITICAL_USAGE,
                current,
            ));
        } else if current >= WARNING_USAGE {
            alerts.push(CapacityAlert::new(
                Severity::Warning,
                format!("{} is approaching capacity limit ({:.1}%)", resource, current),
                WARNING_USAGE,
                current,
            ));
        }

        if forecasted >= CRITICAL_USAGE {
            alerts.push(CapacityAlert::new(
                Severity::Warning,
                format!(
                    "{} forecasted to reach critical capacity ({:.1}%) in {}",
                    resource,
                    forecasted,
                    format_duration(self.config.forecast_window())
                ),
                CRITICAL_USAGE,
                forecasted,
            ));
        }

        if let Some(tte) = tte.filter(|t| *t < EXHAUSTION_WARNING) {
            let severity = if tte < EXHAUSTION_CRITICAL {
                Severity::Critical
            } else {
                Severity::Warning
            };
            alerts.push(CapacityAlert::new(
                severity,
                format!(
                    "{} will exhaust capacity in approximately {}",
                    resource,
                    format_duration(tte)
                ),
                100.0,
                current,
            ));
        }

        alerts
    }

    fn recommendation(
        &self,
        resource: &str,
        current: f64,
        forecasted: f64,
        growth_rate: f64,
        tte: Option<Duration>,
    ) -> String {
        let window = format_duration(self.config.forecast_window());

        if current < 70.0 && forecasted < WARNING_USAGE {
            return format!("{} capacity is healthy. Continue monitoring.", resource);
        }
        if current >= CRITICAL_USAGE {
            return format!(
                "URGENT: {} is at critical capacity. Immediate expansion required.",
                resource
            );
        }
        if forecasted >= CRITICAL_USAGE {
            return format!(
                "Plan capacity expansion for {} within {} to avoid exhaustion.",
                resource, window
            );
        }
        if let Some(tte) = tte.filter(|t| *t < EXHAUSTION_WARNING) {
            return format!(
                "Schedule capacity expansion for {} within the next 30 days (estimated exhaustion in {}).",
                resource,
                format_duration(tte)
            );
        }
        if growth_rate > self.config.growth_threshold {
            return format!(
                "{} is growing rapidly ({:.1}% per day). Monitor closely and plan for expansion.",
                resource, growth_rate
            );
        }
        format!("{} capacity is adequate. Review in {}.", resource, window)
    }

    /// Last cached forecast for a resource
    pub async fn forecast(&self, resource: &str) -> Option<Forecast> {
        self.forecasts.read().await.get(resource).cloned()
    }

    pub async fn all_forecasts(&self) -> HashMap<String, Forecast> {
        self.forecasts.read().await.clone()
    }

    /// Forecast every known resource and summarize host capacity.
    ///
    /// Resources that cannot be forecast yet are left out of the report.
    pub async fn generate_report(&self) -> CapacityReport {
        let mut resources = Vec::new();
        let mut recommendations = Vec::new();

        for name in self.history.keys().await {
            let forecast = match self.forecast_capacity(&name).await {
                Ok(f) => f,
                Err(e) => {
                    error!("Failed to forecast capacity for {}: {}", name, e);
                    continue;
                }
            };

            let status = ResourceStatus::from_usage(forecast.current_usage);
            if status != ResourceStatus::Healthy {
                recommendations.push(forecast.recommendation.clone());
            }

            resources.push(ResourceSummary {
                name,
                current_value: forecast.current_value,
                capacity: forecast.capacity,
                utilization: forecast.current_usage,
                growth_rate: forecast.growth_rate,
                time_to_exhaustion: forecast.time_to_exhaustion,
                status,
                recommendation: forecast.recommendation,
            });
        }

        let health_score = if resources.is_empty() {
            0.0
        } else {
            resources
                .iter()
                .map(|r| (100.0 - r.utilization).max(0.0))
                .sum::<f64>()
                / resources.len() as f64
        };

        CapacityReport {
            generated_at: Utc::now(),
            report_period: self.config.forecast_window(),
            resources,
            recommendations,
            health_score,
        }
    }

    /// Recompute every forecast. Returns how many succeeded.
    pub async fn refresh_all(&self) -> usize {
        let mut refreshed = 0;
        for resource in self.history.keys().await {
            match self.forecast_capacity(&resource).await {
                Ok(_) => refreshed += 1,
                Err(e) if e.is_transient() => debug!("Skipping {}: {}", resource, e),
                Err(e) => warn!("Failed to forecast {}: {}", resource, e),
            }
        }
        refreshed
    }

    /// Periodically refresh forecasts until shutdown
    pub async fn run(&self, shutdown: ShutdownSignal) {
        info!(
            "Capacity planner running (interval={}s)",
            self.config.update_interval_secs
        );
        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                _ = tokio::time::sleep(self.config.update_interval()) => {
                    let refreshed = self.refresh_all().await;
                    debug!("Refreshed {} forecasts", refreshed);
                }
            }
        }
        info!("Capacity planner stopped");
    }
}

/// Percentage points per day from the recent hourly slope
fn growth_rate(usage: &[f64]) -> f64 {
    let recent = &usage[usage.len().saturating_sub(GROWTH_WINDOW)..];
    linear_slope(recent) * HOURS_PER_DAY
}

fn time_to_exhaustion(current_usage: f64, growth_rate: f64) -> Duration {
    let remaining = 100.0 - current_usage;
    if remaining <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(remaining / growth_rate * 86_400.0).unwrap_or(Duration::MAX)
}

/// Out-of-range windows saturate at a century instead of overflowing.
fn forecast_offset(window: Duration) -> ChronoDuration {
    ChronoDuration::from_std(window)
        .ok()
        .filter(|offset| Utc::now().checked_add_signed(*offset).is_some())
        .unwrap_or_else(|| ChronoDuration::days(36_500))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Duration as ChronoDuration;

    fn planner() -> CapacityPlanner {
        CapacityPlanner::new(CapacityConfig::default())
    }

    /// Hourly measurements ending now
    async fn feed(planner: &CapacityPlanner, resource: &str, values: &[f64], capacity: f64) {
        let start = Utc::now() - ChronoDuration::hours(values.len() as i64);
        for (i, v) in values.iter().enumerate() {
            let ts = start + ChronoDuration::hours(i as i64);
            planner
                .push_measurement(resource, Measurement::at(ts, *v, capacity))
                .await;
        }
    }

    #[test]
    fn test_usage_percent() {
        assert_relative_eq!(usage_percent(50.0, 200.0), 25.0);
        assert_eq!(usage_percent(300.0, 200.0), 100.0);
        assert_eq!(usage_percent(-5.0, 200.0), 0.0);
        assert_eq!(usage_percent(10.0, 0.0), 0.0);
    }

    #[test]
    fn test_status_buckets() {
        assert_eq!(ResourceStatus::from_usage(95.0), ResourceStatus::Critical);
        assert_eq!(ResourceStatus::from_usage(80.0), ResourceStatus::Warning);
        assert_eq!(ResourceStatus::from_usage(79.9), ResourceStatus::Healthy);
    }

    #[tokio::test]
    async fn test_insufficient_data() {
        let planner = planner();
        feed(&planner, "disk_root", &[50.0; 19], 100.0).await;

        let err = planner.forecast_capacity("disk_root").await.unwrap_err();
        assert!(matches!(err, VigilError::InsufficientData { need: 20, have: 19 }));
    }

    #[tokio::test]
    async fn test_flat_resource_is_healthy() {
        let planner = planner();
        feed(&planner, "memory", &[40.0; 20], 100.0).await;

        let forecast = planner.forecast_capacity("memory").await.unwrap();
        assert_eq!(forecast.trend, Trend::Linear);
        assert_eq!(forecast.growth_rate, 0.0);
        assert!(forecast.time_to_exhaustion.is_none());
        assert!(forecast.alerts.is_empty());
        assert_eq!(forecast.recommendation, "memory capacity is healthy. Continue monitoring.");
        // 20 of 60 wanted points, no variance, linear factor.
        assert_relative_eq!(forecast.confidence, 0.3, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_shrinking_resource_has_no_exhaustion() {
        let planner = planner();
        let series: Vec<f64> = (0..25).map(|i| 60.0 - i as f64).collect();
        feed(&planner, "disk_home", &series, 100.0).await;

        let forecast = planner.forecast_capacity("disk_home").await.unwrap();
        assert!(forecast.growth_rate < 0.0);
        assert!(forecast.time_to_exhaustion.is_none());
    }

    #[tokio::test]
    async fn test_growing_resource() {
        let planner = planner();
        // One point per hour: 24 points per day.
        let series: Vec<f64> = (0..25).map(|i| 40.0 + i as f64).collect();
        feed(&planner, "disk_root", &series, 100.0).await;

        let forecast = planner.forecast_capacity("disk_root").await.unwrap();
        assert_eq!(forecast.trend, Trend::Linear);
        assert_relative_eq!(forecast.growth_rate, 24.0, epsilon = 1e-9);
        assert_relative_eq!(forecast.current_usage, 64.0);
        assert_relative_eq!(forecast.forecasted_usage, 64.0 + 24.0 * 30.0, epsilon = 1e-6);

        // 36 points left at 24 per day.
        let tte = forecast.time_to_exhaustion.unwrap();
        assert_relative_eq!(tte.as_secs_f64(), 36.0 * 3600.0, epsilon = 1.0);

        let severities: Vec<Severity> = forecast.alerts.iter().map(|a| a.severity).collect();
        assert_eq!(severities, vec![Severity::Warning, Severity::Critical]);
        assert!(forecast.recommendation.starts_with("Plan capacity expansion for disk_root"));
    }

    #[tokio::test]
    async fn test_hourly_ramp_stays_linear() {
        let planner = planner();
        let series: Vec<f64> = (0..40).map(|i| 20.0 + 0.5 * i as f64).collect();
        feed(&planner, "disk_data", &series, 100.0).await;

        let forecast = planner.forecast_capacity("disk_data").await.unwrap();
        assert_eq!(forecast.trend, Trend::Linear);
        assert_relative_eq!(forecast.growth_rate, 12.0, epsilon = 1e-9);
        assert_relative_eq!(forecast.forecasted_usage, 39.5 + 12.0 * 30.0, epsilon = 1e-6);
        // 40 of 60 wanted points, variance 33.3125, linear factor.
        assert_relative_eq!(
            forecast.confidence,
            (40.0 / 60.0) * (1.0 / 1.333125) * 0.9,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_forecast_offset_saturates() {
        assert_eq!(
            forecast_offset(Duration::from_secs(3600)),
            ChronoDuration::hours(1)
        );
        assert_eq!(forecast_offset(Duration::MAX), ChronoDuration::days(36_500));
        assert_eq!(
            forecast_offset(Duration::from_secs(u64::MAX / 2)),
            ChronoDuration::days(36_500)
        );
    }

    #[tokio::test]
    async fn test_full_resource() {
        let planner = planner();
        feed(&planner, "cpu", &[95.0; 20], 100.0).await;

        let forecast = planner.forecast_capacity("cpu").await.unwrap();
        assert_eq!(forecast.alerts[0].severity, Severity::Critical);
        assert!(forecast.recommendation.starts_with("URGENT"));
    }

    #[tokio::test]
    async fn test_forecast_cache() {
        let planner = planner();
        feed(&planner, "memory", &[40.0; 20], 100.0).await;
        assert!(planner.forecast("memory").await.is_none());

        assert_eq!(planner.refresh_all().await, 1);
        assert!(planner.forecast("memory").await.is_some());
        assert_eq!(planner.all_forecasts().await, planner.all_forecasts().await);
    }

    #[tokio::test]
    async fn test_report() {
        let planner = planner();
        feed(&planner, "cpu", &[95.0; 20], 100.0).await;
        feed(&planner, "memory", &[8.0; 20], 16.0).await;
        feed(&planner, "disk_new", &[10.0; 5], 100.0).await;

        let report = planner.generate_report().await;
        assert_eq!(report.resources.len(), 2);
        assert_relative_eq!(report.health_score, (5.0 + 50.0) / 2.0);
        assert_eq!(report.recommendations.len(), 1);
        assert!(report.recommendations[0].contains("cpu"));

        let memory = report.resources.iter().find(|r| r.name == "memory").unwrap();
        assert_eq!(memory.status, ResourceStatus::Healthy);
        assert_eq!(memory.current_value, 8.0);
        assert_relative_eq!(memory.utilization, 50.0);
    }

    #[tokio::test]
    async fn test_empty_report() {
        let report = planner().generate_report().await;
        assert!(report.resources.is_empty());
        assert_eq!(report.health_score, 0.0);
    }
}
