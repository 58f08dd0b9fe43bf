//! Alerts and the downstream sinks they are delivered to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(severity: Severity, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            title: title.into(),
            description: description.into(),
            metadata: Map::new(),
            raised_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Delivery failure reported by a sink; a message is all a caller can log.
#[derive(Error, Debug)]
#[error("Sink error: {0}")]
pub struct SinkError(pub String);

pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Where alerts go. Delivery is best effort; callers log failures.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send_alert(&self, alert: Alert) -> SinkResult<()>;
}

/// Where periodic metric payloads go.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn send_metrics(&self, kind: &str, payload: Value) -> SinkResult<()>;
}

/// Sink that writes alerts and metrics to the tracing log
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

#[async_trait]
impl AlertSink for TracingSink {
    async fn send_alert(&self, alert: Alert) -> SinkResult<()> {
        let metadata = Value::Object(alert.metadata.clone());
        match alert.severity {
            Severity::Critical | Severity::High => error!(
                alert_id = %alert.id,
                severity = %alert.severity,
                metadata = %metadata,
                "{}: {}",
                alert.title,
                alert.description
            ),
            Severity::Warning => warn!(
                alert_id = %alert.id,
                severity = %alert.severity,
                metadata = %metadata,
                "{}: {}",
                alert.title,
                alert.description
            ),
            Severity::Info => info!(
                alert_id = %alert.id,
                severity = %alert.severity,
                "{}: {}",
                alert.title,
                alert.description
            ),
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsSink for TracingSink {
    async fn send_metrics(&self, kind: &str, payload: Value) -> SinkResult<()> {
        info!(kind = kind, payload = %payload, "metrics");
        Ok(())
    }
}

/// Compact human form such as `2d 3h`, `45m` or `30s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let minutes = (secs % 3600) / 60;

    match (days, hours, minutes) {
        (0, 0, 0) => format!("{}s", secs),
        (0, 0, m) => format!("{}m", m),
        (0, h, 0) => format!("{}h", h),
        (0, h, m) => format!("{}h {}m", h, m),
        (d, 0, _) => format!("{}d", d),
        (d, h, _) => format!("{}d {}h", d, h),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_alert_serialization() {
        let alert = Alert::new(Severity::Warning, "High CPU", "cpu at 93%")
            .with_metadata("metric", "cpu_usage")
            .with_metadata("value", 93.0);

        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["metadata"]["metric"], "cpu_usage");
        assert_eq!(json["metadata"]["value"], 93.0);

        let back: Alert = serde_json::from_value(json).unwrap();
        assert_eq!(back, alert);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(45 * 60)), "45m");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
        assert_eq!(format_duration(Duration::from_secs(5400)), "1h 30m");
        assert_eq!(format_duration(Duration::from_secs(30 * 86_400)), "30d");
        assert_eq!(format_duration(Duration::from_secs(86_400 + 7200)), "1d 2h");
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_everything() {
        let sink = TracingSink;
        sink.send_alert(Alert::new(Severity::Critical, "t", "d"))
            .await
            .unwrap();
        sink.send_metrics("system", serde_json::json!({"cpu": 1.0}))
            .await
            .unwrap();
    }
}
