//! Rolling history store
//!
//! Bounded, per-key, time-ordered sequences of observations. Every append
//! prunes the key's samples that fell out of the retention window while the
//! write lock is still held, so readers never see stale data.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// Anything with a timestamp and a scalar value can live in a history.
pub trait Observation: Clone + Send + Sync {
    fn timestamp(&self) -> DateTime<Utc>;
    fn value(&self) -> f64;
}

/// One timestamped measurement of a metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl Sample {
    pub fn new(value: f64) -> Self {
        Self::at(Utc::now(), value)
    }

    pub fn at(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            timestamp,
            value,
            tags: HashMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

impl Observation for Sample {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn value(&self) -> f64 {
        self.value
    }
}

/// Per-key time-ordered observations with age-based retention
pub struct HistoryStore<O> {
    retention: ChronoDuration,
    series: RwLock<HashMap<String, Vec<O>>>,
}

impl<O: Observation> HistoryStore<O> {
    pub fn new(retention: Duration) -> Self {
        let retention =
            ChronoDuration::from_std(retention).unwrap_or_else(|_| ChronoDuration::days(36_500));
        Self {
            retention,
            series: RwLock::new(HashMap::new()),
        }
    }

    pub fn retention(&self) -> ChronoDuration {
        self.retention
    }

    /// Insert an observation at its ordered position and prune the key.
    pub async fn push(&self, key: &str, observation: O) {
        let cutoff = Utc::now() - self.retention;
        let mut series = self.series.write().await;

        let entries = series.entry(key.to_string()).or_default();
        let at = entries.partition_point(|o| o.timestamp() <= observation.timestamp());
        entries.insert(at, observation);
        entries.retain(|o| o.timestamp() >= cutoff);

        if entries.is_empty() {
            series.remove(key);
        }
    }

    /// Copy of the key's history, oldest first. Unknown keys yield an empty vec.
    pub async fn snapshot(&self, key: &str) -> Vec<O> {
        self.series
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn len(&self, key: &str) -> usize {
        self.series.read().await.get(key).map_or(0, Vec::len)
    }

    /// Known keys in sorted order
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.series.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drop one key's history. Returns whether anything was removed.
    pub async fn clear(&self, key: &str) -> bool {
        self.series.write().await.remove(key).is_some()
    }
}

impl HistoryStore<Sample> {
    /// Append a sample stamped with the current time
    pub async fn record(&self, key: &str, value: f64, tags: HashMap<String, String>) {
        self.push(key, Sample::new(value).with_tags(tags)).await;
    }
}

/// Pull the scalar values out of a history snapshot
pub fn values<O: Observation>(observations: &[O]) -> Vec<f64> {
    observations.iter().map(Observation::value).collect()
}
