//! Sustain-duration debouncing for rule conditions

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Tracks when each rule's condition started holding.
///
/// A rule fires once its condition has held for its sustain duration, then
/// re-arms: it must hold for another full period before firing again. Any
/// non-breaching observation resets the rule.
#[derive(Debug, Default)]
pub struct SustainTracker {
    breached_since: HashMap<String, DateTime<Utc>>,
}

impl SustainTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(
        &mut self,
        rule_id: &str,
        breached: bool,
        sustain: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        if !breached {
            self.breached_since.remove(rule_id);
            return false;
        }

        let since = *self
            .breached_since
            .entry(rule_id.to_string())
            .or_insert(now);

        let sustain =
            ChronoDuration::from_std(sustain).unwrap_or_else(|_| ChronoDuration::days(36_500));
        if now - since < sustain {
            return false;
        }

        self.breached_since.insert(rule_id.to_string(), now);
        true
    }

    /// When the rule's current breach began, if it is breaching
    pub fn breached_since(&self, rule_id: &str) -> Option<DateTime<Utc>> {
        self.breached_since.get(rule_id).copied()
    }

    pub fn reset(&mut self, rule_id: &str) {
        self.breached_since.remove(rule_id);
    }
}
