//! Z-score anomaly detection over a fixed trailing window.

use crate::trend::{mean, variance};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WINDOW: usize = 20;
pub const DEFAULT_SENSITIVITY: f64 = 2.0;

/// Verdict for the most recent sample of a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyCheck {
    pub is_anomaly: bool,
    pub z_score: f64,
}

impl AnomalyCheck {
    fn normal() -> Self {
        Self {
            is_anomaly: false,
            z_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AnomalyDetector {
    window: usize,
    sensitivity: f64,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_SENSITIVITY)
    }
}

impl AnomalyDetector {
    pub fn new(window: usize, sensitivity: f64) -> Self {
        Self {
            window: window.max(2),
            sensitivity,
        }
    }

    /// Check the last value of `series` against the trailing window.
    ///
    /// Never flags with fewer samples than the window or a flat window.
    pub fn check(&self, series: &[f64]) -> AnomalyCheck {
        if series.len() < self.window {
            return AnomalyCheck::normal();
        }

        let recent = &series[series.len() - self.window..];
        let stddev = variance(recent).sqrt();
        if stddev < 1e-10 {
            return AnomalyCheck::normal();
        }

        let latest = recent[recent.len() - 1];
        let z_score = (latest - mean(recent)) / stddev;

        AnomalyCheck {
            is_anomaly: z_score.abs() > self.sensitivity,
            z_score,
        }
    }
}
