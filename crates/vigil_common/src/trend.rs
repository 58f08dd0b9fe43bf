//! Trend analysis over metric histories
//!
//! Classifies a series as linear, exponential or seasonal and reports its
//! OLS slope. The sample index is the time axis, so callers must feed
//! roughly uniformly spaced samples; the slope unit is "value per sample".

use crate::history::{values, Observation};
use chrono::{Datelike, IsoWeek};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Below this many samples every series is treated as linear
const MIN_SAMPLES_FOR_SHAPE: usize = 10;

/// Weekday grouping needs a few weeks of samples to mean anything
const MIN_SAMPLES_FOR_SEASONALITY: usize = 30;

/// Linear slope above which an exponential fit is attempted
const EXPONENTIAL_SLOPE_GATE: f64 = 0.5;

/// Log-linear slope must beat the relative linear slope by this factor
const EXPONENTIAL_DOMINANCE: f64 = 1.5;

/// Within-weekday variance below this share of total variance means seasonal
const SEASONAL_VARIANCE_RATIO: f64 = 0.7;

/// Seasonal projections are padded to cover the next peak
const SEASONAL_PEAK_FACTOR: f64 = 1.1;

const EPSILON: f64 = 1e-10;

/// Shape of a metric's growth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    #[default]
    Linear,
    Exponential,
    Seasonal,
}

impl Trend {
    pub fn label(&self) -> &'static str {
        match self {
            Trend::Linear => "linear",
            Trend::Exponential => "exponential",
            Trend::Seasonal => "seasonal",
        }
    }

    /// Project `current` forward by `days` given a growth rate in units per day.
    ///
    /// Exponential growth reads `daily_growth` as a percentage rate.
    pub fn extrapolate(&self, current: f64, daily_growth: f64, days: f64) -> f64 {
        match self {
            Trend::Linear => current + daily_growth * days,
            Trend::Exponential => current * (daily_growth * days / 100.0).exp(),
            Trend::Seasonal => (current + daily_growth * days) * SEASONAL_PEAK_FACTOR,
        }
    }
}

/// Result of analyzing one series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub trend: Trend,
    /// OLS slope in value per sample
    pub slope: f64,
}

/// Classify a series. Returns `None` for fewer than two samples.
pub fn analyze<O: Observation>(samples: &[O]) -> Option<TrendAnalysis> {
    if samples.len() < 2 {
        return None;
    }

    let series = values(samples);
    let slope = linear_slope(&series);

    Some(TrendAnalysis {
        trend: classify(samples, &series, slope),
        slope,
    })
}

fn classify<O: Observation>(samples: &[O], series: &[f64], slope: f64) -> Trend {
    if series.len() < MIN_SAMPLES_FOR_SHAPE {
        return Trend::Linear;
    }

    if slope > EXPONENTIAL_SLOPE_GATE && is_exponential(series, slope) {
        return Trend::Exponential;
    }

    if series.len() >= MIN_SAMPLES_FOR_SEASONALITY
        && is_weekday_seasonal(samples, series, slope)
    {
        return Trend::Seasonal;
    }

    Trend::Linear
}

/// Compare the log-linear slope (a relative rate) with the linear slope
/// normalized by the series mean, so both are in "fraction per sample".
fn is_exponential(series: &[f64], slope: f64) -> bool {
    let avg = mean(series);
    if avg <= EPSILON {
        return false;
    }

    let positive: Vec<(f64, f64)> = series
        .iter()
        .enumerate()
        .filter(|(_, v)| **v > 0.0)
        .map(|(i, v)| (i as f64, v.ln()))
        .collect();

    match ols_slope(&positive) {
        Some(log_slope) => log_slope > EXPONENTIAL_DOMINANCE * (slope / avg),
        None => false,
    }
}

/// Weekday grouping runs on the OLS residuals, so a plain ramp never looks
/// seasonal. A weekday only counts once it has been seen in two ISO weeks.
fn is_weekday_seasonal<O: Observation>(samples: &[O], series: &[f64], slope: f64) -> bool {
    let residuals = detrend(series, slope);
    let residual_variance = variance(&residuals);
    if residual_variance <= EPSILON {
        return false;
    }

    let mut by_weekday: [(Vec<f64>, BTreeSet<IsoWeek>); 7] = Default::default();
    for (sample, residual) in samples.iter().zip(&residuals) {
        let ts = sample.timestamp();
        let (group, weeks) = &mut by_weekday[ts.weekday().num_days_from_monday() as usize];
        group.push(*residual);
        weeks.insert(ts.iso_week());
    }

    let group_variances: Vec<f64> = by_weekday
        .iter()
        .filter(|(group, weeks)| group.len() > 1 && weeks.len() >= 2)
        .map(|(group, _)| variance(group))
        .collect();

    if group_variances.is_empty() {
        return false;
    }

    mean(&group_variances) < SEASONAL_VARIANCE_RATIO * residual_variance
}

/// Subtract the least-squares line from the series
fn detrend(series: &[f64], slope: f64) -> Vec<f64> {
    let mid = (series.len() as f64 - 1.0) / 2.0;
    let avg = mean(series);
    series
        .iter()
        .enumerate()
        .map(|(i, v)| v - (avg + slope * (i as f64 - mid)))
        .collect()
}

/// OLS slope of `series` against its index. Degenerate input yields 0.
pub fn linear_slope(series: &[f64]) -> f64 {
    let points: Vec<(f64, f64)> = series
        .iter()
        .enumerate()
        .map(|(i, v)| (i as f64, *v))
        .collect();
    ols_slope(&points).unwrap_or(0.0)
}

fn ols_slope(points: &[(f64, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }

    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
    let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
    let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
    let sum_x2: f64 = points.iter().map(|(x, _)| x * x).sum();

    let denom = n * sum_x2 - sum_x * sum_x;
    if denom.abs() < EPSILON {
        return None;
    }

    Some((n * sum_xy - sum_x * sum_y) / denom)
}

pub fn mean(series: &[f64]) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    series.iter().sum::<f64>() / series.len() as f64
}

/// Population variance
pub fn variance(series: &[f64]) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    let avg = mean(series);
    series.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / series.len() as f64
}
