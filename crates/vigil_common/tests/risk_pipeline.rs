//! Risk pipeline tests
//!
//! Samples flow through the history store into the predictor and planner,
//! and live values drive the remediation engine.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use vigil_common::config::{CapacityConfig, PredictorConfig, RemediationConfig};
use vigil_common::remediation::{
    default_rules, Action, Condition, ExecutionStatus, Operator, RemediationRule,
    TokioCommandRunner,
};
use vigil_common::{
    CapacityPlanner, FailurePredictor, RemediationEngine, RiskLevel, Sample, ShutdownSignal,
    Trend, VigilError,
};

fn percentage() -> HashMap<String, String> {
    HashMap::from([("type".to_string(), "percentage".to_string())])
}

#[tokio::test]
async fn rising_cpu_predicts_failure_and_triggers_rule() {
    let predictor = FailurePredictor::new(PredictorConfig::default());
    for i in 0..15 {
        predictor
            .add_sample("cpu_usage", 70.0 + 2.0 * i as f64, percentage())
            .await;
    }

    let prediction = predictor.predict_failure("cpu_usage").await.unwrap();
    assert_eq!(prediction.risk_level, RiskLevel::Critical);
    assert!(prediction.failure_probability >= 0.75);
    assert!(prediction.time_to_failure.unwrap() < Duration::from_secs(24 * 3600));

    // The live value the driver saw last
    let live = predictor.history("cpu_usage").await.last().unwrap().value;

    let config = RemediationConfig {
        dry_run: true,
        ..Default::default()
    };
    let engine = RemediationEngine::new(config, Arc::new(TokioCommandRunner));
    engine.add_rules(default_rules()).await.unwrap();

    let triggered = engine.evaluate_condition("cpu_usage", live).await;
    assert_eq!(triggered.len(), 1);
    assert_eq!(triggered[0].id, "high-cpu-remediation");

    let records = engine
        .execute_remediation(&triggered, &ShutdownSignal::never())
        .await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Success);
    assert!(records[0]
        .results
        .iter()
        .all(|r| r.output.starts_with("[DRY RUN]")));
}

#[tokio::test]
async fn short_history_is_never_forecast() {
    let predictor = FailurePredictor::new(PredictorConfig::default());
    let planner = CapacityPlanner::new(CapacityConfig::default());
    for _ in 0..9 {
        predictor.add_sample("memory_usage", 50.0, percentage()).await;
        planner
            .add_measurement("memory", 50.0, 100.0, HashMap::new())
            .await;
    }

    assert!(matches!(
        predictor.predict_failure("memory_usage").await,
        Err(VigilError::InsufficientData { need: 10, have: 9 })
    ));
    assert!(matches!(
        planner.forecast_capacity("memory").await,
        Err(VigilError::InsufficientData { need: 20, have: 9 })
    ));
    assert!(predictor.all_predictions().await.is_empty());
}

#[tokio::test]
async fn stale_samples_fall_out_of_the_window() {
    let predictor = FailurePredictor::new(PredictorConfig {
        history_window_secs: 3600,
        ..Default::default()
    });
    let now = Utc::now();
    for minutes in [180, 120, 90, 30, 10] {
        predictor
            .push_sample(
                "disk_usage_root",
                Sample::at(now - ChronoDuration::minutes(minutes), 40.0),
            )
            .await;
    }

    let history = predictor.history("disk_usage_root").await;
    assert_eq!(history.len(), 2);
    assert!(history
        .iter()
        .all(|s| Utc::now() - s.timestamp <= ChronoDuration::hours(1)));
}

#[tokio::test]
async fn shrinking_usage_is_low_risk() {
    let predictor = FailurePredictor::new(PredictorConfig::default());
    let planner = CapacityPlanner::new(CapacityConfig::default());
    for i in 0..25 {
        let value = 60.0 - i as f64;
        predictor.add_sample("disk_usage_root", value, percentage()).await;
        planner
            .add_measurement("disk_root", value, 100.0, HashMap::new())
            .await;
    }

    let prediction = predictor.predict_failure("disk_usage_root").await.unwrap();
    assert_eq!(prediction.failure_probability, 0.10);
    assert!(prediction.time_to_failure.is_none());

    let forecast = planner.forecast_capacity("disk_root").await.unwrap();
    assert_eq!(forecast.trend, Trend::Linear);
    assert!(forecast.growth_rate < 0.0);
    assert!(forecast.time_to_exhaustion.is_none());
}

#[tokio::test]
async fn rule_chain_runs_real_commands() {
    let config = RemediationConfig {
        max_retries: 0,
        ..Default::default()
    };
    let engine = RemediationEngine::new(config, Arc::new(TokioCommandRunner));
    engine
        .add_rule(
            RemediationRule::new(
                "errors",
                "Error burst",
                Condition::new("error_rate", Operator::Gt, 5.0),
            )
            .with_action(Action::command("echo", &["flushing"]))
            .with_action(Action::script("exit 3"))
            .with_action(Action::command("echo", &["unreachable"])),
        )
        .await
        .unwrap();

    let triggered = engine.evaluate_condition("error_rate", 7.5).await;
    let records = engine
        .execute_remediation(&triggered, &ShutdownSignal::never())
        .await;

    let record = &records[0];
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.results.len(), 2);
    assert!(record.results[0].output.contains("flushing"));
    assert_eq!(record.results[1].status, ExecutionStatus::Failed);
    assert_eq!(engine.history(0).await, records);
}
