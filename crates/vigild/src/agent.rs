//! Vigil agent main loop
//!
//! Samples the host on a fixed cadence, feeds the predictor and capacity
//! planner, raises alerts and dispatches remediation. Prediction and
//! forecast refreshes run as their own periodic tasks.

use crate::collector::{SnapshotProvider, SystemSnapshot};
use anyhow::{anyhow, Context, Result};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vigil_common::alerts::{format_duration, Alert, AlertSink, MetricsSink, Severity};
use vigil_common::remediation::{
    default_rules, load_rules, CommandRunner, ExecutionStatus, RemediationRecord,
};
use vigil_common::{
    CapacityPlanner, FailurePredictor, RemediationEngine, Shutdown, ShutdownSignal, VigilConfig,
};

/// Shared handle to whatever produces snapshots
pub type SharedCollector = Arc<Mutex<dyn SnapshotProvider>>;

/// Outbound collaborators the agent reports to
#[derive(Clone)]
pub struct Sinks {
    pub alerts: Arc<dyn AlertSink>,
    pub metrics: Arc<dyn MetricsSink>,
}

/// What one ingestion cycle did
#[derive(Default)]
pub struct CycleOutcome {
    pub alerts_sent: usize,
    /// Remediation runs started this cycle; each resolves to its records
    pub remediations: Vec<JoinHandle<Vec<RemediationRecord>>>,
}

pub struct Agent {
    config: VigilConfig,
    collector: SharedCollector,
    sinks: Sinks,
    predictor: Arc<FailurePredictor>,
    planner: Arc<CapacityPlanner>,
    remediation: Arc<RemediationEngine>,
    shutdown: Shutdown,
}

impl Agent {
    pub async fn new(
        config: VigilConfig,
        collector: SharedCollector,
        sinks: Sinks,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let predictor = Arc::new(FailurePredictor::new(config.predictor.clone()));
        let planner = Arc::new(CapacityPlanner::new(config.capacity.clone()));
        let remediation = Arc::new(RemediationEngine::new(config.remediation.clone(), runner));

        let rules = match &config.rules_path {
            Some(path) => load_rules(path)
                .with_context(|| format!("Failed to load rules from {}", path.display()))?,
            None => default_rules(),
        };
        let count = rules.len();
        remediation.add_rules(rules).await?;

        info!(
            "Agent initialized ({} rules, auto_remediation={}, dry_run={})",
            count,
            config.remediation.enable_auto_remediation,
            config.remediation.dry_run
        );

        Ok(Self {
            config,
            collector,
            sinks,
            predictor,
            planner,
            remediation,
            shutdown: Shutdown::new(),
        })
    }

    pub fn predictor(&self) -> &Arc<FailurePredictor> {
        &self.predictor
    }

    pub fn planner(&self) -> &Arc<CapacityPlanner> {
        &self.planner
    }

    pub fn remediation(&self) -> &Arc<RemediationEngine> {
        &self.remediation
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Stop every loop and abort in-flight actions
    pub fn shutdown(&self) {
        info!("Agent shutdown requested");
        self.shutdown.trigger();
    }

    /// Run until shutdown
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!("Starting Vigil agent");

        let metrics_loop = tokio::spawn({
            let agent = Arc::clone(&self);
            async move { agent.metrics_loop().await }
        });
        let predictor_loop = tokio::spawn({
            let predictor = Arc::clone(&self.predictor);
            let signal = self.shutdown.signal();
            async move { predictor.run(signal).await }
        });
        let planner_loop = tokio::spawn({
            let planner = Arc::clone(&self.planner);
            let signal = self.shutdown.signal();
            async move { planner.run(signal).await }
        });

        let (metrics, predictor, planner) = tokio::join!(metrics_loop, predictor_loop, planner_loop);
        metrics.context("metrics loop panicked")?;
        predictor.context("predictor loop panicked")?;
        planner.context("planner loop panicked")?;

        info!("Vigil agent stopped");
        Ok(())
    }

    async fn metrics_loop(&self) {
        let signal = self.shutdown.signal();
        let mut ticker = tokio::time::interval(self.config.daemon.collect_interval());

        loop {
            tokio::select! {
                _ = signal.triggered() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.collect_once().await {
                        error!("Metrics collection failed: {:#}", e);
                    }
                }
            }
        }
    }

    /// Take one snapshot and run a full ingestion cycle on it
    pub async fn collect_once(&self) -> Result<CycleOutcome> {
        let collector = Arc::clone(&self.collector);
        let snapshot = tokio::task::spawn_blocking(move || -> Result<SystemSnapshot> {
            let mut collector = collector
                .lock()
                .map_err(|_| anyhow!("collector lock poisoned"))?;
            collector.collect()
        })
        .await
        .context("collector task panicked")??;

        Ok(self.ingest(&snapshot).await)
    }

    pub async fn ingest(&self, snapshot: &SystemSnapshot) -> CycleOutcome {
        let mut outcome = CycleOutcome::default();

        match serde_json::to_value(snapshot) {
            Ok(payload) => {
                if let Err(e) = self.sinks.metrics.send_metrics("system", payload).await {
                    warn!("Failed to send metrics: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize snapshot: {}", e),
        }

        self.feed(snapshot).await;

        self.check_system_alerts(snapshot, &mut outcome).await;
        self.check_predictions(&mut outcome).await;
        self.check_capacity_alerts(&mut outcome).await;

        outcome
    }

    async fn feed(&self, snapshot: &SystemSnapshot) {
        let percentage = || HashMap::from([("type".to_string(), "percentage".to_string())]);

        self.predictor
            .add_sample("cpu_usage", snapshot.cpu_usage, percentage())
            .await;
        self.predictor
            .add_sample("memory_usage", snapshot.memory_usage_percent(), percentage())
            .await;
        for disk in &snapshot.disks {
            self.predictor
                .add_sample(
                    &format!("disk_usage_{}", disk.label()),
                    disk.usage_percent(),
                    percentage(),
                )
                .await;
        }

        self.planner
            .add_measurement("cpu", snapshot.cpu_usage, 100.0, HashMap::new())
            .await;
        self.planner
            .add_measurement(
                "memory",
                snapshot.memory_used_bytes as f64,
                snapshot.memory_total_bytes as f64,
                HashMap::new(),
            )
            .await;
        for disk in &snapshot.disks {
            let tags = HashMap::from([("mount_point".to_string(), disk.mount_point.clone())]);
            self.planner
                .add_measurement(
                    &format!("disk_{}", disk.label()),
                    disk.used_bytes as f64,
                    disk.total_bytes as f64,
                    tags,
                )
                .await;
        }
    }

    /// Live threshold alerts, then rule evaluation on the same values.
    ///
    /// Rules see one `disk_usage` value per cycle: the fullest mount.
    async fn check_system_alerts(&self, snapshot: &SystemSnapshot, outcome: &mut CycleOutcome) {
        let threshold = self.config.daemon.alert_threshold_percent;

        let mut live = vec![
            ("cpu_usage", "CPU", snapshot.cpu_usage),
            ("memory_usage", "Memory", snapshot.memory_usage_percent()),
        ];
        for disk in &snapshot.disks {
            let usage = disk.usage_percent();
            if usage > threshold {
                let alert = Alert::new(
                    Severity::Warning,
                    "High disk usage",
                    format!("{} is {:.1}% full", disk.mount_point, usage),
                )
                .with_metadata("metric", "disk_usage")
                .with_metadata("mount_point", disk.mount_point.clone())
                .with_metadata("value", usage);
                self.send_alert(alert, outcome).await;
            }
        }
        if let Some(fullest) = snapshot
            .disks
            .iter()
            .map(|d| d.usage_percent())
            .max_by(|a, b| a.total_cmp(b))
        {
            live.push(("disk_usage", "Disk", fullest));
        }

        for (metric, label, value) in live {
            if metric != "disk_usage" && value > threshold {
                let alert = Alert::new(
                    Severity::Warning,
                    format!("High {} usage", label),
                    format!("{} usage is {:.1}%", label, value),
                )
                .with_metadata("metric", metric)
                .with_metadata("value", value);
                self.send_alert(alert, outcome).await;
            }

            let triggered = self.remediation.evaluate_sustained(metric, value).await;
            if !triggered.is_empty() {
                info!(
                    "{} rule(s) triggered by {}={:.1}",
                    triggered.len(),
                    metric,
                    value
                );
                outcome.remediations.push(self.dispatch_remediation(triggered));
            }
        }
    }

    fn dispatch_remediation(
        &self,
        rules: Vec<vigil_common::RemediationRule>,
    ) -> JoinHandle<Vec<RemediationRecord>> {
        let engine = Arc::clone(&self.remediation);
        let alerts = Arc::clone(&self.sinks.alerts);
        let signal = self.shutdown.signal();

        tokio::spawn(async move {
            let records = engine.execute_remediation(&rules, &signal).await;
            for record in records.iter().filter(|r| r.status == ExecutionStatus::Failed) {
                let alert = Alert::new(
                    Severity::High,
                    "Remediation failed",
                    format!(
                        "{}: {}",
                        record.rule_name,
                        record.error.as_deref().unwrap_or("unknown error")
                    ),
                )
                .with_metadata("rule_id", record.rule_id.clone())
                .with_metadata("record_id", record.id.clone());
                if let Err(e) = alerts.send_alert(alert).await {
                    warn!("Failed to send alert: {}", e);
                }
            }
            records
        })
    }

    async fn check_predictions(&self, outcome: &mut CycleOutcome) {
        let min_probability = self.config.daemon.prediction_alert_probability;
        let mut predictions: Vec<_> = self.predictor.all_predictions().await.into_values().collect();
        predictions.sort_by(|a, b| a.metric.cmp(&b.metric));

        for prediction in predictions {
            if prediction.failure_probability <= min_probability {
                continue;
            }

            let eta = prediction
                .time_to_failure
                .map(format_duration)
                .unwrap_or_else(|| "unknown".to_string());
            let alert = Alert::new(
                Severity::High,
                format!("Predicted failure: {}", prediction.metric),
                format!(
                    "{} predicted to reach {:.1} (p={:.2}, eta {}). {}",
                    prediction.metric,
                    prediction.predicted_value,
                    prediction.failure_probability,
                    eta,
                    prediction.recommendation
                ),
            )
            .with_metadata("metric", prediction.metric.clone())
            .with_metadata("risk_level", prediction.risk_level.as_str())
            .with_metadata("confidence", prediction.confidence);
            self.send_alert(alert, outcome).await;
        }
    }

    async fn check_capacity_alerts(&self, outcome: &mut CycleOutcome) {
        let mut forecasts: Vec<_> = self.planner.all_forecasts().await.into_values().collect();
        forecasts.sort_by(|a, b| a.resource.cmp(&b.resource));

        for forecast in forecasts {
            for capacity_alert in &forecast.alerts {
                let alert = Alert::new(
                    capacity_alert.severity,
                    format!("Capacity: {}", forecast.resource),
                    capacity_alert.message.clone(),
                )
                .with_metadata("resource", forecast.resource.clone())
                .with_metadata("threshold", capacity_alert.threshold)
                .with_metadata("observed", capacity_alert.observed)
                .with_metadata("recommendation", forecast.recommendation.clone());
                self.send_alert(alert, outcome).await;
            }
        }
    }

    async fn send_alert(&self, alert: Alert, outcome: &mut CycleOutcome) {
        debug!("Sending {} alert: {}", alert.severity, alert.title);
        match self.sinks.alerts.send_alert(alert).await {
            Ok(()) => outcome.alerts_sent += 1,
            Err(e) => warn!("Failed to send alert: {}", e),
        }
    }

    /// Refresh predictions and forecasts now instead of waiting for the loops
    pub async fn refresh(&self) -> (usize, usize) {
        let predictions = self.predictor.refresh_all().await;
        let forecasts = self.planner.refresh_all().await;
        (predictions, forecasts)
    }

    /// JSON status document: predictions, capacity report, recent remediation
    pub async fn status(&self) -> serde_json::Value {
        json!({
            "predictions": self.predictor.all_predictions().await,
            "capacity": self.planner.generate_report().await,
            "remediation": self.remediation.history(20).await,
        })
    }
}
