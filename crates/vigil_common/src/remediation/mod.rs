//! Remediation engine
//!
//! Holds the rule set, matches live metric values against rule conditions
//! and runs the action chains of triggered rules, highest priority first.
//! Every execution is recorded in a bounded history.

pub mod debounce;
pub mod executor;
pub mod rules;
pub mod types;

pub use debounce::SustainTracker;
pub use executor::{ActionExecutor, CommandRunner, RunFailure, TokioCommandRunner};
pub use rules::{default_rules, load_rules, parse_rules};
pub use types::{
    Action, ActionKind, ActionResult, Condition, ExecutionStatus, Operator, RemediationRecord,
    RemediationRule,
};

use crate::config::RemediationConfig;
use crate::error::{Result, VigilError};
use crate::shutdown::ShutdownSignal;
use chrono::Utc;
use std::cmp::Reverse;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct RemediationEngine {
    config: RemediationConfig,
    executor: ActionExecutor,
    rules: RwLock<Vec<RemediationRule>>,
    history: RwLock<VecDeque<RemediationRecord>>,
    sustain: Mutex<SustainTracker>,
    in_flight: Mutex<HashSet<String>>,
}

/// Releases a rule's in-flight slot when dropped
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    rule_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.rule_id);
    }
}

/// A poisoned lock only means another task panicked mid-update of a plain
/// set or map; the data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RemediationEngine {
    pub fn new(config: RemediationConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let executor = ActionExecutor::new(runner, config.action_timeout())
            .dry_run(config.dry_run)
            .with_retries(config.max_retries, config.retry_delay());

        Self {
            config,
            executor,
            rules: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
            sustain: Mutex::new(SustainTracker::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &RemediationConfig {
        &self.config
    }

    /// Register a rule, replacing any rule with the same id in place.
    pub async fn add_rule(&self, rule: RemediationRule) -> Result<()> {
        rules::validate(&rule)?;

        let mut rules = self.rules.write().await;
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => {
                debug!("Replacing remediation rule {}", rule.id);
                *existing = rule;
            }
            None => {
                debug!("Added remediation rule {}", rule.id);
                rules.push(rule);
            }
        }
        Ok(())
    }

    pub async fn add_rules(&self, rules: Vec<RemediationRule>) -> Result<()> {
        for rule in rules {
            self.add_rule(rule).await?;
        }
        Ok(())
    }

    pub async fn remove_rule(&self, id: &str) -> Result<RemediationRule> {
        if id.trim().is_empty() {
            return Err(VigilError::InvalidRule("rule id is empty".to_string()));
        }

        let mut rules = self.rules.write().await;
        let index = rules
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| VigilError::RuleNotFound(id.to_string()))?;

        lock(&self.sustain).reset(id);
        Ok(rules.remove(index))
    }

    /// Rules in registration order
    pub async fn rules(&self) -> Vec<RemediationRule> {
        self.rules.read().await.clone()
    }

    /// Enabled rules whose condition holds for this value, ignoring sustain.
    pub async fn evaluate_condition(&self, metric: &str, value: f64) -> Vec<RemediationRule> {
        self.rules
            .read()
            .await
            .iter()
            .filter(|r| r.enabled && r.condition.is_met(metric, value))
            .cloned()
            .collect()
    }

    /// Like `evaluate_condition`, but a rule is only returned once its
    /// condition has held for the rule's sustain duration.
    pub async fn evaluate_sustained(&self, metric: &str, value: f64) -> Vec<RemediationRule> {
        let rules = self.rules.read().await;
        let now = Utc::now();
        let mut tracker = lock(&self.sustain);

        rules
            .iter()
            .filter(|r| r.enabled && r.condition.metric == metric)
            .filter(|r| {
                let breached = r.condition.operator.check(value, r.condition.threshold);
                tracker.observe(&r.id, breached, r.condition.sustain, now)
            })
            .cloned()
            .collect()
    }

    /// Run triggered rules, highest priority first, one at a time.
    pub async fn execute_remediation(
        &self,
        rules: &[RemediationRule],
        shutdown: &ShutdownSignal,
    ) -> Vec<RemediationRecord> {
        if !self.config.enable_auto_remediation {
            debug!("Auto-remediation disabled, ignoring {} rules", rules.len());
            return Vec::new();
        }
        if rules.is_empty() {
            return Vec::new();
        }

        let mut ordered: Vec<&RemediationRule> = rules.iter().collect();
        ordered.sort_by_key(|r| Reverse(r.priority));

        let mut records = Vec::with_capacity(ordered.len());
        for rule in ordered {
            if shutdown.is_triggered() {
                info!("Shutdown requested, skipping remaining remediation");
                break;
            }

            if self.config.require_approval && !rule.auto_execute {
                info!("Rule {} requires approval, skipping", rule.id);
                continue;
            }

            let _guard = if self.config.single_flight {
                match self.claim(&rule.id) {
                    Some(guard) => Some(guard),
                    None => {
                        info!("Rule {} is already running, skipping", rule.id);
                        continue;
                    }
                }
            } else {
                None
            };

            records.push(self.execute_rule(rule, shutdown).await);
        }
        records
    }

    fn claim(&self, rule_id: &str) -> Option<InFlightGuard<'_>> {
        if !lock(&self.in_flight).insert(rule_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            rule_id: rule_id.to_string(),
        })
    }

    /// Run one rule's action chain, stopping at the first failed action.
    pub async fn execute_rule(
        &self,
        rule: &RemediationRule,
        shutdown: &ShutdownSignal,
    ) -> RemediationRecord {
        let clock = Instant::now();
        let mut record = RemediationRecord::new(rule);
        info!(
            "Executing remediation {} ({} actions, dry_run={})",
            record.id,
            rule.actions.len(),
            self.executor.is_dry_run()
        );

        record.status = ExecutionStatus::Success;
        for action in &rule.actions {
            let result = self.executor.execute(action, shutdown).await;
            let status = result.status;
            let error = result.error.clone();
            record.results.push(result);

            match status {
                ExecutionStatus::Success => continue,
                ExecutionStatus::Cancelled => {
                    record.status = ExecutionStatus::Cancelled;
                    record.error = Some("remediation cancelled".to_string());
                }
                ExecutionStatus::Failed | ExecutionStatus::Running => {
                    record.status = ExecutionStatus::Failed;
                    let cause = error.unwrap_or_else(|| "unknown error".to_string());
                    record.error = Some(
                        VigilError::ActionExecution(format!("{}: {}", action.kind, cause))
                            .to_string(),
                    );
                }
            }
            break;
        }

        record.duration = clock.elapsed();
        record.finished_at = Some(Utc::now());

        match record.status {
            ExecutionStatus::Success => info!("Remediation {} succeeded", record.id),
            status => warn!(
                "Remediation {} {}: {}",
                record.id,
                status.as_str(),
                record.error.as_deref().unwrap_or("unknown error")
            ),
        }

        self.record(record.clone()).await;
        record
    }

    async fn record(&self, record: RemediationRecord) {
        let mut history = self.history.write().await;
        history.push_back(record);
        while history.len() > self.config.max_history_size {
            history.pop_front();
        }
    }

    /// Most recent `limit` records, oldest first. Zero means all.
    pub async fn history(&self, limit: usize) -> Vec<RemediationRecord> {
        let history = self.history.read().await;
        let take = if limit == 0 {
            history.len()
        } else {
            limit.min(history.len())
        };
        history.iter().skip(history.len() - take).cloned().collect()
    }
}
