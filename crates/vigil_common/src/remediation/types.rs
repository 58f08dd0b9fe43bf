//! Rule, action and execution record types for remediation

use crate::error::VigilError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Comparison applied between a live value and a rule threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl Operator {
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::Gt => value > threshold,
            Operator::Gte => value >= threshold,
            Operator::Lt => value < threshold,
            Operator::Lte => value <= threshold,
            Operator::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Eq => "==",
        }
    }
}

impl std::str::FromStr for Operator {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" | "gt" => Ok(Operator::Gt),
            ">=" | "gte" => Ok(Operator::Gte),
            "<" | "lt" => Ok(Operator::Lt),
            "<=" | "lte" => Ok(Operator::Lte),
            "==" | "eq" => Ok(Operator::Eq),
            other => Err(VigilError::InvalidRule(format!(
                "unsupported operator '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for Operator {
    type Error = VigilError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub metric: String,
    pub operator: Operator,
    pub threshold: f64,
    /// How long the condition must hold before the rule fires
    pub sustain: Duration,
}

impl Condition {
    pub fn new(metric: impl Into<String>, operator: Operator, threshold: f64) -> Self {
        Self {
            metric: metric.into(),
            operator,
            threshold,
            sustain: Duration::ZERO,
        }
    }

    pub fn sustained_for(mut self, sustain: Duration) -> Self {
        self.sustain = sustain;
        self
    }

    pub fn is_met(&self, metric: &str, value: f64) -> bool {
        self.metric == metric && self.operator.check(value, self.threshold)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.metric, self.operator, self.threshold)
    }
}

/// What an action actually runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Script {
        script: String,
    },
    RestartService {
        service: String,
    },
    Cleanup {
        command: String,
    },
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Command { .. } => "command",
            ActionKind::Script { .. } => "script",
            ActionKind::RestartService { .. } => "restart_service",
            ActionKind::Cleanup { .. } => "cleanup",
        }
    }

    /// Program and arguments handed to the command runner
    pub fn invocation(&self) -> (String, Vec<String>) {
        match self {
            ActionKind::Command { program, args } => (program.clone(), args.clone()),
            ActionKind::Script { script } => shell(script),
            ActionKind::RestartService { service } => (
                "systemctl".to_string(),
                vec!["restart".to_string(), service.clone()],
            ),
            ActionKind::Cleanup { command } => shell(command),
        }
    }
}

fn shell(body: &str) -> (String, Vec<String>) {
    ("sh".to_string(), vec!["-c".to_string(), body.to_string()])
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (program, args) = self.invocation();
        if args.is_empty() {
            f.write_str(&program)
        } else {
            write!(f, "{} {}", program, args.join(" "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    #[serde(default)]
    pub description: String,
    /// Falls back to the engine's action timeout when absent
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            description: String::new(),
            timeout: None,
        }
    }

    pub fn command(program: &str, args: &[&str]) -> Self {
        Self::new(ActionKind::Command {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        })
    }

    pub fn script(script: &str) -> Self {
        Self::new(ActionKind::Script {
            script: script.to_string(),
        })
    }

    pub fn restart_service(service: &str) -> Self {
        Self::new(ActionKind::RestartService {
            service: service.to_string(),
        })
    }

    pub fn cleanup(command: &str) -> Self {
        Self::new(ActionKind::Cleanup {
            command: command.to_string(),
        })
    }

    pub fn described(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub condition: Condition,
    pub actions: Vec<Action>,
    /// Higher runs first
    pub priority: i32,
    pub enabled: bool,
    /// Rules without this are skipped while approval is required
    pub auto_execute: bool,
}

impl RemediationRule {
    pub fn new(id: impl Into<String>, name: impl Into<String>, condition: Condition) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            condition,
            actions: Vec::new(),
            priority: 0,
            enabled: true,
            auto_execute: true,
        }
    }

    pub fn described(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn requires_approval(mut self) -> Self {
        self.auto_execute = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

/// Outcome of one action, after any retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action: Action,
    pub status: ExecutionStatus,
    pub output: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    /// Zero for dry runs
    pub attempts: u32,
}

impl ActionResult {
    pub(crate) fn new(action: &Action, started_at: DateTime<Utc>) -> Self {
        Self {
            action: action.clone(),
            status: ExecutionStatus::Running,
            output: String::new(),
            error: None,
            started_at,
            finished_at: started_at,
            duration: Duration::ZERO,
            attempts: 0,
        }
    }

    pub(crate) fn succeeded(mut self, output: String) -> Self {
        self.status = ExecutionStatus::Success;
        self.output = output;
        self
    }

    pub(crate) fn failed(mut self, error: impl Into<String>, output: String) -> Self {
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.into());
        self.output = output;
        self
    }

    pub(crate) fn cancelled(mut self) -> Self {
        self.status = ExecutionStatus::Cancelled;
        self.error = Some("cancelled".to_string());
        self
    }

    pub(crate) fn finish(mut self, attempts: u32, duration: Duration) -> Self {
        self.attempts = attempts;
        self.duration = duration;
        self.finished_at = Utc::now();
        self
    }
}

/// One execution of a rule's action chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationRecord {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub results: Vec<ActionResult>,
    pub duration: Duration,
    pub error: Option<String>,
}

impl RemediationRecord {
    pub(crate) fn new(rule: &RemediationRule) -> Self {
        let started_at = Utc::now();
        Self {
            id: format!("{}-{}", rule.id, started_at.timestamp()),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            started_at,
            finished_at: None,
            status: ExecutionStatus::Running,
            results: Vec::with_capacity(rule.actions.len()),
            duration: Duration::ZERO,
            error: None,
        }
    }
}
