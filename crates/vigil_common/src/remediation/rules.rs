//! Built-in remediation rules and the TOML rules file format
//!
//! ```toml
//! [[rules]]
//! id = "nginx-down"
//! name = "Restart nginx"
//! metric = "nginx_errors"
//! operator = ">="
//! threshold = 50.0
//! sustain_secs = 120
//! priority = 5
//!
//! [[rules.actions]]
//! kind = "restart_service"
//! service = "nginx"
//! timeout_secs = 60
//! ```

use super::types::{Action, ActionKind, Condition, Operator, RemediationRule};
use crate::error::{Result, VigilError};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Rules installed when no rules file is configured
pub fn default_rules() -> Vec<RemediationRule> {
    vec![
        RemediationRule::new(
            "high-cpu-remediation",
            "High CPU Usage Remediation",
            Condition::new("cpu_usage", Operator::Gte, 90.0)
                .sustained_for(Duration::from_secs(5 * 60)),
        )
        .described("Stop the process burning the most CPU")
        .with_action(
            Action::command("ps", &["aux", "--sort=-pcpu"])
                .described("List processes by CPU usage")
                .with_timeout(Duration::from_secs(30)),
        )
        .with_action(
            Action::script("kill -9 $(ps aux --sort=-pcpu | awk 'NR==2{print $2}')")
                .described("Kill highest CPU process")
                .with_timeout(Duration::from_secs(30)),
        )
        .with_priority(10)
        .requires_approval(),
        RemediationRule::new(
            "high-memory-remediation",
            "High Memory Usage Remediation",
            Condition::new("memory_usage", Operator::Gte, 90.0)
                .sustained_for(Duration::from_secs(5 * 60)),
        )
        .described("Flush dirty pages and drop the page cache")
        .with_action(
            Action::command("sync", &[])
                .described("Sync filesystem")
                .with_timeout(Duration::from_secs(30)),
        )
        .with_action(
            Action::script("echo 3 > /proc/sys/vm/drop_caches")
                .described("Clear page cache")
                .with_timeout(Duration::from_secs(30)),
        )
        .with_priority(9),
        RemediationRule::new(
            "disk-cleanup-remediation",
            "Disk Cleanup Remediation",
            Condition::new("disk_usage", Operator::Gte, 85.0)
                .sustained_for(Duration::from_secs(10 * 60)),
        )
        .described("Remove stale temporary files and old journal entries")
        .with_action(
            Action::cleanup("find /tmp -type f -atime +7 -delete")
                .described("Clean old temp files")
                .with_timeout(Duration::from_secs(5 * 60)),
        )
        .with_action(
            Action::cleanup("journalctl --vacuum-time=7d")
                .described("Clean old journal logs")
                .with_timeout(Duration::from_secs(2 * 60)),
        )
        .with_priority(8),
    ]
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    metric: String,
    operator: String,
    threshold: f64,
    #[serde(default)]
    sustain_secs: u64,
    #[serde(default)]
    priority: i32,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_true")]
    auto_execute: bool,
    #[serde(default)]
    actions: Vec<RawAction>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawAction {
    kind: String,
    #[serde(default)]
    description: String,
    timeout_secs: Option<u64>,
    program: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    script: Option<String>,
    service: Option<String>,
    command: Option<String>,
}

fn required(field: Option<String>, kind: &str, name: &str) -> Result<String> {
    field
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| VigilError::InvalidRule(format!("{} action needs '{}'", kind, name)))
}

impl TryFrom<RawAction> for Action {
    type Error = VigilError;

    fn try_from(raw: RawAction) -> Result<Self> {
        let kind = match raw.kind.as_str() {
            "command" => ActionKind::Command {
                program: required(raw.program, "command", "program")?,
                args: raw.args,
            },
            "script" => ActionKind::Script {
                script: required(raw.script, "script", "script")?,
            },
            "restart_service" => ActionKind::RestartService {
                service: required(raw.service, "restart_service", "service")?,
            },
            "cleanup" => ActionKind::Cleanup {
                command: required(raw.command, "cleanup", "command")?,
            },
            other => return Err(VigilError::UnknownActionKind(other.to_string())),
        };

        Ok(Action {
            kind,
            description: raw.description,
            timeout: raw.timeout_secs.map(Duration::from_secs),
        })
    }
}

impl TryFrom<RawRule> for RemediationRule {
    type Error = VigilError;

    fn try_from(raw: RawRule) -> Result<Self> {
        let operator: Operator = raw.operator.parse()?;
        let actions = raw
            .actions
            .into_iter()
            .map(Action::try_from)
            .collect::<Result<Vec<_>>>()?;

        let name = if raw.name.is_empty() {
            raw.id.clone()
        } else {
            raw.name
        };

        Ok(RemediationRule {
            id: raw.id,
            name,
            description: raw.description,
            condition: Condition::new(raw.metric, operator, raw.threshold)
                .sustained_for(Duration::from_secs(raw.sustain_secs)),
            actions,
            priority: raw.priority,
            enabled: raw.enabled,
            auto_execute: raw.auto_execute,
        })
    }
}

/// Structural checks shared by rule files and `add_rule`
pub fn validate(rule: &RemediationRule) -> Result<()> {
    if rule.id.trim().is_empty() {
        return Err(VigilError::InvalidRule("rule id is empty".to_string()));
    }
    if rule.condition.metric.trim().is_empty() {
        return Err(VigilError::InvalidRule(format!(
            "rule '{}' has no metric",
            rule.id
        )));
    }
    if !rule.condition.threshold.is_finite() {
        return Err(VigilError::InvalidRule(format!(
            "rule '{}' threshold is not a finite number",
            rule.id
        )));
    }
    Ok(())
}

/// Parse a rules file. Any invalid rule rejects the whole file.
pub fn parse_rules(content: &str) -> Result<Vec<RemediationRule>> {
    let file: RulesFile = toml::from_str(content)?;
    let mut seen = HashSet::new();
    let mut rules = Vec::with_capacity(file.rules.len());

    for raw in file.rules {
        let rule = RemediationRule::try_from(raw)?;
        validate(&rule)?;
        if !seen.insert(rule.id.clone()) {
            return Err(VigilError::InvalidRule(format!(
                "duplicate rule id '{}'",
                rule.id
            )));
        }
        rules.push(rule);
    }

    Ok(rules)
}

pub fn load_rules(path: impl AsRef<Path>) -> Result<Vec<RemediationRule>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let rules = parse_rules(&content)?;
    info!("Loaded {} remediation rules from {}", rules.len(), path.display());
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_rules() {
        let rules = default_rules();
        assert_eq!(rules.len(), 3);
        for rule in &rules {
            validate(rule).unwrap();
            assert!(rule.enabled);
            assert_eq!(rule.actions.len(), 2);
        }

        let cpu = &rules[0];
        assert_eq!(cpu.priority, 10);
        assert!(!cpu.auto_execute);
        assert_eq!(cpu.condition.sustain, Duration::from_secs(300));

        let disk = &rules[2];
        assert_eq!(disk.condition.threshold, 85.0);
        assert_eq!(disk.condition.sustain, Duration::from_secs(600));
        assert!(matches!(disk.actions[0].kind, ActionKind::Cleanup { .. }));
    }

    #[test]
    fn test_parse_rules() {
        let content = r#"
[[rules]]
id = "nginx-down"
name = "Restart nginx"
metric = "nginx_errors"
operator = "gte"
threshold = 50.0
sustain_secs = 120
priority = 5
auto_execute = false

[[rules.actions]]
kind = "restart_service"
service = "nginx"
timeout_secs = 60

[[rules.actions]]
kind = "command"
program = "curl"
args = ["-sf", "http://localhost/health"]

[[rules]]
id = "load"
metric = "load_average"
operator = ">"
threshold = 8
"#;
        let rules = parse_rules(content).unwrap();
        assert_eq!(rules.len(), 2);

        let nginx = &rules[0];
        assert_eq!(nginx.condition.operator, Operator::Gte);
        assert_eq!(nginx.condition.sustain, Duration::from_secs(120));
        assert!(!nginx.auto_execute);
        assert_eq!(nginx.actions[0].timeout, Some(Duration::from_secs(60)));
        assert_eq!(
            nginx.actions[1].kind,
            ActionKind::Command {
                program: "curl".to_string(),
                args: vec!["-sf".to_string(), "http://localhost/health".to_string()],
            }
        );

        let load = &rules[1];
        assert_eq!(load.name, "load");
        assert!(load.enabled);
        assert!(load.actions.is_empty());
    }

    #[test]
    fn test_unknown_action_kind() {
        let content = r#"
[[rules]]
id = "x"
metric = "m"
operator = ">"
threshold = 1.0

[[rules.actions]]
kind = "reboot"
"#;
        match parse_rules(content) {
            Err(VigilError::UnknownActionKind(kind)) => assert_eq!(kind, "reboot"),
            other => panic!("expected UnknownActionKind, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_rules_are_rejected() {
        let bad_operator = r#"
[[rules]]
id = "x"
metric = "m"
operator = "approximately"
threshold = 1.0
"#;
        assert!(matches!(parse_rules(bad_operator), Err(VigilError::InvalidRule(_))));

        let empty_id = r#"
[[rules]]
id = ""
metric = "m"
operator = ">"
threshold = 1.0
"#;
        assert!(matches!(parse_rules(empty_id), Err(VigilError::InvalidRule(_))));

        let missing_program = r#"
[[rules]]
id = "x"
metric = "m"
operator = ">"
threshold = 1.0

[[rules.actions]]
kind = "command"
"#;
        assert!(matches!(parse_rules(missing_program), Err(VigilError::InvalidRule(_))));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let content = r#"
[[rules]]
id = "x"
metric = "m"
operator = ">"
threshold = 1.0

[[rules]]
id = "x"
metric = "n"
operator = "<"
threshold = 2.0
"#;
        assert!(matches!(parse_rules(content), Err(VigilError::InvalidRule(_))));
    }

    #[test]
    fn test_load_rules_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[rules]]\nid = \"a\"\nmetric = \"m\"\noperator = \"<=\"\nthreshold = 3.0"
        )
        .unwrap();

        let rules = load_rules(file.path()).unwrap();
        assert_eq!(rules[0].condition.operator, Operator::Lte);
    }
}
