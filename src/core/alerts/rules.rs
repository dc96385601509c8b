//! Builtin rules, presets and rule validation.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::types::{AlertRule, Operator, Severity};
use crate::error::AlertError;
use crate::utils::duration::parse_duration;

/// Metrics a rule may target.
pub const SUPPORTED_METRICS: [&str; 7] = ["cpu", "memory", "disk", "swap", "load1", "load5", "load15"];

/// Applied when a rule carries no usable sustain duration.
pub const DEFAULT_SUSTAIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RulePreset {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub rule_ids: &'static [&'static str],
}

pub static PRESETS: [RulePreset; 3] = [
    RulePreset {
        id: "essential",
        name: "Essential",
        description: "Basic alert rules for CPU, memory, disk (critical only)",
        rule_ids: &["cpu_high", "memory_high", "disk_high"],
    },
    RulePreset {
        id: "standard",
        name: "Standard",
        description: "Complete monitoring with warning and critical levels",
        rule_ids: &[
            "cpu_high",
            "cpu_warning",
            "memory_high",
            "memory_warning",
            "disk_high",
            "disk_warning",
        ],
    },
    RulePreset {
        id: "comprehensive",
        name: "Comprehensive",
        description: "All builtin alert rules",
        rule_ids: &[
            "cpu_high",
            "cpu_warning",
            "memory_high",
            "memory_warning",
            "disk_high",
            "disk_warning",
            "load_high",
            "swap_high",
        ],
    },
];

struct BuiltinTemplate {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    metric: &'static str,
    threshold: f64,
    duration: &'static str,
    severity: Severity,
}

static BUILTINS: [BuiltinTemplate; 8] = [
    BuiltinTemplate {
        id: "cpu_high",
        name: "CPU High Usage",
        description: "Alert when CPU usage exceeds threshold",
        metric: "cpu",
        threshold: 90.0,
        duration: "1m",
        severity: Severity::Critical,
    },
    BuiltinTemplate {
        id: "cpu_warning",
        name: "CPU Warning",
        description: "CPU usage reached warning threshold",
        metric: "cpu",
        threshold: 80.0,
        duration: "2m",
        severity: Severity::Warning,
    },
    BuiltinTemplate {
        id: "memory_high",
        name: "Memory High Usage",
        description: "Alert when memory usage exceeds threshold",
        metric: "memory",
        threshold: 90.0,
        duration: "1m",
        severity: Severity::Critical,
    },
    BuiltinTemplate {
        id: "memory_warning",
        name: "Memory Warning",
        description: "Memory usage reached warning threshold",
        metric: "memory",
        threshold: 80.0,
        duration: "2m",
        severity: Severity::Warning,
    },
    BuiltinTemplate {
        id: "disk_high",
        name: "Disk High Usage",
        description: "Disk usage exceeds threshold on the fullest partition",
        metric: "disk",
        threshold: 90.0,
        duration: "5m",
        severity: Severity::Critical,
    },
    BuiltinTemplate {
        id: "disk_warning",
        name: "Disk Warning",
        description: "Disk usage reached warning threshold on the fullest partition",
        metric: "disk",
        threshold: 80.0,
        duration: "5m",
        severity: Severity::Warning,
    },
    BuiltinTemplate {
        id: "load_high",
        name: "System Load High",
        description: "1-minute load average exceeds threshold",
        metric: "load1",
        threshold: 2.0,
        duration: "3m",
        severity: Severity::Critical,
    },
    BuiltinTemplate {
        id: "swap_high",
        name: "Swap High Usage",
        description: "Swap usage exceeds threshold, possible memory pressure",
        metric: "swap",
        threshold: 50.0,
        duration: "5m",
        severity: Severity::Warning,
    },
];

impl BuiltinTemplate {
    fn to_rule(&self) -> AlertRule {
        let now = Utc::now();
        AlertRule {
            id: self.id.to_string(),
            name: self.name.to_string(),
            description: self.description.to_string(),
            metric: self.metric.to_string(),
            operator: Operator::Gt,
            threshold: self.threshold,
            duration: self.duration.to_string(),
            severity: self.severity,
            enabled: false,
            builtin: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Fresh, disabled copies of every builtin rule.
pub fn builtin_rules() -> Vec<AlertRule> {
    BUILTINS.iter().map(BuiltinTemplate::to_rule).collect()
}

pub fn builtin_rule(id: &str) -> Option<AlertRule> {
    BUILTINS.iter().find(|b| b.id == id).map(BuiltinTemplate::to_rule)
}

pub fn preset(id: &str) -> Option<&'static RulePreset> {
    PRESETS.iter().find(|p| p.id == id)
}

pub fn is_supported_metric(metric: &str) -> bool {
    SUPPORTED_METRICS.contains(&metric)
}

/// Load metrics are unitless; everything else is a percentage.
pub fn metric_unit(metric: &str) -> &'static str {
    match metric {
        "load1" | "load5" | "load15" => "",
        _ => "%",
    }
}

pub fn validate_rule(rule: &AlertRule) -> Result<(), AlertError> {
    if rule.id.trim().is_empty() {
        return Err(AlertError::InvalidRuleId);
    }
    if rule.name.trim().is_empty() {
        return Err(AlertError::InvalidRuleName);
    }
    if !is_supported_metric(&rule.metric) {
        return Err(AlertError::InvalidMetric);
    }
    if !rule.threshold.is_finite() || rule.threshold < 0.0 {
        return Err(AlertError::InvalidThreshold);
    }
    if !rule.duration.is_empty() && parse_duration(&rule.duration).is_err() {
        return Err(AlertError::InvalidDuration);
    }
    Ok(())
}

/// Rule as submitted by a client; operator and severity arrive as text so a
/// bad value maps to a typed validation error instead of a decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleDraft {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metric: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub enabled: bool,
}

impl RuleDraft {
    pub fn into_rule(self) -> Result<AlertRule, AlertError> {
        let operator = Operator::parse(self.operator.trim()).ok_or(AlertError::InvalidOperator)?;
        let severity = match self.severity.trim() {
            "" => Severity::Warning,
            other => Severity::parse(other).ok_or(AlertError::InvalidSeverity)?,
        };
        let now = Utc::now();
        let rule = AlertRule {
            id: self.id.trim().to_string(),
            name: self.name.trim().to_string(),
            description: self.description,
            metric: self.metric.trim().to_string(),
            operator,
            threshold: self.threshold,
            duration: self.duration.trim().to_string(),
            severity,
            enabled: self.enabled,
            builtin: false,
            created_at: now,
            updated_at: now,
        };
        validate_rule(&rule)?;
        Ok(rule)
    }
}

/// How long the condition must hold before the rule fires.
pub fn sustain_duration(rule: &AlertRule) -> Duration {
    match parse_duration(&rule.duration) {
        Ok(d) if !d.is_zero() => d,
        _ => DEFAULT_SUSTAIN,
    }
}
