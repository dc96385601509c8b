//! Notification channels: webhook, dashboard and email.

use std::time::Duration;

use chrono::{Local, SecondsFormat};
use serde_json::{json, Value};

use super::rules::metric_unit;
use super::types::{AlertEvent, AlertStatus, NotificationChannel, Severity};
use crate::error::AlertError;

pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

pub const CHANNEL_WEBHOOK: &str = "webhook";
pub const CHANNEL_DASHBOARD: &str = "dashboard";
pub const CHANNEL_EMAIL: &str = "email";

/// One-line event summary, e.g. `FIRING [critical] CPU High Usage: 95.00% > 90.00%`.
pub fn format_message(event: &AlertEvent) -> String {
    let status = match event.status {
        AlertStatus::Firing => "FIRING",
        AlertStatus::Resolved => "RESOLVED",
    };
    let unit = metric_unit(&event.metric);
    format!(
        "{} [{}] {}: {:.2}{} {} {:.2}{}",
        status, event.severity, event.rule_name, event.value, unit, event.operator, event.threshold, unit
    )
}

/// Markdown card posted as the webhook `text` field.
pub fn webhook_text(event: &AlertEvent) -> String {
    let status = match event.status {
        AlertStatus::Firing => "FIRING",
        AlertStatus::Resolved => "RESOLVED",
    };
    let severity_mark = match event.severity {
        Severity::Critical => "(!!)",
        Severity::Warning => "(!)",
    };
    let unit = metric_unit(&event.metric);
    let time = event.fired_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");

    format!(
        "**opswatch alert**\n\n\
         **Status:** {}\n\
         **Severity:** {} {}\n\
         **Rule:** {}\n\
         **Metric:** {}\n\
         **Value:** {:.2}{} {} {:.2}{}\n\
         **Time:** {}",
        status,
        severity_mark,
        event.severity,
        event.rule_name,
        event.metric,
        event.value,
        unit,
        event.operator,
        event.threshold,
        unit,
        time
    )
}

pub fn webhook_payload(event: &AlertEvent) -> Value {
    json!({
        "text": webhook_text(event),
        "alert": {
            "id": event.id,
            "rule_id": event.rule_id,
            "rule_name": event.rule_name,
            "status": event.status,
            "severity": event.severity,
            "metric": event.metric,
            "value": event.value,
            "threshold": event.threshold,
            "fired_at": event.fired_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    })
}

/// Delivers events to configured channels. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
}

impl Notifier {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Failed to build webhook client ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self { client }
    }

    /// Deliver `event` through one channel.
    pub async fn send(
        &self,
        event: &AlertEvent,
        channel: &NotificationChannel,
    ) -> Result<(), AlertError> {
        match channel.kind.as_str() {
            CHANNEL_WEBHOOK => self.send_webhook(event, channel).await,
            CHANNEL_DASHBOARD => {
                log::info!("Dashboard notification: {}", event.rule_name);
                Ok(())
            }
            CHANNEL_EMAIL => send_email(event, channel),
            other => Err(AlertError::UnknownChannel(other.to_string())),
        }
    }

    async fn send_webhook(
        &self,
        event: &AlertEvent,
        channel: &NotificationChannel,
    ) -> Result<(), AlertError> {
        let url = channel
            .config
            .get("url")
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AlertError::notification("webhook URL not configured"))?;

        let response = self
            .client
            .post(url)
            .json(&webhook_payload(event))
            .send()
            .await
            .map_err(|e| AlertError::notification(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(AlertError::notification(format!(
                "webhook returned status {}",
                status.as_u16()
            )));
        }

        log::info!("Webhook sent: {}", event.rule_name);
        Ok(())
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

fn send_email(event: &AlertEvent, channel: &NotificationChannel) -> Result<(), AlertError> {
    let to = channel
        .config
        .get("to")
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AlertError::notification("email recipient not configured"))?;

    log::info!("Email notification not sent (no transport): {} -> {}", event.rule_name, to);
    Err(AlertError::notification("email notification not implemented"))
}
