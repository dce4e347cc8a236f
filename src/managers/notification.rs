//! Webhook delivery of DR alerts
//!
//! Payloads use the Discord embed format, which most chat webhooks accept.

use crate::store::{Alert, DrillRecord, DrillStatus};
use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info};

/// Embed color codes (decimal)
#[derive(Debug, Clone, Copy)]
pub enum NotificationColor {
    /// Red - breached targets
    Failure = 15158332,
    /// Orange - drill finished with a failed restore
    Warning = 15105570,
    /// Green
    Success = 3066993,
}

impl NotificationColor {
    fn as_decimal(&self) -> u32 {
        *self as u32
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    color: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct EmbedFooter {
    text: String,
}

/// Sends drill alerts to a webhook
pub struct NotificationManager {
    webhook_url: String,
    timeout: Duration,
}

impl NotificationManager {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Build from an optional URL; blank means disabled
    pub fn from_url(webhook_url: Option<&str>) -> Option<Self> {
        webhook_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(Self::new)
    }

    /// Deliver one alert raised by `drill`
    pub fn send_alert(&self, alert: &Alert, drill: &DrillRecord) -> Result<()> {
        let payload = build_alert_payload(alert, drill);
        self.send_webhook(&payload)?;
        info!("Delivered {} alert for installation '{}'", alert.level, alert.installation_id);
        Ok(())
    }

    fn send_webhook(&self, payload: &WebhookPayload) -> Result<()> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .post(&self.webhook_url)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .context("Failed to send alert webhook")?;

        let status = response.status();
        if status.is_success() {
            debug!("Alert webhook sent successfully");
            Ok(())
        } else {
            let body = response.text().unwrap_or_default();
            error!("Alert webhook failed with status {}: {}", status, body);
            anyhow::bail!("Alert webhook failed with status {}: {}", status, body)
        }
    }
}

fn build_alert_payload(alert: &Alert, drill: &DrillRecord) -> WebhookPayload {
    let color = match drill.status {
        DrillStatus::Failed => NotificationColor::Warning,
        _ if alert.level == "error" => NotificationColor::Failure,
        _ => NotificationColor::Success,
    };

    let mut fields = vec![
        EmbedField {
            name: "Installation".to_string(),
            value: alert.installation_id.clone(),
            inline: true,
        },
        EmbedField {
            name: "Drill".to_string(),
            value: format!("{} ({})", drill.id, drill.status),
            inline: true,
        },
    ];

    if let Some(rpo) = drill.rpo_minutes {
        fields.push(EmbedField {
            name: "RPO".to_string(),
            value: format_minutes(rpo),
            inline: true,
        });
    }
    if let Some(rto) = drill.rto_minutes {
        fields.push(EmbedField {
            name: "RTO".to_string(),
            value: format_minutes(rto),
            inline: true,
        });
    }
    if let Some(ref notes) = drill.notes {
        let notes = if notes.chars().count() > 500 {
            format!("{}...", notes.chars().take(497).collect::<String>())
        } else {
            notes.clone()
        };
        fields.push(EmbedField {
            name: "Restore error".to_string(),
            value: format!("```\n{}\n```", notes),
            inline: false,
        });
    }

    WebhookPayload {
        username: Some("Backup DR".to_string()),
        content: None,
        embeds: vec![Embed {
            title: format!("\u{274C} DR target breached ({})", alert.level),
            description: Some(alert.message.clone()),
            color: color.as_decimal(),
            fields,
            footer: Some(EmbedFooter {
                text: format!("backup-dr {}", env!("CARGO_PKG_VERSION")),
            }),
            timestamp: Some(alert.created_at.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
        }],
    }
}

/// Human-readable minutes
fn format_minutes(minutes: u32) -> String {
    if minutes < 60 {
        format!("{}m", minutes)
    } else {
        let hours = minutes / 60;
        let rest = minutes % 60;
        if rest == 0 {
            format!("{}h", hours)
        } else {
            format!("{}h {}m", hours, rest)
        }
    }
}
