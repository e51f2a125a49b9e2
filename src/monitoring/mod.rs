// ProcessGuard - Alert Manager data model and dispatch
//
// Converts threshold violations and lifecycle events into typed `Alert`
// records, deduplicates them via a cooldown map, and fans notifications out
// to whichever sinks are enabled.

pub mod alerts;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use alerts::{AlertManager, NotificationSender};

/// History ring cap before compaction.
pub const ALERT_HISTORY_CAP: usize = 1000;
/// Target length after compaction (oldest dropped).
pub const ALERT_HISTORY_COMPACT_TO: usize = 500;
/// Cooldown window for a given alert key.
pub const ALERT_COOLDOWN_SECONDS: i64 = 300;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    /// Slack attachment color per §6 of the notification payload shapes.
    pub fn slack_color(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "#36a64f",
            AlertSeverity::Warning => "#ff9500",
            AlertSeverity::Critical => "#ff0000",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub kind: String,
    pub level: AlertSeverity,
    pub title: String,
    pub message: String,
    pub process_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub acknowledged: bool,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// The dedup/cooldown key: `kind:process_name_or_"system"`.
    pub fn key(kind: &str, process_name: Option<&str>) -> String {
        format!("{}:{}", kind, process_name.unwrap_or("system"))
    }
}

fn default_smtp_port() -> u16 {
    25
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub use_starttls: bool,
    pub from_address: String,
    #[serde(default)]
    pub to_addresses: Vec<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "localhost".to_string(),
            smtp_port: 25,
            use_starttls: false,
            from_address: "processguard@localhost".to_string(),
            to_addresses: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SlackConfig {
    pub webhook_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub email_enabled: bool,
    #[serde(default)]
    pub webhook_enabled: bool,
    #[serde(default)]
    pub slack_enabled: bool,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub slack: SlackConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            email_enabled: false,
            webhook_enabled: false,
            slack_enabled: false,
            email: EmailConfig::default(),
            webhook: WebhookConfig::default(),
            slack: SlackConfig::default(),
        }
    }
}

/// Fixed host-level alert thresholds (not configurable, per SPEC_FULL.md §4.3).
pub const HOST_ALERT_THRESHOLD_PERCENT: f64 = 90.0;
