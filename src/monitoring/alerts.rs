// ProcessGuard - Alert Manager
//
// Dedup + fan-out for threshold and lifecycle alerts. The webhook and Slack
// senders make a real HTTP POST; email is a hand-rolled SMTP client.

use super::{
    Alert, AlertSeverity, EmailConfig, NotificationConfig, SlackConfig, WebhookConfig,
    ALERT_COOLDOWN_SECONDS, ALERT_HISTORY_CAP, ALERT_HISTORY_COMPACT_TO,
};
use crate::error::UserError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

#[async_trait]
pub trait NotificationSender {
    async fn send(&self, alert: &Alert) -> Result<(), UserError>;
    fn name(&self) -> &str;
}

pub struct ConsoleAlertSender;

#[async_trait]
impl NotificationSender for ConsoleAlertSender {
    async fn send(&self, alert: &Alert) -> Result<(), UserError> {
        println!(
            "[{}] {} - {}",
            alert.level,
            alert.process_name.as_deref().unwrap_or("system"),
            alert.message
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "console"
    }
}

pub struct WebhookAlertSender {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookAlertSender {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSender for WebhookAlertSender {
    async fn send(&self, alert: &Alert) -> Result<(), UserError> {
        let body = serde_json::json!({
            "alert_id": alert.id,
            "type": alert.kind,
            "level": alert.level,
            "title": alert.title,
            "message": alert.message,
            "process_name": alert.process_name,
            "timestamp": alert.timestamp,
            "metadata": alert.metadata,
        });

        let mut request = self.client.post(&self.config.url).json(&body);
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| UserError::notification_failed("webhook", &e.to_string()))?;

        if response.status().as_u16() != 200 {
            return Err(UserError::notification_failed(
                "webhook",
                &format!("unexpected status {}", response.status()),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

pub struct SlackAlertSender {
    config: SlackConfig,
    client: reqwest::Client,
}

impl SlackAlertSender {
    pub fn new(config: SlackConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSender for SlackAlertSender {
    async fn send(&self, alert: &Alert) -> Result<(), UserError> {
        let body = serde_json::json!({
            "attachments": [{
                "color": alert.level.slack_color(),
                "title": alert.title,
                "text": alert.message,
                "fields": [
                    {"title": "Type", "value": alert.kind, "short": true},
                    {"title": "Level", "value": alert.level.label(), "short": true},
                    {"title": "Process", "value": alert.process_name.clone().unwrap_or_else(|| "system".to_string()), "short": true},
                    {"title": "Time", "value": alert.timestamp.to_rfc3339(), "short": true},
                ],
            }]
        });

        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| UserError::notification_failed("slack", &e.to_string()))?;

        if !response.status().is_success() {
            return Err(UserError::notification_failed(
                "slack",
                &format!("unexpected status {}", response.status()),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "slack"
    }
}

pub struct EmailAlertSender {
    config: EmailConfig,
}

impl EmailAlertSender {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn body(alert: &Alert) -> String {
        let metadata_pretty =
            serde_json::to_string_pretty(&alert.metadata).unwrap_or_else(|_| "{}".to_string());
        format!(
            "type: {}\nlevel: {}\ntimestamp: {}\nprocess: {}\nmessage: {}\nmetadata:\n{}\n",
            alert.kind,
            alert.level,
            alert.timestamp.to_rfc3339(),
            alert.process_name.as_deref().unwrap_or("system"),
            alert.message,
            metadata_pretty
        )
    }

    async fn expect_code(reader: &mut (impl AsyncBufReadExt + Unpin), expected: &str) -> Result<(), UserError> {
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| UserError::notification_failed("email", &e.to_string()))?;
        if !line.starts_with(expected) {
            return Err(UserError::notification_failed(
                "email",
                &format!("unexpected SMTP response: {line}"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSender for EmailAlertSender {
    async fn send(&self, alert: &Alert) -> Result<(), UserError> {
        if self.config.to_addresses.is_empty() {
            return Err(UserError::notification_failed(
                "email",
                "no recipients configured",
            ));
        }

        let addr = format!("{}:{}", self.config.smtp_host, self.config.smtp_port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| UserError::notification_failed("email", &e.to_string()))?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        Self::expect_code(&mut reader, "220").await?;

        write_half
            .write_all(format!("EHLO processguard\r\n").as_bytes())
            .await
            .map_err(|e| UserError::notification_failed("email", &e.to_string()))?;
        Self::expect_code(&mut reader, "250").await?;

        if self.config.use_starttls {
            write_half
                .write_all(b"STARTTLS\r\n")
                .await
                .map_err(|e| UserError::notification_failed("email", &e.to_string()))?;
            Self::expect_code(&mut reader, "220").await?;
            // No TLS crate in the dependency stack: the session continues in
            // plaintext after this point. Documented as a known limitation.
        }

        write_half
            .write_all(format!("MAIL FROM:<{}>\r\n", self.config.from_address).as_bytes())
            .await
            .map_err(|e| UserError::notification_failed("email", &e.to_string()))?;
        Self::expect_code(&mut reader, "250").await?;

        for to in &self.config.to_addresses {
            write_half
                .write_all(format!("RCPT TO:<{to}>\r\n").as_bytes())
                .await
                .map_err(|e| UserError::notification_failed("email", &e.to_string()))?;
            Self::expect_code(&mut reader, "250").await?;
        }

        write_half
            .write_all(b"DATA\r\n")
            .await
            .map_err(|e| UserError::notification_failed("email", &e.to_string()))?;
        Self::expect_code(&mut reader, "354").await?;

        let subject = format!("[ProcessGuard] {}: {}", alert.level.label(), alert.title);
        let message = format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\n\r\n{}\r\n.\r\n",
            self.config.from_address,
            self.config.to_addresses.join(", "),
            subject,
            Self::body(alert)
        );
        write_half
            .write_all(message.as_bytes())
            .await
            .map_err(|e| UserError::notification_failed("email", &e.to_string()))?;
        Self::expect_code(&mut reader, "250").await?;

        write_half
            .write_all(b"QUIT\r\n")
            .await
            .map_err(|e| UserError::notification_failed("email", &e.to_string()))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "email"
    }
}

/// Cooldown-deduplicated alert store with fan-out notification.
pub struct AlertManager {
    active: RwLock<HashMap<String, Alert>>,
    history: RwLock<Vec<Alert>>,
    cooldowns: RwLock<HashMap<String, DateTime<Utc>>>,
    senders: Vec<Arc<dyn NotificationSender + Send + Sync>>,
}

impl AlertManager {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            cooldowns: RwLock::new(HashMap::new()),
            senders: Vec::new(),
        }
    }

    /// Build the sender set from config, wiring only the enabled sinks.
    pub fn from_notification_config(config: &NotificationConfig) -> Self {
        let mut manager = Self::new();
        manager.senders.push(Arc::new(ConsoleAlertSender));
        if config.webhook_enabled {
            manager
                .senders
                .push(Arc::new(WebhookAlertSender::new(config.webhook.clone())));
        }
        if config.slack_enabled {
            manager
                .senders
                .push(Arc::new(SlackAlertSender::new(config.slack.clone())));
        }
        if config.email_enabled {
            manager
                .senders
                .push(Arc::new(EmailAlertSender::new(config.email.clone())));
        }
        manager
    }

    #[cfg(test)]
    pub fn add_sender(&mut self, sender: Arc<dyn NotificationSender + Send + Sync>) {
        self.senders.push(sender);
    }

    /// Creates and dispatches an alert unless its key is within cooldown.
    /// Returns `None` if suppressed.
    pub async fn create_alert(
        &self,
        kind: &str,
        level: AlertSeverity,
        title: &str,
        message: &str,
        process_name: Option<&str>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Option<Alert> {
        let key = Alert::key(kind, process_name);
        let now = Utc::now();

        {
            let cooldowns = self.cooldowns.read().await;
            if let Some(&last) = cooldowns.get(&key) {
                if (now - last).num_seconds() < ALERT_COOLDOWN_SECONDS {
                    return None;
                }
            }
        }

        let alert = Alert {
            id: format!("{key}-{}", now.timestamp_millis()),
            kind: kind.to_string(),
            level,
            title: title.to_string(),
            message: message.to_string(),
            process_name: process_name.map(str::to_string),
            timestamp: now,
            metadata,
            acknowledged: false,
            resolved: false,
            resolved_at: None,
        };

        self.cooldowns.write().await.insert(key.clone(), now);
        self.active.write().await.insert(key, alert.clone());

        {
            let mut history = self.history.write().await;
            history.push(alert.clone());
            if history.len() > ALERT_HISTORY_CAP {
                let drop = history.len() - ALERT_HISTORY_COMPACT_TO;
                history.drain(0..drop);
            }
        }

        self.dispatch(&alert).await;
        info!("created alert {}: {}", alert.id, alert.message);
        Some(alert)
    }

    async fn dispatch(&self, alert: &Alert) {
        let handles: Vec<_> = self
            .senders
            .iter()
            .map(|sender| {
                let sender = Arc::clone(sender);
                let alert = alert.clone();
                tokio::spawn(async move {
                    if let Err(e) = sender.send(&alert).await {
                        error!("notification sink '{}' failed: {}", sender.name(), e);
                    }
                })
            })
            .collect();

        for handle in handles {
            let _ = handle.await;
        }
    }

    pub async fn acknowledge(&self, id: &str) -> bool {
        let mut active = self.active.write().await;
        for alert in active.values_mut() {
            if alert.id == id {
                alert.acknowledged = true;
                return true;
            }
        }
        warn!("acknowledge requested for unknown alert id '{}'", id);
        false
    }

    pub async fn resolve(&self, id: &str) -> bool {
        let key = {
            let active = self.active.read().await;
            active
                .iter()
                .find(|(_, a)| a.id == id)
                .map(|(k, _)| k.clone())
        };
        let Some(key) = key else {
            return false;
        };

        let mut active = self.active.write().await;
        if let Some(mut alert) = active.remove(&key) {
            alert.resolved = true;
            alert.resolved_at = Some(Utc::now());
            drop(active);
            let mut history = self.history.write().await;
            history.push(alert);
            true
        } else {
            false
        }
    }

    pub async fn active(&self) -> Vec<Alert> {
        self.active.read().await.values().cloned().collect()
    }

    pub async fn history(&self, hours: i64) -> Vec<Alert> {
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        self.history
            .read()
            .await
            .iter()
            .filter(|a| a.timestamp >= cutoff)
            .cloned()
            .collect()
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSender(Arc<AtomicUsize>);

    #[async_trait]
    impl NotificationSender for CountingSender {
        async fn send(&self, _alert: &Alert) -> Result<(), UserError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_create_alert_dispatches_and_cools_down() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut manager = AlertManager::new();
        manager.add_sender(Arc::new(CountingSender(counter.clone())));

        let first = manager
            .create_alert(
                "high_cpu",
                AlertSeverity::Warning,
                "High CPU",
                "cpu at 95%",
                Some("worker"),
                HashMap::new(),
            )
            .await;
        assert!(first.is_some());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let second = manager
            .create_alert(
                "high_cpu",
                AlertSeverity::Warning,
                "High CPU",
                "cpu at 96%",
                Some("worker"),
                HashMap::new(),
            )
            .await;
        assert!(second.is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert_eq!(manager.active().await.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_moves_alert_to_history() {
        let manager = AlertManager::new();
        let alert = manager
            .create_alert(
                "process_failed",
                AlertSeverity::Critical,
                "Process failed",
                "worker exited",
                Some("worker"),
                HashMap::new(),
            )
            .await
            .unwrap();

        assert!(manager.resolve(&alert.id).await);
        assert!(manager.active().await.is_empty());
        assert_eq!(manager.history(1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_id_returns_false() {
        let manager = AlertManager::new();
        assert!(!manager.acknowledge("nonexistent").await);
    }
}
