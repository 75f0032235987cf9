//! Metrics export, health summaries, and alert/webhook dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::health::CredentialHealth;
use crate::metrics::CredentialMetrics;
use crate::rotation::RotationState;

/// Event classification for alerts and webhooks.
///
/// `failure` is intentionally overloaded between high-failure-rate alerts
/// and refresh-failure alerts rather than split into a distinct
/// `refresh_failure` type, to keep the webhook payload's field names
/// stable regardless of which condition raised the alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Refresh,
    Failure,
    Rotation,
    ExpiryWarning,
}

/// Pool-wide monitoring configuration. Constructed in code.
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub alerts_enabled: bool,
    pub failure_rate_threshold: f64,
    pub expiry_warning_time: Duration,
    pub alert_cooldown: Duration,
    pub webhook_url: Option<String>,
    pub webhook_events: HashSet<AlertType>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            alerts_enabled: true,
            failure_rate_threshold: 0.25,
            expiry_warning_time: Duration::from_secs(24 * 3600),
            alert_cooldown: Duration::from_secs(3600),
            webhook_url: None,
            webhook_events: HashSet::new(),
        }
    }
}

impl MonitoringConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_webhook(mut self, url: impl Into<String>, events: &[AlertType]) -> Self {
        self.webhook_url = Some(url.into());
        self.webhook_events = events.iter().copied().collect();
        self
    }
}

/// A single alert occurrence, ready to be rendered as a webhook payload.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub credential_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub details: serde_json::Value,
}

impl Alert {
    /// Stable dedup key used against the alert-history map.
    pub fn key(&self) -> String {
        let type_str = match self.alert_type {
            AlertType::Refresh => "refresh",
            AlertType::Failure => "failure",
            AlertType::Rotation => "rotation",
            AlertType::ExpiryWarning => "expiry_warning",
        };
        format!("{type_str}:{}", self.credential_id)
    }
}

/// Per-credential record exported by [`HealthSummary`]: every field of
/// health, metrics, and rotation state an operator might want.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialHealthRecord {
    pub id: String,
    pub health: CredentialHealth,
    pub metrics: CredentialMetrics,
    pub rotation: RotationState,
}

/// Pool-wide health summary export.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub total_credentials: usize,
    pub healthy_credentials: usize,
    pub unhealthy_credentials: usize,
    pub in_backoff: usize,
    pub total_requests: u64,
    pub success_rate: f64,
    pub credentials: Vec<CredentialHealthRecord>,
}

/// Prometheus-style per-credential export.
#[derive(Debug, Clone, Serialize)]
pub struct PrometheusCredentialSample {
    pub id: String,
    pub requests_total: u64,
    pub successes_total: u64,
    pub errors_total: u64,
    pub tokens_total: u64,
    pub refreshes_total: u64,
    /// Single-sample latency histogram bucket: `[average_latency]`.
    pub latency_seconds_bucket: [f64; 1],
}

#[derive(Debug, Clone, Serialize)]
pub struct PrometheusExport {
    pub samples: Vec<PrometheusCredentialSample>,
}

/// Webhook JSON payload: stable field names, independent of
/// [`Alert`]'s internal field order.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub credential_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub details: serde_json::Value,
}

impl From<&Alert> for WebhookPayload {
    fn from(a: &Alert) -> Self {
        Self {
            alert_type: a.alert_type,
            credential_id: a.credential_id.clone(),
            timestamp: a.timestamp,
            message: a.message.clone(),
            details: a.details.clone(),
        }
    }
}

/// Fire-and-forget webhook delivery: must never block the caller.
/// Spawned onto the ambient tokio runtime; failures are logged and
/// dropped, never surfaced back to the operation that triggered the alert.
pub fn dispatch_webhook(client: reqwest::Client, url: String, payload: WebhookPayload) {
    tokio::spawn(async move {
        match client.post(&url).json(&payload).send().await {
            Ok(resp) if !resp.status().is_success() => {
                tracing::warn!(
                    url = %url,
                    status = %resp.status(),
                    "webhook delivery rejected"
                );
            }
            Ok(_) => {
                tracing::debug!(url = %url, alert_type = ?payload.alert_type, "webhook delivered");
            }
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "webhook delivery failed");
            }
        }
    });
}

pub(crate) fn alert_history_key(alert_type: AlertType, credential_id: &str) -> String {
    let type_str = match alert_type {
        AlertType::Refresh => "refresh",
        AlertType::Failure => "failure",
        AlertType::Rotation => "rotation",
        AlertType::ExpiryWarning => "expiry_warning",
    };
    format!("{type_str}:{credential_id}")
}

pub(crate) fn cooldown_elapsed(
    history: &HashMap<String, DateTime<Utc>>,
    key: &str,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> bool {
    match history.get(key) {
        Some(last) => {
            let elapsed = (now - *last).to_std().unwrap_or(Duration::ZERO);
            elapsed >= cooldown
        }
        None => true,
    }
}
