//! Pool operations for alerting and export.

use chrono::Utc;

use crate::monitoring::{
    alert_history_key, cooldown_elapsed, dispatch_webhook, Alert, AlertType, CredentialHealthRecord,
    HealthSummary, PrometheusCredentialSample, PrometheusExport, WebhookPayload,
};
use crate::pool::CredentialPool;

impl CredentialPool {
    /// Evaluate alert conditions across the pool, dispatching webhooks for
    /// any that pass their cooldown. Always returns the full set of alerts
    /// raised this call, even ones suppressed from the webhook by cooldown.
    pub fn check_alerts(&self) -> Vec<Alert> {
        let now = Utc::now();
        let mut state = self.state.write().expect("pool lock poisoned");
        if !state.monitoring.alerts_enabled {
            return Vec::new();
        }

        let failure_rate_threshold = state.monitoring.failure_rate_threshold;
        let expiry_warning_time = state.monitoring.expiry_warning_time;
        let cooldown = state.monitoring.alert_cooldown;
        let webhook_url = state.monitoring.webhook_url.clone();
        let webhook_events = state.monitoring.webhook_events.clone();

        let mut raised = Vec::new();
        let ids: Vec<String> = state.order.clone();

        for id in &ids {
            let metrics = match state.metrics.get(id) {
                Some(m) => m.clone(),
                None => continue,
            };

            if metrics.request_count >= 10 {
                let failure_rate = 1.0 - metrics.success_rate();
                if failure_rate > failure_rate_threshold {
                    raised.push(Alert {
                        alert_type: AlertType::Failure,
                        credential_id: id.clone(),
                        timestamp: now,
                        message: format!("failure rate {:.2} exceeds threshold {:.2}", failure_rate, failure_rate_threshold),
                        details: serde_json::json!({
                            "request_count": metrics.request_count,
                            "failure_rate": failure_rate,
                        }),
                    });
                }
            }

            if let Some(expires_at) = state.credentials.get(id).and_then(|c| c.expires_at) {
                let remaining = expires_at - now;
                if remaining > chrono::Duration::zero()
                    && remaining <= chrono::Duration::from_std(expiry_warning_time).unwrap_or(chrono::Duration::zero())
                {
                    raised.push(Alert {
                        alert_type: AlertType::ExpiryWarning,
                        credential_id: id.clone(),
                        timestamp: now,
                        message: format!("credential expires in {} seconds", remaining.num_seconds()),
                        details: serde_json::json!({ "expires_at": expires_at }),
                    });
                }
            }
        }

        for alert in &raised {
            let key = alert_history_key(alert.alert_type, &alert.credential_id);
            if !cooldown_elapsed(&state.alert_history, &key, cooldown, now) {
                continue;
            }
            state.alert_history.insert(key, now);

            if let Some(url) = &webhook_url {
                if webhook_events.contains(&alert.alert_type) {
                    dispatch_webhook(self.http.clone(), url.clone(), WebhookPayload::from(alert));
                }
            }
        }

        raised
    }

    /// Emit one `refresh_failure`-as-`failure` alert and (if configured)
    /// dispatch its webhook immediately, bypassing the on-demand
    /// `check_alerts` scan. Used right after a refresh failure is recorded
    /// and right after a successful rotation.
    pub(crate) fn maybe_dispatch_webhook(
        &self,
        alert_type: AlertType,
        credential_id: &str,
        message: &str,
        details: serde_json::Value,
    ) {
        let now = Utc::now();
        let mut state = self.state.write().expect("pool lock poisoned");
        if !state.monitoring.alerts_enabled {
            return;
        }
        let key = alert_history_key(alert_type, credential_id);
        let cooldown = state.monitoring.alert_cooldown;
        if !cooldown_elapsed(&state.alert_history, &key, cooldown, now) {
            return;
        }
        state.alert_history.insert(key, now);

        let Some(url) = state.monitoring.webhook_url.clone() else {
            return;
        };
        if !state.monitoring.webhook_events.contains(&alert_type) {
            return;
        }
        drop(state);

        let payload = WebhookPayload {
            alert_type,
            credential_id: credential_id.to_string(),
            timestamp: now,
            message: message.to_string(),
            details,
        };
        dispatch_webhook(self.http.clone(), url, payload);
    }

    pub fn get_health_summary(&self) -> HealthSummary {
        let state = self.state.read().expect("pool lock poisoned");
        let now = Utc::now();

        let mut healthy = 0usize;
        let mut in_backoff = 0usize;
        let mut total_requests = 0u64;
        let mut total_successes = 0u64;
        let mut records = Vec::with_capacity(state.order.len());

        for id in &state.order {
            let health = state.health.get(id).cloned().unwrap_or_default();
            let metrics = state.metrics.get(id).cloned().unwrap_or_default();
            let rotation = state
                .rotation
                .get(id)
                .cloned()
                .unwrap_or_else(|| crate::rotation::RotationState::new(now));

            if health.is_healthy {
                healthy += 1;
            }
            if !health.is_available(now) {
                in_backoff += 1;
            }
            total_requests += metrics.request_count;
            total_successes += metrics.success_count;

            records.push(CredentialHealthRecord {
                id: id.clone(),
                health,
                metrics,
                rotation,
            });
        }

        let success_rate = if total_requests == 0 {
            1.0
        } else {
            total_successes as f64 / total_requests as f64
        };

        HealthSummary {
            total_credentials: state.order.len(),
            healthy_credentials: healthy,
            unhealthy_credentials: state.order.len() - healthy,
            in_backoff,
            total_requests,
            success_rate,
            credentials: records,
        }
    }

    pub fn export_prometheus(&self) -> PrometheusExport {
        let state = self.state.read().expect("pool lock poisoned");
        let samples = state
            .order
            .iter()
            .filter_map(|id| {
                let m = state.metrics.get(id)?;
                Some(PrometheusCredentialSample {
                    id: id.clone(),
                    requests_total: m.request_count,
                    successes_total: m.success_count,
                    errors_total: m.error_count,
                    tokens_total: m.tokens_used,
                    refreshes_total: m.refresh_count,
                    latency_seconds_bucket: [m.average_latency.as_secs_f64()],
                })
            })
            .collect();
        PrometheusExport { samples }
    }

    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.get_health_summary())
    }
}
