//! Refresh strategy: when a credential should be refreshed before use.
//! Three presets differ only in their numeric parameters and the
//! `adaptive`/`preemptive` flags.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::credential::Credential;
use crate::metrics::CredentialMetrics;

/// Policy controlling [`RefreshStrategyConfig::should_refresh`].
#[derive(Debug, Clone)]
pub struct RefreshStrategyConfig {
    /// Widen the buffer based on observed latency/rate/error signals.
    pub adaptive: bool,
    /// Double the buffer under high traffic.
    pub preemptive: bool,
    pub default_buffer: Duration,
    pub min_buffer: Duration,
    pub max_buffer: Duration,
    /// Requests/hour at or above which `preemptive` doubles the buffer.
    pub high_traffic_threshold: f64,
    /// Baseline requests/hour above which the adaptive rate term kicks in.
    pub baseline_requests_per_hour: f64,
}

impl Default for RefreshStrategyConfig {
    fn default() -> Self {
        Self {
            adaptive: false,
            preemptive: false,
            default_buffer: Duration::from_secs(5 * 60),
            min_buffer: Duration::from_secs(60),
            max_buffer: Duration::from_secs(30 * 60),
            high_traffic_threshold: 100.0,
            baseline_requests_per_hour: 10.0,
        }
    }
}

impl RefreshStrategyConfig {
    /// Fixed 5 minute buffer, no adaptive or preemptive behavior.
    pub fn default_preset() -> Self {
        Self::default()
    }

    /// Widens the buffer based on latency, request rate, and error rate.
    pub fn adaptive_preset() -> Self {
        Self {
            adaptive: true,
            preemptive: false,
            ..Self::default()
        }
    }

    /// Adaptive plus preemptive doubling under high traffic, and a larger
    /// ceiling, trading a few extra refreshes for fewer surprise expiries.
    pub fn conservative_preset() -> Self {
        Self {
            adaptive: true,
            preemptive: true,
            max_buffer: Duration::from_secs(60 * 60),
            ..Self::default()
        }
    }

    /// True once `now` is within the refresh buffer of `expires_at`.
    pub fn should_refresh(
        &self,
        credential: &Credential,
        metrics: &CredentialMetrics,
        now: DateTime<Utc>,
    ) -> bool {
        let expires_at = match credential.expires_at {
            Some(t) => t,
            None => return false,
        };

        let mut buffer = self.default_buffer;

        if self.adaptive {
            let avg_latency_ms = metrics.average_latency.as_millis() as f64;
            buffer += Duration::from_secs_f64((avg_latency_ms / 100.0) * 30.0);

            let rph = metrics.requests_per_hour(now);
            if rph > self.baseline_requests_per_hour {
                let excess = rph - self.baseline_requests_per_hour;
                buffer += Duration::from_secs_f64((excess / 10.0) * 30.0);
            }

            let success_rate = metrics.success_rate();
            if success_rate < 0.95 {
                let deficit = (0.95 - success_rate).max(0.0);
                let extra = (deficit / 0.95 * 60.0).min(60.0);
                buffer += Duration::from_secs_f64(extra);
            }

            buffer = buffer.clamp(self.min_buffer, self.max_buffer);
        }

        if self.preemptive {
            let rph = metrics.requests_per_hour(now);
            if rph >= self.high_traffic_threshold {
                buffer = (buffer * 2).min(self.max_buffer);
            }
        }

        let chrono_buffer = chrono::Duration::from_std(buffer).unwrap_or(chrono::Duration::zero());
        now >= expires_at - chrono_buffer
    }
}
