//! Per-credential request metrics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Per-credential counters. `average_latency` is recomputed on every
/// `record_request` call as `total_latency / request_count`.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialMetrics {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub tokens_used: u64,
    #[serde(with = "duration_secs")]
    pub total_latency: Duration,
    #[serde(with = "duration_secs")]
    pub average_latency: Duration,
    pub first_used: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub refresh_count: u64,
    pub last_refresh_time: Option<DateTime<Utc>>,
}

impl Default for CredentialMetrics {
    fn default() -> Self {
        Self {
            request_count: 0,
            success_count: 0,
            error_count: 0,
            tokens_used: 0,
            total_latency: Duration::ZERO,
            average_latency: Duration::ZERO,
            first_used: None,
            last_used: None,
            refresh_count: 0,
            last_refresh_time: None,
        }
    }
}

impl CredentialMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&mut self, tokens: u64, latency: Duration, success: bool, now: DateTime<Utc>) {
        self.request_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
        self.tokens_used += tokens;
        self.total_latency += latency;
        self.average_latency = self.total_latency / self.request_count as u32;
        if self.first_used.is_none() {
            self.first_used = Some(now);
        }
        self.last_used = Some(now);
    }

    pub fn record_refresh(&mut self, now: DateTime<Utc>) {
        self.refresh_count += 1;
        self.last_refresh_time = Some(now);
    }

    /// 1.0 when no requests have been recorded yet.
    pub fn success_rate(&self) -> f64 {
        if self.request_count == 0 {
            1.0
        } else {
            self.success_count as f64 / self.request_count as f64
        }
    }

    /// Observed request rate since `first_used`, used by the adaptive
    /// refresh-buffer heuristic. Zero if there is no usage history.
    pub fn requests_per_hour(&self, now: DateTime<Utc>) -> f64 {
        match self.first_used {
            Some(first) => {
                let hours = (now - first).num_milliseconds() as f64 / 3_600_000.0;
                if hours <= 0.0 {
                    self.request_count as f64
                } else {
                    self.request_count as f64 / hours
                }
            }
            None => 0.0,
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_is_one_with_no_requests() {
        let m = CredentialMetrics::new();
        assert_eq!(m.success_rate(), 1.0);
    }

    #[test]
    fn record_request_maintains_invariant() {
        let mut m = CredentialMetrics::new();
        let now = Utc::now();
        m.record_request(10, Duration::from_millis(100), true, now);
        m.record_request(20, Duration::from_millis(300), false, now);
        assert_eq!(m.request_count, 2);
        assert_eq!(m.success_count + m.error_count, m.request_count);
        assert_eq!(m.total_latency, Duration::from_millis(400));
        assert_eq!(m.average_latency, Duration::from_millis(200));
        assert_eq!(m.tokens_used, 30);
    }
}
