//! Health and backoff state machine.
//!
//! Two independent backoff curves are tracked: one for ordinary API-call
//! failures, one for refresh failures. They isolate at different
//! thresholds because they indicate different classes of problem.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

const API_FAILURE_HEALTH_THRESHOLD: u32 = 3;
const REFRESH_FAILURE_HEALTH_THRESHOLD: u32 = 5;

/// `min(60, 2^(failure_count - 1))` seconds, for `failure_count >= 1`.
pub fn api_backoff_secs(failure_count: u32) -> i64 {
    if failure_count == 0 {
        return 0;
    }
    let shift = (failure_count - 1).min(6);
    (1i64 << shift).min(60)
}

/// 60, 120, 240, capped at 480; indexed by `refresh_fail_count - 5`,
/// applied only once `refresh_fail_count >= 5`.
pub fn refresh_backoff_secs(refresh_fail_count: u32) -> i64 {
    if refresh_fail_count < REFRESH_FAILURE_HEALTH_THRESHOLD {
        return 0;
    }
    let idx = refresh_fail_count - REFRESH_FAILURE_HEALTH_THRESHOLD;
    (60i64 << idx.min(3)).min(480)
}

/// Per-credential health record.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialHealth {
    pub failure_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub is_healthy: bool,
    pub backoff_until: Option<DateTime<Utc>>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub refresh_in_flight: bool,
    pub last_refresh_error: Option<String>,
    pub refresh_fail_count: u32,
}

impl Default for CredentialHealth {
    fn default() -> Self {
        Self {
            failure_count: 0,
            last_failure: None,
            last_success: None,
            is_healthy: true,
            backoff_until: None,
            last_refresh: None,
            refresh_in_flight: false,
            last_refresh_error: None,
            refresh_fail_count: 0,
        }
    }
}

impl CredentialHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// `now >= backoff_until`. Backoff, not health, gates selection.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        match self.backoff_until {
            Some(until) => now >= until,
            None => true,
        }
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.last_success = Some(now);
        self.failure_count = 0;
        self.is_healthy = true;
        self.backoff_until = None;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.last_failure = Some(now);
        self.failure_count += 1;
        self.backoff_until = Some(now + ChronoDuration::seconds(api_backoff_secs(self.failure_count)));
        if self.failure_count >= API_FAILURE_HEALTH_THRESHOLD {
            self.is_healthy = false;
        }
    }

    /// Fresh tokens restore general health: clears refresh-failure state
    /// AND performs the full `record_success` effect.
    pub fn record_refresh_success(&mut self, now: DateTime<Utc>) {
        self.refresh_fail_count = 0;
        self.last_refresh_error = None;
        self.refresh_in_flight = false;
        self.last_refresh = Some(now);
        self.record_success(now);
    }

    pub fn record_refresh_failure(&mut self, err: impl Into<String>, now: DateTime<Utc>) {
        self.refresh_fail_count += 1;
        self.last_refresh_error = Some(err.into());
        self.refresh_in_flight = false;
        if self.refresh_fail_count >= REFRESH_FAILURE_HEALTH_THRESHOLD {
            self.is_healthy = false;
            self.backoff_until =
                Some(now + ChronoDuration::seconds(refresh_backoff_secs(self.refresh_fail_count)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_backoff_curve_matches_spec() {
        assert_eq!(api_backoff_secs(1), 1);
        assert_eq!(api_backoff_secs(2), 2);
        assert_eq!(api_backoff_secs(3), 4);
        assert_eq!(api_backoff_secs(4), 8);
        assert_eq!(api_backoff_secs(5), 16);
        assert_eq!(api_backoff_secs(6), 32);
        assert_eq!(api_backoff_secs(7), 60);
        assert_eq!(api_backoff_secs(100), 60);
    }

    #[test]
    fn refresh_backoff_curve_matches_spec() {
        assert_eq!(refresh_backoff_secs(4), 0);
        assert_eq!(refresh_backoff_secs(5), 60);
        assert_eq!(refresh_backoff_secs(6), 120);
        assert_eq!(refresh_backoff_secs(7), 240);
        assert_eq!(refresh_backoff_secs(8), 480);
        assert_eq!(refresh_backoff_secs(50), 480);
    }

    #[test]
    fn health_threshold_flips_on_third_failure() {
        let mut h = CredentialHealth::new();
        let now = Utc::now();
        h.record_failure(now);
        assert!(h.is_healthy);
        h.record_failure(now);
        assert!(h.is_healthy);
        h.record_failure(now);
        assert!(!h.is_healthy);
    }

    #[test]
    fn refresh_health_threshold_flips_on_fifth_failure() {
        let mut h = CredentialHealth::new();
        let now = Utc::now();
        for _ in 0..4 {
            h.record_refresh_failure("boom", now);
            assert!(h.is_healthy);
        }
        h.record_refresh_failure("boom", now);
        assert!(!h.is_healthy);
    }

    #[test]
    fn success_resets_failure_state() {
        let mut h = CredentialHealth::new();
        let now = Utc::now();
        h.record_failure(now);
        h.record_failure(now);
        h.record_failure(now);
        assert!(!h.is_healthy);
        h.record_success(now);
        assert_eq!(h.failure_count, 0);
        assert!(h.is_healthy);
        assert!(h.backoff_until.is_none());
    }

    #[test]
    fn backoff_monotonicity_until_cap() {
        let mut h = CredentialHealth::new();
        let now = Utc::now();
        let mut prev = 0i64;
        for _ in 0..8 {
            h.record_failure(now);
            let until = h.backoff_until.unwrap();
            let delta = (until - now).num_seconds();
            assert!(delta >= prev);
            prev = delta;
        }
        assert_eq!(prev, 60);
    }
}
