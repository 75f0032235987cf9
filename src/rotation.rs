//! Rotation state and policy types.
//!
//! The rotation *manager* operations (`mark_for_rotation`,
//! `complete_rotation`, `auto_decommission_expired`,
//! `check_rotation_needed`) live on [`crate::pool::CredentialPool`] in
//! `pool_rotation.rs`, since they mutate the same locked pool state as
//! every other pool operation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Per-credential rotation bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct RotationState {
    pub created_at: DateTime<Utc>,
    pub marked_for_rotation: bool,
    pub rotation_started_at: Option<DateTime<Utc>>,
    pub replacement_id: Option<String>,
    pub decommission_at: Option<DateTime<Utc>>,
}

impl RotationState {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            marked_for_rotation: false,
            rotation_started_at: None,
            replacement_id: None,
            decommission_at: None,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Pool-wide rotation policy. Constructed in code, not parsed from
/// config: rotation scheduling decisions are this crate's job, while
/// loading the interval from a file is the embedding application's.
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    /// Whether the periodic "needs rotation" scan is active at all.
    pub enabled: bool,
    /// Age (from `created_at`) at which a credential is reported as a
    /// rotation candidate.
    pub rotation_interval: Duration,
    /// Overlap window during which both the old and new credential are
    /// selectable.
    pub grace_period: Duration,
    /// Whether `auto_decommission_expired` is meant to be driven by a
    /// background loop (the loop itself is the caller's responsibility;
    /// this flag only gates whether the scan does anything).
    pub auto_decommission: bool,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            rotation_interval: Duration::from_secs(90 * 24 * 3600),
            grace_period: Duration::from_secs(24 * 3600),
            auto_decommission: false,
        }
    }
}

impl RotationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rotation_interval(mut self, d: Duration) -> Self {
        self.rotation_interval = d;
        self
    }

    pub fn with_grace_period(mut self, d: Duration) -> Self {
        self.grace_period = d;
        self
    }

    pub fn with_auto_decommission(mut self, enabled: bool) -> Self {
        self.auto_decommission = enabled;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
