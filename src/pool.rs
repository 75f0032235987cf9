//! Credential pool: shared state, construction, and the operations that
//! don't need their own module (selection, health/metrics recording,
//! snapshot getters, policy setters).
//!
//! Concurrency model: every mutable field below lives behind a single
//! `RwLock<PoolState>`. The round-robin cursor is the one exception: it's
//! a bare atomic so `pick_next` never needs the write side of the lock.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::RwLock;
use std::time::Duration;

use crate::credential::Credential;
use crate::error::PoolError;
use crate::health::CredentialHealth;
use crate::metrics::CredentialMetrics;
use crate::monitoring::MonitoringConfig;
use crate::refresh::RefreshFn;
use crate::rotation::{RotationPolicy, RotationState};
use crate::strategy::RefreshStrategyConfig;

pub(crate) struct PoolState {
    pub(crate) credentials: HashMap<String, Credential>,
    pub(crate) health: HashMap<String, CredentialHealth>,
    pub(crate) metrics: HashMap<String, CredentialMetrics>,
    pub(crate) rotation: HashMap<String, RotationState>,
    /// Stable ordering used for round-robin; authoritative list of live ids.
    pub(crate) order: Vec<String>,
    pub(crate) refresh_in_flight: std::collections::HashSet<String>,
    pub(crate) refresh_strategy: RefreshStrategyConfig,
    pub(crate) rotation_policy: RotationPolicy,
    pub(crate) monitoring: MonitoringConfig,
    pub(crate) alert_history: HashMap<String, chrono::DateTime<Utc>>,
}

/// A pool of OAuth credentials for one upstream provider.
pub struct CredentialPool {
    pub(crate) provider_name: String,
    pub(crate) state: RwLock<PoolState>,
    pub(crate) cursor: AtomicUsize,
    pub(crate) refresh_fn: RefreshFn,
    pub(crate) on_rotation_needed: Option<crate::rotation_hooks::RotationNeededHook>,
    pub(crate) on_decommission: Option<crate::rotation_hooks::DecommissionHook>,
    pub(crate) http: reqwest::Client,
}

impl CredentialPool {
    /// Construct a pool. Returns `None` iff `credentials` is empty: this is
    /// a caller error, not a `PoolError`. A `None` `refresh_fn` is replaced
    /// with one that always fails with "token refresh not configured".
    pub fn new(
        provider_name: impl Into<String>,
        credentials: Vec<Credential>,
        refresh_fn: Option<RefreshFn>,
    ) -> Option<Self> {
        if credentials.is_empty() {
            return None;
        }

        let now = Utc::now();
        let mut order = Vec::with_capacity(credentials.len());
        let mut creds = HashMap::new();
        let mut health = HashMap::new();
        let mut metrics = HashMap::new();
        let mut rotation = HashMap::new();

        for cred in credentials {
            let id = cred.id.clone();
            order.push(id.clone());
            health.insert(id.clone(), CredentialHealth::new());
            metrics.insert(id.clone(), CredentialMetrics::new());
            rotation.insert(id.clone(), RotationState::new(now));
            creds.insert(id, cred);
        }

        Some(Self {
            provider_name: provider_name.into(),
            state: RwLock::new(PoolState {
                credentials: creds,
                health,
                metrics,
                rotation,
                order,
                refresh_in_flight: std::collections::HashSet::new(),
                refresh_strategy: RefreshStrategyConfig::default_preset(),
                rotation_policy: RotationPolicy::default(),
                monitoring: MonitoringConfig::default(),
                alert_history: HashMap::new(),
            }),
            cursor: AtomicUsize::new(0),
            refresh_fn: refresh_fn.unwrap_or_else(crate::refresh::no_op_refresh_fn),
            on_rotation_needed: None,
            on_decommission: None,
            http: reqwest::Client::new(),
        })
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// Register the callback invoked (outside the lock) when
    /// `check_rotation_needed` finds a candidate.
    pub fn set_rotation_needed_hook(&mut self, hook: crate::rotation_hooks::RotationNeededHook) {
        self.on_rotation_needed = Some(hook);
    }

    /// Register the callback invoked (outside the lock) right before a
    /// rotation completes, to let the caller tear down the old credential's
    /// external resources. An error aborts the completion.
    pub fn set_decommission_hook(&mut self, hook: crate::rotation_hooks::DecommissionHook) {
        self.on_decommission = Some(hook);
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    /// Pick the next available credential, deep-copied.
    pub fn pick_next(&self) -> Result<Credential, PoolError> {
        let now = Utc::now();
        let state = self.state.read().expect("pool lock poisoned");
        let id = crate::selector::pick_next(&state.order, &state.health, &self.cursor, now)?;
        state
            .credentials
            .get(&id)
            .cloned()
            .ok_or_else(|| PoolError::NoneAvailable(format!("credential {id} vanished")))
    }

    // ------------------------------------------------------------------
    // Health + metrics recording
    // ------------------------------------------------------------------

    /// Public so callers that own their own transport can report outcomes
    /// directly instead of going through `execute`.
    pub fn report_success(&self, id: &str) {
        let now = Utc::now();
        let mut state = self.state.write().expect("pool lock poisoned");
        if let Some(h) = state.health.get_mut(id) {
            h.record_success(now);
        }
    }

    pub fn report_failure(&self, id: &str, err: &PoolError) {
        let now = Utc::now();
        let mut state = self.state.write().expect("pool lock poisoned");
        if let Some(h) = state.health.get_mut(id) {
            h.record_failure(now);
            tracing::warn!(
                credential = id,
                failures = h.failure_count,
                healthy = h.is_healthy,
                error = %err,
                "credential failure recorded"
            );
        }
    }

    /// Auto-creates metrics if `id` is missing, rather than rejecting the
    /// call: a caller reporting on a credential the pool doesn't track yet
    /// is more likely a timing quirk than an error worth failing over.
    pub fn record_request(&self, id: &str, tokens: u64, latency: Duration, success: bool) {
        let now = Utc::now();
        let mut state = self.state.write().expect("pool lock poisoned");
        state
            .metrics
            .entry(id.to_string())
            .or_insert_with(CredentialMetrics::new)
            .record_request(tokens, latency, success, now);
    }

    // ------------------------------------------------------------------
    // Snapshot getters: deep copies, never alias pool state
    // ------------------------------------------------------------------

    pub fn get_credentials(&self) -> Vec<Credential> {
        let state = self.state.read().expect("pool lock poisoned");
        state.order.iter().filter_map(|id| state.credentials.get(id).cloned()).collect()
    }

    pub fn get_credential_health(&self, id: &str) -> Option<CredentialHealth> {
        let state = self.state.read().expect("pool lock poisoned");
        state.health.get(id).cloned()
    }

    pub fn get_credential_metrics(&self, id: &str) -> Option<CredentialMetrics> {
        let state = self.state.read().expect("pool lock poisoned");
        state.metrics.get(id).cloned()
    }

    pub fn get_rotation_state(&self, id: &str) -> Option<RotationState> {
        let state = self.state.read().expect("pool lock poisoned");
        state.rotation.get(id).cloned()
    }

    // ------------------------------------------------------------------
    // Policy setters: `None` restores the default
    // ------------------------------------------------------------------

    pub fn set_refresh_strategy(&self, strategy: Option<RefreshStrategyConfig>) {
        let mut state = self.state.write().expect("pool lock poisoned");
        state.refresh_strategy = strategy.unwrap_or_else(RefreshStrategyConfig::default_preset);
    }

    pub fn set_rotation_policy(&self, policy: Option<RotationPolicy>) {
        let mut state = self.state.write().expect("pool lock poisoned");
        state.rotation_policy = policy.unwrap_or_default();
    }

    pub fn set_monitoring_config(&self, config: Option<MonitoringConfig>) {
        let mut state = self.state.write().expect("pool lock poisoned");
        state.monitoring = config.unwrap_or_default();
    }

    pub fn refresh_strategy(&self) -> RefreshStrategyConfig {
        self.state.read().expect("pool lock poisoned").refresh_strategy.clone()
    }

    pub fn rotation_policy(&self) -> RotationPolicy {
        self.state.read().expect("pool lock poisoned").rotation_policy.clone()
    }

    pub fn monitoring_config(&self) -> MonitoringConfig {
        self.state.read().expect("pool lock poisoned").monitoring.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("pool lock poisoned").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
