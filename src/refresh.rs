//! Refresh coordinator: single-flight token refresh.

use chrono::Utc;
use futures::future::BoxFuture;
use std::sync::Arc;

use crate::credential::Credential;
use crate::error::PoolError;
use crate::pool::CredentialPool;

/// Tokens returned by a successful refresh callback invocation.
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<chrono::DateTime<Utc>>,
}

/// The injected provider-specific OAuth token-endpoint call. Takes the
/// current credential by value, since it performs I/O and must not borrow
/// across an await outside the lock, and returns new tokens or an error
/// message.
pub type RefreshFn = Arc<
    dyn Fn(Credential) -> BoxFuture<'static, Result<RefreshedTokens, String>> + Send + Sync,
>;

pub(crate) fn no_op_refresh_fn() -> RefreshFn {
    Arc::new(|_cred: Credential| {
        Box::pin(async move { Err("token refresh not configured".to_string()) })
    })
}

/// Clears `refresh_in_flight` for one credential on drop, whatever the
/// reason: normal return, error return, or the enclosing future being
/// dropped mid-await on cancellation. A plain post-await cleanup block
/// would not run in the cancellation case, since a dropped future never
/// resumes past its last `.await`.
struct InFlightGuard<'a> {
    pool: &'a CredentialPool,
    id: &'a str,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.pool.state.write().expect("pool lock poisoned");
        state.refresh_in_flight.remove(self.id);
        if let Some(h) = state.health.get_mut(self.id) {
            h.refresh_in_flight = false;
        }
    }
}

impl CredentialPool {
    /// Refresh one credential, enforcing single-flight per id.
    ///
    /// The losing caller of a concurrent refresh does not wait for the
    /// winner: it gets `RefreshInProgress` immediately and is expected to
    /// fall through to failover, which typically selects a different
    /// credential.
    pub async fn refresh(&self, id: &str) -> Result<Credential, PoolError> {
        let current = {
            let mut state = self.state.write().expect("pool lock poisoned");
            if state.refresh_in_flight.contains(id) {
                return Err(PoolError::RefreshInProgress(id.to_string()));
            }
            let current = state
                .credentials
                .get(id)
                .cloned()
                .ok_or_else(|| PoolError::RefreshFailed {
                    credential_id: id.to_string(),
                    cause: "credential not found".to_string(),
                })?;
            state.refresh_in_flight.insert(id.to_string());
            if let Some(h) = state.health.get_mut(id) {
                h.refresh_in_flight = true;
            }
            current
        };

        // The guard's Drop clears the in-flight flag on every exit path,
        // including the future being dropped mid-await on cancellation.
        let _guard = InFlightGuard { pool: self, id };

        // The callback runs outside the lock since it performs network I/O.
        let outcome = (self.refresh_fn)(current.clone()).await;

        match outcome {
            Ok(tokens) => self.apply_refresh_success(id, tokens).await,
            Err(cause) => {
                self.apply_refresh_failure(id, &cause);
                Err(PoolError::RefreshFailed {
                    credential_id: id.to_string(),
                    cause,
                })
            }
        }
    }

    async fn apply_refresh_success(
        &self,
        id: &str,
        tokens: RefreshedTokens,
    ) -> Result<Credential, PoolError> {
        let now = Utc::now();
        let (updated, hook) = {
            let mut state = self.state.write().expect("pool lock poisoned");
            let cred = state
                .credentials
                .get_mut(id)
                .ok_or_else(|| PoolError::RefreshFailed {
                    credential_id: id.to_string(),
                    cause: "credential removed during refresh".to_string(),
                })?;
            cred.apply_refresh(
                tokens.access_token.clone(),
                tokens.refresh_token.clone(),
                tokens.expires_at,
                now,
            );
            let updated = cred.clone();
            let hook = cred.on_token_refresh.clone();

            if let Some(h) = state.health.get_mut(id) {
                h.record_refresh_success(now);
            }
            if let Some(m) = state.metrics.get_mut(id) {
                m.record_refresh(now);
            }
            (updated, hook)
        };

        tracing::info!(credential = id, "token refresh succeeded");

        // Persistence hook runs outside the lock; its errors are logged,
        // not propagated, since the in-memory token is already valid.
        if let Some(hook) = hook {
            if let Err(err) = hook(id, &updated.access_token, &updated.refresh_token, updated.expires_at).await
            {
                tracing::warn!(credential = id, error = %err, "persistence hook failed after refresh");
            }
        }

        self.maybe_dispatch_webhook(crate::monitoring::AlertType::Refresh, id, "token refresh succeeded", serde_json::json!({}));

        Ok(updated)
    }

    fn apply_refresh_failure(&self, id: &str, cause: &str) {
        let now = Utc::now();
        let mut state = self.state.write().expect("pool lock poisoned");
        if let Some(h) = state.health.get_mut(id) {
            h.record_refresh_failure(cause, now);
        }
        tracing::warn!(credential = id, error = cause, "token refresh failed");
        drop(state);
        self.maybe_dispatch_webhook(crate::monitoring::AlertType::Failure, id, cause, serde_json::json!({"phase": "refresh"}));
    }
}
