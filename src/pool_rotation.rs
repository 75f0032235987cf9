//! Rotation manager operations.

use chrono::Utc;

use crate::credential::Credential;
use crate::error::PoolError;
use crate::health::CredentialHealth;
use crate::metrics::CredentialMetrics;
use crate::pool::CredentialPool;
use crate::rotation::RotationState;

impl CredentialPool {
    /// Credentials older than `rotation_policy.rotation_interval`,
    /// measured from `created_at`, that aren't already marked. Fires
    /// `on_rotation_needed` (outside the lock) for each, if registered.
    pub async fn check_rotation_needed(&self) -> Vec<String> {
        let now = Utc::now();
        let due: Vec<String> = {
            let state = self.state.read().expect("pool lock poisoned");
            if !state.rotation_policy.enabled {
                return Vec::new();
            }
            let interval = state.rotation_policy.rotation_interval;
            state
                .order
                .iter()
                .filter(|id| {
                    state
                        .rotation
                        .get(*id)
                        .map(|r| !r.marked_for_rotation && r.age(now) >= interval)
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        if let Some(hook) = &self.on_rotation_needed {
            for id in &due {
                hook(id.clone()).await;
            }
        }

        due
    }

    /// Append `new_cred` to the pool and mark `old_id` for rotation,
    /// overlapping both for `rotation_policy.grace_period`.
    pub fn mark_for_rotation(&self, old_id: &str, new_cred: Credential) -> Result<(), PoolError> {
        let now = Utc::now();
        let mut state = self.state.write().expect("pool lock poisoned");

        if !state.credentials.contains_key(old_id) {
            return Err(PoolError::RotationError(format!("credential {old_id} not found")));
        }
        if state
            .rotation
            .get(old_id)
            .map(|r| r.marked_for_rotation)
            .unwrap_or(false)
        {
            return Err(PoolError::RotationError(format!(
                "credential {old_id} already marked for rotation"
            )));
        }
        if state.credentials.contains_key(&new_cred.id) {
            return Err(PoolError::RotationError(format!(
                "replacement credential {} already present",
                new_cred.id
            )));
        }

        let new_id = new_cred.id.clone();
        state.order.push(new_id.clone());
        state.health.insert(new_id.clone(), CredentialHealth::new());
        state.metrics.insert(new_id.clone(), CredentialMetrics::new());
        state.rotation.insert(new_id.clone(), RotationState::new(now));
        state.credentials.insert(new_id.clone(), new_cred);

        let grace_period = state.rotation_policy.grace_period;
        let decommission_at = now
            + chrono::Duration::from_std(grace_period).unwrap_or(chrono::Duration::zero());

        let old_rotation = state
            .rotation
            .get_mut(old_id)
            .expect("checked present above");
        old_rotation.marked_for_rotation = true;
        old_rotation.rotation_started_at = Some(now);
        old_rotation.replacement_id = Some(new_id.clone());
        old_rotation.decommission_at = Some(decommission_at);

        drop(state);
        self.maybe_dispatch_webhook(
            crate::monitoring::AlertType::Rotation,
            old_id,
            &format!("credential {old_id} marked for rotation, replaced by {new_id}"),
            serde_json::json!({ "replacement_id": new_id }),
        );

        Ok(())
    }

    /// Remove `id` and all its associated state once its grace period has
    /// elapsed. `on_decommission`, if registered, runs first, outside the
    /// lock; an error aborts the completion.
    pub async fn complete_rotation(&self, id: &str) -> Result<(), PoolError> {
        let now = Utc::now();
        {
            let state = self.state.read().expect("pool lock poisoned");
            let rotation = state
                .rotation
                .get(id)
                .ok_or_else(|| PoolError::RotationError(format!("credential {id} not found")))?;
            if !rotation.marked_for_rotation {
                return Err(PoolError::RotationError(format!(
                    "credential {id} is not marked for rotation"
                )));
            }
            let decommission_at = rotation
                .decommission_at
                .ok_or_else(|| PoolError::RotationError(format!("credential {id} has no decommission time")))?;
            if now < decommission_at {
                return Err(PoolError::RotationError(
                    "grace period not elapsed".to_string(),
                ));
            }
        }

        if let Some(hook) = &self.on_decommission {
            hook(id.to_string())
                .await
                .map_err(|e| PoolError::RotationError(format!("decommission hook failed: {e}")))?;
        }

        let mut state = self.state.write().expect("pool lock poisoned");
        state.credentials.remove(id);
        state.health.remove(id);
        state.metrics.remove(id);
        state.rotation.remove(id);
        state.order.retain(|existing| existing != id);
        state.refresh_in_flight.remove(id);

        Ok(())
    }

    /// Scan for marked credentials whose grace period has elapsed and
    /// complete their rotation, if `rotation_policy.auto_decommission` is
    /// set.
    pub async fn auto_decommission_expired(&self) -> Vec<String> {
        let now = Utc::now();
        let candidates: Vec<String> = {
            let state = self.state.read().expect("pool lock poisoned");
            if !state.rotation_policy.auto_decommission {
                return Vec::new();
            }
            state
                .order
                .iter()
                .filter(|id| {
                    state
                        .rotation
                        .get(*id)
                        .map(|r| r.marked_for_rotation && r.decommission_at.map(|d| now >= d).unwrap_or(false))
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        let mut decommissioned = Vec::new();
        for id in candidates {
            if self.complete_rotation(&id).await.is_ok() {
                decommissioned.push(id);
            }
        }
        decommissioned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn cred(id: &str) -> Credential {
        Credential::new(id, "cid", "secret", "at", "rt", vec![])
    }

    #[tokio::test]
    async fn mark_for_rotation_grows_pool_and_marks_old() {
        let pool = CredentialPool::new("acme", vec![cred("old")], None).unwrap();
        pool.mark_for_rotation("old", cred("new")).unwrap();
        assert_eq!(pool.len(), 2);
        let rotation = pool.get_rotation_state("old").unwrap();
        assert!(rotation.marked_for_rotation);
        assert_eq!(rotation.replacement_id.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn mark_for_rotation_rejects_double_marking() {
        let pool = CredentialPool::new("acme", vec![cred("old")], None).unwrap();
        pool.mark_for_rotation("old", cred("new1")).unwrap();
        let err = pool.mark_for_rotation("old", cred("new2")).unwrap_err();
        assert!(matches!(err, PoolError::RotationError(_)));
    }

    #[tokio::test]
    async fn complete_rotation_requires_grace_period_elapsed() {
        let pool = CredentialPool::new("acme", vec![cred("old")], None).unwrap();
        pool.set_rotation_policy(Some(
            crate::rotation::RotationPolicy::new().with_grace_period(Duration::from_secs(3600)),
        ));
        pool.mark_for_rotation("old", cred("new")).unwrap();
        let err = pool.complete_rotation("old").await.unwrap_err();
        assert!(matches!(err, PoolError::RotationError(_)));
    }

    #[tokio::test]
    async fn rotation_cycle_end_to_end() {
        let pool = CredentialPool::new("acme", vec![cred("old")], None).unwrap();
        pool.set_rotation_policy(Some(
            crate::rotation::RotationPolicy::new()
                .with_grace_period(Duration::from_millis(1))
                .with_auto_decommission(true),
        ));
        pool.mark_for_rotation("old", cred("new")).unwrap();
        assert_eq!(pool.len(), 2);

        tokio::time::sleep(Duration::from_millis(5)).await;

        let decommissioned = pool.auto_decommission_expired().await;
        assert_eq!(decommissioned, vec!["old".to_string()]);
        assert_eq!(pool.len(), 1);
        assert!(pool.get_credential_health("old").is_none());
    }

    #[tokio::test]
    async fn check_rotation_needed_reports_aged_credential_and_fires_hook() {
        let mut pool = CredentialPool::new("acme", vec![cred("old")], None).unwrap();
        pool.set_rotation_policy(Some(
            crate::rotation::RotationPolicy::new()
                .with_rotation_interval(Duration::from_millis(1))
                .enabled(true),
        ));

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        pool.set_rotation_needed_hook(Arc::new(move |id| {
            let seen = seen_clone.clone();
            Box::pin(async move {
                seen.lock().unwrap().push(id);
            })
        }));

        tokio::time::sleep(Duration::from_millis(5)).await;

        let due = pool.check_rotation_needed().await;
        assert_eq!(due, vec!["old".to_string()]);
        assert_eq!(*seen.lock().unwrap(), vec!["old".to_string()]);
    }

    #[tokio::test]
    async fn check_rotation_needed_is_noop_when_policy_disabled() {
        let pool = CredentialPool::new("acme", vec![cred("old")], None).unwrap();
        assert!(pool.check_rotation_needed().await.is_empty());
    }

    #[tokio::test]
    async fn complete_rotation_aborts_when_decommission_hook_fails() {
        let mut pool = CredentialPool::new("acme", vec![cred("old")], None).unwrap();
        pool.set_rotation_policy(Some(
            crate::rotation::RotationPolicy::new().with_grace_period(Duration::from_millis(1)),
        ));
        pool.set_decommission_hook(Arc::new(|_id| {
            Box::pin(async move { Err(PoolError::RotationError("decommission refused".into())) })
        }));
        pool.mark_for_rotation("old", cred("new")).unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;

        let err = pool.complete_rotation("old").await.unwrap_err();
        assert!(matches!(err, PoolError::RotationError(_)));
        assert_eq!(pool.len(), 2);
        assert!(pool.get_credential_health("old").is_some());
    }
}
