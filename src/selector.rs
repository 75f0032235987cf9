//! Round-robin selection over the live credential set, skipping those in
//! backoff.
//!
//! Operates on the already-locked pool state; the caller
//! ([`crate::pool::CredentialPool::pick_next`]) holds the read lock for the
//! duration of the call and owns the atomic cursor.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::PoolError;
use crate::health::CredentialHealth;

/// Pick the id of the next available credential.
///
/// `order` is the pool's stable credential ordering; `health` maps id to
/// its current health record; `cursor` is the pool-wide round-robin
/// counter, advanced with a single atomic fetch-add regardless of which
/// branch below is taken.
pub fn pick_next(
    order: &[String],
    health: &HashMap<String, CredentialHealth>,
    cursor: &AtomicUsize,
    now: DateTime<Utc>,
) -> Result<String, PoolError> {
    if order.is_empty() {
        return Err(PoolError::NoneAvailable("pool is empty".into()));
    }

    if order.len() == 1 {
        let id = &order[0];
        cursor.fetch_add(1, Ordering::SeqCst);
        return if is_available(id, health, now) {
            Ok(id.clone())
        } else {
            Err(PoolError::NoneAvailable(format!(
                "sole credential {id} unavailable"
            )))
        };
    }

    let start = cursor.fetch_add(1, Ordering::SeqCst) % order.len();
    for offset in 0..order.len() {
        let idx = (start + offset) % order.len();
        let id = &order[idx];
        if is_available(id, health, now) {
            return Ok(id.clone());
        }
    }

    Err(PoolError::NoneAvailable("all credentials unavailable".into()))
}

fn is_available(id: &str, health: &HashMap<String, CredentialHealth>, now: DateTime<Utc>) -> bool {
    health.get(id).map(|h| h.is_available(now)).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("c{i}")).collect()
    }

    #[test]
    fn round_robin_fairness() {
        let order = ids(3);
        let health = HashMap::new();
        let cursor = AtomicUsize::new(0);
        let now = Utc::now();

        let mut counts = HashMap::new();
        for _ in 0..9 {
            let picked = pick_next(&order, &health, &cursor, now).unwrap();
            *counts.entry(picked).or_insert(0) += 1;
        }
        for id in &order {
            assert_eq!(counts[id], 3);
        }
    }

    #[test]
    fn sole_credential_respects_backoff() {
        let order = vec!["only".to_string()];
        let mut health = HashMap::new();
        let now = Utc::now();
        health.insert(
            "only".to_string(),
            crate::health::CredentialHealth {
                backoff_until: Some(now + chrono::Duration::seconds(10)),
                ..Default::default()
            },
        );
        let cursor = AtomicUsize::new(0);
        assert!(pick_next(&order, &health, &cursor, now).is_err());
    }

    #[test]
    fn all_unavailable_errors() {
        let order = ids(2);
        let now = Utc::now();
        let mut health = HashMap::new();
        for id in &order {
            health.insert(
                id.clone(),
                crate::health::CredentialHealth {
                    backoff_until: Some(now + chrono::Duration::seconds(10)),
                    ..Default::default()
                },
            );
        }
        let cursor = AtomicUsize::new(0);
        match pick_next(&order, &health, &cursor, now) {
            Err(PoolError::NoneAvailable(_)) => {}
            other => panic!("expected NoneAvailable, got {other:?}"),
        }
    }

    #[test]
    fn skips_backed_off_credential() {
        let order = ids(3);
        let now = Utc::now();
        let mut health = HashMap::new();
        health.insert(
            "c0".to_string(),
            crate::health::CredentialHealth {
                backoff_until: Some(now + chrono::Duration::seconds(10)),
                ..Default::default()
            },
        );
        let cursor = AtomicUsize::new(0);
        let picked = pick_next(&order, &health, &cursor, now).unwrap();
        assert_ne!(picked, "c0");
    }
}
