//! Failover executor: runs a user operation against a sequence of
//! credentials, handling pre-call refresh, post-call health reporting,
//! and bounded retry.

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use std::time::Instant;

use crate::credential::Credential;
use crate::error::PoolError;
use crate::pool::CredentialPool;

/// Token usage reported by a completed operation.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A tool invocation embedded in a richer [`Message`] result.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Richer operation result preserving tool-call structure, for
/// `execute_message`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Message {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// A unary operation run against one credential: the HTTP call to the
/// upstream API, supplied by the caller. Returns `Err(message)` on
/// failure rather than `PoolError`, since the executor is the one place
/// that knows how to attribute an operation failure to the credential
/// that produced it.
pub type BoxOperation<T> =
    dyn Fn(Credential) -> BoxFuture<'static, Result<(T, Usage), String>> + Send + Sync;

const MAX_ATTEMPTS: usize = 3;

impl CredentialPool {
    /// `op` returns a plain string result.
    pub async fn execute<F>(&self, op: F) -> Result<(String, Usage), PoolError>
    where
        F: Fn(Credential) -> BoxFuture<'static, Result<(String, Usage), String>> + Send + Sync,
    {
        self.execute_inner(&op).await
    }

    /// `op` returns a richer [`Message`], preserving tool-call structure.
    /// Identical retry/refresh/metrics behavior to [`Self::execute`];
    /// only the result type differs.
    pub async fn execute_message<F>(&self, op: F) -> Result<(Message, Usage), PoolError>
    where
        F: Fn(Credential) -> BoxFuture<'static, Result<(Message, Usage), String>> + Send + Sync,
    {
        self.execute_inner(&op).await
    }

    async fn execute_inner<T, F>(&self, op: &F) -> Result<(T, Usage), PoolError>
    where
        F: Fn(Credential) -> BoxFuture<'static, Result<(T, Usage), String>> + Send + Sync + ?Sized,
    {
        let attempts_limit = self.len().min(MAX_ATTEMPTS);
        let mut last_err: Option<PoolError> = None;

        for _ in 0..attempts_limit {
            let mut credential = match self.pick_next() {
                Ok(c) => c,
                Err(e) => {
                    return match last_err {
                        Some(prev) => Err(PoolError::AllAttemptsFailed(Box::new(prev))),
                        None => Err(e),
                    };
                }
            };

            let strategy = self.refresh_strategy();
            let metrics = self
                .get_credential_metrics(&credential.id)
                .unwrap_or_default();
            if strategy.should_refresh(&credential, &metrics, Utc::now()) {
                match self.refresh(&credential.id).await {
                    Ok(refreshed) => credential = refreshed,
                    Err(e) => {
                        // Refresh failure consumes an attempt and counts
                        // as an API failure on the originating credential.
                        self.report_failure(&credential.id, &e);
                        let retryable = e.is_retryable();
                        last_err = Some(e);
                        if retryable {
                            continue;
                        }
                        return Err(PoolError::AllAttemptsFailed(Box::new(
                            last_err.expect("just set"),
                        )));
                    }
                }
            }

            let id = credential.id.clone();
            let started = Instant::now();
            let outcome = op(credential).await;
            let latency = started.elapsed();

            match outcome {
                Ok((result, usage)) => {
                    self.record_request(&id, usage.total(), latency, true);
                    self.report_success(&id);
                    return Ok((result, usage));
                }
                Err(message) => {
                    self.record_request(&id, 0, latency, false);
                    let err = PoolError::OperationFailed(message);
                    self.report_failure(&id, &err);
                    last_err = Some(err);
                }
            }
        }

        Err(PoolError::AllAttemptsFailed(Box::new(
            last_err.unwrap_or_else(|| PoolError::NoneAvailable("no attempts made".into())),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn cred(id: &str) -> Credential {
        Credential::new(id, "cid", "secret", "at", "rt", vec![])
    }

    #[tokio::test]
    async fn round_robin_over_nine_executes() {
        let pool = CredentialPool::new(
            "acme",
            vec![cred("a"), cred("b"), cred("c")],
            None,
        )
        .unwrap();

        let mut seen: Vec<String> = Vec::new();
        for _ in 0..9 {
            let (result, _) = pool
                .execute(|c| Box::pin(async move { Ok((c.id.clone(), Usage::default())) }))
                .await
                .unwrap();
            seen.push(result);
        }

        for id in ["a", "b", "c"] {
            assert_eq!(seen.iter().filter(|s| s.as_str() == id).count(), 3);
        }
    }

    #[tokio::test]
    async fn first_attempt_failure_second_attempt_success() {
        let pool = CredentialPool::new("acme", vec![cred("a"), cred("b")], None).unwrap();
        let (result, _) = pool
            .execute(|c| {
                Box::pin(async move {
                    if c.id == "a" {
                        Err("boom".to_string())
                    } else {
                        Ok((c.id.clone(), Usage::default()))
                    }
                })
            })
            .await
            .unwrap();

        assert_eq!(result, "b");
        assert_eq!(pool.get_credential_health("a").unwrap().failure_count, 1);
        assert_eq!(pool.get_credential_metrics("b").unwrap().success_count, 1);
    }

    #[tokio::test]
    async fn all_attempts_fail_bounds_to_three() {
        let pool = CredentialPool::new(
            "acme",
            vec![cred("a"), cred("b"), cred("c")],
            None,
        )
        .unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let err = pool
            .execute(move |_c| {
                let calls = calls_clone.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(String, Usage), _>("always fails".to_string())
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PoolError::AllAttemptsFailed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        for id in ["a", "b", "c"] {
            assert_eq!(pool.get_credential_health(id).unwrap().failure_count, 1);
        }
    }

    #[tokio::test]
    async fn execute_never_exceeds_three_attempts_in_larger_pool() {
        let pool = CredentialPool::new(
            "acme",
            vec![cred("a"), cred("b"), cred("c"), cred("d"), cred("e")],
            None,
        )
        .unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let _ = pool
            .execute(move |_c| {
                let calls = calls_clone.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(String, Usage), _>("always fails".to_string())
                })
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn expiry_triggers_refresh_before_op_observes_new_token() {
        let refresh_fn: crate::refresh::RefreshFn = Arc::new(|_c| {
            Box::pin(async move {
                Ok(crate::refresh::RefreshedTokens {
                    access_token: "refreshed-at".into(),
                    refresh_token: "refreshed-rt".into(),
                    expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
                })
            })
        });
        let soon_expiring = Credential::new("a", "cid", "secret", "old-at", "old-rt", vec![])
            .with_expiry(Utc::now() + chrono::Duration::minutes(3));
        let pool = CredentialPool::new("acme", vec![soon_expiring], Some(refresh_fn)).unwrap();

        let (seen_token, _) = pool
            .execute(|c| Box::pin(async move { Ok((c.access_token.clone(), Usage::default())) }))
            .await
            .unwrap();

        assert_eq!(seen_token, "refreshed-at");
        assert_eq!(pool.get_credentials()[0].refresh_count, 1);
    }

    #[tokio::test]
    async fn execute_message_preserves_tool_call_structure() {
        let pool = CredentialPool::new("acme", vec![cred("a")], None).unwrap();
        let (message, _) = pool
            .execute_message(|_c| {
                Box::pin(async move {
                    Ok((
                        Message {
                            content: "done".into(),
                            tool_calls: vec![ToolCall {
                                id: "call_1".into(),
                                name: "lookup".into(),
                                arguments: serde_json::json!({"q": "rust"}),
                            }],
                        },
                        Usage { prompt_tokens: 10, completion_tokens: 5 },
                    ))
                })
            })
            .await
            .unwrap();

        assert_eq!(message.content, "done");
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].name, "lookup");
    }
}
