//! Error taxonomy for the credential pool
//!
//! Mirrors the failure classes a caller of [`crate::pool::CredentialPool`]
//! can observe. Construction-time "no credentials" is represented by the
//! constructor returning `None` rather than an error variant, and a
//! persistence-hook failure never reaches this type at all: it is logged
//! and swallowed at the call site (see `refresh.rs`).

use thiserror::Error;

/// Errors surfaced by pool operations.
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    /// Every credential in the pool is currently in backoff.
    #[error("no credential available: {0}")]
    NoneAvailable(String),

    /// A concurrent refresh of the same credential is already running.
    #[error("refresh already in progress for credential {0}")]
    RefreshInProgress(String),

    /// The injected refresh callback returned an error.
    #[error("refresh failed for credential {credential_id}: {cause}")]
    RefreshFailed { credential_id: String, cause: String },

    /// The caller-supplied operation returned an error.
    #[error("operation failed: {0}")]
    OperationFailed(String),

    /// Failover exhausted its attempts bound without a success.
    #[error("all failover attempts failed: {0}")]
    AllAttemptsFailed(Box<PoolError>),

    /// Invalid argument or state for a rotation operation.
    #[error("rotation error: {0}")]
    RotationError(String),
}

impl PoolError {
    /// True for the classes failover is willing to retry against a
    /// different credential: refresh already in progress, a failed
    /// refresh, or a failed operation. `NoneAvailable` means there is no
    /// other credential left to try, so it is never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::RefreshInProgress(_)
                | PoolError::RefreshFailed { .. }
                | PoolError::OperationFailed(_)
        )
    }
}
