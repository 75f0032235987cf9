//! A pool of OAuth credential sets used to authorize outbound calls to a
//! single upstream provider.
//!
//! The pool picks a credential per call (round-robin, skipping those in
//! backoff), refreshes tokens before they expire, isolates failing
//! credentials with exponential backoff, fails over transparently within
//! one logical request, reports per-credential metrics and health, and
//! supports planned credential rotation with grace-period overlap.
//!
//! The HTTP call to the upstream API, the provider's OAuth token-endpoint
//! call, and durable persistence of refreshed tokens are all supplied by
//! the caller: as the `op` passed to [`CredentialPool::execute`], the
//! `refresh_fn` passed to [`CredentialPool::new`], and a
//! [`credential::TokenRefreshHook`] attached to each [`Credential`],
//! respectively.
//!
//! ```ignore
//! use oauth_credential_pool::{Credential, CredentialPool};
//!
//! let creds = vec![
//!     Credential::new("primary", "client-id", "client-secret", "at", "rt", vec!["read".into()]),
//!     Credential::new("backup", "client-id", "client-secret", "at2", "rt2", vec!["read".into()]),
//! ];
//! let pool = CredentialPool::new("acme-provider", creds, None).unwrap();
//!
//! # async fn run(pool: oauth_credential_pool::CredentialPool) {
//! let (body, usage) = pool
//!     .execute(|cred| Box::pin(async move {
//!         // call the upstream API with cred.access_token ...
//!         Ok((format!("hello from {}", cred.id), Default::default()))
//!     }))
//!     .await
//!     .unwrap();
//! # }
//! ```

pub mod credential;
pub mod error;
pub mod executor;
pub mod health;
pub mod metrics;
pub mod monitoring;
pub mod pool;
pub mod refresh;
mod pool_monitoring;
mod pool_rotation;
pub mod rotation;
pub mod rotation_hooks;
pub mod selector;
pub mod strategy;

pub use credential::Credential;
pub use error::PoolError;
pub use executor::{Message, ToolCall, Usage};
pub use health::CredentialHealth;
pub use metrics::CredentialMetrics;
pub use monitoring::{Alert, AlertType, HealthSummary, MonitoringConfig};
pub use pool::CredentialPool;
pub use refresh::{RefreshFn, RefreshedTokens};
pub use rotation::{RotationPolicy, RotationState};
pub use strategy::RefreshStrategyConfig;
