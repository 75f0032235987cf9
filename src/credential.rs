//! Credential type: an OAuth token bundle identified by a stable opaque id.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

use crate::error::PoolError;

/// Persistence hook invoked after a successful refresh: `(id, access_token,
/// refresh_token, expires_at) -> Result<(), _>`. Errors are reported but
/// non-fatal: the in-memory token is already valid.
pub type TokenRefreshHook = Arc<
    dyn Fn(&str, &str, &str, Option<DateTime<Utc>>) -> BoxFuture<'static, Result<(), PoolError>>
        + Send
        + Sync,
>;

/// One OAuth token bundle.
///
/// `id` is the stable identity that survives refreshes; everything else
/// about the bundle (except client identity and scopes) is replaced
/// wholesale when a refresh succeeds.
#[derive(Clone)]
pub struct Credential {
    pub id: String,
    pub client_id: String,
    pub client_secret: String,
    pub access_token: String,
    pub refresh_token: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub refresh_count: u64,
    pub on_token_refresh: Option<TokenRefreshHook>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("scopes", &self.scopes)
            .field("expires_at", &self.expires_at)
            .field("last_refresh", &self.last_refresh)
            .field("refresh_count", &self.refresh_count)
            .field("on_token_refresh", &self.on_token_refresh.is_some())
            .finish()
    }
}

impl Credential {
    /// Build a new credential. `access_token`/`refresh_token` may be empty
    /// if the pool is expected to refresh before first use.
    pub fn new(
        id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            scopes,
            expires_at: None,
            last_refresh: None,
            refresh_count: 0,
            on_token_refresh: None,
        }
    }

    /// Attach a persistence hook, invoked (outside the pool lock) after
    /// every successful refresh.
    pub fn with_persistence_hook(mut self, hook: TokenRefreshHook) -> Self {
        self.on_token_refresh = Some(hook);
        self
    }

    /// Set an absolute expiry.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Replace the token bundle as part of a successful refresh, bumping
    /// `refresh_count` and `last_refresh`. Client identity, scopes, and the
    /// persistence hook survive unchanged; identity stays stable across
    /// refreshes.
    pub(crate) fn apply_refresh(
        &mut self,
        access_token: String,
        refresh_token: String,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        self.access_token = access_token;
        self.refresh_token = refresh_token;
        self.expires_at = expires_at;
        self.last_refresh = Some(now);
        self.refresh_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_credential_has_no_expiry_and_zero_refreshes() {
        let cred = Credential::new("c1", "client", "secret", "at", "rt", vec!["read".into()]);
        assert_eq!(cred.id, "c1");
        assert!(cred.expires_at.is_none());
        assert_eq!(cred.refresh_count, 0);
    }

    #[test]
    fn apply_refresh_bumps_count_and_preserves_identity() {
        let mut cred = Credential::new("c1", "client", "secret", "old-at", "old-rt", vec![]);
        let now = Utc::now();
        cred.apply_refresh("new-at".into(), "new-rt".into(), Some(now), now);
        assert_eq!(cred.access_token, "new-at");
        assert_eq!(cred.refresh_token, "new-rt");
        assert_eq!(cred.refresh_count, 1);
        assert_eq!(cred.id, "c1");
    }
}
