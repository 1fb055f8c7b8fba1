//! The `Credential` contract shared by every authentication strategy

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::constants::MAX_TOKEN_LIFETIME_SECS;
use crate::error::Result;

/// Boxed future returned by [`Credential::get_token`].
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// A strategy that can produce a valid bearer token on demand.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility, so an
/// `HttpClient` can own any strategy as `Box<dyn Credential>`.
///
/// Implementations never return an expired token: they refresh transparently
/// and serialize their check-and-refresh sequence, so a single instance may
/// be shared between tasks.
pub trait Credential: Send + Sync {
    /// Strategy name for logging and metrics (e.g. "static_refresh").
    fn kind(&self) -> &'static str;

    /// Return a valid access token, refreshing it if needed.
    fn get_token(&self) -> TokenFuture<'_>;
}

impl<C: Credential + ?Sized> Credential for Box<C> {
    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    fn get_token(&self) -> TokenFuture<'_> {
        (**self).get_token()
    }
}

impl<C: Credential + ?Sized> Credential for Arc<C> {
    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    fn get_token(&self) -> TokenFuture<'_> {
        (**self).get_token()
    }
}

/// Per-instance access token cache.
///
/// `expires_at` is absolute; `None` means no token has been fetched yet.
#[derive(Default)]
pub(crate) struct CachedToken {
    access_token: Option<String>,
    expires_at: Option<SystemTime>,
}

impl CachedToken {
    /// The cached token if it is still valid at `now`.
    ///
    /// A token expiring exactly at `now` is already expired.
    pub(crate) fn valid_at(&self, now: SystemTime) -> Option<&str> {
        match (&self.access_token, self.expires_at) {
            (Some(token), Some(expires_at)) if now < expires_at => Some(token),
            _ => None,
        }
    }

    pub(crate) fn store(&mut self, access_token: String, expires_in: u64, now: SystemTime) {
        self.access_token = Some(access_token);
        // `None` when the clock cannot represent the expiry: never reused
        self.expires_at = now.checked_add(token_lifetime(expires_in));
    }

    /// Move the expiry into the past, as if `elapsed` had passed.
    #[cfg(test)]
    pub(crate) fn age(&mut self, elapsed: Duration) {
        self.expires_at = self.expires_at.map(|t| t - elapsed);
    }
}

/// Provider-supplied `expires_in`, clamped to [`MAX_TOKEN_LIFETIME_SECS`].
pub(crate) fn token_lifetime(expires_in: u64) -> Duration {
    Duration::from_secs(expires_in.min(MAX_TOKEN_LIFETIME_SECS))
}

/// Count a refresh attempt by strategy and outcome.
pub(crate) fn record_refresh(strategy: &'static str, outcome: &'static str) {
    metrics::counter!("osdu_token_refresh_total", "strategy" => strategy, "outcome" => outcome)
        .increment(1);
}
