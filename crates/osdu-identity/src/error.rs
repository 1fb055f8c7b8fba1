//! Error types for credential and token operations

use std::fmt;
use std::time::Duration;

/// Diagnostic fields reported by an identity provider when it refuses to
/// issue a token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderError {
    /// HTTP status of the token endpoint response, if one was received
    pub status: Option<u16>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub correlation_id: Option<String>,
}

impl ProviderError {
    /// Provider error with only a free-form description.
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            error_description: Some(description.into()),
            ..Default::default()
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.error.as_deref().unwrap_or("unknown_error"))?;
        if let Some(description) = &self.error_description {
            write!(f, ": {description}")?;
        }
        if let Some(status) = self.status {
            write!(f, " (status {status})")?;
        }
        if let Some(correlation_id) = &self.correlation_id {
            write!(f, " [correlation id {correlation_id}]")?;
        }
        Ok(())
    }
}

/// Errors from credential operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No strategy can authenticate, or required configuration is missing.
    #[error("credential unavailable: {0}")]
    Unavailable(String),

    /// The identity provider refused or failed to issue a token.
    #[error("token refresh failed: {0}")]
    TokenRefresh(ProviderError),

    /// Transport failure talking to the identity provider.
    #[error("{context}: {source}")]
    Http {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("interactive login timed out after {0:?}")]
    LoginTimeout(Duration),

    #[error("interactive login failed: {0}")]
    Login(String),

    #[error("token cache parse error: {0}")]
    CacheParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Whether retrying the same request could succeed (timeout or connect
    /// failure on the way to the identity provider).
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http { source, .. } => source.is_timeout() || source.is_connect(),
            _ => false,
        }
    }
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
