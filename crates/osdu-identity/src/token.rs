//! Token endpoint protocol
//!
//! Every grant is a url-form-encoded POST to a token endpoint answering with
//! JSON. Success bodies carry `access_token` and `expires_in`; error bodies
//! carry `error`, `error_description` and `correlation_id`. The same
//! [`TokenResponse`] shape models both, mirroring the provider's dictionary.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, error};

use crate::constants::MAX_TOKEN_LIFETIME_SECS;
use crate::error::{Error, ProviderError, Result};

/// Raw token endpoint response (success or error).
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct TokenResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(
        default,
        deserialize_with = "lenient_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("scope", &self.scope)
            .field("error", &self.error)
            .field("error_description", &self.error_description)
            .field("correlation_id", &self.correlation_id)
            .finish_non_exhaustive()
    }
}

impl TokenResponse {
    /// Successful response carrying only an access token and lifetime.
    pub fn bearer(access_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            access_token: Some(access_token.into()),
            expires_in: Some(expires_in),
            token_type: Some("Bearer".into()),
            ..Default::default()
        }
    }

    /// Diagnostic fields of this response.
    pub fn provider_error(&self, status: Option<u16>) -> ProviderError {
        ProviderError {
            status,
            error: self.error.clone(),
            error_description: self.error_description.clone(),
            correlation_id: self.correlation_id.clone(),
        }
    }

    /// Convert into a granted token, failing when no access token was issued.
    pub fn into_granted(self) -> Result<GrantedToken> {
        match self.access_token {
            Some(access_token) => Ok(GrantedToken {
                access_token,
                // A missing lifetime means the token is not reused
                expires_in: self.expires_in.unwrap_or(0).min(MAX_TOKEN_LIFETIME_SECS),
                refresh_token: self.refresh_token,
                id_token: self.id_token,
            }),
            None => {
                let mut err = ProviderError {
                    status: None,
                    error: self.error,
                    error_description: self.error_description,
                    correlation_id: self.correlation_id,
                };
                if err.error.is_none() && err.error_description.is_none() {
                    err.error_description = Some("response contained no access_token".into());
                }
                Err(Error::TokenRefresh(err))
            }
        }
    }
}

/// A token the provider actually issued.
#[derive(Clone)]
pub struct GrantedToken {
    pub access_token: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
}

impl fmt::Debug for GrantedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrantedToken")
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Some v1 endpoints send `expires_in` as a string.
fn lenient_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    match Option::<Seconds>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Seconds::Number(n)) => Ok(Some(n)),
        Some(Seconds::Text(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// POST a form to a token endpoint and parse the JSON answer.
///
/// Non-2xx answers become [`Error::TokenRefresh`] carrying the provider's
/// diagnostic fields and the HTTP status. A 2xx answer is returned as-is,
/// even if it lacks an access token; callers decide via
/// [`TokenResponse::into_granted`].
pub async fn request_token(
    client: &reqwest::Client,
    endpoint: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse> {
    let grant_type = form
        .iter()
        .find(|(k, _)| *k == "grant_type")
        .map(|(_, v)| *v)
        .unwrap_or("unknown");
    debug!(endpoint, grant_type, "requesting token");

    let response = client
        .post(endpoint)
        .form(form)
        .send()
        .await
        .map_err(|source| Error::Http {
            context: format!("token request to {endpoint}"),
            source,
        })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| Error::Http {
            context: "reading token response".into(),
            source,
        })?;

    if !status.is_success() {
        let parsed: TokenResponse = serde_json::from_str(&body).unwrap_or_default();
        let mut err = parsed.provider_error(Some(status.as_u16()));
        if err.error.is_none() && err.error_description.is_none() {
            err.error_description = Some(if body.is_empty() {
                "<no body>".to_string()
            } else {
                body.chars().take(512).collect()
            });
        }
        error!(
            endpoint,
            grant_type,
            status = status.as_u16(),
            error = err.error.as_deref().unwrap_or(""),
            correlation_id = err.correlation_id.as_deref().unwrap_or(""),
            "token request rejected"
        );
        return Err(Error::TokenRefresh(err));
    }

    serde_json::from_str(&body).map_err(|e| {
        Error::TokenRefresh(ProviderError {
            status: Some(status.as_u16()),
            ..ProviderError::described(format!("invalid token response: {e}"))
        })
    })
}

/// Exchange a refresh token for a new access token.
///
/// `client_secret` is omitted for public clients; `scope` is omitted when
/// the endpoint derives it from the refresh token.
pub async fn refresh_token(
    client: &reqwest::Client,
    endpoint: &str,
    client_id: &str,
    client_secret: Option<&str>,
    refresh: &str,
    scope: Option<&str>,
) -> Result<TokenResponse> {
    let mut form = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh),
        ("client_id", client_id),
    ];
    if let Some(secret) = client_secret {
        form.push(("client_secret", secret));
    }
    if let Some(scope) = scope {
        form.push(("scope", scope));
    }
    request_token(client, endpoint, &form).await
}

/// Exchange an authorization code (with its PKCE verifier) for tokens.
pub async fn exchange_code(
    client: &reqwest::Client,
    endpoint: &str,
    client_id: &str,
    code: &str,
    verifier: &str,
    redirect_uri: &str,
    scope: &str,
) -> Result<TokenResponse> {
    request_token(
        client,
        endpoint,
        &[
            ("grant_type", "authorization_code"),
            ("client_id", client_id),
            ("code", code),
            ("code_verifier", verifier),
            ("redirect_uri", redirect_uri),
            ("scope", scope),
        ],
    )
    .await
}

/// Client-credentials grant for a confidential client.
pub async fn client_credentials(
    client: &reqwest::Client,
    endpoint: &str,
    client_id: &str,
    client_secret: &str,
    scope: &str,
) -> Result<TokenResponse> {
    request_token(
        client,
        endpoint,
        &[
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("scope", scope),
        ],
    )
    .await
}
