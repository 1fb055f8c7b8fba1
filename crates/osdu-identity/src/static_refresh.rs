//! Refresh-token credential
//!
//! Exchanges a long-lived refresh token for short-lived access tokens with
//! direct calls to a token endpoint. The access token is cached until its
//! `expires_in` lifetime runs out.

use std::time::SystemTime;

use common::Secret;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::credential::{CachedToken, Credential, TokenFuture, record_refresh};
use crate::error::Result;
use crate::token;

const KIND: &str = "static_refresh";

/// Credential backed by a refresh token and confidential client secret.
pub struct StaticRefreshCredential {
    client_id: String,
    token_endpoint: String,
    refresh_token: Secret<String>,
    client_secret: Secret<String>,
    http_client: reqwest::Client,
    state: Mutex<CachedToken>,
}

impl StaticRefreshCredential {
    pub fn new(
        client_id: impl Into<String>,
        token_endpoint: impl Into<String>,
        refresh_token: impl Into<Secret<String>>,
        client_secret: impl Into<Secret<String>>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            token_endpoint: token_endpoint.into(),
            refresh_token: refresh_token.into(),
            client_secret: client_secret.into(),
            http_client: reqwest::Client::new(),
            state: Mutex::new(CachedToken::default()),
        }
    }

    /// Use a preconfigured HTTP client (proxies, TLS roots, timeouts).
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = client;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    pub fn refresh_token(&self) -> &Secret<String> {
        &self.refresh_token
    }

    pub fn client_secret(&self) -> &Secret<String> {
        &self.client_secret
    }

    async fn token(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        if let Some(token) = state.valid_at(SystemTime::now()) {
            debug!(client_id = %self.client_id, "using cached access token");
            return Ok(token.to_owned());
        }

        debug!(client_id = %self.client_id, "access token missing or expired, refreshing");
        let granted = match token::refresh_token(
            &self.http_client,
            &self.token_endpoint,
            &self.client_id,
            Some(self.client_secret.expose()),
            self.refresh_token.expose(),
            None,
        )
        .await
        .and_then(token::TokenResponse::into_granted)
        {
            Ok(granted) => granted,
            Err(e) => {
                record_refresh(KIND, "failure");
                return Err(e);
            }
        };

        record_refresh(KIND, "success");
        info!(
            client_id = %self.client_id,
            expires_in = granted.expires_in,
            "access token refreshed"
        );
        state.store(granted.access_token.clone(), granted.expires_in, SystemTime::now());
        Ok(granted.access_token)
    }
}

impl Credential for StaticRefreshCredential {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn get_token(&self) -> TokenFuture<'_> {
        Box::pin(self.token())
    }
}
