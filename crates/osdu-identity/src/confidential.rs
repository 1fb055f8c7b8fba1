//! Confidential-client credential
//!
//! Delegates token acquisition to a caller-supplied [`ConfidentialClientApp`]
//! handle which owns its own token cache. A silent cache lookup is tried
//! first; only on a miss does the credential fall back to the
//! client-credentials exchange.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;

use common::Secret;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::constants::{TOKEN_PATH, authority_endpoint};
use crate::credential::{Credential, TokenFuture, record_refresh, token_lifetime};
use crate::error::Result;
use crate::token::{self, TokenResponse};

const KIND: &str = "confidential_client";

/// Boxed future returned by [`ConfidentialClientApp`] methods.
pub type AppFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Handle to a confidential client application.
pub trait ConfidentialClientApp: Send + Sync {
    /// Look up a cached token for `scopes` without any network I/O.
    fn acquire_token_silent<'a>(&'a self, scopes: &'a [String]) -> AppFuture<'a, Option<TokenResponse>>;

    /// Obtain a new token with the client-credentials grant.
    fn acquire_token_for_client<'a>(&'a self, scopes: &'a [String]) -> AppFuture<'a, TokenResponse>;
}

/// Credential that defers to a [`ConfidentialClientApp`].
pub struct ConfidentialClientCredential {
    client_id: String,
    client_secret: Secret<String>,
    authority: String,
    scopes: Vec<String>,
    app: Box<dyn ConfidentialClientApp>,
    // Serializes silent lookup + fallback so concurrent misses fetch once
    acquire: Mutex<()>,
}

impl ConfidentialClientCredential {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<Secret<String>>,
        authority: impl Into<String>,
        scopes: &str,
        app: Box<dyn ConfidentialClientApp>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authority: authority.into(),
            scopes: scopes.split_whitespace().map(str::to_owned).collect(),
            app,
            acquire: Mutex::new(()),
        }
    }

    /// Credential backed by the bundled [`ClientSecretApp`].
    pub fn with_client_secret(
        client_id: impl Into<String>,
        client_secret: impl Into<Secret<String>>,
        authority: impl Into<String>,
        scopes: &str,
    ) -> Self {
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        let authority = authority.into();
        let app = ClientSecretApp::new(client_id.clone(), client_secret.clone(), &authority);
        Self::new(client_id, client_secret, authority, scopes, Box::new(app))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &Secret<String> {
        &self.client_secret
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    async fn token(&self) -> Result<String> {
        let _guard = self.acquire.lock().await;

        if let Some(cached) = self.app.acquire_token_silent(&self.scopes).await? {
            if let Some(access_token) = cached.access_token {
                debug!(client_id = %self.client_id, "silent token acquisition hit");
                return Ok(access_token);
            }
        }

        debug!(client_id = %self.client_id, "no cached token, acquiring for client");
        let result = self
            .app
            .acquire_token_for_client(&self.scopes)
            .await
            .and_then(TokenResponse::into_granted);
        match result {
            Ok(granted) => {
                record_refresh(KIND, "success");
                info!(client_id = %self.client_id, expires_in = granted.expires_in, "client token acquired");
                Ok(granted.access_token)
            }
            Err(e) => {
                record_refresh(KIND, "failure");
                Err(e)
            }
        }
    }
}

impl Credential for ConfidentialClientCredential {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn get_token(&self) -> TokenFuture<'_> {
        Box::pin(self.token())
    }
}

struct CacheEntry {
    response: TokenResponse,
    expires_at: SystemTime,
}

/// Client-credentials application using a client secret against an
/// authority's v2 token endpoint, with an in-memory per-scope cache.
pub struct ClientSecretApp {
    client_id: String,
    client_secret: Secret<String>,
    token_endpoint: String,
    http_client: reqwest::Client,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl ClientSecretApp {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<Secret<String>>,
        authority: &str,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_endpoint: authority_endpoint(authority, TOKEN_PATH),
            http_client: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = client;
        self
    }

    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }
}

impl ConfidentialClientApp for ClientSecretApp {
    fn acquire_token_silent<'a>(&'a self, scopes: &'a [String]) -> AppFuture<'a, Option<TokenResponse>> {
        Box::pin(async move {
            let cache = self.cache.lock().await;
            let now = SystemTime::now();
            Ok(cache
                .get(&scopes.join(" "))
                .filter(|entry| now < entry.expires_at)
                .map(|entry| entry.response.clone()))
        })
    }

    fn acquire_token_for_client<'a>(&'a self, scopes: &'a [String]) -> AppFuture<'a, TokenResponse> {
        Box::pin(async move {
            let scope = scopes.join(" ");
            let response = token::client_credentials(
                &self.http_client,
                &self.token_endpoint,
                &self.client_id,
                self.client_secret.expose(),
                &scope,
            )
            .await?;

            let lifetime = token_lifetime(response.expires_in.unwrap_or(0));
            if let (Some(_), Some(expires_at)) =
                (&response.access_token, SystemTime::now().checked_add(lifetime))
            {
                self.cache.lock().await.insert(
                    scope,
                    CacheEntry {
                        response: response.clone(),
                        expires_at,
                    },
                );
            }
            Ok(response)
        })
    }
}
