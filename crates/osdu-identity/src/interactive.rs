//! Interactive delegated credential
//!
//! Signs a user in through the authority's authorization-code flow with PKCE
//! and keeps the resulting refresh token in an optional on-disk cache, so
//! later runs refresh silently instead of prompting again.
//!
//! Refresh sequence:
//! 1. Load the token cache from disk (empty if the file does not exist)
//! 2. Bind a [`PublicClient`] to that cache
//! 3. Try silent acquisition for the first cached account
//! 4. Otherwise run the [`AuthorizationPrompt`] and exchange the code
//! 5. Write the cache back if its state changed

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::Router;
use axum::extract::Query;
use axum::response::Html;
use axum::routing::get;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

use crate::cache::{CachedAccount, TokenCache, unix_now};
use crate::constants::{AUTHORIZE_PATH, RESERVED_SCOPES, TOKEN_PATH, authority_endpoint};
use crate::credential::{CachedToken, Credential, TokenFuture, record_refresh};
use crate::error::{Error, ProviderError, Result};
use crate::pkce::{self, AuthorizationParams};
use crate::token::{self, GrantedToken, TokenResponse};

const KIND: &str = "interactive";

/// Upper bound on how long a sign-in may take before giving up.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(120);

/// An authorization-code request waiting for the user.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    authorize_endpoint: String,
    client_id: String,
    scope: String,
    challenge: String,
    state: String,
}

impl AuthorizationRequest {
    /// Sign-in URL for the given redirect URI.
    pub fn url(&self, redirect_uri: &str) -> Result<String> {
        pkce::build_authorization_url(&AuthorizationParams {
            authorize_endpoint: &self.authorize_endpoint,
            client_id: &self.client_id,
            redirect_uri,
            scope: &self.scope,
            challenge: &self.challenge,
            state: &self.state,
        })
    }

    /// CSRF state the authority must echo back.
    pub fn state(&self) -> &str {
        &self.state
    }
}

/// What the authority sent back to the redirect URI.
#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub code: String,
    pub state: Option<String>,
    /// Redirect URI used for the request; the code exchange must repeat it
    pub redirect_uri: String,
}

/// Boxed future returned by [`AuthorizationPrompt::authorize`].
pub type PromptFuture<'a> = Pin<Box<dyn Future<Output = Result<AuthorizationCode>> + Send + 'a>>;

/// Presents the sign-in page to the user and collects the authorization code.
pub trait AuthorizationPrompt: Send + Sync {
    fn authorize<'a>(&'a self, request: &'a AuthorizationRequest) -> PromptFuture<'a>;
}

type BrowserHook = Box<dyn Fn(&str) + Send + Sync>;

/// Prompt that opens the system browser and receives the redirect on a
/// local loopback listener.
pub struct LoopbackPrompt {
    port: u16,
    browser: Option<BrowserHook>,
}

impl Default for LoopbackPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackPrompt {
    /// Listen on an ephemeral port.
    pub fn new() -> Self {
        Self {
            port: 0,
            browser: None,
        }
    }

    /// Listen on a fixed port (for app registrations that pin the redirect).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Replace the system browser with a custom opener.
    pub fn with_browser(mut self, open: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.browser = Some(Box::new(open));
        self
    }

    fn open(&self, url: &str) {
        if let Some(open) = &self.browser {
            open(url);
            return;
        }
        eprintln!("A local browser window will be open for you to sign in. CTRL+C to cancel.");
        if let Err(e) = webbrowser::open(url) {
            warn!(error = %e, "failed to open browser");
            eprintln!("Open this URL in a browser to sign in:\n  {url}");
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl AuthorizationPrompt for LoopbackPrompt {
    fn authorize<'a>(&'a self, request: &'a AuthorizationRequest) -> PromptFuture<'a> {
        Box::pin(async move {
            let listener = TcpListener::bind(("127.0.0.1", self.port))
                .await
                .map_err(|e| Error::Login(format!("binding loopback port {}: {e}", self.port)))?;
            let port = listener
                .local_addr()
                .map_err(|e| Error::Login(format!("reading loopback address: {e}")))?
                .port();
            let redirect_uri = format!("http://localhost:{port}/");
            let url = request.url(&redirect_uri)?;

            let (callback_tx, callback_rx) = oneshot::channel::<CallbackParams>();
            let callback_tx = Arc::new(std::sync::Mutex::new(Some(callback_tx)));
            let app = Router::new().route(
                "/",
                get(move |Query(params): Query<CallbackParams>| {
                    let callback_tx = callback_tx.clone();
                    async move {
                        // Stray requests (prefetch, reload) carry neither and must not end the login
                        if params.code.is_none() && params.error.is_none() {
                            return Html("<html><body><p>Waiting for sign-in.</p></body></html>");
                        }
                        if let Ok(mut slot) = callback_tx.lock() {
                            if let Some(tx) = slot.take() {
                                let _ = tx.send(params);
                            }
                        }
                        Html("<html><body><p>Sign-in complete. You can close this window.</p></body></html>")
                    }
                }),
            );

            // Dropping shutdown_tx (e.g. on timeout) also stops the listener
            let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
            tokio::spawn(async move {
                let _ = axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    })
                    .await;
            });

            info!(port, "waiting for interactive sign-in");
            self.open(&url);

            let params = callback_rx
                .await
                .map_err(|_| Error::Login("sign-in callback listener closed".into()));
            let _ = shutdown_tx.send(());
            let params = params?;

            if let Some(error) = params.error {
                return Err(Error::TokenRefresh(ProviderError {
                    status: None,
                    error: Some(error),
                    error_description: params.error_description,
                    correlation_id: None,
                }));
            }
            let code = params
                .code
                .ok_or_else(|| Error::Login("callback carried no authorization code".into()))?;
            Ok(AuthorizationCode {
                code,
                state: params.state,
                redirect_uri,
            })
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct IdTokenClaims {
    oid: Option<String>,
    sub: Option<String>,
    tid: Option<String>,
    preferred_username: Option<String>,
}

impl IdTokenClaims {
    /// `oid.tid` when both are present, like the authority's own account ids.
    fn home_account_id(&self) -> Option<String> {
        match (&self.oid, &self.tid) {
            (Some(oid), Some(tid)) => Some(format!("{oid}.{tid}")),
            (Some(oid), None) => Some(oid.clone()),
            _ => self.sub.clone(),
        }
    }
}

/// Decode the (unverified) claims of an id token. The token came straight
/// from the token endpoint over TLS, and is only used to key the cache.
fn id_token_claims(id_token: &str) -> Option<IdTokenClaims> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Public client application bound to one loaded token cache.
struct PublicClient<'a> {
    client_id: &'a str,
    token_endpoint: String,
    http_client: &'a reqwest::Client,
    cache: &'a mut TokenCache,
}

impl PublicClient<'_> {
    fn first_account(&self) -> Option<CachedAccount> {
        self.cache.accounts().first().map(|a| (*a).clone())
    }

    /// Cached access token, else a refresh-token grant. Returns `None` when
    /// the cache cannot satisfy the request without the user.
    async fn acquire_token_silent(
        &mut self,
        account: &CachedAccount,
        scope_key: &str,
        scope: &str,
    ) -> Result<Option<GrantedToken>> {
        if let Some((access_token, remaining)) = account.access_token_for(scope_key, unix_now()) {
            debug!(account = %account.home_account_id, "cached access token still valid");
            return Ok(Some(GrantedToken {
                access_token: access_token.to_owned(),
                expires_in: remaining,
                refresh_token: None,
                id_token: None,
            }));
        }

        let Some(refresh) = account.refresh_token.as_deref() else {
            return Ok(None);
        };
        let result = token::refresh_token(
            self.http_client,
            &self.token_endpoint,
            self.client_id,
            None,
            refresh,
            Some(scope),
        )
        .await
        .and_then(TokenResponse::into_granted);

        match result {
            Ok(granted) => {
                self.remember(Some(account), &granted, scope_key);
                Ok(Some(granted))
            }
            Err(Error::TokenRefresh(err)) => {
                warn!(
                    account = %account.home_account_id,
                    error = %err,
                    "silent refresh rejected, dropping account and falling back to interactive login"
                );
                // A dead refresh token would otherwise shadow later logins
                self.cache.remove(&account.home_account_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn acquire_token_by_code(
        &mut self,
        code: &AuthorizationCode,
        verifier: &str,
        scope_key: &str,
        scope: &str,
    ) -> Result<GrantedToken> {
        let granted = token::exchange_code(
            self.http_client,
            &self.token_endpoint,
            self.client_id,
            &code.code,
            verifier,
            &code.redirect_uri,
            scope,
        )
        .await?
        .into_granted()?;
        self.remember(None, &granted, scope_key);
        Ok(granted)
    }

    fn remember(&mut self, previous: Option<&CachedAccount>, granted: &GrantedToken, scope_key: &str) {
        let claims = granted.id_token.as_deref().and_then(id_token_claims);
        let home_account_id = previous
            .map(|a| a.home_account_id.clone())
            .or_else(|| claims.as_ref().and_then(IdTokenClaims::home_account_id))
            .unwrap_or_else(|| "default".into());
        let username = claims
            .and_then(|c| c.preferred_username)
            .or_else(|| previous.and_then(|a| a.username.clone()));
        let refresh_token = granted
            .refresh_token
            .clone()
            .or_else(|| previous.and_then(|a| a.refresh_token.clone()));

        self.cache.upsert(CachedAccount {
            home_account_id,
            username,
            refresh_token,
            access_token: Some(granted.access_token.clone()),
            scopes: scope_key.to_owned(),
            expires_at: unix_now().saturating_add(granted.expires_in),
        });
    }
}

/// Credential that signs a user in interactively.
pub struct InteractiveCredential {
    client_id: String,
    authority: String,
    scopes: Vec<String>,
    token_cache: Option<PathBuf>,
    prompt: Box<dyn AuthorizationPrompt>,
    login_timeout: Duration,
    http_client: reqwest::Client,
    state: Mutex<CachedToken>,
}

impl InteractiveCredential {
    /// `scopes` is a whitespace-separated list, e.g. `"api://osdu/.default"`.
    pub fn new(
        client_id: impl Into<String>,
        authority: impl Into<String>,
        scopes: &str,
        token_cache: Option<PathBuf>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            authority: authority.into(),
            scopes: scopes.split_whitespace().map(str::to_owned).collect(),
            token_cache,
            prompt: Box::new(LoopbackPrompt::new()),
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
            http_client: reqwest::Client::new(),
            state: Mutex::new(CachedToken::default()),
        }
    }

    pub fn with_prompt(mut self, prompt: Box<dyn AuthorizationPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = client;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn token_cache(&self) -> Option<&Path> {
        self.token_cache.as_deref()
    }

    /// Configured scopes plus the reserved ones needed for a refresh token.
    fn requested_scope(&self) -> String {
        let mut scopes = self.scopes.clone();
        for reserved in RESERVED_SCOPES {
            if !scopes.iter().any(|s| s == reserved) {
                scopes.push((*reserved).to_owned());
            }
        }
        scopes.join(" ")
    }

    async fn token(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        if let Some(token) = state.valid_at(SystemTime::now()) {
            debug!(client_id = %self.client_id, "using cached access token");
            return Ok(token.to_owned());
        }

        match self.refresh().await {
            Ok(granted) => {
                record_refresh(KIND, "success");
                info!(client_id = %self.client_id, expires_in = granted.expires_in, "access token refreshed");
                state.store(granted.access_token.clone(), granted.expires_in, SystemTime::now());
                Ok(granted.access_token)
            }
            Err(e) => {
                record_refresh(KIND, "failure");
                Err(e)
            }
        }
    }

    async fn refresh(&self) -> Result<GrantedToken> {
        let mut cache = match &self.token_cache {
            Some(path) => TokenCache::load(path).await?,
            None => TokenCache::new(),
        };
        let scope_key = self.scopes.join(" ");
        let scope = self.requested_scope();

        let mut app = PublicClient {
            client_id: &self.client_id,
            token_endpoint: authority_endpoint(&self.authority, TOKEN_PATH),
            http_client: &self.http_client,
            cache: &mut cache,
        };

        let mut granted = None;
        if let Some(account) = app.first_account() {
            debug!(account = %account.home_account_id, "account found in token cache, trying silent acquisition");
            granted = app.acquire_token_silent(&account, &scope_key, &scope).await?;
        }
        let granted = match granted {
            Some(granted) => granted,
            None => {
                debug!("no suitable token in cache, starting interactive login");
                self.login(&mut app, &scope_key, &scope).await?
            }
        };

        if cache.has_state_changed() {
            if let Some(path) = &self.token_cache {
                cache.save(path).await?;
            }
        }
        Ok(granted)
    }

    async fn login(&self, app: &mut PublicClient<'_>, scope_key: &str, scope: &str) -> Result<GrantedToken> {
        let verifier = pkce::generate_verifier();
        let request = AuthorizationRequest {
            authorize_endpoint: authority_endpoint(&self.authority, AUTHORIZE_PATH),
            client_id: self.client_id.clone(),
            scope: scope.to_owned(),
            challenge: pkce::compute_challenge(&verifier),
            state: pkce::generate_state(),
        };

        let code = tokio::time::timeout(self.login_timeout, self.prompt.authorize(&request))
            .await
            .map_err(|_| Error::LoginTimeout(self.login_timeout))??;

        if code.state.as_deref() != Some(request.state()) {
            return Err(Error::Login(
                "state in authorization response does not match the request".into(),
            ));
        }

        app.acquire_token_by_code(&code, &verifier, scope_key, scope).await
    }
}

impl Credential for InteractiveCredential {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn get_token(&self) -> TokenFuture<'_> {
        Box::pin(self.token())
    }
}
