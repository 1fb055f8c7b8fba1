//! OSDU identity library
//!
//! Credential strategies that produce bearer tokens for OSDU platform calls.
//! Every strategy caches its access token until `expires_in` runs out and
//! serializes refreshes behind a per-instance lock.
//!
//! Strategies:
//! 1. `StaticRefreshCredential` exchanges a long-lived refresh token
//! 2. `ConfidentialClientCredential` uses a client secret (silent first)
//! 3. `InteractiveCredential` signs a user in with PKCE and a token cache file
//! 4. `EnvironmentCredential` picks one of the above from environment variables

pub mod cache;
pub mod confidential;
pub mod constants;
pub mod credential;
pub mod environment;
pub mod error;
pub mod interactive;
pub mod pkce;
pub mod static_refresh;
pub mod token;

pub use cache::{CachedAccount, TokenCache};
pub use confidential::{ClientSecretApp, ConfidentialClientApp, ConfidentialClientCredential};
pub use credential::{Credential, TokenFuture};
pub use environment::EnvironmentCredential;
pub use error::{Error, ProviderError, Result};
pub use interactive::{
    AuthorizationCode, AuthorizationPrompt, AuthorizationRequest, InteractiveCredential,
    LoopbackPrompt,
};
pub use static_refresh::StaticRefreshCredential;
pub use token::{GrantedToken, TokenResponse};
