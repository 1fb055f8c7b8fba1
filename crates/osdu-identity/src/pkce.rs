//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! The interactive flow sends the S256 challenge in the authorization URL and
//! the verifier in the code exchange, so the authority can tell that both
//! requests came from the same process.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Generate a random code verifier.
///
/// 32 random bytes encode to 43 URL-safe characters, the RFC 7636 minimum,
/// which every authority accepts (the maximum is 128).
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Opaque CSRF token echoed back by the authority in the redirect.
pub fn generate_state() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Parameters of an authorization-code request.
#[derive(Debug, Clone)]
pub struct AuthorizationParams<'a> {
    pub authorize_endpoint: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scope: &'a str,
    pub challenge: &'a str,
    pub state: &'a str,
}

/// Build the authorization URL with every parameter percent-encoded.
///
/// `prompt=select_account` makes the authority show its account picker even
/// when a browser session already exists.
pub fn build_authorization_url(params: &AuthorizationParams<'_>) -> Result<String> {
    let url = reqwest::Url::parse_with_params(
        params.authorize_endpoint,
        &[
            ("client_id", params.client_id),
            ("response_type", "code"),
            ("redirect_uri", params.redirect_uri),
            ("scope", params.scope),
            ("code_challenge", params.challenge),
            ("code_challenge_method", "S256"),
            ("state", params.state),
            ("prompt", "select_account"),
        ],
    )
    .map_err(|e| {
        Error::Login(format!(
            "invalid authorize endpoint {}: {e}",
            params.authorize_endpoint
        ))
    })?;
    Ok(url.into())
}
