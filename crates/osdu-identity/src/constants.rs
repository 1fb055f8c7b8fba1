//! Environment variable names and OAuth endpoint conventions

/// Environment variable names consulted by `EnvironmentCredential`.
///
/// When a prefix is configured every name is looked up as `PREFIX_NAME`.
pub mod env {
    pub const CLIENT_ID: &str = "CLIENT_ID";
    pub const CLIENT_SECRET: &str = "CLIENT_SECRET";
    pub const TOKEN_ENDPOINT: &str = "TOKEN_ENDPOINT";
    pub const REFRESH_TOKEN: &str = "REFRESH_TOKEN";
    pub const AUTHORITY: &str = "AUTHORITY";
    pub const SCOPES: &str = "SCOPES";
    pub const TOKEN_CACHE: &str = "TOKEN_CACHE";

    /// All of these must be set to select refresh-token authentication.
    pub const REFRESH_VARS: &[&str] = &[CLIENT_ID, CLIENT_SECRET, TOKEN_ENDPOINT, REFRESH_TOKEN];

    /// All of these must be set to select interactive authentication.
    pub const INTERACTIVE_VARS: &[&str] = &[CLIENT_ID, AUTHORITY, SCOPES];
}

/// Token endpoint path relative to an authority URL.
pub const TOKEN_PATH: &str = "oauth2/v2.0/token";

/// Authorization endpoint path relative to an authority URL.
pub const AUTHORIZE_PATH: &str = "oauth2/v2.0/authorize";

/// Scopes always requested by the interactive flow so the provider returns
/// a refresh token and an id token for the account cache.
pub const RESERVED_SCOPES: &[&str] = &["openid", "profile", "offline_access"];

/// Longest access-token lifetime honored, in seconds. Larger `expires_in`
/// values are clamped to this.
pub const MAX_TOKEN_LIFETIME_SECS: u64 = 24 * 60 * 60;

/// Join an authority URL with an endpoint path.
pub fn authority_endpoint(authority: &str, path: &str) -> String {
    format!("{}/{}", authority.trim_end_matches('/'), path)
}
