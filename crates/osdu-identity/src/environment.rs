//! Credential selected from environment variables
//!
//! The strategy is chosen once, when the credential is built:
//! a complete refresh-token set wins, then a complete interactive set.
//! With neither, every `get_token` fails with [`Error::Unavailable`].

use std::path::PathBuf;

use tracing::{info, warn};

use crate::constants::env;
use crate::credential::{Credential, TokenFuture};
use crate::error::Error;
use crate::interactive::InteractiveCredential;
use crate::static_refresh::StaticRefreshCredential;

const KIND: &str = "environment";

/// Credential that delegates to whichever strategy the environment configures.
pub struct EnvironmentCredential {
    prefix: Option<String>,
    credential: Option<Box<dyn Credential>>,
}

impl EnvironmentCredential {
    /// Read the process environment. With `prefix = Some("OSDU")`, only
    /// `OSDU_CLIENT_ID` and friends are consulted.
    pub fn new(prefix: Option<&str>) -> Self {
        Self::from_lookup(prefix, |name| std::env::var(name).ok())
    }

    /// Select a strategy from an arbitrary variable lookup.
    pub fn from_lookup<F>(prefix: Option<&str>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { prefix, lookup };
        let credential = select(&vars);
        Self {
            prefix: prefix.map(str::to_owned),
            credential,
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Kind of the selected inner credential, if any.
    pub fn selected(&self) -> Option<&'static str> {
        self.credential.as_ref().map(|c| c.kind())
    }
}

struct Vars<'a, F> {
    prefix: Option<&'a str>,
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn name(&self, name: &str) -> String {
        match self.prefix {
            Some(prefix) => format!("{prefix}_{name}"),
            None => name.to_owned(),
        }
    }

    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(&self.name(name))
    }

    /// All values of `names`, or `None` if any is unset.
    fn all(&self, names: &[&str]) -> Option<Vec<String>> {
        names.iter().map(|n| self.get(n)).collect()
    }
}

fn select<F: Fn(&str) -> Option<String>>(vars: &Vars<'_, F>) -> Option<Box<dyn Credential>> {
    if let Some(values) = vars.all(env::REFRESH_VARS) {
        let [client_id, client_secret, token_endpoint, refresh_token]: [String; 4] =
            values.try_into().ok()?;
        info!(strategy = "static_refresh", "environment configured credential");
        return Some(Box::new(StaticRefreshCredential::new(
            client_id,
            token_endpoint,
            refresh_token,
            client_secret,
        )));
    }

    if let Some(values) = vars.all(env::INTERACTIVE_VARS) {
        let [client_id, authority, scopes]: [String; 3] = values.try_into().ok()?;
        let token_cache = vars.get(env::TOKEN_CACHE).map(PathBuf::from);
        info!(
            strategy = "interactive",
            token_cache = token_cache.is_some(),
            "environment configured credential"
        );
        return Some(Box::new(InteractiveCredential::new(
            client_id,
            authority,
            &scopes,
            token_cache,
        )));
    }

    let detected: Vec<String> = env::REFRESH_VARS
        .iter()
        .chain(env::INTERACTIVE_VARS)
        .chain(std::iter::once(&env::TOKEN_CACHE))
        .map(|n| vars.name(n))
        .filter(|n| (vars.lookup)(n.as_str()).is_some())
        .fold(Vec::new(), |mut acc, n| {
            if !acc.contains(&n) {
                acc.push(n);
            }
            acc
        });
    if detected.is_empty() {
        warn!(prefix = ?vars.prefix, "no credential environment variables found");
    } else {
        warn!(
            variables = %detected.join(", "),
            "incomplete credential configuration in environment"
        );
    }
    None
}

impl Credential for EnvironmentCredential {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn get_token(&self) -> TokenFuture<'_> {
        match &self.credential {
            Some(credential) => credential.get_token(),
            None => {
                let message = match &self.prefix {
                    Some(prefix) => format!(
                        "no credential configured in environment (prefix {prefix}); set {prefix}_CLIENT_ID with a refresh-token or interactive set"
                    ),
                    None => "no credential configured in environment; set CLIENT_ID with a refresh-token or interactive set".to_owned(),
                };
                Box::pin(async move { Err(Error::Unavailable(message)) })
            }
        }
    }
}
