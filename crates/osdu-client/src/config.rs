//! Client configuration
//!
//! Precedence: env vars > config file > defaults. Credentials are never read
//! from the TOML; the `[identity]` table only names the environment prefix
//! that [`EnvironmentCredential`](osdu_identity::EnvironmentCredential) uses.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

const SERVER_URL_VAR: &str = "OSDU_SERVER_URL";
const DATA_PARTITION_VAR: &str = "OSDU_DATA_PARTITION";
const RETRIES_VAR: &str = "OSDU_RETRIES";
const CONFIG_PATH_VAR: &str = "OSDU_CONFIG_PATH";

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub server_url: String,
    pub data_partition: String,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Where credentials come from
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityConfig {
    /// Prefix for credential environment variables, e.g. `OSDU` for `OSDU_CLIENT_ID`
    #[serde(default)]
    pub env_prefix: Option<String>,
}

fn default_timeout() -> u64 {
    60
}

fn default_retry_backoff() -> u64 {
    100
}

impl ClientConfig {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents, |name| std::env::var(name).ok())
    }

    /// Parse TOML and overlay values from `lookup` instead of the process env.
    pub fn parse<F>(contents: &str, lookup: F) -> common::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: ClientConfig = toml::from_str(contents)?;

        if let Some(url) = lookup(SERVER_URL_VAR) {
            config.server_url = url;
        }
        if let Some(partition) = lookup(DATA_PARTITION_VAR) {
            config.data_partition = partition;
        }
        if let Some(retries) = lookup(RETRIES_VAR) {
            config.retries = retries.trim().parse().map_err(|e| common::Error::InvalidEnv {
                name: RETRIES_VAR.into(),
                reason: format!("{e}"),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "server_url must start with http:// or https://, got: {}",
                self.server_url
            )));
        }
        if self.data_partition.trim().is_empty() {
            return Err(common::Error::Config("data_partition must not be empty".into()));
        }
        if self.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Resolve config file path from CLI arg or OSDU_CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var(CONFIG_PATH_VAR) {
            return PathBuf::from(p);
        }
        PathBuf::from("osdu.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serializes tests that touch the process environment.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn valid_toml() -> &'static str {
        r#"
server_url = "https://osdu.example.com"
data_partition = "opendes"

[identity]
env_prefix = "OSDU"
"#
    }

    #[test]
    fn test_parse_valid_config_with_defaults() {
        let config = ClientConfig::parse(valid_toml(), no_env).unwrap();
        assert_eq!(config.server_url, "https://osdu.example.com");
        assert_eq!(config.data_partition, "opendes");
        assert_eq!(config.retries, 0);
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.retry_backoff(), Duration::from_millis(100));
        assert_eq!(config.identity.env_prefix.as_deref(), Some("OSDU"));
    }

    #[test]
    fn test_identity_table_is_optional() {
        let config = ClientConfig::parse(
            "server_url = \"http://localhost:8080\"\ndata_partition = \"p\"\nretries = 3\n",
            no_env,
        )
        .unwrap();
        assert!(config.identity.env_prefix.is_none());
        assert_eq!(config.retries, 3);
    }

    #[test]
    fn test_env_overrides_file() {
        let config = ClientConfig::parse(
            valid_toml(),
            env_of(&[
                ("OSDU_SERVER_URL", "https://other.example.com"),
                ("OSDU_DATA_PARTITION", "tenant2"),
                ("OSDU_RETRIES", "4"),
            ]),
        )
        .unwrap();
        assert_eq!(config.server_url, "https://other.example.com");
        assert_eq!(config.data_partition, "tenant2");
        assert_eq!(config.retries, 4);
    }

    #[test]
    fn test_invalid_retries_env_is_rejected() {
        let result = ClientConfig::parse(valid_toml(), env_of(&[("OSDU_RETRIES", "many")]));
        match result {
            Err(common::Error::InvalidEnv { name, .. }) => assert_eq!(name, "OSDU_RETRIES"),
            other => panic!("expected InvalidEnv, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_server_url_scheme() {
        let result = ClientConfig::parse(
            "server_url = \"ftp://osdu\"\ndata_partition = \"p\"\n",
            no_env,
        );
        let err = result.unwrap_err().to_string();
        assert!(err.contains("server_url must start with"), "got: {err}");
    }

    #[test]
    fn test_empty_partition_rejected() {
        let result = ClientConfig::parse(
            "server_url = \"https://osdu\"\ndata_partition = \"  \"\n",
            no_env,
        );
        assert!(matches!(result, Err(common::Error::Config(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = ClientConfig::parse(
            "server_url = \"https://osdu\"\ndata_partition = \"p\"\ntimeout_secs = 0\n",
            no_env,
        );
        let err = result.unwrap_err().to_string();
        assert!(err.contains("timeout_secs must be greater than 0"), "got: {err}");
    }

    #[test]
    fn test_load_from_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("osdu.toml");
        std::fs::write(&path, valid_toml()).unwrap();

        // SAFETY: serialized by ENV_MUTEX
        unsafe {
            std::env::remove_var(SERVER_URL_VAR);
            std::env::remove_var(DATA_PARTITION_VAR);
            std::env::remove_var(RETRIES_VAR);
        }
        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.data_partition, "opendes");
    }

    #[test]
    fn test_load_missing_file() {
        let result = ClientConfig::load(Path::new("/nonexistent/path/osdu.toml"));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = ClientConfig::parse("not valid {{{{ toml", no_env);
        assert!(matches!(result, Err(common::Error::Toml(_))));
    }

    #[test]
    fn test_resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::set_var(CONFIG_PATH_VAR, "/etc/osdu/client.toml") };
        assert_eq!(
            ClientConfig::resolve_path(Some("cli.toml")),
            PathBuf::from("cli.toml")
        );
        assert_eq!(
            ClientConfig::resolve_path(None),
            PathBuf::from("/etc/osdu/client.toml")
        );
        unsafe { std::env::remove_var(CONFIG_PATH_VAR) };
        assert_eq!(ClientConfig::resolve_path(None), PathBuf::from("osdu.toml"));
    }
}
