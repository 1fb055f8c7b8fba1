//! Base for per-service clients (search, entitlements, ...)

use std::fmt;

use crate::client::HttpClient;
use crate::error::{Error, Result};

/// API version requested by a service client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceVersion {
    /// Highest version the service client supports
    Latest,
    V(u32),
}

impl fmt::Display for ServiceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceVersion::Latest => f.write_str("latest"),
            ServiceVersion::V(v) => write!(f, "{v}"),
        }
    }
}

/// Shared plumbing for a client of one OSDU service at a fixed API version.
pub struct ServiceClientBase {
    client: HttpClient,
    service_name: String,
    valid_versions: Vec<u32>,
    version: u32,
}

impl ServiceClientBase {
    pub fn new(
        client: HttpClient,
        service_name: impl Into<String>,
        valid_versions: &[u32],
        version: ServiceVersion,
    ) -> Result<Self> {
        let version = match version {
            ServiceVersion::Latest => valid_versions.last().copied(),
            ServiceVersion::V(v) => valid_versions.contains(&v).then_some(v),
        }
        .ok_or_else(|| {
            let supported: Vec<String> = valid_versions.iter().map(u32::to_string).collect();
            Error::InvalidServiceVersion(format!(
                "'{version}' is not supported; supported versions: {} or 'latest'",
                if supported.is_empty() {
                    "none".to_owned()
                } else {
                    supported.join(", ")
                }
            ))
        })?;

        Ok(Self {
            client,
            service_name: service_name.into(),
            valid_versions: valid_versions.to_vec(),
            version,
        })
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn valid_versions(&self) -> &[u32] {
        &self.valid_versions
    }

    /// Resolved API version (never `latest`).
    pub fn version(&self) -> u32 {
        self.version
    }

    /// `{server}/api/{service}/v{version}/{extra}`
    pub fn api_url(&self, extra: Option<&str>) -> String {
        let base = format!(
            "{}/api/{}/v{}/",
            self.client.server_url().trim_end_matches('/'),
            self.service_name,
            self.version
        );
        match extra {
            Some(extra) => format!("{base}{extra}"),
            None => base,
        }
    }
}
