//! OSDU HTTP client
//!
//! Authenticated request layer for OSDU REST services. Pair it with a
//! credential from `osdu_identity`:
//!
//! ```no_run
//! # async fn demo() -> osdu_client::Result<()> {
//! use osdu_client::{ClientConfig, HttpClient};
//! use osdu_identity::EnvironmentCredential;
//!
//! let config = ClientConfig::load(&ClientConfig::resolve_path(None))?;
//! let credential = EnvironmentCredential::new(config.identity.env_prefix.as_deref());
//! let client = HttpClient::from_config(&config, credential);
//! let records = client
//!     .get_returning_json(&format!("{}/api/storage/v2/records/id", config.server_url), None)
//!     .await?;
//! # let _ = records;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod response;
pub mod service;

pub use client::{HttpClient, RequestBody};
pub use config::{ClientConfig, IdentityConfig};
pub use error::{Error, Result};
pub use response::ApiResponse;
pub use service::{ServiceClientBase, ServiceVersion};
