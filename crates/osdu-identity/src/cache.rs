//! Serializable token cache for the interactive strategy
//!
//! Holds signed-in accounts with their refresh and access tokens. The cache
//! tracks whether its state changed since it was loaded so the caller only
//! writes it back when needed. Writes use atomic temp-file + rename and
//! 0600 permissions since the file contains tokens.
//!
//! There is no cross-process locking: two processes sharing a cache path
//! race on write and the last writer wins.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// A signed-in account and its tokens.
///
/// `expires_at` is a unix timestamp in seconds for `access_token`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedAccount {
    pub home_account_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Space-separated scopes the access token was granted for
    #[serde(default)]
    pub scopes: String,
    #[serde(default)]
    pub expires_at: u64,
}

impl fmt::Debug for CachedAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedAccount")
            .field("home_account_id", &self.home_account_id)
            .field("username", &self.username)
            .field("scopes", &self.scopes)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl CachedAccount {
    /// Cached access token for `scopes` still valid at `now` (unix seconds),
    /// with its remaining lifetime.
    pub fn access_token_for(&self, scopes: &str, now: u64) -> Option<(&str, u64)> {
        match &self.access_token {
            Some(token) if self.scopes == scopes && now < self.expires_at => {
                Some((token, self.expires_at - now))
            }
            _ => None,
        }
    }
}

#[derive(Default, Serialize, Deserialize)]
struct CacheContents {
    #[serde(default)]
    accounts: BTreeMap<String, CachedAccount>,
}

/// In-memory token cache with change tracking.
#[derive(Default)]
pub struct TokenCache {
    contents: CacheContents,
    changed: bool,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deserialize(data: &str) -> Result<Self> {
        let contents = serde_json::from_str(data)
            .map_err(|e| Error::CacheParse(format!("parsing token cache: {e}")))?;
        Ok(Self {
            contents,
            changed: false,
        })
    }

    pub fn serialize(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.contents)
            .map_err(|e| Error::CacheParse(format!("serializing token cache: {e}")))
    }

    /// Read the cache file, or start empty if it does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "token cache not found, starting empty");
            return Ok(Self::new());
        }
        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Io(format!("reading token cache {}: {e}", path.display())))?;
        let cache = Self::deserialize(&data)?;
        debug!(path = %path.display(), accounts = cache.contents.accounts.len(), "loaded token cache");
        Ok(cache)
    }

    /// Persist the cache and clear the change flag.
    pub async fn save(&mut self, path: &Path) -> Result<()> {
        let data = self.serialize()?;
        write_atomic(path, &data).await?;
        self.changed = false;
        Ok(())
    }

    /// Whether the cache was modified since it was loaded or last saved.
    pub fn has_state_changed(&self) -> bool {
        self.changed
    }

    /// Accounts ordered by home account id.
    pub fn accounts(&self) -> Vec<&CachedAccount> {
        self.contents.accounts.values().collect()
    }

    pub fn account(&self, home_account_id: &str) -> Option<&CachedAccount> {
        self.contents.accounts.get(home_account_id)
    }

    /// Insert or replace an account. Marks the cache changed only if the
    /// stored value actually differs.
    pub fn upsert(&mut self, account: CachedAccount) {
        if self.contents.accounts.get(&account.home_account_id) == Some(&account) {
            return;
        }
        self.contents
            .accounts
            .insert(account.home_account_id.clone(), account);
        self.changed = true;
    }

    pub fn remove(&mut self, home_account_id: &str) -> Option<CachedAccount> {
        let removed = self.contents.accounts.remove(home_account_id);
        if removed.is_some() {
            self.changed = true;
        }
        removed
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Write `data` to `path` atomically with owner-only permissions.
async fn write_atomic(path: &Path, data: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("token cache path has no parent directory".into()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "token_cache".into());
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, data.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp token cache: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting token cache permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp token cache: {e}")))?;

    debug!(path = %path.display(), "persisted token cache");
    Ok(())
}
