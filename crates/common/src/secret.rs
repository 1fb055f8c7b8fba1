//! Redacting wrapper for client secrets and refresh tokens
//!
//! Credential strategies hold their secrets as `Secret<String>` so that a
//! stray `{:?}` in a `tracing` field never leaks a refresh token. The
//! wrapped buffer is wiped when the credential is dropped.

use std::fmt;
use zeroize::Zeroize;

const REDACTED: &str = "[REDACTED]";

pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrow the raw value, e.g. to put it in a token request form.
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Environment variables may be set but empty; callers can tell without
    /// exposing the value.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret<String> {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self::new(self.0.clone())
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}
