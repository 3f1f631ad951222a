//! Token storage and management

use std::time::{SystemTime, UNIX_EPOCH};

use crate::store::{KeyValueStore, StoreError};

const TOKEN_KEY: &str = "sp_token";
const EXPIRY_KEY: &str = "sp_token_exp";
const VERIFIER_KEY: &str = "sp_code_verifier";

/// Seconds shaved off the server-reported lifetime.
pub const EXPIRY_MARGIN_SECS: u64 = 60;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Absolute expiry for a token issued at `issued_at_ms` with the given lifetime.
pub fn expiry_from_lifetime(issued_at_ms: u64, expires_in_secs: u64) -> u64 {
    let lifetime_ms = expires_in_secs
        .saturating_sub(EXPIRY_MARGIN_SECS)
        .saturating_mul(1000);
    issued_at_ms.saturating_add(lifetime_ms)
}

/// Stored access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredToken {
    pub token: String,
    pub expires_at_ms: u64,
}

impl StoredToken {
    pub fn is_valid_at(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }

    pub fn is_expired(&self) -> bool {
        !self.is_valid_at(now_ms())
    }
}

/// Typed view over the raw key-value store.
#[derive(Debug)]
pub struct CredentialStore<S> {
    inner: S,
}

impl<S: KeyValueStore> CredentialStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Stored token regardless of expiry. Unparsable expiry reads as 0.
    pub fn stored_token(&self) -> Option<StoredToken> {
        let token = self.inner.get(TOKEN_KEY).filter(|t| !t.is_empty())?;
        let expires_at_ms = self
            .inner
            .get(EXPIRY_KEY)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        Some(StoredToken {
            token,
            expires_at_ms,
        })
    }

    /// Stored token if it is still valid at `now_ms`.
    pub fn valid_token_at(&self, now_ms: u64) -> Option<String> {
        self.stored_token()
            .filter(|t| t.is_valid_at(now_ms))
            .map(|t| t.token)
    }

    /// Stored token if it is still valid now.
    pub fn valid_token(&self) -> Option<String> {
        self.valid_token_at(now_ms())
    }

    pub fn save_token(&mut self, token: &str, expires_at_ms: u64) -> Result<(), StoreError> {
        self.inner.set(TOKEN_KEY, token)?;
        self.inner.set(EXPIRY_KEY, &expires_at_ms.to_string())
    }

    pub fn verifier(&self) -> Option<String> {
        self.inner.get(VERIFIER_KEY)
    }

    pub fn save_verifier(&mut self, verifier: &str) -> Result<(), StoreError> {
        self.inner.set(VERIFIER_KEY, verifier)
    }

    /// Drop everything: token, expiry and verifier.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.inner.clear()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}
