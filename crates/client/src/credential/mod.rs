// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential storage: access token, refresh token and token type kept in a
//! durable key/value store, each entry expiring with its credential.

pub mod persist;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::envelope::TokenPayload;
use store::KeyValueStore;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const TOKEN_TYPE_KEY: &str = "token_type";
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Credentials issued by login or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in_secs: u64,
}

impl From<TokenPayload> for CredentialSet {
    fn from(p: TokenPayload) -> Self {
        Self {
            access_token: p.access_token,
            refresh_token: p.refresh_token,
            token_type: p
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_owned()),
            expires_in_secs: p.expires_in,
        }
    }
}

/// Presence summary of the stored credentials (tokens are never echoed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
    pub has_access_token: bool,
    pub has_refresh_token: bool,
    pub token_type: String,
}

/// Typed view over the durable store holding the credential set.
///
/// Access and refresh token are always written together; a failed write
/// leaves the store empty rather than half-populated.
#[derive(Clone)]
pub struct CredentialStore {
    durable: Arc<dyn KeyValueStore>,
    refresh_ttl: Duration,
}

impl CredentialStore {
    pub fn new(durable: Arc<dyn KeyValueStore>, refresh_ttl: Duration) -> Self {
        Self { durable, refresh_ttl }
    }

    /// Write a full credential set. `expires_in_secs == 0` means no expiry.
    pub fn save(&self, set: &CredentialSet) -> anyhow::Result<()> {
        let access_ttl =
            (set.expires_in_secs > 0).then(|| Duration::from_secs(set.expires_in_secs));
        let written = self
            .durable
            .set(TOKEN_TYPE_KEY, &set.token_type, Some(self.refresh_ttl))
            .and_then(|()| self.durable.set(ACCESS_TOKEN_KEY, &set.access_token, access_ttl))
            .and_then(|()| {
                self.durable.set(REFRESH_TOKEN_KEY, &set.refresh_token, Some(self.refresh_ttl))
            });
        if let Err(e) = written {
            let _ = self.clear();
            return Err(e);
        }
        Ok(())
    }

    pub fn access_token(&self) -> Option<String> {
        self.durable.get(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.durable.get(REFRESH_TOKEN_KEY)
    }

    pub fn token_type(&self) -> String {
        self.durable.get(TOKEN_TYPE_KEY).unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_owned())
    }

    /// `Authorization` header value, when an access token is stored.
    pub fn authorization(&self) -> Option<String> {
        let token = self.access_token()?;
        Some(format!("{} {token}", self.token_type()))
    }

    /// Remove all three entries. Clearing an empty store is a no-op.
    pub fn clear(&self) -> anyhow::Result<()> {
        let mut first_err = None;
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, TOKEN_TYPE_KEY] {
            if let Err(e) = self.durable.remove(key) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_token().is_none() && self.refresh_token().is_none()
    }

    pub fn status(&self) -> CredentialStatus {
        CredentialStatus {
            has_access_token: self.access_token().is_some(),
            has_refresh_token: self.refresh_token().is_some(),
            token_type: self.token_type(),
        }
    }
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
