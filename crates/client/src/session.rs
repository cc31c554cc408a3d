// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session state shared by the request pipeline: credentials, the
//! anti-forgery token, the refresh coordinator and the navigation channel.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::ClientConfig;
use crate::credential::store::{FileStore, KeyValueStore, MemoryStore};
use crate::credential::CredentialStore;
use crate::csrf::AntiForgery;
use crate::error::{ApiError, ErrorKind};
use crate::refresh::{self, RefreshCoordinator, RefreshOutcome};

/// Signals for the UI layer to move to another view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Navigation {
    /// Credentials are gone; re-authenticate.
    Login { route: String },
    /// The server refused access outright.
    Unauthorized { route: String },
}

/// One logical client session.
pub struct Session {
    config: ClientConfig,
    http: reqwest::Client,
    credentials: CredentialStore,
    anti_forgery: AntiForgery,
    refresh: RefreshCoordinator,
    nav_tx: broadcast::Sender<Navigation>,
}

impl Session {
    /// Create a session over the given durable credential storage.
    ///
    /// Session-scoped state (the anti-forgery token) lives in memory.
    pub fn new(
        config: ClientConfig,
        durable: Arc<dyn KeyValueStore>,
    ) -> anyhow::Result<Arc<Self>> {
        crate::ensure_crypto();
        let http = reqwest::Client::builder().timeout(config.timeout()).build()?;
        let credentials = CredentialStore::new(durable, config.refresh_ttl());
        let anti_forgery = AntiForgery::new(&config, http.clone(), Arc::new(MemoryStore::new()));
        let (nav_tx, _) = broadcast::channel(16);
        Ok(Arc::new(Self {
            config,
            http,
            credentials,
            anti_forgery,
            refresh: RefreshCoordinator::new(),
            nav_tx,
        }))
    }

    /// Session whose credentials persist in `credentials.json` under the state dir.
    pub fn with_file_store(config: ClientConfig) -> anyhow::Result<Arc<Self>> {
        let store = FileStore::in_dir(&config.state_dir())?;
        tracing::debug!(path = %store.path().display(), "using durable credential store");
        Self::new(config, Arc::new(store))
    }

    /// Session that keeps everything in memory.
    pub fn in_memory(config: ClientConfig) -> anyhow::Result<Arc<Self>> {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn anti_forgery(&self) -> &AntiForgery {
        &self.anti_forgery
    }

    pub fn refresh(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    pub fn subscribe_navigation(&self) -> broadcast::Receiver<Navigation> {
        self.nav_tx.subscribe()
    }

    pub fn navigate(&self, nav: Navigation) {
        tracing::info!(?nav, "navigation requested");
        let _ = self.nav_tx.send(nav);
    }

    /// Clear the credential set and ask the UI to re-authenticate.
    ///
    /// Idempotent and infallible: storage errors are logged.
    pub fn teardown(&self) {
        if let Err(e) = self.credentials.clear() {
            tracing::warn!(err = %e, "failed to clear stored credentials");
        }
        self.navigate(Navigation::Login { route: self.config.login_route.clone() });
    }

    /// Run one refresh cycle to completion and resolve every subscriber.
    ///
    /// Spawned by the caller that owns the cycle so that queued callers are
    /// resolved even if the owner is dropped.
    pub(crate) async fn run_refresh_cycle(self: Arc<Self>) {
        let outcome = self.exchange_stored_refresh_token().await;
        let outcome: RefreshOutcome = match outcome {
            Ok(token) => Ok(token),
            Err(e) => {
                tracing::warn!(err = %e, "credential refresh failed, tearing down session");
                self.teardown();
                Err(ApiError::session_expired())
            }
        };
        self.refresh.resolve(outcome);
    }

    async fn exchange_stored_refresh_token(&self) -> Result<String, ApiError> {
        let Some(refresh_token) = self.credentials.refresh_token() else {
            return Err(ApiError::new(
                ErrorKind::SessionExpired,
                401,
                "no refresh credential stored",
            ));
        };
        let url = self.config.url(&self.config.refresh_path);
        let csrf = self.anti_forgery.current();
        let set = refresh::exchange(
            &self.http,
            &url,
            &refresh_token,
            csrf.as_ref().map(|t| t.value.as_str()),
        )
        .await?;
        self.credentials.save(&set).map_err(|e| {
            ApiError::new(
                ErrorKind::SessionExpired,
                401,
                format!("failed to store refreshed credentials: {e}"),
            )
        })?;
        tracing::info!("credentials refreshed");
        Ok(set.access_token)
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
