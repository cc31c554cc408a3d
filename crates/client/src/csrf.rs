// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Anti-forgery token bootstrap.
//!
//! The token is cached in session-scoped storage. When the endpoint fails,
//! times out, or answers with a non-2xx status, a local token is synthesized
//! and mock mode is switched on so the rest of the session never waits on the
//! endpoint again. Requests always get a header value; a missing token never
//! blocks them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::credential::store::{epoch_ms, KeyValueStore};
use crate::envelope::{unwrap_data, CsrfResponse};

pub const CSRF_HEADER: &str = "X-CSRF-Token";

const TOKEN_KEY: &str = "csrf_token";
const ORIGIN_KEY: &str = "csrf_origin";
const MOCK_MODE_KEY: &str = "csrf_mock_mode";

/// Where an anti-forgery token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenOrigin {
    Server,
    Mock,
}

impl TokenOrigin {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Mock => "mock",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntiForgeryToken {
    pub value: String,
    pub origin: TokenOrigin,
}

/// Why the server token could not be used.
///
/// Every reason leads to the same fallback; the distinction only shows up in logs.
#[derive(Debug, Clone)]
enum FallbackReason {
    ServerError(u16),
    Timeout,
    Network(String),
    InvalidResponse(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerError(status) => write!(f, "server error ({status})"),
            Self::Timeout => f.write_str("timeout"),
            Self::Network(e) => write!(f, "network: {e}"),
            Self::InvalidResponse(e) => write!(f, "invalid response: {e}"),
        }
    }
}

struct Inner {
    http: reqwest::Client,
    url: String,
    fetch_timeout: Duration,
    bootstrap_deadline: Duration,
    environment: String,
    force_mock: bool,
    storage: Arc<dyn KeyValueStore>,
    /// Bumped by [`AntiForgery::clear`]. Fetches started under an older
    /// generation finish without touching storage. Held while writing.
    generation: Mutex<u64>,
}

/// Obtains and caches the session's anti-forgery token.
pub struct AntiForgery {
    inner: Arc<Inner>,
    inflight: Mutex<Option<Shared<BoxFuture<'static, AntiForgeryToken>>>>,
}

impl AntiForgery {
    pub fn new(
        config: &ClientConfig,
        http: reqwest::Client,
        storage: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                url: config.url(&config.csrf_path),
                fetch_timeout: config.csrf_fetch_timeout(),
                bootstrap_deadline: config.csrf_bootstrap_deadline(),
                environment: config.environment.clone(),
                force_mock: config.mock_csrf,
                storage,
                generation: Mutex::new(0),
            }),
            inflight: Mutex::new(None),
        }
    }

    /// Cached token, without any network activity.
    pub fn current(&self) -> Option<AntiForgeryToken> {
        self.inner.cached()
    }

    pub fn is_mock_mode(&self) -> bool {
        self.inner.mock_mode()
    }

    /// Resolve a usable token. Never fails.
    ///
    /// Order: cached token, then local synthesis in mock mode, then the
    /// endpoint with a short timeout. Concurrent callers share one fetch, which
    /// runs on its own task and completes even if every caller stops waiting.
    pub async fn initialize(&self) -> AntiForgeryToken {
        if let Some(token) = self.inner.cached() {
            return token;
        }
        if self.inner.mock_mode() {
            let token = self.inner.synthesize();
            tracing::debug!("anti-forgery mock mode, using local token");
            return self.inner.cache_if_absent(token);
        }

        let fetch = {
            let mut inflight = self.inflight.lock();
            match inflight.as_ref() {
                Some(fut) => fut.clone(),
                None => {
                    let inner = Arc::clone(&self.inner);
                    let generation = *inner.generation.lock();
                    let handle = tokio::spawn(Arc::clone(&inner).fetch_and_cache(generation));
                    let fut = async move {
                        match handle.await {
                            Ok(token) => token,
                            Err(e) => {
                                inner.fall_back(generation, FallbackReason::Network(e.to_string()))
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    *inflight = Some(fut.clone());
                    fut
                }
            }
        };

        let token = fetch.clone().await;
        let mut inflight = self.inflight.lock();
        if inflight.as_ref().is_some_and(|f| f.ptr_eq(&fetch)) {
            inflight.take();
        }
        token
    }

    /// [`initialize`](Self::initialize) bounded by the bootstrap deadline.
    ///
    /// On deadline a local token is cached and returned; the fetch keeps
    /// running and replaces it if it later succeeds.
    pub async fn bootstrap(&self) -> AntiForgeryToken {
        match tokio::time::timeout(self.inner.bootstrap_deadline, self.initialize()).await {
            Ok(token) => token,
            Err(_) => {
                tracing::warn!(
                    deadline_ms = self.inner.bootstrap_deadline.as_millis() as u64,
                    "anti-forgery bootstrap deadline elapsed, continuing with local token"
                );
                let token = self.inner.synthesize();
                self.inner.cache_if_absent(token)
            }
        }
    }

    /// Forget the token and leave mock mode (logout).
    ///
    /// A fetch still running from before the call is disowned: its result is
    /// never cached.
    pub fn clear(&self) {
        self.inflight.lock().take();
        let mut generation = self.inner.generation.lock();
        *generation += 1;
        for key in [TOKEN_KEY, ORIGIN_KEY, MOCK_MODE_KEY] {
            if let Err(e) = self.inner.storage.remove(key) {
                tracing::warn!(err = %e, key, "failed to clear anti-forgery state");
            }
        }
    }
}

impl Inner {
    fn cached(&self) -> Option<AntiForgeryToken> {
        let value = self.storage.get(TOKEN_KEY)?;
        let origin = match self.storage.get(ORIGIN_KEY).as_deref() {
            Some("server") => TokenOrigin::Server,
            _ => TokenOrigin::Mock,
        };
        Some(AntiForgeryToken { value, origin })
    }

    fn mock_mode(&self) -> bool {
        self.force_mock || self.storage.get(MOCK_MODE_KEY).is_some()
    }

    fn store(&self, token: &AntiForgeryToken) {
        let written = self
            .storage
            .set(TOKEN_KEY, &token.value, None)
            .and_then(|()| self.storage.set(ORIGIN_KEY, token.origin.as_str(), None));
        if let Err(e) = written {
            tracing::warn!(err = %e, "failed to cache anti-forgery token");
        }
    }

    /// Cache `token` unless one is already cached; return whichever is cached.
    fn cache_if_absent(&self, token: AntiForgeryToken) -> AntiForgeryToken {
        if let Some(existing) = self.cached() {
            return existing;
        }
        self.store(&token);
        token
    }

    /// Process-unique local token: environment marker, timestamp, random suffix.
    fn synthesize(&self) -> AntiForgeryToken {
        let value = format!(
            "mock-csrf-{}-{}-{}",
            self.environment,
            epoch_ms(),
            uuid::Uuid::new_v4().simple()
        );
        AntiForgeryToken { value, origin: TokenOrigin::Mock }
    }

    fn fall_back(&self, generation: u64, reason: FallbackReason) -> AntiForgeryToken {
        let token = self.synthesize();
        let current = self.generation.lock();
        if *current != generation {
            tracing::debug!(%reason, "anti-forgery fetch failed after clear, discarding");
            return token;
        }
        tracing::warn!(%reason, "anti-forgery endpoint unavailable, switching to mock mode");
        if let Err(e) = self.storage.set(MOCK_MODE_KEY, "1", None) {
            tracing::warn!(err = %e, "failed to persist anti-forgery mock mode");
        }
        self.cache_if_absent(token)
    }

    async fn fetch_and_cache(self: Arc<Self>, generation: u64) -> AntiForgeryToken {
        let result = match tokio::time::timeout(self.fetch_timeout, self.fetch()).await {
            Ok(r) => r,
            Err(_) => Err(FallbackReason::Timeout),
        };
        let value = match result {
            Ok(value) => value,
            Err(reason) => return self.fall_back(generation, reason),
        };
        let token = AntiForgeryToken { value, origin: TokenOrigin::Server };
        let current = self.generation.lock();
        if *current != generation {
            tracing::debug!("anti-forgery token arrived after clear, discarding");
            return token;
        }
        // A server token always replaces a local one.
        self.store(&token);
        tracing::debug!("anti-forgery token obtained from server");
        token
    }

    async fn fetch(&self) -> Result<String, FallbackReason> {
        let resp = self
            .http
            .get(&self.url)
            .timeout(self.fetch_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FallbackReason::Timeout
                } else {
                    FallbackReason::Network(e.to_string())
                }
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FallbackReason::ServerError(status.as_u16()));
        }
        let body = resp.bytes().await.map_err(|e| FallbackReason::Network(e.to_string()))?;
        let data =
            unwrap_data(&body).map_err(|e| FallbackReason::InvalidResponse(e.to_string()))?;
        let parsed: CsrfResponse = serde_json::from_value(data)
            .map_err(|e| FallbackReason::InvalidResponse(e.to_string()))?;
        if parsed.csrf_token.is_empty() {
            return Err(FallbackReason::InvalidResponse("empty csrfToken".to_owned()));
        }
        Ok(parsed.csrf_token)
    }
}
