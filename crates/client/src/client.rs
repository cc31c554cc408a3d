// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated request pipeline.
//!
//! Every call attaches the stored credentials and the anti-forgery token,
//! unwraps the response envelope, and normalizes failures into [`ApiError`].
//! A 401 outside the auth endpoints goes through the refresh coordinator and
//! the call is replayed once with the new credentials.

use std::sync::Arc;

use reqwest::header::AUTHORIZATION;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::credential::{CredentialSet, CredentialStatus};
use crate::csrf::CSRF_HEADER;
use crate::envelope::{unwrap_data, ErrorEnvelope, LoginRequest, TokenPayload};
use crate::error::{ApiError, ErrorKind};
use crate::refresh::Admission;
use crate::session::{Navigation, Session};

/// A call is replayed at most this many times after a refresh.
const MAX_RETRIES: u32 = 1;

/// Extra per-call request settings.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Everything needed to (re)issue one call.
struct PreparedRequest<'a> {
    method: Method,
    path: &'a str,
    body: Option<Value>,
    options: &'a RequestOptions,
}

/// Result of a single dispatch.
enum Attempt {
    Done(Result<Value, ApiError>),
    /// 401 eligible for refresh. Carries the access token the attempt used.
    Expired { stale: Option<String> },
}

/// Client for the console backend. Cheap to clone.
#[derive(Clone)]
pub struct ApiClient {
    session: Arc<Session>,
}

impl ApiClient {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Issue a request and return the unwrapped `data` payload.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: &RequestOptions,
    ) -> Result<Value, ApiError> {
        let req = PreparedRequest { method, path, body, options };
        let mut retry = 0;
        loop {
            match self.dispatch(&req, retry).await {
                Attempt::Done(result) => return result,
                Attempt::Expired { stale } => {
                    self.await_refresh(stale).await?;
                    retry += 1;
                    tracing::debug!(path, retry, "replaying request with refreshed credentials");
                }
            }
        }
    }

    /// Typed variant of [`send`](Self::send).
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: &RequestOptions,
    ) -> Result<T, ApiError> {
        let data = self.send(method, path, body, options).await?;
        serde_json::from_value(data).map_err(|e| {
            ApiError::new(ErrorKind::Http, 200, format!("unexpected response payload: {e}"))
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, None, &RequestOptions::default()).await
    }

    pub async fn get_with<T: DeserializeOwned>(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<T, ApiError> {
        self.request(Method::GET, path, None, options).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = to_body(body)?;
        self.request(Method::POST, path, Some(body), &RequestOptions::default()).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = to_body(body)?;
        self.request(Method::PUT, path, Some(body), &RequestOptions::default()).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = to_body(body)?;
        self.request(Method::PATCH, path, Some(body), &RequestOptions::default()).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::DELETE, path, None, &RequestOptions::default()).await
    }

    /// Authenticate and store the returned credential set.
    ///
    /// The write waits for any in-flight refresh cycle and holds off new ones.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<CredentialStatus, ApiError> {
        let body = to_body(&LoginRequest {
            username: username.to_owned(),
            password: password.to_owned(),
        })?;
        let path = self.session.config().login_path.clone();
        let payload: TokenPayload =
            self.request(Method::POST, &path, Some(body), &RequestOptions::default()).await?;
        let set = CredentialSet::from(payload);
        let credentials = self.session.credentials();
        let saved = self.session.refresh().when_idle(|| credentials.save(&set)).await;
        saved.map_err(|e| {
            ApiError::new(ErrorKind::Transport, 0, format!("failed to store credentials: {e}"))
        })?;
        tracing::info!(username, "logged in");
        Ok(self.session.credentials().status())
    }

    /// Notify the server (best effort), then drop all session state.
    pub async fn logout(&self) {
        self.session.refresh().settled().await;
        if !self.session.credentials().is_empty() {
            let path = self.session.config().logout_path.clone();
            let req = PreparedRequest {
                method: Method::POST,
                path: &path,
                body: None,
                options: &RequestOptions::default(),
            };
            // No refresh on logout: a 401 here just means the session is already gone.
            if let Attempt::Done(Err(e)) = self.dispatch(&req, MAX_RETRIES).await {
                tracing::debug!(err = %e, "logout call failed");
            }
        }
        self.session.anti_forgery().clear();
        self.session.refresh().when_idle(|| self.session.teardown()).await;
    }

    async fn dispatch(&self, req: &PreparedRequest<'_>, retry: u32) -> Attempt {
        let session = &self.session;
        let config = session.config();
        let access_token = session.credentials().access_token();

        let mut builder = session.http().request(req.method.clone(), config.url(req.path));
        if !req.options.query.is_empty() {
            builder = builder.query(&req.options.query);
        }
        for (name, value) in &req.options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref token) = access_token {
            let token_type = session.credentials().token_type();
            builder = builder.header(AUTHORIZATION, format!("{token_type} {token}"));
        }
        let csrf = if is_state_changing(&req.method) {
            Some(session.anti_forgery().bootstrap().await)
        } else {
            session.anti_forgery().current()
        };
        if let Some(token) = csrf {
            builder = builder.header(CSRF_HEADER, token.value);
        }
        if let Some(ref body) = req.body {
            builder = builder.json(body);
        }

        let resp = match builder.send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(path = req.path, err = %e, "request failed");
                return Attempt::Done(Err(e.into()));
            }
        };
        let status = resp.status().as_u16();
        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(e) => return Attempt::Done(Err(e.into())),
        };

        if (200..300).contains(&status) {
            return Attempt::Done(unwrap_data(&body).map_err(|e| {
                ApiError::new(ErrorKind::Http, status.into(), format!("invalid response body: {e}"))
            }));
        }

        if status == 401 && retry < MAX_RETRIES && !config.is_auth_endpoint(req.path) {
            tracing::debug!(path = req.path, retry, "access token rejected");
            return Attempt::Expired { stale: access_token };
        }

        match ErrorEnvelope::parse(&body) {
            Some(envelope) => {
                let err = ApiError::from_envelope(status, envelope);
                tracing::debug!(
                    path = req.path,
                    status,
                    request_id = err.request_id.as_deref().unwrap_or("-"),
                    "request rejected"
                );
                Attempt::Done(Err(err))
            }
            None if status == 403 => {
                let route = config.unauthorized_route.clone();
                session.navigate(Navigation::Unauthorized { route });
                Attempt::Done(Err(ApiError::forbidden()))
            }
            None => {
                let text = String::from_utf8_lossy(&body);
                Attempt::Done(Err(ApiError::from_status(status, &text)))
            }
        }
    }

    /// Block until credentials newer than `stale` are available.
    ///
    /// Either starts a refresh cycle, queues behind the one in flight, or
    /// returns at once when another caller already refreshed.
    async fn await_refresh(&self, stale: Option<String>) -> Result<(), ApiError> {
        let credentials = self.session.credentials().clone();
        let (admission, rx) = self.session.refresh().join(move || {
            let current = credentials.access_token();
            if current.is_some() && current != stale {
                current
            } else {
                None
            }
        });
        match admission {
            Admission::Fresh(_) => return Ok(()),
            Admission::Owner => {
                tracing::info!("access token expired, refreshing credentials");
                tokio::spawn(Arc::clone(&self.session).run_refresh_cycle());
            }
            Admission::Queued => {}
        }
        match rx.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ApiError::session_expired()),
        }
    }
}

fn is_state_changing(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn to_body<B: Serialize + ?Sized>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body)
        .map_err(|e| ApiError::new(ErrorKind::Transport, 0, format!("invalid request body: {e}")))
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
