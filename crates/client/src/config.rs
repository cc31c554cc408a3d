// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/api";
pub const DEFAULT_LOGIN_PATH: &str = "/auth/login";
pub const DEFAULT_LOGOUT_PATH: &str = "/auth/logout";
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
pub const DEFAULT_CSRF_PATH: &str = "/auth/csrf";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CSRF_FETCH_TIMEOUT_MS: u64 = 2_500;
pub const DEFAULT_CSRF_BOOTSTRAP_MS: u64 = 3_000;
pub const DEFAULT_ENVIRONMENT: &str = "development";
pub const DEFAULT_REFRESH_TTL_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_LOGIN_ROUTE: &str = "/login";
pub const DEFAULT_UNAUTHORIZED_ROUTE: &str = "/unauthorized";

/// Configuration for the console API client.
#[derive(Debug, Clone, clap::Args)]
pub struct ClientConfig {
    /// Backend base URL; request paths are appended to it.
    #[arg(long, default_value = DEFAULT_BASE_URL, env = "CONSOLE_API_URL")]
    pub base_url: String,

    /// Login endpoint path. Never triggers a credential refresh.
    #[arg(long, default_value = DEFAULT_LOGIN_PATH, env = "CONSOLE_API_LOGIN_PATH")]
    pub login_path: String,

    /// Logout endpoint path.
    #[arg(long, default_value = DEFAULT_LOGOUT_PATH, env = "CONSOLE_API_LOGOUT_PATH")]
    pub logout_path: String,

    /// Token refresh endpoint path.
    #[arg(long, default_value = DEFAULT_REFRESH_PATH, env = "CONSOLE_API_REFRESH_PATH")]
    pub refresh_path: String,

    /// Anti-forgery token endpoint path.
    #[arg(long, default_value = DEFAULT_CSRF_PATH, env = "CONSOLE_API_CSRF_PATH")]
    pub csrf_path: String,

    /// Timeout applied to every pipeline request, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS, env = "CONSOLE_API_TIMEOUT_MS")]
    pub timeout_ms: u64,

    /// Timeout for the anti-forgery token fetch, in milliseconds.
    #[arg(
        long,
        default_value_t = DEFAULT_CSRF_FETCH_TIMEOUT_MS,
        env = "CONSOLE_API_CSRF_FETCH_TIMEOUT_MS"
    )]
    pub csrf_fetch_timeout_ms: u64,

    /// Deadline after which anti-forgery bootstrap falls back to a local token.
    #[arg(long, default_value_t = DEFAULT_CSRF_BOOTSTRAP_MS, env = "CONSOLE_API_CSRF_BOOTSTRAP_MS")]
    pub csrf_bootstrap_ms: u64,

    /// Skip the anti-forgery endpoint and always synthesize tokens locally.
    #[arg(long, env = "CONSOLE_API_MOCK_CSRF")]
    pub mock_csrf: bool,

    /// Environment marker embedded in synthesized anti-forgery tokens.
    #[arg(long, default_value = DEFAULT_ENVIRONMENT, env = "CONSOLE_API_ENV")]
    pub environment: String,

    /// Lifetime of the stored refresh credential, in seconds.
    #[arg(long, default_value_t = DEFAULT_REFRESH_TTL_SECS, env = "CONSOLE_API_REFRESH_TTL_SECS")]
    pub refresh_ttl_secs: u64,

    /// Directory for durable credential storage. Defaults to the XDG state dir.
    #[arg(long, env = "CONSOLE_API_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Route signalled when the session must re-authenticate.
    #[arg(long, default_value = DEFAULT_LOGIN_ROUTE, env = "CONSOLE_API_LOGIN_ROUTE")]
    pub login_route: String,

    /// Route signalled when the server forbids access.
    #[arg(long, default_value = DEFAULT_UNAUTHORIZED_ROUTE, env = "CONSOLE_API_UNAUTHORIZED_ROUTE")]
    pub unauthorized_route: String,
}

impl ClientConfig {
    /// Config with all defaults against the given backend.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            login_path: DEFAULT_LOGIN_PATH.to_owned(),
            logout_path: DEFAULT_LOGOUT_PATH.to_owned(),
            refresh_path: DEFAULT_REFRESH_PATH.to_owned(),
            csrf_path: DEFAULT_CSRF_PATH.to_owned(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            csrf_fetch_timeout_ms: DEFAULT_CSRF_FETCH_TIMEOUT_MS,
            csrf_bootstrap_ms: DEFAULT_CSRF_BOOTSTRAP_MS,
            mock_csrf: false,
            environment: DEFAULT_ENVIRONMENT.to_owned(),
            refresh_ttl_secs: DEFAULT_REFRESH_TTL_SECS,
            state_dir: None,
            login_route: DEFAULT_LOGIN_ROUTE.to_owned(),
            unauthorized_route: DEFAULT_UNAUTHORIZED_ROUTE.to_owned(),
        }
    }

    /// Join a request path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    /// Whether `path` is one of the endpoints exempt from refresh-on-401.
    pub fn is_auth_endpoint(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        let path = path.trim_end_matches('/');
        path == self.login_path.trim_end_matches('/')
            || path == self.refresh_path.trim_end_matches('/')
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn csrf_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.csrf_fetch_timeout_ms)
    }

    pub fn csrf_bootstrap_deadline(&self) -> Duration {
        Duration::from_millis(self.csrf_bootstrap_ms)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_ttl_secs)
    }

    /// Resolve the directory for durable credential storage.
    ///
    /// Checks `--state-dir`, then `$XDG_STATE_HOME/consoleapi`,
    /// then `$HOME/.local/state/consoleapi`.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("consoleapi");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/consoleapi");
        }
        PathBuf::from(".consoleapi")
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
