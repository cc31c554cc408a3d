// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::envelope::ErrorEnvelope;

/// Per-field validation messages, in the order the server reported them.
pub type FieldErrors = IndexMap<String, Vec<String>>;

/// Failure categories surfaced by the request pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No response was received (connect failure, timeout, broken body).
    Transport,
    /// 401 that could not be recovered by a refresh.
    Unauthorized,
    /// 403 without an error envelope. Navigation to the unauthorized view was signalled.
    Forbidden,
    /// Non-2xx response carrying the server's error envelope.
    Domain,
    /// Non-2xx response without an error envelope.
    Http,
    /// The refresh exchange failed or no refresh credential was stored.
    SessionExpired,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "TRANSPORT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::Domain => "DOMAIN",
            Self::Http => "HTTP",
            Self::SessionExpired => "SESSION_EXPIRED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized error returned by every pipeline call.
///
/// `code` is the numeric code from the server envelope when one was present,
/// otherwise the HTTP status (0 for transport failures).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<FieldErrors>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, code: i64, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), code, field_errors: None, request_id: None }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, 0, message)
    }

    pub fn session_expired() -> Self {
        Self::new(ErrorKind::SessionExpired, 401, "session expired, please sign in again")
    }

    pub fn forbidden() -> Self {
        Self::new(ErrorKind::Forbidden, 403, "access to this resource is forbidden")
    }

    /// Build a domain error from a parsed server envelope.
    ///
    /// A 401 that reaches this point is reported as [`ErrorKind::Unauthorized`]
    /// so callers can tell it apart from validation failures.
    pub fn from_envelope(http_status: u16, envelope: ErrorEnvelope) -> Self {
        let kind = if http_status == 401 { ErrorKind::Unauthorized } else { ErrorKind::Domain };
        let code =
            if envelope.status.code != 0 { envelope.status.code } else { http_status.into() };
        let message = if envelope.status.message.is_empty() {
            format!("request failed with status {http_status}")
        } else {
            envelope.status.message
        };
        Self {
            kind,
            message,
            code,
            field_errors: envelope.status.errors.filter(|e| !e.is_empty()),
            request_id: envelope.meta.and_then(|m| m.request_id),
        }
    }

    /// Error for a non-2xx response whose body is not an envelope.
    pub fn from_status(http_status: u16, body: &str) -> Self {
        let kind = match http_status {
            401 => ErrorKind::Unauthorized,
            403 => ErrorKind::Forbidden,
            _ => ErrorKind::Http,
        };
        let body = body.trim();
        let message = if body.is_empty() {
            format!("request failed with status {http_status}")
        } else {
            format!("request failed with status {http_status}: {body}")
        };
        Self::new(kind, http_status.into(), message)
    }

    /// Normalize a non-2xx response body, preferring the server envelope.
    pub fn from_response(http_status: u16, body: &[u8]) -> Self {
        match ErrorEnvelope::parse(body) {
            Some(envelope) => Self::from_envelope(http_status, envelope),
            None => Self::from_status(http_status, &String::from_utf8_lossy(body)),
        }
    }

    pub fn is_session_expired(&self) -> bool {
        self.kind == ErrorKind::SessionExpired
    }

    /// Messages attached to a single form field, if any.
    pub fn field(&self, name: &str) -> Option<&[String]> {
        self.field_errors.as_ref()?.get(name).map(Vec::as_slice)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind, self.code, self.message)?;
        if let Some(ref id) = self.request_id {
            write!(f, " [request {id}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::transport(format!("request timed out: {e}"));
        }
        Self::transport(e.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
