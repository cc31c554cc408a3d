// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire types for the backend's JSON envelope.
//!
//! Every response body is `{ status, data, meta }`. Error responses carry the
//! same shape with `status.errors` holding per-field validation messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FieldErrors;

/// `status` block of the response envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusBlock {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
}

/// `meta` block of the response envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Error response: `status` is mandatory, `data` is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub status: StatusBlock,
    #[serde(default)]
    pub meta: Option<Meta>,
}

impl ErrorEnvelope {
    /// Parse an error body. Returns `None` when the body is not an envelope.
    pub fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }
}

/// Strip exactly one envelope layer from a successful response body.
///
/// An empty body yields `Value::Null`. A JSON object whose `status` is an
/// object is the envelope: it unwraps to `data`, or `Value::Null` when the
/// envelope carries none. Anything else is returned as-is.
pub fn unwrap_data(body: &[u8]) -> Result<Value, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    let value: Value = serde_json::from_slice(body)?;
    match value {
        Value::Object(mut map) if map.get("status").is_some_and(Value::is_object) => {
            Ok(map.remove("data").unwrap_or(Value::Null))
        }
        other => Ok(other),
    }
}

/// Body of the refresh exchange (`PUT <refresh-endpoint>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Body of the login call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// `data` payload returned by login and refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: u64,
}

/// Anti-forgery endpoint response. Accepted bare or inside `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfResponse {
    pub csrf_token: String,
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
