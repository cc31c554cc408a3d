// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn envelope(json: serde_json::Value) -> anyhow::Result<ErrorEnvelope> {
    Ok(serde_json::from_value(json)?)
}

#[test]
fn envelope_keeps_field_errors_and_request_id() -> anyhow::Result<()> {
    let raw = br#"{
        "status": {
            "code": 4221,
            "message": "validation failed",
            "errors": { "term": ["must not be empty", "too short"], "language": ["unknown"] }
        },
        "data": null,
        "meta": { "serverDateTime": "2026-01-01T00:00:00Z", "requestId": "req-7", "sessionId": "s" }
    }"#;
    let env = ErrorEnvelope::parse(raw).ok_or_else(|| anyhow::anyhow!("not an envelope"))?;

    let err = ApiError::from_envelope(422, env);
    assert_eq!(err.kind, ErrorKind::Domain);
    assert_eq!(err.code, 4221);
    assert_eq!(err.message, "validation failed");
    assert_eq!(err.request_id.as_deref(), Some("req-7"));
    assert_eq!(
        err.field("term"),
        Some(&["must not be empty".to_owned(), "too short".to_owned()][..])
    );
    let fields: Vec<&String> =
        err.field_errors.as_ref().map(|f| f.keys().collect()).unwrap_or_default();
    assert_eq!(fields, vec!["term", "language"]);
    Ok(())
}

#[test]
fn envelope_without_code_falls_back_to_http_status() -> anyhow::Result<()> {
    let env = envelope(serde_json::json!({ "status": { "message": "" } }))?;
    let err = ApiError::from_envelope(409, env);
    assert_eq!(err.code, 409);
    assert_eq!(err.message, "request failed with status 409");
    assert!(err.field_errors.is_none());
    Ok(())
}

#[test]
fn empty_field_map_is_dropped() -> anyhow::Result<()> {
    let body = serde_json::json!({ "status": { "code": 400, "message": "bad", "errors": {} } });
    let env = envelope(body)?;
    let err = ApiError::from_envelope(400, env);
    assert!(err.field_errors.is_none());
    Ok(())
}

#[test]
fn enveloped_401_is_unauthorized() -> anyhow::Result<()> {
    let body = serde_json::json!({ "status": { "code": 401, "message": "bad credentials" } });
    let env = envelope(body)?;
    assert_eq!(ApiError::from_envelope(401, env).kind, ErrorKind::Unauthorized);
    Ok(())
}

#[yare::parameterized(
    unauthorized = { 401, ErrorKind::Unauthorized },
    forbidden    = { 403, ErrorKind::Forbidden },
    bad_gateway  = { 502, ErrorKind::Http },
    not_found    = { 404, ErrorKind::Http },
)]
fn bare_status_kind(status: u16, expected: ErrorKind) {
    let err = ApiError::from_status(status, "<html>oops</html>");
    assert_eq!(err.kind, expected);
    assert_eq!(err.code, i64::from(status));
    assert!(err.message.contains("oops"));
}

#[test]
fn display_includes_kind_code_and_request_id() {
    let mut err = ApiError::new(ErrorKind::Domain, 400, "nope");
    assert_eq!(err.to_string(), "DOMAIN (400): nope");
    err.request_id = Some("abc".into());
    assert_eq!(err.to_string(), "DOMAIN (400): nope [request abc]");
}

#[test]
fn session_expired_is_flagged() {
    assert!(ApiError::session_expired().is_session_expired());
    assert!(!ApiError::forbidden().is_session_expired());
}
