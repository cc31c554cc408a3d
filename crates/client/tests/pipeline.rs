// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests for the authenticated request pipeline against a local
//! mock backend.


use std::time::{Duration, Instant};

use serde_json::{json, Value};

use backend_support::{Backend, BackendState, CsrfBehavior, RefreshBehavior};
use consoleapi::credential::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use consoleapi::{ErrorKind, Navigation, RequestOptions};

#[tokio::test]
async fn expired_token_is_refreshed_and_request_replayed() -> anyhow::Result<()> {
    let backend = Backend::spawn().await?;
    let client = backend.client(backend.config(), true)?;

    let data: Value = client.get("/items").await?;
    assert_eq!(data["items"], json!(["Haus", "Baum"]));
    assert_eq!(data["auth"], "Bearer A2");

    let s = &backend.state;
    assert_eq!(BackendState::count(&s.refresh_hits), 1);
    assert_eq!(BackendState::count(&s.item_hits), 2);
    assert_eq!(*s.refresh_bodies.lock(), vec![json!({ "refreshToken": "R1" })]);
    assert_eq!(
        *s.item_auth.lock(),
        vec![Some("Bearer A1".to_owned()), Some("Bearer A2".to_owned())]
    );

    let creds = client.session().credentials();
    assert_eq!(creds.access_token().as_deref(), Some("A2"));
    assert_eq!(creds.refresh_token().as_deref(), Some("R2"));
    assert!(!client.session().refresh().is_refreshing());
    Ok(())
}

#[tokio::test]
async fn missing_refresh_token_tears_down_without_calling_refresh() -> anyhow::Result<()> {
    let backend = Backend::spawn().await?;
    let client = backend.client(backend.config(), false)?;
    let mut nav = client.session().subscribe_navigation();

    let err = client.get::<Value>("/items").await.err();
    let err = err.ok_or_else(|| anyhow::anyhow!("expected an error"))?;
    assert_eq!(err.kind, ErrorKind::SessionExpired);
    assert_eq!(BackendState::count(&backend.state.refresh_hits), 0);
    assert_eq!(nav.recv().await?, Navigation::Login { route: "/login".to_owned() });
    assert!(client.session().credentials().is_empty());
    Ok(())
}

#[tokio::test]
async fn concurrent_401s_share_one_refresh() -> anyhow::Result<()> {
    let backend = Backend::spawn().await?;
    *backend.state.refresh_delay.lock() = Duration::from_millis(200);
    let client = backend.client(backend.config(), true)?;

    let calls = (0..8).map(|_| {
        let client = client.clone();
        async move { client.get::<Value>("/items").await }
    });
    let results = futures_util::future::join_all(calls).await;

    for result in results {
        let data = result?;
        assert_eq!(data["auth"], "Bearer A2");
    }
    assert_eq!(BackendState::count(&backend.state.refresh_hits), 1);
    assert_eq!(client.session().refresh().cycles(), 1);
    assert_eq!(client.session().refresh().pending(), 0);
    Ok(())
}

#[tokio::test]
async fn failed_refresh_fans_out_to_every_waiter() -> anyhow::Result<()> {
    let backend = Backend::spawn().await?;
    *backend.state.refresh.lock() = RefreshBehavior::Fail(500);
    *backend.state.refresh_delay.lock() = Duration::from_millis(150);
    let client = backend.client(backend.config(), true)?;
    let mut nav = client.session().subscribe_navigation();

    let calls = (0..5).map(|_| {
        let client = client.clone();
        async move { client.get::<Value>("/items").await }
    });
    let results = futures_util::future::join_all(calls).await;

    for result in results {
        let err = result.err().ok_or_else(|| anyhow::anyhow!("expected an error"))?;
        assert!(err.is_session_expired(), "unexpected error: {err}");
    }
    assert_eq!(BackendState::count(&backend.state.refresh_hits), 1);
    let session = client.session();
    assert!(session.credentials().is_empty());
    assert!(!session.refresh().is_refreshing());
    assert!(matches!(nav.recv().await?, Navigation::Login { .. }));
    Ok(())
}

#[tokio::test]
async fn replayed_request_is_not_refreshed_twice() -> anyhow::Result<()> {
    let backend = Backend::spawn().await?;
    let client = backend.client(backend.config(), true)?;

    let err = client.get::<Value>("/always-401").await.err();
    let err = err.ok_or_else(|| anyhow::anyhow!("expected an error"))?;
    assert_eq!(err.kind, ErrorKind::Unauthorized);
    assert_eq!(err.code, 401);
    assert_eq!(BackendState::count(&backend.state.always_401_hits), 2);
    assert_eq!(BackendState::count(&backend.state.refresh_hits), 1);
    Ok(())
}

#[tokio::test]
async fn auth_endpoint_401_is_never_refreshed() -> anyhow::Result<()> {
    let backend = Backend::spawn().await?;
    let client = backend.client(backend.config(), true)?;

    let err = client.login("ada", "wrong").await.err();
    let err = err.ok_or_else(|| anyhow::anyhow!("expected an error"))?;
    assert_eq!(err.kind, ErrorKind::Unauthorized);
    assert_eq!(err.code, 4010);
    assert_eq!(err.message, "invalid username or password");
    assert_eq!(BackendState::count(&backend.state.refresh_hits), 0);
    Ok(())
}

#[tokio::test]
async fn domain_error_carries_field_errors_and_request_id() -> anyhow::Result<()> {
    let backend = Backend::spawn().await?;
    let client = backend.client(backend.config(), true)?;

    let err = client.post::<Value, _>("/validate", &json!({ "lemma": "" })).await.err();
    let err = err.ok_or_else(|| anyhow::anyhow!("expected an error"))?;
    assert_eq!(err.kind, ErrorKind::Domain);
    assert_eq!(err.code, 4220);
    assert_eq!(err.message, "validation failed");
    assert_eq!(err.request_id.as_deref(), Some("req-422"));
    assert_eq!(err.field("lemma"), Some(&["must not be blank".to_owned()][..]));
    let fields: Vec<&str> =
        err.field_errors.iter().flat_map(|f| f.keys()).map(String::as_str).collect();
    assert_eq!(fields, vec!["lemma", "gender"]);
    Ok(())
}

#[tokio::test]
async fn bare_403_signals_unauthorized_view() -> anyhow::Result<()> {
    let backend = Backend::spawn().await?;
    let client = backend.client(backend.config(), true)?;
    let mut nav = client.session().subscribe_navigation();

    let err = client.get::<Value>("/forbidden").await.err();
    let err = err.ok_or_else(|| anyhow::anyhow!("expected an error"))?;
    assert_eq!(err.kind, ErrorKind::Forbidden);
    assert_eq!(err.code, 403);
    assert_eq!(nav.recv().await?, Navigation::Unauthorized { route: "/unauthorized".to_owned() });
    assert!(!client.session().credentials().is_empty());
    Ok(())
}

#[tokio::test]
async fn enveloped_403_is_a_domain_error() -> anyhow::Result<()> {
    let backend = Backend::spawn().await?;
    let client = backend.client(backend.config(), true)?;
    let mut nav = client.session().subscribe_navigation();

    let err = client.get::<Value>("/forbidden-envelope").await.err();
    let err = err.ok_or_else(|| anyhow::anyhow!("expected an error"))?;
    assert_eq!(err.kind, ErrorKind::Domain);
    assert_eq!(err.code, 4030);
    assert!(nav.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn success_bodies_are_unwrapped_once() -> anyhow::Result<()> {
    let backend = Backend::spawn().await?;
    let client = backend.client(backend.config(), false)?;

    let empty: Value = client.get("/empty").await?;
    assert_eq!(empty, Value::Null);
    let raw: Vec<u32> = client.get("/raw").await?;
    assert_eq!(raw, vec![1, 2, 3]);
    Ok(())
}

#[tokio::test]
async fn void_success_envelope_unwraps_to_unit() -> anyhow::Result<()> {
    let backend = Backend::spawn().await?;
    let client = backend.client(backend.config(), false)?;

    client.delete::<()>("/terms/7").await?;
    let data = client
        .send(reqwest::Method::DELETE, "/terms/7", None, &RequestOptions::default())
        .await?;
    assert_eq!(data, Value::Null);
    Ok(())
}

#[tokio::test]
async fn login_then_logout() -> anyhow::Result<()> {
    let backend = Backend::spawn().await?;
    let client = backend.client(backend.config(), false)?;
    let mut nav = client.session().subscribe_navigation();

    let status = client.login("ada", "secret").await?;
    assert!(status.has_access_token);
    assert!(status.has_refresh_token);
    assert_eq!(status.token_type, "Bearer");

    let opts = RequestOptions::new().query("page", "1");
    let data: Value = client.get_with("/items", &opts).await?;
    assert_eq!(data["auth"], "Bearer L1");
    assert_eq!(BackendState::count(&backend.state.refresh_hits), 0);

    client.logout().await;
    assert_eq!(BackendState::count(&backend.state.logout_hits), 1);
    let session = client.session();
    assert!(session.credentials().is_empty());
    assert!(session.anti_forgery().current().is_none());
    assert!(matches!(nav.recv().await?, Navigation::Login { .. }));
    Ok(())
}

#[tokio::test]
async fn logout_without_credentials_skips_server_call() -> anyhow::Result<()> {
    let backend = Backend::spawn().await?;
    let client = backend.client(backend.config(), false)?;
    client.logout().await;
    assert_eq!(BackendState::count(&backend.state.logout_hits), 0);
    Ok(())
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() -> anyhow::Result<()> {
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?
    };
    let mut config = consoleapi::ClientConfig::new(format!("http://{addr}/api"));
    config.timeout_ms = 1_000;
    let client = consoleapi::ApiClient::new(consoleapi::Session::in_memory(config)?);

    let err = client.get::<Value>("/items").await.err();
    let err = err.ok_or_else(|| anyhow::anyhow!("expected an error"))?;
    assert_eq!(err.kind, ErrorKind::Transport);
    assert_eq!(err.code, 0);
    Ok(())
}

#[tokio::test]
async fn state_changing_requests_carry_csrf_header() -> anyhow::Result<()> {
    let backend = Backend::spawn().await?;
    let client = backend.client(backend.config(), true)?;
    *backend.state.valid_token.lock() = "A1".to_owned();

    let _: Value = client.get("/items").await?;
    let _: Value = client.post("/items", &json!({ "lemma": "Haus" })).await?;
    let _: Value = client.get("/items").await?;

    assert_eq!(
        *backend.state.csrf_headers.lock(),
        vec![None, Some("srv-csrf".to_owned()), Some("srv-csrf".to_owned())]
    );
    assert_eq!(BackendState::count(&backend.state.csrf_hits), 1);
    Ok(())
}

#[tokio::test]
async fn failed_csrf_endpoint_still_sends_mock_header() -> anyhow::Result<()> {
    let backend = Backend::spawn().await?;
    *backend.state.csrf.lock() = CsrfBehavior::Fail(500);
    *backend.state.valid_token.lock() = "A1".to_owned();
    let client = backend.client(backend.config(), true)?;

    let data: Value = client.post("/items", &json!({ "lemma": "Haus" })).await?;
    assert_eq!(data["auth"], "Bearer A1");

    let headers = backend.state.csrf_headers.lock().clone();
    assert_eq!(headers.len(), 1);
    let sent = headers[0].as_deref().unwrap_or_default();
    assert!(sent.starts_with("mock-csrf-"), "unexpected header {sent:?}");
    Ok(())
}

#[tokio::test]
async fn slow_csrf_endpoint_does_not_hold_requests_past_deadline() -> anyhow::Result<()> {
    let backend = Backend::spawn().await?;
    *backend.state.csrf.lock() =
        CsrfBehavior::Slow { delay: Duration::from_secs(5), token: "late".to_owned() };
    *backend.state.valid_token.lock() = "A1".to_owned();
    let mut config = backend.config();
    config.csrf_bootstrap_ms = 150;
    let client = backend.client(config, true)?;

    let started = Instant::now();
    let _: Value = client.post("/items", &json!({ "lemma": "Baum" })).await?;
    assert!(started.elapsed() < Duration::from_millis(1_000));

    let headers = backend.state.csrf_headers.lock().clone();
    let sent = headers.first().cloned().flatten().unwrap_or_default();
    assert!(sent.starts_with("mock-csrf-"), "unexpected header {sent:?}");
    Ok(())
}

#[tokio::test]
async fn login_during_refresh_writes_after_cycle() -> anyhow::Result<()> {
    let backend = Backend::spawn().await?;
    *backend.state.refresh_delay.lock() = Duration::from_millis(300);
    let client = backend.client(backend.config(), true)?;

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.get::<Value>("/items").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(client.session().refresh().is_refreshing());

    client.login("ada", "secret").await?;
    let _ = pending.await?;

    // The refresh cycle wrote A2/R2 first; the login credentials must win.
    let creds = client.session().credentials();
    assert_eq!(creds.access_token().as_deref(), Some("L1"));
    assert_eq!(creds.refresh_token().as_deref(), Some("LR1"));
    assert_eq!(BackendState::count(&backend.state.refresh_hits), 1);
    Ok(())
}

#[tokio::test]
async fn durable_store_survives_a_new_session() -> anyhow::Result<()> {
    let backend = Backend::spawn().await?;
    let dir = tempfile::tempdir()?;
    let mut config = backend.config();
    config.state_dir = Some(dir.path().to_path_buf());

    let client = consoleapi::ApiClient::new(consoleapi::Session::with_file_store(config.clone())?);
    client.login("ada", "secret").await?;

    let reopened = consoleapi::Session::with_file_store(config)?;
    let creds = reopened.credentials();
    assert_eq!(creds.access_token().as_deref(), Some("L1"));
    assert_eq!(creds.refresh_token().as_deref(), Some("LR1"));

    let raw = std::fs::read_to_string(dir.path().join("credentials.json"))?;
    assert!(raw.contains(ACCESS_TOKEN_KEY));
    assert!(raw.contains(REFRESH_TOKEN_KEY));
    Ok(())
}
