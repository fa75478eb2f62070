// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Response-path recovery: single-flight refresh and terminal failure.


use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::json;

use mock_backend::{client, dead_base_url, spawn, spawn_unauthorized, wait_until, Backend, BackendConfig};
use paymall::config::AppVariant;
use paymall::error::ApiError;
use paymall::events::{AuthReason, AuthRequired};
use paymall::http::ApiRequest;
use paymall::token::TokenKind;
use paymall::Client;

fn seed(client: &Client, access: Option<&str>, refresh: Option<&str>) {
    let tokens = client.http.tokens();
    if let Some(access) = access {
        tokens.set(TokenKind::Access, access).expect("seed access");
    }
    if let Some(refresh) = refresh {
        tokens.set(TokenKind::Refresh, refresh).expect("seed refresh");
    }
}

/// Record every delivered auth-required event.
fn record_events(client: &Client) -> Arc<Mutex<Vec<AuthRequired>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    client.events.subscribe(move |event| sink.lock().push(*event));
    seen
}

#[tokio::test]
async fn concurrent_401s_share_one_refresh() {
    let (backend, base) = spawn(BackendConfig {
        refresh_delay: Duration::from_millis(150),
        rotated_refresh: Some("refresh-2".to_owned()),
        ..Default::default()
    })
    .await;
    let client = client(&base, AppVariant::Consumer);
    seed(&client, Some("expired"), Some("refresh-1"));
    let events = record_events(&client);

    let results = join_all((0..5).map(|_| client.http.get("products/"))).await;

    assert_eq!(Backend::count(&backend.calls.refresh), 1);
    for result in &results {
        let resp = result.as_ref().expect("request resolves");
        assert_eq!(resp.data["served_with"], json!("access-2"));
    }
    assert_eq!(Backend::count(&backend.calls.products), 10);
    assert_eq!(backend.refresh_bodies.lock()[0], json!({ "refresh": "refresh-1" }));
    assert_eq!(client.http.tokens().read(TokenKind::Access).as_deref(), Some("access-2"));
    assert_eq!(client.http.tokens().read(TokenKind::Refresh).as_deref(), Some("refresh-2"));
    assert!(events.lock().is_empty());
    assert!(!client.http.is_refreshing());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn parallel_burst_refreshes_once_across_workers() {
    for round in 0..40 {
        let (backend, base) = spawn(BackendConfig::default()).await;
        let client = client(&base, AppVariant::Consumer);
        seed(&client, Some("expired"), Some("refresh-1"));
        let http = Arc::clone(&client.http);

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let http = Arc::clone(&http);
                tokio::spawn(async move { http.get("products/").await })
            })
            .collect();
        for task in join_all(tasks).await {
            let resp = task.expect("task joins").expect("request resolves");
            assert_eq!(resp.data["served_with"], json!("access-2"));
        }

        assert_eq!(Backend::count(&backend.calls.refresh), 1, "round {round}");
        assert!(!http.is_refreshing());
    }
}

#[tokio::test]
async fn unreachable_refresh_keeps_credentials() {
    let (backend, base) = spawn(BackendConfig { refresh_hangup: true, ..Default::default() }).await;
    let client = client(&base, AppVariant::Consumer);
    seed(&client, Some("expired"), Some("refresh-1"));
    let events = record_events(&client);

    let err = client.http.get("products/").await.expect_err("refresh hangs up");

    assert!(err.is_transport());
    assert_eq!(Backend::count(&backend.calls.refresh), 1);
    assert_eq!(client.http.tokens().read(TokenKind::Access).as_deref(), Some("expired"));
    assert_eq!(client.http.tokens().read(TokenKind::Refresh).as_deref(), Some("refresh-1"));
    assert!(events.lock().is_empty());
    assert!(!client.pending.has());
    assert!(!client.http.is_refreshing());
}

#[tokio::test]
async fn request_is_retried_at_most_once() {
    let (backend, base) = spawn(BackendConfig { reject_all: true, ..Default::default() }).await;
    let client = client(&base, AppVariant::Consumer);
    seed(&client, Some("expired"), Some("refresh-1"));
    let events = record_events(&client);

    let err = client.http.get("products/").await.expect_err("still unauthorized");

    assert!(err.is_unauthorized());
    assert_eq!(Backend::count(&backend.calls.products), 2);
    assert_eq!(Backend::count(&backend.calls.refresh), 1);
    assert!(events.lock().is_empty());
}

#[tokio::test]
async fn silent_401_skips_refresh_and_bus() {
    let (backend, base) = spawn(BackendConfig::default()).await;
    let client = client(&base, AppVariant::Consumer);
    seed(&client, Some("expired"), Some("refresh-1"));
    let events = record_events(&client);

    let err = client.http.send(ApiRequest::get("products/").silent()).await.expect_err("401");

    assert_eq!(err.status(), Some(401));
    assert_eq!(Backend::count(&backend.calls.refresh), 0);
    assert!(events.lock().is_empty());
    assert!(!client.pending.has());
    assert_eq!(client.http.tokens().read(TokenKind::Refresh).as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn auth_endpoints_never_refresh() {
    let (hits, base) = spawn_unauthorized().await;
    let client = client(&base, AppVariant::Consumer);
    seed(&client, Some("expired"), Some("refresh-1"));
    let events = record_events(&client);

    let requests = [
        ApiRequest::post("accounts/login/", json!({ "email": "a@b.c", "password": "x" })),
        ApiRequest::post("accounts/token/refresh/", json!({ "refresh": "refresh-1" })),
        ApiRequest::post("accounts/register/", json!({ "email": "a@b.c" })),
        ApiRequest::get("accounts/me/"),
    ];
    for request in requests {
        let err = client.http.send(request).await.expect_err("401");
        assert!(err.is_unauthorized());
    }

    // One hit per request: no refresh call reached the server.
    assert_eq!(hits.load(Ordering::SeqCst), 4);
    assert!(events.lock().is_empty());
}

#[tokio::test]
async fn refresh_failure_clears_tokens_before_notifying() {
    let (backend, base) = spawn(BackendConfig { refresh_access: None, ..Default::default() }).await;
    let client = client(&base, AppVariant::Consumer);
    seed(&client, Some("expired"), Some("revoked"));

    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&observed);
    let tokens = client.http.tokens().clone();
    client.events.subscribe(move |event| {
        let cleared = tokens.read(TokenKind::Access).is_none() && tokens.read(TokenKind::Refresh).is_none();
        sink.lock().push((event.reason, cleared));
    });

    let err = client.http.get("products/").await.expect_err("refresh fails");

    assert_eq!(err.status(), Some(401));
    assert_eq!(err.to_string(), "HTTP 401: Token is invalid or expired");
    assert_eq!(Backend::count(&backend.calls.refresh), 1);
    assert_eq!(*observed.lock(), vec![(Some(AuthReason::RefreshFailed), true)]);
    assert!(client.events.is_locked());
    assert_eq!(client.pending.get().map(|p| p.url), Some("products/".to_owned()));
}

#[tokio::test]
async fn missing_refresh_token_ends_session_without_network() {
    let (backend, base) = spawn(BackendConfig::default()).await;
    let client = client(&base, AppVariant::Consumer);
    seed(&client, Some("expired"), None);
    let events = record_events(&client);

    let err = client.http.get("orders/").await.expect_err("no refresh token");

    assert!(err.is_unauthorized());
    assert_eq!(err.to_string(), "HTTP 401: Given token not valid for any token type");
    assert_eq!(Backend::count(&backend.calls.refresh), 0);
    assert_eq!(client.http.tokens().read(TokenKind::Access), None);
    assert_eq!(*events.lock(), vec![AuthRequired::new(AuthReason::MissingRefreshToken)]);
    assert!(client.pending.has());
}

#[tokio::test]
async fn terminal_post_is_never_parked() {
    let (_backend, base) = spawn(BackendConfig { refresh_access: None, ..Default::default() }).await;
    let client = client(&base, AppVariant::Consumer);

    seed(&client, Some("expired"), Some("revoked"));
    client.http.post("orders/", json!({ "mall_id": 3 })).await.expect_err("terminal");
    assert!(!client.pending.has());

    client.events.unlock();
    seed(&client, Some("expired"), Some("revoked"));
    client.http.get("orders/").await.expect_err("terminal");
    let pending = client.pending.get().expect("GET parked");
    assert_eq!(pending.method, "GET");
    assert_eq!(pending.base_url, base);
}

#[tokio::test]
async fn waiters_share_the_refresh_failure() {
    let (backend, base) = spawn(BackendConfig {
        refresh_access: None,
        refresh_delay: Duration::from_millis(150),
        ..Default::default()
    })
    .await;
    let client = client(&base, AppVariant::Consumer);
    seed(&client, Some("expired"), Some("revoked"));
    let events = record_events(&client);

    let results = join_all((0..4).map(|_| client.http.get("products/"))).await;

    assert_eq!(Backend::count(&backend.calls.refresh), 1);
    for result in results {
        assert_eq!(result.expect_err("rejected").status(), Some(401));
    }
    assert_eq!(events.lock().len(), 1);
    // Waiters are not retried against the server.
    assert_eq!(Backend::count(&backend.calls.products), 4);
}

#[tokio::test]
async fn transport_failure_is_not_recovered() {
    let base = dead_base_url().await;
    let client = client(&base, AppVariant::Consumer);
    seed(&client, Some("expired"), Some("refresh-1"));
    let events = record_events(&client);

    let err = client.http.get("products/").await.expect_err("no server");

    assert!(err.is_transport());
    assert_eq!(err.code(), "TRANSPORT");
    assert!(events.lock().is_empty());
    assert_eq!(client.http.tokens().read(TokenKind::Refresh).as_deref(), Some("refresh-1"));
}

async fn assert_rejected_without_refresh(path: &str, status: u16, message: &str) {
    let (backend, base) = spawn(BackendConfig::default()).await;
    let client = client(&base, AppVariant::Consumer);
    seed(&client, Some("access-1"), Some("refresh-1"));

    let err = client.http.get(path).await.expect_err("error status");

    assert_eq!(err.status(), Some(status));
    assert_eq!(err.user_message(), message);
    assert_eq!(Backend::count(&backend.calls.refresh), 0);
}

#[tokio::test]
async fn server_error_rejects_without_refresh() {
    assert_rejected_without_refresh("broken/", 500, "Internal Server Error").await;
}

#[tokio::test]
async fn forbidden_rejects_without_refresh() {
    assert_rejected_without_refresh("forbidden/", 403, "You do not have permission to perform this action.").await;
}

#[tokio::test]
async fn pending_request_replays_after_login() {
    let (backend, base) = spawn(BackendConfig { refresh_access: None, ..Default::default() }).await;
    let client = client(&base, AppVariant::Consumer);
    seed(&client, Some("expired"), Some("revoked"));

    client.http.get("orders/").await.expect_err("terminal");
    assert!(client.pending.has());

    client.session.login("shopper@example.com", mock_backend::PASSWORD).await.expect("login");
    let replayed = client.http.replay_pending().await.expect("replay");

    assert_eq!(replayed.map(|r| r.data["count"].clone()), Some(json!(0)));
    assert!(!client.pending.has());
    assert_eq!(Backend::count(&backend.calls.orders), 2);
    assert_eq!(client.http.replay_pending().await, Ok(None));
}

#[tokio::test]
async fn cookie_mode_refreshes_through_the_jar() {
    let (backend, base) = spawn(BackendConfig::default()).await;
    let client = client(&base, AppVariant::Admin);

    client.session.login("ops@paymall.test", mock_backend::PASSWORD).await.expect("login");
    assert_eq!(client.http.tokens().read(TokenKind::Refresh), None);

    backend.set_valid_access("rotated-away");
    let resp = client.http.get("products/").await.expect("refreshed");

    assert_eq!(resp.data["served_with"], json!("access-2"));
    assert_eq!(Backend::count(&backend.calls.refresh), 1);
    assert_eq!(backend.refresh_bodies.lock()[0], json!(null));
    assert!(backend.refresh_cookies.lock()[0].contains(mock_backend::REFRESH_COOKIE));
}

#[tokio::test]
async fn dropped_leader_rejects_waiters() {
    let (backend, base) = spawn(BackendConfig {
        refresh_delay: Duration::from_secs(5),
        ..Default::default()
    })
    .await;
    let client = client(&base, AppVariant::Consumer);
    seed(&client, Some("expired"), Some("refresh-1"));

    let leader = {
        let http = Arc::clone(&client.http);
        tokio::spawn(async move { http.get("products/").await })
    };
    wait_until(|| client.http.is_refreshing()).await;

    let waiter = {
        let http = Arc::clone(&client.http);
        tokio::spawn(async move { http.get("products/").await })
    };
    wait_until(|| client.http.refresh_waiters() == 1).await;

    leader.abort();
    let result = waiter.await.expect("waiter task");

    assert_eq!(result, Err(ApiError::Abandoned));
    assert!(!client.http.is_refreshing());
    assert_eq!(Backend::count(&backend.calls.refresh), 1);
}

#[tokio::test]
async fn bus_stays_locked_until_unlocked() {
    let (_backend, base) = spawn(BackendConfig { refresh_access: None, ..Default::default() }).await;
    let client = client(&base, AppVariant::Consumer);
    let prompts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&prompts);
    client.events.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    for _ in 0..2 {
        seed(&client, Some("expired"), Some("revoked"));
        client.http.get("orders/").await.expect_err("terminal");
    }
    assert_eq!(prompts.load(Ordering::SeqCst), 1);

    client.events.unlock();
    seed(&client, Some("expired"), Some("revoked"));
    client.http.get("orders/").await.expect_err("terminal");
    assert_eq!(prompts.load(Ordering::SeqCst), 2);
}
