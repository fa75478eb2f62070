// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;

#[yare::parameterized(
    consumer_login = { "accounts/login/", true },
    admin_login = { "/accounts/admin/login/", true },
    body_refresh = { "accounts/token/refresh/", true },
    cookie_refresh = { "accounts/admin/token/refresh/", true },
    signup = { "accounts/signup/management/", true },
    register = { "accounts/register/", true },
    me = { "accounts/me/", true },
    admin_me = { "accounts/admin/me/?fields=roles", true },
    products = { "products/", false },
    merge_is_not_me = { "cart/merge-guest/", false },
    malls_named_meadow = { "malls/meadow/", false },
    logout = { "accounts/logout/", false },
)]
fn auth_endpoint_detection(path: &str, expected: bool) {
    assert_eq!(is_auth_path(path), expected);
    assert_eq!(ApiRequest::get(path).is_auth_endpoint(), expected);
}

#[test]
fn only_non_silent_gets_are_replayable() {
    assert!(ApiRequest::get("orders/").is_replayable());
    assert!(!ApiRequest::get("orders/").silent().is_replayable());
    assert!(!ApiRequest::post("orders/", json!({})).is_replayable());
    assert!(!ApiRequest::patch("cart/item/update/", json!({})).is_replayable());
    assert!(!ApiRequest::delete("cart/clear/").is_replayable());
}

#[test]
fn builder_collects_parts() {
    let req = ApiRequest::get("products/")
        .query("mall", "3")
        .query("q", "rice")
        .header("X-Client", "paymall")
        .silent();
    assert_eq!(req.method(), &Method::GET);
    assert_eq!(req.path(), "products/");
    assert_eq!(req.query_pairs().len(), 2);
    assert_eq!(req.headers()[0].0, "X-Client");
    assert!(req.is_silent());
    assert!(!req.is_retried());
    assert!(req.body().is_none());
}

#[test]
fn pending_descriptor_round_trip_resets_flags() -> Result<(), ApiError> {
    let mut req = ApiRequest::get("orders/").query("page", "2");
    req.mark_retried();

    let pending = req.to_pending("http://localhost:8000/api/");
    assert_eq!(pending.method, "GET");
    assert_eq!(pending.url, "orders/");
    assert_eq!(pending.base_url, "http://localhost:8000/api/");

    let replay = ApiRequest::from_pending(&pending)?;
    assert_eq!(replay.path(), "orders/");
    assert_eq!(replay.query_pairs(), req.query_pairs());
    assert!(!replay.is_retried());
    Ok(())
}

#[test]
fn from_pending_rejects_invalid_method() {
    let mut pending = ApiRequest::get("orders/").to_pending("http://x/");
    pending.method = "GE T".to_owned();
    assert!(matches!(ApiRequest::from_pending(&pending), Err(ApiError::Decode(_))));
}
