// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::store::MemoryStore;

fn redirect() -> (PostLoginRedirect, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (PostLoginRedirect::new(store.clone()), store)
}

#[test]
fn take_consumes_exactly_once() -> anyhow::Result<()> {
    let (redirect, store) = redirect();
    redirect.set(&RedirectIntent::cart_checkout("M1"))?;

    let intent = redirect.take().ok_or_else(|| anyhow::anyhow!("missing intent"))?;
    assert!(intent.is_cart_checkout());
    assert_eq!(intent.mall_id().as_deref(), Some("M1"));

    assert_eq!(redirect.take(), None);
    assert!(store.is_empty());
    Ok(())
}

#[test]
fn wire_format_uses_type_key() -> anyhow::Result<()> {
    let (redirect, store) = redirect();
    redirect.set(&RedirectIntent::cart_checkout("4"))?;
    let raw = store.get(REDIRECT_KEY)?.unwrap_or_default();
    let value: Value = serde_json::from_str(&raw)?;
    assert_eq!(value, json!({ "type": "CART_CHECKOUT", "payload": { "mall_id": "4" } }));
    Ok(())
}

#[test]
fn numeric_mall_id_is_accepted() {
    let intent = RedirectIntent::new(CART_CHECKOUT, json!({ "mall_id": 12 }));
    assert_eq!(intent.mall_id().as_deref(), Some("12"));
    assert_eq!(RedirectIntent::new("ORDER_DETAIL", json!(null)).mall_id(), None);
}

#[test]
fn corrupt_intent_reads_as_none() -> anyhow::Result<()> {
    let (redirect, store) = redirect();
    store.set(REDIRECT_KEY, "CART_CHECKOUT")?;
    assert_eq!(redirect.get(), None);
    Ok(())
}

#[test]
fn set_overwrites() -> anyhow::Result<()> {
    let (redirect, _) = redirect();
    redirect.set(&RedirectIntent::cart_checkout("M1"))?;
    redirect.set(&RedirectIntent::new("ORDER_DETAIL", json!({ "order_id": 5 })))?;
    assert_eq!(redirect.get().map(|i| i.kind), Some("ORDER_DETAIL".to_owned()));
    Ok(())
}
