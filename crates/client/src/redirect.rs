// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot "resume this after login" intent.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::store::LocalStore;

pub const REDIRECT_KEY: &str = "post_login_redirect_v1";

/// Intent type that resumes checkout and triggers a guest cart merge.
pub const CART_CHECKOUT: &str = "CART_CHECKOUT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectIntent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl RedirectIntent {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self { kind: kind.into(), payload }
    }

    pub fn cart_checkout(mall_id: &str) -> Self {
        Self::new(CART_CHECKOUT, json!({ "mall_id": mall_id }))
    }

    pub fn is_cart_checkout(&self) -> bool {
        self.kind == CART_CHECKOUT
    }

    /// `payload.mall_id`, accepting numeric ids.
    pub fn mall_id(&self) -> Option<String> {
        match self.payload.get("mall_id")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct PostLoginRedirect {
    store: Arc<dyn LocalStore>,
}

impl PostLoginRedirect {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    pub fn set(&self, intent: &RedirectIntent) -> anyhow::Result<()> {
        self.store.set(REDIRECT_KEY, &serde_json::to_string(intent)?)
    }

    /// The stored intent. Unreadable or corrupt data reads as none.
    pub fn get(&self) -> Option<RedirectIntent> {
        let raw = match self.store.get(REDIRECT_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("redirect intent read failed: {e:#}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(intent) => Some(intent),
            Err(e) => {
                warn!("redirect intent corrupt, ignoring: {e}");
                None
            }
        }
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        self.store.delete(REDIRECT_KEY)
    }

    /// Read and clear. A failed clear is logged; the intent is still returned
    /// so it is acted on at most once per process.
    pub fn take(&self) -> Option<RedirectIntent> {
        let intent = self.get();
        if let Err(e) = self.clear() {
            warn!("redirect intent clear failed: {e:#}");
        }
        intent
    }
}

impl std::fmt::Debug for PostLoginRedirect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostLoginRedirect").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "redirect_tests.rs"]
mod tests;
