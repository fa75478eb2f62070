// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The one request the user was trying to make when their session ran out.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything needed to re-issue a request after login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub params: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    pub base_url: String,
}

/// Single-slot holder; a newer failure overwrites an older one.
///
/// Only GET, non-silent requests may be stored: writes are never replayed.
#[derive(Debug, Default)]
pub struct PendingRequestCache {
    slot: Mutex<Option<PendingRequest>>,
}

impl PendingRequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, request: PendingRequest) {
        tracing::debug!(method = %request.method, url = %request.url, "pending request stored");
        *self.slot.lock() = Some(request);
    }

    pub fn get(&self) -> Option<PendingRequest> {
        self.slot.lock().clone()
    }

    pub fn has(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn clear(&self) {
        self.slot.lock().take();
    }

    /// Remove and return the stored request.
    pub fn take(&self) -> Option<PendingRequest> {
        self.slot.lock().take()
    }
}

#[cfg(test)]
#[path = "pending_tests.rs"]
mod tests;
