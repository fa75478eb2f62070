// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! "Authentication required" notifications for the UI layer.
//!
//! The bus is single-slot: the first [`AuthEventBus::emit`] takes the lock and
//! reaches every listener; further emissions are dropped until a listener (or
//! anyone else) calls [`AuthEventBus::unlock`]. Many requests failing at once
//! therefore raise one login prompt, not one per request.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Why the UI is being asked to authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthReason {
    MissingRefreshToken,
    RefreshFailed,
    SessionExpired,
}

impl AuthReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingRefreshToken => "missing_refresh_token",
            Self::RefreshFailed => "refresh_failed",
            Self::SessionExpired => "session_expired",
        }
    }
}

impl std::fmt::Display for AuthReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload delivered to listeners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequired {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<AuthReason>,
}

impl AuthRequired {
    pub fn new(reason: AuthReason) -> Self {
        Self { reason: Some(reason) }
    }
}

/// Handle returned by [`AuthEventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&AuthRequired) + Send + Sync>;

#[derive(Default)]
pub struct AuthEventBus {
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_id: AtomicU64,
    locked: AtomicBool,
}

impl AuthEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&AuthRequired) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Deliver `event` to every listener in subscription order, unless the
    /// lock is already held. Returns whether the event was delivered.
    pub fn emit(&self, event: AuthRequired) -> bool {
        if self.locked.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            debug!(reason = ?event.reason, "auth required suppressed: prompt already pending");
            return false;
        }
        // Snapshot so listeners may unlock, subscribe or unsubscribe re-entrantly.
        let listeners: Vec<Listener> =
            self.listeners.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        debug!(reason = ?event.reason, listeners = listeners.len(), "auth required");
        for listener in listeners {
            listener(&event);
        }
        true
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Clear the lock and drop every listener.
    pub fn reset(&self) {
        self.listeners.lock().clear();
        self.unlock();
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl std::fmt::Debug for AuthEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthEventBus")
            .field("listeners", &self.subscriber_count())
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
