// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight access token refresh.
//!
//! The first request to hit a 401 becomes the leader and performs the one
//! network refresh; every request that 401s while it is outstanding becomes
//! a waiter and receives the leader's outcome through a oneshot channel.
//!
//! Every settled refresh bumps a generation counter. A request that captured
//! an older generation before it was sent joins as [`Ticket::Settled`] and
//! retries with whatever is stored, instead of starting a second refresh.

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::RefreshMode;
use crate::error::ApiError;
use crate::http::envelope;

/// What a waiter is settled with: the access token to retry with (`None`
/// means "whatever is stored now"), or the error to reject with.
pub type RefreshOutcome = Result<Option<String>, ApiError>;

#[derive(Debug, Default)]
struct RefreshState {
    in_flight: bool,
    generation: u64,
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
}

/// `IDLE` / `REFRESHING` state plus the waiter queue, one per client.
#[derive(Debug, Default)]
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

/// Role assigned by [`RefreshCoordinator::join`].
pub enum Ticket<'a> {
    /// Caller must perform the refresh and settle the guard.
    Leader(RefreshGuard<'a>),
    /// A refresh is already outstanding; await its outcome.
    Waiter(oneshot::Receiver<RefreshOutcome>),
    /// A refresh settled after the caller's request was sent.
    Settled,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation to capture before sending a request, for a later [`join`].
    ///
    /// [`join`]: RefreshCoordinator::join
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Atomically become the leader, enqueue behind the current one, or learn
    /// that a refresh settled since `seen` was captured.
    pub fn join(&self, seen: u64) -> Ticket<'_> {
        let mut state = self.state.lock();
        if state.in_flight {
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            debug!(waiters = state.waiters.len(), "refresh in flight, queued");
            return Ticket::Waiter(rx);
        }
        if state.generation != seen {
            debug!(seen, current = state.generation, "refresh already settled");
            return Ticket::Settled;
        }
        state.in_flight = true;
        debug!("refresh started");
        Ticket::Leader(RefreshGuard { coordinator: self, settled: false })
    }

    pub fn is_refreshing(&self) -> bool {
        self.state.lock().in_flight
    }

    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    fn finish(&self, outcome: &RefreshOutcome) -> usize {
        let waiters = {
            let mut state = self.state.lock();
            state.in_flight = false;
            state.generation = state.generation.wrapping_add(1);
            std::mem::take(&mut state.waiters)
        };
        let count = waiters.len();
        for tx in waiters {
            // A waiter whose request was dropped has nothing to settle.
            let _ = tx.send(outcome.clone());
        }
        count
    }
}

/// Held by the leader. Dropping it unsettled rejects every waiter with
/// [`ApiError::Abandoned`] and returns the coordinator to idle.
pub struct RefreshGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl RefreshGuard<'_> {
    /// Publish the outcome to waiters in enqueue order. Returns how many
    /// waiters were settled.
    pub fn settle(mut self, outcome: RefreshOutcome) -> usize {
        self.settled = true;
        self.coordinator.finish(&outcome)
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let count = self.coordinator.finish(&Err(ApiError::Abandoned));
            debug!(waiters = count, "refresh abandoned");
        }
    }
}

/// Credentials returned by the refresh endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RefreshedTokens {
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Perform the refresh call.
///
/// Body mode posts `{"refresh": <token>}` and requires an `access` back.
/// Cookie mode posts nothing; the jar carries the credential.
pub async fn exchange(
    client: &reqwest::Client,
    url: &str,
    mode: RefreshMode,
    refresh_token: Option<&str>,
) -> Result<RefreshedTokens, ApiError> {
    let request = match (mode, refresh_token) {
        (RefreshMode::Body, Some(token)) => client.post(url).json(&json!({ "refresh": token })),
        (RefreshMode::Body, None) => {
            return Err(ApiError::Decode("no refresh token to exchange".to_owned()));
        }
        (RefreshMode::Cookie, _) => client.post(url),
    };
    let resp = request.send().await.map_err(ApiError::from_reqwest)?;
    let status = resp.status().as_u16();
    let bytes = resp.bytes().await.map_err(ApiError::from_reqwest)?;
    let body = envelope::parse_body(&bytes);
    if !resp_ok(status) {
        return Err(ApiError::from_status(status, body));
    }

    let tokens: RefreshedTokens = envelope::normalize(status, body)?.json_or_default()?;
    let tokens = RefreshedTokens {
        access: tokens.access.filter(|t| !t.is_empty()),
        refresh: tokens.refresh.filter(|t| !t.is_empty()),
    };
    if mode == RefreshMode::Body && tokens.access.is_none() {
        return Err(ApiError::Decode("refresh response has no access token".to_owned()));
    }
    Ok(tokens)
}

fn resp_ok(status: u16) -> bool {
    (200..300).contains(&status)
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
