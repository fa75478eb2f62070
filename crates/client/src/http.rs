// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated API client with transparent access token refresh.
//!
//! Every request carries the stored access token as a bearer credential.
//! A failed response walks the recovery rules in order:
//!
//! 1. transport failure: reject
//! 2. silent request answered 401: reject, nobody is told
//! 3. auth endpoint (login, refresh, signup, me): reject
//! 4. anything but 401: reject
//! 5. already retried: reject
//! 6. refresh in flight: wait for it, then retry with its outcome; a refresh
//!    that settled after the request was sent is not repeated
//! 7. otherwise lead a single refresh, then retry
//!
//! A rejected refresh in step 7 clears credentials, parks a replayable
//! request in the [`PendingRequestCache`] and raises the [`AuthEventBus`].
//! An unreachable refresh endpoint only fails the requests involved.

pub mod envelope;
pub mod refresh;
pub mod request;

use std::sync::Arc;

use tracing::{debug, info, warn};

pub use envelope::ApiResponse;
pub use request::ApiRequest;

use crate::config::{join_url, ClientConfig, Endpoints, RefreshMode};
use crate::error::ApiError;
use crate::events::{AuthEventBus, AuthReason, AuthRequired};
use crate::pending::PendingRequestCache;
use crate::token::{TokenKind, TokenStore};
use refresh::{RefreshCoordinator, RefreshGuard, Ticket};

pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    endpoints: Endpoints,
    refresh_mode: RefreshMode,
    tokens: TokenStore,
    events: Arc<AuthEventBus>,
    pending: Arc<PendingRequestCache>,
    refresh: RefreshCoordinator,
}

impl HttpClient {
    pub fn new(
        config: &ClientConfig,
        tokens: TokenStore,
        events: Arc<AuthEventBus>,
        pending: Arc<PendingRequestCache>,
    ) -> anyhow::Result<Self> {
        crate::ensure_crypto();
        config.validate()?;
        // No timeout: the transport default applies.
        let client = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            client,
            base_url: config.api_url.clone(),
            endpoints: config.endpoints(),
            refresh_mode: config.refresh_mode(),
            tokens,
            events,
            pending,
            refresh: RefreshCoordinator::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn refresh_mode(&self) -> RefreshMode {
        self.refresh_mode
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn events(&self) -> &Arc<AuthEventBus> {
        &self.events
    }

    pub fn pending(&self) -> &Arc<PendingRequestCache> {
        &self.pending
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh.is_refreshing()
    }

    pub fn refresh_waiters(&self) -> usize {
        self.refresh.waiter_count()
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post(&self, path: &str, body: serde_json::Value) -> Result<ApiResponse, ApiError> {
        self.send(ApiRequest::post(path, body)).await
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let generation = self.refresh.generation();
        let sent_with = self.tokens.read(TokenKind::Access);
        match self.dispatch(&request, sent_with.as_deref()).await {
            Ok(resp) => Ok(resp),
            Err(err) => self.recover(request, sent_with, generation, err).await,
        }
    }

    /// Re-issue the request parked by the last terminal auth failure, if any.
    /// The slot is consumed either way.
    pub async fn replay_pending(&self) -> Result<Option<ApiResponse>, ApiError> {
        let Some(pending) = self.pending.take() else {
            return Ok(None);
        };
        if pending.base_url != self.base_url {
            warn!(stored = %pending.base_url, current = %self.base_url, "pending request base url changed");
        }
        let request = ApiRequest::from_pending(&pending)?;
        debug!(method = %request.method(), path = request.path(), "replaying pending request");
        self.send(request).await.map(Some)
    }

    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> Result<ApiResponse, ApiError> {
        let url = join_url(&self.base_url, request.path());
        let mut builder = self.client.request(request.method().clone(), &url);
        if !request.query_pairs().is_empty() {
            builder = builder.query(request.query_pairs());
        }
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(ApiError::from_reqwest)?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await.map_err(ApiError::from_reqwest)?;
        let body = envelope::parse_body(&bytes);
        debug!(method = %request.method(), path = request.path(), status, "api response");
        if !(200..300).contains(&status) {
            return Err(ApiError::from_status(status, body));
        }
        envelope::normalize(status, body)
    }

    async fn recover(
        &self,
        mut request: ApiRequest,
        sent_with: Option<String>,
        generation: u64,
        err: ApiError,
    ) -> Result<ApiResponse, ApiError> {
        if err.is_transport()
            || (request.is_silent() && err.is_unauthorized())
            || request.is_auth_endpoint()
            || !err.is_unauthorized()
            || request.is_retried()
        {
            return Err(err);
        }
        request.mark_retried();

        let current = self.tokens.read(TokenKind::Access);
        if current.is_some() && current != sent_with {
            debug!(path = request.path(), "credential replaced while in flight, retrying");
            return self.dispatch(&request, current.as_deref()).await;
        }

        match self.refresh.join(generation) {
            Ticket::Waiter(rx) => match rx.await {
                Ok(Ok(token)) => self.retry(&request, token).await,
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ApiError::Abandoned),
            },
            // Tokens are persisted before the refresh settles, so this read sees them.
            Ticket::Settled => match self.tokens.read(TokenKind::Access) {
                Some(token) => self.dispatch(&request, Some(&token)).await,
                None => Err(err),
            },
            Ticket::Leader(guard) => self.lead_refresh(guard, &request, err).await,
        }
    }

    async fn retry(&self, request: &ApiRequest, token: Option<String>) -> Result<ApiResponse, ApiError> {
        let token = token.or_else(|| self.tokens.read(TokenKind::Access));
        self.dispatch(request, token.as_deref()).await
    }

    async fn lead_refresh(
        &self,
        guard: RefreshGuard<'_>,
        request: &ApiRequest,
        original: ApiError,
    ) -> Result<ApiResponse, ApiError> {
        let refresh_token = match self.refresh_mode {
            RefreshMode::Body => match self.tokens.read(TokenKind::Refresh) {
                Some(token) => Some(token),
                None => {
                    if let Err(e) = self.tokens.delete(TokenKind::Access) {
                        warn!("failed to delete access token: {e:#}");
                    }
                    self.fail_terminal(request, AuthReason::MissingRefreshToken);
                    let drained = guard.settle(Err(original.clone()));
                    info!(waiters = drained, "no refresh token, session ended");
                    return Err(original);
                }
            },
            RefreshMode::Cookie => None,
        };

        let url = join_url(&self.base_url, &self.endpoints.refresh);
        match refresh::exchange(&self.client, &url, self.refresh_mode, refresh_token.as_deref()).await {
            Ok(fresh) => {
                if let Some(ref access) = fresh.access {
                    if let Err(e) = self.tokens.set(TokenKind::Access, access) {
                        warn!("failed to persist refreshed access token: {e:#}");
                    }
                }
                if let Some(ref rotated) = fresh.refresh {
                    if let Err(e) = self.tokens.set(TokenKind::Refresh, rotated) {
                        warn!("failed to persist rotated refresh token: {e:#}");
                    }
                }
                let token = fresh.access.or_else(|| self.tokens.read(TokenKind::Access));
                let resolved = guard.settle(Ok(token.clone()));
                info!(waiters = resolved, rotated = fresh.refresh.is_some(), "access token refreshed");
                self.dispatch(request, token.as_deref()).await
            }
            Err(e) if e.is_transport() => {
                let rejected = guard.settle(Err(e.clone()));
                warn!(waiters = rejected, err = %e, "token refresh unreachable, keeping credentials");
                Err(e)
            }
            Err(e) => {
                self.tokens.clear();
                self.fail_terminal(request, AuthReason::RefreshFailed);
                let rejected = guard.settle(Err(e.clone()));
                warn!(waiters = rejected, err = %e, "token refresh failed, session ended");
                Err(e)
            }
        }
    }

    fn fail_terminal(&self, request: &ApiRequest, reason: AuthReason) {
        if request.is_replayable() {
            self.pending.set(request.to_pending(&self.base_url));
        }
        let delivered = self.events.emit(AuthRequired::new(reason));
        debug!(%reason, delivered, "auth required raised");
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("refresh_mode", &self.refresh_mode)
            .field("refreshing", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}
