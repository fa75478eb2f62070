// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signed-in user state machine.
//!
//! `Bootstrapping` until [`SessionController::restore_session`] settles it,
//! then `Anonymous` / `Authenticated` via login, register and logout.
//! Where accounts need approval, a signed-in user without roles parks in
//! `PendingApproval` until [`SessionController::refresh_profile`] sees roles.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cart::{GuestCartStore, MergeReport};
use crate::config::{RefreshMode, RegistrationMode};
use crate::error::ApiError;
use crate::events::{AuthReason, AuthRequired};
use crate::http::{ApiRequest, HttpClient};
use crate::profile::UserProfile;
use crate::redirect::{PostLoginRedirect, RedirectIntent};
use crate::token::{self, ExpiryStatus, TokenKind};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Bootstrapping,
    Anonymous,
    PendingApproval,
    Authenticated(UserProfile),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            Self::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bootstrapping => "bootstrapping",
            Self::Anonymous => "anonymous",
            Self::PendingApproval => "pending_approval",
            Self::Authenticated(_) => "authenticated",
        }
    }
}

/// Advisory events from the expiry watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionNotice {
    ExpiringSoon { remaining_secs: u64 },
    Expired,
}

/// Sign-up form fields.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub password2: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Registration {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        let password = password.into();
        Self { email: email.into(), password2: password.clone(), password, username: None, name: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginOutcome {
    pub user: UserProfile,
    /// The post-login intent consumed by this login, for the UI to act on.
    pub redirect: Option<RedirectIntent>,
    pub merges: Vec<MergeReport>,
    /// Signed in, but the account has no roles yet.
    pub pending_approval: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationOutcome {
    Authenticated(LoginOutcome),
    PendingApproval,
}

#[derive(Debug, Default, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    access: Option<String>,
    #[serde(default)]
    refresh: Option<String>,
    #[serde(default)]
    user: Option<UserProfile>,
}

pub struct SessionController {
    http: Arc<HttpClient>,
    carts: GuestCartStore,
    redirect: PostLoginRedirect,
    registration_mode: RegistrationMode,
    state: watch::Sender<SessionState>,
    notices: broadcast::Sender<SessionNotice>,
}

impl SessionController {
    pub fn new(
        http: Arc<HttpClient>,
        carts: GuestCartStore,
        redirect: PostLoginRedirect,
        registration_mode: RegistrationMode,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Bootstrapping);
        let (notices, _) = broadcast::channel(16);
        Self { http, carts, redirect, registration_mode, state, notices }
    }

    pub fn http(&self) -> &Arc<HttpClient> {
        &self.http
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.state.borrow().user().cloned()
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        let now = self.state.borrow();
        if prev.as_str() != now.as_str() {
            info!(from = prev.as_str(), to = now.as_str(), "session state changed");
        }
    }

    /// Settle the launch state from whatever credentials are on disk.
    /// Failures are swallowed and leave the session anonymous.
    pub async fn restore_session(&self) -> SessionState {
        let has_token = self.http.tokens().read(TokenKind::Access).is_some();
        if !has_token && self.http.refresh_mode() == RefreshMode::Body {
            debug!("no stored access token");
            self.set_state(SessionState::Anonymous);
            return self.state();
        }
        match self.fetch_profile().await {
            Ok(user) => self.set_state(self.signed_in(user)),
            Err(e) => {
                debug!(err = %e, "session restore failed");
                self.http.tokens().clear();
                self.set_state(SessionState::Anonymous);
            }
        }
        self.state()
    }

    pub async fn login(&self, identifier: &str, secret: &str) -> Result<LoginOutcome, ApiError> {
        let path = self.http.endpoints().login.clone();
        let body = json!({ "email": identifier, "password": secret });
        let result = match self.http.send(ApiRequest::post(path, body)).await {
            Ok(resp) => match resp.json_or_default::<AuthResponse>() {
                Ok(auth) => self.establish(auth).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        result.inspect_err(|e| self.abort_authentication(e))
    }

    pub async fn register(&self, registration: &Registration) -> Result<RegistrationOutcome, ApiError> {
        let path = self.http.endpoints().register.clone();
        let body = serde_json::to_value(registration).map_err(|e| ApiError::Decode(e.to_string()))?;
        let resp = self.http.send(ApiRequest::post(path, body)).await?;

        if self.registration_mode == RegistrationMode::Approval {
            info!(email = %registration.email, "registration submitted for approval");
            self.set_state(SessionState::PendingApproval);
            return Ok(RegistrationOutcome::PendingApproval);
        }

        let auth = resp.json_or_default::<AuthResponse>()?;
        if auth.access.is_none() && self.http.refresh_mode() == RefreshMode::Body {
            debug!("registration issued no tokens, signing in");
            return self.login(&registration.email, &registration.password).await.map(RegistrationOutcome::Authenticated);
        }
        self.establish(auth)
            .await
            .map(RegistrationOutcome::Authenticated)
            .inspect_err(|e| self.abort_authentication(e))
    }

    /// Best-effort server logout, then unconditional local sign-out.
    pub async fn logout(&self) {
        let path = self.http.endpoints().logout.clone();
        let request = match (self.http.refresh_mode(), self.http.tokens().read(TokenKind::Refresh)) {
            (RefreshMode::Body, Some(refresh)) => Some(ApiRequest::post(path, json!({ "refresh": refresh }))),
            (RefreshMode::Body, None) => None,
            (RefreshMode::Cookie, _) => Some(ApiRequest::post(path, json!({}))),
        };
        if let Some(request) = request {
            if let Err(e) = self.http.send(request.silent()).await {
                debug!(err = %e, "server logout failed");
            }
        }
        self.http.tokens().clear();
        self.http.pending().clear();
        self.set_state(SessionState::Anonymous);
    }

    /// Silently re-fetch the profile. Failures are swallowed.
    pub async fn refresh_profile(&self) -> Option<UserProfile> {
        let user = match self.fetch_profile().await {
            Ok(user) => user,
            Err(e) => {
                debug!(err = %e, "profile refresh failed");
                return None;
            }
        };
        match self.state() {
            SessionState::Authenticated(_) => self.set_state(self.signed_in(user.clone())),
            SessionState::PendingApproval => {
                let next = self.signed_in(user.clone());
                if next.is_authenticated() {
                    info!(user_id = %user.id, "account approved");
                }
                self.set_state(next);
            }
            _ => {}
        }
        Some(user)
    }

    pub fn expiry_status(&self) -> ExpiryStatus {
        match self.http.tokens().read(TokenKind::Access) {
            Some(access) => token::expiry_status(&access, token::epoch_secs()),
            None => ExpiryStatus::Unknown,
        }
    }

    /// Poll the access token's expiry while authenticated. Publishes one
    /// [`SessionNotice::ExpiringSoon`] per token inside the warning window;
    /// at expiry signs out and raises `session_expired`.
    pub fn spawn_expiry_watch(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut warned = false;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if !session.state().is_authenticated() {
                    warned = false;
                    continue;
                }
                match session.expiry_status() {
                    ExpiryStatus::ExpiringSoon { remaining_secs } => {
                        if !warned {
                            warned = true;
                            info!(remaining_secs, "session expiring soon");
                            let _ = session.notices.send(SessionNotice::ExpiringSoon { remaining_secs });
                        }
                    }
                    ExpiryStatus::Expired => {
                        warned = false;
                        session.expire().await;
                    }
                    ExpiryStatus::Valid { .. } => warned = false,
                    ExpiryStatus::Unknown => {}
                }
            }
            debug!("expiry watch stopped");
        })
    }

    async fn expire(&self) {
        warn!("access token expired, signing out");
        self.logout().await;
        let _ = self.notices.send(SessionNotice::Expired);
        self.http.events().emit(AuthRequired::new(AuthReason::SessionExpired));
    }

    async fn fetch_profile(&self) -> Result<UserProfile, ApiError> {
        let path = self.http.endpoints().me.clone();
        let resp = self.http.send(ApiRequest::get(path).silent()).await?;
        profile_from(resp.data)
    }

    async fn establish(&self, auth: AuthResponse) -> Result<LoginOutcome, ApiError> {
        self.store_tokens(&auth)?;
        let user = match auth.user {
            Some(user) => user,
            None => self.fetch_profile().await?,
        };
        Ok(self.complete_authentication(user).await)
    }

    fn store_tokens(&self, auth: &AuthResponse) -> Result<(), ApiError> {
        let tokens = self.http.tokens();
        match auth.access.as_deref().filter(|t| !t.is_empty()) {
            Some(access) => tokens.set(TokenKind::Access, access).map_err(ApiError::storage)?,
            None if self.http.refresh_mode() == RefreshMode::Body => {
                return Err(ApiError::Decode("login response has no access token".to_owned()));
            }
            None => {}
        }
        if let Some(refresh) = auth.refresh.as_deref().filter(|t| !t.is_empty()) {
            tokens.set(TokenKind::Refresh, refresh).map_err(ApiError::storage)?;
        }
        Ok(())
    }

    /// State for a signed-in `user`: approval-gated accounts without roles
    /// wait in `PendingApproval`.
    fn signed_in(&self, user: UserProfile) -> SessionState {
        if self.registration_mode == RegistrationMode::Approval && user.roles.is_empty() {
            SessionState::PendingApproval
        } else {
            SessionState::Authenticated(user)
        }
    }

    async fn complete_authentication(&self, user: UserProfile) -> LoginOutcome {
        let next = self.signed_in(user.clone());
        if !next.is_authenticated() {
            // Tokens stay so refresh_profile can pick up the approval.
            self.http.events().unlock();
            info!(user_id = %user.id, "signed in, awaiting approval");
            self.set_state(next);
            return LoginOutcome { user, redirect: None, merges: Vec::new(), pending_approval: true };
        }

        let redirect = self.redirect.take();
        let mut merges = Vec::new();
        if let Some(intent) = redirect.as_ref().filter(|i| i.is_cart_checkout()) {
            let malls: Vec<String> = match intent.mall_id() {
                Some(mall_id) => vec![mall_id],
                None => self.carts.get_all().into_keys().collect(),
            };
            for mall_id in malls {
                match self.carts.merge_into_server(&self.http, &mall_id).await {
                    Ok(report) => merges.push(report),
                    Err(e) => warn!(mall_id, "guest cart merge failed: {e:#}"),
                }
            }
        }

        self.http.events().unlock();
        info!(user_id = %user.id, redirect = ?redirect.as_ref().map(|r| &r.kind), "signed in");
        self.set_state(next);
        LoginOutcome { user, redirect, merges, pending_approval: false }
    }

    fn abort_authentication(&self, err: &ApiError) {
        debug!(err = %err, "authentication failed, clearing partial state");
        self.http.tokens().clear();
        self.set_state(SessionState::Anonymous);
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state.borrow().as_str())
            .field("registration_mode", &self.registration_mode)
            .finish_non_exhaustive()
    }
}

/// Profiles arrive bare or wrapped as `{"user": {...}}`.
fn profile_from(data: Value) -> Result<UserProfile, ApiError> {
    let data = match data {
        Value::Object(mut map) if map.get("user").is_some_and(Value::is_object) => {
            map.remove("user").unwrap_or(Value::Null)
        }
        other => other,
    };
    serde_json::from_value(data).map_err(|e| ApiError::Decode(format!("profile: {e}")))
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
