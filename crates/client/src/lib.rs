// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PayMall client core: token session, single-flight refresh, login-required
//! interrupt and guest cart reconciliation.

pub mod cart;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod pending;
pub mod profile;
pub mod redirect;
pub mod session;
pub mod store;
pub mod token;

use std::sync::{Arc, Once};

use crate::cart::GuestCartStore;
use crate::config::ClientConfig;
use crate::events::AuthEventBus;
use crate::http::HttpClient;
use crate::pending::PendingRequestCache;
use crate::redirect::PostLoginRedirect;
use crate::session::SessionController;
use crate::store::{FileStore, LocalStore};
use crate::token::TokenStore;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls. Only the first call
/// has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Every long-lived piece of the core, wired together.
#[derive(Debug, Clone)]
pub struct Client {
    pub config: ClientConfig,
    pub events: Arc<AuthEventBus>,
    pub pending: Arc<PendingRequestCache>,
    pub http: Arc<HttpClient>,
    pub session: Arc<SessionController>,
    pub carts: GuestCartStore,
    pub redirect: PostLoginRedirect,
}

impl Client {
    /// Open the client with file-backed state under the configured state dir:
    /// `tokens.json` for credentials, `storage.json` for carts and intents.
    pub fn open(config: ClientConfig) -> anyhow::Result<Self> {
        let dir = config.state_dir();
        let secure: Arc<dyn LocalStore> = Arc::new(FileStore::open(dir.join("tokens.json")));
        let local: Arc<dyn LocalStore> = Arc::new(FileStore::open(dir.join("storage.json")));
        Self::with_stores(config, secure, local)
    }

    /// Build the client over caller-provided stores. `secure` holds the token
    /// slots; `local` holds guest carts and the redirect intent.
    pub fn with_stores(
        config: ClientConfig,
        secure: Arc<dyn LocalStore>,
        local: Arc<dyn LocalStore>,
    ) -> anyhow::Result<Self> {
        let events = Arc::new(AuthEventBus::new());
        let pending = Arc::new(PendingRequestCache::new());
        let tokens = TokenStore::new(secure);
        let http = Arc::new(HttpClient::new(&config, tokens, Arc::clone(&events), Arc::clone(&pending))?);
        let carts = GuestCartStore::new(Arc::clone(&local));
        let redirect = PostLoginRedirect::new(local);
        let session = Arc::new(SessionController::new(
            Arc::clone(&http),
            carts.clone(),
            redirect.clone(),
            config.registration_mode(),
        ));
        Ok(Self { config, events, pending, http, session, carts, redirect })
    }
}
