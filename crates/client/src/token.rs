// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Access/refresh token slots and expiry inspection.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tracing::warn;

use crate::store::LocalStore;

/// How close to expiry a token counts as "expiring soon".
pub const EXPIRY_WARNING: Duration = Duration::from_secs(120);

/// The two persisted credential slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Access => "accessToken",
            Self::Refresh => "refreshToken",
        }
    }
}

/// Keyed token persistence. Performs no validation.
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn LocalStore>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, kind: TokenKind) -> anyhow::Result<Option<String>> {
        self.store.get(kind.key())
    }

    pub fn set(&self, kind: TokenKind, value: &str) -> anyhow::Result<()> {
        self.store.set(kind.key(), value)
    }

    pub fn delete(&self, kind: TokenKind) -> anyhow::Result<()> {
        self.store.delete(kind.key())
    }

    /// Read a token, treating store errors and empty values as "no token".
    pub fn read(&self, kind: TokenKind) -> Option<String> {
        match self.get(kind) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(slot = kind.key(), "token store read failed: {e:#}");
                None
            }
        }
    }

    /// Delete both slots, logging (not returning) store errors.
    pub fn clear(&self) {
        for kind in [TokenKind::Access, TokenKind::Refresh] {
            if let Err(e) = self.delete(kind) {
                warn!(slot = kind.key(), "token store delete failed: {e:#}");
            }
        }
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").finish_non_exhaustive()
    }
}

/// Where an access token stands relative to its `exp` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryStatus {
    Valid { remaining_secs: u64 },
    ExpiringSoon { remaining_secs: u64 },
    Expired,
    /// No token, or no decodable `exp` claim.
    Unknown,
}

/// Decode the `exp` claim (epoch seconds) of a JWT without verifying it.
pub fn token_expiry(token: &str) -> Option<u64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?;
    exp.as_u64().or_else(|| exp.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64))
}

pub fn expiry_status(token: &str, now_secs: u64) -> ExpiryStatus {
    let Some(exp) = token_expiry(token) else {
        return ExpiryStatus::Unknown;
    };
    if exp <= now_secs {
        return ExpiryStatus::Expired;
    }
    let remaining_secs = exp - now_secs;
    if remaining_secs <= EXPIRY_WARNING.as_secs() {
        ExpiryStatus::ExpiringSoon { remaining_secs }
    } else {
        ExpiryStatus::Valid { remaining_secs }
    }
}

pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

pub fn epoch_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
