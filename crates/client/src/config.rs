// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default API base URL when neither `--api-url` nor `PAYMALL_API_URL` is set.
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/";

/// Which PayMall client this process behaves as.
///
/// Both variants run the same session state machine; they differ in endpoint
/// paths, in how the refresh credential travels, and in whether signing up
/// issues tokens immediately.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AppVariant {
    /// Consumer mobile app: body refresh token, immediate registration.
    #[default]
    Consumer,
    /// Admin dashboard: cookie refresh, registration pending approval.
    Admin,
}

impl AppVariant {
    pub fn endpoints(&self) -> Endpoints {
        match self {
            Self::Consumer => Endpoints {
                login: "accounts/login/".to_owned(),
                refresh: "accounts/token/refresh/".to_owned(),
                me: "accounts/me/".to_owned(),
                logout: "accounts/logout/".to_owned(),
                register: "accounts/register/".to_owned(),
                cart_add: "cart/add/".to_owned(),
            },
            Self::Admin => Endpoints {
                login: "accounts/admin/login/".to_owned(),
                refresh: "accounts/admin/token/refresh/".to_owned(),
                me: "accounts/admin/me/".to_owned(),
                logout: "accounts/logout/".to_owned(),
                register: "accounts/signup/management/".to_owned(),
                cart_add: "cart/add/".to_owned(),
            },
        }
    }

    pub fn refresh_mode(&self) -> RefreshMode {
        match self {
            Self::Consumer => RefreshMode::Body,
            Self::Admin => RefreshMode::Cookie,
        }
    }

    pub fn registration_mode(&self) -> RegistrationMode {
        match self {
            Self::Consumer => RegistrationMode::Immediate,
            Self::Admin => RegistrationMode::Approval,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consumer => "consumer",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for AppVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a refresh credential is exchanged for a new access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// The stored refresh token is posted as `{"refresh": ...}`.
    Body,
    /// The refresh credential lives in the cookie jar; the POST has no body.
    Cookie,
}

/// Whether signing up yields a session right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationMode {
    Immediate,
    /// Sign-up succeeds without tokens; an operator assigns roles later.
    Approval,
}

/// API paths, relative to the base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub login: String,
    pub refresh: String,
    pub me: String,
    pub logout: String,
    pub register: String,
    pub cart_add: String,
}

/// Configuration for the PayMall client.
#[derive(Debug, Clone, clap::Args)]
pub struct ClientConfig {
    /// Base URL of the PayMall REST API.
    #[arg(long, default_value = DEFAULT_API_URL, env = "PAYMALL_API_URL")]
    pub api_url: String,

    /// Client variant (consumer, admin).
    #[arg(long, value_enum, default_value_t = AppVariant::Consumer, env = "PAYMALL_APP")]
    pub app: AppVariant,

    /// Directory for persisted tokens, guest carts and redirect intents.
    #[arg(long, env = "PAYMALL_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Log filter (e.g. "info", "paymall=debug").
    #[arg(long, default_value = "info", env = "PAYMALL_LOG")]
    pub log_level: String,

    /// Log format (text, json).
    #[arg(long, default_value = "text", env = "PAYMALL_LOG_FORMAT")]
    pub log_format: String,
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>, app: AppVariant) -> Self {
        Self {
            api_url: api_url.into(),
            app,
            state_dir: None,
            log_level: "info".to_owned(),
            log_format: "text".to_owned(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            anyhow::bail!("api url must start with http:// or https://: {}", self.api_url);
        }
        match self.log_format.as_str() {
            "text" | "json" => Ok(()),
            other => anyhow::bail!("invalid log format: {other}"),
        }
    }

    pub fn endpoints(&self) -> Endpoints {
        self.app.endpoints()
    }

    pub fn refresh_mode(&self) -> RefreshMode {
        self.app.refresh_mode()
    }

    pub fn registration_mode(&self) -> RegistrationMode {
        self.app.registration_mode()
    }

    /// Resolve the state directory.
    ///
    /// Uses `--state-dir`/`PAYMALL_STATE_DIR`, then `$XDG_STATE_HOME/paymall`,
    /// then `$HOME/.local/state/paymall`.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("paymall");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/paymall");
        }
        PathBuf::from(".paymall")
    }
}

/// Join an API base URL and a relative path with exactly one slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
