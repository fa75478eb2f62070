// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde_json::Value;

use crate::http::envelope;

/// Fallback shown to the user when the backend gave no usable message.
pub const FALLBACK_MESSAGE: &str = "Something went wrong. Please try again.";

/// Errors surfaced by the HTTP client and the session controller.
///
/// Cloneable so one refresh outcome can settle every queued waiter.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    /// No response was received (connect, DNS, reset, body read).
    Transport(String),
    /// The backend answered with a non-success status or a failed envelope.
    Status { status: u16, message: String, body: Value },
    /// The response body did not have the expected shape.
    Decode(String),
    /// Local persistence failed.
    Storage(String),
    /// The refresh this request was waiting on was dropped before settling.
    Abandoned,
}

impl ApiError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }

    pub(crate) fn from_status(status: u16, body: Value) -> Self {
        let message = envelope::error_message(&body).unwrap_or_else(|| {
            reqwest::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("request failed")
                .to_owned()
        });
        Self::Status { status, message, body }
    }

    pub(crate) fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }

    /// HTTP status, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TRANSPORT",
            Self::Status { status: 400, .. } => "BAD_REQUEST",
            Self::Status { status: 401, .. } => "UNAUTHORIZED",
            Self::Status { status: 403, .. } => "FORBIDDEN",
            Self::Status { status: 404, .. } => "NOT_FOUND",
            Self::Status { .. } => "HTTP_STATUS",
            Self::Decode(_) => "DECODE",
            Self::Storage(_) => "STORAGE",
            Self::Abandoned => "ABANDONED",
        }
    }

    /// Message suitable for a toast or inline form error.
    pub fn user_message(&self) -> String {
        match self {
            Self::Status { message, .. } if !message.is_empty() => message.clone(),
            Self::Transport(_) => "Unable to reach the server. Check your connection.".to_owned(),
            _ => FALLBACK_MESSAGE.to_owned(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Status { status, message, .. } => write!(f, "HTTP {status}: {message}"),
            Self::Decode(msg) => write!(f, "unexpected response: {msg}"),
            Self::Storage(msg) => write!(f, "storage error: {msg}"),
            Self::Abandoned => f.write_str("token refresh abandoned"),
        }
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
