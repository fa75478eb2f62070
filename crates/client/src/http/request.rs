// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use reqwest::Method;
use serde_json::Value;

use crate::error::ApiError;
use crate::pending::PendingRequest;

/// Path segments that identify the auth endpoints themselves. A 401 from any
/// of these never starts a refresh.
const AUTH_SEGMENTS: &[&str] = &["login", "refresh", "signup", "register", "me"];

/// Outbound API request, relative to the client's base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    headers: Vec<(String, String)>,
    silent: bool,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
            silent: false,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).json(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PATCH, path).json(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Opt out of the login-required interrupt: a 401 rejects immediately,
    /// without refreshing and without notifying the UI.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub(crate) fn mark_retried(&mut self) {
        self.retried = true;
    }

    pub fn is_auth_endpoint(&self) -> bool {
        is_auth_path(&self.path)
    }

    /// Whether a terminal auth failure may park this request for replay.
    pub fn is_replayable(&self) -> bool {
        self.method == Method::GET && !self.silent
    }

    pub fn to_pending(&self, base_url: &str) -> PendingRequest {
        PendingRequest {
            method: self.method.as_str().to_owned(),
            url: self.path.clone(),
            params: self.query.clone(),
            body: self.body.clone(),
            headers: self.headers.clone(),
            base_url: base_url.to_owned(),
        }
    }

    pub fn from_pending(pending: &PendingRequest) -> Result<Self, ApiError> {
        let method = Method::from_bytes(pending.method.as_bytes())
            .map_err(|e| ApiError::Decode(format!("pending method {:?}: {e}", pending.method)))?;
        Ok(Self {
            method,
            path: pending.url.clone(),
            query: pending.params.clone(),
            body: pending.body.clone(),
            headers: pending.headers.clone(),
            silent: false,
            retried: false,
        })
    }
}

pub fn is_auth_path(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.split('/').any(|segment| AUTH_SEGMENTS.contains(&segment))
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
