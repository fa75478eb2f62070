// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Response normalization.
//!
//! Some endpoints wrap their payload as `{success, message, data, errors}`,
//! others return the bare payload. Everything past this module sees a single
//! [`ApiResponse`] with the payload in `data`.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ApiError;

/// A successful, normalized API response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub data: Value,
    pub message: Option<String>,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_value(self.data.clone()).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Like [`ApiResponse::json`], but an empty payload yields `T::default()`.
    pub fn json_or_default<T: DeserializeOwned + Default>(&self) -> Result<T, ApiError> {
        if self.data.is_null() {
            return Ok(T::default());
        }
        self.json()
    }
}

fn is_envelope(body: &Value) -> bool {
    body.as_object().is_some_and(|o| o.get("success").is_some_and(Value::is_boolean) && o.contains_key("data"))
}

/// Normalize a 2xx body. A failed envelope becomes an error even on 2xx.
pub fn normalize(status: u16, body: Value) -> Result<ApiResponse, ApiError> {
    if !is_envelope(&body) {
        return Ok(ApiResponse { status, data: body, message: None });
    }
    if body.get("success").and_then(Value::as_bool) != Some(true) {
        return Err(ApiError::from_status(status, body));
    }
    let message = body.get("message").and_then(Value::as_str).map(str::to_owned);
    let data = match body {
        Value::Object(mut map) => map.remove("data").unwrap_or(Value::Null),
        other => other,
    };
    Ok(ApiResponse { status, data, message })
}

/// Pull a human-readable message out of an error body.
///
/// Checks `message`, `detail`, `error`, then the first entry of `errors` or
/// `non_field_errors`, then bare DRF field errors such as
/// `{"email": ["already taken"]}`.
pub fn error_message(body: &Value) -> Option<String> {
    let obj = body.as_object()?;
    for key in ["message", "detail", "error"] {
        if let Some(msg) = obj.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()) {
            return Some(msg.to_owned());
        }
    }
    ["errors", "non_field_errors"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(first_string))
        .or_else(|| obj.values().filter(|v| v.is_array()).find_map(first_string))
}

fn first_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(first_string),
        Value::Object(map) => map.values().find_map(first_string),
        _ => None,
    }
}

/// Parse a raw body: empty is `null`, non-JSON is kept as a string.
pub fn parse_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
