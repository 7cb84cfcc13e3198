//! Webhook payload decoding and classification

use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{self, debug};

use crate::error::PayloadError;

pub const EVENT_HEADER: &str = "x-github-event";

/// Event category derived from a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Ping,
    Create,
    Delete,
    Push,
}

impl EventCategory {
    /// Name under which the category is published on the event bus
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Ping => "ping",
            EventCategory::Create => "create",
            EventCategory::Delete => "delete",
            EventCategory::Push => "push",
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded webhook body. Never mutated once built.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookPayload {
    value: Value,
}

impl WebhookPayload {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Decodes a raw body according to its content type.
    ///
    /// JSON is assumed when no content type is given. Form bodies carrying a
    /// `payload` field (GitHub's form delivery format) are unwrapped into JSON.
    pub fn decode(content_type: Option<&str>, body: &[u8]) -> Result<Self, PayloadError> {
        if body.is_empty() {
            return Err(PayloadError::NoPayload);
        }

        let mime = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase());

        match mime.as_deref() {
            None | Some("application/json") => Self::from_json(body),
            Some(m) if m.ends_with("+json") => Self::from_json(body),
            Some("application/x-www-form-urlencoded") => Self::from_form(body),
            Some(other) => {
                debug!("Unsupported content type {:?}, body not decoded", other);
                Err(PayloadError::NoPayload)
            }
        }
    }

    fn from_json(body: &[u8]) -> Result<Self, PayloadError> {
        serde_json::from_slice(body)
            .map(Self::new)
            .map_err(|e| PayloadError::Malformed(e.to_string()))
    }

    fn from_form(body: &[u8]) -> Result<Self, PayloadError> {
        let mut fields: HashMap<String, String> = serde_urlencoded::from_bytes(body)
            .map_err(|e| PayloadError::Malformed(e.to_string()))?;

        if let Some(inner) = fields.remove("payload") {
            return Self::from_json(inner.as_bytes());
        }

        let map: Map<String, Value> = fields
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        Ok(Self::new(Value::Object(map)))
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }

    /// The `ref` field, only when it is a non-empty string
    pub fn git_ref(&self) -> Option<&str> {
        self.get("ref")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
    }

    /// Ref with the `refs/heads/` prefix removed
    pub fn branch(&self) -> Option<&str> {
        self.git_ref()
            .map(|r| r.strip_prefix("refs/heads/").unwrap_or(r))
    }

    pub fn commit_sha(&self) -> Option<&str> {
        self.get("after").and_then(Value::as_str)
    }

    pub fn pusher_name(&self) -> Option<&str> {
        self.get("pusher")
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
    }

    pub fn repository(&self) -> Option<&str> {
        self.get("repository")
            .and_then(|r| r.get("full_name"))
            .and_then(Value::as_str)
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(is_truthy)
    }
}

/// JSON truthiness: false, 0, "", null are falsy
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// True when the delivery is a `ping` event
pub fn is_ping(headers: &HeaderMap) -> bool {
    headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "ping")
}

pub fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
}

/// Determines category and ref of a payload.
///
/// `created` takes precedence over `deleted` when both are set.
pub fn classify(payload: &WebhookPayload) -> Result<(EventCategory, &str), PayloadError> {
    let git_ref = payload.git_ref().ok_or(PayloadError::InvalidRef)?;

    let category = if payload.flag("created") {
        EventCategory::Create
    } else if payload.flag("deleted") {
        EventCategory::Delete
    } else {
        EventCategory::Push
    };

    Ok((category, git_ref))
}
