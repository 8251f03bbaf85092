//! Request/response model and outcome classification.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Breaker partition key, e.g. `"create lakehouse"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointClass(String);

impl EndpointClass {
    pub fn new(verb: &str, kind: &str) -> Self {
        Self(format!("{verb} {kind}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointClass {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// A single control-plane request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Path relative to the transport's base URL, starting with `/`
    pub path: String,
    pub body: Option<Value>,
    pub endpoint_class: EndpointClass,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>, endpoint_class: EndpointClass) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: None,
            endpoint_class,
        }
    }

    pub fn post(path: impl Into<String>, body: Value, endpoint_class: EndpointClass) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body),
            endpoint_class,
        }
    }

    pub fn patch(path: impl Into<String>, body: Value, endpoint_class: EndpointClass) -> Self {
        Self {
            method: HttpMethod::Patch,
            path: path.into(),
            body: Some(body),
            endpoint_class,
        }
    }

    pub fn delete(path: impl Into<String>, endpoint_class: EndpointClass) -> Self {
        Self {
            method: HttpMethod::Delete,
            path: path.into(),
            body: None,
            endpoint_class,
        }
    }
}

/// Successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Remote identifier from the `id` field, if present
    pub fn id(&self) -> Option<&str> {
        self.body.get("id").and_then(Value::as_str)
    }
}

/// Classified result of one transport attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Success(ApiResponse),
    /// Worth retrying: throttling, gateway errors, timeouts, dropped connections
    Transient { status: Option<u16>, message: String },
    /// Not worth retrying
    NonTransient {
        status: u16,
        message: String,
        error_code: Option<String>,
    },
    Unauthorized { message: String },
}

/// Statuses retried with backoff
pub const TRANSIENT_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

impl CallOutcome {
    /// Classify an HTTP status and its decoded body.
    pub fn classify(status: u16, body: Value) -> Self {
        match status {
            200..=299 => CallOutcome::Success(ApiResponse::new(status, body)),
            401 => CallOutcome::Unauthorized {
                message: error_message(&body, status),
            },
            s if TRANSIENT_STATUSES.contains(&s) => CallOutcome::Transient {
                status: Some(s),
                message: error_message(&body, status),
            },
            _ => CallOutcome::NonTransient {
                status,
                message: error_message(&body, status),
                error_code: body
                    .get("errorCode")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        CallOutcome::Transient {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CallOutcome::Transient { .. })
    }
}

fn error_message(body: &Value, status: u16) -> String {
    body.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"))
}
