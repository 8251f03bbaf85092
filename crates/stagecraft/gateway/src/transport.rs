//! Wire transport.
//!
//! A [`Transport`] performs exactly one attempt and classifies the result.
//! It never retries; that is the gateway's job.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use crate::auth::Credential;
use crate::error::{GatewayError, Result};
use crate::request::{ApiRequest, CallOutcome, HttpMethod};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest, credential: &Credential) -> CallOutcome;
}

/// HTTP transport over reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest, credential: &Credential) -> CallOutcome {
        let url = format!("{}{}", self.base_url, request.path);
        let builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Patch => self.client.patch(&url),
            HttpMethod::Delete => self.client.delete(&url),
        };
        let mut builder = builder.bearer_auth(credential.secret());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        trace!(method = %request.method, url = %url, "Sending request");

        let response = match builder.send().await {
            Ok(response) => response,
            // Timeouts and connection resets are all worth another attempt
            Err(e) => return CallOutcome::transient(e.to_string()),
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(text) if text.trim().is_empty() => Value::Null,
            Ok(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            Err(e) => return CallOutcome::transient(e.to_string()),
        };

        CallOutcome::classify(status, body)
    }
}
