//! Error types for stagecraft-gateway.

use stagecraft_types::ErrorKind;
use thiserror::Error;

use crate::request::EndpointClass;

/// Credential acquisition errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential could be obtained.
    #[error("credential unavailable: {0}")]
    Unavailable(String),
}

/// Terminal errors returned by the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transient failures persisted through the whole retry budget.
    #[error("retries exhausted for {endpoint_class} after {attempts} attempts: {last_error}")]
    ExhaustedRetries {
        endpoint_class: EndpointClass,
        attempts: u32,
        last_error: String,
    },

    /// Circuit is open; the call was not sent.
    #[error("circuit open for {endpoint_class}")]
    CircuitOpen { endpoint_class: EndpointClass },

    /// Remote rejected the request and retrying would not help.
    #[error("{endpoint_class} rejected with status {status}: {message}")]
    NonTransientFailure {
        endpoint_class: EndpointClass,
        status: u16,
        message: String,
        error_code: Option<String>,
    },

    /// Credential rejected even after a refresh.
    #[error("unauthorized for {endpoint_class}")]
    Unauthorized { endpoint_class: EndpointClass },

    /// Credential provider failed.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// Transport could not be constructed.
    #[error("transport configuration error: {0}")]
    Configuration(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::ExhaustedRetries { .. } => ErrorKind::TransientRemote,
            GatewayError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            GatewayError::NonTransientFailure { .. } => ErrorKind::NonTransientRemote,
            GatewayError::Unauthorized { .. } | GatewayError::Auth(_) => ErrorKind::Unauthorized,
            GatewayError::Configuration(_) => ErrorKind::Internal,
        }
    }

    /// Remote answered 404
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GatewayError::NonTransientFailure { status: 404, .. }
        )
    }

    /// Remote error code, when the response carried one
    pub fn error_code(&self) -> Option<&str> {
        match self {
            GatewayError::NonTransientFailure { error_code, .. } => error_code.as_deref(),
            _ => None,
        }
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
