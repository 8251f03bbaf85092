//! Stagecraft Gateway - Resilient access to the remote control plane
//!
//! Every remote call made by Stagecraft goes through [`ResilientGateway`],
//! which wraps a [`Transport`] with:
//!
//! - bounded retries with exponential backoff on transient responses
//!   (408/429/500/502/503/504 and connection failures)
//! - one credential refresh on `401 Unauthorized`
//! - a circuit breaker per endpoint class (e.g. `"create lakehouse"`)
//!
//! Callers receive either a successful [`ApiResponse`] or a terminal
//! [`GatewayError`], never a partial result. Time is injected through
//! [`Clock`] so backoff and cool-down windows are testable without waiting.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod auth;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod request;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports
pub use auth::{AuthProvider, Credential, EnvTokenProvider, StaticTokenProvider};
pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerRegistry, CircuitSnapshot, CircuitState, Permit,
};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{CircuitBreakerConfig, GatewayConfig, RetryConfig};
pub use error::{AuthError, GatewayError, Result};
pub use gateway::{RemoteApi, ResilientGateway};
pub use request::{ApiRequest, ApiResponse, CallOutcome, EndpointClass, HttpMethod};
pub use transport::{HttpTransport, Transport};
